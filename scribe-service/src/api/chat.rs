//! Chat endpoints: OpenAI-style completions and the plain reply shape.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::I18nError;
use crate::metrics;
use crate::prompt::Usage;
use crate::retrieval::TierKind;
use crate::service::ChatOutcome;

use super::AppState;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Request for POST /llm/chat/completions; `message` is accepted as a shorthand
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ChatCompletionRequest {
    /// The query fed to retrieval: the last user message
    fn query(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .or(self.messages.last())
            .map(|m| m.content.as_str())
            .or(self.message.as_deref())
    }
}

#[derive(Debug, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelInfo>,
}

/// GET /llm/models
pub async fn models_handler(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    Json(ModelList {
        object: "list",
        data: vec![ModelInfo {
            id: state.service.model_id(),
            object: "model",
            created: 0,
            owned_by: "custom",
        }],
    })
}

/// POST /llm/chat/completions
pub async fn chat_completions_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Json<ChatCompletionResponse>, I18nError> {
    let Some(query) = request.query() else {
        return Err(state.invalid_request("error-no-messages"));
    };

    let outcome = state
        .service
        .answer(query, true)
        .await
        .map_err(|e| state.i18n_error(e))?;
    metrics::record_chat("completion");

    let (content, sources, usage) = match outcome {
        ChatOutcome::Answered {
            reply,
            sources,
            usage,
            ..
        } => (reply, sources, usage),
        ChatOutcome::NoContext => (
            state.service.i18n.get("en", "retrieval-no-context", None),
            Vec::new(),
            Usage::default(),
        ),
    };

    Ok(Json(ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        object: "chat.completion",
        created: chrono::Utc::now().timestamp(),
        model: request.model.unwrap_or_else(|| state.service.model_id()),
        choices: vec![Choice {
            index: 0,
            message: AssistantMessage {
                role: "assistant",
                content,
                sources,
            },
            finish_reason: "stop",
        }],
        usage,
    }))
}

/// POST /chat - reply text with a references section appended
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, I18nError> {
    let outcome = state
        .service
        .answer(&request.message, false)
        .await
        .map_err(|e| state.i18n_error(e))?;
    metrics::record_chat("reply");

    let i18n = &state.service.i18n;
    let reply = match outcome {
        ChatOutcome::Answered {
            reply,
            sources,
            tier,
            ..
        } => {
            let references = if tier == TierKind::Local {
                i18n.get("en", "retrieval-from-documents", None)
            } else {
                sources
                    .iter()
                    .map(|link| format!("Source: {}", link))
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            format!(
                "{}\n\n{}\n{}",
                reply,
                i18n.get("en", "retrieval-references", None),
                references
            )
        }
        ChatOutcome::NoContext => i18n.get("en", "retrieval-no-context", None),
    };

    Ok(Json(ChatResponse { reply }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::api::test_support::{get, json_request, send};
    use crate::retrieval::web_support::hit;
    use crate::service::test_support::harness;

    #[tokio::test]
    async fn test_models_lists_configured_model() {
        let h = harness(&[], vec![]);
        let (status, body) = send(&h, get("/llm/models")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["object"], "list");
        assert_eq!(body["data"][0]["id"], "microsoft/Phi-3-mini-128k-instruct");
        assert_eq!(body["data"][0]["owned_by"], "custom");
    }

    #[tokio::test]
    async fn test_completion_envelope_carries_web_sources() {
        let h = harness(&[], vec![hit("https://docs.example/a", "Anchors hold ships")]);
        h.service.add_allowed_site("docs.example").unwrap();

        let (status, body) = send(
            &h,
            json_request(
                "POST",
                "/llm/chat/completions",
                json!({ "messages": [
                    { "role": "system", "content": "be nice" },
                    { "role": "user", "content": "what holds ships?" }
                ]}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["object"], "chat.completion");
        assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
        let message = &body["choices"][0]["message"];
        assert_eq!(message["role"], "assistant");
        assert_eq!(message["content"], "generated answer");
        assert_eq!(message["sources"], json!(["https://docs.example/a"]));
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
        // "generated answer" is two words, plus the tokenizer's per-call token
        assert_eq!(body["usage"]["completion_tokens"], 3);
        assert!(body["usage"]["total_tokens"].as_u64().unwrap() > 3);
    }

    #[tokio::test]
    async fn test_completion_without_messages_is_400() {
        let h = harness(&[], vec![]);
        let (status, body) = send(
            &h,
            json_request("POST", "/llm/chat/completions", json!({ "messages": [] })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid request: No messages provided.");
    }

    #[tokio::test]
    async fn test_exhaustion_is_200_with_catalogue_text() {
        let h = harness(&[], vec![]);
        let (status, body) = send(
            &h,
            json_request(
                "POST",
                "/llm/chat/completions",
                json!({ "messages": [{ "role": "user", "content": "anything at all" }] }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["choices"][0]["message"]["content"],
            "No relevant information found."
        );
        assert_eq!(body["choices"][0]["message"]["sources"], json!([]));
        assert_eq!(body["usage"]["total_tokens"], 0);
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_plain_chat_appends_references() {
        let h = harness(&[], vec![
            hit("https://docs.example/a", "Anchors hold ships"),
            hit("https://docs.example/b", "Ropes hold sails"),
        ]);
        h.service.add_allowed_site("docs.example").unwrap();

        let (status, body) = send(
            &h,
            json_request("POST", "/chat", json!({ "message": "what holds things?" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["reply"],
            "generated answer\n\nReferences:\nSource: https://docs.example/a\nSource: https://docs.example/b"
        );
    }

    #[tokio::test]
    async fn test_plain_chat_rejects_blank_message() {
        let h = harness(&[], vec![]);
        let (status, _) = send(&h, json_request("POST", "/chat", json!({ "message": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
