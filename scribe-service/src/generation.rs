use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{GenerationConfig, RuntimeConfig};
use crate::error::{GenerationError, ServiceError, ServiceResult};

/// Opaque text generation: the raw output is the prompt followed by the completion
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> ServiceResult<String>;

    /// Whether the backend currently answers; reported by `/health`
    async fn is_available(&self) -> bool {
        true
    }
}

/// Counts model tokens in a piece of text
#[async_trait]
pub trait Tokenizer: Send + Sync {
    async fn count_tokens(&self, text: &str) -> ServiceResult<usize>;
}

/// Client for a text-generation-inference compatible server.
///
/// Endpoint, sampling parameters and timeout are read from the runtime
/// configuration on every call.
pub struct TextGenerationClient {
    client: Client,
    runtime_config: Arc<RuntimeConfig>,
}

impl TextGenerationClient {
    pub fn new(runtime_config: Arc<RuntimeConfig>) -> ServiceResult<Self> {
        let client = Client::builder().build().map_err(|e| {
            ServiceError::Generation(GenerationError::Connection {
                url: runtime_config.dynamic().generation.base_url.clone(),
                source: e,
            })
        })?;

        Ok(Self {
            client,
            runtime_config,
        })
    }

    fn url(config: &GenerationConfig, path: &str) -> String {
        format!("{}{}", config.base_url.trim_end_matches('/'), path)
    }

    /// Check if the generation backend is reachable
    pub async fn health_check(&self) -> bool {
        let url = Self::url(&self.runtime_config.dynamic().generation, "/health");
        match self.client.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Generation backend health check failed");
                false
            }
        }
    }

    /// The `/generate` call for `prompt` under the current settings
    fn generate_request(&self, prompt: &str) -> Result<reqwest::Request, GenerationError> {
        let dynamic = self.runtime_config.snapshot();
        let config = &dynamic.generation;
        let url = Self::url(config, "/generate");

        self.client
            .post(&url)
            .timeout(config.request_timeout())
            .json(&GenerateRequest {
                inputs: prompt,
                parameters: GenerateParameters {
                    max_new_tokens: config.max_new_tokens,
                    temperature: config.temperature,
                    return_full_text: true,
                },
            })
            .build()
            .map_err(|e| GenerationError::Connection { url, source: e })
    }
}

#[async_trait]
impl Generator for TextGenerationClient {
    async fn generate(&self, prompt: &str) -> ServiceResult<String> {
        let request = self.generate_request(prompt)?;
        let url = request.url().to_string();

        debug!(prompt_chars = prompt.len(), "Calling generation backend");

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| GenerationError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Generation(GenerationError::Upstream {
                status,
                message,
            }));
        }

        let body: GenerateResponse =
            response
                .json()
                .await
                .map_err(|e| GenerationError::InvalidResponse {
                    message: e.to_string(),
                })?;

        Ok(body.generated_text)
    }

    async fn is_available(&self) -> bool {
        self.health_check().await
    }
}

#[async_trait]
impl Tokenizer for TextGenerationClient {
    async fn count_tokens(&self, text: &str) -> ServiceResult<usize> {
        let dynamic = self.runtime_config.snapshot();
        let url = Self::url(&dynamic.generation, "/tokenize");

        let response = self
            .client
            .post(&url)
            .timeout(dynamic.generation.request_timeout())
            .json(&TokenizeRequest { inputs: text })
            .send()
            .await
            .map_err(|e| GenerationError::Connection {
                url: url.clone(),
                source: e,
            })?;

        let status = response.status();
        if status.is_client_error() {
            // The tokenizer rejected the input itself
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Generation(GenerationError::Format {
                message: format!("tokenizer rejected input: {}", message),
            }));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Generation(GenerationError::Upstream {
                status: status.as_u16(),
                message,
            }));
        }

        let tokens: Vec<serde_json::Value> =
            response
                .json()
                .await
                .map_err(|e| GenerationError::InvalidResponse {
                    message: e.to_string(),
                })?;

        Ok(tokens.len())
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: GenerateParameters,
}

#[derive(Debug, Serialize)]
struct GenerateParameters {
    max_new_tokens: u32,
    temperature: f32,
    return_full_text: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    generated_text: String,
}

#[derive(Debug, Serialize)]
struct TokenizeRequest<'a> {
    inputs: &'a str,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Echoes the prompt followed by a fixed answer
    pub struct EchoGenerator {
        pub answer: String,
        pub prompts: Mutex<Vec<String>>,
    }

    impl EchoGenerator {
        pub fn new(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, prompt: &str) -> ServiceResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(format!("{}{}", prompt, self.answer))
        }
    }

    /// One token per whitespace-separated word, plus one per call
    pub struct WordTokenizer;

    #[async_trait]
    impl Tokenizer for WordTokenizer {
        async fn count_tokens(&self, text: &str) -> ServiceResult<usize> {
            Ok(text.split_whitespace().count() + 1)
        }
    }
}
