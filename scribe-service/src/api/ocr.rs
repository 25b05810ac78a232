//! Document ingestion endpoints.

use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{I18nError, ProcessingError, ServiceError};
use crate::ocr::PageFailure;
use crate::service::{Extraction, ScribeService, pdf_file_name};

use super::AppState;

/// Response for the extraction endpoints
#[derive(Serialize)]
pub struct ExtractResponse {
    /// `{"page_<n>": text}`
    pub text: serde_json::Map<String, serde_json::Value>,
    /// Pages skipped under the best-effort OCR policy
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<PageFailure>,
    /// Present when a question was asked; null when the document had nothing relevant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<Option<String>>,
}

impl ExtractResponse {
    fn new(extraction: Extraction, asked: bool) -> Self {
        Self {
            text: extraction.document.to_page_map(),
            failures: extraction.failures,
            answer: asked.then_some(extraction.answer),
        }
    }
}

/// Inline extraction request
#[derive(Deserialize)]
pub struct ExtractInlineRequest {
    pub pdf_base64: String,
    pub filename: Option<String>,
    pub question: Option<String>,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub filename: String,
}

#[derive(Deserialize)]
pub struct ExtractUploadedRequest {
    pub filename: String,
}

#[derive(Serialize)]
pub struct ExtractUploadedResponse {
    pub message: String,
    pub pages: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<PageFailure>,
}

/// Oversized bodies are 413; any other malformed upload is the client's fault
fn multipart_error(state: &AppState, error: MultipartError) -> I18nError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        let max = state
            .service
            .runtime_config
            .dynamic()
            .limits
            .max_document_size_bytes;
        state.i18n_error(ProcessingError::BodyTooLarge { max }.into())
    } else {
        state.i18n_error(ServiceError::InvalidRequest {
            message: error.body_text(),
        })
    }
}

/// Read the `file` part (and optional `question`) of a multipart upload
async fn read_pdf_upload(
    state: &AppState,
    multipart: &mut Multipart,
) -> Result<(Vec<u8>, String, Option<String>), I18nError> {
    let mut file_data: Option<(Vec<u8>, String)> = None;
    let mut question: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(state, e))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let data = field.bytes().await.map_err(|e| multipart_error(state, e))?;
                file_data = Some((data.to_vec(), filename));
            }
            "question" => {
                question = Some(field.text().await.map_err(|e| multipart_error(state, e))?);
            }
            _ => {}
        }
    }

    let Some((data, filename)) = file_data.filter(|(_, f)| !f.trim().is_empty()) else {
        return Err(state.invalid_request("error-no-file"));
    };
    let filename = pdf_file_name(&filename).map_err(|e| state.i18n_error(e))?;

    Ok((data, filename, question))
}

/// POST /ocr/extract - OCR an uploaded PDF and optionally answer a question about it
pub async fn extract_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<ExtractResponse>, I18nError> {
    let (data, filename, question) = read_pdf_upload(&state, &mut multipart).await?;
    let question = question.filter(|q| !q.trim().is_empty());

    let extraction = state
        .service
        .extract_pdf(data, &filename, question.as_deref())
        .await
        .map_err(|e| state.i18n_error(e))?;

    Ok(Json(ExtractResponse::new(extraction, question.is_some())))
}

/// POST /ocr/extract-inline - same as extract, for base64 payloads
pub async fn extract_inline_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExtractInlineRequest>,
) -> Result<Json<ExtractResponse>, I18nError> {
    let encoded = request.pdf_base64.trim();
    // Accept data URLs as produced by browsers
    let encoded = encoded
        .split_once(";base64,")
        .map(|(_, data)| data)
        .unwrap_or(encoded);

    let data = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| {
            state.i18n_error(
                ProcessingError::Decode {
                    message: e.to_string(),
                }
                .into(),
            )
        })?;

    let document_id = match request.filename.as_deref().filter(|f| !f.trim().is_empty()) {
        Some(name) => pdf_file_name(name).map_err(|e| state.i18n_error(e))?,
        None => ScribeService::inline_document_id(&data),
    };
    let question = request.question.filter(|q| !q.trim().is_empty());

    let extraction = state
        .service
        .extract_pdf(data, &document_id, question.as_deref())
        .await
        .map_err(|e| state.i18n_error(e))?;

    Ok(Json(ExtractResponse::new(extraction, question.is_some())))
}

/// POST /ocr/upload - store a PDF for later extraction
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, I18nError> {
    let (data, filename, _) = read_pdf_upload(&state, &mut multipart).await?;

    let filename = state
        .service
        .store_upload(&filename, &data)
        .await
        .map_err(|e| state.i18n_error(e))?;

    Ok(Json(UploadResponse { filename }))
}

/// POST /ocr/extract-from-uploaded - OCR a stored PDF into the corpus
pub async fn extract_from_uploaded_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExtractUploadedRequest>,
) -> Result<Json<ExtractUploadedResponse>, I18nError> {
    let extraction = state
        .service
        .extract_uploaded(&request.filename)
        .await
        .map_err(|e| state.i18n_error(e))?;

    let pages = extraction.document.len();
    let message = state.service.i18n.format(
        "en",
        "ocr-saved",
        &[
            ("pages", &pages.to_string()),
            ("name", &extraction.document_id),
        ],
    );

    Ok(Json(ExtractUploadedResponse {
        message,
        pages,
        failures: extraction.failures,
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use base64::Engine;
    use serde_json::json;

    use crate::api::test_support::{json_request, send};
    use crate::service::test_support::{harness, pdf};

    fn multipart(filename: &str, content: &[u8], question: Option<&str>) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--XBOUNDARY\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/pdf\r\n\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
        if let Some(q) = question {
            body.extend_from_slice(
                format!(
                    "--XBOUNDARY\r\nContent-Disposition: form-data; name=\"question\"\r\n\r\n{}\r\n",
                    q
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(b"--XBOUNDARY--\r\n");

        Request::builder()
            .method("POST")
            .uri("/ocr/extract")
            .header("content-type", "multipart/form-data; boundary=XBOUNDARY")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_extract_returns_page_map_and_answer() {
        let h = harness(&["Alpha", "Beta", "Gamma"], vec![]);

        let (status, body) = send(
            &h,
            multipart("greek.pdf", &pdf(&["a", "b", "c"]), Some("gamma?")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"]["page_1"], "Alpha");
        assert_eq!(body["text"]["page_3"], "Gamma");
        assert_eq!(body["answer"], "generated answer");
    }

    #[tokio::test]
    async fn test_extract_question_without_match_is_null_answer() {
        let h = harness(&["Alpha"], vec![]);

        let (_, body) = send(&h, multipart("a.pdf", &pdf(&["a"]), Some("zebra"))).await;

        assert!(body.get("answer").is_some());
        assert!(body["answer"].is_null());
    }

    #[tokio::test]
    async fn test_extract_rejects_non_pdf() {
        let h = harness(&["Alpha"], vec![]);
        let (status, body) = send(&h, multipart("notes.txt", b"x", None)).await;

        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["message"], "Please upload a PDF file.");
    }

    #[tokio::test]
    async fn test_extract_inline_with_generated_id() {
        let h = harness(&["Inline page"], vec![]);
        let encoded = base64::engine::general_purpose::STANDARD.encode(pdf(&["x"]));

        let (status, body) = send(
            &h,
            json_request("POST", "/ocr/extract-inline", json!({ "pdf_base64": encoded })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"]["page_1"], "Inline page");
        assert!(body.get("answer").is_none());
        assert!(
            h.service
                .corpus
                .text()
                .unwrap()
                .contains("Inline page")
        );
    }

    #[tokio::test]
    async fn test_extract_inline_rejects_bad_base64() {
        let h = harness(&[], vec![]);
        let (status, body) = send(
            &h,
            json_request("POST", "/ocr/extract-inline", json!({ "pdf_base64": "%%%" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_payload");
    }

    #[tokio::test]
    async fn test_extract_from_missing_upload_is_404() {
        let h = harness(&[], vec![]);
        let (status, body) = send(
            &h,
            json_request(
                "POST",
                "/ocr/extract-from-uploaded",
                json!({ "filename": "nope.pdf" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "document_not_found");
    }

    #[tokio::test]
    async fn test_oversized_upload_is_413_not_missing_file() {
        let h = harness(&["Alpha"], vec![]);
        let mut dynamic = (*h.service.runtime_config.snapshot()).clone();
        dynamic.limits.max_document_size_bytes = 1024;
        h.service.runtime_config.update_dynamic(dynamic);

        let (status, body) = send(&h, multipart("big.pdf", &vec![b'x'; 4096], None)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["code"], "file_too_large");
    }
}
