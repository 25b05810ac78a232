use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::i18n::I18n;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {filename}")]
    DocumentNotFound { filename: String },

    #[error("{0}")]
    Ocr(#[from] OcrError),

    #[error("Retrieval failed")]
    Retrieval(#[from] RetrievalError),

    #[error("{0}")]
    Generation(#[from] GenerationError),

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("Document processing failed")]
    Processing(#[from] ProcessingError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Rasterization and OCR errors
#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Failed to rasterize PDF: {message}")]
    Rasterize { message: String },

    #[error("OCR failed on page {page}: {message}")]
    Engine { page: u32, message: String },

    #[error("OCR worker failed: {message}")]
    Worker { message: String },

    #[error("OCR run was cancelled")]
    Cancelled,
}

/// Errors raised inside a single retrieval tier
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Connection failed to {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Invalid response from {service}: {message}")]
    InvalidResponse { service: String, message: String },

    #[error("Embedding failed: {message}")]
    Embedding { message: String },
}

/// Generation call errors
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Connection failed to generation backend at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Generation failed (status {status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Invalid response from generation backend: {message}")]
    InvalidResponse { message: String },

    /// The backend broke its output contract (e.g. the prompt was not echoed back)
    #[error("Generation output format error: {message}")]
    Format { message: String },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// Document intake errors
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Unsupported file format: {format}")]
    UnsupportedFormat { format: String },

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Request body exceeds the {max}-byte limit")]
    BodyTooLarge { max: u64 },

    #[error("Invalid inline payload: {message}")]
    Decode { message: String },

    #[error("IO error")]
    Io(#[source] std::io::Error),
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DocumentNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::InvalidRequest { .. }
            | ServiceError::Processing(ProcessingError::Decode { .. }) => StatusCode::BAD_REQUEST,
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ServiceError::Processing(
                ProcessingError::FileTooLarge { .. } | ProcessingError::BodyTooLarge { .. },
            ) => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Ocr(OcrError::Rasterize { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Generation(_) | ServiceError::Retrieval(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code naming the stage that failed
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "document_not_found",
            ServiceError::Ocr(OcrError::Rasterize { .. }) => "rasterize_failed",
            ServiceError::Ocr(OcrError::Engine { .. }) => "ocr_failed",
            ServiceError::Ocr(OcrError::Worker { .. }) => "ocr_worker_failed",
            ServiceError::Ocr(OcrError::Cancelled) => "ocr_cancelled",
            ServiceError::Retrieval(RetrievalError::Embedding { .. }) => "embedding_failed",
            ServiceError::Retrieval(_) => "search_failed",
            ServiceError::Generation(GenerationError::Format { .. }) => "generation_format_error",
            ServiceError::Generation(_) => "generation_failed",
            ServiceError::Database(_) => "database_error",
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }) => {
                "unsupported_format"
            }
            ServiceError::Processing(
                ProcessingError::FileTooLarge { .. } | ProcessingError::BodyTooLarge { .. },
            ) => "file_too_large",
            ServiceError::Processing(ProcessingError::Decode { .. }) => "invalid_payload",
            ServiceError::Processing(ProcessingError::Io(_)) => "io_error",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }

    /// Get a user-friendly translated message
    pub fn user_message(&self, i18n: &I18n, locale: &str) -> String {
        match self {
            ServiceError::DocumentNotFound { filename } => {
                i18n.format(locale, "error-document-not-found", &[("name", filename)])
            }
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }) => {
                i18n.get(locale, "error-pdf-required", None)
            }
            ServiceError::Internal { .. } => i18n.get(locale, "error-internal", None),
            // For other errors, fall back to the technical message
            _ => self.to_string(),
        }
    }

    /// Convert to an error response with i18n support
    pub fn into_response_with_i18n(self, i18n: &I18n, locale: &str) -> Response {
        let status = self.status_code();
        let response = ErrorResponse {
            message: self.user_message(i18n, locale),
            code: Some(self.error_code().to_string()),
        };

        (status, Json(response)).into_response()
    }

    /// Client-side mistakes are not logged as system failures
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(self.error_code().to_string()),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Render an error with its full source chain, for logging
pub fn format_error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Error wrapper with i18n support for API responses
pub struct I18nError {
    pub error: ServiceError,
    pub i18n: std::sync::Arc<I18n>,
    pub locale: String,
}

impl I18nError {
    pub fn new(error: ServiceError, i18n: std::sync::Arc<I18n>, locale: impl Into<String>) -> Self {
        Self {
            error,
            i18n,
            locale: locale.into(),
        }
    }
}

impl IntoResponse for I18nError {
    fn into_response(self) -> Response {
        if !self.error.is_client_error() {
            tracing::error!(
                code = self.error.error_code(),
                error = %format_error_chain(&self.error),
                "Request failed"
            );
        }
        self.error.into_response_with_i18n(&self.i18n, &self.locale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_codes_are_distinct() {
        let ocr = ServiceError::Ocr(OcrError::Engine {
            page: 2,
            message: "boom".to_string(),
        });
        let search = ServiceError::Retrieval(RetrievalError::Upstream {
            status: 500,
            message: "down".to_string(),
        });
        let generation = ServiceError::Generation(GenerationError::Upstream {
            status: 503,
            message: "busy".to_string(),
        });
        let format = ServiceError::Generation(GenerationError::Format {
            message: "prompt missing".to_string(),
        });

        assert_eq!(ocr.error_code(), "ocr_failed");
        assert_eq!(search.error_code(), "search_failed");
        assert_eq!(generation.error_code(), "generation_failed");
        assert_eq!(format.error_code(), "generation_format_error");
    }

    #[test]
    fn test_input_errors_are_client_errors() {
        let err = ServiceError::InvalidRequest {
            message: "missing query".to_string(),
        };
        assert!(err.is_client_error());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = ServiceError::Ocr(OcrError::Worker {
            message: "panicked".to_string(),
        });
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let err = ServiceError::Processing(ProcessingError::Io(std::io::Error::other("disk full")));
        assert_eq!(
            format_error_chain(&err),
            "Document processing failed: IO error: disk full"
        );
    }
}
