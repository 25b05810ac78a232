//! HTTP API for the Scribe service.
//!
//! This module provides the REST API endpoints for:
//! - PDF upload and OCR extraction
//! - Retrieval-augmented chat (chat-completion and simple reply shapes)
//! - Allow-list and reference-link administration
//! - Health, metrics and runtime settings

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::RuntimeConfig;
use crate::error::{I18nError, ServiceError};
use crate::service::ScribeService;

pub mod admin;
pub mod chat;
pub mod ocr;
pub mod settings;
use admin::{add_allowed_site_handler, get_allowed_sites_handler, set_links_handler};
use chat::{chat_completions_handler, chat_handler, models_handler};
use ocr::{
    extract_from_uploaded_handler, extract_handler, extract_inline_handler, upload_handler,
};
use settings::{get_settings_handler, update_settings_handler};

/// Application state
pub struct AppState {
    pub service: Arc<ScribeService>,
    pub start_time: Instant,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create an i18n-aware error from a service error
    pub fn i18n_error(&self, error: ServiceError) -> I18nError {
        I18nError::new(error, self.service.i18n.clone(), "en")
    }

    /// Client error carrying a catalogue message
    pub fn invalid_request(&self, key: &str) -> I18nError {
        self.i18n_error(ServiceError::InvalidRequest {
            message: self.service.i18n.get("en", key, None),
        })
    }
}

/// Build the API router
pub fn router(
    service: Arc<ScribeService>,
    runtime_config: &RuntimeConfig,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
        metrics,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Use the configured max document size for uploads; inline payloads are base64
    let max_body_size = runtime_config.dynamic().limits.max_document_size_bytes as usize;
    let max_inline_size = max_body_size / 3 * 4 + 64 * 1024;

    let ocr_routes = Router::new()
        .route(
            "/extract",
            post(extract_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route(
            "/extract-inline",
            post(extract_inline_handler).layer(DefaultBodyLimit::max(max_inline_size)),
        )
        .route(
            "/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/extract-from-uploaded", post(extract_from_uploaded_handler));

    let llm_routes = Router::new()
        .route("/models", get(models_handler))
        .route("/chat/completions", post(chat_completions_handler));

    let admin_routes = Router::new()
        .route("/allowed-sites", get(get_allowed_sites_handler))
        .route("/add-allowed-site", post(add_allowed_site_handler))
        .route("/set-links", post(set_links_handler));

    let api_routes = Router::new().route(
        "/settings",
        get(get_settings_handler).put(update_settings_handler),
    );

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/chat", post(chat_handler))
        .nest("/ocr", ocr_routes)
        .nest("/llm", llm_routes)
        .nest("/admin", admin_routes)
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health & Metrics ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let generation_available = state.service.generation_available().await;

    let status = if generation_available {
        state.service.i18n.get("en", "health-status-healthy", None)
    } else {
        state.service.i18n.format(
            "en",
            "health-status-degraded",
            &[("reason", "generation backend unavailable")],
        )
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        generation_available,
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    generation_available: bool,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
