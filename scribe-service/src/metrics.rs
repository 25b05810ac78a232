//! Prometheus metrics for the OCR and retrieval pipelines.

use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{ServiceError, ServiceResult};

/// Metrics prefix for all service metrics
pub const METRICS_PREFIX: &str = "scribe";

/// Install the global Prometheus recorder and describe every metric
pub fn install_recorder() -> ServiceResult<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServiceError::Internal {
            message: format!("Failed to install metrics recorder: {}", e),
        })?;
    register_metrics();
    Ok(handle)
}

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_ocr_pages_total", METRICS_PREFIX),
        Unit::Count,
        "Pages recognized successfully"
    );
    describe_counter!(
        format!("{}_ocr_page_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Pages the OCR engine failed on"
    );
    describe_histogram!(
        format!("{}_ocr_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Wall time of one parallel OCR run"
    );
    describe_counter!(
        format!("{}_retrieval_tier_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Queries answered by each retrieval tier"
    );
    describe_counter!(
        format!("{}_retrieval_exhausted_total", METRICS_PREFIX),
        Unit::Count,
        "Queries for which no tier found context"
    );
    describe_counter!(
        format!("{}_chat_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Chat requests by response shape"
    );
    describe_counter!(
        format!("{}_reference_chunks_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Reference chunks embedded into the vector collection"
    );
}

/// Helper to record the outcome of an OCR run
pub fn record_ocr(duration_secs: f64, succeeded: usize, failed: usize) {
    counter!(format!("{}_ocr_pages_total", METRICS_PREFIX)).increment(succeeded as u64);
    if failed > 0 {
        counter!(format!("{}_ocr_page_failures_total", METRICS_PREFIX)).increment(failed as u64);
    }
    histogram!(format!("{}_ocr_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record which tier resolved a query, or exhaustion
pub fn record_retrieval(tier: Option<&str>) {
    match tier {
        Some(tier) => counter!(
            format!("{}_retrieval_tier_hits_total", METRICS_PREFIX),
            "tier" => tier.to_string()
        )
        .increment(1),
        None => counter!(format!("{}_retrieval_exhausted_total", METRICS_PREFIX)).increment(1),
    }
}

pub fn record_chat(shape: &'static str) {
    counter!(
        format!("{}_chat_requests_total", METRICS_PREFIX),
        "shape" => shape
    )
    .increment(1);
}

pub fn record_reference_chunks(count: usize) {
    counter!(format!("{}_reference_chunks_ingested_total", METRICS_PREFIX)).increment(count as u64);
}
