//! Prometheus Metrics Definitions
//!
//! Defines all Chartcache metrics with appropriate labels and types.
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use chartcache_core::LedgerOutcome;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Render latency buckets (seconds). Renders run aggregate queries and write a
/// file, so the tail is longer than for plain HTTP handling.
const RENDER_LATENCY_BUCKETS: &[f64] = &[0.010, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<ChartcacheMetrics>> = Lazy::new(ChartcacheMetrics::new);

/// Container for all Chartcache metrics.
#[derive(Clone)]
pub struct ChartcacheMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Resolution counter - labels: outcome (hit, miss, failed, in_progress)
    pub resolutions_total: CounterVec,

    /// Render counter - labels: kind, status (success/error/abandoned)
    pub renders_total: CounterVec,

    /// Render duration histogram - labels: kind
    pub render_duration_seconds: HistogramVec,
}

impl ChartcacheMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "chartcache_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "chartcache_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            resolutions_total: register_counter_vec!(
                "chartcache_resolutions_total",
                "Chart requests resolved, by ledger outcome",
                &["outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register resolutions_total: {}", e)))?,

            renders_total: register_counter_vec!(
                "chartcache_renders_total",
                "Renderer invocations",
                &["kind", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register renders_total: {}", e)))?,

            render_duration_seconds: register_histogram_vec!(
                "chartcache_render_duration_seconds",
                "Render duration in seconds",
                &["kind"],
                RENDER_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register render_duration_seconds: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record the ledger outcome of one resolve.
    pub fn record_resolution(&self, outcome: LedgerOutcome) {
        let label = outcome.as_db_str().to_ascii_lowercase();
        self.resolutions_total.with_label_values(&[&label]).inc();
    }

    /// Record a finished render.
    pub fn record_render(&self, kind: &str, success: bool, duration_secs: f64) {
        let status = if success { "success" } else { "error" };
        self.renders_total.with_label_values(&[kind, status]).inc();
        self.render_duration_seconds
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    /// Record a claim released by a dropped guard.
    pub fn record_abandoned_render(&self, kind: &str) {
        self.renders_total
            .with_label_values(&[kind, "abandoned"])
            .inc();
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
))]
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;

    fn metrics() -> Result<&'static ChartcacheMetrics, String> {
        METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))
    }

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        let metrics = metrics()?;
        assert!(!metrics.http_requests_total.desc().is_empty());
        assert!(!metrics.resolutions_total.desc().is_empty());
        Ok(())
    }

    #[test]
    fn test_record_resolution_uses_lowercase_outcome() -> Result<(), String> {
        let metrics = metrics()?;
        let before = metrics
            .resolutions_total
            .with_label_values(&["in_progress"])
            .get();
        metrics.record_resolution(LedgerOutcome::InProgress);
        let after = metrics
            .resolutions_total
            .with_label_values(&["in_progress"])
            .get();
        assert!(after >= before + 1.0);
        Ok(())
    }

    #[test]
    fn test_record_render() -> Result<(), String> {
        let metrics = metrics()?;
        metrics.record_render("bar", true, 0.120);
        metrics.record_render("pie", false, 0.010);
        metrics.record_abandoned_render("line");
        assert!(metrics.renders_total.with_label_values(&["line", "abandoned"]).get() >= 1.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_text() {
        if let Ok(m) = METRICS.as_ref() {
            m.record_http_request("GET", "/health/ping", 200, 0.001);
        }
        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
