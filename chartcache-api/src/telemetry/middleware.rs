//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Wraps every request in a tracing span and records Prometheus metrics
//! against a normalized route.

use axum::{extract::Request, middleware::Next, response::Response};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;
use tracing::{info_span, Instrument};

use super::metrics::METRICS;

/// 64-char cache keys.
static CACHE_KEY_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[0-9a-f]{64}").ok());

/// Numeric path segments.
static ID_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"/\d+(/|$)").ok());

/// Normalize path for metrics/spans (replace cache keys and IDs with placeholders).
///
/// This prevents high-cardinality label explosion in Prometheus.
fn normalize_path(path: &str) -> String {
    let mut result = path.to_string();
    if let Some(re) = CACHE_KEY_PATTERN.as_ref() {
        result = re.replace_all(&result, "{key}").into_owned();
    }
    if let Some(re) = ID_PATTERN.as_ref() {
        result = re.replace_all(&result, "/{id}$1").into_owned();
    }
    result
}

/// Observability middleware for Axum.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let normalized_path = normalize_path(&path);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %normalized_path,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_http_request(
            method.as_str(),
            &normalized_path,
            status.as_u16(),
            duration.as_secs_f64(),
        );
    }

    if status.is_server_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request failed"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request completed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_cache_key() {
        let key = "a".repeat(64);
        let path = format!("/api/request/{}", key);
        assert_eq!(normalize_path(&path), "/api/request/{key}");
    }

    #[test]
    fn test_normalize_path_cache_key_with_suffix() {
        let key = "0123456789abcdef".repeat(4);
        let path = format!("/api/request/{}/ledger", key);
        assert_eq!(normalize_path(&path), "/api/request/{key}/ledger");
    }

    #[test]
    fn test_normalize_path_numeric_id() {
        assert_eq!(normalize_path("/api/entries/12345"), "/api/entries/{id}");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/meta/industry"), "/meta/industry");
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
    }
}
