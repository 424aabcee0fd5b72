//! REST API Routes Module
//!
//! Includes:
//! - Chart request resolution and cache entry inspection (`/api`)
//! - Option listings for request builders (`/meta`)
//! - Health check endpoints (Kubernetes-compatible)
//! - Prometheus metrics and the OpenAPI document
//! - CORS support for browser-based clients

pub mod chart;
pub mod health;
pub mod meta;

use std::time::Duration;

use axum::{
    http::{header, request::Parts, HeaderValue, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::ApiConfig;
use crate::db::DbClient;
use crate::services::DedupCoordinator;
use crate::telemetry::{metrics_handler, observability_middleware};

pub use chart::create_router as chart_router;
pub use health::create_router as health_router;
pub use meta::create_router as meta_router;

// ============================================================================
// OPENAPI ENDPOINTS
// ============================================================================

/// Handler for /openapi.json endpoint.
#[cfg(feature = "openapi")]
async fn openapi_json() -> impl axum::response::IntoResponse {
    use utoipa::OpenApi;
    axum::Json(crate::openapi::ApiDoc::openapi())
}

// ============================================================================
// ROUTER
// ============================================================================

/// Build the full application router.
///
/// `db` backs the health and metadata routes; chart resolution goes through
/// `dedup`, which carries its own store handles.
pub fn create_api_router(db: DbClient, dedup: DedupCoordinator, config: &ApiConfig) -> Router {
    let router = Router::new()
        .nest("/api", chart::create_router(dedup))
        .nest("/meta", meta::create_router(db.clone()))
        .nest("/health", health::create_router(db, config.chart_dir.clone()))
        .route("/metrics", get(metrics_handler));

    #[cfg(feature = "openapi")]
    let router = router.route("/openapi.json", get(openapi_json));

    // Execution order: CORS -> Observability -> Handler
    router
        .layer(from_fn(observability_middleware))
        .layer(build_cors_layer(config))
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// In development mode (empty origins), allows all origins.
/// In production mode, only allows configured origins, including
/// `*.domain` wildcards.
pub fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if !config.is_production() {
        tracing::info!("CORS: Development mode - allowing all origins");
        return cors.allow_origin(Any).allow_headers(Any);
    }

    tracing::info!(origins = ?config.cors_origins, "CORS: Production mode");
    let allowed = config.clone();
    cors.allow_origin(AllowOrigin::predicate(
        move |origin: &HeaderValue, _parts: &Parts| {
            origin
                .to_str()
                .map(|o| allowed.is_origin_allowed(o))
                .unwrap_or(false)
        },
    ))
    .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
    .allow_credentials(config.cors_allow_credentials)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_cors_layer_dev_and_production() {
        let dev = ApiConfig::default();
        let _ = build_cors_layer(&dev);

        let prod = ApiConfig {
            cors_origins: vec!["https://charts.example".to_string()],
            cors_allow_credentials: true,
            ..ApiConfig::default()
        };
        let _ = build_cors_layer(&prod);
    }
}
