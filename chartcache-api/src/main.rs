//! Chartcache API Server Entry Point
//!
//! Bootstraps configuration, applies the cache schema and starts the Axum
//! HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use chartcache_api::{
    create_api_router, ApiConfig, ApiError, ApiResult, DbClient, DbConfig, DedupCoordinator,
    PgChartRenderer,
};

use chartcache_api::telemetry::{init_tracer, TelemetryConfig};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracer(&telemetry_config)?;

    let db_config = DbConfig::from_env();
    let db = DbClient::from_config(&db_config)?;
    db.migrate().await?;

    let api_config = ApiConfig::from_env();
    let renderer = PgChartRenderer::new(db.clone(), api_config.chart_dir.clone());
    let dedup = DedupCoordinator::new(
        Arc::new(db.clone()),
        Arc::new(db.clone()),
        Arc::new(renderer),
        api_config.contention_policy(),
    );

    let app: Router = create_api_router(db, dedup, &api_config);

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, chart_dir = %api_config.chart_dir.display(), "Starting Chartcache API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("CHARTCACHE_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("CHARTCACHE_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
