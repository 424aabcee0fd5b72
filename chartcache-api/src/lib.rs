//! Chartcache API - HTTP Layer
//!
//! Axum routes over the dedup coordinator, the Postgres-backed result store
//! and request ledger, the `clean_data` renderer, and observability.

pub mod config;
pub mod db;
pub mod error;
#[cfg(feature = "openapi")]
pub mod openapi;
pub mod renderer;
pub mod routes;
pub mod services;
pub mod telemetry;

// Re-export commonly used types
pub use config::ApiConfig;
pub use db::{DbClient, DbConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
#[cfg(feature = "openapi")]
pub use openapi::ApiDoc;
pub use renderer::PgChartRenderer;
pub use routes::{build_cors_layer, create_api_router};
pub use services::{ClaimGuard, ContentionPolicy, DedupCoordinator, Resolution, ResolveSource};
