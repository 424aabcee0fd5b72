//! Health endpoints.
//!
//! `/health/live` answers while the process runs. `/health/ready` reports
//! ready only when a chart request can be served end to end: Postgres answers,
//! the cache tables exist and the artifact directory accepts writes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chartcache_core::ResultStatus;
use serde::{Deserialize, Serialize};

use crate::db::DbClient;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Outcome of one readiness check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CheckResult {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn from_outcome(name: &str, started: Instant, outcome: Result<(), String>) -> Self {
        match outcome {
            Ok(()) => Self {
                name: name.to_string(),
                status: HealthStatus::Healthy,
                latency_ms: Some(started.elapsed().as_millis() as u64),
                error: None,
            },
            Err(error) => Self {
                name: name.to_string(),
                status: HealthStatus::Unhealthy,
                latency_ms: None,
                error: Some(error),
            },
        }
    }
}

/// Cache entries per lifecycle status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EntryCounts {
    pub pending: i64,
    pub ready: i64,
    pub failed: i64,
}

impl EntryCounts {
    pub fn from_rows(rows: &[(ResultStatus, i64)]) -> Self {
        rows.iter().fold(Self::default(), |mut acc, (status, n)| {
            match status {
                ResultStatus::Pending => acc.pending += n,
                ResultStatus::Ready => acc.ready += n,
                ResultStatus::Failed => acc.failed += n,
            }
            acc
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ReadinessReport {
    pub status: HealthStatus,
    pub checks: Vec<CheckResult>,
    /// Present once the cache tables are reachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<EntryCounts>,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LivenessReport {
    pub status: HealthStatus,
    pub uptime_seconds: u64,
}

// ============================================================================
// STATE
// ============================================================================

pub struct HealthState {
    pub db: DbClient,
    pub chart_dir: PathBuf,
    pub start_time: Instant,
}

// ============================================================================
// CHECKS
// ============================================================================

async fn check_database(db: &DbClient) -> Result<(), String> {
    db.health_check().await.map_err(|e| e.message)
}

async fn check_schema(db: &DbClient) -> Result<(), String> {
    match db.cache_tables_present().await {
        Ok(true) => Ok(()),
        Ok(false) => Err("cache tables missing, migration has not run".to_string()),
        Err(e) => Err(e.message),
    }
}

/// Create the artifact directory if needed and prove it accepts writes.
pub async fn check_artifact_dir(dir: &Path) -> Result<(), String> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| format!("{}: {}", dir.display(), e))?;
    let marker = dir.join(".ready");
    tokio::fs::write(&marker, b"ok")
        .await
        .map_err(|e| format!("{}: {}", marker.display(), e))?;
    // A leftover marker is harmless.
    let _ = tokio::fs::remove_file(&marker).await;
    Ok(())
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/ping",
    tag = "Health",
    responses((status = 200, description = "pong", body = String)),
))]
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses((status = 200, description = "Process is alive", body = LivenessReport)),
))]
pub async fn liveness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    Json(LivenessReport {
        status: HealthStatus::Healthy,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// GET /health/ready
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Chart requests can be served", body = ReadinessReport),
        (status = 503, description = "A dependency is unavailable", body = ReadinessReport),
    ),
))]
pub async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let report = readiness_report(&state).await;
    let code = match report.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(report))
}

pub async fn readiness_report(state: &HealthState) -> ReadinessReport {
    let mut checks = Vec::with_capacity(3);

    let started = Instant::now();
    let database = check_database(&state.db).await;
    let db_up = database.is_ok();
    checks.push(CheckResult::from_outcome("database", started, database));

    let mut entries = None;
    if db_up {
        let started = Instant::now();
        let schema = check_schema(&state.db).await;
        if schema.is_ok() {
            match state.db.entry_status_counts().await {
                Ok(rows) => entries = Some(EntryCounts::from_rows(&rows)),
                Err(e) => tracing::warn!(error = %e.message, "entry count query failed"),
            }
        }
        checks.push(CheckResult::from_outcome("schema", started, schema));
    }

    let started = Instant::now();
    let storage = check_artifact_dir(&state.chart_dir).await;
    checks.push(CheckResult::from_outcome("chart_storage", started, storage));

    let status = if db_up && checks.iter().all(|c| c.status == HealthStatus::Healthy) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };
    if status == HealthStatus::Unhealthy {
        tracing::warn!(
            failing = ?checks
                .iter()
                .filter(|c| c.status == HealthStatus::Unhealthy)
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>(),
            "readiness check failed"
        );
    }

    ReadinessReport {
        status,
        checks,
        entries,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    }
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(db: DbClient, chart_dir: PathBuf) -> Router {
    let state = Arc::new(HealthState {
        db,
        chart_dir,
        start_time: Instant::now(),
    });

    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
        .with_state(state)
}
