//! Chart Request Routes
//!
//! `POST /api/request` resolves a chart through the dedup coordinator. The
//! other handlers expose an entry's state and its request ledger.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chartcache_core::{
    CacheEntry, ChartKind, ChartOut, ChartPoint, ChartRequestSpec, Fingerprint, LedgerEntry,
    ResultStatus, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::services::{DedupCoordinator, Resolution};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

// ============================================================================
// TYPES
// ============================================================================

/// Body of a 202 answer: another request is computing this chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct InProgressResponse {
    pub key: String,
    pub status: String,
}

impl InProgressResponse {
    pub fn new(key: &Fingerprint) -> Self {
        Self {
            key: key.to_string(),
            status: "in_progress".to_string(),
        }
    }
}

/// Public view of one cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EntryResponse {
    pub key: String,
    pub chart_type: ChartKind,
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<ChartPoint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_by: i64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl From<CacheEntry> for EntryResponse {
    fn from(entry: CacheEntry) -> Self {
        Self {
            key: entry.fingerprint.into_inner(),
            chart_type: entry.chart_type,
            status: entry.status,
            url: entry.artifact_ref,
            points: entry.data_points,
            failure_reason: entry.failure_reason,
            created_by: entry.created_by,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct ListEntriesQuery {
    /// PENDING, READY or FAILED
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ListEntriesResponse {
    pub entries: Vec<EntryResponse>,
    pub total: usize,
}

// ============================================================================
// SHARED STATE
// ============================================================================

#[derive(Clone)]
pub struct ChartState {
    pub dedup: DedupCoordinator,
}

impl ChartState {
    pub fn new(dedup: DedupCoordinator) -> Self {
        Self { dedup }
    }
}

fn parse_key(raw: &str) -> ApiResult<Fingerprint> {
    Fingerprint::parse(raw).ok_or_else(|| ApiError::invalid_format("key", "64 lowercase hex characters"))
}

async fn require_entry(state: &ChartState, key: &Fingerprint) -> ApiResult<CacheEntry> {
    state
        .dedup
        .entry(key)
        .await?
        .ok_or_else(|| ApiError::entry_not_found(key.short()))
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/request - Resolve a chart request
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/request",
    tag = "Charts",
    request_body = ChartRequestSpec,
    responses(
        (status = 201, description = "Chart served", body = ChartOut),
        (status = 202, description = "Chart is being computed by another request", body = InProgressResponse),
        (status = 400, description = "Malformed request body", body = ApiError),
        (status = 422, description = "Invalid chart parameters", body = ApiError),
        (status = 502, description = "Rendering failed", body = ApiError),
        (status = 503, description = "Storage unavailable", body = ApiError),
    ),
))]
pub async fn request_chart(
    State(state): State<Arc<ChartState>>,
    payload: Result<Json<ChartRequestSpec>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(spec) = payload.map_err(|rejection| ApiError::invalid_input(rejection.body_text()))?;

    match state.dedup.resolve(&spec).await? {
        Resolution::Served { out, .. } => Ok((StatusCode::CREATED, Json(out)).into_response()),
        Resolution::InProgress { key } => {
            Ok((StatusCode::ACCEPTED, Json(InProgressResponse::new(&key))).into_response())
        }
    }
}

/// GET /api/request/{key} - Get a cache entry
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/request/{key}",
    tag = "Charts",
    params(("key" = String, Path, description = "Cache key")),
    responses(
        (status = 200, description = "Cache entry", body = EntryResponse),
        (status = 400, description = "Malformed key", body = ApiError),
        (status = 404, description = "Unknown key", body = ApiError),
    ),
))]
pub async fn get_entry(
    State(state): State<Arc<ChartState>>,
    Path(key): Path<String>,
) -> ApiResult<Json<EntryResponse>> {
    let key = parse_key(&key)?;
    let entry = require_entry(&state, &key).await?;
    Ok(Json(entry.into()))
}

/// GET /api/request/{key}/ledger - Requests recorded against an entry
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/request/{key}/ledger",
    tag = "Charts",
    params(("key" = String, Path, description = "Cache key")),
    responses(
        (status = 200, description = "Ledger rows, oldest first", body = Vec<LedgerEntry>),
        (status = 400, description = "Malformed key", body = ApiError),
        (status = 404, description = "Unknown key", body = ApiError),
    ),
))]
pub async fn get_ledger(
    State(state): State<Arc<ChartState>>,
    Path(key): Path<String>,
) -> ApiResult<Json<Vec<LedgerEntry>>> {
    let key = parse_key(&key)?;
    let entry = require_entry(&state, &key).await?;
    let rows = state.dedup.provenance(&entry).await?;
    Ok(Json(rows))
}

/// GET /api/entries - Recently updated cache entries
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/entries",
    tag = "Charts",
    params(ListEntriesQuery),
    responses(
        (status = 200, description = "Entries, most recently updated first", body = ListEntriesResponse),
        (status = 400, description = "Unknown status filter", body = ApiError),
    ),
))]
pub async fn list_entries(
    State(state): State<Arc<ChartState>>,
    Query(params): Query<ListEntriesQuery>,
) -> ApiResult<Json<ListEntriesResponse>> {
    let status = params
        .status
        .as_deref()
        .map(ResultStatus::from_db_str)
        .transpose()
        .map_err(|_| ApiError::invalid_format("status", "one of PENDING, READY, FAILED"))?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let entries: Vec<EntryResponse> = state
        .dedup
        .recent_entries(status, limit)
        .await?
        .into_iter()
        .map(EntryResponse::from)
        .collect();
    let total = entries.len();

    Ok(Json(ListEntriesResponse { entries, total }))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Routes mounted under `/api`.
pub fn create_router(dedup: DedupCoordinator) -> Router {
    let state = Arc::new(ChartState::new(dedup));

    Router::new()
        .route("/request", post(request_chart))
        .route("/request/", post(request_chart))
        .route("/request/:key", get(get_entry))
        .route("/request/:key/ledger", get(get_ledger))
        .route("/entries", get(list_entries))
        .with_state(state)
}
