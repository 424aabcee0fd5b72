//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling using deadpool-postgres, plus the Postgres
//! implementations of `ResultStore` and `RequestLedger`.
//!
//! Claims rely on the unique constraint on `chart_results.cache_key`: the
//! insert either succeeds (the caller owns the PENDING row) or fails with a
//! unique violation (someone else does). Status changes are conditional
//! updates guarded on the current status.

use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use chartcache_core::{
    CacheEntry, ChartError, ChartKind, ChartPoint, ChartResult, Dimension, EntryId, Fingerprint,
    LedgerEntry, LedgerOutcome, NewCacheEntry, NewLedgerEntry, RenderError, ResultStatus,
    StorageError, Timestamp,
};
use chartcache_storage::{ClaimOutcome, RequestLedger, ResultStore};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolError, RecyclingMethod, Runtime};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

/// Name of the unique constraint that serializes claims.
const CACHE_KEY_CONSTRAINT: &str = "chart_results_cache_key_uniq";

const MIGRATION_SQL: &str = include_str!("../migrations/001_chart_cache.sql");

macro_rules! entry_columns {
    () => {
        "id, cache_key, chart_type, status, file_path, points_json, failure_reason, \
         params_json, create_by, create_at, update_at"
    };
}

macro_rules! ledger_columns {
    () => {
        "id, result_id, chart_type, params_json, outcome, cache_hit, create_at"
    };
}

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection checkout timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "chartcache".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("CHARTCACHE_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("CHARTCACHE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("CHARTCACHE_DB_NAME")
                .unwrap_or_else(|_| "chartcache".to_string()),
            user: std::env::var("CHARTCACHE_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("CHARTCACHE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("CHARTCACHE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("CHARTCACHE_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn pool_error(err: PoolError) -> ChartError {
    let reason = err.to_string();
    ChartError::Storage(match err {
        PoolError::Timeout(_) => StorageError::PoolExhausted { reason },
        _ => StorageError::Connection { reason },
    })
}

fn query_error(err: tokio_postgres::Error) -> ChartError {
    let reason = err.to_string();
    ChartError::Storage(if err.is_closed() {
        StorageError::Connection { reason }
    } else {
        StorageError::Query { reason }
    })
}

fn is_cache_key_conflict(err: &tokio_postgres::Error) -> bool {
    err.as_db_error().is_some_and(|db_err| {
        db_err.code() == &SqlState::UNIQUE_VIOLATION
            && db_err.constraint() == Some(CACHE_KEY_CONSTRAINT)
    })
}

fn corrupt_row(what: &str, detail: impl std::fmt::Display) -> ChartError {
    ChartError::Storage(StorageError::Serialization {
        reason: format!("Unreadable {}: {}", what, detail),
    })
}

// ============================================================================
// ROW DECODING
// ============================================================================

fn entry_from_row(row: &Row) -> ChartResult<CacheEntry> {
    let chart_type: String = row.try_get("chart_type").map_err(query_error)?;
    let status: String = row.try_get("status").map_err(query_error)?;
    let points: Option<JsonValue> = row.try_get("points_json").map_err(query_error)?;
    let data_points = points
        .map(serde_json::from_value::<Vec<ChartPoint>>)
        .transpose()
        .map_err(|e| corrupt_row("points_json", e))?;

    Ok(CacheEntry {
        id: row.try_get("id").map_err(query_error)?,
        fingerprint: Fingerprint::from_stored(row.try_get("cache_key").map_err(query_error)?),
        chart_type: chart_type
            .parse::<ChartKind>()
            .map_err(|e| corrupt_row("chart_type", e))?,
        status: ResultStatus::from_db_str(&status).map_err(|e| corrupt_row("status", e))?,
        artifact_ref: row.try_get("file_path").map_err(query_error)?,
        data_points,
        failure_reason: row.try_get("failure_reason").map_err(query_error)?,
        spec_snapshot: row.try_get("params_json").map_err(query_error)?,
        created_by: row.try_get("create_by").map_err(query_error)?,
        created_at: row.try_get::<_, Timestamp>("create_at").map_err(query_error)?,
        updated_at: row.try_get::<_, Timestamp>("update_at").map_err(query_error)?,
    })
}

fn ledger_from_row(row: &Row) -> ChartResult<LedgerEntry> {
    let chart_type: String = row.try_get("chart_type").map_err(query_error)?;
    let outcome: String = row.try_get("outcome").map_err(query_error)?;
    Ok(LedgerEntry {
        id: row.try_get("id").map_err(query_error)?,
        cache_entry_id: row.try_get("result_id").map_err(query_error)?,
        chart_type: chart_type
            .parse::<ChartKind>()
            .map_err(|e| corrupt_row("chart_type", e))?,
        params_json: row.try_get("params_json").map_err(query_error)?,
        outcome: LedgerOutcome::from_db_str(&outcome).map_err(|e| corrupt_row("outcome", e))?,
        cache_hit: row.try_get("cache_hit").map_err(query_error)?,
        created_at: row.try_get::<_, Timestamp>("create_at").map_err(query_error)?,
    })
}

// ============================================================================
// DATABASE CLIENT WRAPPER
// ============================================================================

/// Database client that wraps a connection pool.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
}

impl DbClient {
    /// Create a new database client with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new database client from configuration.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    async fn get_conn(&self) -> ChartResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_error)
    }

    /// Apply the cache schema. Idempotent.
    pub async fn migrate(&self) -> ApiResult<()> {
        let conn = self.pool.get().await?;
        conn.batch_execute(MIGRATION_SQL).await?;
        tracing::info!("Chart cache schema applied");
        Ok(())
    }

    /// Health check - verifies database connectivity.
    pub async fn health_check(&self) -> ApiResult<()> {
        let conn = self.pool.get().await?;
        conn.query_one("SELECT 1", &[]).await?;
        Ok(())
    }

    /// Whether the cache tables created by `migrate()` exist.
    pub async fn cache_tables_present(&self) -> ApiResult<bool> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                "SELECT to_regclass('chart_results') IS NOT NULL \
                    AND to_regclass('chart_requests') IS NOT NULL",
                &[],
            )
            .await?;
        Ok(row.get(0))
    }

    /// Number of cache entries per status. Statuses with no entries are omitted.
    pub async fn entry_status_counts(&self) -> ApiResult<Vec<(ResultStatus, i64)>> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT status, COUNT(*) FROM chart_results GROUP BY status ORDER BY status",
                &[],
            )
            .await?;
        rows.iter()
            .map(|r| {
                let status: String = r.get(0);
                let status = ResultStatus::from_db_str(&status)
                    .map_err(|e| ApiError::database_error(e.to_string()))?;
                Ok((status, r.get::<_, i64>(1)))
            })
            .collect()
    }

    /// Distinct non-null values of one `clean_data` dimension, sorted.
    pub async fn distinct_values(&self, dimension: Dimension) -> ApiResult<Vec<String>> {
        let conn = self.pool.get().await?;
        // Column names come from a closed enum.
        let sql = format!(
            "SELECT DISTINCT {col}::TEXT AS v FROM clean_data WHERE {col} IS NOT NULL ORDER BY 1",
            col = dimension.column()
        );
        let rows = conn.query(sql.as_str(), &[]).await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    /// Run an aggregation query on behalf of the renderer.
    pub(crate) async fn aggregate(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, RenderError> {
        let conn = self.pool.get().await.map_err(|e| RenderError::Query {
            reason: e.to_string(),
        })?;
        conn.query(sql, params).await.map_err(|e| RenderError::Query {
            reason: e.to_string(),
        })
    }

    async fn update_returning(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> ChartResult<Option<CacheEntry>> {
        let conn = self.get_conn().await?;
        let row = conn.query_opt(sql, params).await.map_err(query_error)?;
        row.as_ref().map(entry_from_row).transpose()
    }
}

fn invalid_transition(fingerprint: &Fingerprint, expected: ResultStatus) -> ChartError {
    ChartError::Storage(StorageError::InvalidTransition {
        fingerprint: fingerprint.to_string(),
        expected,
    })
}

#[async_trait]
impl ResultStore for DbClient {
    async fn lookup(&self, fingerprint: &Fingerprint) -> ChartResult<Option<CacheEntry>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                concat!("SELECT ", entry_columns!(), " FROM chart_results WHERE cache_key = $1"),
                &[&fingerprint.as_str()],
            )
            .await
            .map_err(query_error)?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn claim_pending(&self, entry: NewCacheEntry) -> ChartResult<ClaimOutcome> {
        let conn = self.get_conn().await?;
        let result = conn
            .query_one(
                concat!(
                    "INSERT INTO chart_results (cache_key, chart_type, status, params_json, create_by) ",
                    "VALUES ($1, $2, 'PENDING', $3, $4) RETURNING ",
                    entry_columns!()
                ),
                &[
                    &entry.fingerprint.as_str(),
                    &entry.chart_type.as_str(),
                    &entry.spec_snapshot,
                    &entry.created_by,
                ],
            )
            .await;

        match result {
            Ok(row) => Ok(ClaimOutcome::Claimed(entry_from_row(&row)?)),
            Err(e) if is_cache_key_conflict(&e) => {
                tracing::debug!(key = %entry.fingerprint, "Claim lost to concurrent insert");
                Ok(ClaimOutcome::Conflict)
            }
            Err(e) => Err(query_error(e)),
        }
    }

    async fn reclaim_failed(&self, fingerprint: &Fingerprint) -> ChartResult<ClaimOutcome> {
        let reclaimed = self
            .update_returning(
                concat!(
                    "UPDATE chart_results SET status = 'PENDING', failure_reason = NULL, ",
                    "update_at = now() WHERE cache_key = $1 AND status = 'FAILED' RETURNING ",
                    entry_columns!()
                ),
                &[&fingerprint.as_str()],
            )
            .await?;
        Ok(reclaimed.map_or(ClaimOutcome::Conflict, ClaimOutcome::Claimed))
    }

    async fn finalize_ready(
        &self,
        fingerprint: &Fingerprint,
        artifact_ref: &str,
        data_points: &[ChartPoint],
    ) -> ChartResult<CacheEntry> {
        let points = serde_json::to_value(data_points).map_err(StorageError::from)?;
        self.update_returning(
            concat!(
                "UPDATE chart_results SET status = 'READY', file_path = $2, points_json = $3, ",
                "update_at = now() WHERE cache_key = $1 AND status = 'PENDING' RETURNING ",
                entry_columns!()
            ),
            &[&fingerprint.as_str(), &artifact_ref, &points],
        )
        .await?
        .ok_or_else(|| invalid_transition(fingerprint, ResultStatus::Pending))
    }

    async fn finalize_failed(
        &self,
        fingerprint: &Fingerprint,
        reason: &str,
    ) -> ChartResult<CacheEntry> {
        self.update_returning(
            concat!(
                "UPDATE chart_results SET status = 'FAILED', failure_reason = $2, ",
                "update_at = now() WHERE cache_key = $1 AND status = 'PENDING' RETURNING ",
                entry_columns!()
            ),
            &[&fingerprint.as_str(), &reason],
        )
        .await?
        .ok_or_else(|| invalid_transition(fingerprint, ResultStatus::Pending))
    }

    async fn list_entries(
        &self,
        status: Option<ResultStatus>,
        limit: usize,
    ) -> ChartResult<Vec<CacheEntry>> {
        let conn = self.get_conn().await?;
        let status = status.map(|s| s.as_db_str());
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = conn
            .query(
                concat!(
                    "SELECT ",
                    entry_columns!(),
                    " FROM chart_results WHERE ($1::TEXT IS NULL OR status = $1) ",
                    "ORDER BY update_at DESC, id DESC LIMIT $2"
                ),
                &[&status, &limit],
            )
            .await
            .map_err(query_error)?;
        rows.iter().map(entry_from_row).collect()
    }
}

#[async_trait]
impl RequestLedger for DbClient {
    async fn record(&self, entry: NewLedgerEntry) -> ChartResult<LedgerEntry> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_one(
                concat!(
                    "INSERT INTO chart_requests (result_id, chart_type, params_json, outcome, cache_hit) ",
                    "VALUES ($1, $2, $3, $4, $5) RETURNING ",
                    ledger_columns!()
                ),
                &[
                    &entry.cache_entry_id,
                    &entry.chart_type.as_str(),
                    &entry.params_json,
                    &entry.outcome.as_db_str(),
                    &entry.outcome.is_cache_hit(),
                ],
            )
            .await
            .map_err(query_error)?;
        ledger_from_row(&row)
    }

    async fn list_for_entry(&self, cache_entry_id: EntryId) -> ChartResult<Vec<LedgerEntry>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                concat!(
                    "SELECT ",
                    ledger_columns!(),
                    " FROM chart_requests WHERE result_id = $1 ORDER BY id"
                ),
                &[&cache_entry_id],
            )
            .await
            .map_err(query_error)?;
        rows.iter().map(ledger_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartcache_core::{fingerprint, spec_snapshot};
    use chartcache_test_utils::fixtures;

    #[test]
    fn test_default_db_config() {
        let config = DbConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "chartcache");
        assert_eq!(config.max_size, 16);
    }

    #[test]
    fn test_migration_declares_claim_constraint() {
        assert!(MIGRATION_SQL.contains(CACHE_KEY_CONSTRAINT));
        assert!(MIGRATION_SQL.contains("ON DELETE CASCADE"));
    }

    #[test]
    fn test_closed_pool_maps_to_connection_error() {
        let err = pool_error(PoolError::Closed);
        assert!(matches!(err, ChartError::Storage(StorageError::Connection { .. })));
    }

    async fn db_test_client() -> Option<DbClient> {
        if std::env::var("DB_TESTS").ok().as_deref() != Some("1") {
            return None;
        }
        let db = DbClient::from_config(&DbConfig::from_env()).ok()?;
        db.migrate().await.ok()?;
        Some(db)
    }

    /// Fingerprint unique to this test run so reruns start from an empty row.
    fn unique_entry() -> NewCacheEntry {
        let mut spec = fixtures::bar_spec();
        spec.filters.industry = Some(format!(
            "db-test-{}",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        NewCacheEntry {
            fingerprint: fingerprint(&spec),
            chart_type: spec.chart_type,
            spec_snapshot: spec_snapshot(&spec),
            created_by: spec.create_by,
        }
    }

    #[tokio::test]
    async fn test_readiness_queries_db_backed() {
        let Some(db) = db_test_client().await else {
            return;
        };
        assert!(db.cache_tables_present().await.expect("tables"));
        let counts = db.entry_status_counts().await.expect("counts");
        assert!(counts.iter().all(|(_, n)| *n > 0));
    }

    #[tokio::test]
    async fn test_claim_lifecycle_db_backed() {
        let Some(db) = db_test_client().await else {
            return;
        };

        let new = unique_entry();
        let key = new.fingerprint.clone();

        let claimed = match db.claim_pending(new.clone()).await.expect("claim") {
            ClaimOutcome::Claimed(e) => e,
            ClaimOutcome::Conflict => panic!("fresh key conflicted"),
        };
        assert_eq!(claimed.status, ResultStatus::Pending);
        assert_eq!(
            db.claim_pending(new).await.expect("second claim"),
            ClaimOutcome::Conflict
        );

        let failed = db.finalize_failed(&key, "no data").await.expect("fail");
        assert_eq!(failed.failure_reason.as_deref(), Some("no data"));
        assert!(db.reclaim_failed(&key).await.expect("reclaim").is_claimed());
        assert_eq!(
            db.reclaim_failed(&key).await.expect("second reclaim"),
            ClaimOutcome::Conflict
        );

        let points = vec![ChartPoint::new("202401")];
        let ready = db
            .finalize_ready(&key, "/chart_storage/bar/x.json", &points)
            .await
            .expect("ready");
        assert_eq!(ready.data_points, Some(points));

        let row = db
            .record(NewLedgerEntry {
                cache_entry_id: ready.id,
                chart_type: ready.chart_type,
                params_json: serde_json::json!({"chart_type": "bar"}),
                outcome: LedgerOutcome::Miss,
            })
            .await
            .expect("ledger");
        assert!(!row.cache_hit);
        let rows = db.list_for_entry(ready.id).await.expect("list");
        assert_eq!(rows.len(), 1);

        let err = db.finalize_failed(&key, "late").await;
        assert!(matches!(
            err,
            Err(ChartError::Storage(StorageError::InvalidTransition { .. }))
        ));
    }
}
