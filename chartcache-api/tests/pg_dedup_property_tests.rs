#![cfg(feature = "db-tests")]
//! Deduplication against Postgres.
//!
//! Requires a reachable database (`CHARTCACHE_DB_*`) and `DB_TESTS=1`.
//! The unique index on `cache_key` is the only thing standing between
//! concurrent requests and a second render.

use std::sync::Arc;
use std::time::Duration;

use chartcache_api::{ContentionPolicy, DbClient, DbConfig, DedupCoordinator, Resolution};
use chartcache_core::{ChartResult, LedgerOutcome, ResultStatus};
use chartcache_test_utils::{fixtures, CountingRenderer};

async fn test_db_client() -> Option<DbClient> {
    if std::env::var("DB_TESTS").ok().as_deref() != Some("1") {
        return None;
    }
    let db = DbClient::from_config(&DbConfig::from_env()).ok()?;
    db.migrate().await.ok()?;
    Some(db)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_concurrent_resolves_render_once() -> ChartResult<()> {
    let Some(db) = test_db_client().await else {
        return Ok(());
    };

    let renderer = CountingRenderer::with_delay(Duration::from_millis(100));
    let dedup = DedupCoordinator::new(
        Arc::new(db.clone()),
        Arc::new(db.clone()),
        Arc::new(renderer.clone()),
        ContentionPolicy {
            poll_interval: Duration::from_millis(10),
            max_wait: Duration::from_secs(10),
        },
    );

    let mut spec = fixtures::bar_spec();
    spec.filters.industry = Some(format!(
        "pg-dedup-{}",
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let dedup = dedup.clone();
            let spec = spec.clone();
            tokio::spawn(async move { dedup.resolve(&spec).await })
        })
        .collect();

    for task in tasks {
        let resolution = task.await.expect("task panicked")?;
        assert!(matches!(resolution, Resolution::Served { .. }));
    }
    assert_eq!(renderer.calls(), 1);

    let entry = dedup
        .entry(&chartcache_core::fingerprint(&spec))
        .await?
        .expect("entry exists");
    assert_eq!(entry.status, ResultStatus::Ready);

    let rows = dedup.provenance(&entry).await?;
    assert_eq!(rows.len(), 8);
    assert_eq!(
        rows.iter().filter(|r| r.outcome == LedgerOutcome::Miss).count(),
        1
    );
    Ok(())
}
