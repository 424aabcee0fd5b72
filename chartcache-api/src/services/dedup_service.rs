//! Dedup Service
//!
//! Resolves a chart request to a served result, computing it at most once per
//! fingerprint. The store's uniqueness constraint is the only serialization
//! point; there is no in-process lock.

use chartcache_core::{
    fingerprint, spec_snapshot, CacheEntry, ChartError, ChartOut, ChartRenderer,
    ChartRequestSpec, ChartResult, Fingerprint, LedgerEntry, LedgerOutcome, NewCacheEntry,
    NewLedgerEntry, RenderError, RenderRequest, RenderedChart, ResultStatus, StorageError,
};
use chartcache_storage::{ClaimOutcome, RequestLedger, ResultStore};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::telemetry::METRICS;

/// Failure reason stored when a claim is released without finalizing.
pub const CLAIM_ABANDONED: &str = "claim abandoned";

/// Lookups after a lost claim race before giving up. A lost race means the
/// row exists, so one re-lookup normally suffices.
const MAX_CLAIM_ATTEMPTS: usize = 3;

// ============================================================================
// TYPES
// ============================================================================

/// How long a request that lost the claim waits for the winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentionPolicy {
    pub poll_interval: Duration,
    /// Zero means answer "in progress" without polling.
    pub max_wait: Duration,
}

impl Default for ContentionPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_wait: Duration::from_secs(5),
        }
    }
}

impl ContentionPolicy {
    pub fn immediate() -> Self {
        Self {
            max_wait: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Whether a served result was computed by this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveSource {
    Hit,
    Miss,
}

/// Outcome of [`DedupCoordinator::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Served { out: ChartOut, source: ResolveSource },
    /// Another request holds the claim and did not finish within the wait.
    InProgress { key: Fingerprint },
}

impl Resolution {
    pub fn key(&self) -> &str {
        match self {
            Resolution::Served { out, .. } => &out.key,
            Resolution::InProgress { key } => key.as_str(),
        }
    }
}

// ============================================================================
// CLAIM GUARD
// ============================================================================

/// Exclusive right to compute one PENDING entry.
///
/// Consumed by [`ClaimGuard::complete`] or [`ClaimGuard::fail`]. Dropping it
/// armed (panic in the renderer, cancelled request future) spawns a task that
/// moves the entry to FAILED, so a later request can re-claim it.
pub struct ClaimGuard {
    store: Arc<dyn ResultStore>,
    entry: CacheEntry,
    armed: bool,
}

impl ClaimGuard {
    pub fn new(store: Arc<dyn ResultStore>, entry: CacheEntry) -> Self {
        Self {
            store,
            entry,
            armed: true,
        }
    }

    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    /// Finalize as READY. The guard stays armed if the store rejects the
    /// update, so the entry still ends FAILED.
    pub async fn complete(mut self, rendered: &RenderedChart) -> ChartResult<CacheEntry> {
        let entry = self
            .store
            .finalize_ready(&self.entry.fingerprint, &rendered.artifact_ref, &rendered.points)
            .await?;
        self.armed = false;
        Ok(entry)
    }

    /// Finalize as FAILED with `reason`.
    pub async fn fail(mut self, reason: &str) -> ChartResult<CacheEntry> {
        let entry = self
            .store
            .finalize_failed(&self.entry.fingerprint, reason)
            .await?;
        self.armed = false;
        Ok(entry)
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let key = self.entry.fingerprint.clone();
        let kind = self.entry.chart_type;
        let store = Arc::clone(&self.store);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match store.finalize_failed(&key, CLAIM_ABANDONED).await {
                        Ok(_) => {
                            warn!(key = %key.short(), kind = %kind, "Abandoned claim marked FAILED");
                            if let Ok(m) = METRICS.as_ref() {
                                m.record_abandoned_render(kind.as_str());
                            }
                        }
                        // Already finalized by the time the task ran.
                        Err(e) => debug!(key = %key.short(), error = %e, "Abandoned claim not released"),
                    }
                });
            }
            Err(_) => {
                tracing::error!(key = %key.short(), "Claim dropped outside a runtime; entry left PENDING");
            }
        }
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Resolves chart requests against the result store.
#[derive(Clone)]
pub struct DedupCoordinator {
    store: Arc<dyn ResultStore>,
    ledger: Arc<dyn RequestLedger>,
    renderer: Arc<dyn ChartRenderer>,
    policy: ContentionPolicy,
}

/// Per-resolve context shared by the ledger writes.
struct RequestContext<'a> {
    spec: &'a ChartRequestSpec,
    key: Fingerprint,
    params_json: JsonValue,
}

impl DedupCoordinator {
    pub fn new(
        store: Arc<dyn ResultStore>,
        ledger: Arc<dyn RequestLedger>,
        renderer: Arc<dyn ChartRenderer>,
        policy: ContentionPolicy,
    ) -> Self {
        Self {
            store,
            ledger,
            renderer,
            policy,
        }
    }

    pub fn policy(&self) -> ContentionPolicy {
        self.policy
    }

    pub fn with_policy(mut self, policy: ContentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current state of an entry, if any.
    pub async fn entry(&self, key: &Fingerprint) -> ChartResult<Option<CacheEntry>> {
        self.store.lookup(key).await
    }

    /// Ledger rows for an entry, oldest first.
    pub async fn provenance(&self, entry: &CacheEntry) -> ChartResult<Vec<LedgerEntry>> {
        self.ledger.list_for_entry(entry.id).await
    }

    /// Most recently updated entries, optionally filtered by status.
    pub async fn recent_entries(
        &self,
        status: Option<ResultStatus>,
        limit: usize,
    ) -> ChartResult<Vec<CacheEntry>> {
        self.store.list_entries(status, limit).await
    }

    /// Serve `spec`, rendering only if no other request has claimed it.
    ///
    /// Every call that gets past validation appends exactly one ledger row.
    pub async fn resolve(&self, spec: &ChartRequestSpec) -> ChartResult<Resolution> {
        spec.validate()?;

        let ctx = RequestContext {
            spec,
            key: fingerprint(spec),
            params_json: serde_json::to_value(spec).map_err(StorageError::from)?,
        };

        let span = info_span!(
            "resolve",
            key = %ctx.key.short(),
            kind = %spec.chart_type,
        );
        self.resolve_key(&ctx).instrument(span).await
    }

    async fn resolve_key(&self, ctx: &RequestContext<'_>) -> ChartResult<Resolution> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let claim = match self.store.lookup(&ctx.key).await? {
                Some(entry) => match entry.status {
                    ResultStatus::Ready => return self.serve_hit(ctx, entry).await,
                    ResultStatus::Pending => return self.await_winner(ctx, entry).await,
                    ResultStatus::Failed => {
                        debug!("Re-claiming failed entry");
                        self.store.reclaim_failed(&ctx.key).await?
                    }
                },
                None => {
                    let new = NewCacheEntry {
                        fingerprint: ctx.key.clone(),
                        chart_type: ctx.spec.chart_type,
                        spec_snapshot: spec_snapshot(ctx.spec),
                        created_by: ctx.spec.create_by,
                    };
                    self.store.claim_pending(new).await?
                }
            };

            match claim {
                ClaimOutcome::Claimed(entry) => return self.compute(ctx, entry).await,
                ClaimOutcome::Conflict => debug!("Lost claim race, re-reading entry"),
            }
        }

        Err(StorageError::NotFound {
            fingerprint: ctx.key.to_string(),
        }
        .into())
    }

    async fn compute(&self, ctx: &RequestContext<'_>, entry: CacheEntry) -> ChartResult<Resolution> {
        let guard = ClaimGuard::new(Arc::clone(&self.store), entry);
        let request = RenderRequest::from_spec(ctx.spec, ctx.key.clone());
        let kind = ctx.spec.chart_type;

        let started = Instant::now();
        let rendered = self.renderer.render(&request).await;
        let elapsed = started.elapsed().as_secs_f64();

        if let Ok(m) = METRICS.as_ref() {
            m.record_render(kind.as_str(), rendered.is_ok(), elapsed);
        }

        match rendered {
            Ok(rendered) => {
                let entry = guard.complete(&rendered).await?;
                self.record(ctx, &entry, LedgerOutcome::Miss).await?;
                info!(artifact = %rendered.artifact_ref, points = rendered.points.len(), "Chart rendered");

                let out = ChartOut::from_entry(&entry).unwrap_or(ChartOut {
                    key: ctx.key.to_string(),
                    url: rendered.artifact_ref,
                    points: rendered.points,
                });
                Ok(Resolution::Served {
                    out,
                    source: ResolveSource::Miss,
                })
            }
            Err(err) => {
                warn!(error = %err, "Render failed");
                let entry = guard.fail(&err.to_string()).await?;
                self.record(ctx, &entry, LedgerOutcome::Failed).await?;
                Err(err.into())
            }
        }
    }

    async fn await_winner(
        &self,
        ctx: &RequestContext<'_>,
        mut entry: CacheEntry,
    ) -> ChartResult<Resolution> {
        let deadline = Instant::now() + self.policy.max_wait;

        loop {
            match entry.status {
                ResultStatus::Ready => return self.serve_hit(ctx, entry).await,
                ResultStatus::Failed => {
                    let reason = entry
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "render failed".to_string());
                    self.record(ctx, &entry, LedgerOutcome::Failed).await?;
                    return Err(ChartError::Render(RenderError::ConcurrentFailure { reason }));
                }
                ResultStatus::Pending => {}
            }

            let now = Instant::now();
            if now >= deadline {
                self.record(ctx, &entry, LedgerOutcome::InProgress).await?;
                debug!("Claim still held, answering in progress");
                return Ok(Resolution::InProgress {
                    key: ctx.key.clone(),
                });
            }

            tokio::time::sleep(self.policy.poll_interval.min(deadline - now)).await;

            entry = self
                .store
                .lookup(&ctx.key)
                .await?
                .ok_or_else(|| StorageError::NotFound {
                    fingerprint: ctx.key.to_string(),
                })?;
        }
    }

    async fn serve_hit(&self, ctx: &RequestContext<'_>, entry: CacheEntry) -> ChartResult<Resolution> {
        let out = ChartOut::from_entry(&entry).ok_or_else(|| StorageError::InvalidTransition {
            fingerprint: ctx.key.to_string(),
            expected: ResultStatus::Ready,
        })?;
        self.record(ctx, &entry, LedgerOutcome::Hit).await?;
        debug!("Served from cache");
        Ok(Resolution::Served {
            out,
            source: ResolveSource::Hit,
        })
    }

    async fn record(
        &self,
        ctx: &RequestContext<'_>,
        entry: &CacheEntry,
        outcome: LedgerOutcome,
    ) -> ChartResult<()> {
        self.ledger
            .record(NewLedgerEntry {
                cache_entry_id: entry.id,
                chart_type: ctx.spec.chart_type,
                params_json: ctx.params_json.clone(),
                outcome,
            })
            .await?;
        if let Ok(m) = METRICS.as_ref() {
            m.record_resolution(outcome);
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chartcache_core::ValidationCode;
    use chartcache_test_utils::{fixtures, CountingRenderer, InMemoryStore, StallingRenderer};

    fn coordinator(
        store: &InMemoryStore,
        renderer: Arc<dyn ChartRenderer>,
        policy: ContentionPolicy,
    ) -> DedupCoordinator {
        DedupCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            renderer,
            policy,
        )
    }

    #[tokio::test]
    async fn test_invalid_spec_touches_nothing() -> ChartResult<()> {
        let store = InMemoryStore::new();
        let renderer = CountingRenderer::new();
        let dedup = coordinator(&store, Arc::new(renderer.clone()), ContentionPolicy::default());

        let mut spec = fixtures::pie_spec();
        spec.params_json.y_axis = Some(chartcache_core::Dimension::Industry);

        match dedup.resolve(&spec).await {
            Err(ChartError::Validation(v)) => assert_eq!(v.code, ValidationCode::PieForbidsYAxis),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(store.entry_count()?, 0);
        assert!(store.ledger_rows()?.is_empty());
        assert_eq!(renderer.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_miss_then_hit() -> ChartResult<()> {
        let store = InMemoryStore::new();
        let renderer = CountingRenderer::new();
        let dedup = coordinator(&store, Arc::new(renderer.clone()), ContentionPolicy::default());

        let first = dedup.resolve(&fixtures::bar_spec()).await?;
        let second = dedup.resolve(&fixtures::bar_spec_restyled()).await?;

        match (&first, &second) {
            (
                Resolution::Served { out: a, source: ResolveSource::Miss },
                Resolution::Served { out: b, source: ResolveSource::Hit },
            ) => assert_eq!(a, b),
            other => panic!("unexpected resolutions {:?}", other),
        }
        assert_eq!(renderer.calls(), 1);

        let outcomes: Vec<_> = store.ledger_rows()?.iter().map(|r| r.outcome).collect();
        assert_eq!(outcomes, vec![LedgerOutcome::Miss, LedgerOutcome::Hit]);
        Ok(())
    }

    #[tokio::test]
    async fn test_pending_with_zero_wait_is_in_progress() -> ChartResult<()> {
        let store = InMemoryStore::new();
        let spec = fixtures::line_spec();
        store
            .claim_pending(NewCacheEntry {
                fingerprint: fingerprint(&spec),
                chart_type: spec.chart_type,
                spec_snapshot: spec_snapshot(&spec),
                created_by: 7,
            })
            .await?;

        let renderer = CountingRenderer::new();
        let dedup = coordinator(&store, Arc::new(renderer.clone()), ContentionPolicy::immediate());

        let resolution = dedup.resolve(&spec).await?;
        assert_eq!(
            resolution,
            Resolution::InProgress {
                key: fingerprint(&spec)
            }
        );
        assert_eq!(renderer.calls(), 0);

        let rows = store.ledger_rows()?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome, LedgerOutcome::InProgress);
        assert!(!rows[0].cache_hit);
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_guard_marks_failed() -> ChartResult<()> {
        let store = InMemoryStore::new();
        let spec = fixtures::bar_spec();
        let key = fingerprint(&spec);
        let entry = match store
            .claim_pending(NewCacheEntry {
                fingerprint: key.clone(),
                chart_type: spec.chart_type,
                spec_snapshot: spec_snapshot(&spec),
                created_by: 1,
            })
            .await?
        {
            ClaimOutcome::Claimed(entry) => entry,
            ClaimOutcome::Conflict => panic!("fresh store must grant the claim"),
        };

        drop(ClaimGuard::new(Arc::new(store.clone()), entry));

        let mut status = ResultStatus::Pending;
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if let Some(e) = store.lookup(&key).await? {
                status = e.status;
                if status == ResultStatus::Failed {
                    assert_eq!(e.failure_reason.as_deref(), Some(CLAIM_ABANDONED));
                    break;
                }
            }
        }
        assert_eq!(status, ResultStatus::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_resolve_releases_claim() -> ChartResult<()> {
        let store = InMemoryStore::new();
        let renderer = StallingRenderer::new();
        let dedup = coordinator(&store, Arc::new(renderer.clone()), ContentionPolicy::immediate());

        let spec = fixtures::heatmap_spec();
        let key = fingerprint(&spec);
        let task = {
            let dedup = dedup.clone();
            let spec = spec.clone();
            tokio::spawn(async move { dedup.resolve(&spec).await })
        };

        renderer.started().await;
        task.abort();
        let _ = task.await;

        let mut status = ResultStatus::Pending;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if let Some(e) = store.lookup(&key).await? {
                status = e.status;
                if status == ResultStatus::Failed {
                    break;
                }
            }
        }
        assert_eq!(status, ResultStatus::Failed);
        Ok(())
    }

    /// Delegates to the in-memory store but refuses every READY transition.
    struct ReadyRejectingStore(InMemoryStore);

    #[async_trait::async_trait]
    impl ResultStore for ReadyRejectingStore {
        async fn lookup(&self, fingerprint: &Fingerprint) -> ChartResult<Option<CacheEntry>> {
            self.0.lookup(fingerprint).await
        }

        async fn claim_pending(&self, entry: NewCacheEntry) -> ChartResult<ClaimOutcome> {
            self.0.claim_pending(entry).await
        }

        async fn reclaim_failed(&self, fingerprint: &Fingerprint) -> ChartResult<ClaimOutcome> {
            self.0.reclaim_failed(fingerprint).await
        }

        async fn finalize_ready(
            &self,
            _fingerprint: &Fingerprint,
            _artifact_ref: &str,
            _data_points: &[chartcache_core::ChartPoint],
        ) -> ChartResult<CacheEntry> {
            Err(StorageError::Query {
                reason: "connection reset".to_string(),
            }
            .into())
        }

        async fn finalize_failed(
            &self,
            fingerprint: &Fingerprint,
            reason: &str,
        ) -> ChartResult<CacheEntry> {
            self.0.finalize_failed(fingerprint, reason).await
        }

        async fn list_entries(
            &self,
            status: Option<ResultStatus>,
            limit: usize,
        ) -> ChartResult<Vec<CacheEntry>> {
            self.0.list_entries(status, limit).await
        }
    }

    #[tokio::test]
    async fn test_rejected_completion_leaves_entry_failed() -> ChartResult<()> {
        let store = InMemoryStore::new();
        let renderer = CountingRenderer::new();
        let dedup = DedupCoordinator::new(
            Arc::new(ReadyRejectingStore(store.clone())),
            Arc::new(store.clone()),
            Arc::new(renderer.clone()),
            ContentionPolicy::immediate(),
        );

        let spec = fixtures::bar_spec();
        let key = fingerprint(&spec);
        match dedup.resolve(&spec).await {
            Err(ChartError::Storage(StorageError::Query { .. })) => {}
            other => panic!("expected storage error, got {:?}", other),
        }
        assert_eq!(renderer.calls(), 1);

        let mut entry = None;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            entry = store.lookup(&key).await?;
            if entry.as_ref().map(|e| e.status) == Some(ResultStatus::Failed) {
                break;
            }
        }
        let entry = entry.expect("entry missing");
        assert_eq!(entry.status, ResultStatus::Failed);
        assert_eq!(entry.failure_reason.as_deref(), Some(CLAIM_ABANDONED));

        // The next request re-claims and hits the same rejection.
        assert!(dedup.resolve(&spec).await.is_err());
        assert_eq!(renderer.calls(), 2);
        Ok(())
    }

    #[test]
    fn test_contention_policy_defaults() {
        let policy = ContentionPolicy::default();
        assert_eq!(policy.poll_interval, Duration::from_millis(100));
        assert_eq!(policy.max_wait, Duration::from_secs(5));
        assert_eq!(ContentionPolicy::immediate().max_wait, Duration::ZERO);
    }
}
