//! Chartcache Storage - Result Store and Request Ledger
//!
//! Defines the persistence seams used by the deduplication coordinator.
//! The Postgres implementation lives in chartcache-api; this crate ships an
//! in-memory implementation for tests and single-process use.

pub mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chartcache_core::{
    CacheEntry, ChartPoint, ChartResult, EntryId, Fingerprint, LedgerEntry, NewCacheEntry,
    NewLedgerEntry, ResultStatus,
};

/// Result of trying to take the exclusive right to compute an entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller now owns the PENDING entry and must finalize it.
    Claimed(CacheEntry),
    /// Another caller got there first.
    Conflict,
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed(_))
    }
}

/// Persistent table of cache entries keyed by fingerprint.
///
/// Claims are atomic: of any number of concurrent `claim_pending` calls for
/// the same fingerprint, exactly one returns `Claimed`. Finalization is a
/// conditional update out of PENDING; when no row matches, implementations
/// return `StorageError::InvalidTransition`.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn lookup(&self, fingerprint: &Fingerprint) -> ChartResult<Option<CacheEntry>>;

    async fn claim_pending(&self, entry: NewCacheEntry) -> ChartResult<ClaimOutcome>;

    /// Move a FAILED entry back to PENDING, clearing its failure reason.
    async fn reclaim_failed(&self, fingerprint: &Fingerprint) -> ChartResult<ClaimOutcome>;

    async fn finalize_ready(
        &self,
        fingerprint: &Fingerprint,
        artifact_ref: &str,
        data_points: &[ChartPoint],
    ) -> ChartResult<CacheEntry>;

    async fn finalize_failed(
        &self,
        fingerprint: &Fingerprint,
        reason: &str,
    ) -> ChartResult<CacheEntry>;

    /// Most recently updated entries first.
    async fn list_entries(
        &self,
        status: Option<ResultStatus>,
        limit: usize,
    ) -> ChartResult<Vec<CacheEntry>>;
}

/// Append-only log of inbound requests.
#[async_trait]
pub trait RequestLedger: Send + Sync {
    async fn record(&self, entry: NewLedgerEntry) -> ChartResult<LedgerEntry>;

    /// Rows for one cache entry in insertion order.
    async fn list_for_entry(&self, cache_entry_id: EntryId) -> ChartResult<Vec<LedgerEntry>>;
}
