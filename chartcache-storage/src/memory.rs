//! In-memory result store and ledger.

use crate::{ClaimOutcome, RequestLedger, ResultStore};
use async_trait::async_trait;
use chartcache_core::{
    CacheEntry, ChartError, ChartPoint, ChartResult, EntryId, Fingerprint, LedgerEntry,
    NewCacheEntry, NewLedgerEntry, ResultStatus, StorageError,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tables {
    entries: HashMap<Fingerprint, CacheEntry>,
    ledger: Vec<LedgerEntry>,
    next_entry_id: EntryId,
    next_ledger_id: EntryId,
}

/// Store and ledger backed by one lock-protected table set.
///
/// Every claim checks and inserts under the same write guard, which gives the
/// same single-winner guarantee as a unique index.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> ChartResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| ChartError::Storage(StorageError::LockPoisoned))
    }

    fn write(&self) -> ChartResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| ChartError::Storage(StorageError::LockPoisoned))
    }

    /// Number of cache entries.
    pub fn entry_count(&self) -> ChartResult<usize> {
        Ok(self.read()?.entries.len())
    }

    /// Every ledger row, oldest first.
    pub fn ledger_rows(&self) -> ChartResult<Vec<LedgerEntry>> {
        Ok(self.read()?.ledger.clone())
    }

    /// Apply a guarded status change to one entry.
    fn transition<F>(
        &self,
        fingerprint: &Fingerprint,
        from: ResultStatus,
        apply: F,
    ) -> ChartResult<Option<CacheEntry>>
    where
        F: FnOnce(&mut CacheEntry),
    {
        let mut tables = self.write()?;
        match tables.entries.get_mut(fingerprint) {
            Some(entry) if entry.status == from => {
                apply(entry);
                entry.updated_at = Utc::now();
                Ok(Some(entry.clone()))
            }
            _ => Ok(None),
        }
    }
}

fn invalid_transition(fingerprint: &Fingerprint, expected: ResultStatus) -> ChartError {
    ChartError::Storage(StorageError::InvalidTransition {
        fingerprint: fingerprint.to_string(),
        expected,
    })
}

#[async_trait]
impl ResultStore for InMemoryStore {
    async fn lookup(&self, fingerprint: &Fingerprint) -> ChartResult<Option<CacheEntry>> {
        Ok(self.read()?.entries.get(fingerprint).cloned())
    }

    async fn claim_pending(&self, new: NewCacheEntry) -> ChartResult<ClaimOutcome> {
        let mut tables = self.write()?;
        if tables.entries.contains_key(&new.fingerprint) {
            return Ok(ClaimOutcome::Conflict);
        }
        tables.next_entry_id += 1;
        let now = Utc::now();
        let entry = CacheEntry {
            id: tables.next_entry_id,
            fingerprint: new.fingerprint.clone(),
            chart_type: new.chart_type,
            status: ResultStatus::Pending,
            artifact_ref: None,
            data_points: None,
            failure_reason: None,
            spec_snapshot: new.spec_snapshot,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        };
        tables.entries.insert(new.fingerprint, entry.clone());
        Ok(ClaimOutcome::Claimed(entry))
    }

    async fn reclaim_failed(&self, fingerprint: &Fingerprint) -> ChartResult<ClaimOutcome> {
        let reclaimed = self.transition(fingerprint, ResultStatus::Failed, |e| {
            e.status = ResultStatus::Pending;
            e.failure_reason = None;
        })?;
        Ok(reclaimed.map_or(ClaimOutcome::Conflict, ClaimOutcome::Claimed))
    }

    async fn finalize_ready(
        &self,
        fingerprint: &Fingerprint,
        artifact_ref: &str,
        data_points: &[ChartPoint],
    ) -> ChartResult<CacheEntry> {
        self.transition(fingerprint, ResultStatus::Pending, |e| {
            e.status = ResultStatus::Ready;
            e.artifact_ref = Some(artifact_ref.to_string());
            e.data_points = Some(data_points.to_vec());
        })?
        .ok_or_else(|| invalid_transition(fingerprint, ResultStatus::Pending))
    }

    async fn finalize_failed(
        &self,
        fingerprint: &Fingerprint,
        reason: &str,
    ) -> ChartResult<CacheEntry> {
        self.transition(fingerprint, ResultStatus::Pending, |e| {
            e.status = ResultStatus::Failed;
            e.failure_reason = Some(reason.to_string());
        })?
        .ok_or_else(|| invalid_transition(fingerprint, ResultStatus::Pending))
    }

    async fn list_entries(
        &self,
        status: Option<ResultStatus>,
        limit: usize,
    ) -> ChartResult<Vec<CacheEntry>> {
        let tables = self.read()?;
        let mut entries: Vec<CacheEntry> = tables
            .entries
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        entries.truncate(limit);
        Ok(entries)
    }
}

#[async_trait]
impl RequestLedger for InMemoryStore {
    async fn record(&self, new: NewLedgerEntry) -> ChartResult<LedgerEntry> {
        let mut tables = self.write()?;
        if !tables.entries.values().any(|e| e.id == new.cache_entry_id) {
            return Err(ChartError::Storage(StorageError::Query {
                reason: format!("cache entry {} does not exist", new.cache_entry_id),
            }));
        }
        tables.next_ledger_id += 1;
        let row = LedgerEntry {
            id: tables.next_ledger_id,
            cache_entry_id: new.cache_entry_id,
            chart_type: new.chart_type,
            params_json: new.params_json,
            cache_hit: new.outcome.is_cache_hit(),
            outcome: new.outcome,
            created_at: Utc::now(),
        };
        tables.ledger.push(row.clone());
        tracing::trace!(entry_id = row.cache_entry_id, outcome = %row.outcome, "Ledger row appended");
        Ok(row)
    }

    async fn list_for_entry(&self, cache_entry_id: EntryId) -> ChartResult<Vec<LedgerEntry>> {
        Ok(self
            .read()?
            .ledger
            .iter()
            .filter(|r| r.cache_entry_id == cache_entry_id)
            .cloned()
            .collect())
    }
}
