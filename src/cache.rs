use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{BillingError, Result};
use crate::money::Money;
use crate::store::BillingStore;
use crate::types::{AccountId, AccountScope, BillStatus, PeriodKey};

/// summary row for one billing period inside the cached document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub key: PeriodKey,
    pub status: BillStatus,
    pub base_charge: Money,
    pub penalty_amount: Money,
    pub paid_amount: Money,
    pub outstanding: Money,
}

/// per-account rollup inside the cached document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub total_billed: Money,
    pub total_penalty: Money,
    pub total_paid: Money,
    pub total_outstanding: Money,
    pub credit_balance: Money,
    pub periods: Vec<PeriodSummary>,
}

impl AccountSummary {
    /// derive a summary row from the account's source documents. the full
    /// rebuild and the surgical update both come through here, so the fast
    /// path and the slow path cannot disagree.
    pub fn derive(store: &BillingStore, account_id: &AccountId) -> Result<Self> {
        let mut summary = AccountSummary {
            total_billed: Money::ZERO,
            total_penalty: Money::ZERO,
            total_paid: Money::ZERO,
            total_outstanding: Money::ZERO,
            credit_balance: store.credit(account_id)?.balance(),
            periods: Vec::new(),
        };
        for period in store.periods(account_id)? {
            summary.total_billed += period.base_charge;
            summary.total_penalty += period.penalty_amount;
            summary.total_paid += period.paid_amount;
            summary.total_outstanding += period.outstanding();
            summary.periods.push(PeriodSummary {
                key: period.key,
                status: period.status(),
                base_charge: period.base_charge,
                penalty_amount: period.penalty_amount,
                paid_amount: period.paid_amount,
                outstanding: period.outstanding(),
            });
        }
        Ok(summary)
    }
}

/// account-independent totals over the whole document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct YearTotals {
    pub total_billed: Money,
    pub total_penalty: Money,
    pub total_paid: Money,
    pub total_outstanding: Money,
    pub total_credit: Money,
}

impl YearTotals {
    pub fn from_rows(rows: &BTreeMap<AccountId, AccountSummary>) -> Self {
        let mut totals = YearTotals::default();
        for row in rows.values() {
            totals.total_billed += row.total_billed;
            totals.total_penalty += row.total_penalty;
            totals.total_paid += row.total_paid;
            totals.total_outstanding += row.total_outstanding;
            totals.total_credit += row.credit_balance;
        }
        totals
    }
}

/// the derived read-model. consumers treat the version token as the sole
/// staleness signal: a mismatch means refetch, never patch locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedReadModel {
    /// monotonic version token
    pub version: u64,
    pub generated_at: DateTime<Utc>,
    pub accounts: BTreeMap<AccountId, AccountSummary>,
    pub totals: YearTotals,
}

/// persistence seam for the single shared cached document. writes are
/// compare-and-swap on the version token so a full rebuild and a concurrent
/// surgical update cannot clobber each other.
pub trait CacheStore {
    fn load(&self) -> Result<Option<CachedReadModel>>;

    /// `expected` is the version the writer read (None for an empty store).
    /// a mismatch fails with `StaleCache` and must not overwrite.
    fn store(&mut self, model: CachedReadModel, expected: Option<u64>) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryCacheStore {
    document: Option<CachedReadModel>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for InMemoryCacheStore {
    fn load(&self) -> Result<Option<CachedReadModel>> {
        Ok(self.document.clone())
    }

    fn store(&mut self, model: CachedReadModel, expected: Option<u64>) -> Result<()> {
        let found = self.document.as_ref().map(|d| d.version);
        if found != expected {
            return Err(BillingError::StaleCache {
                expected: expected.unwrap_or(0),
                found: found.unwrap_or(0),
            });
        }
        self.document = Some(model);
        Ok(())
    }
}

/// resumable state of a chunked full rebuild, so a timeout mid-rebuild does
/// not require restarting from zero
#[derive(Debug, Clone)]
pub struct RebuildCheckpoint {
    pending: Vec<AccountId>,
    rows: BTreeMap<AccountId, AccountSummary>,
}

impl RebuildCheckpoint {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn accounts_remaining(&self) -> usize {
        self.pending.len()
    }
}

/// builds and maintains the cached read-model. `rebuild_full` is the
/// expensive O(periods x accounts) path; `update_surgical` re-derives only
/// the named accounts and merges them into the existing document.
#[derive(Debug, Clone)]
pub struct AggregationEngine {
    /// accounts processed per rebuild chunk
    pub chunk_size: usize,
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self { chunk_size: 25 }
    }
}

impl AggregationEngine {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size: chunk_size.max(1) }
    }

    pub fn begin_rebuild(&self, store: &BillingStore) -> RebuildCheckpoint {
        RebuildCheckpoint {
            pending: store.account_ids(),
            rows: BTreeMap::new(),
        }
    }

    /// process up to one chunk of accounts; returns true when done
    pub fn advance_rebuild(
        &self,
        store: &BillingStore,
        checkpoint: &mut RebuildCheckpoint,
    ) -> Result<bool> {
        let take = self.chunk_size.min(checkpoint.pending.len());
        for account_id in checkpoint.pending.drain(..take) {
            let summary = AccountSummary::derive(store, &account_id)?;
            checkpoint.rows.insert(account_id, summary);
        }
        Ok(checkpoint.is_complete())
    }

    /// stamp and persist a completed rebuild, retrying once on a stale CAS
    pub fn finish_rebuild(
        &self,
        cache: &mut dyn CacheStore,
        checkpoint: RebuildCheckpoint,
        now: DateTime<Utc>,
    ) -> Result<CachedReadModel> {
        let rows = checkpoint.rows;
        let totals = YearTotals::from_rows(&rows);
        let expected = cache.load()?.map(|d| d.version);
        let model = CachedReadModel {
            version: expected.unwrap_or(0) + 1,
            generated_at: now,
            accounts: rows,
            totals,
        };
        match cache.store(model.clone(), expected) {
            Ok(()) => Ok(model),
            Err(BillingError::StaleCache { .. }) => {
                tracing::warn!("stale cache on rebuild write, retrying with fresh version");
                let expected = cache.load()?.map(|d| d.version);
                let model = CachedReadModel {
                    version: expected.unwrap_or(0) + 1,
                    ..model
                };
                cache.store(model.clone(), expected)?;
                Ok(model)
            }
            Err(e) => Err(e),
        }
    }

    /// full rebuild across every account in scope; the reconciliation path
    /// that always self-heals the cache
    pub fn rebuild_full(
        &self,
        store: &BillingStore,
        cache: &mut dyn CacheStore,
        now: DateTime<Utc>,
    ) -> Result<CachedReadModel> {
        let mut checkpoint = self.begin_rebuild(store);
        while !self.advance_rebuild(store, &mut checkpoint)? {}
        self.finish_rebuild(cache, checkpoint, now)
    }

    /// re-derive only the named accounts and merge them into the cached
    /// document. rows outside `account_ids` are carried over untouched;
    /// that is the entire performance contract. an account no longer in the
    /// source store has its row removed (purge cascade). falls back to a
    /// full rebuild when no cached document exists yet. a stale CAS write
    /// is retried once with a fresh read, then surfaced to the caller.
    pub fn update_surgical(
        &self,
        store: &BillingStore,
        cache: &mut dyn CacheStore,
        account_ids: &[AccountId],
        now: DateTime<Utc>,
    ) -> Result<CachedReadModel> {
        match self.try_surgical(store, cache, account_ids, now) {
            Err(BillingError::StaleCache { .. }) => {
                tracing::warn!(
                    accounts = account_ids.len(),
                    "stale cache on surgical write, retrying with fresh read"
                );
                self.try_surgical(store, cache, account_ids, now)
            }
            result => result,
        }
    }

    /// one merge-and-CAS attempt against the current cached document
    fn try_surgical(
        &self,
        store: &BillingStore,
        cache: &mut dyn CacheStore,
        account_ids: &[AccountId],
        now: DateTime<Utc>,
    ) -> Result<CachedReadModel> {
        let existing = match cache.load()? {
            Some(existing) => existing,
            None => return self.rebuild_full(store, cache, now),
        };

        let mut rows = existing.accounts;
        for account_id in account_ids {
            if store.contains_account(account_id) {
                rows.insert(account_id.clone(), AccountSummary::derive(store, account_id)?);
            } else {
                rows.remove(account_id);
            }
        }
        let totals = YearTotals::from_rows(&rows);
        let model = CachedReadModel {
            version: existing.version + 1,
            generated_at: now,
            accounts: rows,
            totals,
        };
        cache.store(model.clone(), Some(existing.version))?;
        Ok(model)
    }

    /// rebuild or merge depending on scope
    pub fn rebuild_scoped(
        &self,
        store: &BillingStore,
        cache: &mut dyn CacheStore,
        scope: &AccountScope,
        now: DateTime<Utc>,
    ) -> Result<CachedReadModel> {
        match scope {
            AccountScope::All => self.rebuild_full(store, cache, now),
            AccountScope::Accounts(ids) => self.update_surgical(store, cache, ids, now),
        }
    }
}
