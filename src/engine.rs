use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use rust_decimal::Decimal;
use std::collections::BTreeSet;

use crate::cache::{AggregationEngine, CacheStore, CachedReadModel};
use crate::config::ClientConfig;
use crate::credit::CreditEntry;
use crate::errors::{BillingError, Result};
use crate::events::{Event, EventStore};
use crate::fiscal::FiscalCalendar;
use crate::ledger::LedgerGateway;
use crate::money::Money;
use crate::payments::{self, PaymentRequest};
use crate::penalty::PenaltyEngine;
use crate::store::{BillingPeriod, BillingStore};
use crate::types::{
    AccountId, AccountScope, AllocationResult, PeriodKey, RecalcResult, TransactionId,
};

/// one historical billing record supplied by the import/batch loader.
/// dates are explicit: an import must carry the billed period's dates,
/// never default to import time. amounts arrive as decimal strings and
/// are converted to centavos exactly once, here.
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub account_id: AccountId,
    pub fiscal_year: i32,
    pub fiscal_month: u8,
    pub bill_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub base_charge: String,
    pub consumption: Option<Decimal>,
}

/// billing engine facade: wires the source document store, fiscal calendar,
/// penalty recalculation, payment/reversal service, external ledger gateway
/// and the aggregation/cache engine behind the operations consumers call.
///
/// caller contract: payments against the same account are serialized. one
/// payment completes, including its surgical cache update, before the next
/// is accepted for that account. operations on disjoint accounts only
/// contend on the shared cached document, which the CAS write protects.
pub struct BillingEngine<L: LedgerGateway, C: CacheStore> {
    config: ClientConfig,
    calendar: FiscalCalendar,
    store: BillingStore,
    penalty: PenaltyEngine,
    aggregation: AggregationEngine,
    ledger: L,
    cache: C,
    events: EventStore,
    time: SafeTimeProvider,
}

impl<L: LedgerGateway, C: CacheStore> BillingEngine<L, C> {
    pub fn new(config: ClientConfig, ledger: L, cache: C, time: SafeTimeProvider) -> Result<Self> {
        let calendar = FiscalCalendar::new(&config)?;
        let penalty = PenaltyEngine::new(config.penalty_policy.clone());
        Ok(Self {
            config,
            calendar,
            store: BillingStore::new(),
            penalty,
            aggregation: AggregationEngine::default(),
            ledger,
            cache,
            events: EventStore::new(),
            time,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn calendar(&self) -> &FiscalCalendar {
        &self.calendar
    }

    pub fn store(&self) -> &BillingStore {
        &self.store
    }

    /// persistence handle for the cached document, for embedders that
    /// manage it directly
    pub fn cache_mut(&mut self) -> &mut C {
        &mut self.cache
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.take_events()
    }

    pub fn register_account(&mut self, account_id: AccountId) {
        self.store.register_account(account_id);
    }

    pub fn credit_balance(&self, account_id: &AccountId) -> Result<Money> {
        Ok(self.store.credit(account_id)?.balance())
    }

    /// the calendar date "now" in the client's timezone; the only place the
    /// clock is consulted
    fn today(&self) -> NaiveDate {
        self.calendar.local_date(self.time.now())
    }

    /// create one billing period with dates derived from the fiscal
    /// calendar, never from the creation time
    pub fn generate_period(
        &mut self,
        account_id: &AccountId,
        key: PeriodKey,
        base_charge: Money,
        consumption: Option<Decimal>,
    ) -> Result<()> {
        if base_charge.is_negative() {
            return Err(BillingError::InvalidPaymentAmount { amount: base_charge });
        }
        let boundaries = self.calendar.period_boundaries(key)?;
        self.store.insert_period(BillingPeriod::new(
            account_id.clone(),
            key,
            boundaries.bill_date,
            Some(boundaries.due_date),
            base_charge,
            consumption,
        ))?;
        self.events.emit(Event::PeriodGenerated {
            account_id: account_id.clone(),
            key,
            base_charge,
            bill_date: boundaries.bill_date,
            due_date: boundaries.due_date,
        });
        Ok(())
    }

    /// batch generation: one period per fiscal month of the year for each
    /// account, at that account's flat monthly charge. the batch is
    /// validated as a whole; nothing is written if any entry would fail.
    pub fn generate_year(
        &mut self,
        fiscal_year: i32,
        monthly_charges: &[(AccountId, Money)],
    ) -> Result<usize> {
        let mut seen: BTreeSet<&AccountId> = BTreeSet::new();
        for (account_id, charge) in monthly_charges {
            if charge.is_negative() {
                return Err(BillingError::InvalidPaymentAmount { amount: *charge });
            }
            if !self.store.contains_account(account_id) {
                return Err(BillingError::UnknownAccount { account_id: account_id.clone() });
            }
            if !seen.insert(account_id) {
                return Err(BillingError::PeriodAlreadyExists {
                    account_id: account_id.clone(),
                    key: PeriodKey::new(fiscal_year, 0)?,
                });
            }
            for month in 0..12u8 {
                let key = PeriodKey::new(fiscal_year, month)?;
                if self.store.period(account_id, key).is_ok() {
                    return Err(BillingError::PeriodAlreadyExists {
                        account_id: account_id.clone(),
                        key,
                    });
                }
            }
        }

        let mut created = 0;
        for (account_id, charge) in monthly_charges {
            for month in 0..12u8 {
                self.generate_period(account_id, PeriodKey::new(fiscal_year, month)?, *charge, None)?;
                created += 1;
            }
        }
        Ok(created)
    }

    /// load historical periods from the import/batch boundary
    pub fn import_periods(&mut self, records: Vec<ImportRecord>) -> Result<usize> {
        // validate everything before the first write
        let mut validated = Vec::with_capacity(records.len());
        let mut seen: BTreeSet<(AccountId, PeriodKey)> = BTreeSet::new();
        for record in records {
            let key = PeriodKey::new(record.fiscal_year, record.fiscal_month)?;
            let base_charge = Money::from_decimal_str(&record.base_charge).map_err(|e| {
                BillingError::ImportRecordRejected {
                    message: format!(
                        "unparseable amount {:?} for {} {}: {e}",
                        record.base_charge, record.account_id, key
                    ),
                }
            })?;
            if base_charge.is_negative() {
                return Err(BillingError::ImportRecordRejected {
                    message: format!("negative charge for {} {}", record.account_id, key),
                });
            }
            let exists = self.store.contains_account(&record.account_id)
                && self.store.period(&record.account_id, key).is_ok();
            if exists || !seen.insert((record.account_id.clone(), key)) {
                return Err(BillingError::PeriodAlreadyExists {
                    account_id: record.account_id.clone(),
                    key,
                });
            }
            validated.push((record, key, base_charge));
        }

        let count = validated.len();
        for (record, key, base_charge) in validated {
            self.store.register_account(record.account_id.clone());
            self.store.insert_period(BillingPeriod::new(
                record.account_id.clone(),
                key,
                record.bill_date,
                record.due_date,
                base_charge,
                record.consumption,
            ))?;
            self.events.emit(Event::PeriodImported {
                account_id: record.account_id,
                key,
                base_charge,
                bill_date: record.bill_date,
            });
        }
        Ok(count)
    }

    /// apply a payment across the account's outstanding periods,
    /// oldest-first. `payment_date` may be backdated; when absent, the
    /// client-timezone "today" is used.
    ///
    /// a cache-write failure after the source mutation committed does not
    /// fail the payment: it is logged, surfaced as an event, and healed by
    /// the next rebuild.
    pub fn post_payment(
        &mut self,
        account_id: &AccountId,
        amount: Money,
        payment_date: Option<NaiveDate>,
    ) -> Result<AllocationResult> {
        let payment_date = payment_date.unwrap_or_else(|| self.today());
        let request = PaymentRequest {
            account_id: account_id.clone(),
            amount,
            payment_date,
        };
        request.validate(&self.store)?;

        // bring penalties current as of the (possibly backdated) payment
        // date so the allocation sees the right outstanding amounts
        let scope = AccountScope::single(account_id.clone());
        self.penalty.recalculate(&mut self.store, &scope, payment_date);

        let credit_available = self.store.credit(account_id)?.balance();
        let mut plan = payments::plan(
            account_id,
            amount,
            payment_date,
            self.store.periods(account_id)?,
            credit_available,
            self.config.credit_policy,
        )?;

        // the ledger transaction must exist before the credit entry is
        // recorded; the reversal path looks both up by this id
        let transaction_id =
            self.ledger
                .create_transaction(account_id, amount, payment_date, &plan.allocations)?;
        for allocation in &mut plan.allocations {
            allocation.transaction_id = Some(transaction_id);
        }

        payments::apply_allocations(&mut self.store, &plan.allocations)?;

        let credit_delta = plan.net_credit_delta();
        if !credit_delta.is_zero() {
            let entry = CreditEntry {
                transaction_id,
                allocation_id: plan.allocations.last().map(|a| a.allocation_id),
                delta: credit_delta,
                recorded_at: payment_date,
            };
            self.store.credit_mut(account_id)?.apply(entry)?;
            self.events.emit(Event::CreditBalanceChanged {
                account_id: account_id.clone(),
                transaction_id,
                delta: credit_delta,
                new_balance: self.store.credit(account_id)?.balance(),
            });
        }

        // penalties current before the cache snapshot is taken
        self.penalty.recalculate(&mut self.store, &scope, payment_date);
        self.surgical_update_tolerant(&[account_id.clone()]);

        self.events.emit(Event::PaymentApplied {
            transaction_id,
            account_id: account_id.clone(),
            amount,
            applied_to_base: plan.allocations.iter().map(|a| a.base_portion).sum(),
            applied_to_penalty: plan.allocations.iter().map(|a| a.penalty_portion).sum(),
            credit_delta,
            payment_date,
        });

        Ok(AllocationResult {
            transaction_id,
            account_id: account_id.clone(),
            amount,
            payment_date,
            allocations: plan.allocations,
            credit_delta,
            credit_balance_after: self.store.credit(account_id)?.balance(),
        })
    }

    /// exactly reverse a payment by its ledger transaction id. the source
    /// documents and credit ledger are restored first; the periods the
    /// reversal re-opened then resume accruing penalties as of `as_of`.
    pub fn delete_payment(
        &mut self,
        transaction_id: TransactionId,
        as_of: Option<NaiveDate>,
    ) -> Result<()> {
        let as_of = as_of.unwrap_or_else(|| self.today());
        let outcome = payments::reverse(&mut self.store, transaction_id)?;
        self.ledger.delete_transaction(transaction_id)?;

        let scope = AccountScope::single(outcome.account_id.clone());
        self.penalty.recalculate(&mut self.store, &scope, as_of);
        self.surgical_update_tolerant(&[outcome.account_id.clone()]);

        self.events.emit(Event::PaymentReversed {
            transaction_id,
            account_id: outcome.account_id,
            amount_restored: outcome.amount_restored,
            timestamp: self.time.now(),
        });
        Ok(())
    }

    /// administrative/nightly penalty recalculation
    pub fn recalculate_penalties(
        &mut self,
        scope: &AccountScope,
        as_of: Option<NaiveDate>,
    ) -> RecalcResult {
        let as_of = as_of.unwrap_or_else(|| self.today());
        let result = self.penalty.recalculate(&mut self.store, scope, as_of);
        self.events.emit(Event::PenaltiesRecalculated {
            periods_processed: result.periods_processed,
            periods_skipped_paid: result.periods_skipped_paid,
            as_of,
        });
        result
    }

    /// administrative "force refresh" of the cached read-model
    pub fn rebuild_cache(&mut self, scope: &AccountScope) -> Result<CachedReadModel> {
        let now = self.time.now();
        let model = self
            .aggregation
            .rebuild_scoped(&self.store, &mut self.cache, scope, now)?;
        self.events.emit(Event::CacheRebuilt {
            version: model.version,
            accounts: model.accounts.len(),
            timestamp: now,
        });
        Ok(model)
    }

    /// versioned read of the cached read-model; consumers treat the version
    /// token as the sole staleness signal. the cache is derived and
    /// disposable, so a missing document is built on first access.
    pub fn aggregated_data(&mut self) -> Result<CachedReadModel> {
        if let Some(model) = self.cache.load()? {
            return Ok(model);
        }
        let now = self.time.now();
        self.aggregation.rebuild_full(&self.store, &mut self.cache, now)
    }

    /// administrative purge of an account, cascading its cached row
    pub fn purge_account(&mut self, account_id: &AccountId) -> Result<()> {
        let periods_removed = self.store.period_count(account_id);
        self.store.purge_account(account_id)?;
        self.surgical_update_tolerant(&[account_id.clone()]);
        self.events.emit(Event::AccountPurged {
            account_id: account_id.clone(),
            periods_removed,
        });
        Ok(())
    }

    /// surgical cache update that never fails the surrounding mutation:
    /// the source documents are the only durable truth, so a failed cache
    /// write is logged and left for the next rebuild to heal
    fn surgical_update_tolerant(&mut self, account_ids: &[AccountId]) {
        let now = self.time.now();
        match self
            .aggregation
            .update_surgical(&self.store, &mut self.cache, account_ids, now)
        {
            Ok(model) => {
                self.events.emit(Event::CacheUpdatedSurgically {
                    version: model.version,
                    accounts_touched: account_ids.len(),
                    timestamp: now,
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "surgical cache update failed after committed source mutation");
                self.events.emit(Event::CacheWriteFailed {
                    message: e.to_string(),
                    timestamp: now,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use crate::ledger::InMemoryLedger;
    use crate::types::{BillStatus, PaymentAllocation};
    use chrono::{TimeZone, Utc};
    use hourglass_rs::TimeSource;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_time() -> SafeTimeProvider {
        // fixed "now": 2025-10-02, well past the first due dates
        SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2025, 10, 2, 18, 0, 0).unwrap(),
        ))
    }

    fn engine() -> BillingEngine<InMemoryLedger, InMemoryCacheStore> {
        BillingEngine::new(
            ClientConfig::hoa_water(),
            InMemoryLedger::new(),
            InMemoryCacheStore::new(),
            test_time(),
        )
        .unwrap()
    }

    /// one account, one period: base 500.00, due 2025-07-10
    fn engine_with_unit1() -> BillingEngine<InMemoryLedger, InMemoryCacheStore> {
        let mut engine = engine();
        engine.register_account("unit-1".to_string());
        engine
            .generate_period(
                &"unit-1".to_string(),
                PeriodKey::new(2025, 0).unwrap(),
                Money::from_centavos(50_000),
                None,
            )
            .unwrap();
        engine
    }

    fn key0() -> PeriodKey {
        PeriodKey::new(2025, 0).unwrap()
    }

    #[test]
    fn test_generated_period_dates_come_from_calendar() {
        let engine = engine_with_unit1();
        let period = engine.store().period(&"unit-1".to_string(), key0()).unwrap();
        assert_eq!(period.bill_date, date(2025, 7, 1));
        assert_eq!(period.due_date, Some(date(2025, 7, 10)));
    }

    #[test]
    fn test_scenario_penalty_then_partial_payment() {
        let mut engine = engine_with_unit1();
        // due 10 days before as-of: one cycle at 5% -> 2500
        let result = engine.recalculate_penalties(&AccountScope::All, Some(date(2025, 7, 20)));
        assert_eq!(result.periods_processed, 1);
        {
            let period = engine.store().period(&"unit-1".to_string(), key0()).unwrap();
            assert_eq!(period.penalty_amount, Money::from_centavos(2_500));
        }

        let allocation = engine
            .post_payment(
                &"unit-1".to_string(),
                Money::from_centavos(30_000),
                Some(date(2025, 7, 20)),
            )
            .unwrap();
        assert_eq!(allocation.allocations.len(), 1);

        let period = engine.store().period(&"unit-1".to_string(), key0()).unwrap();
        assert_eq!(period.paid_amount, Money::from_centavos(30_000));
        assert_eq!(period.status(), BillStatus::Partial);
        period.check_invariants().unwrap();
    }

    #[test]
    fn test_scenario_second_payment_settles_exactly() {
        let mut engine = engine_with_unit1();
        let as_of = date(2025, 7, 20);
        engine
            .post_payment(&"unit-1".to_string(), Money::from_centavos(30_000), Some(as_of))
            .unwrap();
        engine
            .post_payment(&"unit-1".to_string(), Money::from_centavos(22_500), Some(as_of))
            .unwrap();

        let period = engine.store().period(&"unit-1".to_string(), key0()).unwrap();
        assert_eq!(period.paid_amount, Money::from_centavos(52_500));
        assert_eq!(period.status(), BillStatus::Paid);
        assert_eq!(
            engine.credit_balance(&"unit-1".to_string()).unwrap(),
            Money::ZERO
        );
    }

    #[test]
    fn test_scenario_overpayment_creates_credit() {
        let mut engine = engine_with_unit1();
        let as_of = date(2025, 7, 20);
        let result = engine
            .post_payment(&"unit-1".to_string(), Money::from_centavos(60_000), Some(as_of))
            .unwrap();

        assert_eq!(result.credit_delta, Money::from_centavos(7_500));
        assert_eq!(
            engine.credit_balance(&"unit-1".to_string()).unwrap(),
            Money::from_centavos(7_500)
        );
        let period = engine.store().period(&"unit-1".to_string(), key0()).unwrap();
        assert_eq!(period.status(), BillStatus::Paid);
    }

    #[test]
    fn test_scenario_reversal_reopens_period() {
        let mut engine = engine_with_unit1();
        let as_of = date(2025, 7, 20);
        let result = engine
            .post_payment(&"unit-1".to_string(), Money::from_centavos(60_000), Some(as_of))
            .unwrap();

        engine
            .delete_payment(result.transaction_id, Some(as_of))
            .unwrap();

        let period = engine.store().period(&"unit-1".to_string(), key0()).unwrap();
        assert_eq!(period.status(), BillStatus::Unpaid);
        assert_eq!(period.paid_amount, Money::ZERO);
        assert_eq!(
            engine.credit_balance(&"unit-1".to_string()).unwrap(),
            Money::ZERO
        );
        assert!(engine.ledger().transaction(result.transaction_id).is_none());

        // penalties resume accruing on the re-opened period
        engine.recalculate_penalties(&AccountScope::All, Some(date(2025, 9, 10)));
        let period = engine.store().period(&"unit-1".to_string(), key0()).unwrap();
        assert_eq!(period.penalty_amount, Money::from_centavos(5_125));
    }

    #[test]
    fn test_exact_reversal_restores_full_state() {
        let mut engine = engine_with_unit1();
        let as_of = date(2025, 8, 15);
        engine.recalculate_penalties(&AccountScope::All, Some(as_of));
        let before = engine.store().clone();

        let result = engine
            .post_payment(&"unit-1".to_string(), Money::from_centavos(41_000), Some(as_of))
            .unwrap();
        engine
            .delete_payment(result.transaction_id, Some(as_of))
            .unwrap();

        // integer equality of the entire source state, not approximate
        assert_eq!(*engine.store(), before);
    }

    #[test]
    fn test_backdated_payment_on_due_date_accrues_nothing() {
        let mut engine = engine_with_unit1();
        // "today" is 2025-10-02, but the payment is dated on the due date
        let result = engine
            .post_payment(
                &"unit-1".to_string(),
                Money::from_centavos(50_000),
                Some(date(2025, 7, 10)),
            )
            .unwrap();

        assert_eq!(result.allocations[0].penalty_portion, Money::ZERO);
        let period = engine.store().period(&"unit-1".to_string(), key0()).unwrap();
        assert_eq!(period.penalty_amount, Money::ZERO);
        assert_eq!(period.status(), BillStatus::Paid);
    }

    #[test]
    fn test_payment_defaults_to_client_timezone_today() {
        let mut engine = engine_with_unit1();
        let result = engine
            .post_payment(&"unit-1".to_string(), Money::from_centavos(1_000), None)
            .unwrap();
        // 2025-10-02 18:00 UTC is still 2025-10-02 at UTC-5
        assert_eq!(result.payment_date, date(2025, 10, 2));
    }

    #[test]
    fn test_ledger_transaction_created_before_credit_entry() {
        let mut engine = engine_with_unit1();
        let result = engine
            .post_payment(
                &"unit-1".to_string(),
                Money::from_centavos(60_000),
                Some(date(2025, 7, 20)),
            )
            .unwrap();

        // every allocation carries the transaction reference
        assert!(result
            .allocations
            .iter()
            .all(|a| a.transaction_id == Some(result.transaction_id)));
        // and the credit history entry resolves through the same id
        let credit = engine.store().credit(&"unit-1".to_string()).unwrap();
        let entry = credit.entry_for_transaction(result.transaction_id).unwrap();
        assert_eq!(entry.delta, Money::from_centavos(7_500));
    }

    struct FailingLedger;

    impl LedgerGateway for FailingLedger {
        fn create_transaction(
            &mut self,
            _account_id: &AccountId,
            _amount: Money,
            _payment_date: NaiveDate,
            _allocations: &[PaymentAllocation],
        ) -> Result<TransactionId> {
            Err(BillingError::LedgerUnavailable { message: "down".to_string() })
        }

        fn delete_transaction(&mut self, transaction_id: TransactionId) -> Result<()> {
            Err(BillingError::TransactionNotFound { transaction_id })
        }
    }

    #[test]
    fn test_ledger_failure_leaves_source_untouched() {
        let mut engine = BillingEngine::new(
            ClientConfig::hoa_water(),
            FailingLedger,
            InMemoryCacheStore::new(),
            test_time(),
        )
        .unwrap();
        engine.register_account("unit-1".to_string());
        engine
            .generate_period(
                &"unit-1".to_string(),
                key0(),
                Money::from_centavos(50_000),
                None,
            )
            .unwrap();
        engine.recalculate_penalties(&AccountScope::All, Some(date(2025, 7, 20)));
        let before = engine.store().clone();

        let err = engine.post_payment(
            &"unit-1".to_string(),
            Money::from_centavos(30_000),
            Some(date(2025, 7, 20)),
        );
        assert!(matches!(err, Err(BillingError::LedgerUnavailable { .. })));
        // no allocation, no paid amount, no credit entry
        assert_eq!(*engine.store(), before);
    }

    /// cache store that fails a configurable number of writes
    struct FlakyCacheStore {
        inner: InMemoryCacheStore,
        failures_remaining: usize,
    }

    impl CacheStore for FlakyCacheStore {
        fn load(&self) -> Result<Option<CachedReadModel>> {
            self.inner.load()
        }

        fn store(&mut self, model: CachedReadModel, expected: Option<u64>) -> Result<()> {
            if self.failures_remaining > 0 {
                self.failures_remaining -= 1;
                return Err(BillingError::CacheUnavailable {
                    message: "write timed out".to_string(),
                });
            }
            self.inner.store(model, expected)
        }
    }

    #[test]
    fn test_cache_failure_does_not_lose_payment() {
        let mut engine = BillingEngine::new(
            ClientConfig::hoa_water(),
            InMemoryLedger::new(),
            FlakyCacheStore { inner: InMemoryCacheStore::new(), failures_remaining: 0 },
            test_time(),
        )
        .unwrap();
        engine.register_account("unit-1".to_string());
        engine
            .generate_period(
                &"unit-1".to_string(),
                key0(),
                Money::from_centavos(50_000),
                None,
            )
            .unwrap();
        engine.rebuild_cache(&AccountScope::All).unwrap();

        // the surgical write fails; the payment must still commit
        engine.cache_mut().failures_remaining = 1;
        let result = engine
            .post_payment(
                &"unit-1".to_string(),
                Money::from_centavos(50_000),
                Some(date(2025, 7, 10)),
            )
            .unwrap();
        assert_eq!(result.amount, Money::from_centavos(50_000));

        let events = engine.take_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::CacheWriteFailed { .. })));

        // the stale document still shows the period unpaid
        let stale = engine.aggregated_data().unwrap();
        assert_eq!(stale.accounts["unit-1"].total_paid, Money::ZERO);

        // the next full rebuild self-heals
        let healed = engine.rebuild_cache(&AccountScope::All).unwrap();
        assert_eq!(
            healed.accounts["unit-1"].total_paid,
            Money::from_centavos(50_000)
        );
    }

    #[test]
    fn test_conservation_between_store_and_read_model() {
        let mut engine = engine();
        for unit in ["unit-1", "unit-2", "unit-3"] {
            engine.register_account(unit.to_string());
        }
        engine
            .generate_year(
                2025,
                &[
                    ("unit-1".to_string(), Money::from_centavos(10_000)),
                    ("unit-2".to_string(), Money::from_centavos(20_000)),
                    ("unit-3".to_string(), Money::from_centavos(15_000)),
                ],
            )
            .unwrap();
        engine.recalculate_penalties(&AccountScope::All, Some(date(2025, 10, 2)));
        engine
            .post_payment(&"unit-2".to_string(), Money::from_centavos(37_500), Some(date(2025, 10, 2)))
            .unwrap();

        let model = engine.aggregated_data().unwrap();
        for unit in ["unit-1", "unit-2", "unit-3"] {
            let outstanding: Money = engine
                .store()
                .periods(&unit.to_string())
                .unwrap()
                .map(|p| p.outstanding())
                .sum();
            assert_eq!(model.accounts[unit].total_outstanding, outstanding);
        }
    }

    #[test]
    fn test_surgical_equals_full_rebuild() {
        let mut engine = engine();
        for unit in ["unit-1", "unit-2"] {
            engine.register_account(unit.to_string());
        }
        engine
            .generate_year(
                2025,
                &[
                    ("unit-1".to_string(), Money::from_centavos(10_000)),
                    ("unit-2".to_string(), Money::from_centavos(20_000)),
                ],
            )
            .unwrap();
        engine.rebuild_cache(&AccountScope::All).unwrap();

        // the payment path updates the cache surgically
        engine
            .post_payment(&"unit-1".to_string(), Money::from_centavos(25_000), Some(date(2025, 9, 15)))
            .unwrap();
        let surgical = engine.aggregated_data().unwrap();

        // a full rebuild immediately after must agree on every row
        let full = engine.rebuild_cache(&AccountScope::All).unwrap();
        assert_eq!(surgical.accounts, full.accounts);
        assert_eq!(surgical.totals, full.totals);
    }

    #[test]
    fn test_import_converts_decimal_exactly_once() {
        let mut engine = engine();
        let imported = engine
            .import_periods(vec![ImportRecord {
                account_id: "unit-9".to_string(),
                fiscal_year: 2024,
                fiscal_month: 3,
                bill_date: date(2024, 10, 1),
                due_date: Some(date(2024, 10, 10)),
                base_charge: "325.50".to_string(),
                consumption: Some(Decimal::from(18)),
            }])
            .unwrap();
        assert_eq!(imported, 1);

        let period = engine
            .store()
            .period(&"unit-9".to_string(), PeriodKey::new(2024, 3).unwrap())
            .unwrap();
        assert_eq!(period.base_charge, Money::from_centavos(32_550));
        // the stored dates are the billed period's, not import time
        assert_eq!(period.bill_date, date(2024, 10, 1));
    }

    #[test]
    fn test_import_rejects_bad_amount_before_any_write() {
        let mut engine = engine();
        let err = engine.import_periods(vec![
            ImportRecord {
                account_id: "unit-9".to_string(),
                fiscal_year: 2024,
                fiscal_month: 0,
                bill_date: date(2024, 7, 1),
                due_date: Some(date(2024, 7, 10)),
                base_charge: "100.00".to_string(),
                consumption: None,
            },
            ImportRecord {
                account_id: "unit-9".to_string(),
                fiscal_year: 2024,
                fiscal_month: 1,
                bill_date: date(2024, 8, 1),
                due_date: None,
                base_charge: "not-a-number".to_string(),
                consumption: None,
            },
        ]);
        assert!(matches!(err, Err(BillingError::ImportRecordRejected { .. })));
        // the batch was rejected as a whole
        assert!(!engine.store().contains_account(&"unit-9".to_string()));
    }

    #[test]
    fn test_generate_year_rejects_whole_batch_on_existing_period() {
        let mut engine = engine_with_unit1();
        engine.register_account("unit-2".to_string());

        // unit-1 already has FY2025-00; the earlier entry must not commit
        let err = engine.generate_year(
            2025,
            &[
                ("unit-2".to_string(), Money::from_centavos(10_000)),
                ("unit-1".to_string(), Money::from_centavos(50_000)),
            ],
        );
        assert!(matches!(err, Err(BillingError::PeriodAlreadyExists { .. })));
        assert_eq!(engine.store().period_count(&"unit-2".to_string()), 0);
        assert_eq!(engine.store().period_count(&"unit-1".to_string()), 1);
    }

    #[test]
    fn test_import_rejects_duplicate_period_before_any_write() {
        let mut engine = engine_with_unit1();
        let fresh = ImportRecord {
            account_id: "unit-9".to_string(),
            fiscal_year: 2025,
            fiscal_month: 1,
            bill_date: date(2025, 8, 1),
            due_date: Some(date(2025, 8, 10)),
            base_charge: "100.00".to_string(),
            consumption: None,
        };
        let colliding = ImportRecord {
            account_id: "unit-1".to_string(),
            fiscal_year: 2025,
            fiscal_month: 0,
            bill_date: date(2025, 7, 1),
            due_date: Some(date(2025, 7, 10)),
            base_charge: "500.00".to_string(),
            consumption: None,
        };

        // collides with the period unit-1 already has in the store
        let err = engine.import_periods(vec![fresh.clone(), colliding]);
        assert!(matches!(err, Err(BillingError::PeriodAlreadyExists { .. })));
        assert!(!engine.store().contains_account(&"unit-9".to_string()));

        // two records for the same account and period within one batch
        let err = engine.import_periods(vec![fresh.clone(), fresh]);
        assert!(matches!(err, Err(BillingError::PeriodAlreadyExists { .. })));
        assert!(!engine.store().contains_account(&"unit-9".to_string()));
    }

    #[test]
    fn test_purge_account_cascades_cached_row() {
        let mut engine = engine_with_unit1();
        engine.register_account("unit-2".to_string());
        engine
            .generate_period(
                &"unit-2".to_string(),
                key0(),
                Money::from_centavos(10_000),
                None,
            )
            .unwrap();
        engine.rebuild_cache(&AccountScope::All).unwrap();

        engine.purge_account(&"unit-1".to_string()).unwrap();
        let model = engine.aggregated_data().unwrap();
        assert!(!model.accounts.contains_key("unit-1"));
        assert!(model.accounts.contains_key("unit-2"));
    }

    #[test]
    fn test_autodraw_policy_covers_shortfall() {
        let mut config = ClientConfig::hoa_water();
        config.credit_policy = crate::config::CreditPolicy::AutoDraw;
        let mut engine = BillingEngine::new(
            config,
            InMemoryLedger::new(),
            InMemoryCacheStore::new(),
            test_time(),
        )
        .unwrap();
        engine.register_account("unit-1".to_string());
        engine
            .generate_period(
                &"unit-1".to_string(),
                key0(),
                Money::from_centavos(50_000),
                None,
            )
            .unwrap();

        // build up credit with an overpayment on a paid-by-due-date period,
        // then bill the next period and underpay it
        let first = engine
            .post_payment(
                &"unit-1".to_string(),
                Money::from_centavos(58_000),
                Some(date(2025, 7, 10)),
            )
            .unwrap();
        assert_eq!(first.credit_delta, Money::from_centavos(8_000));

        engine
            .generate_period(
                &"unit-1".to_string(),
                PeriodKey::new(2025, 1).unwrap(),
                Money::from_centavos(50_000),
                None,
            )
            .unwrap();
        let second = engine
            .post_payment(
                &"unit-1".to_string(),
                Money::from_centavos(45_000),
                Some(date(2025, 8, 10)),
            )
            .unwrap();

        // 5000 of the 8000 credit covered the shortfall
        assert_eq!(second.credit_delta, Money::from_centavos(-5_000));
        assert_eq!(
            engine.credit_balance(&"unit-1".to_string()).unwrap(),
            Money::from_centavos(3_000)
        );
        let period = engine
            .store()
            .period(&"unit-1".to_string(), PeriodKey::new(2025, 1).unwrap())
            .unwrap();
        assert_eq!(period.status(), BillStatus::Paid);
    }

    #[test]
    fn test_scoped_recalc_independent_of_account_count() {
        let mut engine = engine();
        let mut charges = Vec::new();
        for i in 0..40 {
            let unit = format!("unit-{i}");
            engine.register_account(unit.clone());
            charges.push((unit, Money::from_centavos(10_000)));
        }
        engine.generate_year(2025, &charges).unwrap();

        let scope = AccountScope::Accounts(vec!["unit-0".to_string(), "unit-1".to_string()]);
        let result = engine.recalculate_penalties(&scope, Some(date(2025, 10, 2)));
        assert_eq!(result.periods_processed, 24);
        assert_eq!(result.periods_skipped_out_of_scope, 38 * 12);
    }
}
