use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::credit::CreditBalance;
use crate::errors::{BillingError, Result};
use crate::money::Money;
use crate::types::{AccountId, BillStatus, PaymentAllocation, PeriodKey};

/// source-of-truth document for one billing period of one account.
/// created once at bill-generation or import time; mutated only by the
/// payment/reversal and penalty services. status is always derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub account_id: AccountId,
    pub key: PeriodKey,
    /// reflects the billed period, never the creation time
    pub bill_date: NaiveDate,
    /// absent only for malformed imported history; penalty recalculation
    /// logs and skips such periods
    pub due_date: Option<NaiveDate>,
    pub base_charge: Money,
    /// metered quantity, informational
    pub consumption: Option<Decimal>,
    pub penalty_amount: Money,
    pub paid_amount: Money,
    /// append-only; entries are removed only by an exact reversal
    pub payments: Vec<PaymentAllocation>,
}

impl BillingPeriod {
    pub fn new(
        account_id: AccountId,
        key: PeriodKey,
        bill_date: NaiveDate,
        due_date: Option<NaiveDate>,
        base_charge: Money,
        consumption: Option<Decimal>,
    ) -> Self {
        Self {
            account_id,
            key,
            bill_date,
            due_date,
            base_charge,
            consumption,
            penalty_amount: Money::ZERO,
            paid_amount: Money::ZERO,
            payments: Vec::new(),
        }
    }

    pub fn total_due(&self) -> Money {
        self.base_charge + self.penalty_amount
    }

    pub fn outstanding(&self) -> Money {
        (self.total_due() - self.paid_amount).max(Money::ZERO)
    }

    /// portion of payments applied against the base charge
    pub fn paid_base(&self) -> Money {
        self.payments.iter().map(|p| p.base_portion).sum()
    }

    /// portion of payments applied against penalties
    pub fn paid_penalty(&self) -> Money {
        self.payments.iter().map(|p| p.penalty_portion).sum()
    }

    pub fn outstanding_base(&self) -> Money {
        (self.base_charge - self.paid_base()).max(Money::ZERO)
    }

    pub fn outstanding_penalty(&self) -> Money {
        (self.penalty_amount - self.paid_penalty()).max(Money::ZERO)
    }

    pub fn status(&self) -> BillStatus {
        if self.paid_amount >= self.total_due() {
            BillStatus::Paid
        } else if self.paid_amount.is_zero() {
            BillStatus::Unpaid
        } else {
            BillStatus::Partial
        }
    }

    /// verify the period-level invariants: paid amount equals the sum of
    /// applied allocations, and every allocation's split sums to its amount
    pub fn check_invariants(&self) -> Result<()> {
        let applied: Money = self.payments.iter().map(|p| p.amount_applied).sum();
        if applied != self.paid_amount {
            return Err(BillingError::AllocationSplitMismatch {
                amount: self.paid_amount,
                base_portion: self.paid_base(),
                penalty_portion: self.paid_penalty(),
            });
        }
        for p in &self.payments {
            if p.base_portion + p.penalty_portion != p.amount_applied {
                return Err(BillingError::AllocationSplitMismatch {
                    amount: p.amount_applied,
                    base_portion: p.base_portion,
                    penalty_portion: p.penalty_portion,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct AccountDocs {
    periods: BTreeMap<PeriodKey, BillingPeriod>,
    credit: CreditBalance,
}

/// in-memory source document store. one `BillingPeriod` per account per
/// fiscal month plus one credit balance per account. all state is
/// partitioned per account; nothing here coordinates across accounts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillingStore {
    accounts: BTreeMap<AccountId, AccountDocs>,
}

impl BillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_account(&mut self, account_id: AccountId) {
        self.accounts.entry(account_id).or_default();
    }

    pub fn contains_account(&self, account_id: &AccountId) -> bool {
        self.accounts.contains_key(account_id)
    }

    pub fn account_ids(&self) -> Vec<AccountId> {
        self.accounts.keys().cloned().collect()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    fn docs(&self, account_id: &AccountId) -> Result<&AccountDocs> {
        self.accounts
            .get(account_id)
            .ok_or_else(|| BillingError::UnknownAccount { account_id: account_id.clone() })
    }

    fn docs_mut(&mut self, account_id: &AccountId) -> Result<&mut AccountDocs> {
        self.accounts
            .get_mut(account_id)
            .ok_or_else(|| BillingError::UnknownAccount { account_id: account_id.clone() })
    }

    pub fn insert_period(&mut self, period: BillingPeriod) -> Result<()> {
        let account_id = period.account_id.clone();
        let key = period.key;
        let docs = self.docs_mut(&account_id)?;
        if docs.periods.contains_key(&key) {
            return Err(BillingError::PeriodAlreadyExists { account_id, key });
        }
        docs.periods.insert(key, period);
        Ok(())
    }

    pub fn period(&self, account_id: &AccountId, key: PeriodKey) -> Result<&BillingPeriod> {
        self.docs(account_id)?.periods.get(&key).ok_or_else(|| {
            BillingError::PeriodNotFound { account_id: account_id.clone(), key }
        })
    }

    pub fn period_mut(
        &mut self,
        account_id: &AccountId,
        key: PeriodKey,
    ) -> Result<&mut BillingPeriod> {
        self.docs_mut(account_id)?.periods.get_mut(&key).ok_or_else(|| {
            BillingError::PeriodNotFound { account_id: account_id.clone(), key }
        })
    }

    /// periods of one account in chronological order
    pub fn periods(&self, account_id: &AccountId) -> Result<impl Iterator<Item = &BillingPeriod>> {
        Ok(self.docs(account_id)?.periods.values())
    }

    pub fn periods_mut(
        &mut self,
        account_id: &AccountId,
    ) -> Result<impl Iterator<Item = &mut BillingPeriod>> {
        Ok(self.docs_mut(account_id)?.periods.values_mut())
    }

    pub fn period_count(&self, account_id: &AccountId) -> usize {
        self.accounts
            .get(account_id)
            .map(|d| d.periods.len())
            .unwrap_or(0)
    }

    pub fn credit(&self, account_id: &AccountId) -> Result<&CreditBalance> {
        Ok(&self.docs(account_id)?.credit)
    }

    pub fn credit_mut(&mut self, account_id: &AccountId) -> Result<&mut CreditBalance> {
        Ok(&mut self.docs_mut(account_id)?.credit)
    }

    /// administrative purge of an account's source documents. the caller
    /// must cascade the cached read-model entry.
    pub fn purge_account(&mut self, account_id: &AccountId) -> Result<()> {
        self.accounts
            .remove(account_id)
            .map(|_| ())
            .ok_or_else(|| BillingError::UnknownAccount { account_id: account_id.clone() })
    }
}
