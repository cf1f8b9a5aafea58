use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::{BillingError, Result};
use crate::money::Money;

/// unit/account identifier as configured by the client (e.g., "unit-103")
pub type AccountId = String;

/// identifier of an external ledger transaction
pub type TransactionId = Uuid;

/// identifier of a single payment allocation
pub type AllocationId = Uuid;

/// one fiscal month of one fiscal year; ordering is chronological
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PeriodKey {
    pub fiscal_year: i32,
    /// 0..=11 within the fiscal year
    pub fiscal_month: u8,
}

impl PeriodKey {
    pub fn new(fiscal_year: i32, fiscal_month: u8) -> Result<Self> {
        if fiscal_month > 11 {
            return Err(BillingError::InvalidDate {
                message: format!("fiscal month out of range: {fiscal_month}"),
            });
        }
        Ok(Self { fiscal_year, fiscal_month })
    }

    /// the following period; month 11 rolls into the next fiscal year
    pub fn next(&self) -> PeriodKey {
        if self.fiscal_month == 11 {
            PeriodKey { fiscal_year: self.fiscal_year + 1, fiscal_month: 0 }
        } else {
            PeriodKey { fiscal_year: self.fiscal_year, fiscal_month: self.fiscal_month + 1 }
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FY{}-{:02}", self.fiscal_year, self.fiscal_month)
    }
}

/// bill status, always derived from amounts, never hand-set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillStatus {
    Unpaid,
    Partial,
    Paid,
}

/// one application of payment funds to one billing period.
/// constructed only through `new`, which enforces that the base and penalty
/// portions sum to the applied amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub allocation_id: AllocationId,
    pub account_id: AccountId,
    pub key: PeriodKey,
    pub amount_applied: Money,
    pub base_portion: Money,
    pub penalty_portion: Money,
    /// may be backdated; penalties recalculate as of this date
    pub payment_date: NaiveDate,
    /// nullable only transiently, before the external ledger write completes
    pub transaction_id: Option<TransactionId>,
    /// signed credit consumed (negative) or created (positive) by this allocation
    pub credit_delta: Money,
}

impl PaymentAllocation {
    pub fn new(
        account_id: AccountId,
        key: PeriodKey,
        amount_applied: Money,
        base_portion: Money,
        penalty_portion: Money,
        payment_date: NaiveDate,
    ) -> Result<Self> {
        if base_portion + penalty_portion != amount_applied {
            return Err(BillingError::AllocationSplitMismatch {
                amount: amount_applied,
                base_portion,
                penalty_portion,
            });
        }
        Ok(Self {
            allocation_id: Uuid::new_v4(),
            account_id,
            key,
            amount_applied,
            base_portion,
            penalty_portion,
            payment_date,
            transaction_id: None,
            credit_delta: Money::ZERO,
        })
    }
}

/// account scope for recalculation and rebuild operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountScope {
    All,
    Accounts(Vec<AccountId>),
}

impl AccountScope {
    pub fn contains(&self, account_id: &AccountId) -> bool {
        match self {
            AccountScope::All => true,
            AccountScope::Accounts(ids) => ids.iter().any(|id| id == account_id),
        }
    }

    pub fn single(account_id: AccountId) -> Self {
        AccountScope::Accounts(vec![account_id])
    }
}

/// result of applying one payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub amount: Money,
    pub payment_date: NaiveDate,
    pub allocations: Vec<PaymentAllocation>,
    /// net change to the account's credit balance
    pub credit_delta: Money,
    pub credit_balance_after: Money,
}

/// result of a penalty recalculation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RecalcResult {
    pub periods_processed: usize,
    pub periods_skipped_paid: usize,
    pub periods_skipped_out_of_scope: usize,
    pub periods_skipped_malformed: usize,
    pub duration_ms: u128,
}
