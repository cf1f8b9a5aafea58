use thiserror::Error;

use crate::money::Money;
use crate::types::{AccountId, AllocationId, PeriodKey, TransactionId};

#[derive(Error, Debug)]
pub enum BillingError {
    // validation: rejected synchronously, never partially applied
    #[error("invalid payment amount: {amount}")]
    InvalidPaymentAmount {
        amount: Money,
    },

    #[error("unknown account: {account_id}")]
    UnknownAccount {
        account_id: AccountId,
    },

    #[error("invalid date: {message}")]
    InvalidDate {
        message: String,
    },

    #[error("import record rejected: {message}")]
    ImportRecordRejected {
        message: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    // consistency: an invariant would be violated; rejected before any write
    #[error("allocation split mismatch: base {base_portion} + penalty {penalty_portion} != amount {amount}")]
    AllocationSplitMismatch {
        amount: Money,
        base_portion: Money,
        penalty_portion: Money,
    },

    #[error("credit balance overdraw: balance {balance}, requested {requested}")]
    CreditOverdraw {
        balance: Money,
        requested: Money,
    },

    #[error("billing period already exists: account {account_id}, period {key}")]
    PeriodAlreadyExists {
        account_id: AccountId,
        key: PeriodKey,
    },

    #[error("billing period not found: account {account_id}, period {key}")]
    PeriodNotFound {
        account_id: AccountId,
        key: PeriodKey,
    },

    #[error("transaction not found: {transaction_id}")]
    TransactionNotFound {
        transaction_id: TransactionId,
    },

    #[error("allocation not found: {allocation_id}")]
    AllocationNotFound {
        allocation_id: AllocationId,
    },

    // infrastructure: retried where cheap, otherwise escalated
    #[error("stale cache version: expected {expected}, found {found}")]
    StaleCache {
        expected: u64,
        found: u64,
    },

    #[error("cache unavailable: {message}")]
    CacheUnavailable {
        message: String,
    },

    #[error("ledger unavailable: {message}")]
    LedgerUnavailable {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, BillingError>;
