use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::{BillingError, Result};
use crate::money::Money;
use crate::types::{AllocationId, TransactionId};

/// one signed movement of an account's credit balance, linked to the payment
/// transaction (and allocation, when one exists) that caused it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditEntry {
    pub transaction_id: TransactionId,
    /// absent for pure prepayments that touched no billing period
    pub allocation_id: Option<AllocationId>,
    pub delta: Money,
    pub recorded_at: NaiveDate,
}

/// per-account standing credit. the balance always equals the sum of the
/// history deltas and is never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CreditBalance {
    balance: Money,
    history: Vec<CreditEntry>,
}

impl CreditBalance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn history(&self) -> &[CreditEntry] {
        &self.history
    }

    /// sum of all recorded deltas; equals `balance()` by invariant
    pub fn history_sum(&self) -> Money {
        self.history.iter().map(|e| e.delta).sum()
    }

    /// record a signed delta. a delta that would drive the balance negative
    /// is rejected before any write.
    pub fn apply(&mut self, entry: CreditEntry) -> Result<()> {
        let new_balance = self.balance + entry.delta;
        if new_balance.is_negative() {
            return Err(BillingError::CreditOverdraw {
                balance: self.balance,
                requested: entry.delta.abs(),
            });
        }
        self.balance = new_balance;
        self.history.push(entry);
        Ok(())
    }

    pub fn entry_for_transaction(&self, transaction_id: TransactionId) -> Option<&CreditEntry> {
        self.history.iter().find(|e| e.transaction_id == transaction_id)
    }

    /// exact inverse of `apply` for reversal: removes the entry and undoes
    /// its delta. fails without mutating if the inversion would overdraw.
    pub fn remove_entry(&mut self, transaction_id: TransactionId) -> Result<CreditEntry> {
        let index = self
            .history
            .iter()
            .position(|e| e.transaction_id == transaction_id)
            .ok_or(BillingError::TransactionNotFound { transaction_id })?;
        let delta = self.history[index].delta;
        let new_balance = self.balance - delta;
        if new_balance.is_negative() {
            return Err(BillingError::CreditOverdraw {
                balance: self.balance,
                requested: delta,
            });
        }
        self.balance = new_balance;
        Ok(self.history.remove(index))
    }
}
