use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::{BillingError, Result};
use crate::money::Money;
use crate::types::{AccountId, PaymentAllocation, PeriodKey, TransactionId};

/// one statement line of a ledger transaction. base and penalty are always
/// distinct lines, never collapsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerLineItem {
    pub key: PeriodKey,
    pub kind: LineItemKind,
    pub amount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineItemKind {
    BaseCharge,
    Penalty,
}

/// transaction as recorded by the external ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub amount: Money,
    pub payment_date: NaiveDate,
    pub line_items: Vec<LedgerLineItem>,
}

/// seam to the external ledger/transaction service. the engine creates the
/// ledger transaction before recording any credit history entry, so every
/// allocation can navigate back to its transaction.
pub trait LedgerGateway {
    fn create_transaction(
        &mut self,
        account_id: &AccountId,
        amount: Money,
        payment_date: NaiveDate,
        allocations: &[PaymentAllocation],
    ) -> Result<TransactionId>;

    fn delete_transaction(&mut self, transaction_id: TransactionId) -> Result<()>;
}

/// in-memory ledger for tests and embedded use
#[derive(Debug, Default, Clone)]
pub struct InMemoryLedger {
    transactions: BTreeMap<TransactionId, LedgerTransaction>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction(&self, transaction_id: TransactionId) -> Option<&LedgerTransaction> {
        self.transactions.get(&transaction_id)
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }
}

impl LedgerGateway for InMemoryLedger {
    fn create_transaction(
        &mut self,
        account_id: &AccountId,
        amount: Money,
        payment_date: NaiveDate,
        allocations: &[PaymentAllocation],
    ) -> Result<TransactionId> {
        let transaction_id = Uuid::new_v4();
        let mut line_items = Vec::new();
        for allocation in allocations {
            if allocation.base_portion.is_positive() {
                line_items.push(LedgerLineItem {
                    key: allocation.key,
                    kind: LineItemKind::BaseCharge,
                    amount: allocation.base_portion,
                });
            }
            if allocation.penalty_portion.is_positive() {
                line_items.push(LedgerLineItem {
                    key: allocation.key,
                    kind: LineItemKind::Penalty,
                    amount: allocation.penalty_portion,
                });
            }
        }
        self.transactions.insert(
            transaction_id,
            LedgerTransaction {
                transaction_id,
                account_id: account_id.clone(),
                amount,
                payment_date,
                line_items,
            },
        );
        Ok(transaction_id)
    }

    fn delete_transaction(&mut self, transaction_id: TransactionId) -> Result<()> {
        self.transactions
            .remove(&transaction_id)
            .map(|_| ())
            .ok_or(BillingError::TransactionNotFound { transaction_id })
    }
}
