use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::types::{AccountId, PeriodKey, TransactionId};

/// all events emitted by the billing engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // period lifecycle
    PeriodGenerated {
        account_id: AccountId,
        key: PeriodKey,
        base_charge: Money,
        bill_date: NaiveDate,
        due_date: NaiveDate,
    },
    PeriodImported {
        account_id: AccountId,
        key: PeriodKey,
        base_charge: Money,
        bill_date: NaiveDate,
    },
    AccountPurged {
        account_id: AccountId,
        periods_removed: usize,
    },

    // payment events
    PaymentApplied {
        transaction_id: TransactionId,
        account_id: AccountId,
        amount: Money,
        applied_to_base: Money,
        applied_to_penalty: Money,
        credit_delta: Money,
        payment_date: NaiveDate,
    },
    PaymentReversed {
        transaction_id: TransactionId,
        account_id: AccountId,
        amount_restored: Money,
        timestamp: DateTime<Utc>,
    },
    CreditBalanceChanged {
        account_id: AccountId,
        transaction_id: TransactionId,
        delta: Money,
        new_balance: Money,
    },

    // penalty events
    PenaltiesRecalculated {
        periods_processed: usize,
        periods_skipped_paid: usize,
        as_of: NaiveDate,
    },

    // cache events
    CacheRebuilt {
        version: u64,
        accounts: usize,
        timestamp: DateTime<Utc>,
    },
    CacheUpdatedSurgically {
        version: u64,
        accounts_touched: usize,
        timestamp: DateTime<Utc>,
    },
    CacheWriteFailed {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
