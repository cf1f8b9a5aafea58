pub mod cache;
pub mod config;
pub mod credit;
pub mod engine;
pub mod errors;
pub mod events;
pub mod fiscal;
pub mod ledger;
pub mod money;
pub mod payments;
pub mod penalty;
pub mod store;
pub mod types;

// re-export key types
pub use money::{Money, Rate};
pub use errors::{BillingError, Result};
pub use events::{Event, EventStore};
pub use engine::{BillingEngine, ImportRecord};
pub use cache::{
    AccountSummary, AggregationEngine, CacheStore, CachedReadModel, InMemoryCacheStore,
    PeriodSummary, RebuildCheckpoint, YearTotals,
};
pub use config::{ClientConfig, CreditPolicy, PenaltyPolicy};
pub use credit::{CreditBalance, CreditEntry};
pub use fiscal::{FiscalCalendar, PeriodBoundaries};
pub use ledger::{InMemoryLedger, LedgerGateway, LedgerLineItem, LedgerTransaction, LineItemKind};
pub use payments::{AllocationPlan, PaymentRequest, ReversalOutcome};
pub use penalty::PenaltyEngine;
pub use store::{BillingPeriod, BillingStore};
pub use types::{
    AccountId, AccountScope, AllocationId, AllocationResult, BillStatus, PaymentAllocation,
    PeriodKey, RecalcResult, TransactionId,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
