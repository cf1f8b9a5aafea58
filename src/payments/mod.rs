pub mod allocation;
pub mod reversal;

use chrono::NaiveDate;

use crate::errors::{BillingError, Result};
use crate::money::Money;
use crate::store::BillingStore;
use crate::types::{AccountId, PaymentAllocation};

pub use allocation::{plan, AllocationPlan};
pub use reversal::{reverse, ReversalOutcome};

/// one incoming payment
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub account_id: AccountId,
    pub amount: Money,
    /// may be backdated; never defaulted inside core logic
    pub payment_date: NaiveDate,
}

impl PaymentRequest {
    /// validation errors are rejected synchronously, before any write
    pub fn validate(&self, store: &BillingStore) -> Result<()> {
        if !self.amount.is_positive() {
            return Err(BillingError::InvalidPaymentAmount { amount: self.amount });
        }
        if !store.contains_account(&self.account_id) {
            return Err(BillingError::UnknownAccount {
                account_id: self.account_id.clone(),
            });
        }
        Ok(())
    }
}

/// write a planned set of allocations into the source documents. each
/// allocation must already carry its ledger transaction id.
pub fn apply_allocations(
    store: &mut BillingStore,
    allocations: &[PaymentAllocation],
) -> Result<()> {
    for allocation in allocations {
        let period = store.period_mut(&allocation.account_id, allocation.key)?;
        period.paid_amount += allocation.amount_applied;
        period.payments.push(allocation.clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BillingPeriod;
    use crate::types::PeriodKey;

    #[test]
    fn test_request_validation() {
        let mut store = BillingStore::new();
        store.register_account("unit-1".to_string());
        let date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();

        let zero = PaymentRequest {
            account_id: "unit-1".to_string(),
            amount: Money::ZERO,
            payment_date: date,
        };
        assert!(matches!(
            zero.validate(&store),
            Err(BillingError::InvalidPaymentAmount { .. })
        ));

        let negative = PaymentRequest {
            account_id: "unit-1".to_string(),
            amount: Money::from_centavos(-100),
            payment_date: date,
        };
        assert!(negative.validate(&store).is_err());

        let unknown = PaymentRequest {
            account_id: "ghost".to_string(),
            amount: Money::from_centavos(100),
            payment_date: date,
        };
        assert!(matches!(
            unknown.validate(&store),
            Err(BillingError::UnknownAccount { .. })
        ));

        let ok = PaymentRequest {
            account_id: "unit-1".to_string(),
            amount: Money::from_centavos(100),
            payment_date: date,
        };
        assert!(ok.validate(&store).is_ok());
    }

    #[test]
    fn test_apply_allocations_updates_paid_amount() {
        let mut store = BillingStore::new();
        store.register_account("unit-1".to_string());
        store
            .insert_period(BillingPeriod::new(
                "unit-1".to_string(),
                PeriodKey::new(2025, 0).unwrap(),
                NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 7, 10),
                Money::from_centavos(50_000),
                None,
            ))
            .unwrap();

        let allocation = PaymentAllocation::new(
            "unit-1".to_string(),
            PeriodKey::new(2025, 0).unwrap(),
            Money::from_centavos(30_000),
            Money::from_centavos(30_000),
            Money::ZERO,
            NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
        )
        .unwrap();

        apply_allocations(&mut store, &[allocation]).unwrap();

        let period = store
            .period(&"unit-1".to_string(), PeriodKey::new(2025, 0).unwrap())
            .unwrap();
        assert_eq!(period.paid_amount, Money::from_centavos(30_000));
        assert_eq!(period.payments.len(), 1);
        period.check_invariants().unwrap();
    }
}
