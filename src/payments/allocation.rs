use chrono::NaiveDate;

use crate::config::CreditPolicy;
use crate::errors::Result;
use crate::money::Money;
use crate::store::BillingPeriod;
use crate::types::{AccountId, PaymentAllocation};

/// planned effect of one payment before anything is written
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationPlan {
    pub allocations: Vec<PaymentAllocation>,
    /// standing credit drawn to cover a shortfall
    pub credit_drawn: Money,
    /// overpayment remainder routed to standing credit
    pub credit_remainder: Money,
}

impl AllocationPlan {
    /// signed net effect on the account's credit balance
    pub fn net_credit_delta(&self) -> Money {
        self.credit_remainder - self.credit_drawn
    }

    pub fn total_applied(&self) -> Money {
        self.allocations.iter().map(|a| a.amount_applied).sum()
    }
}

/// walk outstanding periods oldest-first and plan how a payment lands.
/// each period's application is split into base and penalty portions
/// proportionally to that period's own outstanding base/penalty mix, so
/// downstream statements can show them as distinct line items.
///
/// funds left after all outstanding periods are covered become a positive
/// credit remainder. when the payment cannot cover everything and the
/// client policy allows it, standing credit is drawn down, capped at the
/// available balance.
pub fn plan<'a>(
    account_id: &AccountId,
    amount: Money,
    payment_date: NaiveDate,
    periods_oldest_first: impl Iterator<Item = &'a BillingPeriod>,
    credit_available: Money,
    credit_policy: CreditPolicy,
) -> Result<AllocationPlan> {
    let outstanding: Vec<&BillingPeriod> = periods_oldest_first
        .filter(|p| p.outstanding().is_positive())
        .collect();
    let total_outstanding: Money = outstanding.iter().map(|p| p.outstanding()).sum();

    let credit_drawn = match credit_policy {
        CreditPolicy::AutoDraw if amount < total_outstanding => {
            credit_available.min(total_outstanding - amount)
        }
        _ => Money::ZERO,
    };

    let mut funds = amount + credit_drawn;
    let mut allocations = Vec::new();

    for period in outstanding {
        if funds.is_zero() {
            break;
        }
        let applied = funds.min(period.outstanding());
        let (base_portion, penalty_portion) =
            applied.split_proportional(period.outstanding_base(), period.outstanding_penalty());
        allocations.push(PaymentAllocation::new(
            account_id.clone(),
            period.key,
            applied,
            base_portion,
            penalty_portion,
            payment_date,
        )?);
        funds -= applied;
    }

    // the allocation carrying the credit movement is the last one touched,
    // so the credit history entry has an allocation to point back at
    let credit_remainder = funds;
    if let Some(last) = allocations.last_mut() {
        last.credit_delta = credit_remainder - credit_drawn;
    }

    Ok(AllocationPlan {
        allocations,
        credit_drawn,
        credit_remainder,
    })
}
