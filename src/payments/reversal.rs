use crate::credit::CreditEntry;
use crate::errors::{BillingError, Result};
use crate::money::Money;
use crate::store::BillingStore;
use crate::types::{AccountId, PaymentAllocation, PeriodKey, TransactionId};

/// what a reversal undid, for event emission and the follow-up
/// penalty/cache passes
#[derive(Debug, Clone)]
pub struct ReversalOutcome {
    pub account_id: AccountId,
    pub amount_restored: Money,
    pub allocations_removed: Vec<PaymentAllocation>,
    pub credit_entry_removed: Option<CreditEntry>,
    /// earliest payment date among the removed allocations; penalties
    /// resume accruing from the state as of this date
    pub earliest_payment_date: Option<chrono::NaiveDate>,
}

/// exactly undo a payment's effect on the source documents: remove its
/// allocation entries (not zero them), subtract the applied amounts from
/// each period's paid amount, and invert the linked credit delta.
///
/// everything is validated before the first write, so a failed reversal
/// leaves the store untouched. re-applying then reversing the same payment
/// returns the account state to its prior value with integer equality.
pub fn reverse(store: &mut BillingStore, transaction_id: TransactionId) -> Result<ReversalOutcome> {
    // locate every allocation stamped with this transaction
    let mut touched: Vec<(AccountId, PeriodKey)> = Vec::new();
    for account_id in store.account_ids() {
        for period in store.periods(&account_id)? {
            if period
                .payments
                .iter()
                .any(|p| p.transaction_id == Some(transaction_id))
            {
                touched.push((account_id.clone(), period.key));
            }
        }
    }

    let account_id = match touched.first() {
        Some((account_id, _)) => account_id.clone(),
        None => {
            // a pure prepayment touches no period but still has a credit entry
            match store.account_ids().into_iter().find(|id| {
                store
                    .credit(id)
                    .map(|c| c.entry_for_transaction(transaction_id).is_some())
                    .unwrap_or(false)
            }) {
                Some(account_id) => account_id,
                None => return Err(BillingError::TransactionNotFound { transaction_id }),
            }
        }
    };

    // verify the credit inversion cannot overdraw before mutating anything
    let credit = store.credit(&account_id)?;
    if let Some(entry) = credit.entry_for_transaction(transaction_id) {
        if (credit.balance() - entry.delta).is_negative() {
            return Err(BillingError::CreditOverdraw {
                balance: credit.balance(),
                requested: entry.delta,
            });
        }
    }

    // remove allocations and restore paid amounts
    let mut allocations_removed = Vec::new();
    for (account, key) in &touched {
        let period = store.period_mut(account, *key)?;
        let mut kept = Vec::with_capacity(period.payments.len());
        for allocation in period.payments.drain(..) {
            if allocation.transaction_id == Some(transaction_id) {
                period.paid_amount -= allocation.amount_applied;
                allocations_removed.push(allocation);
            } else {
                kept.push(allocation);
            }
        }
        period.payments = kept;
    }

    // invert the credit movement via its exact history entry
    let credit_entry_removed = {
        let credit = store.credit_mut(&account_id)?;
        if credit.entry_for_transaction(transaction_id).is_some() {
            Some(credit.remove_entry(transaction_id)?)
        } else {
            None
        }
    };

    let amount_restored = allocations_removed.iter().map(|a| a.amount_applied).sum();
    let earliest_payment_date = allocations_removed.iter().map(|a| a.payment_date).min();

    Ok(ReversalOutcome {
        account_id,
        amount_restored,
        allocations_removed,
        credit_entry_removed,
        earliest_payment_date,
    })
}
