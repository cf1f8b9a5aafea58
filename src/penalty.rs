use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Instant;

use crate::config::PenaltyPolicy;
use crate::money::Money;
use crate::store::BillingStore;
use crate::types::{AccountScope, BillStatus, RecalcResult};

/// penalty recalculation service. one code path serves both the full
/// nightly batch and the single-account pass inside a payment flow, so the
/// two can never drift apart.
#[derive(Debug, Clone)]
pub struct PenaltyEngine {
    policy: PenaltyPolicy,
}

impl PenaltyEngine {
    pub fn new(policy: PenaltyPolicy) -> Self {
        Self { policy }
    }

    /// elapsed full monthly billing cycles between the due date and the
    /// as-of date. a started month past due counts as a full cycle;
    /// `as_of <= due` is zero cycles.
    pub fn elapsed_cycles(due: NaiveDate, as_of: NaiveDate) -> u32 {
        if as_of <= due {
            return 0;
        }
        let months = (as_of.year() - due.year()) * 12 + as_of.month() as i32
            - due.month() as i32;
        let cycles = if as_of.day() > due.day() { months + 1 } else { months };
        cycles.max(0) as u32
    }

    /// penalty accrued on an outstanding base over n cycles, rounded
    /// half-up to whole centavos
    pub fn accrue(&self, outstanding_base: Money, cycles: u32) -> Money {
        if cycles == 0 || !outstanding_base.is_positive() {
            return Money::ZERO;
        }
        let factor = if self.policy.compound {
            self.policy.rate.compound_factor(cycles)
        } else {
            self.policy.rate.simple_factor(cycles)
        };
        let centavos = (Decimal::from(outstanding_base.centavos()) * factor)
            .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero);
        Money::from_centavos(centavos.to_i64().unwrap_or(0))
    }

    /// recompute penalty interest for every unpaid or partially-paid period
    /// in scope, as of an explicit date. fully-paid periods are skipped
    /// before any arithmetic and their penalties stay frozen. a period
    /// without a due date is logged and skipped, never fatal to the batch.
    ///
    /// the stored penalty is derived only from the base charge and the
    /// allocation list (`paid_penalty + accrual(outstanding_base)`), so
    /// repeated calls with the same as-of date are idempotent.
    pub fn recalculate(
        &self,
        store: &mut BillingStore,
        scope: &AccountScope,
        as_of: NaiveDate,
    ) -> RecalcResult {
        let started = Instant::now();
        let mut result = RecalcResult::default();

        for account_id in store.account_ids() {
            if !scope.contains(&account_id) {
                // counted without touching any period document
                result.periods_skipped_out_of_scope += store.period_count(&account_id);
                continue;
            }
            let periods = match store.periods_mut(&account_id) {
                Ok(periods) => periods,
                Err(_) => continue,
            };
            for period in periods {
                if period.status() == BillStatus::Paid {
                    result.periods_skipped_paid += 1;
                    continue;
                }
                let due = match period.due_date {
                    Some(due) => due,
                    None => {
                        tracing::warn!(
                            account_id = %period.account_id,
                            period = %period.key,
                            "billing period missing due date, skipping penalty recalculation"
                        );
                        result.periods_skipped_malformed += 1;
                        continue;
                    }
                };
                let cycles = Self::elapsed_cycles(due, as_of);
                period.penalty_amount =
                    period.paid_penalty() + self.accrue(period.outstanding_base(), cycles);
                result.periods_processed += 1;
            }
        }

        result.duration_ms = started.elapsed().as_millis();
        result
    }
}
