use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::errors::{BillingError, Result};
use crate::money::Rate;

/// per-client billing configuration, read-only from the engine's perspective
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// calendar month (1-12) on which the fiscal year starts
    pub fiscal_year_start_month: u32,
    /// day of month bills fall due
    pub due_day: u32,
    /// client timezone as a fixed UTC offset in minutes
    pub utc_offset_minutes: i32,
    pub penalty_policy: PenaltyPolicy,
    pub credit_policy: CreditPolicy,
}

/// penalty interest policy applied per elapsed billing cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyPolicy {
    /// rate per monthly cycle (e.g., 5%)
    pub rate: Rate,
    /// compound across cycles instead of simple accrual
    pub compound: bool,
}

impl PenaltyPolicy {
    pub fn monthly(rate: Rate) -> Self {
        Self { rate, compound: true }
    }
}

/// how underpayments interact with an existing credit balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditPolicy {
    /// never draw on credit automatically; overpayments accumulate
    HoldAsCredit,
    /// draw down available credit to cover a shortfall, capped at the balance
    AutoDraw,
}

impl ClientConfig {
    pub fn new(
        fiscal_year_start_month: u32,
        due_day: u32,
        utc_offset_minutes: i32,
        penalty_policy: PenaltyPolicy,
        credit_policy: CreditPolicy,
    ) -> Result<Self> {
        let config = Self {
            fiscal_year_start_month,
            due_day,
            utc_offset_minutes,
            penalty_policy,
            credit_policy,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=12).contains(&self.fiscal_year_start_month) {
            return Err(BillingError::InvalidConfiguration {
                message: format!(
                    "fiscal year start month out of range: {}",
                    self.fiscal_year_start_month
                ),
            });
        }
        if !(1..=31).contains(&self.due_day) {
            return Err(BillingError::InvalidConfiguration {
                message: format!("due day out of range: {}", self.due_day),
            });
        }
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(BillingError::InvalidConfiguration {
                message: format!("utc offset out of range: {}", self.utc_offset_minutes),
            });
        }
        Ok(())
    }

    /// typical HOA water-billing setup: fiscal year starts in July, bills due
    /// on the 10th, 5% compounding monthly penalty, UTC-5
    pub fn hoa_water() -> Self {
        Self {
            fiscal_year_start_month: 7,
            due_day: 10,
            utc_offset_minutes: -5 * 60,
            penalty_policy: PenaltyPolicy {
                rate: Rate::from_decimal(dec!(0.05)),
                compound: true,
            },
            credit_policy: CreditPolicy::HoldAsCredit,
        }
    }

    /// calendar-year client with credit auto-draw enabled
    pub fn calendar_year_autodraw() -> Self {
        Self {
            fiscal_year_start_month: 1,
            due_day: 10,
            utc_offset_minutes: -6 * 60,
            penalty_policy: PenaltyPolicy {
                rate: Rate::from_decimal(dec!(0.05)),
                compound: true,
            },
            credit_policy: CreditPolicy::AutoDraw,
        }
    }
}
