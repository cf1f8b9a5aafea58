use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::errors::{BillingError, Result};
use crate::types::PeriodKey;

/// bill and due dates for one fiscal period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodBoundaries {
    /// first calendar day of the fiscal month
    pub bill_date: NaiveDate,
    /// configured due day of that same calendar month
    pub due_date: NaiveDate,
}

/// fiscal calendar math anchored to the client's configured timezone.
/// fiscal years are labeled by the calendar year in which they start.
#[derive(Debug, Clone, Copy)]
pub struct FiscalCalendar {
    start_month: u32,
    due_day: u32,
    offset: FixedOffset,
}

impl FiscalCalendar {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or(
            BillingError::InvalidConfiguration {
                message: format!("utc offset out of range: {}", config.utc_offset_minutes),
            },
        )?;
        Ok(Self {
            start_month: config.fiscal_year_start_month,
            due_day: config.due_day,
            offset,
        })
    }

    /// map a calendar year/month to (fiscal year, fiscal month index 0..11)
    pub fn calendar_to_fiscal(&self, year: i32, month: u32) -> Result<PeriodKey> {
        if !(1..=12).contains(&month) {
            return Err(BillingError::InvalidDate {
                message: format!("calendar month out of range: {month}"),
            });
        }
        let fiscal_month =
            (month as i32 - self.start_month as i32).rem_euclid(12) as u8;
        let fiscal_year = if month >= self.start_month { year } else { year - 1 };
        PeriodKey::new(fiscal_year, fiscal_month)
    }

    /// map a fiscal period back to its (calendar year, calendar month)
    pub fn fiscal_to_calendar(&self, key: PeriodKey) -> (i32, u32) {
        let month0 = self.start_month - 1 + key.fiscal_month as u32;
        (key.fiscal_year + (month0 / 12) as i32, month0 % 12 + 1)
    }

    /// bill date (first of month) and due date for a fiscal period.
    /// the due day is clamped to the month's length (due day 31 in a
    /// 30-day month falls on the 30th).
    pub fn period_boundaries(&self, key: PeriodKey) -> Result<PeriodBoundaries> {
        let (year, month) = self.fiscal_to_calendar(key);
        let bill_date = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            BillingError::InvalidDate {
                message: format!("no first day for {year}-{month:02}"),
            }
        })?;
        let due_day = self.due_day.min(days_in_month(year, month));
        let due_date = NaiveDate::from_ymd_opt(year, month, due_day).ok_or_else(|| {
            BillingError::InvalidDate {
                message: format!("no day {due_day} in {year}-{month:02}"),
            }
        })?;
        Ok(PeriodBoundaries { bill_date, due_date })
    }

    /// fiscal period containing a calendar date
    pub fn period_for_date(&self, date: NaiveDate) -> Result<PeriodKey> {
        self.calendar_to_fiscal(date.year(), date.month())
    }

    /// calendar date of an instant in the client's timezone, never the
    /// process-local or UTC date
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    // both dates exist for any valid (year, month)
    next.and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}
