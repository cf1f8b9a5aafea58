use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

/// Money stored as integer centavos for exact arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default, Hash)]
pub struct Money(i64);

/// migration tolerance in centavos for comparing against legacy float data
pub const LEGACY_TOLERANCE: Decimal = dec!(0.2);

impl Money {
    pub const ZERO: Money = Money(0);
    pub const CENTAVO: Money = Money(1);

    /// create from integer centavos
    pub fn from_centavos(centavos: i64) -> Self {
        Money(centavos)
    }

    /// create from whole pesos
    pub fn from_pesos(pesos: i64) -> Self {
        Money(pesos * 100)
    }

    /// boundary conversion: parse a decimal peso string into centavos, exactly once
    pub fn from_decimal_str(s: &str) -> Result<Self, rust_decimal::Error> {
        let d = Decimal::from_str(s)?;
        Ok(Money::from_decimal(d))
    }

    /// boundary conversion: decimal pesos into centavos, banker-free half-up rounding
    pub fn from_decimal(pesos: Decimal) -> Self {
        let centavos = (pesos * dec!(100)).round_dp_with_strategy(
            0,
            rust_decimal::RoundingStrategy::MidpointAwayFromZero,
        );
        // round_dp(0) keeps the value within i64 range for any realistic amount
        Money(centavos.to_i64().unwrap_or(i64::MAX))
    }

    /// lossy float entry point for legacy data; the conversion is logged
    pub fn from_f64_lossy(pesos: f64) -> Self {
        tracing::warn!(pesos, "lossy float-to-centavos conversion");
        Money::from_decimal(Decimal::from_f64_retain(pesos).unwrap_or_default())
    }

    /// raw centavos
    pub fn centavos(&self) -> i64 {
        self.0
    }

    /// boundary conversion: centavos back to decimal pesos
    pub fn to_decimal(&self) -> Decimal {
        Decimal::from(self.0) / dec!(100)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    pub fn max(self, other: Self) -> Self {
        Money(self.0.max(other.0))
    }

    /// rounding-tolerant equality for legacy/floating inputs
    pub fn approx_eq(&self, pesos: Decimal, tolerance_centavos: Decimal) -> bool {
        let diff = (Decimal::from(self.0) - pesos * dec!(100)).abs();
        diff <= tolerance_centavos
    }

    /// split `self` across a base/penalty pair proportionally to the pair,
    /// returning integer portions that sum exactly to `self`
    pub fn split_proportional(&self, base: Money, penalty: Money) -> (Money, Money) {
        let total = base.0 + penalty.0;
        if total <= 0 || self.0 <= 0 {
            return (Money(self.0.max(0)), Money::ZERO);
        }
        // half-up rounding in i128 to stay exact for any realistic amounts
        let numer = self.0 as i128 * base.0 as i128;
        let base_portion = ((numer + total as i128 / 2) / total as i128) as i64;
        let base_portion = base_portion.min(self.0);
        (Money(base_portion), Money(self.0 - base_portion))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::from_decimal_str(s)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, other: Money) -> Money {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Money) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, other: Money) -> Money {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Money) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        Money(iter.map(|m| m.0).sum())
    }
}

/// rate type for penalty percentages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Rate(Decimal);

impl Rate {
    pub const ZERO: Rate = Rate(Decimal::ZERO);

    /// create from decimal (e.g., 0.05 for 5%)
    pub fn from_decimal(d: Decimal) -> Self {
        Rate(d)
    }

    /// create from percentage (e.g., 5 for 5%)
    pub fn from_percentage(p: u32) -> Self {
        Rate(Decimal::from(p) / Decimal::from(100))
    }

    /// create from basis points (e.g., 500 for 5%)
    pub fn from_bps(bps: u32) -> Self {
        Rate(Decimal::from(bps) / Decimal::from(10000))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn as_percentage(&self) -> Decimal {
        self.0 * Decimal::from(100)
    }

    /// simple accrual factor for n cycles: r * n
    pub fn simple_factor(&self, cycles: u32) -> Decimal {
        self.0 * Decimal::from(cycles)
    }

    /// compound accrual factor for n cycles: (1 + r)^n - 1
    pub fn compound_factor(&self, cycles: u32) -> Decimal {
        let mut factor = Decimal::ONE;
        for _ in 0..cycles {
            factor *= Decimal::ONE + self.0;
        }
        factor - Decimal::ONE
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percentage())
    }
}

impl From<Decimal> for Rate {
    fn from(d: Decimal) -> Self {
        Rate::from_decimal(d)
    }
}
