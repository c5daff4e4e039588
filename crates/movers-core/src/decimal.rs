//! Precision-safe decimal price type.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Venue prices arrive as
//! strings and are parsed straight into `Decimal`, so change percentages are
//! computed without floating-point drift.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Price with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Percentage change from `base` to `self`: `(self - base) / base * 100`.
    ///
    /// Returns None if `base` is zero or the result does not fit in a `Decimal`.
    #[inline]
    pub fn pct_from(&self, base: Price) -> Option<Decimal> {
        if base.is_zero() {
            return None;
        }
        self.0
            .checked_sub(base.0)?
            .checked_div(base.0)?
            .checked_mul(Decimal::ONE_HUNDRED)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Venue sends both plain ("0.0000123") and scientific ("1.23e-5") notation
        match Decimal::from_str(s) {
            Ok(d) => Ok(Self(d)),
            Err(_) => Ok(Self(Decimal::from_scientific(s)?)),
        }
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}
