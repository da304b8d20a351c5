//! Fixed-point decimal types for prices and quantities
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Repeated partial fills must keep `filled + unfilled == original` exact,
//! which binary floating point cannot guarantee.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use crate::errors::NumericError;

/// Maximum number of fractional digits accepted for prices and quantities.
///
/// Matches the ledger column scale (precision 18, scale 8).
pub const MAX_SCALE: u32 = 8;

/// Maximum number of integer digits accepted for prices and quantities.
///
/// Precision 18 minus scale 8. Also keeps `price × 10^7` and
/// `price × quantity` well inside the 96-bit decimal mantissa.
pub const MAX_INTEGER_DIGITS: u32 = 10;

fn check_magnitude(value: Decimal) -> Result<(), NumericError> {
    let normalized = value.normalize();
    if normalized.scale() > MAX_SCALE {
        return Err(NumericError::ScaleTooLarge {
            value: value.to_string(),
            max: MAX_SCALE,
        });
    }
    if normalized.abs() >= Decimal::from(10u64.pow(MAX_INTEGER_DIGITS)) {
        return Err(NumericError::TooLarge {
            value: value.to_string(),
            max_digits: MAX_INTEGER_DIGITS,
        });
    }
    Ok(())
}

/// A strictly positive limit or execution price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    /// Validate and wrap a decimal price.
    pub fn new(value: Decimal) -> Result<Self, NumericError> {
        if value <= Decimal::ZERO {
            return Err(NumericError::NonPositive(value.to_string()));
        }
        check_magnitude(value)?;
        Ok(Self(value.normalize()))
    }

    /// Whole-number price, mostly for tests and fixtures.
    ///
    /// Clamped into the accepted range: zero becomes the smallest price
    /// and anything with too many digits the largest.
    pub fn from_u64(value: u64) -> Self {
        if value == 0 {
            return Self(Decimal::new(1, MAX_SCALE));
        }
        let ceiling = 10u64.pow(MAX_INTEGER_DIGITS) - 1;
        Self(Decimal::from(value.min(ceiling)))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, NumericError> {
        let value = Decimal::from_str_exact(s.trim())
            .map_err(|_| NumericError::Unparsable(s.to_string()))?;
        Self::new(value)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = NumericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Price::from_str(s)
    }
}

impl TryFrom<Decimal> for Price {
    type Error = NumericError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Price> for Decimal {
    fn from(p: Price) -> Self {
        p.0
    }
}

/// A non-negative order or trade quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Validate and wrap a decimal quantity (zero allowed, negative not).
    pub fn try_new(value: Decimal) -> Result<Self, NumericError> {
        if value < Decimal::ZERO {
            return Err(NumericError::Negative(value.to_string()));
        }
        check_magnitude(value)?;
        Ok(Self(value.normalize()))
    }

    /// Like [`Quantity::try_new`] but additionally rejects zero.
    pub fn positive(value: Decimal) -> Result<Self, NumericError> {
        if value <= Decimal::ZERO {
            return Err(NumericError::NonPositive(value.to_string()));
        }
        Self::try_new(value)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, NumericError> {
        let value = Decimal::from_str_exact(s.trim())
            .map_err(|_| NumericError::Unparsable(s.to_string()))?;
        Self::try_new(value)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Subtraction that refuses to go below zero.
    pub fn checked_sub(self, rhs: Quantity) -> Option<Quantity> {
        let value = self.0 - rhs.0;
        if value < Decimal::ZERO {
            None
        } else {
            Some(Self(value.normalize()))
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Quantity {
    type Err = NumericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quantity::from_str(s)
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = NumericError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(q: Quantity) -> Self {
        q.0
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity((self.0 + rhs.0).normalize())
    }
}

/// Saturating at zero; use [`Quantity::checked_sub`] when underflow matters.
impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Quantity) -> Quantity {
        self.checked_sub(rhs).unwrap_or_else(Quantity::zero)
    }
}
