//! Exact decimal values for prices and quantities
//!
//! `Fixed` wraps `rust_decimal::Decimal` so prices never pass through floating point.
//! Exchanges that want scaled integers (Phemex `priceEp`) go through
//! `to_scaled_i64` / `from_scaled`, and order reconciliation compares numeric strings
//! with `numeric_eq` instead of byte equality.

use rust_decimal::{Decimal, RoundingStrategy, prelude::*};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Decimal value used for every price and quantity crossing an exchange boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fixed {
    value: Decimal,
}

impl Fixed {
    pub const ZERO: Fixed = Fixed { value: Decimal::ZERO };

    pub const ONE: Fixed = Fixed { value: Decimal::ONE };

    pub fn from_decimal(value: Decimal) -> Self {
        Fixed { value }
    }

    pub fn from_i64(value: i64) -> Self {
        Fixed { value: Decimal::from(value) }
    }

    pub fn from_f64(value: f64) -> Result<Self, FixedError> {
        Decimal::try_from(value)
            .map(Self::from_decimal)
            .map_err(|_| FixedError::InvalidValue(value.to_string()))
    }

    pub fn from_str_exact(s: &str) -> Result<Self, FixedError> {
        Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .map(Self::from_decimal)
            .map_err(|_| FixedError::InvalidValue(s.to_string()))
    }

    /// Build from an integer that was scaled by `10^scale`.
    pub fn from_scaled(value: i64, scale: u32) -> Result<Self, FixedError> {
        let divider = pow10(scale)?;
        Ok(Fixed { value: Decimal::from(value) / divider })
    }

    /// Multiply by `10^scale`, round half away from zero and return the integer.
    pub fn to_scaled_i64(&self, scale: u32) -> Result<i64, FixedError> {
        let divider = pow10(scale)?;
        let scaled = self
            .value
            .checked_mul(divider)
            .ok_or(FixedError::Overflow)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        scaled.to_i64().ok_or(FixedError::Overflow)
    }

    pub fn to_decimal(&self) -> Decimal {
        self.value
    }

    pub fn to_f64(&self) -> f64 {
        self.value.to_f64().unwrap_or(0.0)
    }

    /// Integer value when there is no fractional part.
    pub fn to_integer(&self) -> Result<i64, FixedError> {
        if !self.value.fract().is_zero() {
            return Err(FixedError::NotInteger(self.to_string()));
        }
        self.value.to_i64().ok_or(FixedError::Overflow)
    }

    /// Plain string without trailing zeros: "1.500" becomes "1.5".
    pub fn to_flat_string(&self) -> String {
        self.value.normalize().to_string()
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.value.is_sign_negative() && !self.value.is_zero()
    }

    pub fn abs(&self) -> Self {
        Fixed { value: self.value.abs() }
    }

    /// Round to the nearest integer, half away from zero.
    pub fn round(&self) -> Self {
        Fixed {
            value: self.value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
        }
    }

    pub fn round_dp(&self, dp: u32) -> Self {
        Fixed { value: self.value.round_dp(dp) }
    }

    /// Floor to `dp` decimal places.
    pub fn floor_dp(&self, dp: u32) -> Self {
        Fixed {
            value: self.value.round_dp_with_strategy(dp, RoundingStrategy::ToNegativeInfinity),
        }
    }

    /// Floor to a multiple of `step` (tick size or lot size).
    pub fn floor_to_step(&self, step: Fixed) -> Result<Self, FixedError> {
        if step.is_zero() {
            return Err(FixedError::DivisionByZero);
        }
        let steps = (self.value / step.value).floor();
        Ok(Fixed { value: steps * step.value })
    }
}

/// `10^scale` as a decimal.
pub fn pow10(scale: u32) -> Result<Decimal, FixedError> {
    if scale > 28 {
        return Err(FixedError::ScaleOutOfRange(scale as i64));
    }
    Ok(Decimal::from_i128_with_scale(10i128.pow(scale), 0))
}

/// Number of decimal places implied by a tick size such as "0.0100".
pub fn precision_from_tick_size(tick_size: &str) -> Option<u32> {
    let tick = Fixed::from_str_exact(tick_size).ok()?;
    if tick.is_zero() || tick.is_negative() {
        return None;
    }
    Some(tick.value.normalize().scale())
}

/// Compare two numeric strings by value. Non-numeric input is never equal.
pub fn numeric_eq(a: &str, b: &str) -> bool {
    match (Fixed::from_str_exact(a), Fixed::from_str_exact(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FixedError {
    #[error("invalid decimal value: {0}")]
    InvalidValue(String),
    #[error("value is not an integer: {0}")]
    NotInteger(String),
    #[error("scale out of range: {0}")]
    ScaleOutOfRange(i64),
    #[error("division by zero")]
    DivisionByZero,
    #[error("overflow in arithmetic operation")]
    Overflow,
}

impl Add for Fixed {
    type Output = Fixed;

    fn add(self, rhs: Self) -> Self::Output {
        Fixed { value: self.value + rhs.value }
    }
}

impl Sub for Fixed {
    type Output = Fixed;

    fn sub(self, rhs: Self) -> Self::Output {
        Fixed { value: self.value - rhs.value }
    }
}

impl Mul for Fixed {
    type Output = Fixed;

    fn mul(self, rhs: Self) -> Self::Output {
        Fixed { value: self.value * rhs.value }
    }
}

impl Div for Fixed {
    type Output = Fixed;

    fn div(self, rhs: Self) -> Self::Output {
        Fixed { value: self.value / rhs.value }
    }
}

impl Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl FromStr for Fixed {
    type Err = FixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_exact(s)
    }
}

impl From<Decimal> for Fixed {
    fn from(value: Decimal) -> Self {
        Fixed { value }
    }
}

impl From<Fixed> for Decimal {
    fn from(fixed: Fixed) -> Self {
        fixed.value
    }
}

/// Convenience macro for creating Fixed values in tests and constants
#[macro_export]
macro_rules! fixed {
    ($value:expr) => {
        $crate::fixed::Fixed::from_str_exact(stringify!($value)).unwrap()
    };
}
