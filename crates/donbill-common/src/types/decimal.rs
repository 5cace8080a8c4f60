//! Precision-tagged decimals
//!
//! Credit accounting never touches binary floating point. Values that leave
//! this system as strings carry the number of decimal places they are
//! published with, and are banker's-rounded to that precision.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Decimal places used for serialized per-node spend values
pub const SPEND_VALUE_PRECISION: u32 = 18;

/// Decimal places used for published capability spend limits
pub const SPEND_LIMIT_PRECISION: u32 = 3;

/// Largest scale a `Decimal` can represent
pub const MAX_PRECISION: u32 = 28;

/// Decimal value tagged with the precision it is formatted at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendDecimal {
    value: Decimal,
    precision: u32,
}

impl SpendDecimal {
    /// Tag a value with an explicit precision (clamped to the decimal scale limit)
    pub fn new(value: Decimal, precision: u32) -> Self {
        Self {
            value,
            precision: precision.min(MAX_PRECISION),
        }
    }

    /// Tag a value for use as a serialized spend value
    pub fn spend_value(value: Decimal) -> Self {
        Self::new(value, SPEND_VALUE_PRECISION)
    }

    /// Tag a value for use as a published spend limit
    pub fn spend_limit(value: Decimal) -> Self {
        Self::new(value, SPEND_LIMIT_PRECISION)
    }

    /// Unrounded value
    #[inline]
    pub fn value(&self) -> Decimal {
        self.value
    }

    #[inline]
    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Value banker's-rounded to the tagged precision
    pub fn rounded(&self) -> Decimal {
        self.value
            .round_dp_with_strategy(self.precision, RoundingStrategy::MidpointNearestEven)
    }

    /// Fixed-point string with exactly `precision` fractional digits
    ///
    /// Large values keep every fractional digit; zeros past the decimal's
    /// representable scale are padded in the string.
    pub fn to_fixed(&self) -> String {
        format!("{:.*}", self.precision as usize, self.rounded())
    }
}

impl fmt::Display for SpendDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_fixed())
    }
}

/// Parse a decimal string as sent over the billing boundary.
///
/// Accepts plain (`"12.5"`) and scientific (`"1.25e1"`) notation.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}
