//! Micro-unit money arithmetic for the gateway.
//!
//! External surfaces (request bodies, 402 responses, config files) use
//! human-readable strings such as `"$0.01"`. All internal arithmetic uses
//! [`MicroUsd`], an integer count of millionths of a dollar, so that summing
//! chain-step costs or comparing a quote against a budget never drifts the
//! way floating point would.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One millionth of a US dollar. `1 USD == 1_000_000 micros`.
pub const MICROS_PER_USD: u64 = 1_000_000;

/// An amount of money, stored as an integer count of micro-dollars.
///
/// Arithmetic (`+`, checked multiplication by a ratio) stays in integer
/// space; only formatting back to a string reintroduces decimal digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MicroUsd(u64);

/// Errors parsing a human-readable price string into [`MicroUsd`].
#[derive(Debug, Error)]
pub enum MoneyParseError {
    /// The string did not start with `$` or could not be parsed as a decimal.
    #[error("invalid money string: {0:?}")]
    Malformed(String),
    /// The value was negative.
    #[error("negative money amount: {0:?}")]
    Negative(String),
}

impl MicroUsd {
    /// The zero amount.
    pub const ZERO: Self = Self(0);

    /// Constructs a [`MicroUsd`] directly from a micro-dollar count.
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Returns the raw micro-dollar count.
    #[must_use]
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// Returns the value as a floating-point dollar amount, for display
    /// contexts only (never for arithmetic).
    #[must_use]
    pub fn as_dollars_f64(self) -> f64 {
        self.0 as f64 / MICROS_PER_USD as f64
    }

    /// Parses a string like `"$0.01"` or `"0.01"`, rounding away from zero
    /// to the nearest micro-dollar.
    ///
    /// Used for gateway-side pricing: registry costs, discovery markup, and
    /// anything quoted *to* a caller, where under-quoting would let the
    /// gateway absorb a loss silently.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyParseError`] if the string is not a decimal number or
    /// is negative.
    pub fn parse_round_away_from_zero(input: &str) -> Result<Self, MoneyParseError> {
        Self::parse_with_rounding(input, f64::ceil)
    }

    /// Parses a string like `"$0.001"` rounding toward zero (truncating).
    ///
    /// Used for budget checks against a caller-supplied cap, so a cost that
    /// only narrowly exceeds the cap is never silently rounded down into
    /// acceptance.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyParseError`] if the string is not a decimal number or
    /// is negative.
    pub fn parse_round_toward_zero(input: &str) -> Result<Self, MoneyParseError> {
        Self::parse_with_rounding(input, f64::trunc)
    }

    fn parse_with_rounding(input: &str, round: fn(f64) -> f64) -> Result<Self, MoneyParseError> {
        let trimmed = input.trim().trim_start_matches('$');
        let value: f64 = trimmed
            .parse()
            .map_err(|_| MoneyParseError::Malformed(input.to_owned()))?;
        if value < 0.0 {
            return Err(MoneyParseError::Negative(input.to_owned()));
        }
        let micros = round(value * MICROS_PER_USD as f64);
        Ok(Self(micros as u64))
    }

    /// Rounds up to the nearest multiple of `step` micro-dollars.
    #[must_use]
    pub const fn ceil_to_multiple(self, step: Self) -> Self {
        if step.0 == 0 {
            return self;
        }
        let remainder = self.0 % step.0;
        if remainder == 0 {
            self
        } else {
            Self(self.0 + (step.0 - remainder))
        }
    }

    /// Checked addition; returns `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Multiplies by an integer ratio (numerator/denominator), rounding down.
    #[must_use]
    pub fn mul_ratio(self, numerator: u64, denominator: u64) -> Self {
        if denominator == 0 {
            return Self::ZERO;
        }
        Self(self.0.saturating_mul(numerator) / denominator)
    }
}

impl Display for MicroUsd {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let dollars = self.0 / MICROS_PER_USD;
        let cents_micro = self.0 % MICROS_PER_USD;
        let mut frac = format!("{cents_micro:06}");
        while frac.len() > 2 && frac.ends_with('0') {
            frac.pop();
        }
        write!(f, "{dollars}.{frac}")
    }
}

impl Serialize for MicroUsd {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for MicroUsd {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = u64::deserialize(deserializer)?;
        Ok(Self(raw))
    }
}

/// Formats a [`MicroUsd`] amount as a `"$X.XX"` string for external surfaces.
#[must_use]
pub fn format_dollars(amount: MicroUsd) -> String {
    format!("${amount}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dollar_sign_prefixed_strings() {
        assert_eq!(
            MicroUsd::parse_round_away_from_zero("$0.01").unwrap(),
            MicroUsd::from_micros(10_000)
        );
    }

    #[test]
    fn rejects_negative_amounts() {
        assert!(MicroUsd::parse_round_away_from_zero("-$0.01").is_err());
    }

    #[test]
    fn round_away_from_zero_rounds_up_on_a_fraction() {
        // 0.0011 USD = 1100 micros exactly, no rounding needed; pick a value
        // that actually lands on a fraction of a micro.
        let parsed = MicroUsd::parse_round_away_from_zero("0.0000005").unwrap();
        assert_eq!(parsed, MicroUsd::from_micros(1));
    }

    #[test]
    fn round_toward_zero_truncates() {
        let parsed = MicroUsd::parse_round_toward_zero("0.0000009").unwrap();
        assert_eq!(parsed, MicroUsd::from_micros(0));
    }

    #[test]
    fn ceil_to_multiple_rounds_up_to_tenth_of_a_cent() {
        let step = MicroUsd::from_micros(1_000); // $0.001
        let amount = MicroUsd::from_micros(1_500); // $0.0015
        assert_eq!(amount.ceil_to_multiple(step), MicroUsd::from_micros(2_000));
    }

    #[test]
    fn display_trims_trailing_zeros_but_keeps_two_digits() {
        assert_eq!(format_dollars(MicroUsd::from_micros(10_000)), "$0.01");
        assert_eq!(format_dollars(MicroUsd::from_micros(500_000)), "$0.5");
        assert_eq!(format_dollars(MicroUsd::from_micros(1_000_000)), "$1.0");
    }
}
