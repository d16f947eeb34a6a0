//! Fixed-point monetary amounts.
//!
//! Wraps `rust_decimal` so amounts are exact. The raw scale of an amount is
//! preserved as received, which lets validation detect (and correct) amounts
//! carrying more than the two minor-unit decimal places a payment allows.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

/// A monetary amount.
///
/// # Examples
///
/// ```
/// use std::str::FromStr;
/// use swift_pipeline::Amount;
///
/// let amount = Amount::from_str("10000.5").unwrap();
/// assert_eq!(amount.to_string(), "10000.50");
/// assert_eq!(amount.leading_digit(), Some(1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(Decimal);

impl Amount {
    /// Number of minor-unit decimal places a settled amount carries.
    pub const MINOR_UNITS: u32 = 2;

    /// Zero value.
    pub const ZERO: Self = Amount(Decimal::ZERO);

    /// Creates an amount from a `Decimal`, keeping its scale.
    pub fn new(value: Decimal) -> Self {
        Amount(value)
    }

    /// Returns the underlying decimal.
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Returns `true` if this value is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns `true` if this value is below zero.
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Number of significant decimal places, ignoring trailing zeros.
    pub fn precision(&self) -> u32 {
        self.0.normalize().scale()
    }

    /// Returns `true` if the amount carries more than [`Self::MINOR_UNITS`] decimals.
    pub fn exceeds_minor_units(&self) -> bool {
        self.precision() > Self::MINOR_UNITS
    }

    /// Rounds half away from zero to minor units.
    pub fn rounded(&self) -> Self {
        let mut value = self
            .0
            .round_dp_with_strategy(Self::MINOR_UNITS, RoundingStrategy::MidpointAwayFromZero);
        value.rescale(Self::MINOR_UNITS);
        Amount(value)
    }

    /// Returns `percent` % of this amount, truncated to minor units.
    ///
    /// Shares never round up, so shares of at most 100 % in total never
    /// exceed the amount they were taken from.
    pub fn percent(&self, percent: Decimal) -> Self {
        let mut value = (self.0 * percent / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(Self::MINOR_UNITS, RoundingStrategy::ToZero);
        value.rescale(Self::MINOR_UNITS);
        Amount(value)
    }

    /// First non-zero digit of the amount, used by first-digit analysis.
    pub fn leading_digit(&self) -> Option<u8> {
        self.0
            .abs()
            .to_string()
            .bytes()
            .find(|b| (b'1'..=b'9').contains(b))
            .map(|b| b - b'0')
    }

    /// Returns `true` if the amount is an exact multiple of `step`.
    pub fn is_multiple_of(&self, step: Decimal) -> bool {
        !step.is_zero() && (self.0 % step).is_zero()
    }

    /// Integer part rendered as digits, for digit-pattern heuristics.
    pub fn whole_digits(&self) -> String {
        self.0.abs().trunc().to_string()
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount::new(value)
    }
}

impl FromStr for Amount {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let decimal = Decimal::from_str(trimmed)?;
        Ok(Amount::new(decimal))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exceeds_minor_units() {
            write!(f, "{}", self.0)
        } else {
            let mut value = self.0;
            value.rescale(Self::MINOR_UNITS);
            write!(f, "{}", value)
        }
    }
}

impl Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + *a)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}
