//! Stock quantities and units of measure.

use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// Signed decimal quantity of stock.
///
/// Conceptually unsigned in normal operation; negative values only appear as
/// deltas or on correction paths that explicitly allow negative stock.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    /// Largest magnitude accepted on input (10^15). Keeps every realistic
    /// running total well inside `Decimal` range.
    pub const MAX: Quantity = Quantity(Decimal::from_parts(0xA4C6_8000, 0x0003_8D7E, 0, false, 0));

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn from_i64(value: i64) -> Self {
        Self(Decimal::from(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Rejects zero, negative and out-of-range values with a validation
    /// error naming `field`.
    pub fn ensure_positive(self, field: &str) -> Result<Self, DomainError> {
        if !self.is_positive() {
            return Err(DomainError::validation(format!(
                "{field} must be positive (got {self})"
            )));
        }
        self.ensure_in_range(field)
    }

    /// Rejects negative and out-of-range values with a validation error
    /// naming `field`.
    pub fn ensure_non_negative(self, field: &str) -> Result<Self, DomainError> {
        if self.is_negative() {
            return Err(DomainError::validation(format!(
                "{field} cannot be negative (got {self})"
            )));
        }
        self.ensure_in_range(field)
    }

    fn ensure_in_range(self, field: &str) -> Result<Self, DomainError> {
        if self.abs() > Self::MAX {
            Err(DomainError::validation(format!(
                "{field} exceeds the maximum of {} (got {self})",
                Self::MAX
            )))
        } else {
            Ok(self)
        }
    }

    /// Addition that reports overflow instead of panicking.
    pub fn checked_add(self, rhs: Self) -> Result<Self, DomainError> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or_else(|| DomainError::validation(format!("quantity overflow adding {rhs} to {self}")))
    }

    /// Subtraction that reports overflow instead of panicking.
    pub fn checked_sub(self, rhs: Self) -> Result<Self, DomainError> {
        self.0
            .checked_sub(rhs.0)
            .map(Self)
            .ok_or_else(|| {
                DomainError::validation(format!("quantity overflow subtracting {rhs} from {self}"))
            })
    }
}

impl ValueObject for Quantity {}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0.normalize(), f)
    }
}

impl From<Decimal> for Quantity {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl FromStr for Quantity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim())
            .map(Self)
            .map_err(|e| DomainError::validation(format!("invalid quantity '{s}': {e}")))
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Quantity {
    type Output = Quantity;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Quantity {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl core::iter::Sum for Quantity {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Quantity::ZERO, |acc, q| acc + q)
    }
}

/// Unit of measure label ("pcs", "kg", "box").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uom(String);

impl Uom {
    pub fn new(label: impl Into<String>) -> Result<Self, DomainError> {
        let label = label.into();
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("unit of measure cannot be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Piece count, used when neither the line nor the product specify a unit.
    pub fn pieces() -> Self {
        Self("pcs".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Uom {}

impl Default for Uom {
    fn default() -> Self {
        Self::pieces()
    }
}

impl core::fmt::Display for Uom {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn zero_is_neither_positive_nor_negative() {
        assert!(!Quantity::ZERO.is_positive());
        assert!(!Quantity::ZERO.is_negative());
        assert!(Quantity::new(dec!(-0.5)).is_negative());
    }

    #[test]
    fn ensure_positive_rejects_zero() {
        let err = Quantity::ZERO.ensure_positive("qty_received").unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.contains("qty_received")),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(Quantity::ZERO.ensure_non_negative("qty_counted").is_ok());
    }

    #[test]
    fn decimal_arithmetic_is_exact() {
        let q = Quantity::new(dec!(0.1)) + Quantity::new(dec!(0.2));
        assert_eq!(q, Quantity::new(dec!(0.3)));
        assert_eq!(q.to_string(), "0.3");
    }

    #[test]
    fn oversized_input_is_rejected() {
        let huge = Quantity::new(Decimal::MAX);
        let err = huge.ensure_positive("qty_received").unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref msg) if msg.contains("maximum")));
        assert!(Quantity::new(-Decimal::MAX).ensure_non_negative("qty").is_err());

        assert_eq!(Quantity::MAX.value(), Decimal::from(1_000_000_000_000_000i64));
        assert!(Quantity::MAX.ensure_positive("qty").is_ok());
        assert!((Quantity::MAX + Quantity::new(dec!(0.001))).ensure_positive("qty").is_err());
    }

    #[test]
    fn checked_arithmetic_reports_overflow() {
        let top = Quantity::new(Decimal::MAX);
        assert!(matches!(
            top.checked_add(Quantity::from_i64(1)),
            Err(DomainError::Validation(_))
        ));
        assert!(Quantity::new(Decimal::MIN).checked_sub(Quantity::from_i64(1)).is_err());
        assert_eq!(
            Quantity::from_i64(2).checked_sub(Quantity::from_i64(5)).unwrap(),
            Quantity::from_i64(-3)
        );
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&Quantity::new(dec!(12.50))).unwrap();
        assert_eq!(json, "\"12.50\"");
    }

    #[test]
    fn uom_is_trimmed_and_non_empty() {
        assert_eq!(Uom::new(" kg ").unwrap().as_str(), "kg");
        assert!(Uom::new("   ").is_err());
    }
}
