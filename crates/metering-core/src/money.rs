//! Fixed-point USD amounts.
//!
//! All monetary values in the service are micro-dollars (six decimal places)
//! stored in an `i64`. High-volume accumulation therefore never drifts the
//! way repeated `f64` addition does, and ceiling comparisons are exact
//! integer comparisons. Floats appear only at the edges: configuration input
//! and API output.

use serde::{Deserialize, Serialize};

/// Micro-dollars in one dollar.
const MICROS_PER_USD: i64 = 1_000_000;

/// A USD amount with six fixed decimal places.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UsdMicros(i64);

impl UsdMicros {
    /// Zero dollars.
    pub const ZERO: Self = Self(0);

    /// Construct from a raw micro-dollar count.
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Construct from a floating-point USD amount, rounding half away from
    /// zero at the sixth decimal.
    #[must_use]
    pub fn from_usd(usd: f64) -> Self {
        Self((usd * MICROS_PER_USD as f64).round() as i64)
    }

    /// The raw micro-dollar count.
    #[must_use]
    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// The amount as floating-point USD, for presentation only.
    #[must_use]
    pub fn as_usd(self) -> f64 {
        self.0 as f64 / MICROS_PER_USD as f64
    }

    /// Saturating addition.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Saturating subtraction.
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Checked addition.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Whether the amount is below zero.
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl std::ops::Add for UsdMicros {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for UsdMicros {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl std::iter::Sum for UsdMicros {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

impl std::fmt::Display for UsdMicros {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(
            f,
            "{sign}{}.{:06}",
            abs / MICROS_PER_USD as u64,
            abs % MICROS_PER_USD as u64
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_usd_rounding() {
        assert_eq!(UsdMicros::from_usd(0.5).as_micros(), 500_000);
        assert_eq!(UsdMicros::from_usd(0.51).as_micros(), 510_000);
        assert_eq!(UsdMicros::from_usd(19.50).as_micros(), 19_500_000);
        // Rounded at the sixth decimal
        assert_eq!(UsdMicros::from_usd(0.000_000_4).as_micros(), 0);
        assert_eq!(UsdMicros::from_usd(0.000_000_6).as_micros(), 1);
    }

    #[test]
    fn test_arithmetic() {
        let a = UsdMicros::from_usd(19.50);
        let b = UsdMicros::from_usd(0.50);
        assert_eq!(a + b, UsdMicros::from_usd(20.00));
        assert_eq!(a - b, UsdMicros::from_usd(19.00));
        assert!((a - a - b).is_negative());
    }

    #[test]
    fn test_accumulation_is_exact() {
        // 0.1 added ten thousand times is exactly 1000.00 in fixed point,
        // which is not true of f64 accumulation.
        let step = UsdMicros::from_usd(0.1);
        let total: UsdMicros = std::iter::repeat(step).take(10_000).sum();
        assert_eq!(total, UsdMicros::from_usd(1000.0));
    }

    #[test]
    fn test_display() {
        assert_eq!(UsdMicros::from_usd(20.0).to_string(), "20.000000");
        assert_eq!(UsdMicros::from_micros(-510_000).to_string(), "-0.510000");
    }

    #[test]
    fn test_serde_is_integer_micros() {
        let json = serde_json::to_string(&UsdMicros::from_usd(1.25)).unwrap();
        assert_eq!(json, "1250000");
        let back: UsdMicros = serde_json::from_str(&json).unwrap();
        assert_eq!(back, UsdMicros::from_usd(1.25));
    }
}
