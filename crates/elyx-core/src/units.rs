//! Compile-time unit safety for fleet quantities.
//!
//! Prevents mixing incompatible units like power and energy. All types use
//! `#[repr(transparent)]` so they have the same memory layout as `f64` and
//! carry no runtime overhead.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Macro to implement common arithmetic operations for unit types
macro_rules! impl_unit_ops {
    ($type:ty, $unit_name:literal) => {
        impl Add for $type {
            type Output = Self;
            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $type {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $type {
            type Output = Self;
            fn neg(self) -> Self::Output {
                Self(-self.0)
            }
        }

        impl Mul<f64> for $type {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl Div<f64> for $type {
            type Output = Self;
            fn div(self, rhs: f64) -> Self::Output {
                Self(self.0 / rhs)
            }
        }

        impl $type {
            /// Raw numeric value.
            #[inline]
            pub fn value(&self) -> f64 {
                self.0
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{} {}", self.0, $unit_name)
            }
        }
    };
}

/// Active power in megawatts.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Megawatts(pub f64);
impl_unit_ops!(Megawatts, "MW");

/// Energy in megawatt-hours.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct MegawattHours(pub f64);
impl_unit_ops!(MegawattHours, "MWh");

impl Megawatts {
    /// Energy over a number of hours at this constant power.
    pub fn over_hours(self, hours: f64) -> MegawattHours {
        MegawattHours(self.0 * hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_arithmetic() {
        let a = Megawatts(2.0) + Megawatts(1.5);
        assert!((a.value() - 3.5).abs() < 1e-12);
        let b = a * 2.0;
        assert!((b.value() - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_energy_from_power() {
        let e = Megawatts(4.0).over_hours(0.25);
        assert!((e.value() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_display() {
        assert_eq!(Megawatts(1.5).to_string(), "1.5 MW");
        assert_eq!(MegawattHours(2.0).to_string(), "2 MWh");
    }
}
