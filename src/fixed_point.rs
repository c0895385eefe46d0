//! 17.14 fixed-point arithmetic.
//!
//! The MLFQS formulas work on real numbers (`load_avg`, `recent_cpu`), but
//! the kernel does no floating point. Values are instead kept as `i32` with
//! the lowest 14 bits holding the fraction, so 1.0 is represented by
//! `1 << 14`. Multiplication and division widen to `i64` internally to avoid
//! overflowing the intermediate product.

use core::ops::{Add, Sub};

/// The scale factor: 1.0 in 17.14 representation.
const F: i32 = 1 << 14;

/// A 17.14 fixed-point number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fixed(i32);

impl Fixed {
    /// Zero.
    pub const ZERO: Fixed = Fixed(0);

    /// Converts an integer to fixed point.
    pub fn from_int(n: i32) -> Fixed {
        Fixed(n * F)
    }

    /// Converts to an integer, rounding toward zero.
    pub fn to_int_zero(self) -> i32 {
        self.0 / F
    }

    /// Converts to an integer, rounding to the nearest integer.
    ///
    /// Ties round away from zero: `F / 2` is added (positive) or subtracted
    /// (negative) before the truncating division.
    pub fn to_int_nearest(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + F / 2) / F
        } else {
            (self.0 - F / 2) / F
        }
    }

    /// Adds an integer to a fixed-point number.
    pub fn add_int(self, n: i32) -> Fixed {
        Fixed(self.0 + n * F)
    }

    /// Subtracts an integer from a fixed-point number.
    pub fn sub_int(self, n: i32) -> Fixed {
        Fixed(self.0 - n * F)
    }

    /// Multiplies two fixed-point numbers.
    pub fn mul(self, other: Fixed) -> Fixed {
        Fixed((self.0 as i64 * other.0 as i64 / F as i64) as i32)
    }

    /// Multiplies a fixed-point number by an integer.
    pub fn mul_int(self, n: i32) -> Fixed {
        Fixed(self.0 * n)
    }

    /// Divides one fixed-point number by another.
    pub fn div(self, other: Fixed) -> Fixed {
        Fixed((self.0 as i64 * F as i64 / other.0 as i64) as i32)
    }

    /// Divides a fixed-point number by an integer.
    pub fn div_int(self, n: i32) -> Fixed {
        Fixed(self.0 / n)
    }
}

impl Add for Fixed {
    type Output = Fixed;
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 + rhs.0)
    }
}

impl Sub for Fixed {
    type Output = Fixed;
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 - rhs.0)
    }
}
