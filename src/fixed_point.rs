//! # Fixed-Point Arithmetic
//!
//! Signed Q17.14 numbers for the MLFQS load average and recent-CPU
//! estimates. The kernel has no floating point, so fractional values are
//! stored as `i32` with 14 fraction bits.
//!
//! Operations that combine two fixed-point operands through multiplication
//! or division widen to `i64` first; `x * y` of two Q17.14 values needs 28
//! fraction bits before the shift back.

use core::ops::{Add, Div, Mul, Neg, Sub};

/// Number of fraction bits.
pub const FRACTION_BITS: u32 = 14;

const F: i32 = 1 << FRACTION_BITS;

/// A Q17.14 fixed-point number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fixed(i32);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);
    pub const ONE: Fixed = Fixed(F);

    /// Largest integer magnitude that converts without overflow.
    pub const INT_MAX: i32 = i32::MAX / F;

    /// Convert an integer.
    #[inline]
    pub const fn from_int(n: i32) -> Self {
        Fixed(n * F)
    }

    /// Reinterpret a raw Q17.14 bit pattern.
    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Fixed(raw)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Convert back to an integer, rounding toward zero.
    #[inline]
    pub const fn to_int_trunc(self) -> i32 {
        self.0 / F
    }

    /// Convert back to an integer, rounding to nearest (halves away from
    /// zero).
    #[inline]
    pub const fn to_int_round(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + F / 2) / F
        } else {
            (self.0 - F / 2) / F
        }
    }

    /// `self * factor`, rounded to the nearest integer (halves away from
    /// zero). The product is formed in `i64`, so large values such as a
    /// long-running thread's recent CPU scale without overflow.
    #[inline]
    pub const fn scaled_round(self, factor: i32) -> i32 {
        let wide = self.0 as i64 * factor as i64;
        let half = (F / 2) as i64;
        let rounded = if wide >= 0 {
            (wide + half) / F as i64
        } else {
            (wide - half) / F as i64
        };
        rounded as i32
    }
}

impl Add for Fixed {
    type Output = Fixed;

    #[inline]
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 + rhs.0)
    }
}

impl Add<i32> for Fixed {
    type Output = Fixed;

    #[inline]
    fn add(self, rhs: i32) -> Fixed {
        Fixed(self.0 + rhs * F)
    }
}

impl Sub for Fixed {
    type Output = Fixed;

    #[inline]
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 - rhs.0)
    }
}

impl Sub<i32> for Fixed {
    type Output = Fixed;

    #[inline]
    fn sub(self, rhs: i32) -> Fixed {
        Fixed(self.0 - rhs * F)
    }
}

impl Mul for Fixed {
    type Output = Fixed;

    #[inline]
    fn mul(self, rhs: Fixed) -> Fixed {
        Fixed(((self.0 as i64) * (rhs.0 as i64) / F as i64) as i32)
    }
}

impl Mul<i32> for Fixed {
    type Output = Fixed;

    #[inline]
    fn mul(self, rhs: i32) -> Fixed {
        Fixed(self.0 * rhs)
    }
}

impl Div for Fixed {
    type Output = Fixed;

    #[inline]
    fn div(self, rhs: Fixed) -> Fixed {
        Fixed(((self.0 as i64) * F as i64 / rhs.0 as i64) as i32)
    }
}

impl Div<i32> for Fixed {
    type Output = Fixed;

    #[inline]
    fn div(self, rhs: i32) -> Fixed {
        Fixed(self.0 / rhs)
    }
}

impl Neg for Fixed {
    type Output = Fixed;

    #[inline]
    fn neg(self) -> Fixed {
        Fixed(-self.0)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rounding() {
        // 2.5 rounds away from zero, 2.25 rounds down.
        let two_and_half = Fixed::from_int(5) / 2;
        assert_eq!(two_and_half.to_int_round(), 3);
        assert_eq!(two_and_half.to_int_trunc(), 2);
        assert_eq!((-two_and_half).to_int_round(), -3);
        assert_eq!((-two_and_half).to_int_trunc(), -2);

        let quarter = Fixed::from_int(9) / 4;
        assert_eq!(quarter.to_int_round(), 2);
    }

    #[test]
    fn test_scaled_round_of_large_values() {
        // 3000.5 * 100 is far beyond i32 at 14 fraction bits.
        let cpu = Fixed::from_int(6001) / 2;
        assert_eq!(cpu.scaled_round(100), 300_050);
        assert_eq!((-cpu).scaled_round(100), -300_050);
        assert_eq!(Fixed::from_raw(i32::MAX).scaled_round(100), 13_107_200);

        let third = Fixed::ONE / 3;
        assert_eq!(third.scaled_round(100), 33);
        assert_eq!((third * 2).scaled_round(100), 67);
    }

    #[test]
    fn test_mixed_operands() {
        let x = Fixed::from_int(3);
        assert_eq!((x + 2).to_int_trunc(), 5);
        assert_eq!((x - 5).to_int_trunc(), -2);
        assert_eq!((x * 4).to_int_trunc(), 12);
        assert_eq!((x / 3), Fixed::ONE);
    }

    #[test]
    fn test_fixed_products_widen() {
        // 200 * 200 overflows i32 at 28 fraction bits without widening.
        let x = Fixed::from_int(200);
        assert_eq!((x * x).to_int_trunc(), 40_000);
        assert_eq!((Fixed::from_int(40_000) / x).to_int_trunc(), 200);
    }

    #[test]
    fn test_load_average_coefficients() {
        let decay = Fixed::from_int(59) / Fixed::from_int(60);
        let gain = Fixed::from_int(1) / Fixed::from_int(60);
        // 59/60 + 1/60 == 1 within one unit of the last place.
        assert!(((decay + gain).raw() - Fixed::ONE.raw()).abs() <= 1);
        assert_eq!((decay * 100).to_int_round(), 98);
    }

    proptest! {
        #[test]
        fn prop_int_round_trip(x in -Fixed::INT_MAX..=Fixed::INT_MAX) {
            prop_assert_eq!(Fixed::from_int(x).to_int_round(), x);
            prop_assert_eq!(Fixed::from_int(x).to_int_trunc(), x);
        }

        #[test]
        fn prop_scaled_round_matches_narrow(raw in -20_000_000i32..20_000_000) {
            let x = Fixed::from_raw(raw);
            prop_assert_eq!(x.scaled_round(100), (x * 100).to_int_round());
        }

        #[test]
        fn prop_add_sub_inverse(a in -60_000i32..60_000, b in -60_000i32..60_000) {
            let fa = Fixed::from_int(a);
            prop_assert_eq!((fa + b) - b, fa);
            prop_assert_eq!((fa + Fixed::from_int(b)).to_int_trunc(), a + b);
        }

        #[test]
        fn prop_mul_div_by_int(a in -1_000i32..1_000, k in 1i32..100) {
            let fa = Fixed::from_int(a);
            prop_assert_eq!(((fa * k) / k), fa);
            prop_assert_eq!((fa * Fixed::from_int(k)).to_int_trunc(), a * k);
        }
    }
}
