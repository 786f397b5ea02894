//! Arbitrary-precision rational numbers for exact geometric predicates.
//!
//! A [`Rational`] is a fraction of two [`BigInt`]s. Every finite `f64` is a
//! dyadic rational (`mantissa · 2^exponent`), so conversion from floating
//! point is lossless and every subsequent `+`, `-`, `×`, `÷` is exact. This is
//! what the filtered predicates in [`crate::geometry::predicates`] fall back to
//! when the floating-point determinant is too close to zero to trust its sign.
//!
//! The denominator is always strictly positive. Fractions are not reduced by a
//! full gcd; common factors of two are stripped after each operation, which
//! keeps the dyadic values produced from doubles in lowest terms.

use num_bigint::{BigInt, Sign};
use num_traits::{Float, One, Signed, ToPrimitive, Zero};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Errors raised while constructing a [`Rational`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RationalError {
    /// A fraction with a zero denominator was requested.
    #[error("Rational denominator must not be zero")]
    ZeroDenominator,
    /// The floating-point value is NaN or infinite and has no rational value.
    #[error("Cannot convert non-finite value {value} to a rational")]
    NonFinite {
        /// The offending value.
        value: f64,
    },
}

/// An exact fraction `numerator / denominator` with `denominator > 0`.
///
/// # Examples
///
/// ```rust
/// use spatial_organization::geometry::rational::Rational;
///
/// let a = Rational::new(1, 3).unwrap();
/// let b = Rational::new(1, 6).unwrap();
/// assert_eq!(&a + &b, Rational::new(1, 2).unwrap());
/// ```
#[derive(Clone, Debug)]
pub struct Rational {
    numerator: BigInt,
    denominator: BigInt,
}

impl Rational {
    /// Creates `numerator / denominator`.
    ///
    /// # Errors
    ///
    /// Returns [`RationalError::ZeroDenominator`] if `denominator` is zero.
    pub fn new(
        numerator: impl Into<BigInt>,
        denominator: impl Into<BigInt>,
    ) -> Result<Self, RationalError> {
        let denominator = denominator.into();
        if denominator.is_zero() {
            return Err(RationalError::ZeroDenominator);
        }
        Ok(Self::normalized(numerator.into(), denominator))
    }

    /// Converts a finite double into the rational it represents exactly.
    ///
    /// # Errors
    ///
    /// Returns [`RationalError::NonFinite`] for NaN and infinities.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use spatial_organization::geometry::rational::Rational;
    ///
    /// let tenth = Rational::from_f64(0.1).unwrap();
    /// // 0.1 is not representable, but the double closest to it is.
    /// assert_eq!(tenth.to_f64(), 0.1);
    /// assert_ne!(tenth, Rational::new(1, 10).unwrap());
    /// ```
    pub fn from_f64(value: f64) -> Result<Self, RationalError> {
        if !value.is_finite() {
            return Err(RationalError::NonFinite { value });
        }
        let (mantissa, exponent, sign) = Float::integer_decode(value);
        let mut numerator = BigInt::from(mantissa);
        if sign < 0 {
            numerator = -numerator;
        }
        let shift = usize::from(exponent.unsigned_abs());
        if exponent >= 0 {
            Ok(Self::normalized(numerator << shift, BigInt::one()))
        } else {
            Ok(Self::normalized(numerator, BigInt::one() << shift))
        }
    }

    /// The additive identity.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            numerator: BigInt::zero(),
            denominator: BigInt::one(),
        }
    }

    /// The multiplicative identity.
    #[must_use]
    pub fn one() -> Self {
        Self {
            numerator: BigInt::one(),
            denominator: BigInt::one(),
        }
    }

    /// The (signed) numerator.
    #[must_use]
    pub const fn numerator(&self) -> &BigInt {
        &self.numerator
    }

    /// The (strictly positive) denominator.
    #[must_use]
    pub const fn denominator(&self) -> &BigInt {
        &self.denominator
    }

    /// Returns `true` if the value is exactly zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.numerator.is_zero()
    }

    /// Sign of the value as an [`Ordering`] relative to zero.
    #[must_use]
    pub fn signum(&self) -> Ordering {
        match self.numerator.sign() {
            Sign::Minus => Ordering::Less,
            Sign::NoSign => Ordering::Equal,
            Sign::Plus => Ordering::Greater,
        }
    }

    /// Absolute value.
    #[must_use]
    pub fn abs(&self) -> Self {
        Self {
            numerator: self.numerator.abs(),
            denominator: self.denominator.clone(),
        }
    }

    /// Nearest double (exact for values produced by [`Rational::from_f64`]
    /// in the normal range).
    #[must_use]
    pub fn to_f64(&self) -> f64 {
        if self.numerator.is_zero() {
            return 0.0;
        }
        let magnitude = self.numerator.abs();
        let numerator_bits = i64::try_from(magnitude.bits()).unwrap_or(i64::MAX);
        let denominator_bits = i64::try_from(self.denominator.bits()).unwrap_or(i64::MAX);
        // Scale so that the integer quotient carries 64 significant bits.
        let scale = 64 - (numerator_bits - denominator_bits);
        let shift = usize::try_from(scale.unsigned_abs()).unwrap_or(usize::MAX);
        let quotient = if scale >= 0 {
            (magnitude << shift) / &self.denominator
        } else {
            magnitude / (&self.denominator << shift)
        };
        let value = scale_by_power_of_two(quotient.to_f64().unwrap_or(f64::INFINITY), -scale);
        if self.numerator.is_negative() {
            -value
        } else {
            value
        }
    }

    fn normalized(mut numerator: BigInt, mut denominator: BigInt) -> Self {
        if denominator.is_negative() {
            numerator = -numerator;
            denominator = -denominator;
        }
        if numerator.is_zero() {
            return Self {
                numerator,
                denominator: BigInt::one(),
            };
        }
        let twos = numerator
            .trailing_zeros()
            .unwrap_or(0)
            .min(denominator.trailing_zeros().unwrap_or(0));
        if twos > 0 {
            numerator >>= twos;
            denominator >>= twos;
        }
        Self {
            numerator,
            denominator,
        }
    }
}

fn scale_by_power_of_two(mut value: f64, mut exponent: i64) -> f64 {
    while exponent > 1000 {
        value *= 2f64.powi(1000);
        exponent -= 1000;
    }
    while exponent < -1000 {
        value *= 2f64.powi(-1000);
        exponent += 1000;
    }
    value * 2f64.powi(i32::try_from(exponent).unwrap_or(0))
}

impl Default for Rational {
    fn default() -> Self {
        Self::zero()
    }
}

impl TryFrom<f64> for Rational {
    type Error = RationalError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_f64(value)
    }
}

impl From<i64> for Rational {
    fn from(value: i64) -> Self {
        Self {
            numerator: BigInt::from(value),
            denominator: BigInt::one(),
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator.is_one() {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

// =============================================================================
// COMPARISON
// =============================================================================

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        // Denominators are positive, so cross-multiplication preserves order.
        (&self.numerator * &other.denominator).cmp(&(&other.numerator * &self.denominator))
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Rational {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Rational {}

// =============================================================================
// ARITHMETIC
// =============================================================================

impl Add for &Rational {
    type Output = Rational;

    fn add(self, rhs: Self) -> Rational {
        if self.denominator == rhs.denominator {
            return Rational::normalized(&self.numerator + &rhs.numerator, self.denominator.clone());
        }
        Rational::normalized(
            &self.numerator * &rhs.denominator + &rhs.numerator * &self.denominator,
            &self.denominator * &rhs.denominator,
        )
    }
}

impl Sub for &Rational {
    type Output = Rational;

    fn sub(self, rhs: Self) -> Rational {
        if self.denominator == rhs.denominator {
            return Rational::normalized(&self.numerator - &rhs.numerator, self.denominator.clone());
        }
        Rational::normalized(
            &self.numerator * &rhs.denominator - &rhs.numerator * &self.denominator,
            &self.denominator * &rhs.denominator,
        )
    }
}

impl Mul for &Rational {
    type Output = Rational;

    fn mul(self, rhs: Self) -> Rational {
        Rational::normalized(
            &self.numerator * &rhs.numerator,
            &self.denominator * &rhs.denominator,
        )
    }
}

impl Div for &Rational {
    type Output = Rational;

    /// # Panics
    ///
    /// Panics when dividing by zero; that is a programming error, not a
    /// recoverable geometric condition.
    fn div(self, rhs: Self) -> Rational {
        assert!(!rhs.is_zero(), "division of a rational by zero");
        Rational::normalized(
            &self.numerator * &rhs.denominator,
            &self.denominator * &rhs.numerator,
        )
    }
}

impl Neg for &Rational {
    type Output = Rational;

    fn neg(self) -> Rational {
        Rational {
            numerator: -&self.numerator,
            denominator: self.denominator.clone(),
        }
    }
}

macro_rules! forward_owned_binop {
    ($($trait:ident :: $method:ident),* $(,)?) => {
        $(
            impl $trait for Rational {
                type Output = Rational;

                fn $method(self, rhs: Self) -> Rational {
                    (&self).$method(&rhs)
                }
            }

            impl $trait<&Rational> for Rational {
                type Output = Rational;

                fn $method(self, rhs: &Rational) -> Rational {
                    (&self).$method(rhs)
                }
            }
        )*
    };
}

forward_owned_binop!(Add::add, Sub::sub, Mul::mul, Div::div);

impl Neg for Rational {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            numerator: -self.numerator,
            denominator: self.denominator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(n: i64, d: i64) -> Rational {
        Rational::new(n, d).unwrap()
    }

    #[test]
    fn test_zero_denominator_rejected() {
        assert_eq!(Rational::new(1, 0), Err(RationalError::ZeroDenominator));
    }

    #[test]
    fn test_negative_denominator_normalized() {
        let value = r(3, -4);
        assert_eq!(value.denominator(), &BigInt::from(4));
        assert_eq!(value.numerator(), &BigInt::from(-3));
        assert_eq!(value.signum(), Ordering::Less);
    }

    #[test]
    fn test_arithmetic_is_exact() {
        assert_eq!(&r(1, 3) + &r(1, 6), r(1, 2));
        assert_eq!(&r(1, 3) - &r(1, 2), r(-1, 6));
        assert_eq!(&r(2, 3) * &r(9, 4), r(3, 2));
        assert_eq!(&r(2, 3) / &r(4, 9), r(3, 2));
        assert_eq!(-r(5, 7), r(-5, 7));
        assert_eq!(r(6, 8), r(3, 4));
    }

    #[test]
    fn test_ordering_uses_cross_multiplication() {
        assert!(r(1, 3) < r(1, 2));
        assert!(r(-1, 2) < r(-1, 3));
        assert_eq!(r(2, 4).cmp(&r(1, 2)), Ordering::Equal);
        assert_eq!(Rational::zero().signum(), Ordering::Equal);
    }

    #[test]
    #[should_panic(expected = "division of a rational by zero")]
    fn test_division_by_zero_panics() {
        let _ = &r(1, 2) / &Rational::zero();
    }

    #[test]
    fn test_from_f64_lossless() {
        for value in [0.0, -0.0, 1.0, -3.75, 0.1, 1e-10, 12_345.678_9, 1e300, -2.5e-300] {
            let exact = Rational::from_f64(value).unwrap();
            assert_eq!(exact.to_f64(), value, "round trip of {value}");
        }
        assert_eq!(Rational::from_f64(0.5).unwrap(), r(1, 2));
        assert_eq!(Rational::from_f64(-6.0).unwrap(), Rational::from(-6));
    }

    #[test]
    fn test_from_f64_rejects_non_finite() {
        assert!(matches!(
            Rational::from_f64(f64::NAN),
            Err(RationalError::NonFinite { .. })
        ));
        assert!(Rational::try_from(f64::INFINITY).is_err());
    }

    #[test]
    fn test_sum_of_tenths_is_not_three_tenths() {
        // The classic floating-point surprise, decided exactly.
        let a = Rational::from_f64(0.1).unwrap();
        let b = Rational::from_f64(0.2).unwrap();
        let c = Rational::from_f64(0.3).unwrap();
        assert_ne!(&a + &b, c);
        assert!(&a + &b > c);
    }
}
