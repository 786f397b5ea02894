//! Three-component vectors of [`Rational`]s.
//!
//! Used by the exact branch of the geometric predicates: coordinates are
//! converted losslessly, differences and lifted norms are formed exactly, and
//! the sign of the resulting determinant is therefore certain.

use super::rational::{Rational, RationalError};
use std::ops::{Add, Sub};

/// A 3D vector with exact rational components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExactVector {
    elements: [Rational; 3],
}

impl ExactVector {
    /// Creates a vector from three rationals.
    #[must_use]
    pub const fn new(elements: [Rational; 3]) -> Self {
        Self { elements }
    }

    /// Converts a floating-point position without loss.
    ///
    /// # Errors
    ///
    /// Returns [`RationalError::NonFinite`] if any coordinate is NaN or infinite.
    pub fn from_f64(position: &[f64; 3]) -> Result<Self, RationalError> {
        Ok(Self::new([
            Rational::from_f64(position[0])?,
            Rational::from_f64(position[1])?,
            Rational::from_f64(position[2])?,
        ]))
    }

    /// Borrows the components.
    #[must_use]
    pub const fn elements(&self) -> &[Rational; 3] {
        &self.elements
    }

    /// Multiplies every component by `factor`.
    #[must_use]
    pub fn scalar_mul(&self, factor: &Rational) -> Self {
        Self::new([
            &self.elements[0] * factor,
            &self.elements[1] * factor,
            &self.elements[2] * factor,
        ])
    }

    /// Dot product.
    #[must_use]
    pub fn dot(&self, other: &Self) -> Rational {
        let [a0, a1, a2] = &self.elements;
        let [b0, b1, b2] = &other.elements;
        &(&(a0 * b0) + &(a1 * b1)) + &(a2 * b2)
    }

    /// Squared Euclidean length.
    #[must_use]
    pub fn squared_length(&self) -> Rational {
        self.dot(self)
    }

    /// Cross product `self × other`.
    #[must_use]
    pub fn cross(&self, other: &Self) -> Self {
        let [a0, a1, a2] = &self.elements;
        let [b0, b1, b2] = &other.elements;
        Self::new([
            &(a1 * b2) - &(a2 * b1),
            &(a2 * b0) - &(a0 * b2),
            &(a0 * b1) - &(a1 * b0),
        ])
    }

    /// Determinant of the 3×3 matrix whose rows are `rows`.
    ///
    /// Equals the triple product `rows[0] · (rows[1] × rows[2])`.
    #[must_use]
    pub fn determinant(rows: [&Self; 3]) -> Rational {
        rows[0].dot(&rows[1].cross(rows[2]))
    }
}

impl Add for &ExactVector {
    type Output = ExactVector;

    fn add(self, rhs: Self) -> ExactVector {
        ExactVector::new([
            &self.elements[0] + &rhs.elements[0],
            &self.elements[1] + &rhs.elements[1],
            &self.elements[2] + &rhs.elements[2],
        ])
    }
}

impl Sub for &ExactVector {
    type Output = ExactVector;

    fn sub(self, rhs: Self) -> ExactVector {
        ExactVector::new([
            &self.elements[0] - &rhs.elements[0],
            &self.elements[1] - &rhs.elements[1],
            &self.elements[2] - &rhs.elements[2],
        ])
    }
}
