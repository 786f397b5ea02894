//! Certified orientation and in-sphere predicates.
//!
//! Each predicate first evaluates its determinant in floating point together
//! with a static error bound (Shewchuk's stage-A bounds). If the magnitude of
//! the determinant exceeds the bound, the floating-point sign is provably
//! correct and returned. Otherwise the determinant is re-evaluated with
//! [`Rational`] arithmetic, which cannot round.
//!
//! # Conventions
//!
//! - [`orient3d`]`(a, b, c, d)` is the sign of `det[b - a, c - a, d - a]`. It is
//!   [`Orientation::POSITIVE`] when `d` lies on the side of the plane `abc`
//!   towards which `(b - a) × (c - a)` points.
//! - [`insphere`]`(a, b, c, d, e)` assumes `orient3d(a, b, c, d)` is positive and
//!   reports [`InSphere::INSIDE`] when `e` lies strictly inside the sphere
//!   through the first four points.
//! - [`insphere_symbolic`] breaks co-spherical ties with a symbolic perturbation
//!   of the lifted coordinate, ordered by a per-point rank. With it, every
//!   query against a non-flat tetrahedron is decided as inside or outside.
//!
//! # References
//!
//! - J. R. Shewchuk, "Adaptive Precision Floating-Point Arithmetic and Fast
//!   Robust Geometric Predicates", Discrete & Computational Geometry, 1997.
//! - H. Edelsbrunner and E. P. Mücke, "Simulation of Simplicity", ACM
//!   Transactions on Graphics, 1990.

use super::exact_vector::ExactVector;
use super::rational::Rational;
use super::util::Position;
use std::cmp::Ordering;

/// Represents the position of a point relative to a circumsphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InSphere {
    /// The point is outside the circumsphere
    OUTSIDE,
    /// The point is exactly on the circumsphere
    BOUNDARY,
    /// The point is inside the circumsphere
    INSIDE,
}

impl std::fmt::Display for InSphere {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OUTSIDE => write!(f, "OUTSIDE"),
            Self::BOUNDARY => write!(f, "BOUNDARY"),
            Self::INSIDE => write!(f, "INSIDE"),
        }
    }
}

/// Represents the orientation of four points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// The determinant is negative
    NEGATIVE,
    /// The four points are exactly coplanar
    DEGENERATE,
    /// The determinant is positive
    POSITIVE,
}

impl Orientation {
    /// The opposite orientation.
    #[must_use]
    pub const fn reversed(self) -> Self {
        match self {
            Self::NEGATIVE => Self::POSITIVE,
            Self::DEGENERATE => Self::DEGENERATE,
            Self::POSITIVE => Self::NEGATIVE,
        }
    }

    const fn from_ordering(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Self::NEGATIVE,
            Ordering::Equal => Self::DEGENERATE,
            Ordering::Greater => Self::POSITIVE,
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NEGATIVE => write!(f, "NEGATIVE"),
            Self::DEGENERATE => write!(f, "DEGENERATE"),
            Self::POSITIVE => write!(f, "POSITIVE"),
        }
    }
}

// =============================================================================
// ERROR BOUNDS
// =============================================================================

/// Half an ulp of 1.0: the relative rounding error of one operation.
const EPSILON: f64 = f64::EPSILON * 0.5;
const ORIENT3D_ERRBOUND: f64 = (7.0 + 56.0 * EPSILON) * EPSILON;
const INSPHERE_ERRBOUND: f64 = (16.0 + 224.0 * EPSILON) * EPSILON;
/// Below this magnitude the static bounds no longer hold (underflow).
const UNDERFLOW_GUARD: f64 = 1e-280;

// =============================================================================
// ORIENTATION
// =============================================================================

/// Certified sign of `det[b - a, c - a, d - a]`.
///
/// Non-finite input is reported as [`Orientation::DEGENERATE`].
///
/// # Examples
///
/// ```rust
/// use spatial_organization::geometry::predicates::{Orientation, orient3d};
///
/// let o = orient3d(&[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0], &[0.0, 0.0, 1.0]);
/// assert_eq!(o, Orientation::POSITIVE);
/// ```
#[must_use]
pub fn orient3d(a: &Position, b: &Position, c: &Position, d: &Position) -> Orientation {
    orient3d_filtered(a, b, c, d).unwrap_or_else(|| {
        tracing::trace!("orient3d: ambiguous floating-point sign, using exact arithmetic");
        orient3d_exact(a, b, c, d)
    })
}

/// Orientation evaluated entirely in rational arithmetic.
#[must_use]
pub fn orient3d_exact(a: &Position, b: &Position, c: &Position, d: &Position) -> Orientation {
    let (Ok(a), Ok(b), Ok(c), Ok(d)) = (
        ExactVector::from_f64(a),
        ExactVector::from_f64(b),
        ExactVector::from_f64(c),
        ExactVector::from_f64(d),
    ) else {
        return Orientation::DEGENERATE;
    };
    let det = ExactVector::determinant([&(&b - &a), &(&c - &a), &(&d - &a)]);
    Orientation::from_ordering(det.signum())
}

fn orient3d_filtered(a: &Position, b: &Position, c: &Position, d: &Position) -> Option<Orientation> {
    let adx = a[0] - d[0];
    let bdx = b[0] - d[0];
    let cdx = c[0] - d[0];
    let ady = a[1] - d[1];
    let bdy = b[1] - d[1];
    let cdy = c[1] - d[1];
    let adz = a[2] - d[2];
    let bdz = b[2] - d[2];
    let cdz = c[2] - d[2];

    let bdxcdy = bdx * cdy;
    let cdxbdy = cdx * bdy;
    let cdxady = cdx * ady;
    let adxcdy = adx * cdy;
    let adxbdy = adx * bdy;
    let bdxady = bdx * ady;

    // det[a - d, b - d, c - d], which is the negation of det[b - a, c - a, d - a].
    let det = adz * (bdxcdy - cdxbdy) + bdz * (cdxady - adxcdy) + cdz * (adxbdy - bdxady);
    let permanent = (bdxcdy.abs() + cdxbdy.abs()) * adz.abs()
        + (cdxady.abs() + adxcdy.abs()) * bdz.abs()
        + (adxbdy.abs() + bdxady.abs()) * cdz.abs();

    if !det.is_finite() || !permanent.is_finite() || permanent < UNDERFLOW_GUARD {
        return None;
    }
    let bound = ORIENT3D_ERRBOUND * permanent;
    if det > bound {
        Some(Orientation::NEGATIVE)
    } else if -det > bound {
        Some(Orientation::POSITIVE)
    } else {
        None
    }
}

// =============================================================================
// IN-SPHERE
// =============================================================================

/// Certified position of `e` relative to the sphere through `a, b, c, d`.
///
/// The tetrahedron `a, b, c, d` must be positively oriented (see
/// [`orient3d`]); for a negatively oriented one the answer is mirrored.
///
/// # Examples
///
/// ```rust
/// use spatial_organization::geometry::predicates::{InSphere, insphere};
///
/// let a = [0.0, 0.0, 0.0];
/// let b = [1.0, 0.0, 0.0];
/// let c = [0.0, 1.0, 0.0];
/// let d = [0.0, 0.0, 1.0];
/// assert_eq!(insphere(&a, &b, &c, &d, &[0.25, 0.25, 0.25]), InSphere::INSIDE);
/// assert_eq!(insphere(&a, &b, &c, &d, &[1.0, 1.0, 0.0]), InSphere::BOUNDARY);
/// assert_eq!(insphere(&a, &b, &c, &d, &[2.0, 2.0, 2.0]), InSphere::OUTSIDE);
/// ```
#[must_use]
pub fn insphere(
    a: &Position,
    b: &Position,
    c: &Position,
    d: &Position,
    e: &Position,
) -> InSphere {
    insphere_filtered(a, b, c, d, e).unwrap_or_else(|| {
        tracing::trace!("insphere: ambiguous floating-point sign, using exact arithmetic");
        insphere_exact(a, b, c, d, e)
    })
}

/// In-sphere test evaluated entirely in rational arithmetic.
#[must_use]
pub fn insphere_exact(
    a: &Position,
    b: &Position,
    c: &Position,
    d: &Position,
    e: &Position,
) -> InSphere {
    let (Ok(a), Ok(b), Ok(c), Ok(d), Ok(e)) = (
        ExactVector::from_f64(a),
        ExactVector::from_f64(b),
        ExactVector::from_f64(c),
        ExactVector::from_f64(d),
        ExactVector::from_f64(e),
    ) else {
        return InSphere::BOUNDARY;
    };
    let ae = &a - &e;
    let be = &b - &e;
    let ce = &c - &e;
    let de = &d - &e;

    // Cofactor expansion of the lifted 4×4 determinant along the lift column.
    let terms: [(Rational, Rational); 4] = [
        (ae.squared_length(), ExactVector::determinant([&be, &ce, &de])),
        (be.squared_length(), ExactVector::determinant([&ae, &ce, &de])),
        (ce.squared_length(), ExactVector::determinant([&ae, &be, &de])),
        (de.squared_length(), ExactVector::determinant([&ae, &be, &ce])),
    ];
    let mut lifted = Rational::zero();
    for (index, (lift, minor)) in terms.iter().enumerate() {
        let term = lift * minor;
        lifted = if index % 2 == 0 {
            &lifted - &term
        } else {
            &lifted + &term
        };
    }
    // `lifted` is positive when e is outside a positively oriented sphere.
    match lifted.signum() {
        Ordering::Less => InSphere::INSIDE,
        Ordering::Equal => InSphere::BOUNDARY,
        Ordering::Greater => InSphere::OUTSIDE,
    }
}

#[allow(clippy::similar_names, clippy::many_single_char_names)]
fn insphere_filtered(
    a: &Position,
    b: &Position,
    c: &Position,
    d: &Position,
    e: &Position,
) -> Option<InSphere> {
    let aex = a[0] - e[0];
    let bex = b[0] - e[0];
    let cex = c[0] - e[0];
    let dex = d[0] - e[0];
    let aey = a[1] - e[1];
    let bey = b[1] - e[1];
    let cey = c[1] - e[1];
    let dey = d[1] - e[1];
    let aez = a[2] - e[2];
    let bez = b[2] - e[2];
    let cez = c[2] - e[2];
    let dez = d[2] - e[2];

    let aexbey = aex * bey;
    let bexaey = bex * aey;
    let ab = aexbey - bexaey;
    let bexcey = bex * cey;
    let cexbey = cex * bey;
    let bc = bexcey - cexbey;
    let cexdey = cex * dey;
    let dexcey = dex * cey;
    let cd = cexdey - dexcey;
    let dexaey = dex * aey;
    let aexdey = aex * dey;
    let da = dexaey - aexdey;
    let aexcey = aex * cey;
    let cexaey = cex * aey;
    let ac = aexcey - cexaey;
    let bexdey = bex * dey;
    let dexbey = dex * bey;
    let bd = bexdey - dexbey;

    let abc = aez * bc - bez * ac + cez * ab;
    let bcd = bez * cd - cez * bd + dez * bc;
    let cda = cez * da + dez * ac + aez * cd;
    let dab = dez * ab + aez * bd + bez * da;

    let alift = aex * aex + aey * aey + aez * aez;
    let blift = bex * bex + bey * bey + bez * bez;
    let clift = cex * cex + cey * cey + cez * cez;
    let dlift = dex * dex + dey * dey + dez * dez;

    let det = (dlift * abc - clift * dab) + (blift * cda - alift * bcd);

    let (aez, bez, cez, dez) = (aez.abs(), bez.abs(), cez.abs(), dez.abs());
    let permanent = ((cexdey.abs() + dexcey.abs()) * bez
        + (dexbey.abs() + bexdey.abs()) * cez
        + (bexcey.abs() + cexbey.abs()) * dez)
        * alift
        + ((dexaey.abs() + aexdey.abs()) * cez
            + (aexcey.abs() + cexaey.abs()) * dez
            + (cexdey.abs() + dexcey.abs()) * aez)
            * blift
        + ((aexbey.abs() + bexaey.abs()) * dez
            + (bexdey.abs() + dexbey.abs()) * aez
            + (dexaey.abs() + aexdey.abs()) * bez)
            * clift
        + ((bexcey.abs() + cexbey.abs()) * aez
            + (cexaey.abs() + aexcey.abs()) * bez
            + (aexbey.abs() + bexaey.abs()) * cez)
            * dlift;

    if !det.is_finite() || !permanent.is_finite() || permanent < UNDERFLOW_GUARD {
        return None;
    }
    let bound = INSPHERE_ERRBOUND * permanent;
    if det > bound {
        Some(InSphere::OUTSIDE)
    } else if -det > bound {
        Some(InSphere::INSIDE)
    } else {
        None
    }
}

// =============================================================================
// SYMBOLIC PERTURBATION
// =============================================================================

/// In-sphere test with co-spherical ties broken symbolically.
///
/// Every point carries a rank (its insertion order). The lifted coordinate of
/// each point is perturbed by an infinitesimal whose magnitude grows with the
/// rank, so a tie is decided by the highest-ranked point whose perturbation
/// term does not vanish. As a consequence a point with the highest rank that
/// lies exactly on the sphere is reported [`InSphere::OUTSIDE`].
///
/// [`InSphere::BOUNDARY`] is only returned when all five points are coplanar,
/// which cannot happen for a non-flat tetrahedron.
#[must_use]
pub fn insphere_symbolic(tetrahedron: [(&Position, u64); 4], query: (&Position, u64)) -> InSphere {
    let [(a, _), (b, _), (c, _), (d, _)] = tetrahedron;
    let (e, _) = query;
    let unperturbed = insphere(a, b, c, d, e);
    if unperturbed != InSphere::BOUNDARY {
        return unperturbed;
    }

    let points = [a, b, c, d, e];
    let ranks = [
        tetrahedron[0].1,
        tetrahedron[1].1,
        tetrahedron[2].1,
        tetrahedron[3].1,
        query.1,
    ];
    let mut order = [0_usize, 1, 2, 3, 4];
    order.sort_unstable_by(|&i, &j| ranks[j].cmp(&ranks[i]));

    for index in order {
        let mut others = [points[0]; 4];
        let mut slot = 0;
        for (position, point) in points.iter().enumerate() {
            if position != index {
                others[slot] = point;
                slot += 1;
            }
        }
        let orientation = orient3d(others[0], others[1], others[2], others[3]);
        // The coefficient of the perturbation of point `index` is
        // (-1)^(index + 1) * orient3d(others).
        let coefficient = if index % 2 == 0 {
            orientation.reversed()
        } else {
            orientation
        };
        match coefficient {
            Orientation::POSITIVE => return InSphere::INSIDE,
            Orientation::NEGATIVE => return InSphere::OUTSIDE,
            Orientation::DEGENERATE => {}
        }
    }
    InSphere::BOUNDARY
}
