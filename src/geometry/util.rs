//! Floating-point geometry helpers: vector arithmetic, circumspheres,
//! volumes and barycentric coordinates.
//!
//! These are *not* used for combinatorial decisions (those go through
//! [`crate::geometry::predicates`]); they produce the cached metric data of
//! tetrahedra and the interpolation weights handed to callers.

use nalgebra::{Matrix3, Vector3};

/// A position in 3D space.
pub type Position = [f64; 3];

/// Errors from the floating-point geometry helpers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    /// The four points do not span a tetrahedron.
    #[error("Degenerate tetrahedron: the four points are coplanar")]
    DegenerateTetrahedron,
    /// A coordinate is NaN or infinite.
    #[error("Non-finite coordinate in {position:?}")]
    NonFiniteCoordinate {
        /// The offending position.
        position: Position,
    },
}

/// Returns `true` if every coordinate is finite.
#[must_use]
pub fn is_finite_position(position: &Position) -> bool {
    position.iter().all(|x| x.is_finite())
}

/// `a - b`.
#[must_use]
pub fn subtract(a: &Position, b: &Position) -> Position {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// `a + b`.
#[must_use]
pub fn add(a: &Position, b: &Position) -> Position {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// `factor * a`.
#[must_use]
pub fn scale(a: &Position, factor: f64) -> Position {
    [a[0] * factor, a[1] * factor, a[2] * factor]
}

/// Dot product.
#[must_use]
pub fn dot(a: &Position, b: &Position) -> f64 {
    a[0].mul_add(b[0], a[1].mul_add(b[1], a[2] * b[2]))
}

/// Squared distance between two positions.
#[must_use]
pub fn squared_distance(a: &Position, b: &Position) -> f64 {
    let d = subtract(a, b);
    dot(&d, &d)
}

/// Normalizes `a`; the zero vector is returned unchanged.
#[must_use]
pub fn normalize(a: &Position) -> Position {
    let length = dot(a, a).sqrt();
    if length > 0.0 {
        scale(a, 1.0 / length)
    } else {
        *a
    }
}

fn to_vector(p: &Position) -> Vector3<f64> {
    Vector3::new(p[0], p[1], p[2])
}

/// Signed volume of the tetrahedron `a, b, c, d`: `det[b - a, c - a, d - a] / 6`.
#[must_use]
pub fn signed_volume(a: &Position, b: &Position, c: &Position, d: &Position) -> f64 {
    let (a, b, c, d) = (to_vector(a), to_vector(b), to_vector(c), to_vector(d));
    (b - a).cross(&(c - a)).dot(&(d - a)) / 6.0
}

/// Circumcenter and squared circumradius of a tetrahedron.
///
/// # Errors
///
/// Returns [`GeometryError::DegenerateTetrahedron`] if the points are
/// (numerically) coplanar.
pub fn circumsphere(
    a: &Position,
    b: &Position,
    c: &Position,
    d: &Position,
) -> Result<(Position, f64), GeometryError> {
    let origin = to_vector(a);
    let u = to_vector(b) - origin;
    let v = to_vector(c) - origin;
    let w = to_vector(d) - origin;
    let system = Matrix3::from_rows(&[u.transpose(), v.transpose(), w.transpose()]);
    let rhs = Vector3::new(u.norm_squared(), v.norm_squared(), w.norm_squared()) * 0.5;
    let offset = system
        .lu()
        .solve(&rhs)
        .ok_or(GeometryError::DegenerateTetrahedron)?;
    if !offset.iter().all(|x| x.is_finite()) {
        return Err(GeometryError::DegenerateTetrahedron);
    }
    let center = origin + offset;
    Ok(([center.x, center.y, center.z], offset.norm_squared()))
}

/// Barycentric coordinates of `point` with respect to a tetrahedron.
///
/// The result `[l0, l1, l2, l3]` satisfies `point = Σ li · vertices[i]` and
/// `Σ li = 1`. All coordinates are non-negative exactly when the point lies in
/// the (closed) tetrahedron.
///
/// # Errors
///
/// Returns [`GeometryError::DegenerateTetrahedron`] for coplanar vertices and
/// [`GeometryError::NonFiniteCoordinate`] for NaN or infinite input.
///
/// # Examples
///
/// ```rust
/// use spatial_organization::geometry::util::barycentric_coordinates;
///
/// let tet = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
/// let l = barycentric_coordinates(&[0.25, 0.25, 0.25], &tet).unwrap();
/// assert!(l.iter().all(|x| (x - 0.25).abs() < 1e-12));
/// ```
pub fn barycentric_coordinates(
    point: &Position,
    vertices: &[Position; 4],
) -> Result<[f64; 4], GeometryError> {
    for position in std::iter::once(point).chain(vertices.iter()) {
        if !is_finite_position(position) {
            return Err(GeometryError::NonFiniteCoordinate { position: *position });
        }
    }
    let origin = to_vector(&vertices[0]);
    let edges = Matrix3::from_columns(&[
        to_vector(&vertices[1]) - origin,
        to_vector(&vertices[2]) - origin,
        to_vector(&vertices[3]) - origin,
    ]);
    let weights = edges
        .lu()
        .solve(&(to_vector(point) - origin))
        .ok_or(GeometryError::DegenerateTetrahedron)?;
    if !weights.iter().all(|x| x.is_finite()) {
        return Err(GeometryError::DegenerateTetrahedron);
    }
    Ok([
        1.0 - weights.x - weights.y - weights.z,
        weights.x,
        weights.y,
        weights.z,
    ])
}
