//! Point location and conflict regions.
//!
//! Implements a stochastic visibility walk: starting from a hint tetrahedron,
//! repeatedly cross a face whose plane separates the tetrahedron from the
//! query point, testing the faces in random order so the walk cannot cycle
//! on degenerate input. Crossing a hull face ends the walk in an infinite
//! tetrahedron.
//!
//! The conflict region of a point is the set of tetrahedra whose
//! circumsphere strictly contains it (for infinite tetrahedra: whose hull
//! face it strictly sees). It is connected and is the cavity carved by
//! Bowyer-Watson insertion.
//!
//! # References
//!
//! - O. Devillers, S. Pion, and M. Teillaud, "Walking in a Triangulation",
//!   International Journal of Foundations of Computer Science, 2001.
//! - CGAL Triangulation_3 documentation

use crate::core::collections::{FastHashMap, TetrahedronKeySet};
use crate::core::mesh::{Mesh, MeshError};
use crate::core::space_node::NodeKey;
use crate::core::tetrahedron::{FACE_VERTICES, Tetrahedron, TetrahedronKey};
use crate::core::triangle::TriangleKey;
use crate::geometry::predicates::{InSphere, Orientation, insphere_symbolic, orient3d};
use crate::geometry::util::Position;
use rand::Rng;
use rand::seq::SliceRandom;

/// Result of a point location query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateResult {
    /// Point is strictly inside the tetrahedron.
    InsideTetrahedron(TetrahedronKey),
    /// Point is on a face or an edge of the tetrahedron, but not a vertex.
    OnBoundary(TetrahedronKey),
    /// Point coincides with a node.
    OnNode(NodeKey),
    /// Point is outside the convex hull; the infinite tetrahedron's hull face
    /// strictly sees it.
    Outside(TetrahedronKey),
}

impl LocateResult {
    /// The tetrahedron the point was found in, if any.
    #[must_use]
    pub const fn tetrahedron(&self) -> Option<TetrahedronKey> {
        match *self {
            Self::InsideTetrahedron(t) | Self::OnBoundary(t) | Self::Outside(t) => Some(t),
            Self::OnNode(_) => None,
        }
    }
}

/// Error during point location.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LocateError {
    /// The mesh has no tetrahedra.
    #[error("Cannot locate in an empty mesh")]
    EmptyMesh,

    /// The start tetrahedron does not exist.
    #[error("Invalid start tetrahedron: {tetrahedron:?}")]
    StaleStart {
        /// The stale key.
        tetrahedron: TetrahedronKey,
    },

    /// The step budget ran out.
    #[error("Cycle detected after {steps} steps - possible numerical degeneracy")]
    CycleDetected {
        /// Number of steps taken.
        steps: usize,
    },

    /// The mesh references are inconsistent.
    #[error("Mesh error during point location: {source}")]
    Mesh {
        /// The underlying mesh error.
        #[from]
        source: MeshError,
    },
}

/// Default step budget for a walk in a mesh with `tetrahedra` tetrahedra.
#[must_use]
pub fn default_walk_budget(tetrahedra: usize) -> usize {
    tetrahedra.saturating_mul(2).max(64)
}

/// Locates `point` by a stochastic visibility walk.
///
/// `hint` seeds the walk; without one (or with a stale one) an arbitrary
/// finite tetrahedron is used.
///
/// # Errors
///
/// Returns [`LocateError::EmptyMesh`] without finite tetrahedra and
/// [`LocateError::CycleDetected`] once `max_steps` steps were taken.
///
/// # Examples
///
/// ```rust
/// use spatial_organization::prelude::*;
///
/// let mut organizer = SpatialOrganizer::new();
/// for p in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]] {
///     organizer.insert(p, ()).unwrap();
/// }
/// let mut rng = rand::rng();
/// let inside = locate(organizer.mesh(), &[0.1, 0.1, 0.1], None, &mut rng, 64).unwrap();
/// assert!(matches!(inside, LocateResult::InsideTetrahedron(_)));
/// let outside = locate(organizer.mesh(), &[2.0, 2.0, 2.0], None, &mut rng, 64).unwrap();
/// assert!(matches!(outside, LocateResult::Outside(_)));
/// ```
pub fn locate<T, R: Rng + ?Sized>(
    mesh: &Mesh<T>,
    point: &Position,
    hint: Option<TetrahedronKey>,
    rng: &mut R,
    max_steps: usize,
) -> Result<LocateResult, LocateError> {
    let mut current = match hint {
        Some(key) if mesh.contains_tetrahedron(key) => key,
        _ => mesh
            .finite_tetrahedra()
            .next()
            .map(|(key, _)| key)
            .ok_or(LocateError::EmptyMesh)?,
    };
    if mesh.is_infinite(current) {
        current = mesh
            .adjacent_tetrahedron(current, 0)?
            .ok_or(LocateError::StaleStart { tetrahedron: current })?;
    }

    let mut order = [0_usize, 1, 2, 3];
    for step in 0..max_steps {
        let tet = mesh.tetrahedron(current)?;
        let positions = mesh.tetrahedron_positions(tet)?;
        order.shuffle(rng);

        let mut crossed = None;
        let mut orientations = [Orientation::POSITIVE; 4];
        for &face in &order {
            let [a, b, c] = FACE_VERTICES[face];
            let orientation = orient3d(&positions[a], &positions[b], &positions[c], point);
            if orientation == Orientation::NEGATIVE {
                crossed = Some(face);
                break;
            }
            orientations[face] = orientation;
        }

        let Some(face) = crossed else {
            tracing::trace!(step, ?current, "walk finished");
            return Ok(classify(tet, &orientations, current));
        };
        let next = mesh
            .adjacent_tetrahedron(current, face)?
            .ok_or_else(|| MeshError::reference("tetrahedron face without a neighbor"))?;
        if mesh.is_infinite(next) {
            return Ok(LocateResult::Outside(next));
        }
        current = next;
    }
    Err(LocateError::CycleDetected { steps: max_steps })
}

fn classify(tet: &Tetrahedron, orientations: &[Orientation; 4], key: TetrahedronKey) -> LocateResult {
    let on_planes = orientations
        .iter()
        .filter(|&&o| o == Orientation::DEGENERATE)
        .count();
    match on_planes {
        0 => LocateResult::InsideTetrahedron(key),
        3 => orientations
            .iter()
            .position(|&o| o != Orientation::DEGENERATE)
            .and_then(|vertex| tet.nodes()[vertex])
            .map_or(LocateResult::OnBoundary(key), LocateResult::OnNode),
        _ => LocateResult::OnBoundary(key),
    }
}

/// Locates `point` by testing every tetrahedron.
///
/// Used when a walk ran out of steps.
///
/// # Errors
///
/// Returns [`LocateError::EmptyMesh`] without finite tetrahedra.
pub fn locate_exhaustive<T>(mesh: &Mesh<T>, point: &Position) -> Result<LocateResult, LocateError> {
    if mesh.number_of_tetrahedra() == 0 {
        return Err(LocateError::EmptyMesh);
    }
    for (key, tet) in mesh.finite_tetrahedra() {
        let positions = mesh.tetrahedron_positions(tet)?;
        let mut orientations = [Orientation::POSITIVE; 4];
        for (face, orientation) in orientations.iter_mut().enumerate() {
            let [a, b, c] = FACE_VERTICES[face];
            *orientation = orient3d(&positions[a], &positions[b], &positions[c], point);
        }
        if !orientations.contains(&Orientation::NEGATIVE) {
            return Ok(classify(tet, &orientations, key));
        }
    }
    for (key, tet) in mesh.tetrahedra().filter(|(_, tet)| tet.is_infinite()) {
        if sees_hull_face(mesh, tet, point)? == Orientation::POSITIVE {
            return Ok(LocateResult::Outside(key));
        }
    }
    Err(MeshError::reference("point is neither inside nor outside the hull").into())
}

/// Walks, and scans exhaustively if the walk runs out of steps.
///
/// # Errors
///
/// Returns [`LocateError::EmptyMesh`] without finite tetrahedra.
pub fn locate_or_scan<T, R: Rng + ?Sized>(
    mesh: &Mesh<T>,
    point: &Position,
    hint: Option<TetrahedronKey>,
    rng: &mut R,
    max_steps: usize,
) -> Result<LocateResult, LocateError> {
    match locate(mesh, point, hint, rng, max_steps) {
        Err(LocateError::CycleDetected { steps }) => {
            tracing::warn!(steps, "walk exhausted its step budget; scanning all tetrahedra");
            locate_exhaustive(mesh, point)
        }
        other => other,
    }
}

/// Orientation of `point` with respect to the hull face of an infinite
/// tetrahedron; positive means the point lies outside the hull.
fn sees_hull_face<T>(
    mesh: &Mesh<T>,
    tet: &Tetrahedron,
    point: &Position,
) -> Result<Orientation, MeshError> {
    let [Some(a), Some(b), Some(c)] = tet.face_nodes(0) else {
        return Err(MeshError::reference("infinite tetrahedron without a finite hull face"));
    };
    Ok(orient3d(
        &mesh.position(a)?,
        &mesh.position(b)?,
        &mesh.position(c)?,
        point,
    ))
}

// =============================================================================
// CONFLICT REGION
// =============================================================================

/// Decides whether tetrahedra conflict with a point of a given rank.
///
/// Results are memoized per tetrahedron.
pub struct ConflictTester<'a, T> {
    mesh: &'a Mesh<T>,
    point: Position,
    rank: u64,
    memo: FastHashMap<TetrahedronKey, bool>,
}

impl<'a, T> ConflictTester<'a, T> {
    /// Creates a tester for `point`, which behaves as if inserted with `rank`.
    #[must_use]
    pub fn new(mesh: &'a Mesh<T>, point: Position, rank: u64) -> Self {
        Self {
            mesh,
            point,
            rank,
            memo: FastHashMap::default(),
        }
    }

    /// `true` if the circumsphere of `tetrahedron` strictly contains the point.
    ///
    /// An infinite tetrahedron conflicts if the point strictly sees its hull
    /// face; for a point on the hull plane the finite neighbor decides.
    ///
    /// # Errors
    ///
    /// Returns stale-key errors for dangling references.
    pub fn in_conflict(&mut self, tetrahedron: TetrahedronKey) -> Result<bool, MeshError> {
        if let Some(&known) = self.memo.get(&tetrahedron) {
            return Ok(known);
        }
        let tet = self.mesh.tetrahedron(tetrahedron)?;
        let conflict = if let Some([n0, n1, n2, n3]) = tet.finite_nodes() {
            let a = self.mesh.ranked_position(n0)?;
            let b = self.mesh.ranked_position(n1)?;
            let c = self.mesh.ranked_position(n2)?;
            let d = self.mesh.ranked_position(n3)?;
            insphere_symbolic(
                [(&a.0, a.1), (&b.0, b.1), (&c.0, c.1), (&d.0, d.1)],
                (&self.point, self.rank),
            ) == InSphere::INSIDE
        } else {
            match sees_hull_face(self.mesh, tet, &self.point)? {
                Orientation::POSITIVE => true,
                Orientation::NEGATIVE => false,
                Orientation::DEGENERATE => {
                    let inner = self
                        .mesh
                        .adjacent_tetrahedron(tetrahedron, 0)?
                        .ok_or_else(|| MeshError::reference("hull face without a finite side"))?;
                    if self.mesh.is_infinite(inner) {
                        return Err(MeshError::reference("hull face between two infinite tetrahedra"));
                    }
                    self.in_conflict(inner)?
                }
            }
        };
        self.memo.insert(tetrahedron, conflict);
        Ok(conflict)
    }
}

/// A cavity: the conflicting tetrahedra and the faces separating them from
/// the rest of the mesh.
#[derive(Debug, Clone, Default)]
pub struct ConflictRegion {
    /// Tetrahedra in conflict.
    pub tetrahedra: Vec<TetrahedronKey>,
    /// Boundary faces with the non-conflicting tetrahedron on the far side.
    pub boundary: Vec<(TriangleKey, TetrahedronKey)>,
}

/// Collects the conflict region of `point` by breadth-first search from a
/// conflicting tetrahedron.
///
/// # Errors
///
/// Returns [`MeshError::DegenerateConfiguration`] if `start` is not in
/// conflict, and stale-key errors for dangling references.
pub fn find_conflict_region<T>(
    mesh: &Mesh<T>,
    point: &Position,
    rank: u64,
    start: TetrahedronKey,
) -> Result<ConflictRegion, MeshError> {
    let mut tester = ConflictTester::new(mesh, *point, rank);
    if !tester.in_conflict(start)? {
        return Err(MeshError::degenerate("start tetrahedron is not in conflict"));
    }

    let mut region = ConflictRegion::default();
    let mut visited = TetrahedronKeySet::default();
    visited.insert(start);
    let mut queue = vec![start];
    while let Some(current) = queue.pop() {
        region.tetrahedra.push(current);
        let tet = mesh.tetrahedron(current)?;
        for (face, &triangle) in tet.triangles().iter().enumerate() {
            let neighbor = mesh
                .adjacent_tetrahedron(current, face)?
                .ok_or_else(|| MeshError::reference("tetrahedron face without a neighbor"))?;
            if visited.contains(&neighbor) {
                continue;
            }
            if tester.in_conflict(neighbor)? {
                visited.insert(neighbor);
                queue.push(neighbor);
            } else {
                region.boundary.push((triangle, neighbor));
            }
        }
    }
    Ok(region)
}
