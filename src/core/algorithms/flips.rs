//! Bistellar flips and the Delaunay flip cascade.
//!
//! A 2-3 flip replaces two tetrahedra sharing a face by three tetrahedra
//! around the edge joining their apexes; a 3-2 flip is its inverse. Both are
//! three-dimensional Pachner moves and only apply when the five points are
//! in convex position with respect to the replaced face or edge.
//!
//! When the segment between the apexes passes through an edge of the shared
//! face instead of its interior, the four tetrahedra around that edge are
//! replaced by a 4-4 flip, carried out as two 2-3 flips that each leave a
//! flat tetrahedron behind, followed by [`remove_two_flat_tetrahedra`].
//!
//! [`restore_delaunay`] drives these flips after a 1-4 split until every
//! face of the star of the new node is locally Delaunay.
//! [`restore_delaunay_around`] checks every face of the seed tetrahedra
//! instead, which is what a node moved in place needs.
//!
//! # References
//!
//! - B. Joe, "Construction of three-dimensional Delaunay triangulations using
//!   local transformations", Computer Aided Geometric Design, 1991.
//! - H. Edelsbrunner and N. R. Shah, "Incremental topological flipping works
//!   for regular triangulations", Algorithmica, 1996.
//! - H. Ledoux, C. M. Gold, and G. Baciu, "Flipping to Robustly Delete a
//!   Vertex in a Delaunay Tetrahedralization", ICCSA 2005.

use crate::core::{
    collections::{SmallBuffer, StarBuffer},
    mesh::{Mesh, MeshError},
    open_triangle_organizer::OpenTriangleOrganizer,
    space_node::NodeKey,
    tetrahedron::{FACE_VERTICES, Tetrahedron, TetrahedronKey},
    triangle::TriangleKey,
};
use crate::geometry::predicates::{InSphere, Orientation, insphere_symbolic, orient3d};
use serde::{Deserialize, Serialize};
use slotmap::Key;
use std::ops::{AddAssign, Range};
use thiserror::Error;

/// Tetrahedra created by a single flip in the cascade.
type FlipBuffer = SmallBuffer<TetrahedronKey, 4>;

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while flipping.
///
/// All variants except [`FlipError::Mesh`] and [`FlipError::Unresolved`] are
/// raised before the mesh is modified.
///
/// # Examples
///
/// ```rust
/// use spatial_organization::core::algorithms::flips::FlipError;
///
/// let err = FlipError::Unresolved { remaining: 2 };
/// assert!(err.to_string().contains("2"));
/// ```
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum FlipError {
    /// The tetrahedra do not share the required face.
    #[error("Tetrahedra {first:?} and {second:?} do not share a face")]
    NotAdjacent {
        /// First tetrahedron.
        first: TetrahedronKey,
        /// Second tetrahedron.
        second: TetrahedronKey,
    },
    /// Three tetrahedra do not share exactly one common edge.
    #[error("Tetrahedra do not share exactly one common edge (found {common} common vertices)")]
    NotSharingEdge {
        /// Number of vertices common to all three tetrahedra.
        common: usize,
    },
    /// The points are not in convex position for the requested flip.
    #[error("Flip configuration is not convex: {message}")]
    NonConvex {
        /// Which test failed.
        message: &'static str,
    },
    /// Flat tetrahedra where none are allowed, or a flat pair that cannot be merged.
    #[error("Invalid flat tetrahedra: {message}")]
    FlatTetrahedra {
        /// Which test failed.
        message: &'static str,
    },
    /// Flips only apply to finite tetrahedra.
    #[error("Cannot flip infinite tetrahedron {tetrahedron:?}")]
    InfiniteTetrahedron {
        /// The infinite tetrahedron.
        tetrahedron: TetrahedronKey,
    },
    /// The cascade stopped with faces that are neither Delaunay nor flippable.
    #[error("Flip cascade stalled with {remaining} non-Delaunay faces left")]
    Unresolved {
        /// Number of faces still violating the Delaunay condition.
        remaining: usize,
    },
    /// The mesh references are inconsistent.
    #[error(transparent)]
    Mesh(#[from] MeshError),
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Counters collected by flip cascades.
///
/// # Examples
///
/// ```rust
/// use spatial_organization::core::algorithms::flips::FlipStatistics;
///
/// let mut total = FlipStatistics::default();
/// total += FlipStatistics { flips_2_to_3: 2, flips_3_to_2: 1, ..Default::default() };
/// assert_eq!(total.total_flips(), 3);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlipStatistics {
    /// Number of 2-3 flips.
    pub flips_2_to_3: usize,
    /// Number of 3-2 flips.
    pub flips_3_to_2: usize,
    /// Number of 4-4 flips (each counted once, not as two 2-3 flips).
    pub flips_4_to_4: usize,
    /// Faces that had to wait for a later pass.
    pub deferred: usize,
    /// Repairs that gave up on flipping and re-inserted the node through its
    /// cavity instead.
    pub fallback_rebuilds: usize,
    /// Repairs where the local fallback failed too and the whole
    /// triangulation was rebuilt.
    #[serde(default)]
    pub global_rebuilds: usize,
}

impl FlipStatistics {
    /// Total number of flips of any kind.
    #[must_use]
    pub const fn total_flips(&self) -> usize {
        self.flips_2_to_3 + self.flips_3_to_2 + self.flips_4_to_4
    }
}

impl AddAssign for FlipStatistics {
    fn add_assign(&mut self, rhs: Self) {
        self.flips_2_to_3 += rhs.flips_2_to_3;
        self.flips_3_to_2 += rhs.flips_3_to_2;
        self.flips_4_to_4 += rhs.flips_4_to_4;
        self.deferred += rhs.deferred;
        self.fallback_rebuilds += rhs.fallback_rebuilds;
        self.global_rebuilds += rhs.global_rebuilds;
    }
}

// =============================================================================
// FLIP CONTEXTS
// =============================================================================

fn finite_tetrahedron<T>(
    mesh: &Mesh<T>,
    key: TetrahedronKey,
) -> Result<(&Tetrahedron, [NodeKey; 4]), FlipError> {
    let tet = mesh.tetrahedron(key)?;
    let nodes = tet
        .finite_nodes()
        .ok_or(FlipError::InfiniteTetrahedron { tetrahedron: key })?;
    Ok((tet, nodes))
}

fn shared_face<T>(
    mesh: &Mesh<T>,
    first: TetrahedronKey,
    second: TetrahedronKey,
) -> Result<usize, FlipError> {
    for face in 0..4 {
        if mesh.adjacent_tetrahedron(first, face)? == Some(second) {
            return Ok(face);
        }
    }
    Err(FlipError::NotAdjacent { first, second })
}

fn ensure_closed(organizer: &OpenTriangleOrganizer, flip: &str) -> Result<(), MeshError> {
    if organizer.is_empty() {
        Ok(())
    } else {
        Err(MeshError::reference(format!(
            "{flip} flip left {} faces open",
            organizer.len()
        )))
    }
}

/// Two face-adjacent tetrahedra seen from the first one.
///
/// `ring` is the shared face ordered with `apex_first` on its positive side;
/// `orientations[k]` is `orient3d(ring[k], ring[k + 1], apex_first, apex_second)`,
/// negative when the segment between the apexes passes strictly inside
/// edge `k` of the shared face.
#[derive(Debug, Clone, Copy)]
struct TwoThree {
    first: TetrahedronKey,
    second: TetrahedronKey,
    ring: [NodeKey; 3],
    apex_first: NodeKey,
    apex_second: NodeKey,
    orientations: [Orientation; 3],
}

impl TwoThree {
    fn new<T>(mesh: &Mesh<T>, first: TetrahedronKey, second: TetrahedronKey) -> Result<Self, FlipError> {
        let (tet_a, nodes_a) = finite_tetrahedron(mesh, first)?;
        let (tet_b, nodes_b) = finite_tetrahedron(mesh, second)?;
        if tet_a.is_flat() || tet_b.is_flat() {
            return Err(FlipError::FlatTetrahedra {
                message: "2-3 flip on a flat tetrahedron",
            });
        }
        let face_a = shared_face(mesh, first, second)?;
        let face_b = tet_b
            .index_of_triangle(tet_a.triangles()[face_a])
            .ok_or(FlipError::NotAdjacent { first, second })?;
        let ring = FACE_VERTICES[face_a].map(|i| nodes_a[i]);
        let apex_first = nodes_a[face_a];
        let apex_second = nodes_b[face_b];

        let positions = [
            mesh.position(ring[0])?,
            mesh.position(ring[1])?,
            mesh.position(ring[2])?,
        ];
        let (pa, pb) = (mesh.position(apex_first)?, mesh.position(apex_second)?);
        let orientations =
            std::array::from_fn(|k| orient3d(&positions[k], &positions[(k + 1) % 3], &pa, &pb));
        Ok(Self {
            first,
            second,
            ring,
            apex_first,
            apex_second,
            orientations,
        })
    }

    fn count(&self, orientation: Orientation) -> usize {
        self.orientations.iter().filter(|&&o| o == orientation).count()
    }

    fn index_of(&self, orientation: Orientation) -> Option<usize> {
        self.orientations.iter().position(|&o| o == orientation)
    }

    fn check(&self, allow_flat: bool) -> Result<(), FlipError> {
        if self.count(Orientation::POSITIVE) > 0 {
            return Err(FlipError::NonConvex {
                message: "segment between the apexes misses the shared face",
            });
        }
        match self.count(Orientation::DEGENERATE) {
            0 => Ok(()),
            1 if allow_flat => Ok(()),
            1 => Err(FlipError::NonConvex {
                message: "segment between the apexes crosses an edge of the shared face",
            }),
            _ => Err(FlipError::NonConvex {
                message: "segment between the apexes passes through a vertex of the shared face",
            }),
        }
    }

    fn execute<T>(&self, mesh: &mut Mesh<T>) -> Result<[TetrahedronKey; 3], FlipError> {
        let mut organizer = OpenTriangleOrganizer::simple();
        mesh.remove_tetrahedron(self.first, Some(&mut organizer))?;
        mesh.remove_tetrahedron(self.second, Some(&mut organizer))?;
        let mut created = [TetrahedronKey::null(); 3];
        for (k, slot) in created.iter_mut().enumerate() {
            let (u, v) = (self.ring[k], self.ring[(k + 1) % 3]);
            *slot = mesh.create_tetrahedron(
                [Some(v), Some(u), Some(self.apex_first), Some(self.apex_second)],
                Some(&mut organizer),
            )?;
        }
        ensure_closed(&organizer, "2-3")?;
        tracing::trace!(first = ?self.first, second = ?self.second, ?created, "2-3 flip");
        Ok(created)
    }
}

// =============================================================================
// FLIPS
// =============================================================================

/// Replaces two face-adjacent tetrahedra by three tetrahedra sharing the
/// edge between their apexes.
///
/// # Errors
///
/// Returns [`FlipError::NotAdjacent`] if the tetrahedra share no face,
/// [`FlipError::NonConvex`] unless the segment between the apexes crosses
/// the interior of the shared face, and [`FlipError::InfiniteTetrahedron`]
/// or [`FlipError::FlatTetrahedra`] for unsuitable inputs.
pub fn flip2to3<T>(
    mesh: &mut Mesh<T>,
    first: TetrahedronKey,
    second: TetrahedronKey,
) -> Result<[TetrahedronKey; 3], FlipError> {
    let flip = TwoThree::new(mesh, first, second)?;
    flip.check(false)?;
    flip.execute(mesh)
}

/// Replaces three tetrahedra around a common edge by two tetrahedra sharing
/// a face.
///
/// # Errors
///
/// Returns [`FlipError::NotAdjacent`] unless the tetrahedra are pairwise
/// adjacent, [`FlipError::NotSharingEdge`] unless they have exactly two
/// vertices in common, and [`FlipError::NonConvex`] unless the common edge
/// crosses the interior of the triangle spanned by the other vertices.
pub fn flip3to2<T>(
    mesh: &mut Mesh<T>,
    first: TetrahedronKey,
    second: TetrahedronKey,
    third: TetrahedronKey,
) -> Result<[TetrahedronKey; 2], FlipError> {
    let mut all = [[NodeKey::null(); 4]; 3];
    for (slot, key) in all.iter_mut().zip([first, second, third]) {
        let (tet, nodes) = finite_tetrahedron(mesh, key)?;
        if tet.is_flat() {
            return Err(FlipError::FlatTetrahedra {
                message: "3-2 flip on a flat tetrahedron",
            });
        }
        *slot = nodes;
    }
    for (a, b) in [(first, second), (second, third), (third, first)] {
        shared_face(mesh, a, b)?;
    }

    let common: SmallBuffer<NodeKey, 4> = all[0]
        .iter()
        .copied()
        .filter(|n| all[1].contains(n) && all[2].contains(n))
        .collect();
    let [e0, e1] = common[..] else {
        return Err(FlipError::NotSharingEdge {
            common: common.len(),
        });
    };
    let mut others: SmallBuffer<NodeKey, 4> = SmallBuffer::new();
    for &node in all.iter().flatten() {
        if node != e0 && node != e1 && !others.contains(&node) {
            others.push(node);
        }
    }
    let [mut x, mut y, z] = others[..] else {
        return Err(MeshError::reference("three tetrahedra around an edge span more than five vertices").into());
    };

    let (p0, p1) = (mesh.position(e0)?, mesh.position(e1)?);
    let (mut px, mut py, pz) = (mesh.position(x)?, mesh.position(y)?, mesh.position(z)?);
    match orient3d(&px, &py, &pz, &p0) {
        Orientation::POSITIVE => {}
        Orientation::NEGATIVE => {
            std::mem::swap(&mut x, &mut y);
            std::mem::swap(&mut px, &mut py);
        }
        Orientation::DEGENERATE => {
            return Err(FlipError::NonConvex {
                message: "edge endpoint lies on the plane of the new face",
            });
        }
    }
    if orient3d(&px, &py, &pz, &p1) != Orientation::NEGATIVE {
        return Err(FlipError::NonConvex {
            message: "edge endpoints lie on the same side of the new face",
        });
    }
    let sides = [
        orient3d(&p0, &p1, &px, &py),
        orient3d(&p0, &p1, &py, &pz),
        orient3d(&p0, &p1, &pz, &px),
    ];
    if sides[0] == Orientation::DEGENERATE || sides.iter().any(|&s| s != sides[0]) {
        return Err(FlipError::NonConvex {
            message: "common edge misses the interior of the new face",
        });
    }

    let mut organizer = OpenTriangleOrganizer::simple();
    for key in [first, second, third] {
        mesh.remove_tetrahedron(key, Some(&mut organizer))?;
    }
    let upper = mesh.create_tetrahedron([Some(x), Some(y), Some(z), Some(e0)], Some(&mut organizer))?;
    let lower = mesh.create_tetrahedron([Some(y), Some(x), Some(z), Some(e1)], Some(&mut organizer))?;
    ensure_closed(&organizer, "3-2")?;
    tracing::trace!(?first, ?second, ?third, ?upper, ?lower, "3-2 flip");
    Ok([upper, lower])
}

/// Removes two flat tetrahedra on the same four vertices and stitches their
/// outer neighbors together.
///
/// The pair is what the two halves of a 4-4 flip leave behind: each
/// unshared face of one tetrahedron has a twin with the same vertices on the
/// other, and after removal the two neighbors of each twin pair end up
/// sharing a single triangle.
///
/// # Errors
///
/// Returns [`FlipError::FlatTetrahedra`] unless both tetrahedra are flat,
/// have the same vertices and pair up their unshared faces, and
/// [`FlipError::NotAdjacent`] if they share no face.
pub fn remove_two_flat_tetrahedra<T>(
    mesh: &mut Mesh<T>,
    first: TetrahedronKey,
    second: TetrahedronKey,
) -> Result<(), FlipError> {
    let (tet_a, nodes_a) = finite_tetrahedron(mesh, first)?;
    let (tet_b, nodes_b) = finite_tetrahedron(mesh, second)?;
    if !tet_a.is_flat() || !tet_b.is_flat() {
        return Err(FlipError::FlatTetrahedra {
            message: "tetrahedron is not flat",
        });
    }
    if !nodes_a.iter().all(|n| nodes_b.contains(n)) {
        return Err(FlipError::FlatTetrahedra {
            message: "flat tetrahedra have different vertices",
        });
    }
    let triangles_a = *tet_a.triangles();
    let triangles_b = *tet_b.triangles();
    if !triangles_a.iter().any(|t| triangles_b.contains(t)) {
        return Err(FlipError::NotAdjacent { first, second });
    }

    let mut twins: SmallBuffer<(TriangleKey, TriangleKey), 4> = SmallBuffer::new();
    for &ta in triangles_a.iter().filter(|t| !triangles_b.contains(t)) {
        let hash = mesh.triangle(ta)?.hash_key();
        let mut matching = None;
        for &tb in triangles_b.iter().filter(|t| !triangles_a.contains(t)) {
            if mesh.triangle(tb)?.hash_key() == hash {
                matching = Some(tb);
            }
        }
        let tb = matching.ok_or(FlipError::FlatTetrahedra {
            message: "unshared face without a twin",
        })?;
        twins.push((ta, tb));
    }

    mesh.remove_tetrahedron(first, None)?;
    mesh.remove_tetrahedron(second, None)?;

    for (ta, tb) in twins {
        let nodes = *mesh.triangle(ta)?.nodes();
        let (keep, drop) = if mesh.triangle_between(nodes) == Some(ta) {
            (ta, tb)
        } else {
            (tb, ta)
        };
        let neighbor = mesh
            .triangle(drop)?
            .tetrahedra()
            .iter()
            .flatten()
            .next()
            .copied()
            .ok_or_else(|| MeshError::reference("twin face without a neighbor"))?;
        mesh.replace_triangle(neighbor, drop, keep)?;
    }
    tracing::trace!(?first, ?second, "removed flat tetrahedra");
    Ok(())
}

// =============================================================================
// FLIP CASCADE
// =============================================================================

enum FaceRepair {
    Delaunay,
    Flipped(FlipBuffer),
    Deferred,
}

/// Flips until every tetrahedron incident to `node` is locally Delaunay
/// across the face opposite `node`.
///
/// `seeds` are the tetrahedra created around `node` (typically by a 1-4
/// split). Faces that violate the Delaunay condition but cannot be flipped
/// yet are deferred and retried in later passes.
///
/// # Errors
///
/// Returns [`FlipError::Unresolved`] if a pass makes no progress or more
/// than `max_passes` passes are needed. The mesh is then a valid but not
/// necessarily Delaunay triangulation. Other errors leave the mesh
/// inconsistent.
pub fn restore_delaunay<T>(
    mesh: &mut Mesh<T>,
    node: NodeKey,
    seeds: &[TetrahedronKey],
    max_passes: usize,
) -> Result<FlipStatistics, FlipError> {
    run_cascade(mesh, seeds, max_passes, |tet| {
        tet.index_of_node(node).map_or(0..0, |own| own..own + 1)
    })
}

/// Flips until every face of the seed tetrahedra, and of all tetrahedra
/// created on the way, is locally Delaunay.
///
/// Used after a node moved without changing the connectivity, when faces
/// incident to the node may be violated as well as the faces of its link.
///
/// # Errors
///
/// As [`restore_delaunay`].
pub fn restore_delaunay_around<T>(
    mesh: &mut Mesh<T>,
    seeds: &[TetrahedronKey],
    max_passes: usize,
) -> Result<FlipStatistics, FlipError> {
    run_cascade(mesh, seeds, max_passes, |_| 0..4)
}

fn run_cascade<T>(
    mesh: &mut Mesh<T>,
    seeds: &[TetrahedronKey],
    max_passes: usize,
    faces_of: impl Fn(&Tetrahedron) -> Range<usize>,
) -> Result<FlipStatistics, FlipError> {
    let mut stats = FlipStatistics::default();
    let mut stack: Vec<TetrahedronKey> = seeds.to_vec();
    let mut deferred: Vec<TetrahedronKey> = Vec::new();
    let mut pass = 0;
    loop {
        let mut progressed = false;
        while let Some(key) = stack.pop() {
            if !mesh.contains_tetrahedron(key) {
                continue;
            }
            let faces = faces_of(mesh.tetrahedron(key)?);
            for face in faces {
                match repair_face(mesh, key, face, &mut stats)? {
                    FaceRepair::Delaunay => {}
                    FaceRepair::Flipped(created) => {
                        progressed = true;
                        stack.extend(created);
                        break;
                    }
                    FaceRepair::Deferred => {
                        deferred.push(key);
                        break;
                    }
                }
            }
        }
        deferred.retain(|&key| mesh.contains_tetrahedron(key));
        if deferred.is_empty() {
            break;
        }
        pass += 1;
        if !progressed || pass > max_passes {
            tracing::debug!(pass, remaining = deferred.len(), "[repair] flip cascade stalled");
            return Err(FlipError::Unresolved {
                remaining: deferred.len(),
            });
        }
        stats.deferred += deferred.len();
        std::mem::swap(&mut stack, &mut deferred);
    }
    tracing::debug!(
        flips_2_to_3 = stats.flips_2_to_3,
        flips_3_to_2 = stats.flips_3_to_2,
        flips_4_to_4 = stats.flips_4_to_4,
        deferred = stats.deferred,
        "[repair] flip cascade finished"
    );
    Ok(stats)
}

/// Checks `face` of `key` and flips it if it is not locally Delaunay.
fn repair_face<T>(
    mesh: &mut Mesh<T>,
    key: TetrahedronKey,
    face: usize,
    stats: &mut FlipStatistics,
) -> Result<FaceRepair, FlipError> {
    let tet = mesh.tetrahedron(key)?;
    if tet.is_infinite() || tet.is_flat() {
        return Ok(FaceRepair::Delaunay);
    }
    let Some(neighbor) = mesh.adjacent_tetrahedron(key, face)? else {
        return Ok(FaceRepair::Delaunay);
    };
    let other = mesh.tetrahedron(neighbor)?;
    if other.is_infinite() || other.is_flat() {
        return Ok(FaceRepair::Delaunay);
    }

    let flip = TwoThree::new(mesh, key, neighbor)?;
    if !violates_delaunay(mesh, key, flip.apex_second)? {
        return Ok(FaceRepair::Delaunay);
    }

    match (flip.count(Orientation::POSITIVE), flip.count(Orientation::DEGENERATE)) {
        (0, 0) => {
            let created = flip.execute(mesh)?;
            stats.flips_2_to_3 += 1;
            Ok(FaceRepair::Flipped(created.into_iter().collect()))
        }
        (1, 0) => {
            let Some(k) = flip.index_of(Orientation::POSITIVE) else {
                return Ok(FaceRepair::Deferred);
            };
            let opposite = flip.ring[(k + 2) % 3];
            let Some(third) = neighbor_opposite(mesh, key, opposite)? else {
                return Ok(FaceRepair::Deferred);
            };
            let third_tet = mesh.tetrahedron(third)?;
            if third_tet.is_infinite() || !third_tet.contains_node(flip.apex_second) {
                return Ok(FaceRepair::Deferred);
            }
            match flip3to2(mesh, key, neighbor, third) {
                Ok(created) => {
                    stats.flips_3_to_2 += 1;
                    Ok(FaceRepair::Flipped(created.into_iter().collect()))
                }
                Err(FlipError::NonConvex { .. } | FlipError::FlatTetrahedra { .. }) => {
                    Ok(FaceRepair::Deferred)
                }
                Err(err) => Err(err),
            }
        }
        (0, 1) => {
            let Some(k) = flip.index_of(Orientation::DEGENERATE) else {
                return Ok(FaceRepair::Deferred);
            };
            match four_four(mesh, &flip, k)? {
                Some(created) => {
                    stats.flips_4_to_4 += 1;
                    Ok(FaceRepair::Flipped(created))
                }
                None => Ok(FaceRepair::Deferred),
            }
        }
        _ => Ok(FaceRepair::Deferred),
    }
}

fn neighbor_opposite<T>(
    mesh: &Mesh<T>,
    key: TetrahedronKey,
    vertex: NodeKey,
) -> Result<Option<TetrahedronKey>, MeshError> {
    let index = mesh
        .tetrahedron(key)?
        .index_of_node(vertex)
        .ok_or_else(|| MeshError::reference("vertex is not part of the tetrahedron"))?;
    mesh.adjacent_tetrahedron(key, index)
}

fn violates_delaunay<T>(
    mesh: &Mesh<T>,
    key: TetrahedronKey,
    apex: NodeKey,
) -> Result<bool, MeshError> {
    let tet = mesh.tetrahedron(key)?;
    let Some([n0, n1, n2, n3]) = tet.finite_nodes() else {
        return Ok(false);
    };
    let a = mesh.ranked_position(n0)?;
    let b = mesh.ranked_position(n1)?;
    let c = mesh.ranked_position(n2)?;
    let d = mesh.ranked_position(n3)?;
    let e = mesh.ranked_position(apex)?;
    Ok(insphere_symbolic(
        [(&a.0, a.1), (&b.0, b.1), (&c.0, c.1), (&d.0, d.1)],
        (&e.0, e.1),
    ) == InSphere::INSIDE)
}

/// 4-4 flip around edge `k` of the shared face of `flip`, whose endpoints
/// are coplanar with both apexes.
///
/// Returns `None` without touching the mesh if the four tetrahedra around
/// the edge do not form a flippable configuration.
fn four_four<T>(
    mesh: &mut Mesh<T>,
    flip: &TwoThree,
    k: usize,
) -> Result<Option<FlipBuffer>, FlipError> {
    let opposite = flip.ring[(k + 2) % 3];
    let (Some(third_first), Some(third_second)) = (
        neighbor_opposite(mesh, flip.first, opposite)?,
        neighbor_opposite(mesh, flip.second, opposite)?,
    ) else {
        return Ok(None);
    };
    if [third_first, third_second]
        .iter()
        .any(|&t| mesh.is_infinite(t) || mesh.tetrahedron(t).is_ok_and(Tetrahedron::is_flat))
    {
        return Ok(None);
    }
    let companion = match TwoThree::new(mesh, third_first, third_second) {
        Ok(companion) => companion,
        Err(FlipError::NotAdjacent { .. }) => return Ok(None),
        Err(err) => return Err(err),
    };
    if companion.apex_first != flip.apex_first
        || companion.apex_second != flip.apex_second
        || companion.count(Orientation::DEGENERATE) != 1
        || companion.check(true).is_err()
        || flip.check(true).is_err()
    {
        return Ok(None);
    }

    let first_half = flip.execute(mesh)?;
    let second_half = companion.execute(mesh)?;
    let flat_tetrahedron = |created: &[TetrahedronKey; 3]| {
        created
            .iter()
            .copied()
            .find(|&t| mesh.tetrahedron(t).is_ok_and(Tetrahedron::is_flat))
            .ok_or_else(|| MeshError::reference("4-4 flip half without a flat tetrahedron"))
    };
    let flat_first = flat_tetrahedron(&first_half)?;
    let flat_second = flat_tetrahedron(&second_half)?;
    remove_two_flat_tetrahedra(mesh, flat_first, flat_second)?;
    tracing::trace!(first = ?flip.first, second = ?flip.second, "4-4 flip");

    Ok(Some(
        first_half
            .into_iter()
            .chain(second_half)
            .filter(|&t| t != flat_first && t != flat_second)
            .collect(),
    ))
}

/// Tetrahedra incident to `node` that are not locally Delaunay across the
/// face opposite `node`.
///
/// # Errors
///
/// Returns stale-key errors for dangling references.
pub fn non_delaunay_star_faces<T>(mesh: &Mesh<T>, node: NodeKey) -> Result<StarBuffer, MeshError> {
    let mut violating = StarBuffer::new();
    for key in mesh.incident_tetrahedra(node)? {
        let tet = mesh.tetrahedron(key)?;
        let Some(own) = tet.index_of_node(node) else {
            continue;
        };
        if tet.is_infinite() {
            continue;
        }
        let Some(neighbor) = mesh.adjacent_tetrahedron(key, own)? else {
            continue;
        };
        let other = mesh.tetrahedron(neighbor)?;
        if other.is_infinite() {
            continue;
        }
        let Some(apex) = other
            .index_of_triangle(tet.triangles()[own])
            .and_then(|i| other.nodes()[i])
        else {
            continue;
        };
        if violates_delaunay(mesh, key, apex)? {
            violating.push(key);
        }
    }
    Ok(violating)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::algorithms::{
        insertion::insert_by_cavity,
        locate::{LocateResult, locate_exhaustive},
    };
    use crate::core::validation::{
        check_adjacency, check_euler_characteristic, check_manifold, check_orientation, validate,
    };
    use crate::geometry::util::Position;

    const BASE: [Position; 4] = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.2, 0.2, 1.0],
    ];

    /// Tetrahedron on `BASE` plus `below`, inserted under the base triangle.
    fn with_point_below(below: Position) -> (Mesh<()>, [NodeKey; 5]) {
        let mut mesh = Mesh::new();
        let base = BASE.map(|p| mesh.add_node(p, ()));
        mesh.create_initial_tetrahedron(base[0], base[1], base[2], base[3])
            .unwrap();
        let node = mesh.add_node(below, ());
        let LocateResult::Outside(start) = locate_exhaustive(&mesh, &below).unwrap() else {
            panic!("point below the base must be outside the hull");
        };
        insert_by_cavity(&mut mesh, node, start, 8).unwrap();
        (mesh, [base[0], base[1], base[2], base[3], node])
    }

    fn tetrahedron_with(mesh: &Mesh<()>, a: NodeKey, b: NodeKey) -> TetrahedronKey {
        mesh.finite_tetrahedra()
            .find(|(_, tet)| tet.contains_node(a) && tet.contains_node(b))
            .map(|(key, _)| key)
            .unwrap()
    }

    fn sorted_vertex_sets(mesh: &Mesh<()>) -> Vec<Vec<NodeKey>> {
        let mut sets: Vec<Vec<NodeKey>> = mesh
            .finite_tetrahedra()
            .map(|(_, tet)| {
                let mut nodes = tet.finite_nodes().unwrap().to_vec();
                nodes.sort();
                nodes
            })
            .collect();
        sets.sort();
        sets
    }

    #[test]
    fn test_flip_2_to_3_then_3_to_2_restores_tetrahedra() {
        let (mut mesh, keys) = with_point_below([0.2, 0.2, -1.0]);
        assert_eq!(mesh.number_of_tetrahedra(), 2);
        let before = sorted_vertex_sets(&mesh);
        let (edges, triangles) = (mesh.number_of_edges(), mesh.number_of_triangles());

        let upper = tetrahedron_with(&mesh, keys[3], keys[0]);
        let lower = tetrahedron_with(&mesh, keys[4], keys[0]);
        let created = flip2to3(&mut mesh, upper, lower).unwrap();
        assert_eq!(mesh.number_of_tetrahedra(), 3);
        assert_eq!(mesh.number_of_edges(), edges + 1);
        assert_eq!(mesh.number_of_triangles(), triangles + 2);
        assert!(mesh.edge_between(keys[3], keys[4]).is_some());
        for key in created {
            let tet = mesh.tetrahedron(key).unwrap();
            assert!(tet.contains_node(keys[3]) && tet.contains_node(keys[4]));
            assert!(!tet.is_flat());
        }

        flip3to2(&mut mesh, created[0], created[1], created[2]).unwrap();
        assert_eq!(sorted_vertex_sets(&mesh), before);
        assert_eq!(mesh.number_of_edges(), edges);
        assert_eq!(mesh.number_of_triangles(), triangles);
        assert!(mesh.edge_between(keys[3], keys[4]).is_none());
        for (_, triangle) in mesh.triangles() {
            assert_eq!(triangle.tetrahedron_count(), 2);
        }
    }

    #[test]
    fn test_flip_2_to_3_rejects_non_convex_pair() {
        let (mut mesh, keys) = with_point_below([2.0, 2.0, -0.1]);
        let upper = tetrahedron_with(&mesh, keys[3], keys[0]);
        let lower = tetrahedron_with(&mesh, keys[4], keys[0]);
        let tetrahedra = mesh.number_of_tetrahedra();
        assert!(matches!(
            flip2to3(&mut mesh, upper, lower),
            Err(FlipError::NonConvex { .. })
        ));
        assert_eq!(mesh.number_of_tetrahedra(), tetrahedra);
    }

    #[test]
    fn test_flips_reject_bad_inputs() {
        let (mut mesh, keys) = with_point_below([0.2, 0.2, -1.0]);
        let upper = tetrahedron_with(&mesh, keys[3], keys[0]);
        let lower = tetrahedron_with(&mesh, keys[4], keys[0]);
        // Face 0 of the bootstrap tetrahedron, opposite the origin, is on the hull.
        let infinite = mesh.adjacent_tetrahedron(upper, 0).unwrap().unwrap();
        assert!(mesh.is_infinite(infinite));

        assert!(matches!(
            flip2to3(&mut mesh, upper, upper),
            Err(FlipError::NotAdjacent { .. })
        ));
        assert!(matches!(
            flip2to3(&mut mesh, upper, infinite),
            Err(FlipError::InfiniteTetrahedron { .. })
        ));
        assert!(matches!(
            flip3to2(&mut mesh, upper, lower, upper),
            Err(FlipError::NotAdjacent { .. })
        ));
        assert!(matches!(
            remove_two_flat_tetrahedra(&mut mesh, upper, lower),
            Err(FlipError::FlatTetrahedra { .. })
        ));
        assert_eq!(mesh.number_of_tetrahedra(), 2);
    }

    #[test]
    fn test_restore_delaunay_is_a_no_op_on_delaunay_star() {
        let (mut mesh, keys) = with_point_below([0.2, 0.2, -1.0]);
        let star: Vec<_> = mesh.incident_tetrahedra(keys[4]).unwrap().into_iter().collect();
        let stats = restore_delaunay(&mut mesh, keys[4], &star, 4).unwrap();
        assert_eq!(stats.total_flips(), 0);
        assert!(non_delaunay_star_faces(&mesh, keys[4]).unwrap().is_empty());
    }

    /// Octahedron around the edge `a`-`b` on the z axis; `p`, `q` lie on the x
    /// axis and `r`, `s` on the y axis, so `a`, `b`, `p`, `q` are coplanar.
    /// With `a` and `b` close to the origin the Delaunay mesh is the four
    /// tetrahedra around `a`-`b`.
    fn octahedron() -> (Mesh<()>, [NodeKey; 6]) {
        let mut mesh = Mesh::new();
        let [a, b, p, q, r, s] = [
            [0.0, 0.0, -0.5],
            [0.0, 0.0, 0.5],
            [-1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.2, 0.0],
            [0.0, -1.2, 0.0],
        ]
        .map(|position| mesh.add_node(position, ()));
        mesh.create_initial_tetrahedron(a, b, p, r).unwrap();
        for node in [q, s] {
            let point = mesh.position(node).unwrap();
            let LocateResult::Outside(start) = locate_exhaustive(&mesh, &point).unwrap() else {
                panic!("octahedron corner must be outside the hull");
            };
            insert_by_cavity(&mut mesh, node, start, 8).unwrap();
        }
        assert_eq!(mesh.number_of_tetrahedra(), 4);
        assert!(mesh.edge_between(a, b).is_some());
        assert!(mesh.edge_between(p, q).is_none());
        (mesh, [a, b, p, q, r, s])
    }

    fn tetrahedron_on(mesh: &Mesh<()>, nodes: [NodeKey; 4]) -> TetrahedronKey {
        mesh.finite_tetrahedra()
            .find(|(_, tet)| nodes.iter().all(|&n| tet.contains_node(n)))
            .map(|(key, _)| key)
            .unwrap()
    }

    fn flat_count(mesh: &Mesh<()>) -> usize {
        mesh.finite_tetrahedra().filter(|(_, tet)| tet.is_flat()).count()
    }

    #[test]
    fn test_cascade_performs_4_to_4_flip_on_octahedron() {
        let (mut mesh, [a, b, p, q, ..]) = octahedron();
        // Stretching the axis makes the short diagonal p-q the Delaunay edge.
        mesh.node_mut(a).unwrap().set_position([0.0, 0.0, -2.0]);
        mesh.node_mut(b).unwrap().set_position([0.0, 0.0, 2.0]);
        let keys: Vec<TetrahedronKey> = mesh.tetrahedra().map(|(key, _)| key).collect();
        for key in keys {
            mesh.refresh_metrics(key).unwrap();
        }
        assert!(!non_delaunay_star_faces(&mesh, p).unwrap().is_empty());

        let seeds: Vec<_> = mesh.incident_tetrahedra(p).unwrap().into_iter().collect();
        let stats = restore_delaunay(&mut mesh, p, &seeds, 4).unwrap();
        assert_eq!(stats.flips_4_to_4, 1);
        assert_eq!(stats.flips_2_to_3, 0);
        assert_eq!(mesh.number_of_tetrahedra(), 4);
        assert_eq!(flat_count(&mesh), 0);
        assert!(mesh.edge_between(a, b).is_none());
        assert!(mesh.edge_between(p, q).is_some());
        validate(&mesh).unwrap();
    }

    #[test]
    fn test_cascade_around_moved_node_repairs_incident_faces() {
        let (mut mesh, [a, b, p, q, ..]) = octahedron();
        mesh.node_mut(a).unwrap().set_position([0.0, 0.0, -2.0]);
        mesh.node_mut(b).unwrap().set_position([0.0, 0.0, 2.0]);
        let seeds: Vec<_> = mesh.incident_tetrahedra(a).unwrap().into_iter().collect();
        for &key in &seeds {
            mesh.refresh_metrics(key).unwrap();
        }

        // Every face opposite `a` is on the hull; the violated faces contain `a`.
        let stats = restore_delaunay(&mut mesh, a, &seeds, 4).unwrap();
        assert_eq!(stats.total_flips(), 0);
        assert!(mesh.edge_between(a, b).is_some());

        let stats = restore_delaunay_around(&mut mesh, &seeds, 4).unwrap();
        assert_eq!(stats.flips_4_to_4, 1);
        assert_eq!(stats.total_flips(), 1);
        assert_eq!(flat_count(&mesh), 0);
        assert!(mesh.edge_between(a, b).is_none());
        assert!(mesh.edge_between(p, q).is_some());
        validate(&mesh).unwrap();
    }

    #[test]
    fn test_remove_two_flat_tetrahedra_after_split_4_to_4() {
        let (mut mesh, [a, b, p, q, r, s]) = octahedron();
        let edges = mesh.number_of_edges();

        let first = TwoThree::new(
            &mesh,
            tetrahedron_on(&mesh, [a, b, p, r]),
            tetrahedron_on(&mesh, [a, b, q, r]),
        )
        .unwrap();
        let second = TwoThree::new(
            &mesh,
            tetrahedron_on(&mesh, [a, b, p, s]),
            tetrahedron_on(&mesh, [a, b, q, s]),
        )
        .unwrap();
        assert_eq!(first.count(Orientation::DEGENERATE), 1);
        first.check(true).unwrap();
        second.check(true).unwrap();
        first.execute(&mut mesh).unwrap();
        second.execute(&mut mesh).unwrap();
        assert_eq!(flat_count(&mesh), 2);
        assert_eq!(mesh.number_of_tetrahedra(), 6);

        let flat = tetrahedron_on(&mesh, [a, b, p, q]);
        let twin = mesh
            .finite_tetrahedra()
            .find(|&(key, tet)| key != flat && tet.is_flat())
            .map(|(key, _)| key)
            .unwrap();
        remove_two_flat_tetrahedra(&mut mesh, flat, twin).unwrap();

        assert_eq!(flat_count(&mesh), 0);
        assert_eq!(mesh.number_of_tetrahedra(), 4);
        assert_eq!(mesh.number_of_edges(), edges);
        assert!(mesh.edge_between(a, b).is_none());
        assert!(mesh.edge_between(p, q).is_some());
        check_adjacency(&mesh).unwrap();
        check_manifold(&mesh).unwrap();
        check_orientation(&mesh).unwrap();
        check_euler_characteristic(&mesh).unwrap();
    }

    #[test]
    fn test_statistics_accumulate() {
        let mut total = FlipStatistics::default();
        total += FlipStatistics {
            flips_2_to_3: 1,
            flips_4_to_4: 2,
            deferred: 3,
            ..FlipStatistics::default()
        };
        total += FlipStatistics {
            flips_3_to_2: 4,
            fallback_rebuilds: 1,
            global_rebuilds: 2,
            ..FlipStatistics::default()
        };
        assert_eq!(total.total_flips(), 7);
        assert_eq!(total.deferred, 3);
        assert_eq!(total.fallback_rebuilds, 1);
        assert_eq!(total.global_rebuilds, 2);
    }
}
