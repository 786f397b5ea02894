//! Working sets for local re-triangulation.
//!
//! While tetrahedra are torn down and rebuilt, the faces that currently have
//! a free side are tracked by an [`OpenTriangleOrganizer`], keyed by their
//! vertex set. New tetrahedra pick their faces up from here, so faces left
//! behind by removed tetrahedra are reused instead of duplicated, and an
//! empty organizer at the end of an operation proves the region is closed.
//!
//! [`OpenTriangleOrganizer::triangulate`] fills a cavity by gift-wrapping:
//! for an open face it picks, among the candidate nodes of the
//! [`TriangulationNodeOrganizer`] that lie strictly beyond the face, the one
//! whose circumsphere with the face contains no other candidate.

use crate::core::{
    collections::{FastHashMap, NodeKeySet, fast_hash_map_with_capacity},
    mesh::{Mesh, MeshError},
    space_node::NodeKey,
    triangle::{TriangleHashKey, TriangleKey},
};
use crate::geometry::predicates::{InSphere, Orientation, insphere_symbolic, orient3d};

/// Candidate nodes for closing a cavity.
#[derive(Clone, Debug, Default)]
pub struct TriangulationNodeOrganizer {
    nodes: Vec<NodeKey>,
    members: NodeKeySet,
}

impl TriangulationNodeOrganizer {
    /// Creates an empty organizer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node; duplicates are ignored.
    pub fn add_node(&mut self, node: NodeKey) {
        if self.members.insert(node) {
            self.nodes.push(node);
        }
    }

    /// The candidate nodes in insertion order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeKey] {
        &self.nodes
    }

    /// `true` if `node` is a candidate.
    #[must_use]
    pub fn contains(&self, node: NodeKey) -> bool {
        self.members.contains(&node)
    }

    /// Number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` if there are no candidates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl FromIterator<NodeKey> for TriangulationNodeOrganizer {
    fn from_iter<I: IntoIterator<Item = NodeKey>>(iter: I) -> Self {
        let mut organizer = Self::new();
        for node in iter {
            organizer.add_node(node);
        }
        organizer
    }
}

/// Tetrahedra created by [`OpenTriangleOrganizer::triangulate`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CavityFill {
    /// Finite tetrahedra created.
    pub finite: usize,
    /// Infinite tetrahedra created on faces that became hull faces.
    pub infinite: usize,
}

/// Open faces of a region under repair.
#[derive(Clone, Debug)]
pub struct OpenTriangleOrganizer {
    open: FastHashMap<TriangleHashKey, TriangleKey>,
    /// Finite faces in registration order; entries closed since are skipped.
    worklist: Vec<TriangleHashKey>,
    node_organizer: TriangulationNodeOrganizer,
}

impl OpenTriangleOrganizer {
    /// Creates an organizer sized for `preferred_capacity` open faces.
    #[must_use]
    pub fn new(preferred_capacity: usize, node_organizer: TriangulationNodeOrganizer) -> Self {
        Self {
            open: fast_hash_map_with_capacity(preferred_capacity),
            worklist: Vec::with_capacity(preferred_capacity),
            node_organizer,
        }
    }

    /// Organizer without candidate nodes, for operations that know their
    /// tetrahedra up front (bootstrap, flips, starring a cavity).
    #[must_use]
    pub fn simple() -> Self {
        Self::new(4, TriangulationNodeOrganizer::new())
    }

    /// Marks a triangle as open.
    pub fn register_triangle(&mut self, key: TriangleHashKey, triangle: TriangleKey) {
        if self.open.insert(key, triangle).is_none() && !key.is_infinite() {
            self.worklist.push(key);
        }
    }

    /// Forgets an open triangle, returning it if it was registered.
    pub fn unregister_triangle(&mut self, key: &TriangleHashKey) -> Option<TriangleKey> {
        self.open.remove(key)
    }

    /// The open triangle with the given vertex set.
    #[must_use]
    pub fn get_triangle(&self, key: &TriangleHashKey) -> Option<TriangleKey> {
        self.open.get(key).copied()
    }

    /// Some open triangle, or `None` once the region is closed.
    #[must_use]
    pub fn get_an_open_triangle(&self) -> Option<TriangleKey> {
        self.open.values().next().copied()
    }

    /// Number of open triangles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.open.len()
    }

    /// `true` once every face has two sides.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// The candidate nodes.
    #[must_use]
    pub const fn node_organizer(&self) -> &TriangulationNodeOrganizer {
        &self.node_organizer
    }

    fn next_finite_open_triangle(&mut self) -> Option<TriangleKey> {
        while let Some(key) = self.worklist.pop() {
            if let Some(&triangle) = self.open.get(&key) {
                return Some(triangle);
            }
        }
        None
    }

    /// Closes the cavity bounded by the registered open triangles.
    ///
    /// Every finite open face is capped with the Delaunay-best candidate on
    /// its open side; a face without candidates becomes a hull face and is
    /// capped with an infinite tetrahedron. Open faces through the vertex at
    /// infinity are closed as a by-product of capping their hull neighbors.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::DegenerateConfiguration`] if faces remain open,
    /// and propagates errors from tetrahedron creation.
    pub fn triangulate<T>(&mut self, mesh: &mut Mesh<T>) -> Result<CavityFill, MeshError> {
        let mut fill = CavityFill::default();
        while let Some(triangle_key) = self.next_finite_open_triangle() {
            let triangle = mesh.triangle(triangle_key)?;
            let existing = match *triangle.tetrahedra() {
                [Some(t), None] | [None, Some(t)] => t,
                _ => {
                    return Err(MeshError::reference(
                        "registered open triangle does not have exactly one side",
                    ));
                }
            };
            let tet = mesh.tetrahedron(existing)?;
            let face = tet
                .index_of_triangle(triangle_key)
                .ok_or_else(|| MeshError::reference("open triangle is not a face of its tetrahedron"))?;
            let [Some(f0), Some(f1), Some(f2)] = tet.face_nodes(face) else {
                return Err(MeshError::reference("finite open triangle with an infinite vertex"));
            };
            let apex = self.best_candidate(mesh, [f0, f1, f2])?;
            mesh.create_tetrahedron([apex, Some(f0), Some(f1), Some(f2)], Some(&mut *self))?;
            if apex.is_some() {
                fill.finite += 1;
            } else {
                fill.infinite += 1;
            }
        }
        if !self.is_empty() {
            return Err(MeshError::degenerate(format!(
                "{} faces remain open after re-triangulation",
                self.len()
            )));
        }
        tracing::trace!(finite = fill.finite, infinite = fill.infinite, "cavity closed");
        Ok(fill)
    }

    /// Picks the apex for the face `(f0, f1, f2)`, listed with the existing
    /// tetrahedron on its positive side.
    fn best_candidate<T>(
        &self,
        mesh: &Mesh<T>,
        face: [NodeKey; 3],
    ) -> Result<Option<NodeKey>, MeshError> {
        let ranked = [
            mesh.ranked_position(face[0])?,
            mesh.ranked_position(face[1])?,
            mesh.ranked_position(face[2])?,
        ];
        let mut best: Option<(NodeKey, [f64; 3], u64)> = None;
        for &candidate in self.node_organizer.nodes() {
            if face.contains(&candidate) {
                continue;
            }
            let (position, rank) = mesh.ranked_position(candidate)?;
            if orient3d(&ranked[0].0, &ranked[1].0, &ranked[2].0, &position) != Orientation::NEGATIVE {
                continue;
            }
            let better = match &best {
                None => true,
                Some((_, best_position, best_rank)) => {
                    insphere_symbolic(
                        [
                            (best_position, *best_rank),
                            (&ranked[0].0, ranked[0].1),
                            (&ranked[1].0, ranked[1].1),
                            (&ranked[2].0, ranked[2].1),
                        ],
                        (&position, rank),
                    ) == InSphere::INSIDE
                }
            };
            if better {
                best = Some((candidate, position, rank));
            }
        }
        Ok(best.map(|(node, _, _)| node))
    }
}
