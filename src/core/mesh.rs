//! Arena-backed tetrahedral mesh.
//!
//! [`Mesh`] owns every [`SpaceNode`], [`Edge`], [`Triangle3D`] and
//! [`Tetrahedron`] in typed slotmap arenas and keeps the cross references
//! between them consistent. All topological mutation goes through two
//! primitives:
//!
//! - [`Mesh::create_tetrahedron`] attaches a tetrahedron to existing faces
//!   (or creates missing ones), maintaining edges and node caches.
//! - [`Mesh::remove_tetrahedron`] detaches a tetrahedron and drops faces and
//!   edges nobody references any more.
//!
//! Both optionally report face status changes to an
//! [`OpenTriangleOrganizer`], which is how flips, cavity insertion and cavity
//! re-triangulation stitch new tetrahedra onto the faces left open by the
//! tetrahedra they replaced.
//!
//! # Infinite tetrahedra
//!
//! The mesh is closed by tetrahedra incident to the vertex at infinity
//! (`None` in a vertex slot). Counts reported by [`Mesh::number_of_tetrahedra`]
//! and friends refer to finite simplices only.

use crate::core::{
    collections::{FastHashMap, StarBuffer, StorageMap, TetrahedronKeySet},
    edge::{Edge, EdgeHashKey, EdgeKey},
    open_triangle_organizer::OpenTriangleOrganizer,
    space_node::{NodeKey, SpaceNode},
    tetrahedron::{
        FACE_VERTICES, Tetrahedron, TetrahedronKey, TetrahedronMetrics, normalize_infinite_first,
    },
    triangle::{Triangle3D, TriangleHashKey, TriangleKey},
};
use crate::geometry::{
    predicates::{Orientation, orient3d},
    util::{Position, circumsphere, signed_volume},
};
use slotmap::Key;
use thiserror::Error;

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by the mesh data structure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MeshError {
    /// Primitives that should share a face or edge do not.
    #[error("Invalid edge or face reference: {message}")]
    InvalidEdgeOrFaceReference {
        /// Description of the broken reference.
        message: String,
    },
    /// A geometric precondition failed (flat or inverted tetrahedron, unclosable cavity).
    #[error("Degenerate configuration: {message}")]
    DegenerateConfiguration {
        /// Description of the configuration.
        message: String,
    },
    /// The node key does not refer to a node of this mesh.
    #[error("Node {node:?} is not part of the mesh")]
    StaleNode {
        /// The stale key.
        node: NodeKey,
    },
    /// The tetrahedron key does not refer to a live tetrahedron.
    #[error("Tetrahedron {tetrahedron:?} is not part of the mesh")]
    StaleTetrahedron {
        /// The stale key.
        tetrahedron: TetrahedronKey,
    },
    /// The triangle key does not refer to a live triangle.
    #[error("Triangle {triangle:?} is not part of the mesh")]
    StaleTriangle {
        /// The stale key.
        triangle: TriangleKey,
    },
}

impl MeshError {
    pub(crate) fn reference(message: impl Into<String>) -> Self {
        Self::InvalidEdgeOrFaceReference {
            message: message.into(),
        }
    }

    pub(crate) fn degenerate(message: impl Into<String>) -> Self {
        Self::DegenerateConfiguration {
            message: message.into(),
        }
    }
}

// =============================================================================
// MESH
// =============================================================================

/// Tetrahedral mesh over nodes carrying payloads of type `T`.
#[derive(Clone, Debug)]
pub struct Mesh<T> {
    nodes: StorageMap<NodeKey, SpaceNode<T>>,
    tetrahedra: StorageMap<TetrahedronKey, Tetrahedron>,
    triangles: StorageMap<TriangleKey, Triangle3D>,
    edges: StorageMap<EdgeKey, Edge>,
    triangle_index: FastHashMap<TriangleHashKey, TriangleKey>,
    edge_index: FastHashMap<EdgeHashKey, EdgeKey>,
    finite_tetrahedra: usize,
    finite_triangles: usize,
    next_rank: u64,
}

impl<T> Default for Mesh<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mesh<T> {
    /// Creates an empty mesh.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: StorageMap::with_key(),
            tetrahedra: StorageMap::with_key(),
            triangles: StorageMap::with_key(),
            edges: StorageMap::with_key(),
            triangle_index: FastHashMap::default(),
            edge_index: FastHashMap::default(),
            finite_tetrahedra: 0,
            finite_triangles: 0,
            next_rank: 0,
        }
    }

    // -------------------------------------------------------------------------
    // Counts
    // -------------------------------------------------------------------------

    /// Number of nodes, triangulated or not.
    #[must_use]
    pub fn number_of_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of finite tetrahedra.
    #[must_use]
    pub const fn number_of_tetrahedra(&self) -> usize {
        self.finite_tetrahedra
    }

    /// Number of finite triangles.
    #[must_use]
    pub const fn number_of_triangles(&self) -> usize {
        self.finite_triangles
    }

    /// Number of edges.
    #[must_use]
    pub fn number_of_edges(&self) -> usize {
        self.edges.len()
    }

    /// Number of finite triangles with exactly one finite adjacent tetrahedron
    /// (the convex hull).
    #[must_use]
    pub fn number_of_open_triangles(&self) -> usize {
        self.triangles
            .iter()
            .filter(|(_, triangle)| !triangle.is_infinite())
            .filter(|(_, triangle)| self.finite_side_count(triangle) == 1)
            .count()
    }

    /// Number of tetrahedra including the infinite ones.
    #[must_use]
    pub fn number_of_all_tetrahedra(&self) -> usize {
        self.tetrahedra.len()
    }

    fn finite_side_count(&self, triangle: &Triangle3D) -> usize {
        triangle
            .tetrahedra()
            .iter()
            .flatten()
            .filter(|&&t| self.tetrahedra.get(t).is_some_and(|tet| !tet.is_infinite()))
            .count()
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Looks up a node.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::StaleNode`] for unknown keys.
    pub fn node(&self, node: NodeKey) -> Result<&SpaceNode<T>, MeshError> {
        self.nodes.get(node).ok_or(MeshError::StaleNode { node })
    }

    pub(crate) fn node_mut(&mut self, node: NodeKey) -> Result<&mut SpaceNode<T>, MeshError> {
        self.nodes.get_mut(node).ok_or(MeshError::StaleNode { node })
    }

    /// `true` if `node` is a live node key.
    #[must_use]
    pub fn contains_node(&self, node: NodeKey) -> bool {
        self.nodes.contains_key(node)
    }

    /// Position of a node.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::StaleNode`] for unknown keys.
    pub fn position(&self, node: NodeKey) -> Result<Position, MeshError> {
        self.node(node).map(|n| *n.position())
    }

    /// Position and insertion rank of a node.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::StaleNode`] for unknown keys.
    pub fn ranked_position(&self, node: NodeKey) -> Result<(Position, u64), MeshError> {
        self.node(node).map(|n| (*n.position(), n.rank()))
    }

    /// Iterates over all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeKey, &SpaceNode<T>)> {
        self.nodes.iter()
    }

    /// Looks up a tetrahedron.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::StaleTetrahedron`] for unknown keys.
    pub fn tetrahedron(&self, tetrahedron: TetrahedronKey) -> Result<&Tetrahedron, MeshError> {
        self.tetrahedra
            .get(tetrahedron)
            .ok_or(MeshError::StaleTetrahedron { tetrahedron })
    }

    /// `true` if `tetrahedron` is a live tetrahedron key.
    #[must_use]
    pub fn contains_tetrahedron(&self, tetrahedron: TetrahedronKey) -> bool {
        self.tetrahedra.contains_key(tetrahedron)
    }

    /// Iterates over all tetrahedra, infinite ones included.
    pub fn tetrahedra(&self) -> impl Iterator<Item = (TetrahedronKey, &Tetrahedron)> {
        self.tetrahedra.iter()
    }

    /// Iterates over the finite tetrahedra.
    pub fn finite_tetrahedra(&self) -> impl Iterator<Item = (TetrahedronKey, &Tetrahedron)> {
        self.tetrahedra.iter().filter(|(_, tet)| !tet.is_infinite())
    }

    /// Looks up a triangle.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::StaleTriangle`] for unknown keys.
    pub fn triangle(&self, triangle: TriangleKey) -> Result<&Triangle3D, MeshError> {
        self.triangles
            .get(triangle)
            .ok_or(MeshError::StaleTriangle { triangle })
    }

    /// Iterates over all triangles, infinite ones included.
    pub fn triangles(&self) -> impl Iterator<Item = (TriangleKey, &Triangle3D)> {
        self.triangles.iter()
    }

    /// The triangle with the given vertex set, if present.
    #[must_use]
    pub fn triangle_between(&self, nodes: [Option<NodeKey>; 3]) -> Option<TriangleKey> {
        self.triangle_index.get(&TriangleHashKey::new(nodes)).copied()
    }

    /// Looks up an edge.
    #[must_use]
    pub fn edge(&self, edge: EdgeKey) -> Option<&Edge> {
        self.edges.get(edge)
    }

    /// Iterates over all edges.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeKey, &Edge)> {
        self.edges.iter()
    }

    /// The edge joining `a` and `b`, if present.
    #[must_use]
    pub fn edge_between(&self, a: NodeKey, b: NodeKey) -> Option<EdgeKey> {
        self.edge_index.get(&EdgeHashKey::new(a, b)).copied()
    }

    /// Positions of the four vertices of a finite tetrahedron.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::DegenerateConfiguration`] for infinite tetrahedra
    /// and [`MeshError::StaleNode`] for dangling vertex keys.
    pub fn tetrahedron_positions(&self, tetrahedron: &Tetrahedron) -> Result<[Position; 4], MeshError> {
        let nodes = tetrahedron
            .finite_nodes()
            .ok_or_else(|| MeshError::degenerate("infinite tetrahedron has no finite positions"))?;
        Ok([
            self.position(nodes[0])?,
            self.position(nodes[1])?,
            self.position(nodes[2])?,
            self.position(nodes[3])?,
        ])
    }

    /// The tetrahedron across face `face` of `tetrahedron`.
    ///
    /// # Errors
    ///
    /// Returns a stale-key error if the tetrahedron or its face is gone.
    pub fn adjacent_tetrahedron(
        &self,
        tetrahedron: TetrahedronKey,
        face: usize,
    ) -> Result<Option<TetrahedronKey>, MeshError> {
        let tet = self.tetrahedron(tetrahedron)?;
        let triangle = self.triangle(tet.triangles()[face])?;
        Ok(triangle.opposite_tetrahedron(tetrahedron))
    }

    /// `true` if the tetrahedron exists and is infinite.
    #[must_use]
    pub fn is_infinite(&self, tetrahedron: TetrahedronKey) -> bool {
        self.tetrahedra.get(tetrahedron).is_some_and(Tetrahedron::is_infinite)
    }

    /// All tetrahedra incident to `node`, infinite ones included.
    ///
    /// Traverses the star from the node's cached tetrahedron; falls back to a
    /// full scan if the cache is unusable.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::StaleNode`] for unknown keys.
    pub fn incident_tetrahedra(&self, node: NodeKey) -> Result<StarBuffer, MeshError> {
        let start = self
            .node(node)?
            .adjacent_tetrahedron()
            .filter(|&t| self.tetrahedra.get(t).is_some_and(|tet| tet.contains_node(node)));
        let Some(start) = start else {
            let star: StarBuffer = self
                .tetrahedra
                .iter()
                .filter(|(_, tet)| tet.contains_node(node))
                .map(|(key, _)| key)
                .collect();
            if !star.is_empty() {
                tracing::warn!(?node, "stale adjacent tetrahedron cache; scanned all tetrahedra");
            }
            return Ok(star);
        };

        let mut star = StarBuffer::new();
        let mut visited = TetrahedronKeySet::default();
        visited.insert(start);
        star.push(start);
        let mut cursor = 0;
        while cursor < star.len() {
            let current = star[cursor];
            cursor += 1;
            let tet = self.tetrahedron(current)?;
            let Some(own) = tet.index_of_node(node) else {
                continue;
            };
            for face in (0..4).filter(|&face| face != own) {
                if let Some(next) = self.adjacent_tetrahedron(current, face)?
                    && visited.insert(next)
                {
                    star.push(next);
                }
            }
        }
        Ok(star)
    }

    /// Nodes sharing an edge with `node`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::StaleNode`] for unknown keys.
    pub fn neighbors(&self, node: NodeKey) -> Result<Vec<NodeKey>, MeshError> {
        Ok(self
            .node(node)?
            .edges()
            .iter()
            .filter_map(|&edge| self.edges.get(edge)?.opposite(node))
            .collect())
    }

    // -------------------------------------------------------------------------
    // Nodes
    // -------------------------------------------------------------------------

    pub(crate) fn add_node(&mut self, position: Position, content: T) -> NodeKey {
        let rank = self.take_rank();
        self.nodes.insert(SpaceNode::new(position, content, rank))
    }

    /// Gives `node` the newest insertion rank.
    pub(crate) fn refresh_rank(&mut self, node: NodeKey) -> Result<(), MeshError> {
        let rank = self.take_rank();
        self.node_mut(node)?.set_rank(rank);
        Ok(())
    }

    const fn take_rank(&mut self) -> u64 {
        let rank = self.next_rank;
        self.next_rank += 1;
        rank
    }

    /// Removes a node that is no longer referenced by any simplex.
    pub(crate) fn remove_node(&mut self, node: NodeKey) -> Result<SpaceNode<T>, MeshError> {
        let record = self.node(node)?;
        if !record.edges().is_empty()
            || record
                .adjacent_tetrahedron()
                .is_some_and(|t| self.tetrahedra.contains_key(t))
        {
            return Err(MeshError::reference(format!(
                "node {node:?} is still referenced by the mesh"
            )));
        }
        self.nodes.remove(node).ok_or(MeshError::StaleNode { node })
    }

    // -------------------------------------------------------------------------
    // Tetrahedra
    // -------------------------------------------------------------------------

    /// Builds the first tetrahedron from four non-coplanar nodes and closes
    /// its hull with four infinite tetrahedra.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::DegenerateConfiguration`] if the nodes are coplanar
    /// or the mesh already has tetrahedra.
    pub(crate) fn create_initial_tetrahedron(
        &mut self,
        a: NodeKey,
        b: NodeKey,
        c: NodeKey,
        d: NodeKey,
    ) -> Result<TetrahedronKey, MeshError> {
        if !self.tetrahedra.is_empty() {
            return Err(MeshError::degenerate("mesh already has tetrahedra"));
        }
        let (pa, pb, pc, pd) = (
            self.position(a)?,
            self.position(b)?,
            self.position(c)?,
            self.position(d)?,
        );
        let nodes = match orient3d(&pa, &pb, &pc, &pd) {
            Orientation::POSITIVE => [a, b, c, d],
            Orientation::NEGATIVE => [a, b, d, c],
            Orientation::DEGENERATE => {
                return Err(MeshError::degenerate("initial tetrahedron is flat"));
            }
        };

        let mut organizer = OpenTriangleOrganizer::simple();
        let first = self.create_tetrahedron(nodes.map(Some), Some(&mut organizer))?;
        for face in 0..4 {
            let [f0, f1, f2] = self.tetrahedron(first)?.face_nodes(face);
            self.create_tetrahedron([None, f0, f1, f2], Some(&mut organizer))?;
        }
        if !organizer.is_empty() {
            return Err(MeshError::reference(format!(
                "{} hull faces left open after bootstrap",
                organizer.len()
            )));
        }
        tracing::debug!(?first, "created initial tetrahedron");
        Ok(first)
    }

    /// Creates a tetrahedron on the given vertices.
    ///
    /// Finite tetrahedra must be positively oriented or flat; at most one slot
    /// may be infinite (it is moved to slot 0 by an even permutation).
    ///
    /// Each face is taken from `organizer` if it holds an open triangle with
    /// that vertex set, otherwise from the mesh if a triangle with a free
    /// side exists, otherwise it is created. Face status changes are reported
    /// back to `organizer`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::DegenerateConfiguration`] for inverted tetrahedra
    /// or more than one infinite vertex, and [`MeshError::StaleNode`] for
    /// unknown vertices.
    pub(crate) fn create_tetrahedron(
        &mut self,
        nodes: [Option<NodeKey>; 4],
        mut organizer: Option<&mut OpenTriangleOrganizer>,
    ) -> Result<TetrahedronKey, MeshError> {
        let nodes = normalize_infinite_first(nodes)
            .ok_or_else(|| MeshError::degenerate("tetrahedron with two infinite vertices"))?;
        for &node in nodes.iter().flatten() {
            self.node(node)?;
        }

        let (metrics, flat) = match nodes {
            [Some(a), Some(b), Some(c), Some(d)] => {
                let positions = [
                    self.position(a)?,
                    self.position(b)?,
                    self.position(c)?,
                    self.position(d)?,
                ];
                match orient3d(&positions[0], &positions[1], &positions[2], &positions[3]) {
                    Orientation::POSITIVE => (compute_metrics(&positions), false),
                    Orientation::DEGENERATE => (None, true),
                    Orientation::NEGATIVE => {
                        return Err(MeshError::degenerate("negatively oriented tetrahedron"));
                    }
                }
            }
            _ => (None, false),
        };

        let mut triangles = [TriangleKey::null(); 4];
        for (slot, face) in triangles.iter_mut().zip(FACE_VERTICES) {
            let vertices = [nodes[face[0]], nodes[face[1]], nodes[face[2]]];
            let hash = TriangleHashKey::new(vertices);
            let open = organizer
                .as_deref()
                .and_then(|o| o.get_triangle(&hash))
                .filter(|&t| self.triangles.get(t).is_some_and(|tr| tr.tetrahedron_count() < 2));
            let indexed = self
                .triangle_index
                .get(&hash)
                .copied()
                .filter(|&t| self.triangles.get(t).is_some_and(|tr| tr.tetrahedron_count() < 2));
            *slot = match open.or(indexed) {
                Some(existing) => existing,
                None => self.create_triangle(vertices, hash),
            };
        }

        let key = self
            .tetrahedra
            .insert(Tetrahedron::new(nodes, triangles, metrics, flat));
        let infinite = nodes[0].is_none();
        if !infinite {
            self.finite_tetrahedra += 1;
        }

        for triangle_key in triangles {
            let triangle = self
                .triangles
                .get_mut(triangle_key)
                .ok_or(MeshError::StaleTriangle {
                    triangle: triangle_key,
                })?;
            if !triangle.add_tetrahedron(key) {
                return Err(MeshError::reference("face already has two tetrahedra"));
            }
            if let Some(organizer) = organizer.as_deref_mut() {
                let hash = triangle.hash_key();
                if triangle.tetrahedron_count() == 2 {
                    if organizer.get_triangle(&hash) == Some(triangle_key) {
                        organizer.unregister_triangle(&hash);
                    }
                } else {
                    organizer.register_triangle(hash, triangle_key);
                }
            }
        }

        for &node in nodes.iter().flatten() {
            let cached = self.nodes.get(node).and_then(SpaceNode::adjacent_tetrahedron);
            let replace = match cached.and_then(|t| self.tetrahedra.get(t)) {
                None => true,
                Some(tet) => !tet.contains_node(node) || (tet.is_infinite() && !infinite),
            };
            if replace {
                self.node_mut(node)?.set_adjacent_tetrahedron(Some(key));
            }
        }
        Ok(key)
    }

    fn create_triangle(&mut self, nodes: [Option<NodeKey>; 3], hash: TriangleHashKey) -> TriangleKey {
        let key = self.triangles.insert(Triangle3D::new(nodes));
        if let Some(&existing) = self.triangle_index.get(&hash) {
            tracing::trace!(?existing, shadow = ?key, "duplicate triangle for a transient flat tetrahedron");
        } else {
            self.triangle_index.insert(hash, key);
        }
        if let [Some(a), Some(b), Some(c)] = nodes {
            self.finite_triangles += 1;
            for (u, v) in [(a, b), (b, c), (c, a)] {
                let edge = self.edge_key_or_insert(u, v);
                if let Some(edge) = self.edges.get_mut(edge) {
                    edge.add_triangle(key);
                }
            }
        }
        key
    }

    fn edge_key_or_insert(&mut self, a: NodeKey, b: NodeKey) -> EdgeKey {
        let hash = EdgeHashKey::new(a, b);
        if let Some(&edge) = self.edge_index.get(&hash) {
            return edge;
        }
        let edge = self.edges.insert(Edge::new(a, b));
        self.edge_index.insert(hash, edge);
        for node in [a, b] {
            if let Some(record) = self.nodes.get_mut(node) {
                record.add_edge(edge);
            }
        }
        edge
    }

    fn delete_triangle(&mut self, key: TriangleKey) {
        let Some(triangle) = self.triangles.remove(key) else {
            return;
        };
        let hash = triangle.hash_key();
        if self.triangle_index.get(&hash) == Some(&key) {
            self.triangle_index.remove(&hash);
        }
        if let [Some(a), Some(b), Some(c)] = *triangle.nodes() {
            self.finite_triangles -= 1;
            for (u, v) in [(a, b), (b, c), (c, a)] {
                let edge_hash = EdgeHashKey::new(u, v);
                let Some(&edge_key) = self.edge_index.get(&edge_hash) else {
                    continue;
                };
                let emptied = self
                    .edges
                    .get_mut(edge_key)
                    .is_some_and(|edge| edge.remove_triangle(key));
                if emptied {
                    self.edges.remove(edge_key);
                    self.edge_index.remove(&edge_hash);
                    for node in [u, v] {
                        if let Some(record) = self.nodes.get_mut(node) {
                            record.remove_edge(edge_key);
                        }
                    }
                }
            }
        }
    }

    /// Removes a tetrahedron.
    ///
    /// Faces left without tetrahedra are deleted (together with edges that
    /// lose their last triangle); faces that keep one side are reported open
    /// to `organizer`. Returns the removed vertex slots.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::StaleTetrahedron`] for unknown keys.
    pub(crate) fn remove_tetrahedron(
        &mut self,
        key: TetrahedronKey,
        mut organizer: Option<&mut OpenTriangleOrganizer>,
    ) -> Result<[Option<NodeKey>; 4], MeshError> {
        let tet = self
            .tetrahedra
            .remove(key)
            .ok_or(MeshError::StaleTetrahedron { tetrahedron: key })?;
        if !tet.is_infinite() {
            self.finite_tetrahedra -= 1;
        }

        let mut survivors = [None; 4];
        for (face, &triangle_key) in tet.triangles().iter().enumerate() {
            let Some(triangle) = self.triangles.get_mut(triangle_key) else {
                continue;
            };
            triangle.remove_tetrahedron(key);
            let hash = triangle.hash_key();
            survivors[face] = triangle.tetrahedra().iter().flatten().next().copied();
            if survivors[face].is_none() {
                self.delete_triangle(triangle_key);
                if let Some(organizer) = organizer.as_deref_mut()
                    && organizer.get_triangle(&hash) == Some(triangle_key)
                {
                    organizer.unregister_triangle(&hash);
                }
            } else if let Some(organizer) = organizer.as_deref_mut() {
                organizer.register_triangle(hash, triangle_key);
            }
        }

        // Point dangling caches at a surviving tetrahedron through a face
        // that contains the node.
        for (index, slot) in tet.nodes().iter().enumerate() {
            let Some(node) = *slot else {
                continue;
            };
            let Some(record) = self.nodes.get_mut(node) else {
                continue;
            };
            if record.adjacent_tetrahedron() == Some(key) {
                let replacement = (0..4)
                    .filter(|&face| face != index)
                    .find_map(|face| survivors[face]);
                record.set_adjacent_tetrahedron(replacement);
            }
        }
        Ok(*tet.nodes())
    }

    /// Swaps face `old` of `tetrahedron` for `new`, deleting `old` if it is
    /// left without tetrahedra.
    pub(crate) fn replace_triangle(
        &mut self,
        tetrahedron: TetrahedronKey,
        old: TriangleKey,
        new: TriangleKey,
    ) -> Result<(), MeshError> {
        let index = self
            .tetrahedron(tetrahedron)?
            .index_of_triangle(old)
            .ok_or_else(|| MeshError::reference("triangle is not a face of the tetrahedron"))?;
        if self.triangle(old)?.hash_key() != self.triangle(new)?.hash_key() {
            return Err(MeshError::reference("replacement triangle has different vertices"));
        }
        if !self
            .triangles
            .get_mut(new)
            .ok_or(MeshError::StaleTriangle { triangle: new })?
            .add_tetrahedron(tetrahedron)
        {
            return Err(MeshError::reference("replacement triangle already has two tetrahedra"));
        }
        if let Some(tet) = self.tetrahedra.get_mut(tetrahedron) {
            tet.set_triangle(index, new);
        }
        if let Some(triangle) = self.triangles.get_mut(old) {
            triangle.remove_tetrahedron(tetrahedron);
            if triangle.tetrahedron_count() == 0 {
                self.delete_triangle(old);
            }
        }
        let hash = self.triangle(new)?.hash_key();
        self.triangle_index.insert(hash, new);
        Ok(())
    }

    /// Recomputes the cached circumsphere and volume of a finite tetrahedron.
    pub(crate) fn refresh_metrics(&mut self, tetrahedron: TetrahedronKey) -> Result<(), MeshError> {
        let tet = self.tetrahedron(tetrahedron)?;
        if tet.is_infinite() {
            return Ok(());
        }
        let positions = self.tetrahedron_positions(tet)?;
        let metrics = compute_metrics(&positions);
        let nodes = *tet.nodes();
        let triangles = *tet.triangles();
        let flat = tet.is_flat();
        if let Some(tet) = self.tetrahedra.get_mut(tetrahedron) {
            *tet = Tetrahedron::new(nodes, triangles, metrics, flat);
        }
        Ok(())
    }

    /// Drops every simplex, leaving only the nodes.
    pub(crate) fn clear_simplices(&mut self) {
        self.tetrahedra.clear();
        self.triangles.clear();
        self.edges.clear();
        self.triangle_index.clear();
        self.edge_index.clear();
        self.finite_tetrahedra = 0;
        self.finite_triangles = 0;
        for (_, node) in &mut self.nodes {
            node.set_adjacent_tetrahedron(None);
            node.clear_edges();
        }
    }
}

fn compute_metrics(positions: &[Position; 4]) -> Option<TetrahedronMetrics> {
    let [a, b, c, d] = positions;
    let (circumcenter, squared_radius) = circumsphere(a, b, c, d).ok()?;
    Some(TetrahedronMetrics {
        circumcenter,
        squared_radius,
        volume: signed_volume(a, b, c, d).abs(),
    })
}
