//! The public face of the crate: a dynamic Delaunay organization of points.
//!
//! [`SpatialOrganizer`] owns a [`Mesh`] and keeps it Delaunay while nodes are
//! inserted, moved and removed. Until four non-coplanar nodes exist, nodes
//! wait in a pending list and no tetrahedra are built; the first spanning
//! quadruple bootstraps the mesh and the remaining pending nodes are
//! inserted into it.
//!
//! Every mutation keeps the mesh valid or reports an error. When a flip
//! repair fails, the node is taken out again and re-inserted through its
//! cavity ([`FlipStatistics::fallback_rebuilds`]). Only if that fails as
//! well is the whole triangulation rebuilt from its nodes
//! ([`FlipStatistics::global_rebuilds`]).
//!
//! # Examples
//!
//! ```rust
//! use spatial_organization::prelude::*;
//!
//! let mut organizer = SpatialOrganizer::new();
//! let corners = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
//!     .map(|p| organizer.insert(p, "corner").unwrap());
//! assert_eq!(organizer.number_of_tetrahedra(), 1);
//!
//! let center = organizer.insert([0.25, 0.25, 0.25], "center").unwrap();
//! assert_eq!(organizer.number_of_tetrahedra(), 4);
//!
//! let mut neighbors = organizer.get_neighbors(center).unwrap();
//! neighbors.sort();
//! let mut expected = corners.to_vec();
//! expected.sort();
//! assert_eq!(neighbors, expected);
//! ```

use crate::core::{
    algorithms::{
        flips::{FlipError, FlipStatistics, restore_delaunay_around},
        insertion::{InsertionError, insert_located, reinsert_through_cavity},
        locate::{LocateError, LocateResult, default_walk_budget, locate_or_scan},
        removal::remove_star,
    },
    config::SpatialConfig,
    listener::NodeListener,
    mesh::{Mesh, MeshError},
    space_node::{NodeKey, SpaceNode},
    tetrahedron::TetrahedronKey,
    validation::{ValidationError, validate},
};
use crate::geometry::{
    exact_vector::ExactVector,
    predicates::{InSphere, Orientation, insphere_symbolic, orient3d},
    util::{
        GeometryError, Position, add, barycentric_coordinates, is_finite_position, normalize,
        scale, squared_distance, subtract,
    },
};
use ordered_float::OrderedFloat;
use rand::{SeedableRng, rngs::StdRng};
use std::fmt;
use thiserror::Error;

// =============================================================================
// ERRORS
// =============================================================================

/// Errors reported by [`SpatialOrganizer`] operations.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum SpatialError {
    /// The position is already occupied by a node.
    ///
    /// `proposed_position` is a nearby free position a caller may retry with.
    #[error(
        "Position {position:?} is occupied by node {existing:?}; try {proposed_position:?}"
    )]
    PositionNotAllowed {
        /// The rejected position.
        position: Position,
        /// The node occupying it.
        existing: NodeKey,
        /// A nearby position that is free.
        proposed_position: Position,
    },
    /// The position has a NaN or infinite coordinate.
    #[error("Invalid position {position:?}: coordinates must be finite")]
    InvalidPosition {
        /// The rejected position.
        position: Position,
    },
    /// The node key does not belong to this organizer.
    #[error("Unknown node {node:?}")]
    UnknownNode {
        /// The stale key.
        node: NodeKey,
    },
    /// Structural failure of the mesh.
    #[error(transparent)]
    Mesh(#[from] MeshError),
    /// Point location failed.
    #[error(transparent)]
    Locate(#[from] LocateError),
    /// Insertion failed even after rebuilding.
    #[error(transparent)]
    Insertion(#[from] InsertionError),
    /// A full validation found a violation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Floating-point geometry failed.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

// =============================================================================
// ORGANIZER
// =============================================================================

/// How a move was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Movement {
    /// Position updated, connectivity repaired by flips if needed.
    InPlace,
    /// Node taken out and inserted again.
    Reinserted,
}

/// A dynamic 3D Delaunay triangulation over nodes carrying payloads of type `T`.
pub struct SpatialOrganizer<T> {
    mesh: Mesh<T>,
    pending: Vec<NodeKey>,
    config: SpatialConfig,
    rng: StdRng,
    listeners: Vec<Box<dyn NodeListener<T> + Send + Sync>>,
    flip_statistics: FlipStatistics,
    flip_movements: usize,
    delete_insert_movements: usize,
    last_tetrahedron: Option<TetrahedronKey>,
}

impl<T> fmt::Debug for SpatialOrganizer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialOrganizer")
            .field("nodes", &self.mesh.number_of_nodes())
            .field("tetrahedra", &self.mesh.number_of_tetrahedra())
            .field("pending", &self.pending.len())
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .field("flip_statistics", &self.flip_statistics)
            .finish_non_exhaustive()
    }
}

impl<T> Default for SpatialOrganizer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SpatialOrganizer<T> {
    /// Creates an empty organizer with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SpatialConfig::default())
    }

    /// Creates an empty organizer.
    #[must_use]
    pub fn with_config(config: SpatialConfig) -> Self {
        Self {
            mesh: Mesh::new(),
            pending: Vec::new(),
            rng: StdRng::seed_from_u64(config.walk_seed),
            config,
            listeners: Vec::new(),
            flip_statistics: FlipStatistics::default(),
            flip_movements: 0,
            delete_insert_movements: 0,
            last_tetrahedron: None,
        }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &SpatialConfig {
        &self.config
    }

    /// Read access to the underlying mesh.
    #[must_use]
    pub const fn mesh(&self) -> &Mesh<T> {
        &self.mesh
    }

    /// Registers a listener; it is notified after all earlier ones.
    pub fn add_listener<L>(&mut self, listener: L)
    where
        L: NodeListener<T> + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Inserts a node at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::PositionNotAllowed`] if a node already occupies
    /// the position (within [`SpatialConfig::duplicate_tolerance`]); the
    /// organization is unchanged in that case. Returns
    /// [`SpatialError::InvalidPosition`] for non-finite coordinates.
    pub fn insert(&mut self, position: Position, content: T) -> Result<NodeKey, SpatialError> {
        self.insert_with_hint(position, content, None)
    }

    /// Inserts a node, starting the point location next to `hint`.
    ///
    /// A good hint is a node known to be close to `position`.
    ///
    /// # Errors
    ///
    /// As [`insert`](Self::insert); additionally
    /// [`SpatialError::UnknownNode`] for a stale hint.
    pub fn insert_with_hint(
        &mut self,
        position: Position,
        content: T,
        hint: Option<NodeKey>,
    ) -> Result<NodeKey, SpatialError> {
        if !is_finite_position(&position) {
            return Err(SpatialError::InvalidPosition { position });
        }
        let start = match hint {
            Some(node) => self
                .mesh
                .node(node)
                .map_err(|_| SpatialError::UnknownNode { node })?
                .adjacent_tetrahedron(),
            None => None,
        };

        for listener in &mut self.listeners {
            listener.node_about_to_be_added(&position, &content);
        }
        let node = self.mesh.add_node(position, content);
        if let Err(err) = self.attach(node, start) {
            self.pending.retain(|&n| n != node);
            if let Err(cleanup) = self.mesh.remove_node(node) {
                tracing::warn!(?node, %cleanup, "could not discard rejected node");
            }
            return Err(err);
        }
        for listener in &mut self.listeners {
            listener.node_added(node, &position);
        }
        self.after_mutation("insert");
        Ok(node)
    }

    /// Removes `node` and returns its payload.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::UnknownNode`] for stale keys.
    pub fn remove(&mut self, node: NodeKey) -> Result<T, SpatialError> {
        let position = self.position(node)?;
        for listener in &mut self.listeners {
            listener.node_about_to_be_removed(node, &position);
        }
        self.detach(node)?;
        let record = self.mesh.remove_node(node)?;
        for listener in &mut self.listeners {
            listener.node_removed(node, &position);
        }
        self.after_mutation("remove");
        Ok(record.into_content())
    }

    /// Moves `node` to `position`.
    ///
    /// Moves that keep every tetrahedron of the node's star positively
    /// oriented update the position in place and flip until the mesh is
    /// Delaunay again. Otherwise the node is taken out and re-inserted at the
    /// new position; its key stays valid either way.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::PositionNotAllowed`] if another node occupies
    /// the target; the node is left at its old position.
    pub fn move_to(&mut self, node: NodeKey, position: Position) -> Result<(), SpatialError> {
        if !is_finite_position(&position) {
            return Err(SpatialError::InvalidPosition { position });
        }
        let from = self.position(node)?;
        if from == position {
            return Ok(());
        }
        for listener in &mut self.listeners {
            listener.node_about_to_move(node, &from, &position);
        }

        let movement = match self.try_move_in_place(node, &position)? {
            Some(movement) => movement,
            None => {
                self.move_by_reinsertion(node, from, position)?;
                Movement::Reinserted
            }
        };
        match movement {
            Movement::InPlace => self.flip_movements += 1,
            Movement::Reinserted => self.delete_insert_movements += 1,
        }
        tracing::trace!(?node, ?movement, "moved node");

        for listener in &mut self.listeners {
            listener.node_moved(node, &from, &position);
        }
        self.after_mutation("move");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Nodes sharing a tetrahedron with `node`.
    ///
    /// Empty while the organization has no tetrahedra.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::UnknownNode`] for stale keys.
    pub fn get_neighbors(&self, node: NodeKey) -> Result<Vec<NodeKey>, SpatialError> {
        self.mesh
            .neighbors(node)
            .map_err(|_| SpatialError::UnknownNode { node })
    }

    /// Vertices of a tetrahedron containing `position`.
    ///
    /// Points on a shared face, edge or node resolve to one of the
    /// tetrahedra touching it. Returns `None` outside the convex hull or
    /// before the first tetrahedron exists.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::InvalidPosition`] for non-finite coordinates.
    pub fn get_vertices_of_the_tetrahedron_containing(
        &self,
        position: &Position,
    ) -> Result<Option<[NodeKey; 4]>, SpatialError> {
        if !is_finite_position(position) {
            return Err(SpatialError::InvalidPosition { position: *position });
        }
        if self.mesh.number_of_tetrahedra() == 0 {
            return Ok(None);
        }
        // Queries walk with their own generator; `self.rng` only advances on mutations.
        let mut rng = StdRng::seed_from_u64(self.config.walk_seed);
        let location = locate_or_scan(
            &self.mesh,
            position,
            self.last_tetrahedron,
            &mut rng,
            self.walk_budget(),
        )?;
        let tetrahedron = match location {
            LocateResult::InsideTetrahedron(key) | LocateResult::OnBoundary(key) => Some(key),
            LocateResult::OnNode(node) => self
                .mesh
                .incident_tetrahedra(node)?
                .into_iter()
                .find(|&key| !self.mesh.is_infinite(key)),
            LocateResult::Outside(_) => None,
        };
        let Some(tetrahedron) = tetrahedron else {
            return Ok(None);
        };
        Ok(self.mesh.tetrahedron(tetrahedron)?.finite_nodes())
    }

    /// Barycentric coordinates of `point` with respect to `vertices`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::DegenerateTetrahedron`] for coplanar vertices.
    pub fn get_barycentric_coordinates(
        point: &Position,
        vertices: &[Position; 4],
    ) -> Result<[f64; 4], GeometryError> {
        barycentric_coordinates(point, vertices)
    }

    /// The tetrahedron containing `position` together with the barycentric
    /// coordinates of `position` in it, for interpolating node values.
    ///
    /// # Errors
    ///
    /// As [`get_vertices_of_the_tetrahedron_containing`](Self::get_vertices_of_the_tetrahedron_containing).
    pub fn interpolation_weights(
        &self,
        position: &Position,
    ) -> Result<Option<([NodeKey; 4], [f64; 4])>, SpatialError> {
        let Some(vertices) = self.get_vertices_of_the_tetrahedron_containing(position)? else {
            return Ok(None);
        };
        let corners = [
            self.mesh.position(vertices[0])?,
            self.mesh.position(vertices[1])?,
            self.mesh.position(vertices[2])?,
            self.mesh.position(vertices[3])?,
        ];
        let weights = barycentric_coordinates(position, &corners)?;
        Ok(Some((vertices, weights)))
    }

    /// A quarter of the volume of every finite tetrahedron incident to `node`.
    ///
    /// Summed over all nodes this yields the volume of the convex hull.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::UnknownNode`] for stale keys.
    pub fn node_volume(&self, node: NodeKey) -> Result<f64, SpatialError> {
        if !self.mesh.contains_node(node) {
            return Err(SpatialError::UnknownNode { node });
        }
        let mut volume = 0.0;
        for key in self.mesh.incident_tetrahedra(node)? {
            if let Some(metrics) = self.mesh.tetrahedron(key)?.metrics() {
                volume += metrics.volume / 4.0;
            }
        }
        Ok(volume)
    }

    /// Looks up a node.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::UnknownNode`] for stale keys.
    pub fn node(&self, node: NodeKey) -> Result<&SpaceNode<T>, SpatialError> {
        self.mesh
            .node(node)
            .map_err(|_| SpatialError::UnknownNode { node })
    }

    /// Current position of `node`.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::UnknownNode`] for stale keys.
    pub fn position(&self, node: NodeKey) -> Result<Position, SpatialError> {
        Ok(*self.node(node)?.position())
    }

    /// Payload of `node`.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::UnknownNode`] for stale keys.
    pub fn content(&self, node: NodeKey) -> Result<&T, SpatialError> {
        Ok(self.node(node)?.content())
    }

    /// Mutable payload of `node`.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::UnknownNode`] for stale keys.
    pub fn content_mut(&mut self, node: NodeKey) -> Result<&mut T, SpatialError> {
        Ok(self
            .mesh
            .node_mut(node)
            .map_err(|_| SpatialError::UnknownNode { node })?
            .content_mut())
    }

    /// `true` if `node` belongs to this organizer.
    #[must_use]
    pub fn contains(&self, node: NodeKey) -> bool {
        self.mesh.contains_node(node)
    }

    /// All nodes.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeKey, &SpaceNode<T>)> {
        self.mesh.nodes()
    }

    /// Number of nodes, including pending ones.
    #[must_use]
    pub fn number_of_nodes(&self) -> usize {
        self.mesh.number_of_nodes()
    }

    /// Nodes waiting for a non-coplanar quadruple before the mesh is built.
    #[must_use]
    pub fn number_of_pending_nodes(&self) -> usize {
        self.pending.len()
    }

    /// Number of finite tetrahedra.
    #[must_use]
    pub const fn number_of_tetrahedra(&self) -> usize {
        self.mesh.number_of_tetrahedra()
    }

    /// Number of finite triangles.
    #[must_use]
    pub const fn number_of_triangles(&self) -> usize {
        self.mesh.number_of_triangles()
    }

    /// Number of convex hull triangles.
    #[must_use]
    pub fn number_of_open_triangles(&self) -> usize {
        self.mesh.number_of_open_triangles()
    }

    /// Number of edges.
    #[must_use]
    pub fn number_of_edges(&self) -> usize {
        self.mesh.number_of_edges()
    }

    /// Flip counters accumulated over all insertions.
    #[must_use]
    pub const fn flip_statistics(&self) -> FlipStatistics {
        self.flip_statistics
    }

    /// Moves that only updated the node's position.
    #[must_use]
    pub const fn flip_movements(&self) -> usize {
        self.flip_movements
    }

    /// Moves that removed and re-inserted the node.
    #[must_use]
    pub const fn delete_insert_movements(&self) -> usize {
        self.delete_insert_movements
    }

    /// Runs the full consistency and Delaunay check.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), SpatialError> {
        Ok(validate(&self.mesh)?)
    }

    /// `true` if [`validate`](Self::validate) passes.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn locate_point(
        &mut self,
        position: &Position,
        hint: Option<TetrahedronKey>,
    ) -> Result<LocateResult, SpatialError> {
        let budget = self.walk_budget();
        Ok(locate_or_scan(
            &self.mesh,
            position,
            hint.or(self.last_tetrahedron),
            &mut self.rng,
            budget,
        )?)
    }

    fn walk_budget(&self) -> usize {
        self.config
            .max_walk_steps
            .unwrap_or_else(|| default_walk_budget(self.mesh.number_of_tetrahedra()))
    }

    /// Links a node that is in the arena but in no simplex into the mesh.
    fn attach(&mut self, node: NodeKey, hint: Option<TetrahedronKey>) -> Result<(), SpatialError> {
        self.mesh.refresh_rank(node)?;
        let position = self.mesh.position(node)?;
        if let Some(existing) = self.coincident_node(node, &position) {
            return Err(self.position_not_allowed(node, position, existing));
        }
        if self.mesh.number_of_all_tetrahedra() == 0 {
            self.pending.push(node);
            return self.try_bootstrap();
        }

        let location = self.locate_point(&position, hint)?;
        match insert_located(&mut self.mesh, node, location, &self.config) {
            Ok(stats) => {
                self.flip_statistics += stats;
                self.last_tetrahedron = self.mesh.node(node)?.adjacent_tetrahedron();
                Ok(())
            }
            Err(InsertionError::CoincidentNode { node: existing }) => {
                Err(self.position_not_allowed(node, position, existing))
            }
            Err(err) => {
                tracing::warn!(?node, %err, "local insertion failed; re-inserting through the cavity");
                self.reinsert_locally(node)
            }
        }
    }

    /// Re-inserts `node` through its cavity, rebuilding everything
    /// if even that fails.
    fn reinsert_locally(&mut self, node: NodeKey) -> Result<(), SpatialError> {
        self.flip_statistics.fallback_rebuilds += 1;
        self.last_tetrahedron = None;
        match reinsert_through_cavity(&mut self.mesh, node, &self.config) {
            Ok(()) => {
                self.last_tetrahedron = self.mesh.node(node)?.adjacent_tetrahedron();
                Ok(())
            }
            Err(InsertionError::CoincidentNode { node: existing }) => {
                let position = self.mesh.position(node)?;
                Err(self.position_not_allowed(node, position, existing))
            }
            Err(err) => {
                tracing::warn!(?node, %err, "cavity re-insertion failed");
                self.rebuild_globally(None)
            }
        }
    }

    /// Last resort: triangulates all nodes again, leaving `excluded` out.
    fn rebuild_globally(&mut self, excluded: Option<NodeKey>) -> Result<(), SpatialError> {
        self.flip_statistics.global_rebuilds += 1;
        self.tear_down(excluded)
    }

    /// Unlinks `node` from every simplex, keeping the rest valid.
    fn detach(&mut self, node: NodeKey) -> Result<(), SpatialError> {
        if let Some(index) = self.pending.iter().position(|&n| n == node) {
            self.pending.swap_remove(index);
            return Ok(());
        }
        if self.mesh.number_of_all_tetrahedra() == 0 {
            return Ok(());
        }
        self.last_tetrahedron = None;
        if self.mesh.number_of_nodes() <= 4 {
            return self.tear_down(Some(node));
        }
        match remove_star(&mut self.mesh, node, self.config.open_triangle_capacity) {
            Ok(_) if self.mesh.number_of_tetrahedra() > 0 => Ok(()),
            Ok(_) => self.tear_down(Some(node)),
            Err(err) => {
                tracing::warn!(?node, %err, "local removal failed; rebuilding the triangulation");
                self.rebuild_globally(Some(node))
            }
        }
    }

    /// Drops all simplices and triangulates the nodes again, leaving
    /// `excluded` detached.
    fn tear_down(&mut self, excluded: Option<NodeKey>) -> Result<(), SpatialError> {
        self.mesh.clear_simplices();
        self.last_tetrahedron = None;
        self.pending = self
            .mesh
            .nodes()
            .map(|(key, _)| key)
            .filter(|&key| Some(key) != excluded)
            .collect();
        tracing::debug!(nodes = self.pending.len(), "rebuilding triangulation");
        self.try_bootstrap()
    }

    /// Builds the first tetrahedron once the pending nodes span space.
    fn try_bootstrap(&mut self) -> Result<(), SpatialError> {
        if self.mesh.number_of_all_tetrahedra() > 0 || self.pending.len() < 4 {
            return Ok(());
        }
        let Some(corners) = self.spanning_nodes()? else {
            return Ok(());
        };
        let [a, b, c, d] = corners;
        let first = self.mesh.create_initial_tetrahedron(a, b, c, d)?;
        self.last_tetrahedron = Some(first);

        let rest: Vec<NodeKey> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|node| !corners.contains(node))
            .collect();
        tracing::debug!(nodes = rest.len() + 4, "bootstrapped triangulation");
        for node in rest {
            if let Err(err) = self.insert_pending(node) {
                tracing::warn!(?node, %err, "bootstrap failed; all nodes are pending again");
                self.return_to_pending();
                return Err(err);
            }
        }
        Ok(())
    }

    fn insert_pending(&mut self, node: NodeKey) -> Result<(), SpatialError> {
        let position = self.mesh.position(node)?;
        let location = self.locate_point(&position, None)?;
        let stats = insert_located(&mut self.mesh, node, location, &self.config)?;
        self.flip_statistics += stats;
        self.last_tetrahedron = self.mesh.node(node)?.adjacent_tetrahedron();
        Ok(())
    }

    /// Drops all simplices and lists every node as pending.
    fn return_to_pending(&mut self) {
        self.mesh.clear_simplices();
        self.last_tetrahedron = None;
        self.pending = self.mesh.nodes().map(|(key, _)| key).collect();
    }

    /// Four pending nodes that are not coplanar, if any exist.
    fn spanning_nodes(&self) -> Result<Option<[NodeKey; 4]>, SpatialError> {
        let candidates = self
            .pending
            .iter()
            .map(|&node| Ok((node, self.mesh.position(node)?)))
            .collect::<Result<Vec<_>, MeshError>>()?;
        let Some(&(a, pa)) = candidates.first() else {
            return Ok(None);
        };
        let Some(&(b, pb)) = candidates.iter().find(|(_, p)| *p != pa) else {
            return Ok(None);
        };
        let Some(&(c, pc)) = candidates.iter().find(|(_, p)| !collinear(&pa, &pb, p)) else {
            return Ok(None);
        };
        let Some(&(d, _)) = candidates
            .iter()
            .find(|(_, p)| orient3d(&pa, &pb, &pc, p) != Orientation::DEGENERATE)
        else {
            return Ok(None);
        };
        Ok(Some([a, b, c, d]))
    }

    /// A node other than `node` occupying `position`.
    ///
    /// With a zero tolerance, triangulated nodes are found by point location
    /// instead, so only pending nodes are scanned.
    fn coincident_node(&self, node: NodeKey, position: &Position) -> Option<NodeKey> {
        let tolerance = self.config.duplicate_tolerance.max(0.0);
        if tolerance == 0.0 && self.mesh.number_of_all_tetrahedra() > 0 {
            return None;
        }
        let limit = tolerance * tolerance;
        self.mesh
            .nodes()
            .filter(|&(key, _)| key != node)
            .find(|(_, other)| squared_distance(position, other.position()) <= limit)
            .map(|(key, _)| key)
    }

    fn position_not_allowed(
        &self,
        node: NodeKey,
        position: Position,
        existing: NodeKey,
    ) -> SpatialError {
        SpatialError::PositionNotAllowed {
            position,
            existing,
            proposed_position: self.proposed_position(node, &position, existing),
        }
    }

    /// A free position near `position`: half the distance from `existing` to
    /// its nearest neighbor, in the direction of its farthest neighbor.
    fn proposed_position(&self, node: NodeKey, position: &Position, existing: NodeKey) -> Position {
        let Ok(origin) = self.mesh.position(existing) else {
            return *position;
        };
        let neighbors: Vec<Position> = if self.mesh.number_of_all_tetrahedra() > 0 {
            self.mesh
                .neighbors(existing)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|key| self.mesh.position(key).ok())
                .collect()
        } else {
            self.mesh
                .nodes()
                .filter(|&(key, _)| key != node && key != existing)
                .map(|(_, other)| *other.position())
                .collect()
        };
        let nearest = neighbors
            .iter()
            .map(|p| OrderedFloat(squared_distance(&origin, p)))
            .min();
        let farthest = neighbors
            .iter()
            .max_by_key(|p| OrderedFloat(squared_distance(&origin, p)));
        match (nearest, farthest) {
            (Some(nearest), Some(farthest)) if nearest.0 > 0.0 => {
                let direction = normalize(&subtract(farthest, &origin));
                add(position, &scale(&direction, 0.5 * nearest.0.sqrt()))
            }
            _ => {
                let shift = (2.0 * self.config.duplicate_tolerance)
                    .max(1e-6 * position[0].abs().max(1.0));
                [position[0] + shift, position[1], position[2]]
            }
        }
    }

    /// `true` if every hull edge of the infinite tetrahedron `key` stays
    /// strictly convex once `node` sits at `to`.
    fn hull_stays_convex(
        &self,
        key: TetrahedronKey,
        node: NodeKey,
        to: &Position,
    ) -> Result<bool, SpatialError> {
        let at = |vertex: NodeKey| -> Result<Position, MeshError> {
            if vertex == node {
                Ok(*to)
            } else {
                self.mesh.position(vertex)
            }
        };
        let tet = self.mesh.tetrahedron(key)?;
        let [Some(a), Some(b), Some(c)] = tet.face_nodes(0) else {
            return Ok(false);
        };
        let hull_face = [at(a)?, at(b)?, at(c)?];
        for face in 1..4 {
            let Some(across) = self.mesh.adjacent_tetrahedron(key, face)? else {
                return Ok(false);
            };
            let Some(apex) = self
                .mesh
                .tetrahedron(across)?
                .nodes()
                .iter()
                .flatten()
                .copied()
                .find(|&vertex| !tet.contains_node(vertex))
            else {
                return Ok(false);
            };
            if orient3d(&hull_face[0], &hull_face[1], &hull_face[2], &at(apex)?)
                != Orientation::NEGATIVE
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Moves `node` without re-inserting it, if its star stays positively
    /// oriented at `to` and the hull stays convex.
    ///
    /// Returns `None` without touching the mesh when the node has to be
    /// re-inserted instead. Faces the move made non-Delaunay are flipped;
    /// a cascade that cannot finish falls back to cavity re-insertion.
    fn try_move_in_place(
        &mut self,
        node: NodeKey,
        to: &Position,
    ) -> Result<Option<Movement>, SpatialError> {
        if self.mesh.number_of_all_tetrahedra() == 0 || self.pending.contains(&node) {
            return Ok(None);
        }
        if self.config.duplicate_tolerance > 0.0 && self.coincident_node(node, to).is_some() {
            return Ok(None);
        }
        let from = self.mesh.position(node)?;
        let rank = self.mesh.node(node)?.rank();
        let star = self.mesh.incident_tetrahedra(node)?;
        if star.is_empty() {
            return Ok(None);
        }

        let mut delaunay = true;
        for &key in &star {
            let tet = self.mesh.tetrahedron(key)?;
            let Some(vertices) = tet.finite_nodes() else {
                if !self.hull_stays_convex(key, node, to)? {
                    return Ok(None);
                }
                continue;
            };
            let mut corners = [([0.0; 3], 0_u64); 4];
            for (corner, &vertex) in corners.iter_mut().zip(&vertices) {
                *corner = if vertex == node {
                    (*to, rank)
                } else {
                    self.mesh.ranked_position(vertex)?
                };
            }
            if orient3d(&corners[0].0, &corners[1].0, &corners[2].0, &corners[3].0)
                != Orientation::POSITIVE
            {
                return Ok(None);
            }
            if !delaunay {
                continue;
            }

            for face in 0..4 {
                let Some(across) = self.mesh.adjacent_tetrahedron(key, face)? else {
                    return Ok(None);
                };
                let other = self.mesh.tetrahedron(across)?;
                if other.is_infinite() {
                    continue;
                }
                let Some(apex) = other
                    .nodes()
                    .iter()
                    .flatten()
                    .copied()
                    .find(|&vertex| !tet.contains_node(vertex))
                else {
                    continue;
                };
                let (apex_position, apex_rank) = self.mesh.ranked_position(apex)?;
                let sphere = [
                    (&corners[0].0, corners[0].1),
                    (&corners[1].0, corners[1].1),
                    (&corners[2].0, corners[2].1),
                    (&corners[3].0, corners[3].1),
                ];
                if insphere_symbolic(sphere, (&apex_position, apex_rank)) == InSphere::INSIDE {
                    delaunay = false;
                    break;
                }
            }
        }

        self.mesh.node_mut(node)?.set_position(*to);
        for &key in &star {
            self.mesh.refresh_metrics(key)?;
        }
        if delaunay {
            return Ok(Some(Movement::InPlace));
        }

        match restore_delaunay_around(&mut self.mesh, &star, self.config.max_flip_passes) {
            Ok(stats) => {
                self.flip_statistics += stats;
                self.last_tetrahedron = self.mesh.node(node)?.adjacent_tetrahedron();
                Ok(Some(Movement::InPlace))
            }
            Err(FlipError::Mesh(err)) => Err(err.into()),
            Err(err) => {
                tracing::debug!(?node, %err, "flips could not repair the move");
                match self.reinsert_locally(node) {
                    Ok(()) => Ok(Some(Movement::Reinserted)),
                    Err(err @ SpatialError::PositionNotAllowed { .. }) => {
                        self.mesh.node_mut(node)?.set_position(from);
                        self.attach(node, None)?;
                        Err(err)
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    fn move_by_reinsertion(
        &mut self,
        node: NodeKey,
        from: Position,
        to: Position,
    ) -> Result<(), SpatialError> {
        self.detach(node)?;
        self.mesh.node_mut(node)?.set_position(to);
        match self.attach(node, None) {
            Err(err @ SpatialError::PositionNotAllowed { .. }) => {
                self.mesh.node_mut(node)?.set_position(from);
                self.attach(node, None)?;
                Err(err)
            }
            other => other,
        }
    }

    fn after_mutation(&self, operation: &'static str) {
        if !self.config.validate_after_mutation {
            return;
        }
        if let Err(err) = validate(&self.mesh) {
            tracing::warn!(operation, %err, "triangulation invalid after mutation");
        }
    }
}

/// `true` if `c` lies on the line through `a` and `b`, decided exactly.
fn collinear(a: &Position, b: &Position, c: &Position) -> bool {
    let (Ok(a), Ok(b), Ok(c)) = (
        ExactVector::from_f64(a),
        ExactVector::from_f64(b),
        ExactVector::from_f64(c),
    ) else {
        return true;
    };
    (&b - &a).cross(&(&c - &a)).squared_length().is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SpatialConfigBuilder;

    const UNIT: [Position; 4] = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
    ];

    #[test]
    fn test_nodes_stay_pending_until_they_span_space() {
        let mut organizer = SpatialOrganizer::new();
        for x in 0..3 {
            organizer.insert([f64::from(x), 0.0, 0.0], ()).unwrap();
        }
        organizer.insert([0.0, 1.0, 0.0], ()).unwrap();
        organizer.insert([1.0, 1.0, 0.0], ()).unwrap();
        assert_eq!(organizer.number_of_pending_nodes(), 5);
        assert_eq!(organizer.number_of_tetrahedra(), 0);

        organizer.insert([0.0, 0.0, 1.0], ()).unwrap();
        assert_eq!(organizer.number_of_pending_nodes(), 0);
        assert!(organizer.number_of_tetrahedra() >= 3);
        organizer.validate().unwrap();
    }

    #[test]
    fn test_collinear_is_exact() {
        assert!(collinear(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0], &[0.1, 0.1, 0.1]));
        assert!(!collinear(&[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0], &[0.5, 1e-300, 0.0]));
    }

    #[test]
    fn test_duplicate_in_pending_mode_is_rejected() {
        let mut organizer = SpatialOrganizer::new();
        let first = organizer.insert([1.0, 2.0, 3.0], 1).unwrap();
        organizer.insert([2.0, 2.0, 3.0], 2).unwrap();
        let err = organizer.insert([1.0, 2.0, 3.0], 3).unwrap_err();
        match err {
            SpatialError::PositionNotAllowed {
                existing,
                proposed_position,
                ..
            } => {
                assert_eq!(existing, first);
                assert_ne!(proposed_position, [1.0, 2.0, 3.0]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(organizer.number_of_nodes(), 2);
        assert_eq!(organizer.number_of_pending_nodes(), 2);
    }

    #[test]
    fn test_tolerance_rejects_near_duplicates() {
        let config = SpatialConfigBuilder::default()
            .duplicate_tolerance(0.01)
            .build()
            .unwrap();
        let mut organizer = SpatialOrganizer::with_config(config);
        for p in UNIT {
            organizer.insert(p, ()).unwrap();
        }
        assert!(matches!(
            organizer.insert([0.005, 0.0, 0.0], ()),
            Err(SpatialError::PositionNotAllowed { .. })
        ));
        organizer.insert([0.2, 0.2, 0.2], ()).unwrap();
        assert_eq!(organizer.number_of_nodes(), 5);
    }

    #[test]
    fn test_invalid_position_is_rejected() {
        let mut organizer: SpatialOrganizer<()> = SpatialOrganizer::new();
        assert!(matches!(
            organizer.insert([f64::NAN, 0.0, 0.0], ()),
            Err(SpatialError::InvalidPosition { .. })
        ));
        assert_eq!(organizer.number_of_nodes(), 0);
    }

    #[test]
    fn test_small_move_keeps_connectivity() {
        let mut organizer = SpatialOrganizer::new();
        for p in UNIT {
            organizer.insert(p, ()).unwrap();
        }
        let center = organizer.insert([0.25, 0.25, 0.25], ()).unwrap();
        organizer.move_to(center, [0.26, 0.24, 0.25]).unwrap();
        assert_eq!(organizer.flip_movements(), 1);
        assert_eq!(organizer.delete_insert_movements(), 0);
        assert_eq!(organizer.position(center).unwrap(), [0.26, 0.24, 0.25]);
        organizer.validate().unwrap();
    }

    #[test]
    fn test_hull_node_moves_in_place() {
        let mut organizer = SpatialOrganizer::new();
        let corners: Vec<NodeKey> = UNIT.iter().map(|&p| organizer.insert(p, ()).unwrap()).collect();
        let center = organizer.insert([0.25, 0.25, 0.25], ()).unwrap();
        organizer.move_to(corners[1], [1.2, 0.05, 0.0]).unwrap();
        assert_eq!(organizer.flip_movements(), 1);
        assert_eq!(organizer.delete_insert_movements(), 0);
        assert_eq!(organizer.get_neighbors(center).unwrap().len(), 4);
        organizer.validate().unwrap();

        // Pulling a corner through the opposite face cannot be done in place.
        organizer.move_to(corners[3], [0.3, 0.3, -0.5]).unwrap();
        assert_eq!(organizer.delete_insert_movements(), 1);
        organizer.validate().unwrap();
    }

    #[test]
    fn test_failed_bootstrap_keeps_every_node_pending() {
        let mut organizer = SpatialOrganizer::new();
        let mut nodes = Vec::new();
        for p in [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 1.0, 0.0],
            [2.0, 2.0, 0.0],
        ] {
            nodes.push(organizer.insert(p, ()).unwrap());
        }
        // Two pending nodes on the same spot make the bootstrap fail midway.
        organizer
            .mesh
            .node_mut(nodes[4])
            .unwrap()
            .set_position([1.0, 1.0, 0.0]);
        assert!(organizer.insert([0.0, 0.0, 1.0], ()).is_err());
        assert_eq!(organizer.number_of_nodes(), 5);
        assert_eq!(organizer.number_of_pending_nodes(), 5);
        assert_eq!(organizer.number_of_tetrahedra(), 0);
        for &node in &nodes {
            assert!(organizer.mesh.node(node).unwrap().edges().is_empty());
        }

        organizer.move_to(nodes[4], [2.0, 2.0, 0.0]).unwrap();
        organizer.insert([0.0, 0.0, 1.0], ()).unwrap();
        assert_eq!(organizer.number_of_pending_nodes(), 0);
        assert_eq!(organizer.number_of_nodes(), 6);
        organizer.validate().unwrap();
    }

    #[test]
    fn test_queries_run_through_a_shared_reference() {
        let mut organizer = SpatialOrganizer::new();
        for p in UNIT {
            organizer.insert(p, ()).unwrap();
        }
        organizer.insert([0.2, 0.3, 0.1], ()).unwrap();
        let shared = &organizer;
        let query = [0.1, 0.1, 0.1];

        let (vertices, weights) = std::thread::scope(|scope| {
            let vertices =
                scope.spawn(|| shared.get_vertices_of_the_tetrahedron_containing(&query));
            let weights = scope.spawn(|| shared.interpolation_weights(&query));
            (vertices.join().unwrap(), weights.join().unwrap())
        });
        let vertices = vertices.unwrap().unwrap();
        let (weighted, weights) = weights.unwrap().unwrap();
        assert_eq!(vertices, weighted);
        approx::assert_relative_eq!(weights.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(weights.iter().all(|&w| w >= 0.0));
        assert_eq!(
            shared.get_vertices_of_the_tetrahedron_containing(&query).unwrap(),
            Some(vertices)
        );
    }

    #[test]
    fn test_node_volumes_sum_to_hull_volume() {
        let mut organizer = SpatialOrganizer::new();
        let mut nodes: Vec<NodeKey> = UNIT.iter().map(|&p| organizer.insert(p, ()).unwrap()).collect();
        nodes.push(organizer.insert([0.2, 0.3, 0.1], ()).unwrap());
        let total: f64 = nodes.iter().map(|&n| organizer.node_volume(n).unwrap()).sum();
        approx::assert_relative_eq!(total, 1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_remove_returns_content_and_invalidates_key() {
        let mut organizer = SpatialOrganizer::new();
        let nodes: Vec<NodeKey> = UNIT
            .iter()
            .enumerate()
            .map(|(i, &p)| organizer.insert(p, i).unwrap())
            .collect();
        assert_eq!(organizer.remove(nodes[2]).unwrap(), 2);
        assert_eq!(organizer.number_of_tetrahedra(), 0);
        assert_eq!(organizer.number_of_pending_nodes(), 3);
        assert!(matches!(
            organizer.remove(nodes[2]),
            Err(SpatialError::UnknownNode { .. })
        ));
    }
}
