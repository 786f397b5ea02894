//! Nodes of the spatial organization.
//!
//! A [`SpaceNode`] is a point in 3D space carrying a user payload. Besides
//! its position it records the insertion rank used for symbolic tie-breaking,
//! a cached incident tetrahedron (the entry point for walks and star
//! traversals) and the list of edges it is an endpoint of.

use crate::core::{edge::EdgeKey, tetrahedron::TetrahedronKey};
use crate::geometry::util::Position;
use slotmap::new_key_type;
use uuid::Uuid;

new_key_type! {
    /// Key type for accessing nodes in the mesh arena.
    ///
    /// A `NodeKey` stays valid while its node is part of the organization,
    /// including across moves.
    pub struct NodeKey;
}

/// A point of the spatial organization together with its payload.
#[derive(Clone, Debug)]
pub struct SpaceNode<T> {
    uuid: Uuid,
    position: Position,
    content: T,
    rank: u64,
    adjacent_tetrahedron: Option<TetrahedronKey>,
    edges: Vec<EdgeKey>,
}

impl<T> SpaceNode<T> {
    pub(crate) fn new(position: Position, content: T, rank: u64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            position,
            content,
            rank,
            adjacent_tetrahedron: None,
            edges: Vec::new(),
        }
    }

    /// Stable identifier of this node.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Current position.
    #[must_use]
    pub const fn position(&self) -> &Position {
        &self.position
    }

    /// The user payload.
    #[must_use]
    pub const fn content(&self) -> &T {
        &self.content
    }

    /// Mutable access to the user payload.
    pub const fn content_mut(&mut self) -> &mut T {
        &mut self.content
    }

    /// Insertion rank: larger ranks were (re)inserted later.
    ///
    /// Among cospherical points the node with the largest rank is treated as
    /// lying outside the sphere of the others.
    #[must_use]
    pub const fn rank(&self) -> u64 {
        self.rank
    }

    /// A tetrahedron incident to this node, if the node is triangulated.
    #[must_use]
    pub const fn adjacent_tetrahedron(&self) -> Option<TetrahedronKey> {
        self.adjacent_tetrahedron
    }

    /// Edges this node is an endpoint of.
    #[must_use]
    pub fn edges(&self) -> &[EdgeKey] {
        &self.edges
    }

    pub(crate) const fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    pub(crate) const fn set_rank(&mut self, rank: u64) {
        self.rank = rank;
    }

    pub(crate) const fn set_adjacent_tetrahedron(&mut self, tetrahedron: Option<TetrahedronKey>) {
        self.adjacent_tetrahedron = tetrahedron;
    }

    pub(crate) fn add_edge(&mut self, edge: EdgeKey) {
        self.edges.push(edge);
    }

    pub(crate) fn remove_edge(&mut self, edge: EdgeKey) {
        if let Some(index) = self.edges.iter().position(|&e| e == edge) {
            self.edges.swap_remove(index);
        }
    }

    pub(crate) fn clear_edges(&mut self) {
        self.edges.clear();
    }

    pub(crate) fn into_content(self) -> T {
        self.content
    }
}
