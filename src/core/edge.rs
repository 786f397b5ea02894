//! Edges of the mesh.
//!
//! An [`Edge`] connects two nodes and lists the finite triangles that contain
//! it. Edges exist exactly as long as at least one such triangle exists, so
//! the neighbors of a node are the opposite endpoints of its edges.
//!
//! [`EdgeHashKey`] is the canonical, order-independent identifier of an edge
//! used by the mesh's edge index.

use crate::core::{space_node::NodeKey, triangle::TriangleKey};
use slotmap::{Key, new_key_type};

new_key_type! {
    /// Key type for accessing edges in the mesh arena.
    pub struct EdgeKey;
}

/// Canonical identifier for an undirected edge.
///
/// The endpoints are ordered so that `(a, b)` and `(b, a)` produce the same key.
/// The order is derived from slotmap key bits and carries no meaning across
/// processes.
///
/// # Examples
///
/// ```rust
/// use spatial_organization::core::edge::EdgeHashKey;
/// use spatial_organization::core::space_node::NodeKey;
/// use slotmap::KeyData;
///
/// let a = NodeKey::from(KeyData::from_ffi(1));
/// let b = NodeKey::from(KeyData::from_ffi(2));
/// assert_eq!(EdgeHashKey::new(a, b), EdgeHashKey::new(b, a));
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeHashKey {
    a: NodeKey,
    b: NodeKey,
}

impl EdgeHashKey {
    /// Creates the canonical key of the edge between `a` and `b`.
    #[must_use]
    pub fn new(a: NodeKey, b: NodeKey) -> Self {
        if a.data().as_ffi() <= b.data().as_ffi() {
            Self { a, b }
        } else {
            Self { a: b, b: a }
        }
    }

    /// The two endpoints in canonical order.
    #[must_use]
    pub const fn endpoints(&self) -> (NodeKey, NodeKey) {
        (self.a, self.b)
    }
}

/// An edge between two nodes.
#[derive(Clone, Debug)]
pub struct Edge {
    a: NodeKey,
    b: NodeKey,
    triangles: Vec<TriangleKey>,
}

impl Edge {
    pub(crate) const fn new(a: NodeKey, b: NodeKey) -> Self {
        Self {
            a,
            b,
            triangles: Vec::new(),
        }
    }

    /// The two endpoints, in creation order.
    #[must_use]
    pub const fn endpoints(&self) -> (NodeKey, NodeKey) {
        (self.a, self.b)
    }

    /// Canonical key of this edge.
    #[must_use]
    pub fn hash_key(&self) -> EdgeHashKey {
        EdgeHashKey::new(self.a, self.b)
    }

    /// The endpoint that is not `node`, or `None` if `node` is not an endpoint.
    #[must_use]
    pub fn opposite(&self, node: NodeKey) -> Option<NodeKey> {
        if node == self.a {
            Some(self.b)
        } else if node == self.b {
            Some(self.a)
        } else {
            None
        }
    }

    /// Finite triangles containing this edge.
    #[must_use]
    pub fn triangles(&self) -> &[TriangleKey] {
        &self.triangles
    }

    pub(crate) fn add_triangle(&mut self, triangle: TriangleKey) {
        self.triangles.push(triangle);
    }

    /// Removes `triangle`; returns `true` when no triangles remain.
    pub(crate) fn remove_triangle(&mut self, triangle: TriangleKey) -> bool {
        if let Some(index) = self.triangles.iter().position(|&t| t == triangle) {
            self.triangles.swap_remove(index);
        }
        self.triangles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn nodes() -> (NodeKey, NodeKey, NodeKey) {
        let mut map: SlotMap<NodeKey, ()> = SlotMap::with_key();
        (map.insert(()), map.insert(()), map.insert(()))
    }

    #[test]
    fn test_hash_key_is_order_independent() {
        let (a, b, c) = nodes();
        assert_eq!(EdgeHashKey::new(a, b), EdgeHashKey::new(b, a));
        assert_ne!(EdgeHashKey::new(a, b), EdgeHashKey::new(a, c));
        let (first, second) = EdgeHashKey::new(b, a).endpoints();
        assert!(first.data().as_ffi() <= second.data().as_ffi());
    }

    #[test]
    fn test_opposite() {
        let (a, b, c) = nodes();
        let edge = Edge::new(a, b);
        assert_eq!(edge.opposite(a), Some(b));
        assert_eq!(edge.opposite(b), Some(a));
        assert_eq!(edge.opposite(c), None);
        assert_eq!(edge.hash_key(), EdgeHashKey::new(b, a));
    }

    #[test]
    fn test_triangle_list() {
        let (a, b, _) = nodes();
        let mut triangles: SlotMap<TriangleKey, ()> = SlotMap::with_key();
        let (t0, t1) = (triangles.insert(()), triangles.insert(()));
        let mut edge = Edge::new(a, b);
        edge.add_triangle(t0);
        edge.add_triangle(t1);
        assert!(!edge.remove_triangle(t0));
        assert_eq!(edge.triangles(), &[t1]);
        assert!(edge.remove_triangle(t1));
    }
}
