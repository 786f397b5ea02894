//! Triangles of the mesh.
//!
//! Every face of every tetrahedron is a shared [`Triangle3D`] object that
//! records the (at most two) tetrahedra on its sides. A node slot holding
//! `None` stands for the vertex at infinity.

use crate::core::{space_node::NodeKey, tetrahedron::TetrahedronKey};
use slotmap::new_key_type;

new_key_type! {
    /// Key type for accessing triangles in the mesh arena.
    pub struct TriangleKey;
}

/// Order-independent identifier of a triangle's vertex set.
///
/// `None` (the vertex at infinity) sorts first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriangleHashKey([Option<NodeKey>; 3]);

impl TriangleHashKey {
    /// Creates the canonical key for three vertices.
    #[must_use]
    pub fn new(mut nodes: [Option<NodeKey>; 3]) -> Self {
        nodes.sort_unstable();
        Self(nodes)
    }

    /// The vertices in canonical order.
    #[must_use]
    pub const fn nodes(&self) -> &[Option<NodeKey>; 3] {
        &self.0
    }

    /// `true` if one of the vertices is the vertex at infinity.
    #[must_use]
    pub const fn is_infinite(&self) -> bool {
        self.0[0].is_none()
    }
}

/// A triangle shared by up to two tetrahedra.
#[derive(Clone, Debug)]
pub struct Triangle3D {
    nodes: [Option<NodeKey>; 3],
    tetrahedra: [Option<TetrahedronKey>; 2],
}

impl Triangle3D {
    pub(crate) const fn new(nodes: [Option<NodeKey>; 3]) -> Self {
        Self {
            nodes,
            tetrahedra: [None, None],
        }
    }

    /// The three vertices in creation order.
    #[must_use]
    pub const fn nodes(&self) -> &[Option<NodeKey>; 3] {
        &self.nodes
    }

    /// Canonical key of the vertex set.
    #[must_use]
    pub fn hash_key(&self) -> TriangleHashKey {
        TriangleHashKey::new(self.nodes)
    }

    /// `true` if the triangle has the vertex at infinity.
    #[must_use]
    pub fn is_infinite(&self) -> bool {
        self.nodes.iter().any(Option::is_none)
    }

    /// `true` if `node` is one of the vertices.
    #[must_use]
    pub fn contains_node(&self, node: NodeKey) -> bool {
        self.nodes.contains(&Some(node))
    }

    /// The tetrahedra on both sides.
    #[must_use]
    pub const fn tetrahedra(&self) -> &[Option<TetrahedronKey>; 2] {
        &self.tetrahedra
    }

    /// Number of occupied sides.
    #[must_use]
    pub fn tetrahedron_count(&self) -> usize {
        self.tetrahedra.iter().flatten().count()
    }

    /// The tetrahedron on the other side from `tetrahedron`.
    #[must_use]
    pub fn opposite_tetrahedron(&self, tetrahedron: TetrahedronKey) -> Option<TetrahedronKey> {
        match self.tetrahedra {
            [Some(a), other] if a == tetrahedron => other,
            [other, Some(b)] if b == tetrahedron => other,
            _ => None,
        }
    }

    /// Occupies a free side; returns `false` if both sides are taken.
    pub(crate) fn add_tetrahedron(&mut self, tetrahedron: TetrahedronKey) -> bool {
        match self.tetrahedra.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(tetrahedron);
                true
            }
            None => false,
        }
    }

    /// Frees the side held by `tetrahedron`.
    pub(crate) fn remove_tetrahedron(&mut self, tetrahedron: TetrahedronKey) {
        for slot in &mut self.tetrahedra {
            if *slot == Some(tetrahedron) {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_hash_key_ignores_order_and_marks_infinity() {
        let mut nodes: SlotMap<NodeKey, ()> = SlotMap::with_key();
        let (a, b, c) = (nodes.insert(()), nodes.insert(()), nodes.insert(()));
        assert_eq!(
            TriangleHashKey::new([Some(a), Some(b), Some(c)]),
            TriangleHashKey::new([Some(c), Some(a), Some(b)])
        );
        let infinite = TriangleHashKey::new([Some(b), None, Some(a)]);
        assert!(infinite.is_infinite());
        assert_eq!(infinite.nodes()[0], None);
        assert!(Triangle3D::new([Some(a), None, Some(b)]).is_infinite());
        assert!(!Triangle3D::new([Some(a), Some(b), Some(c)]).is_infinite());
    }

    #[test]
    fn test_sides() {
        let mut tets: SlotMap<TetrahedronKey, ()> = SlotMap::with_key();
        let (t0, t1, t2) = (tets.insert(()), tets.insert(()), tets.insert(()));
        let mut triangle = Triangle3D::new([None, None, None]);
        assert!(triangle.add_tetrahedron(t0));
        assert_eq!(triangle.opposite_tetrahedron(t0), None);
        assert!(triangle.add_tetrahedron(t1));
        assert!(!triangle.add_tetrahedron(t2));
        assert_eq!(triangle.opposite_tetrahedron(t0), Some(t1));
        assert_eq!(triangle.opposite_tetrahedron(t1), Some(t0));
        assert_eq!(triangle.opposite_tetrahedron(t2), None);
        triangle.remove_tetrahedron(t0);
        assert_eq!(triangle.tetrahedron_count(), 1);
        assert_eq!(triangle.opposite_tetrahedron(t1), None);
    }
}
