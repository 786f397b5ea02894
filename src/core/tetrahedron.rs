//! Tetrahedra of the mesh.
//!
//! A [`Tetrahedron`] stores four vertex slots and the four [`Triangle3D`]
//! faces, triangle `i` being the face opposite vertex `i`. Finite tetrahedra
//! are positively oriented (`orient3d(v0, v1, v2, v3) > 0`).
//!
//! The hull is closed with *infinite* tetrahedra: one per hull triangle, with
//! the vertex at infinity (`None`) always in slot 0. For such a tetrahedron,
//! face 0 is the finite hull triangle and the unbounded outside lies on its
//! positive side.
//!
//! [`Triangle3D`]: crate::core::triangle::Triangle3D

use crate::core::{space_node::NodeKey, triangle::TriangleKey};
use crate::geometry::util::Position;
use slotmap::new_key_type;

new_key_type! {
    /// Key type for accessing tetrahedra in the mesh arena.
    pub struct TetrahedronKey;
}

/// Vertex indices of face `i`, ordered so that vertex `i` lies on the
/// positive side: `orient3d(f[0], f[1], f[2], v_i) > 0` for a positive
/// tetrahedron.
pub const FACE_VERTICES: [[usize; 3]; 4] = [[1, 3, 2], [0, 2, 3], [0, 3, 1], [0, 1, 2]];

/// Vertex index pairs of the six edges, indexed by [`get_edge_number`].
pub const EDGE_VERTICES: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// Index (0..6) of the edge joining local vertices `n1` and `n2`.
///
/// # Examples
///
/// ```rust
/// use spatial_organization::core::tetrahedron::{EDGE_VERTICES, get_edge_number};
///
/// for (number, &(a, b)) in EDGE_VERTICES.iter().enumerate() {
///     assert_eq!(get_edge_number(a, b), number);
///     assert_eq!(get_edge_number(b, a), number);
/// }
/// ```
#[must_use]
pub const fn get_edge_number(n1: usize, n2: usize) -> usize {
    n1 + n2 - if n1 == 0 || n2 == 0 { 1 } else { 0 }
}

/// Cached metric data of a finite, non-flat tetrahedron.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TetrahedronMetrics {
    /// Center of the circumsphere.
    pub circumcenter: Position,
    /// Squared circumradius.
    pub squared_radius: f64,
    /// Unsigned volume.
    pub volume: f64,
}

/// A tetrahedron of the mesh.
#[derive(Clone, Debug)]
pub struct Tetrahedron {
    nodes: [Option<NodeKey>; 4],
    triangles: [TriangleKey; 4],
    metrics: Option<TetrahedronMetrics>,
    flat: bool,
}

impl Tetrahedron {
    pub(crate) const fn new(
        nodes: [Option<NodeKey>; 4],
        triangles: [TriangleKey; 4],
        metrics: Option<TetrahedronMetrics>,
        flat: bool,
    ) -> Self {
        Self {
            nodes,
            triangles,
            metrics,
            flat,
        }
    }

    /// Vertex slots; `None` is the vertex at infinity (slot 0 only).
    #[must_use]
    pub const fn nodes(&self) -> &[Option<NodeKey>; 4] {
        &self.nodes
    }

    /// Face triangles; triangle `i` is opposite vertex `i`.
    #[must_use]
    pub const fn triangles(&self) -> &[TriangleKey; 4] {
        &self.triangles
    }

    /// `true` for a hull-closing tetrahedron with the vertex at infinity.
    #[must_use]
    pub const fn is_infinite(&self) -> bool {
        self.nodes[0].is_none()
    }

    /// `true` if the four vertices are coplanar.
    ///
    /// Flat tetrahedra only exist transiently inside a 4-4 flip.
    #[must_use]
    pub const fn is_flat(&self) -> bool {
        self.flat
    }

    /// Circumsphere and volume, available for finite non-flat tetrahedra.
    #[must_use]
    pub const fn metrics(&self) -> Option<&TetrahedronMetrics> {
        self.metrics.as_ref()
    }

    /// The four finite vertices, or `None` for an infinite tetrahedron.
    #[must_use]
    pub fn finite_nodes(&self) -> Option<[NodeKey; 4]> {
        Some([self.nodes[0]?, self.nodes[1]?, self.nodes[2]?, self.nodes[3]?])
    }

    /// Local index of `node`.
    #[must_use]
    pub fn index_of_node(&self, node: NodeKey) -> Option<usize> {
        self.nodes.iter().position(|&n| n == Some(node))
    }

    /// Local index of `triangle`.
    #[must_use]
    pub fn index_of_triangle(&self, triangle: TriangleKey) -> Option<usize> {
        self.triangles.iter().position(|&t| t == triangle)
    }

    /// `true` if `node` is a vertex.
    #[must_use]
    pub fn contains_node(&self, node: NodeKey) -> bool {
        self.nodes.contains(&Some(node))
    }

    /// Vertices of face `index`, ordered with vertex `index` on the positive side.
    #[must_use]
    pub const fn face_nodes(&self, index: usize) -> [Option<NodeKey>; 3] {
        let [a, b, c] = FACE_VERTICES[index];
        [self.nodes[a], self.nodes[b], self.nodes[c]]
    }

    pub(crate) const fn set_triangle(&mut self, index: usize, triangle: TriangleKey) {
        self.triangles[index] = triangle;
    }
}

/// Puts the vertex at infinity into slot 0 with an even permutation.
///
/// Returns `None` if more than one slot is infinite.
#[must_use]
pub fn normalize_infinite_first(mut nodes: [Option<NodeKey>; 4]) -> Option<[Option<NodeKey>; 4]> {
    let mut infinite = nodes.iter().enumerate().filter(|(_, n)| n.is_none()).map(|(i, _)| i);
    let first = infinite.next();
    if infinite.next().is_some() {
        return None;
    }
    if let Some(k) = first.filter(|&k| k != 0) {
        nodes.swap(0, k);
        let mut rest = (1..4).filter(|&i| i != k);
        if let (Some(i), Some(j)) = (rest.next(), rest.next()) {
            nodes.swap(i, j);
        }
    }
    Some(nodes)
}
