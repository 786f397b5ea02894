//! Structural and geometric invariant checks.
//!
//! These walk the whole mesh and are meant for tests, debugging and the
//! `validate_after_mutation` switch of the organizer, not for hot paths.
//!
//! [`validate`] runs, in order:
//!
//! 1. [`check_adjacency`]: faces, edges and node caches reference each other
//!    consistently and every face has two sides.
//! 2. [`check_orientation`]: finite tetrahedra are positively oriented and
//!    infinite tetrahedra sit on the outside of their hull face.
//! 3. [`check_manifold`]: every face has one or two finite tetrahedra and
//!    every edge is surrounded by a single fan.
//! 4. [`check_euler_characteristic`]: `V - E + F - C = 1`.
//! 5. [`check_delaunay`]: no node lies strictly inside a circumsphere.

use crate::core::{
    collections::FastHashSet,
    edge::EdgeKey,
    mesh::{Mesh, MeshError},
    space_node::NodeKey,
    tetrahedron::TetrahedronKey,
    triangle::{TriangleHashKey, TriangleKey},
};
use crate::geometry::predicates::{InSphere, Orientation, insphere, orient3d};
use thiserror::Error;

/// A violated mesh invariant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    /// A node lies strictly inside the circumsphere of a tetrahedron.
    #[error("Node {node:?} lies inside the circumsphere of tetrahedron {tetrahedron:?}")]
    DelaunayViolation {
        /// The tetrahedron.
        tetrahedron: TetrahedronKey,
        /// The node inside its circumsphere.
        node: NodeKey,
    },
    /// A face or edge neighborhood is not a manifold.
    #[error("Manifold violation: {message}")]
    ManifoldViolation {
        /// Description of the violation.
        message: String,
    },
    /// `V - E + F - C` differs from 1.
    #[error("Euler characteristic is {found}, expected {expected}")]
    EulerCharacteristicMismatch {
        /// Expected characteristic.
        expected: i64,
        /// Computed characteristic.
        found: i64,
    },
    /// A tetrahedron is flat or inverted.
    #[error("Tetrahedron {tetrahedron:?} is not positively oriented")]
    OrientationViolation {
        /// The offending tetrahedron.
        tetrahedron: TetrahedronKey,
    },
    /// Cross references between mesh primitives disagree.
    #[error("Adjacency mismatch: {message}")]
    AdjacencyMismatch {
        /// Description of the mismatch.
        message: String,
    },
    /// A referenced primitive is missing.
    #[error(transparent)]
    Mesh(#[from] MeshError),
}

fn adjacency(message: impl Into<String>) -> ValidationError {
    ValidationError::AdjacencyMismatch {
        message: message.into(),
    }
}

fn manifold(message: impl Into<String>) -> ValidationError {
    ValidationError::ManifoldViolation {
        message: message.into(),
    }
}

/// Runs every check and returns the first violation.
///
/// # Errors
///
/// Returns the first [`ValidationError`] found.
pub fn validate<T>(mesh: &Mesh<T>) -> Result<(), ValidationError> {
    check_adjacency(mesh)?;
    check_orientation(mesh)?;
    check_manifold(mesh)?;
    check_euler_characteristic(mesh)?;
    check_delaunay(mesh)
}

/// Checks the references between tetrahedra, triangles, edges and nodes.
///
/// # Errors
///
/// Returns [`ValidationError::AdjacencyMismatch`] on the first inconsistency.
pub fn check_adjacency<T>(mesh: &Mesh<T>) -> Result<(), ValidationError> {
    for (key, tet) in mesh.tetrahedra() {
        for (face, &triangle_key) in tet.triangles().iter().enumerate() {
            let triangle = mesh.triangle(triangle_key)?;
            if !triangle.tetrahedra().contains(&Some(key)) {
                return Err(adjacency(format!(
                    "triangle {triangle_key:?} does not list tetrahedron {key:?}"
                )));
            }
            if triangle.hash_key() != TriangleHashKey::new(tet.face_nodes(face)) {
                return Err(adjacency(format!(
                    "face {face} of tetrahedron {key:?} has the wrong vertices"
                )));
            }
        }
    }
    for (key, triangle) in mesh.triangles() {
        if triangle.tetrahedron_count() != 2 {
            return Err(adjacency(format!(
                "triangle {key:?} has {} tetrahedra",
                triangle.tetrahedron_count()
            )));
        }
        for &tet in triangle.tetrahedra().iter().flatten() {
            if mesh.tetrahedron(tet)?.index_of_triangle(key).is_none() {
                return Err(adjacency(format!(
                    "tetrahedron {tet:?} does not have face {key:?}"
                )));
            }
        }
        if mesh.triangle_between(*triangle.nodes()) != Some(key) {
            return Err(adjacency(format!("triangle {key:?} is not indexed")));
        }
        if let [Some(a), Some(b), Some(c)] = *triangle.nodes() {
            for (u, v) in [(a, b), (b, c), (c, a)] {
                let listed = mesh
                    .edge_between(u, v)
                    .and_then(|edge| mesh.edge(edge))
                    .is_some_and(|edge| edge.triangles().contains(&key));
                if !listed {
                    return Err(adjacency(format!(
                        "edge of triangle {key:?} does not list it"
                    )));
                }
            }
        }
    }
    for (key, edge) in mesh.edges() {
        let (a, b) = edge.endpoints();
        for node in [a, b] {
            if !mesh.node(node)?.edges().contains(&key) {
                return Err(adjacency(format!("node {node:?} does not list edge {key:?}")));
            }
        }
        for &triangle in edge.triangles() {
            let triangle = mesh.triangle(triangle)?;
            if !triangle.contains_node(a) || !triangle.contains_node(b) {
                return Err(adjacency(format!("edge {key:?} lists a foreign triangle")));
            }
        }
    }
    if mesh.number_of_all_tetrahedra() > 0 {
        for (key, node) in mesh.nodes() {
            let cached = node
                .adjacent_tetrahedron()
                .ok_or_else(|| adjacency(format!("node {key:?} has no adjacent tetrahedron")))?;
            if !mesh.tetrahedron(cached)?.contains_node(key) {
                return Err(adjacency(format!(
                    "adjacent tetrahedron of node {key:?} does not contain it"
                )));
            }
        }
    }
    Ok(())
}

/// Checks that finite tetrahedra are positively oriented and that every
/// infinite tetrahedron lies on the outer side of its hull face.
///
/// # Errors
///
/// Returns [`ValidationError::OrientationViolation`] for the first offender.
pub fn check_orientation<T>(mesh: &Mesh<T>) -> Result<(), ValidationError> {
    for (key, tet) in mesh.tetrahedra() {
        if tet.is_flat() {
            return Err(ValidationError::OrientationViolation { tetrahedron: key });
        }
        if tet.is_infinite() {
            let [Some(a), Some(b), Some(c)] = tet.face_nodes(0) else {
                return Err(ValidationError::OrientationViolation { tetrahedron: key });
            };
            let inner = mesh
                .adjacent_tetrahedron(key, 0)?
                .ok_or_else(|| adjacency("hull face without a finite side"))?;
            let inner_tet = mesh.tetrahedron(inner)?;
            let apex = inner_tet
                .index_of_triangle(tet.triangles()[0])
                .and_then(|i| inner_tet.nodes()[i])
                .ok_or(ValidationError::OrientationViolation { tetrahedron: key })?;
            let side = orient3d(
                &mesh.position(a)?,
                &mesh.position(b)?,
                &mesh.position(c)?,
                &mesh.position(apex)?,
            );
            if side != Orientation::NEGATIVE {
                return Err(ValidationError::OrientationViolation { tetrahedron: key });
            }
        } else {
            let [a, b, c, d] = mesh.tetrahedron_positions(tet)?;
            if orient3d(&a, &b, &c, &d) != Orientation::POSITIVE {
                return Err(ValidationError::OrientationViolation { tetrahedron: key });
            }
        }
    }
    Ok(())
}

/// Checks the manifold property of the finite complex.
///
/// Every finite triangle has one (hull) or two finite tetrahedra, and the
/// finite tetrahedra around every edge form one fan: a closed cycle for
/// interior edges or a single open chain for hull edges.
///
/// # Errors
///
/// Returns [`ValidationError::ManifoldViolation`] for the first offender.
pub fn check_manifold<T>(mesh: &Mesh<T>) -> Result<(), ValidationError> {
    for (key, triangle) in mesh.triangles() {
        if triangle.is_infinite() {
            continue;
        }
        let finite = finite_sides(mesh, key)?;
        if !(1..=2).contains(&finite) {
            return Err(manifold(format!(
                "triangle {key:?} has {finite} finite tetrahedra"
            )));
        }
    }
    for (key, _) in mesh.edges() {
        check_edge_fan(mesh, key)?;
    }
    Ok(())
}

fn finite_sides<T>(mesh: &Mesh<T>, triangle: TriangleKey) -> Result<usize, MeshError> {
    Ok(mesh
        .triangle(triangle)?
        .tetrahedra()
        .iter()
        .flatten()
        .filter(|&&tet| !mesh.is_infinite(tet))
        .count())
}

fn check_edge_fan<T>(mesh: &Mesh<T>, edge_key: EdgeKey) -> Result<(), ValidationError> {
    let edge = mesh
        .edge(edge_key)
        .ok_or_else(|| manifold(format!("edge {edge_key:?} vanished")))?;
    let (a, b) = edge.endpoints();
    let triangles = edge.triangles();
    if triangles.len() < 2 {
        return Err(manifold(format!(
            "edge {edge_key:?} has {} triangles",
            triangles.len()
        )));
    }

    let mut open_ends = 0;
    for &triangle in triangles {
        match finite_sides(mesh, triangle)? {
            1 => open_ends += 1,
            2 => {}
            n => {
                return Err(manifold(format!(
                    "triangle {triangle:?} around edge {edge_key:?} has {n} finite tetrahedra"
                )));
            }
        }
    }
    if open_ends != 0 && open_ends != 2 {
        return Err(manifold(format!(
            "edge {edge_key:?} has {open_ends} open fan ends"
        )));
    }

    // Walk the fan from one triangle through finite tetrahedra.
    let mut visited: FastHashSet<TriangleKey> = FastHashSet::default();
    let mut stack = vec![triangles[0]];
    while let Some(triangle) = stack.pop() {
        if !visited.insert(triangle) {
            continue;
        }
        for &tet_key in mesh.triangle(triangle)?.tetrahedra().iter().flatten() {
            let tet = mesh.tetrahedron(tet_key)?;
            if tet.is_infinite() {
                continue;
            }
            for (face, &other) in tet.triangles().iter().enumerate() {
                let opposite = tet.nodes()[face];
                if other != triangle && opposite != Some(a) && opposite != Some(b) {
                    stack.push(other);
                }
            }
        }
    }
    if visited.len() != triangles.len() {
        return Err(manifold(format!(
            "triangles around edge {edge_key:?} form more than one fan"
        )));
    }
    Ok(())
}

/// Checks `V - E + F - C = 1` over the finite complex.
///
/// # Errors
///
/// Returns [`ValidationError::EulerCharacteristicMismatch`] otherwise.
pub fn check_euler_characteristic<T>(mesh: &Mesh<T>) -> Result<(), ValidationError> {
    if mesh.number_of_tetrahedra() == 0 {
        return Ok(());
    }
    let found = euler_characteristic(mesh);
    if found == 1 {
        Ok(())
    } else {
        Err(ValidationError::EulerCharacteristicMismatch { expected: 1, found })
    }
}

/// `V - E + F - C` over the finite complex, counting only nodes that are
/// vertices of the mesh.
#[must_use]
pub fn euler_characteristic<T>(mesh: &Mesh<T>) -> i64 {
    let count = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
    let vertices = mesh.nodes().filter(|(_, node)| !node.edges().is_empty()).count();
    count(vertices) - count(mesh.number_of_edges()) + count(mesh.number_of_triangles())
        - count(mesh.number_of_tetrahedra())
}

/// Checks the empty-circumsphere property with exact predicates.
///
/// Points exactly on a circumsphere are accepted. Quadratic in the mesh
/// size.
///
/// # Errors
///
/// Returns [`ValidationError::DelaunayViolation`] for the first offender.
pub fn check_delaunay<T>(mesh: &Mesh<T>) -> Result<(), ValidationError> {
    for (key, tet) in mesh.finite_tetrahedra() {
        let [a, b, c, d] = mesh.tetrahedron_positions(tet)?;
        for (node, record) in mesh.nodes() {
            if tet.contains_node(node) {
                continue;
            }
            if insphere(&a, &b, &c, &d, record.position()) == InSphere::INSIDE {
                return Err(ValidationError::DelaunayViolation {
                    tetrahedron: key,
                    node,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::algorithms::insertion::split_tetrahedron;

    fn unit_mesh() -> (Mesh<()>, [NodeKey; 4], TetrahedronKey) {
        let mut mesh = Mesh::new();
        let keys = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ]
        .map(|p| mesh.add_node(p, ()));
        let first = mesh
            .create_initial_tetrahedron(keys[0], keys[1], keys[2], keys[3])
            .unwrap();
        (mesh, keys, first)
    }

    #[test]
    fn test_bootstrap_mesh_is_valid() {
        let (mesh, _, _) = unit_mesh();
        validate(&mesh).unwrap();
        assert_eq!(euler_characteristic(&mesh), 1);
    }

    #[test]
    fn test_split_keeps_euler_characteristic() {
        let (mut mesh, _, first) = unit_mesh();
        let node = mesh.add_node([0.1, 0.2, 0.3], ());
        split_tetrahedron(&mut mesh, first, node).unwrap();
        assert_eq!(euler_characteristic(&mesh), 1);
        check_manifold(&mesh).unwrap();
        check_orientation(&mesh).unwrap();
        check_adjacency(&mesh).unwrap();
    }

    #[test]
    fn test_node_inside_circumsphere_is_reported() {
        let (mut mesh, _, first) = unit_mesh();
        // Inside the circumsphere but outside the tetrahedron, and not
        // triangulated: the Delaunay check only looks at positions.
        let intruder = mesh.add_node([0.9, 0.9, 0.1], ());
        assert_eq!(
            check_delaunay(&mesh),
            Err(ValidationError::DelaunayViolation {
                tetrahedron: first,
                node: intruder,
            })
        );
    }
}
