//! Node insertion into an existing mesh.
//!
//! A node strictly inside a finite tetrahedron is inserted by a 1-4 split
//! followed by the flip cascade. Everything else (points on faces or edges,
//! points outside the hull) goes through Bowyer-Watson cavity insertion:
//! the tetrahedra whose circumsphere strictly contains the node are removed
//! and the cavity is starred from the node.
//!
//! When the flip cascade cannot finish, the node's star is re-triangulated
//! without it and the node is inserted again through its cavity.

use crate::core::{
    algorithms::{
        flips::{FlipError, FlipStatistics, restore_delaunay},
        locate::{LocateError, LocateResult, find_conflict_region, locate_exhaustive},
        removal::remove_star,
    },
    config::SpatialConfig,
    mesh::{Mesh, MeshError},
    open_triangle_organizer::{OpenTriangleOrganizer, TriangulationNodeOrganizer},
    space_node::NodeKey,
    tetrahedron::TetrahedronKey,
};
use crate::geometry::predicates::{Orientation, orient3d};
use slotmap::Key;

/// Error during insertion.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum InsertionError {
    /// The position coincides with an existing node.
    #[error("Position coincides with node {node:?}")]
    CoincidentNode {
        /// The node already at the position.
        node: NodeKey,
    },
    /// Point location failed.
    #[error("Location error: {0}")]
    Location(#[from] LocateError),
    /// A flip failed after modifying the mesh.
    #[error("Flip error: {0}")]
    Flip(#[from] FlipError),
    /// The mesh references are inconsistent.
    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),
}

/// Splits `tetrahedron` into four tetrahedra around `node`, which must lie
/// strictly inside it.
///
/// # Errors
///
/// Returns [`MeshError::DegenerateConfiguration`] for infinite tetrahedra or
/// a node on the tetrahedron's boundary.
pub fn split_tetrahedron<T>(
    mesh: &mut Mesh<T>,
    tetrahedron: TetrahedronKey,
    node: NodeKey,
) -> Result<[TetrahedronKey; 4], MeshError> {
    let nodes = mesh
        .tetrahedron(tetrahedron)?
        .finite_nodes()
        .ok_or_else(|| MeshError::degenerate("cannot split an infinite tetrahedron"))?;
    let point = mesh.position(node)?;
    let positions = [
        mesh.position(nodes[0])?,
        mesh.position(nodes[1])?,
        mesh.position(nodes[2])?,
        mesh.position(nodes[3])?,
    ];
    for i in 0..4 {
        let mut corners = positions;
        corners[i] = point;
        if orient3d(&corners[0], &corners[1], &corners[2], &corners[3]) != Orientation::POSITIVE {
            return Err(MeshError::degenerate("split point is not strictly inside the tetrahedron"));
        }
    }

    let mut organizer = OpenTriangleOrganizer::simple();
    mesh.remove_tetrahedron(tetrahedron, Some(&mut organizer))?;
    let mut created = [TetrahedronKey::null(); 4];
    for (i, slot) in created.iter_mut().enumerate() {
        let mut vertices = nodes.map(Some);
        vertices[i] = Some(node);
        *slot = mesh.create_tetrahedron(vertices, Some(&mut organizer))?;
    }
    if !organizer.is_empty() {
        return Err(MeshError::reference("1-4 split left faces open"));
    }
    tracing::trace!(?tetrahedron, ?node, "1-4 split");
    Ok(created)
}

/// Inserts `node` by removing its conflict region and starring the cavity.
///
/// `start` must be in conflict with the node, e.g. the tetrahedron returned
/// by point location. Returns the created tetrahedra.
///
/// # Errors
///
/// Returns [`MeshError::DegenerateConfiguration`] before modifying the mesh
/// if the cavity is not star-shaped from the node, and other mesh errors if
/// the cavity cannot be closed.
pub fn insert_by_cavity<T>(
    mesh: &mut Mesh<T>,
    node: NodeKey,
    start: TetrahedronKey,
    capacity: usize,
) -> Result<Vec<TetrahedronKey>, MeshError> {
    let (point, rank) = mesh.ranked_position(node)?;
    let region = find_conflict_region(mesh, &point, rank, start)?;

    for &(triangle, outside) in &region.boundary {
        let tet = mesh.tetrahedron(outside)?;
        let face = tet
            .index_of_triangle(triangle)
            .ok_or_else(|| MeshError::reference("cavity face is not a face of its neighbor"))?;
        if let [Some(a), Some(b), Some(c)] = tet.face_nodes(face)
            && orient3d(&mesh.position(a)?, &mesh.position(b)?, &mesh.position(c)?, &point)
                != Orientation::NEGATIVE
        {
            return Err(MeshError::degenerate("cavity is not star-shaped from the new node"));
        }
    }

    let mut organizer = OpenTriangleOrganizer::new(capacity, TriangulationNodeOrganizer::new());
    for &tet in &region.tetrahedra {
        mesh.remove_tetrahedron(tet, Some(&mut organizer))?;
    }
    let mut created = Vec::with_capacity(region.boundary.len());
    for &(triangle, outside) in &region.boundary {
        let tet = mesh.tetrahedron(outside)?;
        let face = tet
            .index_of_triangle(triangle)
            .ok_or_else(|| MeshError::reference("cavity face is not a face of its neighbor"))?;
        let [f0, f1, f2] = tet.face_nodes(face);
        created.push(mesh.create_tetrahedron([Some(node), f0, f1, f2], Some(&mut organizer))?);
    }
    if !organizer.is_empty() {
        return Err(MeshError::reference(format!(
            "{} cavity faces left open",
            organizer.len()
        )));
    }
    tracing::trace!(
        ?node,
        removed = region.tetrahedra.len(),
        created = created.len(),
        "cavity insertion"
    );
    Ok(created)
}

/// Inserts `node` at the location found for its position.
///
/// # Errors
///
/// Returns [`InsertionError::CoincidentNode`] for [`LocateResult::OnNode`]
/// without modifying the mesh. Other errors leave the mesh inconsistent.
pub fn insert_located<T>(
    mesh: &mut Mesh<T>,
    node: NodeKey,
    location: LocateResult,
    config: &SpatialConfig,
) -> Result<FlipStatistics, InsertionError> {
    match location {
        LocateResult::OnNode(existing) => Err(InsertionError::CoincidentNode { node: existing }),
        LocateResult::OnBoundary(start) | LocateResult::Outside(start) => {
            insert_by_cavity(mesh, node, start, config.open_triangle_capacity)?;
            Ok(FlipStatistics::default())
        }
        LocateResult::InsideTetrahedron(tetrahedron) => {
            let created = split_tetrahedron(mesh, tetrahedron, node)?;
            match restore_delaunay(mesh, node, &created, config.max_flip_passes) {
                Ok(stats) => Ok(stats),
                Err(FlipError::Mesh(err)) => Err(err.into()),
                Err(err) => {
                    tracing::warn!(?node, %err, "flip cascade failed; re-inserting through the cavity");
                    reinsert_through_cavity(mesh, node, config)?;
                    Ok(FlipStatistics {
                        fallback_rebuilds: 1,
                        ..FlipStatistics::default()
                    })
                }
            }
        }
    }
}

/// Takes `node` out of the mesh again and inserts it through its cavity at
/// its current position.
///
/// The node's star only has to be a valid triangulation; it need not be
/// Delaunay, and the node may have moved since it was linked.
///
/// # Errors
///
/// Returns [`InsertionError::CoincidentNode`] if the position is occupied,
/// leaving `node` detached. Other errors leave the mesh inconsistent.
pub fn reinsert_through_cavity<T>(
    mesh: &mut Mesh<T>,
    node: NodeKey,
    config: &SpatialConfig,
) -> Result<(), InsertionError> {
    remove_star(mesh, node, config.open_triangle_capacity)?;
    let point = mesh.position(node)?;
    match locate_exhaustive(mesh, &point)? {
        LocateResult::OnNode(existing) => Err(InsertionError::CoincidentNode { node: existing }),
        LocateResult::InsideTetrahedron(start)
        | LocateResult::OnBoundary(start)
        | LocateResult::Outside(start) => {
            insert_by_cavity(mesh, node, start, config.open_triangle_capacity)?;
            Ok(())
        }
    }
}
