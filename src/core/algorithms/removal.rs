//! Node removal.
//!
//! The tetrahedra incident to the node are deleted, leaving a cavity whose
//! faces are collected by an [`OpenTriangleOrganizer`]. The cavity is then
//! closed by gift-wrapping over the node's link, creating infinite
//! tetrahedra where the hull shrinks.

use crate::core::{
    mesh::{Mesh, MeshError},
    open_triangle_organizer::{CavityFill, OpenTriangleOrganizer, TriangulationNodeOrganizer},
    space_node::NodeKey,
};

/// Removes every tetrahedron incident to `node` and re-triangulates the
/// cavity from the node's neighbors.
///
/// The node itself stays in the mesh, detached from all simplices.
///
/// # Errors
///
/// Returns [`MeshError::DegenerateConfiguration`] if the cavity cannot be
/// closed, or if closing an interior cavity created hull faces. The mesh is
/// inconsistent afterwards.
pub fn remove_star<T>(
    mesh: &mut Mesh<T>,
    node: NodeKey,
    capacity: usize,
) -> Result<CavityFill, MeshError> {
    let star = mesh.incident_tetrahedra(node)?;
    if star.is_empty() {
        return Ok(CavityFill::default());
    }
    let mut touches_hull = false;
    let mut link = TriangulationNodeOrganizer::new();
    for &key in &star {
        let tet = mesh.tetrahedron(key)?;
        touches_hull |= tet.is_infinite();
        for &vertex in tet.nodes().iter().flatten() {
            if vertex != node {
                link.add_node(vertex);
            }
        }
    }

    let mut organizer = OpenTriangleOrganizer::new(capacity.max(star.len()), link);
    for &key in &star {
        mesh.remove_tetrahedron(key, Some(&mut organizer))?;
    }
    let fill = organizer.triangulate(mesh)?;
    if fill.infinite > 0 && !touches_hull {
        return Err(MeshError::degenerate(
            "re-triangulating an interior cavity created hull faces",
        ));
    }
    tracing::trace!(
        ?node,
        removed = star.len(),
        finite = fill.finite,
        infinite = fill.infinite,
        "removed node star"
    );
    Ok(fill)
}
