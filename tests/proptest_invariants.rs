//! Property-based tests for the mesh invariants under random operations.
//!
//! Every test drives a [`SpatialOrganizer`] through random insertions,
//! removals and movements and then runs the full validation: adjacency,
//! orientation, manifoldness, Euler characteristic and the Delaunay
//! property. Integer lattices are included to force cospherical and
//! coplanar configurations.

use proptest::prelude::*;
use spatial_organization::prelude::*;

// =============================================================================
// TEST CONFIGURATION
// =============================================================================

/// Strategy for generating finite positions in a box
fn position() -> impl Strategy<Value = Position> {
    prop::array::uniform3(-10.0..10.0_f64)
}

/// Strategy for generating positions on a small integer lattice
fn lattice_position() -> impl Strategy<Value = Position> {
    prop::array::uniform3((0_i32..4).prop_map(f64::from))
}

fn insert_all(organizer: &mut SpatialOrganizer<usize>, points: &[Position]) -> Vec<NodeKey> {
    let mut nodes = Vec::new();
    for (i, &p) in points.iter().enumerate() {
        match organizer.insert(p, i) {
            Ok(node) => nodes.push(node),
            Err(SpatialError::PositionNotAllowed { .. }) => {}
            Err(err) => panic!("insertion of {p:?} failed: {err}"),
        }
    }
    nodes
}

/// Finite tetrahedra as sorted node quadruples, in sorted order.
fn tetrahedron_set(organizer: &SpatialOrganizer<usize>) -> Vec<[NodeKey; 4]> {
    let mut set: Vec<[NodeKey; 4]> = organizer
        .mesh()
        .finite_tetrahedra()
        .filter_map(|(_, tet)| tet.finite_nodes())
        .map(|mut nodes| {
            nodes.sort();
            nodes
        })
        .collect();
    set.sort();
    set
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: random insertions produce a valid Delaunay mesh
    #[test]
    fn prop_insertion_preserves_validity(points in prop::collection::vec(position(), 4..40)) {
        let mut organizer = SpatialOrganizer::new();
        let nodes = insert_all(&mut organizer, &points);
        prop_assert_eq!(organizer.number_of_nodes(), nodes.len());
        prop_assert!(organizer.validate().is_ok(), "{:?}", organizer.validate());
        prop_assert_eq!(organizer.flip_statistics().fallback_rebuilds, 0);
        prop_assert_eq!(organizer.flip_statistics().global_rebuilds, 0);
    }

    /// Property: lattice points (many cospherical quadruples) still give a valid mesh
    #[test]
    fn prop_lattice_insertion_preserves_validity(
        points in prop::collection::vec(lattice_position(), 4..40)
    ) {
        let mut organizer = SpatialOrganizer::new();
        insert_all(&mut organizer, &points);
        prop_assert!(organizer.validate().is_ok(), "{:?}", organizer.validate());
        prop_assert_eq!(organizer.flip_statistics().global_rebuilds, 0);
    }

    /// Property: removing any subset keeps the mesh valid
    #[test]
    fn prop_removal_preserves_validity(
        points in prop::collection::vec(position(), 5..30),
        mask in prop::collection::vec(any::<bool>(), 30),
    ) {
        let mut organizer = SpatialOrganizer::new();
        let nodes = insert_all(&mut organizer, &points);
        let mut kept = nodes.len();
        for (node, remove) in nodes.into_iter().zip(mask) {
            if remove {
                organizer.remove(node).unwrap();
                kept -= 1;
            }
        }
        prop_assert_eq!(organizer.number_of_nodes(), kept);
        prop_assert!(organizer.validate().is_ok(), "{:?}", organizer.validate());
        prop_assert_eq!(organizer.flip_statistics().fallback_rebuilds, 0);
        prop_assert_eq!(organizer.flip_statistics().global_rebuilds, 0);
    }

    /// Property: inserting a node and removing it again restores the tetrahedra
    #[test]
    fn prop_insert_then_remove_restores_tetrahedra(
        points in prop::collection::vec(position(), 4..30),
        extra in position(),
    ) {
        let mut organizer = SpatialOrganizer::new();
        insert_all(&mut organizer, &points);
        let before = tetrahedron_set(&organizer);

        let node = match organizer.insert(extra, points.len()) {
            Ok(node) => node,
            Err(SpatialError::PositionNotAllowed { .. }) => return Ok(()),
            Err(err) => panic!("insertion of {extra:?} failed: {err}"),
        };
        prop_assert_eq!(organizer.remove(node).unwrap(), points.len());
        prop_assert_eq!(tetrahedron_set(&organizer), before);
        prop_assert!(organizer.validate().is_ok(), "{:?}", organizer.validate());
        prop_assert_eq!(organizer.flip_statistics().fallback_rebuilds, 0);
        prop_assert_eq!(organizer.flip_statistics().global_rebuilds, 0);
    }

    /// Property: removing from a lattice keeps the mesh valid
    #[test]
    fn prop_lattice_removal_preserves_validity(
        points in prop::collection::vec(lattice_position(), 5..30),
        stride in 1_usize..4,
    ) {
        let mut organizer = SpatialOrganizer::new();
        let nodes = insert_all(&mut organizer, &points);
        for node in nodes.into_iter().step_by(stride) {
            organizer.remove(node).unwrap();
        }
        prop_assert!(organizer.validate().is_ok(), "{:?}", organizer.validate());
        prop_assert_eq!(organizer.flip_statistics().global_rebuilds, 0);
    }

    /// Property: random moves keep the mesh valid and the node count fixed
    #[test]
    fn prop_movement_preserves_validity(
        points in prop::collection::vec(position(), 5..25),
        moves in prop::collection::vec((0_usize..25, prop::array::uniform3(-1.0..1.0_f64)), 1..20),
    ) {
        let mut organizer = SpatialOrganizer::new();
        let nodes = insert_all(&mut organizer, &points);
        for (index, delta) in moves {
            let node = nodes[index % nodes.len()];
            let p = organizer.position(node).unwrap();
            let target = [p[0] + delta[0], p[1] + delta[1], p[2] + delta[2]];
            match organizer.move_to(node, target) {
                Ok(()) => prop_assert_eq!(organizer.position(node).unwrap(), target),
                Err(SpatialError::PositionNotAllowed { .. }) => {
                    prop_assert_eq!(organizer.position(node).unwrap(), p);
                }
                Err(err) => panic!("move failed: {err}"),
            }
        }
        prop_assert_eq!(organizer.number_of_nodes(), nodes.len());
        prop_assert!(organizer.validate().is_ok(), "{:?}", organizer.validate());
        prop_assert_eq!(organizer.flip_statistics().global_rebuilds, 0);
    }

    /// Property: neighborhood is symmetric
    #[test]
    fn prop_neighbors_are_symmetric(points in prop::collection::vec(position(), 4..30)) {
        let mut organizer = SpatialOrganizer::new();
        let nodes = insert_all(&mut organizer, &points);
        for &node in &nodes {
            for neighbor in organizer.get_neighbors(node).unwrap() {
                prop_assert!(organizer.get_neighbors(neighbor).unwrap().contains(&node));
            }
        }
        prop_assert_eq!(organizer.flip_statistics().fallback_rebuilds, 0);
        prop_assert_eq!(organizer.flip_statistics().global_rebuilds, 0);
    }

    /// Property: node volumes add up to the volume of the triangulated hull
    #[test]
    fn prop_node_volumes_partition_the_hull(points in prop::collection::vec(position(), 4..30)) {
        let mut organizer = SpatialOrganizer::new();
        let nodes = insert_all(&mut organizer, &points);
        let hull: f64 = organizer
            .mesh()
            .finite_tetrahedra()
            .filter_map(|(_, tet)| tet.metrics().map(|m| m.volume))
            .sum();
        let total: f64 = nodes.iter().map(|&n| organizer.node_volume(n).unwrap()).sum();
        prop_assert!((hull - total).abs() <= 1e-9 * hull.max(1.0));
        prop_assert_eq!(organizer.flip_statistics().fallback_rebuilds, 0);
        prop_assert_eq!(organizer.flip_statistics().global_rebuilds, 0);
    }
}
