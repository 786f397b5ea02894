//! Deterministic integration tests for the Euler characteristic of the mesh.
//!
//! The finite complex of a valid organization is a triangulated ball, so
//! `V - E + F - T = 1` must hold after every operation. The infinite
//! simplices are not counted.
//!
//! For randomized coverage, see `proptest_invariants.rs`.

use spatial_organization::core::validation::{check_euler_characteristic, euler_characteristic};
use spatial_organization::prelude::*;

fn counts(organizer: &SpatialOrganizer<()>) -> (usize, usize, usize, usize) {
    (
        organizer.number_of_nodes(),
        organizer.number_of_edges(),
        organizer.number_of_triangles(),
        organizer.number_of_tetrahedra(),
    )
}

// =============================================================================
// KNOWN CONFIGURATIONS
// =============================================================================

#[test]
fn test_single_tetrahedron() {
    let mut organizer = SpatialOrganizer::new();
    for p in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]] {
        organizer.insert(p, ()).unwrap();
    }
    // V=4, E=6, F=4, T=1 → χ = 1
    assert_eq!(counts(&organizer), (4, 6, 4, 1));
    assert_eq!(euler_characteristic(organizer.mesh()), 1);
}

#[test]
fn test_split_tetrahedron() {
    let mut organizer = SpatialOrganizer::new();
    for p in [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [0.25, 0.25, 0.25],
    ] {
        organizer.insert(p, ()).unwrap();
    }
    // V=5, E=10, F=10, T=4 → χ = 1
    assert_eq!(counts(&organizer), (5, 10, 10, 4));
    assert_eq!(euler_characteristic(organizer.mesh()), 1);
}

#[test]
fn test_bipyramid() {
    let mut organizer = SpatialOrganizer::new();
    for p in [
        [0.0, 0.0, 0.0],
        [2.0, 0.0, 0.0],
        [1.0, 2.0, 0.0],
        [1.0, 0.7, 1.5],
        [1.0, 0.7, -1.5],
    ] {
        organizer.insert(p, ()).unwrap();
    }
    assert_eq!(euler_characteristic(organizer.mesh()), 1);
    check_euler_characteristic(organizer.mesh()).unwrap();
    assert_eq!(organizer.number_of_open_triangles(), 6);
}

#[test]
fn test_pending_nodes_are_not_counted() {
    let mut organizer = SpatialOrganizer::new();
    for p in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
        organizer.insert(p, ()).unwrap();
    }
    assert_eq!(euler_characteristic(organizer.mesh()), 0);
    check_euler_characteristic(organizer.mesh()).unwrap();
}

// =============================================================================
// GROWING AND SHRINKING
// =============================================================================

#[test]
fn test_characteristic_is_stable_on_a_lattice() {
    let mut organizer = SpatialOrganizer::new();
    let mut nodes = Vec::new();
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                let p = [
                    f64::from(i) + 0.01 * f64::from(j * k),
                    f64::from(j) + 0.013 * f64::from(i),
                    f64::from(k) + 0.007 * f64::from(i + j),
                ];
                nodes.push(organizer.insert(p, ()).unwrap());
                if organizer.number_of_tetrahedra() > 0 {
                    assert_eq!(euler_characteristic(organizer.mesh()), 1);
                }
            }
        }
    }
    organizer.validate().unwrap();

    for node in nodes.into_iter().step_by(2) {
        organizer.remove(node).unwrap();
        if organizer.number_of_tetrahedra() > 0 {
            assert_eq!(euler_characteristic(organizer.mesh()), 1);
        }
    }
    organizer.validate().unwrap();
}
