//! # spatial-organization
//!
//! A dynamic 3D Delaunay triangulation that organizes points ("nodes") in
//! space and keeps their neighborhood relation up to date while nodes are
//! inserted, moved and removed. It is meant for agent-based simulations where
//! every node needs to know which other nodes are its direct neighbors.
//!
//! # Features
//!
//! - Incremental insertion by bistellar flips (2-3, 3-2 and 4-4), with a
//!   cavity-based fallback for configurations the flips cannot repair
//! - Removal by re-triangulating the cavity the node leaves behind
//! - Movement that only updates the position when the connectivity stays
//!   Delaunay, and re-inserts otherwise
//! - Exact arithmetic fallback for orientation and in-sphere tests, with
//!   symbolic perturbation for cospherical points
//! - An unbounded convex hull modelled with infinite tetrahedra
//! - Listeners observing node insertion, movement and removal
//! - Serializable configuration with [serde](https://serde.rs)
//!
//! # Basic Usage
//!
//! ```rust
//! use spatial_organization::prelude::*;
//!
//! let mut organizer = SpatialOrganizer::new();
//! for p in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]] {
//!     organizer.insert(p, ()).unwrap();
//! }
//! assert_eq!(organizer.number_of_tetrahedra(), 1);
//! assert_eq!(organizer.number_of_open_triangles(), 4);
//!
//! let node = organizer.insert([0.25, 0.25, 0.25], ()).unwrap();
//! assert_eq!(organizer.number_of_tetrahedra(), 4);
//! assert_eq!(organizer.get_neighbors(node).unwrap().len(), 4);
//!
//! organizer.move_to(node, [0.2, 0.3, 0.2]).unwrap();
//! organizer.remove(node).unwrap();
//! assert_eq!(organizer.number_of_tetrahedra(), 1);
//! assert!(organizer.is_valid());
//! ```
//!
//! # Mesh Invariants
//!
//! After every public operation the mesh satisfies:
//!
//! - **Adjacency** – every triangle has two incident tetrahedra and every
//!   tetrahedron's faces point back at it.
//! - **Orientation** – finite tetrahedra are positively oriented.
//! - **Manifold** – the tetrahedra around every edge form a single cycle.
//! - **Euler characteristic** – `V - E + F - T = 1` for the finite complex.
//! - **Delaunay** – no node lies strictly inside the circumsphere of a finite
//!   tetrahedron.
//!
//! [`SpatialOrganizer::validate`](core::spatial_organizer::SpatialOrganizer::validate)
//! checks all of them; see [`core::validation`] for the individual checks.
//!
//! # Degenerate Input
//!
//! Coincident insertions are rejected with
//! [`SpatialError::PositionNotAllowed`](core::spatial_organizer::SpatialError::PositionNotAllowed),
//! which carries a nearby free position. Nodes that are all collinear or
//! coplanar are kept pending until a node off their plane arrives; no
//! tetrahedra exist before that.

// Allow multiple crate versions due to transitive dependencies
#![allow(clippy::multiple_crate_versions)]
// Forbid unsafe code throughout the entire crate
#![forbid(unsafe_code)]

#[macro_use]
extern crate derive_builder;

/// The `core` module contains the mesh, its simplices and the algorithms that
/// keep it Delaunay.
///
/// [`SpatialOrganizer`](core::spatial_organizer::SpatialOrganizer) is the entry
/// point; the [`Mesh`](core::mesh::Mesh) underneath is readable for queries.
pub mod core {
    /// Algorithms mutating and querying the mesh
    pub mod algorithms {
        /// Bistellar flips and the flip cascade restoring the Delaunay property
        pub mod flips;
        /// Insertion of nodes by splitting and flipping, or by cavity
        pub mod insertion;
        /// Point location by stochastic walk
        pub mod locate;
        /// Removal of nodes by cavity re-triangulation
        pub mod removal;
    }
    /// Collection aliases used by the mesh
    pub mod collections;
    pub mod config;
    pub mod edge;
    pub mod listener;
    pub mod mesh;
    pub mod open_triangle_organizer;
    pub mod space_node;
    pub mod spatial_organizer;
    pub mod tetrahedron;
    pub mod triangle;
    pub mod validation;

    pub use config::*;
    pub use listener::*;
    pub use mesh::*;
    pub use space_node::*;
    pub use spatial_organizer::*;
    pub use tetrahedron::*;
    pub use triangle::*;
    // Note: collections module not re-exported here to avoid namespace pollution
}

/// Contains the geometric predicates and the exact arithmetic they fall back to.
pub mod geometry {
    /// Three-component vectors of exact rationals
    pub mod exact_vector;
    /// Orientation and in-sphere tests
    pub mod predicates;
    /// Exact rational numbers over big integers
    pub mod rational;
    /// Floating-point vector helpers on positions
    pub mod util;

    pub use predicates::*;
    pub use util::*;
}

/// A prelude module that re-exports commonly used types.
/// This makes it easier to import the most commonly used items from the crate.
pub mod prelude {
    pub use crate::core::{
        algorithms::{
            flips::{FlipError, FlipStatistics},
            insertion::InsertionError,
            locate::{LocateError, LocateResult, locate},
        },
        config::{SpatialConfig, SpatialConfigBuilder},
        listener::NodeListener,
        mesh::{Mesh, MeshError},
        space_node::{NodeKey, SpaceNode},
        spatial_organizer::{SpatialError, SpatialOrganizer},
        tetrahedron::{Tetrahedron, TetrahedronKey},
        triangle::{Triangle3D, TriangleKey},
        validation::ValidationError,
    };

    pub use crate::geometry::{
        predicates::{InSphere, Orientation, insphere, orient3d},
        util::{GeometryError, Position, barycentric_coordinates},
    };
}

/// The function `is_normal` checks that structs implement `auto` traits.
/// Traits are checked at compile time, so this function is only used for
/// testing.
#[must_use]
pub const fn is_normal<T: Sized + Send + Sync + Unpin>() -> bool {
    true
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::{
        core::{mesh::Mesh, space_node::SpaceNode, spatial_organizer::SpatialOrganizer},
        geometry::rational::Rational,
        is_normal,
    };

    // =============================================================================
    // TYPE SAFETY TESTS
    // =============================================================================

    #[test]
    fn normal_types() {
        assert!(is_normal::<SpaceNode<f64>>());
        assert!(is_normal::<Mesh<()>>());
        assert!(is_normal::<Mesh<String>>());
        assert!(is_normal::<SpatialOrganizer<u32>>());
        assert!(is_normal::<Rational>());
    }

    #[test]
    fn test_prelude_exports() {
        use crate::prelude::*;

        let mut organizer: SpatialOrganizer<usize> =
            SpatialOrganizer::with_config(SpatialConfigBuilder::default().build().unwrap());
        let nodes: Vec<NodeKey> = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
            .into_iter()
            .enumerate()
            .map(|(i, p)| organizer.insert(p, i).unwrap())
            .collect();
        assert_eq!(organizer.content(nodes[3]).unwrap(), &3);
        assert_eq!(
            orient3d(
                &[0.0, 0.0, 0.0],
                &[1.0, 0.0, 0.0],
                &[0.0, 1.0, 0.0],
                &[0.0, 0.0, 1.0]
            ),
            Orientation::POSITIVE
        );
        assert_eq!(organizer.flip_statistics(), FlipStatistics::default());
    }
}
