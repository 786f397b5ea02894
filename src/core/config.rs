//! Tuning knobs of the spatial organizer.
//!
//! [`SpatialConfig`] is a plain serializable value; build one with
//! [`SpatialConfigBuilder`] or start from [`SpatialConfig::default`].
//!
//! # Examples
//!
//! ```rust
//! use spatial_organization::core::config::{SpatialConfig, SpatialConfigBuilder};
//!
//! let config = SpatialConfigBuilder::default()
//!     .walk_seed(7)
//!     .duplicate_tolerance(1e-9)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.walk_seed, 7);
//! assert_eq!(config.open_triangle_capacity, SpatialConfig::default().open_triangle_capacity);
//! ```

use serde::{Deserialize, Serialize};

/// Default preferred capacity of open-triangle organizers.
pub const DEFAULT_OPEN_TRIANGLE_CAPACITY: usize = 30;

/// Default number of retry passes over deferred faces in a flip cascade.
pub const DEFAULT_MAX_FLIP_PASSES: usize = 8;

/// Configuration of a [`SpatialOrganizer`](crate::core::spatial_organizer::SpatialOrganizer).
#[derive(Builder, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[builder(default)]
#[serde(default)]
pub struct SpatialConfig {
    /// Seed of the random generator driving the stochastic walk.
    pub walk_seed: u64,
    /// Step budget of a walk before it falls back to a linear scan.
    ///
    /// `None` derives the budget from the mesh size.
    #[builder(setter(strip_option))]
    pub max_walk_steps: Option<usize>,
    /// Insertions closer than this to an existing node are rejected.
    ///
    /// `0.0` rejects exact coincidence only.
    pub duplicate_tolerance: f64,
    /// Preferred capacity of the open-triangle organizers used for cavities.
    pub open_triangle_capacity: usize,
    /// Retry passes over deferred faces before a flip cascade gives up and
    /// the region is rebuilt.
    pub max_flip_passes: usize,
    /// Run the full validation after every mutation and log violations.
    pub validate_after_mutation: bool,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            walk_seed: 0x5eed,
            max_walk_steps: None,
            duplicate_tolerance: 0.0,
            open_triangle_capacity: DEFAULT_OPEN_TRIANGLE_CAPACITY,
            max_flip_passes: DEFAULT_MAX_FLIP_PASSES,
            validate_after_mutation: false,
        }
    }
}
