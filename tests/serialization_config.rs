//! Integration tests for configuring an organizer.
//!
//! The configuration is plain data: it round-trips through JSON, missing
//! fields take their defaults, and the walk seed makes runs reproducible.

use spatial_organization::core::config::{DEFAULT_MAX_FLIP_PASSES, DEFAULT_OPEN_TRIANGLE_CAPACITY};
use spatial_organization::prelude::*;

fn points() -> Vec<Position> {
    (0..60_u32)
        .map(|i| {
            let t = f64::from(i);
            [
                (t * 0.618_033).fract() * 10.0,
                (t * 0.414_213).fract() * 10.0,
                (t * 0.732_050).fract() * 10.0,
            ]
        })
        .collect()
}

#[test]
fn test_config_json_roundtrip() {
    let config = SpatialConfigBuilder::default()
        .walk_seed(42)
        .max_walk_steps(500)
        .duplicate_tolerance(1e-6)
        .validate_after_mutation(true)
        .build()
        .unwrap();
    let json = serde_json::to_string_pretty(&config).unwrap();
    let back: SpatialConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_flip_statistics_json_roundtrip() {
    let mut organizer = SpatialOrganizer::new();
    for p in points() {
        organizer.insert(p, ()).unwrap();
    }
    let stats = organizer.flip_statistics();
    assert!(stats.total_flips() > 0);
    let json = serde_json::to_string(&stats).unwrap();
    assert!(json.contains("\"flips_2_to_3\""));
    let back: FlipStatistics = serde_json::from_str(&json).unwrap();
    assert_eq!(back, stats);
}

#[test]
fn test_missing_fields_take_defaults() {
    let config: SpatialConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, SpatialConfig::default());
    assert_eq!(config.open_triangle_capacity, DEFAULT_OPEN_TRIANGLE_CAPACITY);
    assert_eq!(config.max_flip_passes, DEFAULT_MAX_FLIP_PASSES);
    assert_eq!(config.max_walk_steps, None);
}

#[test]
fn test_same_seed_gives_same_mesh() {
    let config = SpatialConfigBuilder::default().walk_seed(9).build().unwrap();
    let build = || {
        let mut organizer = SpatialOrganizer::with_config(config);
        for p in points() {
            organizer.insert(p, ()).unwrap();
        }
        organizer
    };
    let first = build();
    let second = build();
    assert_eq!(first.number_of_tetrahedra(), second.number_of_tetrahedra());
    assert_eq!(first.number_of_edges(), second.number_of_edges());
    assert_eq!(first.flip_statistics(), second.flip_statistics());
    assert_eq!(first.config(), &config);
}

#[test]
fn test_short_walk_budget_still_locates() {
    let config = SpatialConfigBuilder::default().max_walk_steps(1).build().unwrap();
    let mut organizer = SpatialOrganizer::with_config(config);
    for p in points() {
        organizer.insert(p, ()).unwrap();
    }
    assert_eq!(organizer.number_of_nodes(), 60);
    organizer.validate().unwrap();
}
