//! Larger randomized runs with logging enabled.
//!
//! The big run is ignored by default; run it manually with:
//! `RUST_LOG=debug cargo test --test large_scale_debug -- --ignored --nocapture`
//! Flip cascade summaries are logged at debug level, fallbacks at warn level.

#![forbid(unsafe_code)]

use rand::{Rng, SeedableRng, rngs::StdRng};
use spatial_organization::prelude::*;

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

fn simulate(count: usize, steps: usize, seed: u64, config: SpatialConfig) -> SpatialOrganizer<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut organizer = SpatialOrganizer::with_config(config);
    let mut nodes = Vec::new();
    for i in 0..count {
        let p = [
            rng.random_range(0.0..50.0),
            rng.random_range(0.0..50.0),
            rng.random_range(0.0..50.0),
        ];
        if let Ok(node) = organizer.insert(p, i) {
            nodes.push(node);
        }
    }

    for _ in 0..steps {
        // Drift every node a little, like one step of a cell simulation.
        for &node in &nodes {
            let p = organizer.position(node).unwrap();
            let target = [
                p[0] + rng.random_range(-0.3..0.3),
                p[1] + rng.random_range(-0.3..0.3),
                p[2] + rng.random_range(-0.3..0.3),
            ];
            match organizer.move_to(node, target) {
                Ok(()) | Err(SpatialError::PositionNotAllowed { .. }) => {}
                Err(err) => panic!("move failed: {err}"),
            }
        }
        // Replace a few nodes.
        for _ in 0..(nodes.len() / 20).max(1) {
            let index = rng.random_range(0..nodes.len());
            let removed = nodes.swap_remove(index);
            let content = organizer.remove(removed).unwrap();
            let p = [
                rng.random_range(0.0..50.0),
                rng.random_range(0.0..50.0),
                rng.random_range(0.0..50.0),
            ];
            if let Ok(node) = organizer.insert(p, content) {
                nodes.push(node);
            }
        }
    }
    assert_eq!(organizer.number_of_nodes(), nodes.len());
    organizer
}

#[test]
fn test_simulation_steps_keep_the_mesh_valid() {
    init_tracing();
    let config = SpatialConfigBuilder::default()
        .validate_after_mutation(false)
        .build()
        .unwrap();
    let organizer = simulate(150, 5, 11, config);
    organizer.validate().unwrap();

    let stats = organizer.flip_statistics();
    assert!(stats.total_flips() > 0);
    assert_eq!(stats.global_rebuilds, 0);
    assert_eq!(
        organizer.flip_movements() + organizer.delete_insert_movements(),
        5 * 150
    );
}

#[test]
#[ignore = "slow; run manually for diagnostics"]
fn debug_large_simulation() {
    init_tracing();
    let organizer = simulate(5_000, 20, 2024, SpatialConfig::default());
    organizer.validate().unwrap();
    tracing::warn!(
        nodes = organizer.number_of_nodes(),
        tetrahedra = organizer.number_of_tetrahedra(),
        stats = ?organizer.flip_statistics(),
        in_place = organizer.flip_movements(),
        reinserted = organizer.delete_insert_movements(),
        "large simulation finished"
    );
}
