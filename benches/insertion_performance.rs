//! Performance benchmarks for building and updating a spatial organization.
//!
//! Measures bulk insertion of random points, removal of half the nodes, and
//! a round of small random moves, the access pattern of a simulation step.

#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::{Rng, SeedableRng, rngs::StdRng};
use spatial_organization::prelude::*;
use std::hint::black_box;

fn random_points(count: usize, seed: u64) -> Vec<Position> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            [
                rng.random_range(-100.0..100.0),
                rng.random_range(-100.0..100.0),
                rng.random_range(-100.0..100.0),
            ]
        })
        .collect()
}

fn build(points: &[Position]) -> (SpatialOrganizer<()>, Vec<NodeKey>) {
    let mut organizer = SpatialOrganizer::new();
    let nodes = points
        .iter()
        .filter_map(|&p| organizer.insert(p, ()).ok())
        .collect();
    (organizer, nodes)
}

fn bench_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("insertion");
    for count in [100_usize, 1_000, 5_000] {
        let points = random_points(count, 0xbe7c);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &points, |b, points| {
            b.iter(|| black_box(build(points)));
        });
    }
    group.finish();
}

fn bench_removal(c: &mut Criterion) {
    let mut group = c.benchmark_group("removal");
    for count in [100_usize, 1_000] {
        let points = random_points(count, 0x5eed);
        group.throughput(Throughput::Elements((count / 2) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &points, |b, points| {
            b.iter_batched(
                || build(points),
                |(mut organizer, nodes)| {
                    for node in nodes.into_iter().step_by(2) {
                        black_box(organizer.remove(node).ok());
                    }
                    organizer
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_movement(c: &mut Criterion) {
    let mut group = c.benchmark_group("movement");
    for count in [100_usize, 1_000] {
        let points = random_points(count, 0x0b0e);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &points, |b, points| {
            b.iter_batched(
                || build(points),
                |(mut organizer, nodes)| {
                    let mut rng = StdRng::seed_from_u64(7);
                    for &node in &nodes {
                        let Ok(p) = organizer.position(node) else {
                            continue;
                        };
                        let target = [
                            p[0] + rng.random_range(-0.5..0.5),
                            p[1] + rng.random_range(-0.5..0.5),
                            p[2] + rng.random_range(-0.5..0.5),
                        ];
                        black_box(organizer.move_to(node, target).ok());
                    }
                    organizer
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insertion, bench_removal, bench_movement);
criterion_main!(benches);
