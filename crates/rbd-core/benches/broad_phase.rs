//! Broad-phase benchmarks: spatial hash against the all-pairs baseline.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::{Point3, Vector3};
use rbd_core::{Aabb, AllPairs, BroadPhase, SpatialHashBroadPhase};
use rbd_contact::ContactGraph;
use rbd_types::{Body, BodyId, BodySet, MassProperties};

fn grid_scene(count: usize) -> (BodySet, Vec<(BodyId, Aabb)>) {
    let mut bodies = BodySet::new();
    let mut bounds = Vec::with_capacity(count);
    let side = (count as f64).cbrt().ceil() as usize;
    for i in 0..count {
        let position = Point3::new(
            (i % side) as f64 * 0.9,
            ((i / side) % side) as f64 * 0.9,
            (i / (side * side)) as f64 * 0.9,
        );
        let id = bodies.insert(Body::new(MassProperties::sphere(1.0, 0.5), position));
        bounds.push((id, Aabb::from_center(position, Vector3::new(0.5, 0.5, 0.5))));
    }
    (bodies, bounds)
}

fn bench_broad_phase(c: &mut Criterion) {
    let mut group = c.benchmark_group("broad_phase");
    for &count in &[64usize, 256, 1024] {
        let (bodies, bounds) = grid_scene(count);

        group.bench_with_input(
            BenchmarkId::new("spatial_hash", count),
            &count,
            |b, _| {
                let mut broad = SpatialHashBroadPhase::new();
                let mut graph = ContactGraph::new();
                b.iter(|| {
                    graph.begin_pass();
                    broad.find_pairs(&bounds, &bodies, &mut graph).unwrap()
                });
            },
        );

        group.bench_with_input(BenchmarkId::new("all_pairs", count), &count, |b, _| {
            let mut broad = AllPairs::new();
            let mut graph = ContactGraph::new();
            b.iter(|| {
                graph.begin_pass();
                broad.find_pairs(&bounds, &bodies, &mut graph).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_broad_phase);
criterion_main!(benches);
