//! NSG construction benchmarks.
//!
//! Construction dominates the cost of an index; this tracks the parallel
//! per-point phase plus connectivity repair as the dataset grows.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use nsg_core::{BuildParams, GraphBuilder, KnnGraph, Metric, VectorStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

fn random_store(n: usize, dims: usize) -> VectorStore {
    let mut rng = StdRng::seed_from_u64(1234);
    let data: Vec<f32> = (0..n * dims).map(|_| rng.random::<f32>()).collect();
    VectorStore::from_flat(data, dims).expect("valid store")
}

/// Benchmark: full build at increasing dataset sizes
fn bench_build_by_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_by_size");
    group.sample_size(10);

    for n in [1000usize, 4000] {
        let store = random_store(n, 32);
        let knn = KnnGraph::exact(&store, 20, Metric::L2).expect("valid k");
        let builder = GraphBuilder::new(BuildParams::new(40, 24, 200), Metric::L2);

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, _| {
            bench.iter(|| black_box(builder.build(&store, &knn).expect("build succeeds")));
        });
    }

    group.finish();
}

/// Benchmark: exact k-NN graph generation (brute force)
fn bench_exact_knn(c: &mut Criterion) {
    let mut group = c.benchmark_group("exact_knn");
    group.sample_size(10);

    let store = random_store(2000, 32);
    group.bench_function("n2000_k20", |bench| {
        bench.iter(|| black_box(KnnGraph::exact(&store, 20, Metric::L2).expect("valid k")));
    });

    group.finish();
}

criterion_group!(benches, bench_build_by_size, bench_exact_knn);
criterion_main!(benches);
