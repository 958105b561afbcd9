//! k-NN query benchmarks over the vector segment.

use std::collections::HashSet;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;
use tessera::{
    CollectionId, LogRecord, OperationRecord, SeqId, VectorSegment, VectorSegmentConfig,
};

const DIMENSION: usize = 64;

fn build_segment(dir: &std::path::Path, vectors: usize) -> VectorSegment {
    let mut rng = StdRng::seed_from_u64(7);
    let segment = VectorSegment::new(
        CollectionId::new("bench"),
        dir,
        VectorSegmentConfig::new().with_flush_threshold(0),
    );
    segment.start().unwrap();

    let records: Vec<LogRecord> = (0..vectors)
        .map(|i| {
            let vector: Vec<f32> = (0..DIMENSION).map(|_| rng.gen_range(-1.0..1.0)).collect();
            LogRecord::new(
                SeqId::new(i as u64 + 1),
                OperationRecord::upsert(format!("item-{i:06}"), vector),
            )
        })
        .collect();

    for chunk in records.chunks(1024) {
        segment.apply(chunk).unwrap();
    }
    segment
}

fn bench_knn(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(11);
    let query: Vec<f32> = (0..DIMENSION).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let mut group = c.benchmark_group("knn");
    for &size in &[1_000usize, 10_000] {
        let dir = tempdir().unwrap();
        let segment = build_segment(dir.path(), size);

        group.bench_with_input(BenchmarkId::new("unfiltered", size), &size, |b, _| {
            b.iter(|| segment.query(&[query.clone()], 10, None).unwrap())
        });

        // Allow-list covering 10% of the ids
        let allowed: HashSet<String> = (0..size)
            .step_by(10)
            .map(|i| format!("item-{i:06}"))
            .collect();
        group.bench_with_input(BenchmarkId::new("filtered_10pct", size), &size, |b, _| {
            b.iter(|| segment.query(&[query.clone()], 10, Some(&allowed)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_knn);
criterion_main!(benches);
