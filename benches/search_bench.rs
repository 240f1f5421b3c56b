//! Benchmarks for exact and approximate matching.
//!
//! Run with: cargo bench --bench search_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use item_matcher::{
    ApproximateMatcher, Corpus, EmbeddingRecord, ExactMatcher, IndexBuilder, Matcher, VectorStore,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_corpus(rows: usize, dim: usize) -> Corpus {
    let mut rng = StdRng::seed_from_u64(42);
    let records: Vec<EmbeddingRecord> = (0..rows)
        .map(|i| {
            let v = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            EmbeddingRecord::new(format!("item-{i}"), v)
        })
        .collect();
    VectorStore::default()
        .from_records(records)
        .expect("random corpus is valid")
}

fn random_queries(count: usize, dim: usize) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..count)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

/// Benchmark the parallel exact scan across corpus sizes.
fn benchmark_exact(c: &mut Criterion) {
    let queries = random_queries(100, 64);

    for size in [10_000, 100_000] {
        let corpus = random_corpus(size, 64);
        let matcher = ExactMatcher::from_corpus(&corpus).unwrap();

        let mut group = c.benchmark_group(format!("exact_{}", size));
        group.throughput(Throughput::Elements(1));

        let mut query_idx = 0usize;
        group.bench_function("k10", |b| {
            b.iter(|| {
                let query = &queries[query_idx % queries.len()];
                query_idx += 1;
                black_box(matcher.search(query, 10))
            })
        });

        group.finish();
    }
}

/// Benchmark approximate search with different probe and reorder depths.
fn benchmark_approximate(c: &mut Criterion) {
    let corpus = random_corpus(100_000, 64);
    let queries = random_queries(100, 64);
    let index = IndexBuilder::new()
        .build(&corpus.matrix)
        .expect("index builds");

    let mut group = c.benchmark_group("approximate_100000");
    group.throughput(Throughput::Elements(1));

    for (leaves, reorder) in [(10, 0), (10, 100), (50, 200), (200, 200)] {
        let mut index = index.clone();
        index.set_num_leaves_to_search(leaves);
        index.set_reorder_num_neighbors(reorder);
        let matcher = ApproximateMatcher::new(index, corpus.vocabulary.clone())
            .expect("vocabulary matches index");

        let mut query_idx = 0usize;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("leaves_{}_reorder_{}", leaves, reorder)),
            &leaves,
            |b, _| {
                b.iter(|| {
                    let query = &queries[query_idx % queries.len()];
                    query_idx += 1;
                    black_box(matcher.search(query, 10))
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_exact, benchmark_approximate);
criterion_main!(benches);
