use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use hnsw_index::{HnswIndex, HnswParams, L2Space, QueryTimeParams};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const DIM: usize = 128;

fn synthetic_vectors(n: usize, seed: u64) -> Vec<hnsw_index::Object> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n as i64)
        .map(|id| {
            let v: Vec<f32> = (0..DIM).map(|_| rng.r#gen::<f32>()).collect();
            L2Space::object_from_vec(id, &v)
        })
        .collect()
}

fn bench_hnsw_build(c: &mut Criterion) {
    let dataset = synthetic_vectors(10_000, 1);

    c.bench_function("hnsw_build_10k", |b| {
        b.iter(|| {
            let params = HnswParams::new(16)
                .unwrap()
                .with_ef_construction(100)
                .unwrap();
            let index = HnswIndex::new(L2Space::new(DIM), params);
            index.build(dataset.clone()).unwrap();
        })
    });
}

fn bench_hnsw_incremental_insert(c: &mut Criterion) {
    let dataset = synthetic_vectors(10_000, 1);
    let extra = synthetic_vectors(1, 2);

    c.bench_function("hnsw_incremental_insert", |b| {
        b.iter_batched(
            || {
                let params = HnswParams::new(16)
                    .unwrap()
                    .with_ef_construction(100)
                    .unwrap();
                let index = HnswIndex::new(L2Space::new(DIM), params);
                index.build(dataset.clone()).unwrap();
                index
            },
            |index| {
                index.add_batch(black_box(extra.clone()), false).unwrap();
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_search_knn(c: &mut Criterion) {
    let dataset = synthetic_vectors(10_000, 1);
    let queries = synthetic_vectors(50, 9);

    let params = HnswParams::new(16).unwrap().with_ef_construction(100).unwrap();
    let index = HnswIndex::new(L2Space::new(DIM), params);
    index.build(dataset).unwrap();
    index.set_query_time_params(QueryTimeParams {
        ef: 32,
        ..Default::default()
    });

    c.bench_function("hnsw_search_k10", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let query = &queries[i % queries.len()];
            i += 1;
            index.search_knn(black_box(query), 10).unwrap();
        })
    });
}

criterion_group!(benches, bench_hnsw_build, bench_hnsw_incremental_insert, bench_search_knn);
criterion_main!(benches);
