use hnsw_index::{HnswIndex, HnswParams, L2Space};
use proptest::prelude::*;

const DIM: usize = 4;

fn arb_vector() -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-100.0f32..100.0, DIM)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Every inserted vector is its own nearest neighbor: searching for it
    /// with k=1 and a generous ef must return it at distance ~0.
    #[test]
    fn inserted_vectors_are_exactly_recalled(
        vectors in proptest::collection::vec(arb_vector(), 5..50)
    ) {
        let objects: Vec<_> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| L2Space::object_from_vec(i as i64, v))
            .collect();

        let params = HnswParams::new(8).unwrap().with_ef_construction(200).unwrap();
        let index = HnswIndex::new(L2Space::new(DIM), params);
        index.build(objects.clone()).unwrap();
        index.set_query_time_params(hnsw_index::QueryTimeParams {
            ef: 200,
            ..Default::default()
        });

        for (i, v) in vectors.iter().enumerate() {
            let query = L2Space::object_from_vec(-1, v);
            let results = index.search_knn(&query, 1).unwrap();
            let (id, dist) = results.first().expect("index is non-empty");
            prop_assert_eq!(*id, i as i64, "nearest neighbor of its own vector should be itself");
            prop_assert!(*dist < 1e-3, "expected ~0 distance to self, got {dist}");
        }
    }

    /// `search_knn` never returns more than `k` results or a result whose
    /// id was not part of the inserted corpus.
    #[test]
    fn search_respects_k_and_only_returns_known_ids(
        vectors in proptest::collection::vec(arb_vector(), 1..30),
        k in 1u32..10,
    ) {
        let objects: Vec<_> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| L2Space::object_from_vec(i as i64, v))
            .collect();
        let known_ids: std::collections::HashSet<i64> = (0..vectors.len() as i64).collect();

        let params = HnswParams::new(8).unwrap();
        let index = HnswIndex::new(L2Space::new(DIM), params);
        index.build(objects).unwrap();

        let query = L2Space::object_from_vec(-1, &vectors[0]);
        let results = index.search_knn(&query, k).unwrap();

        prop_assert!(results.len() <= k as usize);
        for (id, _) in &results {
            prop_assert!(known_ids.contains(id));
        }
    }
}
