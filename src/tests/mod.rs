use pretty_assertions::assert_eq;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rstest::rstest;

use crate::error::Error;
use crate::index::{DeleteStrategy, HnswIndex};
use crate::params::{HnswParams, QueryTimeParams};
use crate::space::{CosineSpace, L2Space, Space};

fn two_d_corner_objects() -> Vec<crate::object::Object> {
    [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0), (10.0, 10.0)]
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| L2Space::object_from_vec(i as i64, &[x, y]))
        .collect()
}

fn build_index(m: u32, ef_construction: u32, objects: Vec<crate::object::Object>) -> HnswIndex<f32, L2Space> {
    let params = HnswParams::new(m)
        .unwrap()
        .with_ef_construction(ef_construction)
        .unwrap();
    let index = HnswIndex::new(L2Space::new(2), params);
    index.build(objects).unwrap();
    index
}

/// Scenario 1: two-dimensional L2, trivial correctness.
#[test]
fn trivial_2d_correctness() {
    let index = build_index(4, 10, two_d_corner_objects());
    index.set_query_time_params(QueryTimeParams {
        ef: 10,
        ..Default::default()
    });
    let query = L2Space::object_from_vec(-1, &[0.0, 0.0]);
    let results = index.search_knn(&query, 3).unwrap();
    let ids: Vec<i64> = results.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(results[0].1, 0.0);
    assert_eq!(results[1].1, 1.0);
    assert_eq!(results[2].1, 1.0);
}

#[test]
fn search_before_build_returns_not_initialized() {
    let params = HnswParams::new(8).unwrap();
    let index = HnswIndex::new(L2Space::new(2), params);
    let query = L2Space::object_from_vec(0, &[0.0, 0.0]);
    assert!(matches!(index.search_knn(&query, 5), Err(Error::NotInitialized)));
}

#[test]
fn save_before_build_returns_not_initialized() {
    let params = HnswParams::new(8).unwrap();
    let index = HnswIndex::new(L2Space::new(2), params);
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        index.save_binary(&dir.path().join("index.bin")),
        Err(Error::NotInitialized)
    ));
    assert!(matches!(
        index.save_text(&dir.path().join("index.txt")),
        Err(Error::NotInitialized)
    ));
}

#[test]
fn built_index_with_no_objects_search_returns_empty() {
    let params = HnswParams::new(8).unwrap();
    let index = HnswIndex::new(L2Space::new(2), params);
    index.build(Vec::new()).unwrap();
    let query = L2Space::object_from_vec(0, &[0.0, 0.0]);
    assert!(index.search_knn(&query, 5).unwrap().is_empty());
}

#[test]
fn single_node_index_returns_that_node() {
    let obj = L2Space::object_from_vec(42, &[3.0, 4.0]);
    let index = build_index(8, 20, vec![obj]);
    let query = L2Space::object_from_vec(-1, &[0.0, 0.0]);
    let results = index.search_knn(&query, 5).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, 42);
    assert_eq!(results[0].1, 5.0);
}

#[test]
fn k_greater_than_node_count_returns_node_count_results() {
    let index = build_index(4, 10, two_d_corner_objects());
    let query = L2Space::object_from_vec(-1, &[0.0, 0.0]);
    let results = index.search_knn(&query, 100).unwrap();
    assert_eq!(results.len(), 5);
}

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<crate::object::Object> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n as i64)
        .map(|id| {
            let v: Vec<f32> = (0..dim).map(|_| rng.r#gen::<f32>()).collect();
            CosineSpace::object_from_vec(id, &v)
        })
        .collect()
}

/// Scenario 3 (reduced scale): bidirectionality after deletion with
/// `NeighborsOnly` patching.
#[test]
fn bidirectional_after_deletion_with_patching() {
    let objects = random_vectors(1000, 16, 7);
    let params = HnswParams::new(16).unwrap();
    let index = HnswIndex::new(CosineSpace::new(16), params);
    index.build(objects).unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let deleted_ids: Vec<i64> = (0..50).map(|_| rng.gen_range(0..1000)).collect();
    index.delete_batch(&deleted_ids, DeleteStrategy::NeighborsOnly, false).unwrap();

    assert_graph_invariants_hold(&index);
}

/// Checks the graph's per-edge invariants directly against the node
/// storage: no duplicate neighbors, no self-loops, and every edge
/// bidirectional.
fn assert_graph_invariants_hold<S: Space<f32>>(index: &HnswIndex<f32, S>) {
    let nodes = index.debug_nodes();
    for slot in nodes.iter().flatten() {
        if slot.is_deleted() {
            continue;
        }
        for l in 0..=slot.max_level() {
            let neighbors = slot.neighbors_at(l);
            let mut dedup = neighbors.clone();
            dedup.sort_unstable();
            dedup.dedup();
            assert_eq!(dedup.len(), neighbors.len(), "duplicate neighbor at layer {l}");
            assert!(!neighbors.contains(&slot.internal_id), "self-loop at layer {l}");
            for &nb in &neighbors {
                let nb_node = nodes[nb as usize].as_ref().unwrap();
                if nb_node.is_deleted() {
                    continue;
                }
                assert!(
                    nb_node.neighbors_at(l).contains(&slot.internal_id),
                    "edge ({}, {}) at layer {l} is not bidirectional",
                    slot.internal_id,
                    nb
                );
            }
        }
    }
}

/// Scenario 4 (reduced scale): save/load round-trip.
#[test]
fn save_load_round_trip_preserves_search_results() {
    let objects = random_vectors(2000, 8, 11);
    let params = HnswParams::new(16).unwrap();
    let index = HnswIndex::new(CosineSpace::new(8), params);
    index.build(objects).unwrap();
    index.set_query_time_params(QueryTimeParams {
        ef: 50,
        ..Default::default()
    });

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.bin");
    index.save_binary(&path).unwrap();

    let load_params = HnswParams::new(16).unwrap();
    let loaded = HnswIndex::load_binary(CosineSpace::new(8), load_params, &path).unwrap();
    loaded.set_query_time_params(QueryTimeParams {
        ef: 50,
        ..Default::default()
    });

    let queries = random_vectors(20, 8, 12345);
    for q in &queries {
        let before = index.search_knn(q, 10).unwrap();
        let after = loaded.search_knn(q, 10).unwrap();
        assert_eq!(before, after);
    }
}

fn brute_force_knn(objects: &[crate::object::Object], space: &CosineSpace, query: &crate::object::Object, k: usize) -> Vec<i64> {
    let mut scored: Vec<(f32, i64)> = objects
        .iter()
        .map(|o| (space.distance(query, o), o.id()))
        .collect();
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    scored.into_iter().take(k).map(|(_, id)| id).collect()
}

/// Scenario 5 (reduced scale): recall floor against brute force on a
/// synthetically generated corpus rather than the real SIFT dataset (no
/// network access during tests).
#[rstest]
#[case(16, 100, 0.85)]
fn recall_floor_on_synthetic_corpus(#[case] m: u32, #[case] ef_construction: u32, #[case] min_recall: f64) {
    let corpus = random_vectors(5000, 32, 2024);
    let space = CosineSpace::new(32);
    let params = HnswParams::new(m).unwrap().with_ef_construction(ef_construction).unwrap();
    let index = HnswIndex::new(CosineSpace::new(32), params);
    index.build(corpus.clone()).unwrap();
    index.set_query_time_params(QueryTimeParams {
        ef: 100,
        ..Default::default()
    });

    let queries = random_vectors(100, 32, 555);
    let k = 10;
    let mut hits = 0usize;
    let mut total = 0usize;
    for q in &queries {
        let approx: std::collections::HashSet<i64> =
            index.search_knn(q, k as u32).unwrap().into_iter().map(|(id, _)| id).collect();
        let exact: std::collections::HashSet<i64> = brute_force_knn(&corpus, &space, q, k).into_iter().collect();
        hits += approx.intersection(&exact).count();
        total += k;
    }
    let recall = hits as f64 / total as f64;
    assert!(recall >= min_recall, "recall {recall} below floor {min_recall}");
}

/// Scenario 6 (reduced scale): concurrent-build determinism under a fixed
/// seed with `indexThreadQty = 1` — two builds on the same input produce
/// byte-identical saved files.
#[test]
fn single_threaded_fixed_seed_build_is_deterministic() {
    let objects = random_vectors(300, 8, 3);
    let params = HnswParams::new(8).unwrap().with_seed(777);

    let index_a = HnswIndex::new(L2Space::new(8), params.clone());
    index_a.build(objects.clone()).unwrap();
    let index_b = HnswIndex::new(L2Space::new(8), params);
    index_b.build(objects).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path_a = dir.path().join("a.bin");
    let path_b = dir.path().join("b.bin");
    index_a.save_binary(&path_a).unwrap();
    index_b.save_binary(&path_b).unwrap();

    assert_eq!(std::fs::read(&path_a).unwrap(), std::fs::read(&path_b).unwrap());
}

/// A genuinely multi-threaded build (`indexThreadQty = 4`) must still leave
/// every edge bidirectional; covers the interleaving `link_bidirectional`
/// has to defend against when several threads link into the same
/// over-capacity neighbor concurrently.
#[test]
fn concurrent_build_preserves_bidirectionality() {
    let objects = random_vectors(2000, 16, 21);
    let params = HnswParams::new(12)
        .unwrap()
        .with_index_thread_qty(4)
        .unwrap();
    let index = HnswIndex::new(CosineSpace::new(16), params);
    index.build(objects).unwrap();

    assert_graph_invariants_hold(&index);
}

/// Scenario 4 variant: the text format round-trips both the graph shape
/// and the object payloads (including ids and labels, appended to the
/// literal per-node line; see DESIGN.md).
#[test]
fn text_save_load_round_trip_preserves_search_results() {
    let objects = random_vectors(500, 8, 13);
    let params = HnswParams::new(16).unwrap();
    let index = HnswIndex::new(CosineSpace::new(8), params);
    index.build(objects).unwrap();
    index.set_query_time_params(QueryTimeParams {
        ef: 50,
        ..Default::default()
    });

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.txt");
    index.save_text(&path).unwrap();

    let load_params = HnswParams::new(16).unwrap();
    let loaded = HnswIndex::load_text(CosineSpace::new(8), load_params, &path).unwrap();
    loaded.set_query_time_params(QueryTimeParams {
        ef: 50,
        ..Default::default()
    });

    let queries = random_vectors(20, 8, 54321);
    for q in &queries {
        let before = index.search_knn(q, 10).unwrap();
        let after = loaded.search_knn(q, 10).unwrap();
        assert_eq!(before, after);
    }
}

/// A label round-trips through the text format even when it's the empty
/// string, distinct from a node with no label at all.
#[test]
fn text_format_distinguishes_empty_label_from_no_label() {
    let labeled = crate::object::Object::new(0, Some(String::new()), vec![0u8; 8]);
    let unlabeled = crate::object::Object::new(1, None, vec![0u8; 8]);
    let params = HnswParams::new(4).unwrap();
    let index = HnswIndex::new(L2Space::new(2), params);
    index.build(vec![labeled, unlabeled]).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.txt");
    index.save_text(&path).unwrap();

    let load_params = HnswParams::new(4).unwrap();
    let loaded = HnswIndex::load_text(L2Space::new(2), load_params, &path).unwrap();
    let nodes = loaded.debug_nodes();
    let labels: std::collections::HashMap<i64, Option<String>> = nodes
        .iter()
        .flatten()
        .map(|n| (n.object.id(), n.object.label().map(str::to_owned)))
        .collect();
    assert_eq!(labels[&0], Some(String::new()));
    assert_eq!(labels[&1], None);
}
