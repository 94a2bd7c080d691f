//! Integration tests for standard and optimized NSG search.
//!
//! Tests cover:
//! - Recall against brute force
//! - Result invariants (sorted, unique, exactly k)
//! - Effect of the beam width
//! - Optimized search returning identical results
//! - Batch queries

use nsg_core::{BuildParams, KnnGraph, Metric, NsgError, NsgIndex, SearchResult, VectorStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const N: usize = 1000;
const DIMS: usize = 8;

fn random_rows(n: usize, dims: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * dims).map(|_| rng.random_range(-1.0..1.0)).collect()
}

fn built_index(metric: Metric) -> NsgIndex {
    let store = VectorStore::from_flat(random_rows(N, DIMS, 7), DIMS).unwrap();
    let knn = KnnGraph::exact(&store, 20, metric).unwrap();
    let mut index = NsgIndex::new(store, metric);
    index.build(&knn, &BuildParams::new(40, 24, 200)).unwrap();
    index
}

fn brute_force(index: &NsgIndex, query: &[f32], k: usize) -> Vec<u32> {
    let store = index.store();
    let mut scored: Vec<(f32, u32)> = (0..store.len() as u32)
        .map(|id| (index.metric().distance(query, store.vector(id)), id))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, id)| id).collect()
}

fn ids(results: &[SearchResult]) -> Vec<u32> {
    results.iter().map(|r| r.id).collect()
}

#[test]
fn test_recall_against_brute_force() {
    let index = built_index(Metric::L2);
    let queries = random_rows(50, DIMS, 99);
    let k = 10;

    let mut hits = 0;
    for query in queries.chunks(DIMS) {
        let truth = brute_force(&index, query, k);
        let found = ids(&index.search(query, k, 60).unwrap());
        hits += found.iter().filter(|id| truth.contains(id)).count();
    }

    let recall = hits as f64 / (50 * k) as f64;
    assert!(recall >= 0.9, "recall@10 = {recall}");
}

#[test]
fn test_results_sorted_unique_and_k_long() {
    let index = built_index(Metric::L2);
    let queries = random_rows(20, DIMS, 100);

    for query in queries.chunks(DIMS) {
        let results = index.search(query, 15, 30).unwrap();
        assert_eq!(results.len(), 15);

        for pair in results.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }

        let mut unique = ids(&results);
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 15);
    }
}

#[test]
fn test_self_query_finds_point() {
    let index = built_index(Metric::L2);

    for id in (0..N as u32).step_by(37) {
        let query = index.store().vector(id).to_vec();
        let results = index.search(&query, 1, 100).unwrap();
        assert_eq!(results[0].id, id);
        assert_eq!(results[0].distance, 0.0);
    }
}

#[test]
fn test_wider_beam_is_never_worse() {
    let index = built_index(Metric::L2);
    let queries = random_rows(30, DIMS, 101);
    let k = 10;

    let mut narrow_total = 0.0_f64;
    let mut wide_total = 0.0_f64;
    for query in queries.chunks(DIMS) {
        let narrow = index.search(query, k, k).unwrap();
        let wide = index.search(query, k, 80).unwrap();
        // Beam as wide as the dataset visits every reachable point
        let exhaustive = index.search(query, k, N).unwrap();

        assert_eq!(ids(&exhaustive), brute_force(&index, query, k));
        assert!(wide[k - 1].distance >= exhaustive[k - 1].distance);
        assert!(narrow[k - 1].distance >= exhaustive[k - 1].distance);

        narrow_total += f64::from(narrow[k - 1].distance);
        wide_total += f64::from(wide[k - 1].distance);
    }

    assert!(wide_total <= narrow_total);
}

#[test]
fn test_search_opt_matches_search() {
    for metric in [Metric::L2, Metric::InnerProduct, Metric::FastL2] {
        let mut index = built_index(metric);
        index.optimize_graph().unwrap();

        let queries = random_rows(40, DIMS, 102);
        for query in queries.chunks(DIMS) {
            for (k, search_l) in [(1, 1), (5, 20), (10, 50)] {
                let standard = index.search(query, k, search_l).unwrap();
                let optimized = index.search_opt(query, k, search_l).unwrap();
                assert_eq!(optimized, standard, "{metric:?} k={k} L={search_l}");
            }
        }
    }
}

#[test]
fn test_batch_search_matches_single() {
    let mut index = built_index(Metric::L2);
    index.optimize_graph().unwrap();
    let queries = random_rows(25, DIMS, 103);

    let batch = index.search_batch(&queries, 5, 20).unwrap();
    let batch_opt = index.search_opt_batch(&queries, 5, 20).unwrap();
    assert_eq!(batch.len(), 25);
    assert_eq!(batch, batch_opt);

    for (query, results) in queries.chunks(DIMS).zip(&batch) {
        assert_eq!(results, &index.search(query, 5, 20).unwrap());
    }
}

#[test]
fn test_argument_errors() {
    let mut index = built_index(Metric::L2);
    let query = vec![0.0; DIMS];

    assert!(matches!(index.search(&query, 0, 10), Err(NsgError::InvalidParameter(_))));
    assert!(matches!(index.search(&query, 10, 5), Err(NsgError::InvalidParameter(_))));
    assert!(matches!(index.search(&query[..3], 1, 5), Err(NsgError::InvalidParameter(_))));
    assert!(matches!(index.search_opt(&query, 1, 5), Err(NsgError::NotOptimized)));

    index.optimize_graph().unwrap();
    assert!(matches!(index.search_opt(&query, 0, 5), Err(NsgError::InvalidParameter(_))));
    assert!(matches!(index.search_opt_batch(&query[..3], 1, 5), Err(NsgError::InvalidParameter(_))));
}
