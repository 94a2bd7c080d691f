//! Greedy beam search over an adjacency list.
//!
//! # Algorithm
//!
//! The pool holds the `search_l` best candidates seen so far, sorted by
//! `(distance, id)`, seeded with the entry point. The cursor always sits on
//! the nearest unexpanded candidate:
//!
//! 1. expand the candidate at the cursor (score every unseen neighbor and
//!    try to insert it into the pool)
//! 2. if something landed at or before the cursor, jump back to it;
//!    otherwise advance by one
//! 3. stop when the cursor runs off the end of the pool
//!
//! The same driver (`traverse`) runs construction-time searches over the
//! initial k-NN graph, standard searches over the NSG adjacency, and the
//! optimized searches over the contiguous layout. Only the `Expand`
//! implementation differs, which is what keeps the two search modes
//! result-identical.

use crate::distance::{Metric, QueryScorer};
use crate::error::{Result, invalid};
use crate::graph::pool::{Candidate, CandidatePool, VisitedSet};
use crate::graph::{NsgGraph, PointId};
use crate::store::VectorStore;

/// Search result with distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    /// Point id.
    pub id: PointId,
    /// Distance to the query under the index metric.
    pub distance: f32,
}

impl From<Candidate> for SearchResult {
    fn from(c: Candidate) -> Self {
        Self { id: c.id, distance: c.distance }
    }
}

/// Source of neighbor scores for the traversal driver.
pub(crate) trait Expand {
    /// Scores the neighbors of `p` that are not yet in `visited`, marking
    /// each one visited and passing `(id, distance)` to `emit`.
    fn expand<F: FnMut(PointId, f32)>(&self, p: PointId, visited: &mut VisitedSet, emit: F);
}

/// Expands over a plain adjacency list with vectors read from the store.
pub(crate) struct AdjacencyExpander<'a> {
    adjacency: &'a [Vec<PointId>],
    store: &'a VectorStore,
    scorer: QueryScorer<'a>,
}

impl<'a> AdjacencyExpander<'a> {
    pub(crate) fn new(adjacency: &'a [Vec<PointId>], store: &'a VectorStore, scorer: QueryScorer<'a>) -> Self {
        Self { adjacency, store, scorer }
    }

    /// Scores a single stored point.
    #[inline]
    pub(crate) fn score(&self, id: PointId) -> f32 {
        self.scorer.score(self.store.vector(id), self.store.norm(id))
    }
}

impl Expand for AdjacencyExpander<'_> {
    #[inline]
    fn expand<F: FnMut(PointId, f32)>(&self, p: PointId, visited: &mut VisitedSet, mut emit: F) {
        for &q in &self.adjacency[p as usize] {
            if visited.insert(q) {
                emit(q, self.score(q));
            }
        }
    }
}

/// Runs the beam search driver from `entry` with a pool of `width` entries.
///
/// When `evaluated` is given, every scored point (the entry included) is
/// appended to it in scoring order; construction uses this as the raw
/// candidate set for pruning.
pub(crate) fn traverse<E: Expand>(
    expander: &E,
    entry: Candidate,
    width: usize,
    visited: &mut VisitedSet,
    mut evaluated: Option<&mut Vec<Candidate>>,
) -> CandidatePool {
    let mut pool = CandidatePool::new(width, visited.span());

    visited.insert(entry.id);
    if let Some(log) = evaluated.as_deref_mut() {
        log.push(entry);
    }
    pool.insert(entry);

    let mut cursor = 0;
    while let Some(current) = pool.get(cursor).copied() {
        if current.expanded {
            cursor += 1;
            continue;
        }
        pool.expand_at(cursor);

        let mut lowest = usize::MAX;
        expander.expand(current.id, visited, |id, distance| {
            let candidate = Candidate::new(id, distance);
            if let Some(log) = evaluated.as_deref_mut() {
                log.push(candidate);
            }
            if let Some(pos) = pool.insert(candidate) {
                lowest = lowest.min(pos);
            }
        });

        cursor = if lowest <= cursor { lowest } else { cursor + 1 };
    }

    pool
}

/// Checks `k` and `search_l` for a query.
pub(crate) fn validate_search_args(k: usize, search_l: usize) -> Result<()> {
    if k == 0 {
        return Err(invalid("k must be > 0"));
    }
    if search_l < k {
        return Err(invalid(format!("search_L = {search_l} must be >= k = {k}")));
    }
    Ok(())
}

/// Truncates a finished pool to the top `k` results.
pub(crate) fn top_k(pool: CandidatePool, k: usize) -> Vec<SearchResult> {
    pool.into_vec().into_iter().take(k).map(SearchResult::from).collect()
}

/// Standard search using a caller-provided visited set.
///
/// Arguments are assumed validated.
pub(crate) fn search_with(
    graph: &NsgGraph,
    store: &VectorStore,
    metric: Metric,
    query: &[f32],
    k: usize,
    search_l: usize,
    visited: &mut VisitedSet,
) -> Vec<SearchResult> {
    visited.clear();

    let expander = AdjacencyExpander::new(graph.adjacency(), store, QueryScorer::new(metric, query));
    let entry = graph.navigating_node();
    let start = Candidate::new(entry, expander.score(entry));

    top_k(traverse(&expander, start, search_l, visited, None), k)
}

/// Searches `graph` for the `k` nearest points to `query`.
///
/// Results are sorted by `(distance, id)`; fewer than `k` are returned only
/// when the graph has fewer than `k` reachable points.
///
/// # Errors
///
/// Returns `InvalidParameter` if `k == 0`, `search_l < k`, the query has the
/// wrong dimension, or the graph and store disagree on the point count.
pub fn beam_search(
    graph: &NsgGraph,
    store: &VectorStore,
    metric: Metric,
    query: &[f32],
    k: usize,
    search_l: usize,
) -> Result<Vec<SearchResult>> {
    validate_search_args(k, search_l)?;
    store.check_query(query)?;
    if graph.len() != store.len() {
        return Err(invalid(format!(
            "graph has {} points but vector store has {}",
            graph.len(),
            store.len()
        )));
    }

    let mut visited = VisitedSet::new(store.len());
    Ok(search_with(graph, store, metric, query, k, search_l, &mut visited))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_store(n: usize) -> VectorStore {
        let rows: Vec<Vec<f32>> = (0..n).map(|i| vec![i as f32, 0.0]).collect();
        VectorStore::from_rows(&rows).unwrap()
    }

    /// Path graph 0 <-> 1 <-> ... <-> n-1.
    fn path_graph(n: usize, entry: PointId) -> NsgGraph {
        let adjacency = (0..n)
            .map(|i| {
                let mut list = Vec::new();
                if i > 0 {
                    list.push(i as PointId - 1);
                }
                if i + 1 < n {
                    list.push(i as PointId + 1);
                }
                list
            })
            .collect();
        NsgGraph::from_adjacency(adjacency, entry).unwrap()
    }

    #[test]
    fn test_search_walks_path_to_target() {
        let store = line_store(20);
        let graph = path_graph(20, 0);

        let results = beam_search(&graph, &store, Metric::L2, &[17.2, 0.0], 3, 4).unwrap();
        let ids: Vec<PointId> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![17, 18, 16]);
    }

    #[test]
    fn test_results_sorted_and_unique() {
        let store = line_store(30);
        let graph = path_graph(30, 15);

        let results = beam_search(&graph, &store, Metric::L2, &[3.3, 0.0], 10, 12).unwrap();
        assert_eq!(results.len(), 10);
        for pair in results.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
        let mut ids: Vec<PointId> = results.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn test_fewer_points_than_k() {
        let store = line_store(3);
        let graph = path_graph(3, 1);

        let results = beam_search(&graph, &store, Metric::L2, &[0.0, 0.0], 5, 5).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, 0);
    }

    #[test]
    fn test_argument_validation() {
        let store = line_store(5);
        let graph = path_graph(5, 0);

        assert!(beam_search(&graph, &store, Metric::L2, &[0.0, 0.0], 0, 5).is_err());
        assert!(beam_search(&graph, &store, Metric::L2, &[0.0, 0.0], 4, 3).is_err());
        assert!(beam_search(&graph, &store, Metric::L2, &[0.0], 1, 3).is_err());
        assert!(beam_search(&path_graph(4, 0), &store, Metric::L2, &[0.0, 0.0], 1, 3).is_err());
    }

    #[test]
    fn test_traverse_records_evaluated_points() {
        let store = line_store(6);
        let graph = path_graph(6, 0);
        let query = [5.0, 0.0];
        let expander = AdjacencyExpander::new(graph.adjacency(), &store, QueryScorer::new(Metric::L2, &query));

        let mut visited = VisitedSet::new(6);
        let mut evaluated = Vec::new();
        let pool = traverse(&expander, Candidate::new(0, expander.score(0)), 2, &mut visited, Some(&mut evaluated));

        let mut ids: Vec<PointId> = evaluated.iter().map(|c| c.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(pool.get(0).map(|c| c.id), Some(5));
    }
}
