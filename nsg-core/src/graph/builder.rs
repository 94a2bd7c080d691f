//! NSG construction from an initial k-NN graph.
//!
//! Three phases:
//!
//! 1. pick the navigating node, the point closest to the dataset centroid
//! 2. for every point in parallel, gather candidates with a beam search over
//!    the k-NN graph and prune them down to at most `R` spread-out neighbors
//! 3. sequentially attach any point not reachable from the navigating node

use crate::distance::{Metric, QueryScorer};
use crate::error::{Result, invalid};
use crate::graph::pool::{Candidate, VisitedSet};
use crate::graph::search::{AdjacencyExpander, traverse};
use crate::graph::{BuildParams, NsgGraph, PointId};
use crate::knng::KnnGraph;
use crate::store::VectorStore;
use rayon::prelude::*;
use std::collections::VecDeque;

/// Builds an [`NsgGraph`] from a vector store and its k-NN graph.
#[derive(Debug, Clone, Copy)]
pub struct GraphBuilder {
    params: BuildParams,
    metric: Metric,
}

impl GraphBuilder {
    /// Creates a builder.
    #[must_use]
    pub const fn new(params: BuildParams, metric: Metric) -> Self {
        Self { params, metric }
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the store is empty, the k-NN graph has
    /// a different number of points, or the parameters fail
    /// [`BuildParams::validate`]. Nothing is built in that case.
    pub fn build(&self, store: &VectorStore, knn: &KnnGraph) -> Result<NsgGraph> {
        let n = store.len();
        if n == 0 {
            return Err(invalid("vector store is empty"));
        }
        if knn.len() != n {
            return Err(invalid(format!(
                "k-NN graph has {} points but vector store has {}",
                knn.len(),
                n
            )));
        }
        self.params.validate(n)?;

        let BuildParams { l, r, c } = self.params;
        tracing::info!(
            points = n,
            dims = store.dimensions(),
            l,
            r,
            c,
            metric = ?self.metric,
            "building NSG"
        );

        let (initial, dropped) = knn.sanitized();
        if dropped > 0 {
            tracing::warn!(dropped, "ignored out-of-range, self or duplicate ids in k-NN graph");
        }

        let navigating_node = self.find_navigating_node(store, &initial);
        tracing::info!(navigating_node, "selected navigating node");

        let mut neighbors = self.link_points(store, &initial, navigating_node);
        tracing::debug!("pruned neighbor lists for all points");

        let repair_edges = self.repair_connectivity(store, &mut neighbors, navigating_node);

        let graph = NsgGraph::from_parts(neighbors, navigating_node, repair_edges);
        let stats = graph.stats();
        tracing::info!(
            max_degree = stats.max_degree,
            min_degree = stats.min_degree,
            avg_degree = stats.avg_degree,
            repair_edges,
            "NSG built"
        );

        Ok(graph)
    }

    /// Point nearest the centroid, found by a width-`L` search over the
    /// initial graph from point 0.
    fn find_navigating_node(&self, store: &VectorStore, initial: &[Vec<PointId>]) -> PointId {
        let centroid = store.centroid();
        let expander = AdjacencyExpander::new(initial, store, QueryScorer::new(self.metric, &centroid));
        let mut visited = VisitedSet::new(store.len());

        let start = Candidate::new(0, expander.score(0));
        let pool = traverse(&expander, start, self.params.l, &mut visited, None);
        pool.get(0).map_or(0, |best| best.id)
    }

    /// Pruned out-edges of every point, before connectivity repair.
    fn link_points(&self, store: &VectorStore, initial: &[Vec<PointId>], navigating_node: PointId) -> Vec<Vec<PointId>> {
        let n = store.len();
        (0..n as PointId)
            .into_par_iter()
            .map_init(
                || (VisitedSet::new(n), Vec::new()),
                |(visited, pool), p| {
                    self.gather_candidates(store, initial, navigating_node, p, visited, pool);
                    prune_candidates(store, self.metric, pool, self.params.r)
                },
            )
            .collect()
    }

    /// Fills `pool` with the pruning candidates of `p`: every point scored by
    /// a width-`L` search from the navigating node plus the k-NN neighbors of
    /// `p`, without `p`, sorted and capped at `C`.
    fn gather_candidates(
        &self,
        store: &VectorStore,
        initial: &[Vec<PointId>],
        navigating_node: PointId,
        p: PointId,
        visited: &mut VisitedSet,
        pool: &mut Vec<Candidate>,
    ) {
        visited.clear();
        pool.clear();

        let expander = AdjacencyExpander::new(initial, store, QueryScorer::new(self.metric, store.vector(p)));
        let start = Candidate::new(navigating_node, expander.score(navigating_node));
        traverse(&expander, start, self.params.l, visited, Some(&mut *pool));

        // The visited set already covers every evaluated point, so this adds
        // only k-NN neighbors the search never scored.
        for &q in &initial[p as usize] {
            if visited.insert(q) {
                pool.push(Candidate::new(q, expander.score(q)));
            }
        }

        pool.retain(|cand| cand.id != p);
        pool.sort_unstable();
        pool.truncate(self.params.c);
    }

    /// Makes every point reachable from the navigating node.
    ///
    /// Traverses out-edges from the navigating node, recording a spanning
    /// tree. Each unreached point (smallest id first) gets one incoming edge
    /// from a reached point, after which traversal resumes from it. Returns
    /// the number of edges added.
    fn repair_connectivity(&self, store: &VectorStore, graph: &mut [Vec<PointId>], navigating_node: PointId) -> usize {
        let n = graph.len();
        let mut parent: Vec<Option<PointId>> = vec![None; n];
        let mut reached = vec![false; n];
        let mut visited = VisitedSet::new(n);

        reached[navigating_node as usize] = true;
        let mut count = 1 + spread(graph, navigating_node, &mut reached, &mut parent);

        let mut repairs = 0;
        let mut next = 0;
        while count < n {
            while reached[next] {
                next += 1;
            }
            let u = next as PointId;

            let Some(source) = self.attach(store, graph, &reached, &parent, navigating_node, u, &mut visited) else {
                // Unreachable: a reached set without a spare slot or a
                // non-tree edge would need fewer edges than its tree has.
                tracing::warn!(point = u, "no attachment point found");
                break;
            };

            reached[next] = true;
            parent[next] = Some(source);
            count += 1 + spread(graph, u, &mut reached, &mut parent);
            repairs += 1;
            tracing::debug!(point = u, from = source, reached = count, "attached unreachable point");
        }

        if repairs > 0 {
            tracing::info!(repair_edges = repairs, "connectivity repair finished");
        }
        repairs
    }

    /// Adds an edge into `u` from the best reached point and returns that
    /// point.
    ///
    /// Reached points are ranked by a width-`L` search over the current graph,
    /// followed by every other reached point in distance order. The first one
    /// under the degree bound gets a new edge; failing that, the first one
    /// owning a non-tree edge has its farthest such edge redirected to `u`.
    ///
    /// The search results usually include a point with a free slot, so the
    /// remaining reached points are only scanned when they do not, and only
    /// sorted when every reached point is full.
    #[allow(clippy::too_many_arguments)]
    fn attach(
        &self,
        store: &VectorStore,
        graph: &mut [Vec<PointId>],
        reached: &[bool],
        parent: &[Option<PointId>],
        navigating_node: PointId,
        u: PointId,
        visited: &mut VisitedSet,
    ) -> Option<PointId> {
        let r = self.params.r;
        let scorer = QueryScorer::new(self.metric, store.vector(u));
        let score = |a: PointId| scorer.score(store.vector(a), store.norm(a));

        visited.clear();
        let searched: Vec<PointId> = {
            let expander = AdjacencyExpander::new(graph, store, scorer);
            let start = Candidate::new(navigating_node, expander.score(navigating_node));
            traverse(&expander, start, self.params.l, visited, None).into_vec().iter().map(|cand| cand.id).collect()
        };

        if let Some(&a) = searched.iter().find(|&&a| graph[a as usize].len() < r) {
            graph[a as usize].push(u);
            return Some(a);
        }

        visited.clear();
        for &a in &searched {
            visited.insert(a);
        }
        let outside = |a: &PointId| reached[*a as usize] && !visited.contains(*a);

        let closest_free = (0..graph.len() as PointId)
            .filter(|a| outside(a) && graph[*a as usize].len() < r)
            .map(|a| Candidate::new(a, score(a)))
            .min();
        if let Some(cand) = closest_free {
            graph[cand.id as usize].push(u);
            return Some(cand.id);
        }

        let mut rest: Vec<Candidate> =
            (0..graph.len() as PointId).filter(outside).map(|a| Candidate::new(a, score(a))).collect();
        rest.sort_unstable();

        let is_tree_edge = |a: PointId, x: PointId| parent[x as usize] == Some(a);
        for a in searched.iter().copied().chain(rest.iter().map(|cand| cand.id)) {
            let from = store.vector(a);
            let from_norm = store.norm(a);
            let farthest = graph[a as usize]
                .iter()
                .enumerate()
                .filter(|&(_, &x)| !is_tree_edge(a, x))
                .map(|(slot, &x)| {
                    (slot, self.metric.distance_with_norms(from, from_norm, store.vector(x), store.norm(x)))
                })
                .max_by(|x, y| x.1.total_cmp(&y.1).then(x.0.cmp(&y.0)));

            if let Some((slot, _)) = farthest {
                let list = &mut graph[a as usize];
                list.remove(slot);
                list.push(u);
                return Some(a);
            }
        }

        None
    }
}

/// Breadth-first traversal from `start` over out-edges, marking newly
/// reached points and recording their tree parent. Returns how many points
/// were newly reached.
fn spread(graph: &[Vec<PointId>], start: PointId, reached: &mut [bool], parent: &mut [Option<PointId>]) -> usize {
    let mut queue = VecDeque::from([start]);
    let mut added = 0;

    while let Some(p) = queue.pop_front() {
        for &q in &graph[p as usize] {
            if !reached[q as usize] {
                reached[q as usize] = true;
                parent[q as usize] = Some(p);
                added += 1;
                queue.push_back(q);
            }
        }
    }

    added
}

/// Applies the NSG pruning rule to `candidates`, which must be sorted by
/// `(distance, id)` with distances measured from the point being linked.
///
/// Walking the list in order, `q` is accepted unless some already accepted
/// `r` satisfies `dist(r, q) < dist(p, q)`. At most `max_degree` ids are
/// returned, closest first.
#[must_use]
pub fn prune_candidates(
    store: &VectorStore,
    metric: Metric,
    candidates: &[Candidate],
    max_degree: usize,
) -> Vec<PointId> {
    let mut accepted: Vec<PointId> = Vec::with_capacity(max_degree);

    for cand in candidates {
        if accepted.len() >= max_degree {
            break;
        }
        if accepted.contains(&cand.id) {
            continue;
        }

        let q = store.vector(cand.id);
        let q_norm = store.norm(cand.id);
        let occluded = accepted
            .iter()
            .any(|&r| metric.distance_with_norms(store.vector(r), store.norm(r), q, q_norm) < cand.distance);

        if !occluded {
            accepted.push(cand.id);
        }
    }

    accepted
}
