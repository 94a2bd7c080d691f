//! The NSG graph: adjacency, construction, search and persistence.
//!
//! # Layout
//!
//! Adjacency is index-based: `neighbors[p]` holds the out-edges of point `p`
//! as point ids, closest first. There are no node objects and no references
//! between nodes, so the graph is a plain `Vec<Vec<PointId>>` that can be
//! shared read-only across search threads.
//!
//! # Invariants
//!
//! - `neighbors[p].len() <= max_degree` for every point
//! - no self-loops, no duplicate edges
//! - every point is reachable from `navigating_node` along out-edges

mod builder;
mod layout;
pub(crate) mod persist;
mod pool;
pub(crate) mod search;

pub use builder::{GraphBuilder, prune_candidates};
pub use layout::{OptimizedLayout, block_offset};
pub use pool::{Candidate, CandidatePool, VisitedSet};
pub use search::{SearchResult, beam_search};

use crate::error::{Result, invalid};
use std::collections::VecDeque;

/// Point identifier (row index into the vector store).
pub type PointId = u32;

/// Construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildParams {
    /// Beam width of the searches used to gather construction candidates.
    pub l: usize,

    /// Maximum out-degree of the final graph.
    pub r: usize,

    /// Cap on the per-point candidate pool before pruning.
    pub c: usize,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self { l: 40, r: 50, c: 500 }
    }
}

impl BuildParams {
    /// Creates parameters from explicit `L`, `R`, `C`.
    #[must_use]
    pub const fn new(l: usize, r: usize, c: usize) -> Self {
        Self { l, r, c }
    }

    /// Checks the parameters against a dataset of `n` points.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `L == 0`, `R == 0`, `R > n - 1` or
    /// `C < R`.
    pub fn validate(&self, n: usize) -> Result<()> {
        if self.l == 0 {
            return Err(invalid("L must be >= 1"));
        }
        if self.r == 0 {
            return Err(invalid("R must be >= 1"));
        }
        if self.r > n.saturating_sub(1) {
            return Err(invalid(format!("R = {} exceeds number of points minus one ({})", self.r, n.saturating_sub(1))));
        }
        if self.c < self.r {
            return Err(invalid(format!("C = {} must be >= R = {}", self.c, self.r)));
        }
        if self.l < self.r {
            tracing::debug!(l = self.l, r = self.r, "L below R; candidate pools will be narrow");
        }
        Ok(())
    }
}

/// Degree statistics of a built graph.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GraphStats {
    /// Largest out-degree.
    pub max_degree: usize,
    /// Smallest out-degree.
    pub min_degree: usize,
    /// Mean out-degree.
    pub avg_degree: f64,
    /// Edges added by connectivity repair.
    pub repair_edges: usize,
}

/// Pruned, connected navigating graph.
#[derive(Debug, Clone, PartialEq)]
pub struct NsgGraph {
    neighbors: Vec<Vec<PointId>>,
    navigating_node: PointId,
    max_degree: usize,
    repair_edges: usize,
}

impl NsgGraph {
    /// Wraps an adjacency list.
    ///
    /// `max_degree` is the largest list length; repair statistics are zero.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the graph is empty, the navigating node
    /// is out of range, or any edge points outside `0..neighbors.len()`.
    pub fn from_adjacency(neighbors: Vec<Vec<PointId>>, navigating_node: PointId) -> Result<Self> {
        let n = neighbors.len();
        if n == 0 {
            return Err(invalid("graph has no points"));
        }
        if navigating_node as usize >= n {
            return Err(invalid(format!("navigating node {navigating_node} out of range for {n} points")));
        }
        if let Some((p, &q)) = neighbors
            .iter()
            .enumerate()
            .find_map(|(p, list)| list.iter().find(|&&q| q as usize >= n).map(|q| (p, q)))
        {
            return Err(invalid(format!("edge {p} -> {q} out of range for {n} points")));
        }

        let max_degree = neighbors.iter().map(Vec::len).max().unwrap_or(0);
        Ok(Self { neighbors, navigating_node, max_degree, repair_edges: 0 })
    }

    pub(crate) fn from_parts(neighbors: Vec<Vec<PointId>>, navigating_node: PointId, repair_edges: usize) -> Self {
        let max_degree = neighbors.iter().map(Vec::len).max().unwrap_or(0);
        Self { neighbors, navigating_node, max_degree, repair_edges }
    }

    /// Number of points.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Whether the graph is empty (never true for a built graph).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Fixed entry point of every search.
    #[inline]
    #[must_use]
    pub fn navigating_node(&self) -> PointId {
        self.navigating_node
    }

    /// Out-edges of `p`, closest first.
    #[inline]
    #[must_use]
    pub fn neighbors(&self, p: PointId) -> &[PointId] {
        &self.neighbors[p as usize]
    }

    /// The full adjacency list.
    #[must_use]
    pub fn adjacency(&self) -> &[Vec<PointId>] {
        &self.neighbors
    }

    /// Largest out-degree in the graph.
    #[inline]
    #[must_use]
    pub fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// Degree statistics.
    #[must_use]
    pub fn stats(&self) -> GraphStats {
        let degrees = self.neighbors.iter().map(Vec::len);
        let total: usize = degrees.clone().sum();
        GraphStats {
            max_degree: self.max_degree,
            min_degree: degrees.min().unwrap_or(0),
            avg_degree: total as f64 / self.len().max(1) as f64,
            repair_edges: self.repair_edges,
        }
    }

    /// Number of points reachable from the navigating node along out-edges.
    #[must_use]
    pub fn reachable_directed(&self) -> usize {
        self.count_reachable(false)
    }

    /// Number of points reachable from the navigating node when every edge
    /// is treated as undirected.
    #[must_use]
    pub fn reachable_undirected(&self) -> usize {
        self.count_reachable(true)
    }

    fn count_reachable(&self, undirected: bool) -> usize {
        let n = self.len();
        let reverse = undirected.then(|| {
            let mut rev = vec![Vec::new(); n];
            for (p, list) in self.neighbors.iter().enumerate() {
                for &q in list {
                    rev[q as usize].push(p as PointId);
                }
            }
            rev
        });

        let mut seen = vec![false; n];
        let mut queue = VecDeque::from([self.navigating_node]);
        seen[self.navigating_node as usize] = true;
        let mut count = 1;

        while let Some(p) = queue.pop_front() {
            let back = reverse.as_ref().map_or(&[][..], |rev| rev[p as usize].as_slice());
            for &q in self.neighbors(p).iter().chain(back) {
                if !seen[q as usize] {
                    seen[q as usize] = true;
                    count += 1;
                    queue.push_back(q);
                }
            }
        }

        count
    }
}
