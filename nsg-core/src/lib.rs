//! NSG - Navigating Spreading-out Graph for approximate nearest-neighbor search
//!
//! NSG turns an approximate k-NN graph over dense `f32` vectors into a sparse,
//! connected graph that a greedy beam search can navigate from one fixed
//! entry point, the navigating node.
//!
//! # Features
//!
//! - Parallel construction with centroid-anchored pruning (`rayon`)
//! - Connectivity repair that keeps every point reachable within the degree bound
//! - Standard search over the adjacency list
//! - Optimized search over a contiguous, prefetch-friendly block layout that
//!   returns exactly the same results
//! - L2, inner product, and norm-cached L2 metrics with SIMD kernels
//! - A compact little-endian index file written under a file lock
//!
//! # Example
//!
//! ```
//! use nsg_core::{BuildParams, KnnGraph, Metric, NsgIndex, VectorStore};
//!
//! # fn main() -> nsg_core::Result<()> {
//! let rows: Vec<Vec<f32>> = (0..64).map(|i| vec![(i % 8) as f32, (i / 8) as f32]).collect();
//! let store = VectorStore::from_rows(&rows)?;
//!
//! // The initial graph usually comes from an external builder via
//! // `KnnGraph::load`; brute force is fine for a small set.
//! let knn = KnnGraph::exact(&store, 8, Metric::L2)?;
//!
//! let mut index = NsgIndex::new(store, Metric::L2);
//! index.build(&knn, &BuildParams::new(16, 8, 64))?;
//!
//! let results = index.search(&[3.0, 4.0], 5, 16)?;
//! assert_eq!(results[0].id, 35);
//!
//! index.optimize_graph()?;
//! assert_eq!(index.search_opt(&[3.0, 4.0], 5, 16)?, results);
//! # Ok(())
//! # }
//! ```
//!
//! # Lifecycle
//!
//! The vector store is fixed at construction. A graph is produced by
//! [`NsgIndex::build`] or [`NsgIndex::load`]; every such update bumps an
//! internal generation so that an optimized layout built earlier is reported
//! as stale instead of silently serving the old graph.

pub mod distance;
pub mod error;
#[cfg(feature = "internals")]
pub mod graph;
#[cfg(not(feature = "internals"))]
pub(crate) mod graph;
pub mod knng;
pub mod store;

pub use distance::{Metric, inner_product, l2_squared, squared_norm};
pub use error::{NsgError, Result};
pub use graph::{BuildParams, GraphBuilder, GraphStats, NsgGraph, OptimizedLayout, PointId, SearchResult};
pub use knng::KnnGraph;
pub use store::VectorStore;

use crate::error::invalid;
use crate::graph::VisitedSet;
use crate::graph::persist::{load_graph, save_graph};
use crate::graph::search::{search_with, validate_search_args};
use rayon::prelude::*;
use std::path::Path;

/// Owns a vector store plus the graph built over it.
///
/// Searches take `&self` and may run concurrently; building, loading and
/// optimizing take `&mut self`.
#[derive(Debug)]
pub struct NsgIndex {
    store: VectorStore,
    metric: Metric,
    graph: Option<NsgGraph>,
    layout: Option<OptimizedLayout>,

    /// Bumped whenever `graph` is replaced.
    generation: u64,
}

impl NsgIndex {
    /// Wraps a vector store. The index has no graph until
    /// [`build`](Self::build) or [`load`](Self::load) succeeds.
    #[must_use]
    pub fn new(store: VectorStore, metric: Metric) -> Self {
        Self { store, metric, graph: None, layout: None, generation: 0 }
    }

    /// Builds the graph from an initial k-NN graph.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the parameters are out of range or the
    /// k-NN graph does not cover the store. The index is unchanged on error.
    pub fn build(&mut self, knn: &KnnGraph, params: &BuildParams) -> Result<()> {
        let graph = GraphBuilder::new(*params, self.metric).build(&self.store, knn)?;
        self.install(graph);
        Ok(())
    }

    /// Loads a k-NN graph file and builds from it.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`KnnGraph::load`] and [`NsgIndex::build`].
    pub fn build_from_file<P: AsRef<Path>>(&mut self, knn_path: P, params: &BuildParams) -> Result<()> {
        let knn = KnnGraph::load(knn_path)?;
        self.build(&knn, params)
    }

    /// Searches for the `k` nearest points to `query` with a beam of width
    /// `search_l`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the index has no graph, `k == 0`,
    /// `search_l < k`, or the query has the wrong dimension.
    pub fn search(&self, query: &[f32], k: usize, search_l: usize) -> Result<Vec<SearchResult>> {
        let graph = self.require_graph()?;
        validate_search_args(k, search_l)?;
        self.store.check_query(query)?;

        let mut visited = VisitedSet::new(self.store.len());
        Ok(search_with(graph, &self.store, self.metric, query, k, search_l, &mut visited))
    }

    /// Runs [`search`](Self::search) for every query in a flat row-major
    /// buffer, in parallel. Results are in query order.
    ///
    /// # Errors
    ///
    /// Same as [`search`](Self::search); additionally `InvalidParameter` if
    /// the buffer length is not a multiple of the dimension.
    pub fn search_batch(&self, queries: &[f32], k: usize, search_l: usize) -> Result<Vec<Vec<SearchResult>>> {
        let graph = self.require_graph()?;
        validate_search_args(k, search_l)?;
        self.check_batch(queries)?;

        let n = self.store.len();
        Ok(queries
            .par_chunks(self.store.dimensions())
            .map_init(
                || VisitedSet::new(n),
                |visited, query| search_with(graph, &self.store, self.metric, query, k, search_l, visited),
            )
            .collect())
    }

    /// Builds the optimized layout from the current graph.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the index has no graph.
    pub fn optimize_graph(&mut self) -> Result<()> {
        let graph = self.require_graph()?;
        let layout = OptimizedLayout::build(graph, &self.store, self.generation)?;
        self.layout = Some(layout);
        Ok(())
    }

    /// Search over the optimized layout. Results equal those of
    /// [`search`](Self::search).
    ///
    /// # Errors
    ///
    /// - `NotOptimized` if [`optimize_graph`](Self::optimize_graph) never ran
    /// - `StaleLayout` if the graph changed after the layout was built
    /// - `InvalidParameter` for the same argument errors as `search`
    pub fn search_opt(&self, query: &[f32], k: usize, search_l: usize) -> Result<Vec<SearchResult>> {
        let layout = self.current_layout()?;
        validate_search_args(k, search_l)?;
        self.store.check_query(query)?;

        let mut visited = VisitedSet::new(self.store.len());
        Ok(layout.search_with(self.metric, query, k, search_l, &mut visited))
    }

    /// Batch form of [`search_opt`](Self::search_opt).
    ///
    /// # Errors
    ///
    /// Same as [`search_opt`](Self::search_opt) and
    /// [`search_batch`](Self::search_batch).
    pub fn search_opt_batch(&self, queries: &[f32], k: usize, search_l: usize) -> Result<Vec<Vec<SearchResult>>> {
        let layout = self.current_layout()?;
        validate_search_args(k, search_l)?;
        self.check_batch(queries)?;

        let n = self.store.len();
        Ok(queries
            .par_chunks(self.store.dimensions())
            .map_init(
                || VisitedSet::new(n),
                |visited, query| layout.search_with(self.metric, query, k, search_l, visited),
            )
            .collect())
    }

    /// Writes the graph to `path`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the index has no graph and `Io` if the
    /// file cannot be locked or written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_graph(self.require_graph()?, path)
    }

    /// Replaces the graph with one read from `path`.
    ///
    /// # Errors
    ///
    /// - `Format` if the file is empty, truncated or references ids out of
    ///   range
    /// - `SizeMismatch` if it describes a different number of points
    /// - `Io` if it cannot be opened or locked
    ///
    /// The index is unchanged on error.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let graph = load_graph(path, self.store.len())?;
        self.install(graph);
        Ok(())
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Vector dimension.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.store.dimensions()
    }

    /// Metric fixed at construction.
    #[must_use]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// The vector store.
    #[must_use]
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// The current graph, if built or loaded.
    #[must_use]
    pub fn graph(&self) -> Option<&NsgGraph> {
        self.graph.as_ref()
    }

    /// Entry point of the current graph.
    #[must_use]
    pub fn navigating_node(&self) -> Option<PointId> {
        self.graph.as_ref().map(NsgGraph::navigating_node)
    }

    /// Whether an optimized layout matching the current graph exists.
    #[must_use]
    pub fn is_optimized(&self) -> bool {
        self.current_layout().is_ok()
    }

    fn install(&mut self, graph: NsgGraph) {
        self.graph = Some(graph);
        self.generation += 1;
    }

    fn require_graph(&self) -> Result<&NsgGraph> {
        self.graph.as_ref().ok_or_else(|| invalid("index has no graph; build or load one first"))
    }

    fn current_layout(&self) -> Result<&OptimizedLayout> {
        match &self.layout {
            None => Err(NsgError::NotOptimized),
            Some(layout) if layout.generation() != self.generation => Err(NsgError::StaleLayout),
            Some(layout) => Ok(layout),
        }
    }

    fn check_batch(&self, queries: &[f32]) -> Result<()> {
        let dims = self.store.dimensions();
        if queries.len() % dims != 0 {
            return Err(invalid(format!(
                "query buffer of {} floats is not a multiple of dimension {}",
                queries.len(),
                dims
            )));
        }
        Ok(())
    }
}
