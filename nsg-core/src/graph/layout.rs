//! Cache-friendly contiguous layout for optimized search.
//!
//! Every point gets one fixed-stride block, in id order:
//!
//! ```text
//! [norm: f32][vector: dims × f32][degree: u32][neighbors: width × u32]
//! ```
//!
//! `width` is the graph's maximum out-degree; unused neighbor slots are
//! zero. Expanding a point touches a single block, and scoring a neighbor
//! touches only that neighbor's block, which is prefetched ahead of use.
//!
//! Block `i` starts at word `i * stride`, so addressing is O(1).

use crate::distance::{Metric, QueryScorer};
use crate::error::{Result, invalid};
use crate::graph::pool::{Candidate, VisitedSet};
use crate::graph::search::{Expand, SearchResult, top_k, traverse, validate_search_args};
use crate::graph::{NsgGraph, PointId};
use crate::store::VectorStore;

/// Word index of the squared norm within a block.
const NORM_SLOT: usize = 0;

/// Word index of the first vector component within a block.
const VECTOR_SLOT: usize = 1;

/// Computes the word offset of a point's block.
#[inline]
#[must_use]
pub const fn block_offset(id: PointId, stride: usize) -> usize {
    id as usize * stride
}

/// Read-only block layout derived from an [`NsgGraph`] and its vectors.
#[derive(Debug, Clone)]
pub struct OptimizedLayout {
    blocks: Vec<u32>,
    stride: usize,
    dims: usize,
    width: usize,
    len: usize,
    navigating_node: PointId,
    generation: u64,
}

impl OptimizedLayout {
    /// Packs `graph` and `store` into blocks, tagging the result with the
    /// graph `generation` it was built from.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the graph and store disagree on the
    /// number of points.
    pub fn build(graph: &NsgGraph, store: &VectorStore, generation: u64) -> Result<Self> {
        if graph.len() != store.len() {
            return Err(invalid(format!(
                "graph has {} points but vector store has {}",
                graph.len(),
                store.len()
            )));
        }

        let dims = store.dimensions();
        let width = graph.max_degree();
        let stride = VECTOR_SLOT + dims + 1 + width;
        let len = graph.len();

        let mut blocks = vec![0u32; len * stride];
        for (block, id) in blocks.chunks_exact_mut(stride).zip(0..len as PointId) {
            let (head, tail) = block.split_at_mut(VECTOR_SLOT + dims);
            head[NORM_SLOT] = store.norm(id).to_bits();
            for (slot, &x) in head[VECTOR_SLOT..].iter_mut().zip(store.vector(id)) {
                *slot = x.to_bits();
            }

            let neighbors = graph.neighbors(id);
            tail[0] = neighbors.len() as u32;
            tail[1..=neighbors.len()].copy_from_slice(neighbors);
        }

        tracing::info!(
            points = len,
            block_bytes = stride * 4,
            total_bytes = blocks.len() * 4,
            generation,
            "built optimized layout"
        );

        Ok(Self { blocks, stride, dims, width, len, navigating_node: graph.navigating_node(), generation })
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the layout holds no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Words per block.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Neighbor slots per block.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Total size of the block buffer in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.blocks.len() * std::mem::size_of::<u32>()
    }

    /// Graph generation this layout was built from.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    fn block(&self, id: PointId) -> &[u32] {
        let start = block_offset(id, self.stride);
        &self.blocks[start..start + self.stride]
    }

    /// Squared norm stored in a point's block.
    #[inline]
    #[must_use]
    pub fn norm(&self, id: PointId) -> f32 {
        f32::from_bits(self.block(id)[NORM_SLOT])
    }

    /// Vector stored in a point's block.
    #[inline]
    #[must_use]
    pub fn vector(&self, id: PointId) -> &[f32] {
        let words = &self.block(id)[VECTOR_SLOT..VECTOR_SLOT + self.dims];
        // SAFETY: u32 and f32 have the same size and alignment, and every
        // bit pattern is a valid f32. The slice borrows from `self`.
        unsafe { std::slice::from_raw_parts(words.as_ptr().cast::<f32>(), words.len()) }
    }

    /// Out-edges stored in a point's block.
    #[inline]
    #[must_use]
    pub fn neighbors(&self, id: PointId) -> &[PointId] {
        let block = self.block(id);
        let degree_slot = VECTOR_SLOT + self.dims;
        let degree = block[degree_slot] as usize;
        &block[degree_slot + 1..degree_slot + 1 + degree]
    }

    /// Hints the CPU to pull a point's block into cache.
    #[inline]
    fn prefetch(&self, id: PointId) {
        #[cfg(target_arch = "x86_64")]
        {
            use std::arch::x86_64::{_MM_HINT_T0, _mm_prefetch};
            if let Some(word) = self.blocks.get(block_offset(id, self.stride)) {
                // SAFETY: prefetching is a hint that never faults, and the
                // pointer is inside `blocks`.
                unsafe { _mm_prefetch::<_MM_HINT_T0>(std::ptr::from_ref(word).cast::<i8>()) };
            }
        }
        #[cfg(not(target_arch = "x86_64"))]
        let _ = id;
    }

    /// Search with a caller-provided visited set. Arguments are assumed
    /// validated.
    pub(crate) fn search_with(
        &self,
        metric: Metric,
        query: &[f32],
        k: usize,
        search_l: usize,
        visited: &mut VisitedSet,
    ) -> Vec<SearchResult> {
        visited.clear();

        let expander = BlockExpander { layout: self, scorer: QueryScorer::new(metric, query) };
        let entry = self.navigating_node;
        let start = Candidate::new(entry, expander.score(entry));

        top_k(traverse(&expander, start, search_l, visited, None), k)
    }

    /// Searches the layout for the `k` nearest points to `query`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `k == 0`, `search_l < k`, or the query
    /// has the wrong dimension.
    pub fn search(&self, metric: Metric, query: &[f32], k: usize, search_l: usize) -> Result<Vec<SearchResult>> {
        validate_search_args(k, search_l)?;
        if query.len() != self.dims {
            return Err(invalid(format!(
                "query dimension mismatch: expected {}, got {}",
                self.dims,
                query.len()
            )));
        }

        let mut visited = VisitedSet::new(self.len);
        Ok(self.search_with(metric, query, k, search_l, &mut visited))
    }
}

struct BlockExpander<'a> {
    layout: &'a OptimizedLayout,
    scorer: QueryScorer<'a>,
}

impl BlockExpander<'_> {
    #[inline]
    fn score(&self, id: PointId) -> f32 {
        self.scorer.score(self.layout.vector(id), self.layout.norm(id))
    }
}

impl Expand for BlockExpander<'_> {
    #[inline]
    fn expand<F: FnMut(PointId, f32)>(&self, p: PointId, visited: &mut VisitedSet, mut emit: F) {
        let neighbors = self.layout.neighbors(p);

        for &q in neighbors {
            if !visited.contains(q) {
                self.layout.prefetch(q);
            }
        }

        for &q in neighbors {
            if visited.insert(q) {
                emit(q, self.score(q));
            }
        }
    }
}
