//! Initial k-NN graph: the input to NSG construction.
//!
//! The graph is normally produced by an external approximate builder and
//! read from disk. For small datasets and tests, [`KnnGraph::exact`] computes
//! the exact graph by brute force.
//!
//! # File format
//!
//! ```text
//! u32 k
//! repeated for each point in id order:
//!     u32 point_id
//!     k × u32 neighbor_id
//! ```
//!
//! Lists shorter than `k` are padded with `u32::MAX` when written; padding
//! and other out-of-range ids are ignored at build time.

use crate::distance::{Metric, QueryScorer};
use crate::error::{NsgError, Result, format_error, invalid};
use crate::graph::PointId;
use crate::graph::persist::{map_locked, read_u32, write_locked};
use crate::store::VectorStore;
use rayon::prelude::*;
use std::io::Write;
use std::path::Path;

/// Padding id for lists shorter than `k`.
pub const PADDING: PointId = PointId::MAX;

/// Per-point candidate neighbor lists in proximity-rank order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnnGraph {
    lists: Vec<Vec<PointId>>,
    k: usize,
}

impl KnnGraph {
    /// Wraps in-memory neighbor lists. `k` is the longest list length.
    ///
    /// Ids are not range-checked here; the builder drops invalid ones.
    #[must_use]
    pub fn from_lists(lists: Vec<Vec<PointId>>) -> Self {
        let k = lists.iter().map(Vec::len).max().unwrap_or(0);
        Self { lists, k }
    }

    /// Computes the exact `k` nearest neighbors of every point (excluding
    /// itself) by parallel brute force.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `k == 0` or `k >= store.len()`.
    pub fn exact(store: &VectorStore, k: usize, metric: Metric) -> Result<Self> {
        let n = store.len();
        if k == 0 || k >= n {
            return Err(invalid(format!("k = {k} must be in 1..{n}")));
        }

        let lists = (0..n as PointId)
            .into_par_iter()
            .map(|p| {
                let scorer = QueryScorer::new(metric, store.vector(p));
                let mut scored: Vec<(f32, PointId)> = (0..n as PointId)
                    .filter(|&q| q != p)
                    .map(|q| (scorer.score(store.vector(q), store.norm(q)), q))
                    .collect();

                let by_rank = |a: &(f32, PointId), b: &(f32, PointId)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));
                if k < scored.len() {
                    scored.select_nth_unstable_by(k, by_rank);
                    scored.truncate(k);
                }
                scored.sort_unstable_by(by_rank);
                scored.into_iter().map(|(_, q)| q).collect()
            })
            .collect();

        tracing::debug!(points = n, k, ?metric, "computed exact k-NN graph");
        Ok(Self { lists, k })
    }

    /// Loads a k-NN graph file.
    ///
    /// # Errors
    ///
    /// - `EmptyInput` if the file cannot be opened, is empty, or holds no
    ///   points
    /// - `Format` if the size is not `4 + n * 4 * (k + 1)` bytes or a record's
    ///   leading id is not its position
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mapped = map_locked(path).map_err(|e| match e {
            NsgError::Io(io) => NsgError::EmptyInput(format!("cannot open {}: {}", path.display(), io)),
            other => other,
        })?;
        let (_file, mmap) = mapped.ok_or_else(|| NsgError::EmptyInput(format!("{} is empty", path.display())))?;
        let bytes = &mmap[..];

        let k = read_u32(bytes, 0).ok_or_else(|| format_error("k-NN file shorter than its header"))? as usize;
        let record = (k + 1) * 4;
        let body = bytes.len() - 4;
        if body % record != 0 {
            return Err(format_error(format!(
                "k-NN file size {} does not match 4 + n * {} for k = {}",
                bytes.len(),
                record,
                k
            )));
        }

        let n = body / record;
        if n == 0 {
            return Err(NsgError::EmptyInput(format!("{} contains no points", path.display())));
        }

        let mut lists = Vec::with_capacity(n);
        for (i, chunk) in bytes[4..].chunks_exact(record).enumerate() {
            let mut words = chunk.chunks_exact(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
            let id = words.next().unwrap_or(PADDING);
            if id as usize != i {
                return Err(format_error(format!("k-NN record {i} is labelled with point id {id}")));
            }
            lists.push(words.collect());
        }

        tracing::debug!(path = %path.display(), points = n, k, "loaded k-NN graph");
        Ok(Self { lists, k })
    }

    /// Writes the graph in the k-NN file format.
    ///
    /// # Errors
    ///
    /// Returns `Io` on write failure and `InvalidParameter` if the graph has
    /// more points than 32-bit ids can address.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let k = u32::try_from(self.k).map_err(|_| invalid("k does not fit in u32"))?;
        if self.lists.len() > PointId::MAX as usize {
            return Err(invalid("too many points for 32-bit ids"));
        }

        write_locked(path.as_ref(), |w| {
            w.write_all(&k.to_le_bytes())?;
            for (p, list) in self.lists.iter().enumerate() {
                w.write_all(&(p as u32).to_le_bytes())?;
                for &q in list {
                    w.write_all(&q.to_le_bytes())?;
                }
                for _ in list.len()..self.k {
                    w.write_all(&PADDING.to_le_bytes())?;
                }
            }
            Ok(())
        })
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    /// Whether the graph has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Nominal neighbors per point.
    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Candidate neighbors of `p`, as stored (padding included).
    #[must_use]
    pub fn neighbors(&self, p: PointId) -> &[PointId] {
        &self.lists[p as usize]
    }

    /// Copies the lists, dropping out-of-range ids, self-loops and
    /// duplicates. Returns the cleaned lists and the number of dropped ids.
    pub(crate) fn sanitized(&self) -> (Vec<Vec<PointId>>, usize) {
        let n = self.lists.len();
        let mut dropped = 0;
        let lists = self
            .lists
            .iter()
            .enumerate()
            .map(|(p, list)| {
                let mut clean: Vec<PointId> = Vec::with_capacity(list.len());
                for &q in list {
                    if q as usize >= n || q as usize == p || clean.contains(&q) {
                        dropped += 1;
                    } else {
                        clean.push(q);
                    }
                }
                clean
            })
            .collect();
        (lists, dropped)
    }
}
