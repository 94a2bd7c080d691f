//! Bounded sorted candidate pool and generation-based visited set.
//!
//! The pool is a plain sorted `Vec` rather than a pair of heaps: beam widths
//! are small (tens to a few hundred), a binary search plus `insert` is cheap at
//! that size, and a sorted array lets the search resume from the position of
//! the closest newly inserted candidate.

use crate::graph::PointId;
use std::cmp::Ordering;

/// A scored point in a candidate pool.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    /// Point id.
    pub id: PointId,
    /// Distance to the query (or to the point being built).
    pub distance: f32,
    /// Whether the point's neighbors have already been expanded.
    pub expanded: bool,
}

impl Candidate {
    /// Unexpanded candidate.
    #[inline]
    #[must_use]
    pub const fn new(id: PointId, distance: f32) -> Self {
        Self { id, distance, expanded: false }
    }

    /// Total order: distance first (NaN-safe), then id.
    #[inline]
    #[must_use]
    pub fn rank(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance).then(self.id.cmp(&other.id))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.rank(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank(other)
    }
}

/// Candidates sorted by `(distance, id)`, holding at most `capacity` entries.
#[derive(Debug, Clone)]
pub struct CandidatePool {
    items: Vec<Candidate>,
    capacity: usize,
}

impl CandidatePool {
    /// Empty pool over a set of `points` distinct ids.
    ///
    /// The pool never holds more entries than there are points, so only
    /// `min(capacity, points)` slots are reserved up front.
    #[must_use]
    pub fn new(capacity: usize, points: usize) -> Self {
        Self { items: Vec::with_capacity(capacity.min(points).saturating_add(1)), capacity }
    }

    /// Maximum number of entries.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the pool is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether the pool has reached capacity.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Inserts a candidate, keeping the pool sorted and capped.
    ///
    /// Returns the insertion position, or `None` if the pool is full and the
    /// candidate does not beat the current worst entry.
    pub fn insert(&mut self, candidate: Candidate) -> Option<usize> {
        if self.capacity == 0 {
            return None;
        }
        if self.is_full() && self.items.last().is_some_and(|worst| candidate.rank(worst) != Ordering::Less) {
            return None;
        }

        let pos = self.items.partition_point(|c| c.rank(&candidate) == Ordering::Less);
        self.items.insert(pos, candidate);
        self.items.truncate(self.capacity);
        Some(pos)
    }

    /// Entry at `index`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Candidate> {
        self.items.get(index)
    }

    /// Marks the entry at `index` as expanded and returns its id.
    #[inline]
    pub(crate) fn expand_at(&mut self, index: usize) -> Option<PointId> {
        let item = self.items.get_mut(index)?;
        item.expanded = true;
        Some(item.id)
    }

    /// Sorted entries.
    #[must_use]
    pub fn as_slice(&self) -> &[Candidate] {
        &self.items
    }

    /// Consumes the pool, returning the sorted entries.
    #[must_use]
    pub fn into_vec(self) -> Vec<Candidate> {
        self.items
    }
}

/// Generation-based visited set.
///
/// `clear()` bumps a generation counter instead of zeroing the array, so a
/// thread can reuse one set across many searches. The array is only wiped
/// when the `u16` generation wraps.
#[derive(Debug)]
pub struct VisitedSet {
    data: Vec<u16>,
    generation: u16,
}

impl VisitedSet {
    /// Set sized for `capacity` points.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { data: vec![0u16; capacity], generation: 1 }
    }

    /// Number of points the set can track.
    #[inline]
    #[must_use]
    pub fn span(&self) -> usize {
        self.data.len()
    }

    /// Forgets every visited point.
    pub fn clear(&mut self) {
        if self.generation == u16::MAX {
            self.data.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    /// Marks `id` visited. Returns `true` if it was not visited before.
    #[inline]
    pub fn insert(&mut self, id: PointId) -> bool {
        let slot = &mut self.data[id as usize];
        if *slot == self.generation {
            false
        } else {
            *slot = self.generation;
            true
        }
    }

    /// Whether `id` has been visited since the last `clear()`.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: PointId) -> bool {
        self.data.get(id as usize).is_some_and(|&g| g == self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_keeps_sorted_and_capped() {
        let mut pool = CandidatePool::new(3, 10);

        assert_eq!(pool.insert(Candidate::new(1, 0.5)), Some(0));
        assert_eq!(pool.insert(Candidate::new(2, 0.1)), Some(0));
        assert_eq!(pool.insert(Candidate::new(3, 0.9)), Some(2));
        assert!(pool.is_full());

        // Worse than the worst: rejected
        assert_eq!(pool.insert(Candidate::new(4, 1.0)), None);

        // Better: evicts id 3
        assert_eq!(pool.insert(Candidate::new(5, 0.3)), Some(1));
        let ids: Vec<PointId> = pool.as_slice().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 5, 1]);
    }

    #[test]
    fn test_pool_width_beyond_point_count() {
        let mut pool = CandidatePool::new(usize::MAX, 4);
        assert_eq!(pool.capacity(), usize::MAX);
        assert!(pool.as_slice().is_empty());

        for id in 0..4 {
            pool.insert(Candidate::new(id, id as f32));
        }
        assert_eq!(pool.len(), 4);
        assert!(!pool.is_full());
    }

    #[test]
    fn test_pool_ties_broken_by_id() {
        let mut pool = CandidatePool::new(4, 10);
        pool.insert(Candidate::new(9, 1.0));
        pool.insert(Candidate::new(3, 1.0));
        pool.insert(Candidate::new(5, 1.0));

        let ids: Vec<PointId> = pool.as_slice().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 5, 9]);
    }

    #[test]
    fn test_pool_full_equal_distance_higher_id_rejected() {
        let mut pool = CandidatePool::new(1, 10);
        pool.insert(Candidate::new(2, 1.0));
        assert_eq!(pool.insert(Candidate::new(7, 1.0)), None);
        assert_eq!(pool.insert(Candidate::new(1, 1.0)), Some(0));
    }

    #[test]
    fn test_pool_nan_sorts_last() {
        let mut pool = CandidatePool::new(3, 10);
        pool.insert(Candidate::new(0, f32::NAN));
        pool.insert(Candidate::new(1, 2.0));
        assert_eq!(pool.get(0).map(|c| c.id), Some(1));
    }

    #[test]
    fn test_visited_insert_and_clear() {
        let mut visited = VisitedSet::new(100);
        assert_eq!(visited.span(), 100);
        assert!(visited.insert(0));
        assert!(!visited.insert(0));
        assert!(visited.contains(0));
        assert!(visited.insert(50));

        visited.clear();
        assert!(!visited.contains(0));
        assert!(visited.insert(0));
    }

    #[test]
    fn test_visited_generation_wrap() {
        let mut visited = VisitedSet::new(10);
        for _ in 0..65534 {
            visited.clear();
        }
        assert_eq!(visited.generation, u16::MAX);
        visited.insert(5);

        visited.clear();
        assert_eq!(visited.generation, 1);
        assert!(visited.insert(5));
    }
}
