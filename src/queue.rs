//! Bounded max-heap of the current k-best candidates, grounded on
//! `ahnlich_similarity::heap::BoundedMaxHeap` generalized from a plain
//! `T: Ord` element to an explicit `(distance, id)` pair whose distance
//! type is only `PartialOrd` (floats are not `Ord`, but the space contract
//! guarantees distances are never NaN, so comparisons never hit the
//! incomparable case).

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A distance value usable throughout the core: comparable and possessing
/// a sentinel "worse than everything" value for empty-queue/empty-beam
/// bookkeeping. Implemented for the floating-point and integer distance
/// types the shipped spaces return.
pub trait DistanceValue: PartialOrd + Copy + Send + Sync + 'static {
    fn infinity() -> Self;
}

impl DistanceValue for f32 {
    fn infinity() -> Self {
        f32::INFINITY
    }
}

impl DistanceValue for u32 {
    fn infinity() -> Self {
        u32::MAX
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry<D> {
    distance: D,
    id: u32,
}

impl<D: PartialOrd> PartialEq for Entry<D> {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}
impl<D: PartialOrd> Eq for Entry<D> {}

impl<D: PartialOrd> PartialOrd for Entry<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D: PartialOrd> Ord for Entry<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Space::distance is required never to return NaN; ties fall back
        // to Equal since no non-NaN float comparison can fail here.
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
    }
}

/// Bounded max-heap holding the current k-best `(distance, internal_id)`
/// pairs. `push` is O(log k); once `size == k` the root always holds the
/// largest distance currently retained.
pub struct KnnQueue<D: DistanceValue> {
    heap: BinaryHeap<Entry<D>>,
    k: usize,
}

impl<D: DistanceValue> KnnQueue<D> {
    pub fn new(k: u32) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(k as usize),
            k: k as usize,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    /// `size < k` inserts unconditionally; otherwise replaces the current
    /// worst entry only if `d` is strictly closer.
    pub fn push(&mut self, distance: D, id: u32) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(Entry { distance, id });
        } else if let Some(mut worst) = self.heap.peek_mut() {
            if distance < worst.distance {
                *worst = Entry { distance, id };
            }
        }
    }

    pub fn top_distance(&self) -> D {
        self.heap.peek().map(|e| e.distance).unwrap_or_else(D::infinity)
    }

    pub fn pop(&mut self) -> Option<(D, u32)> {
        self.heap.pop().map(|e| (e.distance, e.id))
    }

    pub fn contains_id(&self, id: u32) -> bool {
        self.heap.iter().any(|e| e.id == id)
    }

    /// Drain in ascending-distance order, the order `search_knn` must
    /// return results in.
    pub fn drain_sorted_ascending(self) -> Vec<(D, u32)> {
        let mut v: Vec<_> = self.heap.into_iter().map(|e| (e.distance, e.id)).collect();
        v.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        v
    }
}
