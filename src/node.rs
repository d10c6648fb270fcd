//! A single graph vertex. Grounded on `ahnlich_similarity::hnsw::mod::Node`
//! (id, value, per-layer neighbor sets) but reshaped from a
//! `HashMap<LayerIndex, HashSet<NodeId>>` into dense `Vec<Vec<u32>>` indexed
//! by layer (`neighbors[l]` holding layer `l`'s adjacency list) to match the
//! on-disk layout's fixed-capacity arrays. Mutation is serialized per-node
//! by a `parking_lot::Mutex`, the owning index's lock of choice for short
//! critical sections.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rand::Rng;

use crate::object::Object;

/// One graph vertex. `neighbors[l]` holds the layer-`l` adjacency list;
/// layer 0 is capped at `M0`, layers >= 1 at `M` (enforced by the index,
/// not by the node itself).
pub struct HnswNode {
    pub internal_id: u32,
    pub object: Object,
    max_level: u8,
    neighbors: Mutex<Vec<Vec<u32>>>,
    deleted: AtomicBool,
}

impl HnswNode {
    pub fn new(internal_id: u32, object: Object, max_level: u8) -> Self {
        let layers = vec![Vec::new(); max_level as usize + 1];
        Self {
            internal_id,
            object,
            max_level,
            neighbors: Mutex::new(layers),
            deleted: AtomicBool::new(false),
        }
    }

    pub fn max_level(&self) -> u8 {
        self.max_level
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Snapshot of a layer's neighbor list. `l` must be `<= max_level`.
    pub fn neighbors_at(&self, l: u8) -> Vec<u32> {
        self.neighbors.lock()[l as usize].clone()
    }

    pub fn neighbor_count_at(&self, l: u8) -> usize {
        self.neighbors.lock()[l as usize].len()
    }

    /// Runs `f` against the layer-`l` list under the node's own lock, the
    /// sole mutation path for neighbor lists.
    pub fn with_neighbors_mut<R>(&self, l: u8, f: impl FnOnce(&mut Vec<u32>) -> R) -> R {
        let mut guard = self.neighbors.lock();
        f(&mut guard[l as usize])
    }

    pub fn set_neighbors_at(&self, l: u8, new_neighbors: Vec<u32>) {
        self.neighbors.lock()[l as usize] = new_neighbors;
    }

    /// Adds `id` to layer `l` if absent and not self; returns the list's
    /// length after insertion so the caller can decide whether to re-run
    /// pruning against the capacity.
    pub fn add_neighbor(&self, l: u8, id: u32) -> usize {
        let mut guard = self.neighbors.lock();
        let list = &mut guard[l as usize];
        if id != self.internal_id && !list.contains(&id) {
            list.push(id);
        }
        list.len()
    }

    pub fn remove_neighbor(&self, l: u8, id: u32) {
        let mut guard = self.neighbors.lock();
        guard[l as usize].retain(|&x| x != id);
    }
}

/// Draws a new node's `max_level` as `floor(-ln(U(0,1)) * level_mult)`, the
/// geometric distribution HNSW relies on to produce exponentially fewer
/// nodes at each higher layer.
pub fn sample_level(level_mult: f64, rng: &mut impl Rng) -> u8 {
    let u: f64 = rng.r#gen::<f64>().max(f64::MIN_POSITIVE);
    let level = (-u.ln() * level_mult).floor();
    level.clamp(0.0, u8::MAX as f64) as u8
}
