//! The multi-layer HNSW graph. Grounded on
//! `ahnlich_similarity::hnsw::index::HNSW` (`insert_node`, `search_layer`,
//! `select_neighbours_heuristic`, `knn_search`, `delete_node`) and on
//! `velesdb`'s `native/graph/insert.rs` for the overall
//! vectors-lock -> assign-id -> sample-level -> descend -> link shape, but
//! reworked throughout into dense `Vec<Vec<u32>>` neighbor storage instead
//! of `HashSet`-per-layer, explicit compaction on deletion, and a
//! `delaunay_type`-selected pruning heuristic instead of a single
//! hardcoded one.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicUsize, Ordering as AtomicOrdering};

use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::io;
use crate::node::{HnswNode, sample_level};
use crate::object::Object;
use crate::params::{DelaunayType, HnswParams, QueryTimeParams, SearchMethod};
use crate::queue::{DistanceValue, KnnQueue};
use crate::space::Space;
use crate::store::{self, NodeRecord, StoreHeader};
use crate::worker::WorkerPool;

/// `delete_batch`'s neighbor-repair strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStrategy {
    None,
    NeighborsOnly,
}

#[derive(Clone, Copy)]
struct Candidate<D> {
    distance: D,
    id: u32,
}

impl<D: PartialOrd> PartialEq for Candidate<D> {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}
impl<D: PartialOrd> Eq for Candidate<D> {}
impl<D: PartialOrd> PartialOrd for Candidate<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<D: PartialOrd> Ord for Candidate<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.partial_cmp(&other.distance).unwrap_or(Ordering::Equal)
    }
}

/// Multi-layer proximity graph over objects in `S`. Owns every node for
/// the lifetime of the index.
pub struct HnswIndex<D: DistanceValue, S: Space<D>> {
    space: S,
    params: HnswParams,
    query_params: Mutex<QueryTimeParams>,
    nodes: RwLock<Vec<Option<Arc<HnswNode>>>>,
    id_index: RwLock<HashMap<i64, u32, ahash::RandomState>>,
    entry_point: AtomicU32,
    top_level: AtomicU8,
    max_level_guard: Mutex<()>,
    visited_pool: crate::visited::VisitedPool,
    deleted_count: AtomicUsize,
    /// Set once `build`/`add_batch`/`load_binary`/`load_text` has run.
    /// Distinguishes "never built or loaded" from "built but empty" for
    /// `search_knn`/`save_binary`/`save_text`.
    initialized: AtomicBool,
    _marker: std::marker::PhantomData<D>,
}

const EMPTY: u32 = u32::MAX;

impl<D: DistanceValue, S: Space<D>> HnswIndex<D, S> {
    pub fn new(space: S, params: HnswParams) -> Self {
        Self {
            space,
            params,
            query_params: Mutex::new(QueryTimeParams::default()),
            nodes: RwLock::new(Vec::new()),
            id_index: RwLock::new(HashMap::default()),
            entry_point: AtomicU32::new(EMPTY),
            top_level: AtomicU8::new(0),
            max_level_guard: Mutex::new(()),
            visited_pool: crate::visited::VisitedPool::new(),
            deleted_count: AtomicUsize::new(0),
            initialized: AtomicBool::new(false),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len() - self.deleted_count.load(AtomicOrdering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_query_time_params(&self, params: QueryTimeParams) {
        *self.query_params.lock() = params;
    }

    /// Inserts every object of `objects`.
    #[instrument(skip_all)]
    pub fn build(&self, objects: Vec<Object>) -> Result<()> {
        self.add_batch(objects, false)
    }

    /// Appends `objects` to an existing index; assigned internal ids are
    /// `current_size, current_size+1, …`.
    #[instrument(skip_all)]
    pub fn add_batch(&self, objects: Vec<Object>, check_ids: bool) -> Result<()> {
        self.initialized.store(true, AtomicOrdering::Release);
        if objects.is_empty() {
            return Ok(());
        }
        let n = objects.len();
        let start_id = {
            let mut nodes = self.nodes.write();
            let start = nodes.len() as u32;
            nodes.resize_with(nodes.len() + n, || None);
            start
        };

        let pool = WorkerPool::new(self.params.index_thread_qty as usize);
        let seed = self.params.seed;
        pool.parallel_for(n, |i, thread_id| {
            let internal_id = start_id + i as u32;
            let object = objects[i].clone();
            let mut rng = ChaCha8Rng::seed_from_u64(
                seed ^ ((thread_id as u64) << 48) ^ (internal_id as u64),
            );
            self.insert_one(internal_id, object, &mut rng)
        })?;

        if check_ids {
            self.verify_internal_ids()?;
        }
        Ok(())
    }

    fn verify_internal_ids(&self) -> Result<()> {
        let nodes = self.nodes.read();
        for (idx, slot) in nodes.iter().enumerate() {
            match slot {
                Some(node) if node.internal_id == idx as u32 => {}
                Some(node) => {
                    return Err(Error::CorruptIndex(format!(
                        "node at position {idx} carries internal_id {}",
                        node.internal_id
                    )));
                }
                None => {
                    return Err(Error::CorruptIndex(format!("empty node slot at position {idx}")));
                }
            }
        }
        Ok(())
    }

    fn get_node(&self, id: u32) -> Arc<HnswNode> {
        self.nodes.read()[id as usize]
            .clone()
            .expect("internal id always populated once assigned")
    }

    fn distance_between(&self, query: &Object, id: u32) -> D {
        self.space.distance(query, &self.get_node(id).object)
    }

    fn construction_distance(&self, query: &Object, id: u32) -> D {
        if self.params.use_proxy_dist {
            self.space.proxy_distance(query, &self.get_node(id).object)
        } else {
            self.space.distance(query, &self.get_node(id).object)
        }
    }

    /// Single-node insertion: sample a level, greedily descend to it from
    /// the current entry point, then beam-search and link at each layer
    /// from there down to 0.
    fn insert_one(&self, internal_id: u32, object: Object, rng: &mut ChaCha8Rng) -> Result<()> {
        let level = sample_level(self.params.level_mult(), rng);
        let node = Arc::new(HnswNode::new(internal_id, object, level));
        {
            let mut nodes = self.nodes.write();
            nodes[internal_id as usize] = Some(node.clone());
        }
        self.id_index.write().insert(node.object.id(), internal_id);

        let guard = self.max_level_guard.lock();
        let current_entry = self.entry_point.load(AtomicOrdering::Acquire);
        if current_entry == EMPTY {
            self.entry_point.store(internal_id, AtomicOrdering::Release);
            self.top_level.store(level, AtomicOrdering::Release);
            return Ok(());
        }
        let top_level = self.top_level.load(AtomicOrdering::Acquire);
        drop(guard);

        let query_obj = node.object.clone();

        let mut best = current_entry;
        for l in ((level + 1)..=top_level).rev() {
            best = self.greedy_descend(&query_obj, best, l);
        }

        for l in (0..=level.min(top_level)).rev() {
            let candidates = self.search_layer_construction(&query_obj, &[best], self.params.ef_construction as usize, l);
            if let Some(&(_, nearest)) = candidates.first() {
                best = nearest;
            }
            let cap = if l == 0 { self.params.m0 } else { self.params.m } as usize;
            let selected = self.select_neighbors(&query_obj, candidates, cap, l);
            node.set_neighbors_at(l, selected.iter().map(|&(_, id)| id).collect());
            for &(_, nb_id) in &selected {
                self.link_bidirectional(nb_id, internal_id, l, cap);
            }
        }

        if level > top_level {
            let _guard = self.max_level_guard.lock();
            if level > self.top_level.load(AtomicOrdering::Acquire) {
                self.top_level.store(level, AtomicOrdering::Release);
                self.entry_point.store(internal_id, AtomicOrdering::Release);
            }
        }
        Ok(())
    }

    fn greedy_descend(&self, query: &Object, start: u32, layer: u8) -> u32 {
        let mut current = start;
        let mut current_dist = self.space.distance(query, &self.get_node(current).object);
        loop {
            let node = self.get_node(current);
            if layer > node.max_level() {
                break;
            }
            let mut improved = None;
            for nb in node.neighbors_at(layer) {
                let nb_node = self.get_node(nb);
                if nb_node.is_deleted() {
                    continue;
                }
                let d = self.space.distance(query, &nb_node.object);
                if d < current_dist {
                    current_dist = d;
                    improved = Some(nb);
                }
            }
            match improved {
                Some(nb) => current = nb,
                None => break,
            }
        }
        current
    }

    /// Best-first beam search at `layer`. Returns up to `ef` candidates in
    /// ascending distance order.
    fn search_layer_with(
        &self,
        distance_fn: impl Fn(u32) -> D,
        entry_points: &[u32],
        ef: usize,
        layer: u8,
        stop_strict: bool,
    ) -> Vec<(D, u32)> {
        let node_count = self.nodes.read().len();
        let mut visited = self.visited_pool.acquire(node_count);
        let mut frontier: BinaryHeap<Reverse<Candidate<D>>> = BinaryHeap::new();
        let mut found = KnnQueue::<D>::new(ef as u32);

        for &ep in entry_points {
            if visited.is_visited(ep) || self.get_node(ep).is_deleted() {
                continue;
            }
            visited.visit(ep);
            let d = distance_fn(ep);
            frontier.push(Reverse(Candidate { distance: d, id: ep }));
            found.push(d, ep);
        }

        while let Some(Reverse(Candidate { distance: cur_dist, id: cur_id })) = frontier.pop() {
            let stop = if stop_strict {
                found.is_full() && cur_dist > found.top_distance()
            } else {
                found.is_full() && cur_dist >= found.top_distance()
            };
            if stop {
                break;
            }
            let node = self.get_node(cur_id);
            if layer > node.max_level() {
                continue;
            }
            for nb in node.neighbors_at(layer) {
                if visited.is_visited(nb) {
                    continue;
                }
                visited.visit(nb);
                let nb_node = self.get_node(nb);
                if nb_node.is_deleted() {
                    continue;
                }
                let d = distance_fn(nb);
                if !found.is_full() || d < found.top_distance() {
                    frontier.push(Reverse(Candidate { distance: d, id: nb }));
                    found.push(d, nb);
                }
            }
        }

        self.visited_pool.release(visited);
        found.drain_sorted_ascending()
    }

    fn search_layer_construction(&self, query: &Object, entry_points: &[u32], ef: usize, layer: u8) -> Vec<(D, u32)> {
        self.search_layer_with(|id| self.construction_distance(query, id), entry_points, ef, layer, true)
    }

    /// Neighbor-selection heuristic. `candidates` may carry proxy
    /// distances; final admission decisions always use the real
    /// `distance`, recomputed here.
    fn select_neighbors(&self, query: &Object, mut candidates: Vec<(D, u32)>, cap: usize, layer: u8) -> Vec<(D, u32)> {
        for c in candidates.iter_mut() {
            c.0 = self.distance_between(query, c.1);
        }
        candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        match self.params.delaunay_type {
            DelaunayType::Simple => {
                candidates.truncate(cap);
                candidates
            }
            DelaunayType::HeuristicNoReopen => self.prune_heuristic(candidates, cap, false),
            DelaunayType::HeuristicReopen => self.prune_heuristic(candidates, cap, true),
            DelaunayType::HeuristicExpandOneHop => {
                let expanded = self.expand_one_hop(query, &candidates, layer);
                self.prune_heuristic(expanded, cap, false)
            }
        }
    }

    /// Admit candidate `c` iff for every already-admitted `a`,
    /// `distance(c, new) < distance(c, a)`, strictly.
    fn prune_heuristic(&self, candidates: Vec<(D, u32)>, cap: usize, allow_reopen: bool) -> Vec<(D, u32)> {
        let mut selected: Vec<(D, u32)> = Vec::new();
        let mut discarded: Vec<(D, u32)> = Vec::new();

        for &(d, id) in &candidates {
            if selected.len() >= cap {
                break;
            }
            let obj_c = &self.get_node(id).object;
            let admits = selected
                .iter()
                .all(|&(_, a_id)| d < self.space.distance(obj_c, &self.get_node(a_id).object));
            if admits {
                selected.push((d, id));
            } else {
                discarded.push((d, id));
            }
        }

        if allow_reopen {
            for &(d, id) in &discarded {
                if selected.len() >= cap {
                    break;
                }
                selected.push((d, id));
            }
        }
        selected
    }

    fn expand_one_hop(&self, query: &Object, candidates: &[(D, u32)], layer: u8) -> Vec<(D, u32)> {
        let mut seen: std::collections::HashSet<u32> = candidates.iter().map(|&(_, id)| id).collect();
        let mut expanded = candidates.to_vec();
        for &(_, id) in candidates {
            let node = self.get_node(id);
            if layer > node.max_level() {
                continue;
            }
            for nb in node.neighbors_at(layer) {
                if !seen.insert(nb) {
                    continue;
                }
                let nb_node = self.get_node(nb);
                if nb_node.is_deleted() {
                    continue;
                }
                expanded.push((self.space.distance(query, &nb_node.object), nb));
            }
        }
        expanded.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        expanded
    }

    /// Adds `new_id` to `neighbor_id`'s adjacency list at `layer`; if that
    /// pushes it over capacity, re-prunes using the same heuristic. The
    /// whole read-select-write sequence runs inside one hold of the
    /// neighbor's own lock (`with_neighbors_mut`), so two concurrent
    /// insertions linking into the same over-capacity node can't interleave
    /// between a stale read and an overwrite and silently drop each other's
    /// edge.
    fn link_bidirectional(&self, neighbor_id: u32, new_id: u32, layer: u8, cap: usize) {
        let neighbor = self.get_node(neighbor_id);
        let neighbor_obj = neighbor.object.clone();
        let pruned = neighbor.with_neighbors_mut(layer, |list| {
            if new_id != neighbor_id && !list.contains(&new_id) {
                list.push(new_id);
            }
            if list.len() <= cap {
                return false;
            }
            let candidates: Vec<(D, u32)> = list
                .iter()
                .map(|&id| (self.space.distance(&neighbor_obj, &self.get_node(id).object), id))
                .collect();
            let selected = self.select_neighbors(&neighbor_obj, candidates, cap, layer);
            *list = selected.into_iter().map(|(_, id)| id).collect();
            true
        });
        if pruned {
            debug!(node = neighbor_id, layer, "re-pruned neighbor list after overflow");
        }
    }

    /// Approximate k-nearest-neighbor query.
    #[instrument(skip_all)]
    pub fn search_knn(&self, query: &Object, k: u32) -> Result<Vec<(i64, D)>> {
        if !self.initialized.load(AtomicOrdering::Acquire) {
            return Err(Error::NotInitialized);
        }
        let entry_point = self.entry_point.load(AtomicOrdering::Acquire);
        if entry_point == EMPTY {
            return Ok(Vec::new());
        }
        let top_level = self.top_level.load(AtomicOrdering::Acquire);
        let qp = *self.query_params.lock();

        let mut best = entry_point;
        for l in (1..=top_level).rev() {
            best = self.greedy_descend(query, best, l);
        }

        let ef = qp.ef.max(k) as usize;
        let stop_strict = matches!(qp.search_method, SearchMethod::Old);
        let candidates = self.search_layer_with(
            |id| self.space.distance(query, &self.get_node(id).object),
            &[best],
            ef,
            0,
            stop_strict,
        );

        Ok(candidates
            .into_iter()
            .take(k as usize)
            .map(|(d, id)| (self.get_node(id).object.id(), d))
            .collect())
    }

    /// Marks `ids` deleted, repairs local connectivity, and compacts once
    /// the deleted fraction crosses 0.2.
    #[instrument(skip_all)]
    pub fn delete_batch(&self, ids: &[i64], strategy: DeleteStrategy, check_ids: bool) -> Result<usize> {
        let internal_ids: Vec<u32> = {
            let id_index = self.id_index.read();
            ids.iter().filter_map(|id| id_index.get(id).copied()).collect()
        };
        for &iid in &internal_ids {
            self.get_node(iid).mark_deleted();
        }
        self.deleted_count.fetch_add(internal_ids.len(), AtomicOrdering::AcqRel);

        let node_count = self.nodes.read().len();
        for idx in 0..node_count {
            let node = self.get_node(idx as u32);
            if node.is_deleted() {
                continue;
            }
            for l in 0..=node.max_level() {
                let current = node.neighbors_at(l);
                let removed: Vec<u32> = current
                    .iter()
                    .copied()
                    .filter(|&nb| self.get_node(nb).is_deleted())
                    .collect();
                if removed.is_empty() {
                    continue;
                }
                node.with_neighbors_mut(l, |list| list.retain(|id| !removed.contains(id)));

                if strategy == DeleteStrategy::NeighborsOnly {
                    for &removed_id in &removed {
                        let removed_node = self.get_node(removed_id);
                        if l > removed_node.max_level() {
                            continue;
                        }
                        for candidate in removed_node.neighbors_at(l) {
                            if candidate == idx as u32 || self.get_node(candidate).is_deleted() {
                                continue;
                            }
                            if !node.neighbors_at(l).contains(&candidate) {
                                node.add_neighbor(l, candidate);
                            }
                        }
                    }
                }
            }
        }

        let deleted = self.deleted_count.load(AtomicOrdering::Acquire);
        if node_count > 0 && deleted as f64 / node_count as f64 >= 0.2 {
            self.compact()?;
        } else {
            self.fix_entry_point_if_deleted();
        }

        if check_ids {
            self.verify_internal_ids()?;
        }
        Ok(internal_ids.len())
    }

    fn fix_entry_point_if_deleted(&self) {
        let ep = self.entry_point.load(AtomicOrdering::Acquire);
        if ep == EMPTY || !self.get_node(ep).is_deleted() {
            return;
        }
        let _guard = self.max_level_guard.lock();
        if self.get_node(ep).is_deleted() {
            self.reassign_entry_point();
        }
    }

    /// Picks the surviving node with the highest `max_level` as the new
    /// entry point.
    fn reassign_entry_point(&self) {
        let nodes = self.nodes.read();
        let mut best: Option<(u8, u32)> = None;
        for slot in nodes.iter().flatten() {
            if slot.is_deleted() {
                continue;
            }
            if best.is_none_or(|(lvl, _)| slot.max_level() > lvl) {
                best = Some((slot.max_level(), slot.internal_id));
            }
        }
        match best {
            Some((lvl, id)) => {
                self.entry_point.store(id, AtomicOrdering::Release);
                self.top_level.store(lvl, AtomicOrdering::Release);
            }
            None => {
                self.entry_point.store(EMPTY, AtomicOrdering::Release);
                self.top_level.store(0, AtomicOrdering::Release);
            }
        }
    }

    /// Stop-the-world reassignment of dense internal-ids, skipping
    /// tombstoned nodes.
    fn compact(&self) -> Result<()> {
        let old_len;
        let rebuilt = {
            let nodes = self.nodes.write();
            old_len = nodes.len();
            let mut mapping: Vec<Option<u32>> = vec![None; old_len];
            let mut survivors: Vec<Arc<HnswNode>> = Vec::new();
            for (old_id, slot) in nodes.iter().enumerate() {
                if let Some(node) = slot {
                    if !node.is_deleted() {
                        mapping[old_id] = Some(survivors.len() as u32);
                        survivors.push(node.clone());
                    }
                }
            }

            let mut rebuilt: Vec<Option<Arc<HnswNode>>> = Vec::with_capacity(survivors.len());
            for (new_id, old_node) in survivors.iter().enumerate() {
                let new_node = HnswNode::new(new_id as u32, old_node.object.clone(), old_node.max_level());
                for l in 0..=old_node.max_level() {
                    let remapped: Vec<u32> = old_node
                        .neighbors_at(l)
                        .into_iter()
                        .filter_map(|old_nb| mapping[old_nb as usize])
                        .collect();
                    new_node.set_neighbors_at(l, remapped);
                }
                rebuilt.push(Some(Arc::new(new_node)));
            }
            rebuilt
        };

        let new_len = rebuilt.len();
        {
            let mut nodes = self.nodes.write();
            *nodes = rebuilt;
        }
        {
            let mut id_index = self.id_index.write();
            id_index.clear();
            let nodes = self.nodes.read();
            for slot in nodes.iter().flatten() {
                id_index.insert(slot.object.id(), slot.internal_id);
            }
        }
        self.deleted_count.store(0, AtomicOrdering::Release);
        warn!(old_len, new_len, "compacted index after crossing deleted-fraction threshold");

        let _guard = self.max_level_guard.lock();
        self.reassign_entry_point();
        Ok(())
    }

    /// Serializes the graph and node payloads into the binary format,
    /// writing atomically to `path`.
    pub fn save_binary(&self, path: &Path) -> Result<()> {
        if !self.initialized.load(AtomicOrdering::Acquire) {
            return Err(Error::NotInitialized);
        }
        let nodes = self.nodes.read();
        let node_count = nodes.len() as u32;
        let header = StoreHeader {
            version: store::FORMAT_VERSION,
            m: self.params.m,
            m0: self.params.m0,
            ef_construction: self.params.ef_construction,
            entry_point: self.entry_point.load(AtomicOrdering::Acquire),
            top_level: self.top_level.load(AtomicOrdering::Acquire) as u32,
            node_count,
            dist_func_type: self.space.type_code(),
            offset_levels: StoreHeader::BYTE_LEN as u32,
            offset_data: 0, // filled in below once the layer-0 block length is known
        };

        let records: Vec<NodeRecord> = nodes
            .iter()
            .map(|slot| {
                let node = slot.as_ref().expect("add_batch never leaves a hole");
                let higher_neighbor_ids = (1..=node.max_level())
                    .map(|l| node.neighbors_at(l))
                    .collect();
                NodeRecord {
                    max_level: node.max_level() as u32,
                    neighbor_ids: node.neighbors_at(0),
                    object_id: node.object.id(),
                    object_label: node.object.label().map(str::to_owned),
                    object_bytes: node.object.bytes().to_vec(),
                    higher_neighbor_ids,
                }
            })
            .collect();

        let mut layer0 = Vec::new();
        for record in &records {
            store::write_layer0_record(&mut layer0, record, self.params.m0)?;
        }
        let mut higher = Vec::new();
        for record in &records {
            for layer_ids in &record.higher_neighbor_ids {
                store::write_higher_layer(&mut higher, layer_ids, self.params.m)?;
            }
        }
        let mut header = header;
        header.offset_data = header.offset_levels + layer0.len() as u32;

        let mut full = Vec::with_capacity(StoreHeader::BYTE_LEN + layer0.len() + higher.len());
        header.write_header(&mut full)?;
        full.extend_from_slice(&layer0);
        full.extend_from_slice(&higher);

        io::atomic_write(path, move |w| w.write_all(&full))
    }

    /// Rebuilds an index from the binary format. `space` is supplied by
    /// the caller, as the format does not embed an executable distance
    /// function, only a `dist_func_type` discriminant checked against
    /// `space.type_code()`.
    pub fn load_binary(space: S, params: HnswParams, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let mut cursor = std::io::Cursor::new(&bytes);
        let header = StoreHeader::read_header(&mut cursor)?;
        if header.dist_func_type != space.type_code() {
            return Err(Error::CorruptIndex(format!(
                "index was saved with dist_func_type {}, but the supplied space reports {}",
                header.dist_func_type,
                space.type_code()
            )));
        }

        let mut params = params;
        params.m = header.m;
        params.m0 = header.m0;
        params.ef_construction = header.ef_construction;

        let index = Self::new(space, params);
        let mut nodes: Vec<Option<Arc<HnswNode>>> = Vec::with_capacity(header.node_count as usize);
        let mut pending_levels = Vec::with_capacity(header.node_count as usize);
        let mut pending_layer0_neighbors = Vec::with_capacity(header.node_count as usize);

        for internal_id in 0..header.node_count {
            let (max_level, neighbor_ids, object_id, label, object_bytes) =
                store::read_layer0_record(&mut cursor, header.m0)?;
            let object = index.space.parse_object(object_id, label.clone(), &object_bytes)?;
            let node = HnswNode::new(internal_id, object.clone(), max_level as u8);
            index.id_index.write().insert(object_id, internal_id);
            pending_levels.push(max_level as u8);
            pending_layer0_neighbors.push(neighbor_ids);
            nodes.push(Some(Arc::new(node)));
        }

        for (internal_id, &level) in pending_levels.iter().enumerate() {
            let node = nodes[internal_id].as_ref().unwrap();
            node.set_neighbors_at(0, pending_layer0_neighbors[internal_id].clone());
            for l in 1..=level {
                let ids = store::read_higher_layer(&mut cursor, header.m)?;
                node.set_neighbors_at(l, ids);
            }
        }

        *index.nodes.write() = nodes;
        index.entry_point.store(header.entry_point, AtomicOrdering::Release);
        index.top_level.store(header.top_level as u8, AtomicOrdering::Release);
        index.initialized.store(true, AtomicOrdering::Release);
        index.validate_loaded_graph()?;
        Ok(index)
    }

    /// Serializes the graph into the line-oriented text format.
    pub fn save_text(&self, path: &Path) -> Result<()> {
        if !self.initialized.load(AtomicOrdering::Acquire) {
            return Err(Error::NotInitialized);
        }
        let nodes = self.nodes.read();
        let header_fields = [
            store::MAGIC,
            store::FORMAT_VERSION,
            self.params.m,
            self.params.m0,
            self.params.ef_construction,
            self.entry_point.load(AtomicOrdering::Acquire),
            self.top_level.load(AtomicOrdering::Acquire) as u32,
            nodes.len() as u32,
            self.space.type_code(),
            0,
            0,
        ];
        let mut lines = vec![io::format_header_line(&header_fields)];
        for slot in nodes.iter() {
            let node = slot.as_ref().expect("add_batch never leaves a hole");
            let mut parts = vec![node.max_level().to_string()];
            for l in 0..=node.max_level() {
                let ids = node.neighbors_at(l);
                parts.push(ids.len().to_string());
                for id in ids {
                    parts.push(id.to_string());
                }
            }
            // The literal line format has no id/label fields of its own (see
            // DESIGN.md); both are appended as extra tokens ahead of the
            // serialized object text, the same extension `store.rs` makes to
            // the binary format for the same reason.
            parts.push(node.object.id().to_string());
            parts.push(io::encode_label_token(node.object.label()));
            parts.push(self.space.serialize_object(&node.object));
            lines.push(parts.join(" "));
        }
        let body = lines.join("\n") + "\n";
        io::atomic_write(path, move |w| w.write_all(body.as_bytes()))
    }

    /// Rebuilds an index from the text format written by `save_text`.
    pub fn load_text(space: S, params: HnswParams, path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut lines = contents.lines();
        let header_line = lines
            .next()
            .ok_or_else(|| Error::CorruptIndex("text index file has no header line".into()))?;
        let header_fields = io::parse_header_line(header_line)?;
        if header_fields.len() != 11 {
            return Err(Error::CorruptIndex(format!(
                "expected 11 header fields, found {}",
                header_fields.len()
            )));
        }
        let magic = header_fields[0];
        if magic != store::MAGIC {
            return Err(Error::CorruptIndex(format!(
                "bad magic: expected {:#x}, found {magic:#x}",
                store::MAGIC
            )));
        }
        let version = header_fields[1];
        if version != store::FORMAT_VERSION {
            return Err(Error::CorruptIndex(format!("unsupported format version {version}")));
        }
        let m = header_fields[2];
        let m0 = header_fields[3];
        let ef_construction = header_fields[4];
        let entry_point = header_fields[5];
        let top_level = header_fields[6];
        let node_count = header_fields[7];
        let dist_func_type = header_fields[8];
        if dist_func_type != space.type_code() {
            return Err(Error::CorruptIndex(format!(
                "index was saved with dist_func_type {dist_func_type}, but the supplied space reports {}",
                space.type_code()
            )));
        }

        let mut params = params;
        params.m = m;
        params.m0 = m0;
        params.ef_construction = ef_construction;

        let index = Self::new(space, params);
        let mut nodes: Vec<Option<Arc<HnswNode>>> = Vec::with_capacity(node_count as usize);

        for line in lines {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let mut idx = 0usize;
            let next = |idx: &mut usize| -> Result<&str> {
                let tok = tokens
                    .get(*idx)
                    .ok_or_else(|| Error::CorruptIndex("truncated node line".into()))?;
                *idx += 1;
                Ok(*tok)
            };

            let max_level: u8 = next(&mut idx)?
                .parse()
                .map_err(|e| Error::CorruptIndex(format!("bad max_level: {e}")))?;

            let mut neighbor_lists: Vec<Vec<u32>> = Vec::with_capacity(max_level as usize + 1);
            for _ in 0..=max_level {
                let count: usize = next(&mut idx)?
                    .parse()
                    .map_err(|e| Error::CorruptIndex(format!("bad neighbor count: {e}")))?;
                let mut ids = Vec::with_capacity(count);
                for _ in 0..count {
                    let id: u32 = next(&mut idx)?
                        .parse()
                        .map_err(|e| Error::CorruptIndex(format!("bad neighbor id: {e}")))?;
                    ids.push(id);
                }
                neighbor_lists.push(ids);
            }

            let object_id: i64 = next(&mut idx)?
                .parse()
                .map_err(|e| Error::CorruptIndex(format!("bad object id: {e}")))?;
            let label = io::decode_label_token(next(&mut idx)?)?;
            let object_text = tokens[idx..].join(" ");
            let object = index.space.parse_text(object_id, label, &object_text)?;

            let internal_id = nodes.len() as u32;
            let node = HnswNode::new(internal_id, object, max_level);
            for (l, ids) in neighbor_lists.into_iter().enumerate() {
                node.set_neighbors_at(l as u8, ids);
            }
            index.id_index.write().insert(object_id, internal_id);
            nodes.push(Some(Arc::new(node)));
        }

        if nodes.len() != node_count as usize {
            return Err(Error::CorruptIndex(format!(
                "header declares {node_count} nodes, found {}",
                nodes.len()
            )));
        }

        *index.nodes.write() = nodes;
        index.entry_point.store(entry_point, AtomicOrdering::Release);
        index.top_level.store(top_level as u8, AtomicOrdering::Release);
        index.initialized.store(true, AtomicOrdering::Release);
        index.validate_loaded_graph()?;
        Ok(index)
    }

    #[cfg(test)]
    pub(crate) fn debug_nodes(&self) -> Vec<Option<Arc<HnswNode>>> {
        self.nodes.read().clone()
    }

    /// Checks the three conditions that make a loaded graph `CorruptIndex`:
    /// an out-of-range neighbor id, a node's `max_level` above the header's
    /// `top_level`, and a non-bidirectional edge.
    fn validate_loaded_graph(&self) -> Result<()> {
        let nodes = self.nodes.read();
        let top_level = self.top_level.load(AtomicOrdering::Acquire);
        let entry_point = self.entry_point.load(AtomicOrdering::Acquire);

        if entry_point != EMPTY {
            let entry_level = nodes
                .get(entry_point as usize)
                .ok_or_else(|| Error::CorruptIndex(format!("entry point {entry_point} is out of range")))?
                .as_ref()
                .ok_or_else(|| Error::CorruptIndex(format!("entry point {entry_point} has no node")))?
                .max_level();
            if entry_level != top_level {
                return Err(Error::CorruptIndex(format!(
                    "entry point {entry_point} has max_level {entry_level}, expected top_level {top_level}"
                )));
            }
        }

        for slot in nodes.iter().flatten() {
            if slot.max_level() > top_level {
                return Err(Error::CorruptIndex(format!(
                    "node {} claims max_level {} above top_level {}",
                    slot.internal_id,
                    slot.max_level(),
                    top_level
                )));
            }
            for l in 0..=slot.max_level() {
                for &nb in &slot.neighbors_at(l) {
                    if nb as usize >= nodes.len() {
                        return Err(Error::CorruptIndex(format!(
                            "node {} references out-of-range neighbor {} at layer {}",
                            slot.internal_id, nb, l
                        )));
                    }
                    let nb_node = nodes[nb as usize].as_ref().ok_or_else(|| {
                        Error::CorruptIndex(format!(
                            "node {} references empty slot {} at layer {}",
                            slot.internal_id, nb, l
                        ))
                    })?;
                    if !nb_node.neighbors_at(l).contains(&slot.internal_id) {
                        return Err(Error::CorruptIndex(format!(
                            "edge ({}, {}) at layer {l} is not bidirectional",
                            slot.internal_id, nb
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
