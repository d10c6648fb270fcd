//! Build- and query-time configuration, validated at construction the way
//! `ahnlich_similarity::hnsw::HNSWConfig` validates its fields, but as a
//! plain struct rather than a dynamic config-file layer — these fields map
//! 1:1 onto the CLI surface a caller builds around the index.

use crate::error::{Error, Result};

/// Neighbor-selection heuristic used during insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelaunayType {
    /// Keep the `M` closest candidates outright.
    Simple,
    /// Pruning heuristic that may reopen previously discarded candidates.
    HeuristicReopen,
    /// Pruning heuristic restricted to candidates already in the beam.
    HeuristicNoReopen,
    /// Two-tier variant: expand the beam by one-hop neighbors first, then
    /// apply the same pruning rule.
    HeuristicExpandOneHop,
}

impl DelaunayType {
    pub fn from_u32(v: u32) -> Result<Self> {
        match v {
            0 => Ok(DelaunayType::Simple),
            1 => Ok(DelaunayType::HeuristicReopen),
            2 => Ok(DelaunayType::HeuristicNoReopen),
            3 => Ok(DelaunayType::HeuristicExpandOneHop),
            other => Err(Error::InvalidParameter {
                name: "delaunay_type".into(),
                reason: format!("must be one of 0,1,2,3; got {other}"),
            }),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            DelaunayType::Simple => 0,
            DelaunayType::HeuristicReopen => 1,
            DelaunayType::HeuristicNoReopen => 2,
            DelaunayType::HeuristicExpandOneHop => 3,
        }
    }
}

/// Layer-0 traversal variant selected at query time. Both variants are
/// required to agree on the *set* of candidates returned at k ≤ ef/2;
/// `V1Merge`'s exact stop condition around ties at the worst top-ef
/// distance is left undocumented by design, matching the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMethod {
    Old,
    V1Merge,
}

/// Build-time configuration. Mirrors `ahnlich_similarity::hnsw::HNSWConfig`
/// (`M`, `efConstruction`, `M0`) plus `delaunay_type`, `indexThreadQty`,
/// `useProxyDist`, `searchMethod`, and a build `seed` — randomness is
/// threaded explicitly throughout, never drawn from a global generator.
#[derive(Debug, Clone)]
pub struct HnswParams {
    pub m: u32,
    pub m0: u32,
    pub ef_construction: u32,
    pub delaunay_type: DelaunayType,
    pub index_thread_qty: u32,
    pub use_proxy_dist: bool,
    pub search_method: SearchMethod,
    pub seed: u64,
}

impl HnswParams {
    pub fn new(m: u32) -> Result<Self> {
        Self::validate_m(m)?;
        Ok(Self {
            m,
            m0: m * 2,
            ef_construction: 100,
            delaunay_type: DelaunayType::HeuristicNoReopen,
            index_thread_qty: 1,
            use_proxy_dist: false,
            search_method: SearchMethod::Old,
            seed: 0,
        })
    }

    fn validate_m(m: u32) -> Result<()> {
        if m < 2 {
            return Err(Error::InvalidParameter {
                name: "M".into(),
                reason: "must be >= 2".into(),
            });
        }
        Ok(())
    }

    pub fn with_m0(mut self, m0: u32) -> Result<Self> {
        if m0 < self.m {
            return Err(Error::InvalidParameter {
                name: "M0".into(),
                reason: "must be >= M".into(),
            });
        }
        self.m0 = m0;
        Ok(self)
    }

    pub fn with_ef_construction(mut self, ef_construction: u32) -> Result<Self> {
        if ef_construction == 0 {
            return Err(Error::InvalidParameter {
                name: "efConstruction".into(),
                reason: "must be >= 1".into(),
            });
        }
        self.ef_construction = ef_construction;
        Ok(self)
    }

    pub fn with_delaunay_type(mut self, delaunay_type: DelaunayType) -> Self {
        self.delaunay_type = delaunay_type;
        self
    }

    pub fn with_index_thread_qty(mut self, n: u32) -> Result<Self> {
        if n == 0 {
            return Err(Error::InvalidParameter {
                name: "indexThreadQty".into(),
                reason: "must be >= 1".into(),
            });
        }
        self.index_thread_qty = n;
        Ok(self)
    }

    pub fn with_use_proxy_dist(mut self, use_proxy_dist: bool) -> Self {
        self.use_proxy_dist = use_proxy_dist;
        self
    }

    pub fn with_search_method(mut self, search_method: SearchMethod) -> Self {
        self.search_method = search_method;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// `level_mult = 1 / ln(M)`, the scale of the geometric level
    /// distribution new nodes draw their max layer from.
    pub fn level_mult(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }
}

/// `set_query_time_params` payload.
#[derive(Debug, Clone, Copy)]
pub struct QueryTimeParams {
    pub ef: u32,
    pub search_method: SearchMethod,
}

impl Default for QueryTimeParams {
    fn default() -> Self {
        Self {
            ef: 10,
            search_method: SearchMethod::Old,
        }
    }
}
