//! Approximate nearest-neighbor search over arbitrary distance functions,
//! built around a concurrent Hierarchical Navigable Small World graph.

pub mod error;
pub mod index;
pub mod io;
pub mod node;
pub mod object;
pub mod params;
pub mod queue;
pub mod space;
pub mod store;
pub mod visited;
pub mod worker;

pub use error::{Error, Result};
pub use index::{DeleteStrategy, HnswIndex};
pub use node::HnswNode;
pub use object::Object;
pub use params::{DelaunayType, HnswParams, QueryTimeParams, SearchMethod};
pub use queue::{DistanceValue, KnnQueue};
pub use space::{CosineSpace, HammingSpace, L2Space, Space};
pub use visited::VisitedPool;
pub use worker::WorkerPool;

#[cfg(test)]
mod tests;
