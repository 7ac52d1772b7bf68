//! The mesh cache and its bookkeeping.
//!
//! - [`MeshCache`] - the orchestrator the renderer talks to
//! - [`CacheListSet`] - recency tiers and the eviction policy
//! - [`CacheItem`] - one mesh's vertex and index ranges
//! - [`CacheParams`] - memory budgets

mod item;
mod list;
mod mesh_cache;
mod params;
mod stats;

pub use item::{CacheItem, CacheItemHandle, ItemRange};
pub use list::{CacheListSet, Tier};
pub use mesh_cache::{AllocRequest, MeshCache, MeshWriteRegion};
pub use params::{CacheParams, MIN_GRANULARITY, MIN_LOCK_EVICT_SIZE_LIMIT};
pub use stats::{MeshCacheStats, PoolStats};

pub(crate) use list::ItemReclaimer;
