//! # RedLilium Mesh Cache
//!
//! GPU mesh cache for RedLilium: sub-allocates vertex and index storage out
//! of a few large buffers and evicts stale meshes under memory pressure.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`MeshCache`] - Allocation, locking, eviction and per-frame bookkeeping
//! - [`MeshDevice`] - Trait the graphics backend implements for buffer
//!   storage, mapping and fences
//! - [`DummyDevice`] - CPU-only device for tests and headless runs
//! - [`resources`] - Range allocator, buffers and buffer sets
//!
//! Items age through four tiers (`ThisFrame`, `PrevFrame`, `LruTail`,
//! `PendingFree`). Memory the GPU may still read is never reused: items
//! evicted while their fence is pending wait in `PendingFree`.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use redlilium_mesh_cache::{AllocRequest, CacheParams, DummyDevice, MeshCache};
//!
//! let device = Arc::new(DummyDevice::new());
//! let mut cache = MeshCache::new(device, CacheParams::default()).unwrap();
//!
//! let item = cache
//!     .alloc_cache_item(&AllocRequest::new(1024, 64, 96), false)
//!     .unwrap();
//! cache.unlock_buffers().unwrap();
//! cache.end_frame();
//! assert!(cache.is_resident(item));
//! ```

pub mod cache;
pub mod device;
pub mod error;
pub mod resources;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use cache::{
    AllocRequest, CacheItem, CacheItemHandle, CacheParams, ItemRange, MeshCache, MeshCacheStats,
    MeshWriteRegion, PoolStats, Tier,
};
pub use device::{DeviceCaps, DummyDevice, FenceToken, GpuBufferId, MapMode, MeshDevice};
pub use error::{AllocError, DeviceError, MeshCacheError};
pub use sync::{FenceState, FenceTracker};
pub use types::{AllocClass, BufferKind, BufferUpdate, ByteRange, FenceKind, IndexType};

/// Mesh cache library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the mesh cache subsystem.
pub fn init() {
    log::info!("RedLilium Mesh Cache v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_device() {
        let device = DummyDevice::new();
        assert_eq!(device.name(), "Dummy Mesh Device");
        assert!(device.capabilities().contains(DeviceCaps::FENCES));
    }
}
