//! Common utilities for mesh cache integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use redlilium_mesh_cache::{
    AllocRequest, BufferKind, BufferUpdate, CacheItemHandle, CacheParams, DummyDevice,
    MeshCache, MeshDevice,
};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * 1024;

/// Install the test logger once; `RUST_LOG` controls verbosity.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 1 MiB reserve growing by 256 KiB up to 4 MiB.
pub fn scenario_params() -> CacheParams {
    CacheParams::new()
        .with_mem_reserve(MIB)
        .with_mem_granularity(256 * KIB)
        .with_mem_limit(4 * MIB)
        .with_lru_tail_size(MIB)
}

/// Create a dummy device and a cache on it.
pub fn create_cache(params: CacheParams) -> (Arc<DummyDevice>, MeshCache) {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let cache = MeshCache::new(device.clone(), params).expect("cache creation failed");
    (device, cache)
}

/// Create a cache using a forced buffer-update strategy.
pub fn create_cache_with(strategy: BufferUpdate) -> (Arc<DummyDevice>, MeshCache) {
    create_cache(scenario_params().with_buffer_update(strategy))
}

/// A mesh with `vertex_size` vertex bytes (20-byte vertices) and `index_count` indices.
pub fn request(vertex_size: u64, index_count: u32) -> AllocRequest {
    AllocRequest::new(vertex_size, (vertex_size / 20) as u32, index_count)
}

/// Allocate `count` identical items, panicking on failure.
pub fn alloc_many(cache: &mut MeshCache, count: usize, req: AllocRequest) -> Vec<CacheItemHandle> {
    (0..count)
        .map(|i| {
            cache
                .alloc_cache_item(&req, false)
                .unwrap_or_else(|err| panic!("allocation {i} failed: {err}"))
        })
        .collect()
}

/// Deterministic test pattern for byte `i` of item `seed`.
pub fn pattern(seed: u32, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed) as u8)
        .collect()
}

/// Read an item's bytes of one kind back from device memory.
pub fn read_back(
    device: &DummyDevice,
    cache: &MeshCache,
    item: CacheItemHandle,
    kind: BufferKind,
) -> Option<Vec<u8>> {
    let range = cache.item(item)?.range(kind)?;
    let len = match kind {
        BufferKind::Vertex => cache.item(item)?.vertex_bytes(),
        BufferKind::Index => cache.item(item)?.index_bytes(),
    } as usize;
    let data = match cache.gpu_buffer(item, kind) {
        Some(gpu) => device.read_buffer(gpu)?,
        None => {
            let buffer = cache.buffers(kind).buffer(range.buffer?)?;
            buffer.client_data()?.to_vec()
        }
    };
    let start = range.offset as usize;
    Some(data[start..start + len].to_vec())
}

/// Whether the device has any fence still in flight.
pub fn has_pending_fence(device: &DummyDevice) -> bool {
    device
        .last_fence()
        .is_some_and(|fence| device.is_fence_pending(fence))
}
