//! The mesh cache orchestrator.

use std::sync::Arc;

use crate::device::{DeviceCaps, FenceToken, GpuBufferId, MeshDevice};
use crate::error::{AllocError, DeviceError, MeshCacheError};
use crate::resources::{BufferId, BufferSet, MeshBuffer};
use crate::types::{
    ALLOC_UNIT, AllocClass, BufferKind, BufferUpdate, ByteRange, FenceKind, INDEX_SIZE,
    IndexType, align_to_unit,
};

use super::{
    CacheItem, CacheItemHandle, CacheListSet, CacheParams, ItemRange, ItemReclaimer,
    MIN_GRANULARITY, MeshCacheStats, PoolStats, Tier,
};

/// Sizes of a mesh to cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocRequest {
    /// Vertex data size in bytes.
    pub vertex_size: u64,
    /// Number of vertices.
    pub vertex_count: u32,
    /// Number of indices.
    pub index_count: u32,
}

impl AllocRequest {
    /// Create a new allocation request.
    pub fn new(vertex_size: u64, vertex_count: u32, index_count: u32) -> Self {
        Self {
            vertex_size,
            vertex_count,
            index_count,
        }
    }

    /// Index data size in bytes.
    pub fn index_size(&self) -> u64 {
        u64::from(self.index_count) * INDEX_SIZE
    }
}

/// CPU-writable view of one item's vertex and index data.
///
/// Valid until the cache is touched again; the data reaches the GPU on
/// [`MeshCache::unlock_buffers`].
#[derive(Debug)]
pub struct MeshWriteRegion<'a> {
    vertices: &'a mut [u8],
    indices: &'a mut [u8],
}

impl MeshWriteRegion<'_> {
    /// Raw vertex bytes of the item.
    pub fn vertex_data(&mut self) -> &mut [u8] {
        &mut *self.vertices
    }

    /// Raw index bytes of the item.
    pub fn index_data(&mut self) -> &mut [u8] {
        &mut *self.indices
    }

    /// Copy vertices to the start of the vertex range.
    pub fn write_vertices<T: bytemuck::Pod>(&mut self, vertices: &[T]) -> Result<(), MeshCacheError> {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        if bytes.len() > self.vertices.len() {
            return Err(MeshCacheError::InvalidParameter(format!(
                "{} vertex bytes do not fit a {}-byte range",
                bytes.len(),
                self.vertices.len()
            )));
        }
        self.vertices[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy indices to the start of the index range.
    pub fn write_indices(&mut self, indices: &[IndexType]) -> Result<(), MeshCacheError> {
        let bytes: &[u8] = bytemuck::cast_slice(indices);
        if bytes.len() > self.indices.len() {
            return Err(MeshCacheError::InvalidParameter(format!(
                "{} indices do not fit a {}-byte range",
                indices.len(),
                self.indices.len()
            )));
        }
        self.indices[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// Buffer storage and the device, split from the item lists so eviction can
/// borrow both at once.
struct Storage {
    device: Arc<dyn MeshDevice>,
    vertex: BufferSet,
    index: BufferSet,
    /// Vertex bytes evicted since the last `lock_buffers`.
    evicted_in_lock: u64,
}

impl Storage {
    fn set(&self, kind: BufferKind) -> &BufferSet {
        match kind {
            BufferKind::Vertex => &self.vertex,
            BufferKind::Index => &self.index,
        }
    }

    fn set_mut(&mut self, kind: BufferKind) -> &mut BufferSet {
        match kind {
            BufferKind::Vertex => &mut self.vertex,
            BufferKind::Index => &mut self.index,
        }
    }

    fn total_size(&self) -> u64 {
        self.vertex.total_size() + self.index.total_size()
    }

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        size: u64,
        class: AllocClass,
        strategy: BufferUpdate,
    ) -> Result<BufferId, DeviceError> {
        let set = match kind {
            BufferKind::Vertex => &mut self.vertex,
            BufferKind::Index => &mut self.index,
        };
        set.create_buffer(size, class, self.device.as_ref(), strategy)
    }

    fn destroy_buffers(&mut self, class: Option<AllocClass>, lost: bool) {
        self.vertex
            .destroy_buffers(class, lost, self.device.as_ref());
        self.index.destroy_buffers(class, lost, self.device.as_ref());
    }

    fn unmap_all(&mut self, strategy: BufferUpdate) {
        self.vertex.unmap_all(self.device.as_ref(), strategy);
        self.index.unmap_all(self.device.as_ref(), strategy);
    }
}

impl ItemReclaimer for Storage {
    fn is_pending(&self, item: &CacheItem) -> bool {
        item.fences.is_pending(FenceKind::Vertex, self.device.as_ref())
    }

    fn wait(&self, item: &CacheItem) {
        item.fences.wait(FenceKind::Vertex, self.device.as_ref());
    }

    fn release(&mut self, item: &CacheItem, target: Option<BufferKind>) -> u64 {
        let vertex = item
            .vertex
            .map_or(0, |r| self.vertex.free(r.size, r.buffer, r.offset));
        let index = item
            .index
            .map_or(0, |r| self.index.free(r.size, r.buffer, r.offset));

        // Reclaiming an already destroyed item discards no live data.
        if !item.destroyed {
            self.evicted_in_lock += item.vertex.map_or(0, |r| r.size);
        }

        match target {
            Some(BufferKind::Vertex) => vertex,
            Some(BufferKind::Index) => index,
            None => vertex + index,
        }
    }
}

/// A buffer removed from its set while items inside it were still in use
/// by the GPU.
struct RetiredBuffer {
    buffer: MeshBuffer,
    fences: Vec<FenceToken>,
}

/// GPU mesh cache.
///
/// Sub-allocates vertex and index ranges out of a few large buffers, ages
/// items through the [`Tier`]s once per frame and evicts the least valuable
/// ones under memory pressure, never reusing memory the GPU may still read.
///
/// # Frame protocol
///
/// ```
/// use std::sync::Arc;
/// use redlilium_mesh_cache::{AllocRequest, CacheParams, DummyDevice, FenceKind, MeshCache};
///
/// let device = Arc::new(DummyDevice::new());
/// let mut cache = MeshCache::new(device, CacheParams::default()).unwrap();
///
/// // Allocation locks the buffers implicitly.
/// let item = cache
///     .alloc_cache_item(&AllocRequest::new(48, 3, 3), false)
///     .unwrap();
/// let mut region = cache.lock_mesh_cache_item(item).unwrap();
/// region.write_vertices(&[0.0f32; 12]).unwrap();
/// region.write_indices(&[0, 1, 2]).unwrap();
/// cache.unlock_buffers().unwrap();
///
/// // After submitting the draw that reads the item:
/// cache.fence_item(item, FenceKind::Vertex).unwrap();
/// cache.end_frame();
/// ```
pub struct MeshCache {
    storage: Storage,
    lists: CacheListSet,
    params: CacheParams,
    strategy: BufferUpdate,
    locked: bool,
    initialized: bool,
    /// On-demand buffers of both kinds, oldest first.
    chunks: Vec<(BufferKind, BufferId)>,
    pending_destruction: Vec<RetiredBuffer>,
}

impl MeshCache {
    /// Create a cache and allocate its reserve.
    pub fn new(device: Arc<dyn MeshDevice>, params: CacheParams) -> Result<Self, MeshCacheError> {
        params.validate()?;
        let params = params.adjusted();
        let (vertex_granularity, index_granularity) =
            CacheParams::split_vertex_index(params.mem_granularity);

        let mut cache = Self {
            storage: Storage {
                device: Arc::clone(&device),
                vertex: BufferSet::new(BufferKind::Vertex, vertex_granularity),
                index: BufferSet::new(BufferKind::Index, index_granularity),
                evicted_in_lock: 0,
            },
            lists: CacheListSet::new(),
            params,
            strategy: BufferUpdate::MapUnsynchronized,
            locked: false,
            initialized: false,
            chunks: Vec::new(),
            pending_destruction: Vec::new(),
        };
        cache.initialize(device)?;
        Ok(cache)
    }

    /// Prepare the cache for use on a device.
    ///
    /// Picks the buffer-update strategy and allocates the reserve. Failing to
    /// allocate the reserve is fatal.
    pub fn initialize(&mut self, device: Arc<dyn MeshDevice>) -> Result<(), MeshCacheError> {
        if self.initialized {
            self.reset(false);
        }
        self.storage.device = device;

        self.strategy = select_strategy(self.storage.device.capabilities(), &self.params)
            .ok_or_else(|| {
                MeshCacheError::InitializationFailed(format!(
                    "device '{}' supports no usable buffer update method",
                    self.storage.device.name()
                ))
            })?;
        self.apply_granularity();

        if let Err(err) = self.alloc_cache_buffers(self.params.mem_reserve, AllocClass::Reserve) {
            self.storage.destroy_buffers(None, false);
            return Err(MeshCacheError::InitializationFailed(format!(
                "reserve of {} bytes could not be allocated: {err}",
                self.params.mem_reserve
            )));
        }

        self.initialized = true;
        log::debug!(
            "MeshCache: initialized on '{}' ({:?}, reserve: {}K, granularity: {}K, limit: {}K)",
            self.storage.device.name(),
            self.strategy,
            self.params.mem_reserve / 1024,
            self.params.mem_granularity / 1024,
            self.params.mem_limit / 1024
        );
        Ok(())
    }

    /// Release every buffer, including the reserve.
    ///
    /// With `lost` set the device context is gone: bookkeeping is dropped
    /// without touching the device. The cache must be initialized again
    /// before use.
    pub fn reset(&mut self, lost: bool) {
        if !self.initialized {
            return;
        }
        if !lost {
            self.lists.evict_all(&mut self.storage);
        }
        self.lists = CacheListSet::new();
        self.storage.destroy_buffers(None, lost);
        for retired in std::mem::take(&mut self.pending_destruction) {
            retired.buffer.destroy(self.storage.device.as_ref(), lost);
        }
        self.chunks.clear();
        self.locked = false;
        self.storage.evicted_in_lock = 0;
        self.initialized = false;
        log::debug!("MeshCache: reset (lost: {lost})");
    }

    /// Replace the parameters.
    ///
    /// Evicts every item. A change of reserve, granularity or forced update
    /// strategy rebuilds the buffers; if the new reserve cannot be
    /// allocated the previous one is restored and an error returned.
    pub fn set_params(&mut self, params: CacheParams) -> Result<(), MeshCacheError> {
        params.validate()?;
        let params = params.adjusted();

        if !self.initialized {
            self.params = params;
            self.apply_granularity();
            return Ok(());
        }

        let strategy = select_strategy(self.storage.device.capabilities(), &params)
            .ok_or_else(|| {
                MeshCacheError::InvalidParameter(format!(
                    "buffer update {:?} is not supported by the device",
                    params.buffer_update
                ))
            })?;

        if self.locked {
            log::warn!("MeshCache: set_params called while locked; unlocking");
            self.unlock_internal();
        }
        self.lists.evict_all(&mut self.storage);

        if params.mem_reserve != self.params.mem_reserve
            || params.mem_granularity != self.params.mem_granularity
            || strategy != self.strategy
        {
            self.retire_buffers(None);
            let previous = std::mem::replace(&mut self.params, params);
            let previous_strategy = std::mem::replace(&mut self.strategy, strategy);
            self.apply_granularity();

            if let Err(err) = self.alloc_cache_buffers(self.params.mem_reserve, AllocClass::Reserve) {
                self.params = previous;
                self.strategy = previous_strategy;
                self.apply_granularity();
                if let Err(restore) =
                    self.alloc_cache_buffers(self.params.mem_reserve, AllocClass::Reserve)
                {
                    log::error!("MeshCache: could not restore the previous reserve: {restore}");
                }
                return Err(err.into());
            }
            log::debug!(
                "MeshCache: rebuilt buffers (reserve: {}K, granularity: {}K)",
                self.params.mem_reserve / 1024,
                self.params.mem_granularity / 1024
            );
        } else {
            self.params = params;
        }
        Ok(())
    }

    /// Open the buffers for allocation and CPU writes.
    ///
    /// Starts a new evicted-while-locked budget.
    pub fn lock_buffers(&mut self) -> Result<(), MeshCacheError> {
        if !self.initialized {
            return Err(MeshCacheError::NotInitialized);
        }
        if self.locked {
            return Err(MeshCacheError::AlreadyLocked);
        }
        self.locked = true;
        self.storage.evicted_in_lock = 0;
        log::trace!("MeshCache: buffers locked");
        Ok(())
    }

    /// Make every write since [`lock_buffers`](Self::lock_buffers) visible
    /// to the GPU.
    pub fn unlock_buffers(&mut self) -> Result<(), MeshCacheError> {
        if !self.locked {
            return Err(MeshCacheError::NotLocked);
        }
        self.unlock_internal();
        Ok(())
    }

    fn unlock_internal(&mut self) {
        self.storage.unmap_all(self.strategy);
        self.locked = false;
        log::trace!("MeshCache: buffers unlocked");
    }

    /// Allocate storage for a mesh.
    ///
    /// Locks the buffers if needed. With `wait_for_cache` set, the cache may
    /// block on GPU fences of this frame's items to make room.
    pub fn alloc_cache_item(
        &mut self,
        request: &AllocRequest,
        wait_for_cache: bool,
    ) -> Result<CacheItemHandle, AllocError> {
        if !self.locked && self.lock_buffers().is_err() {
            return Err(AllocError::StateError);
        }

        let vertex_size = align_to_unit(request.vertex_size);
        let index_size = align_to_unit(request.index_size());

        let vertex = if vertex_size > 0 {
            match self.alloc_buffer(BufferKind::Vertex, vertex_size, wait_for_cache) {
                Some((buffer, offset)) => Some(ItemRange {
                    buffer: Some(buffer),
                    offset,
                    size: vertex_size,
                }),
                None => return Err(self.alloc_failure(BufferKind::Vertex, vertex_size)),
            }
        } else {
            None
        };

        let index = if index_size > 0 {
            match self.alloc_buffer(BufferKind::Index, index_size, wait_for_cache) {
                Some((buffer, offset)) => Some(ItemRange {
                    buffer: Some(buffer),
                    offset,
                    size: index_size,
                }),
                None => {
                    if let Some(r) = vertex {
                        self.storage.vertex.free(r.size, r.buffer, r.offset);
                    }
                    return Err(self.alloc_failure(BufferKind::Index, index_size));
                }
            }
        } else {
            None
        };

        let item = CacheItem::new(
            vertex,
            index,
            request.vertex_size,
            request.vertex_count,
            request.index_count,
        );
        Ok(self.lists.insert(item))
    }

    fn alloc_failure(&self, kind: BufferKind, size: u64) -> AllocError {
        if self.storage.set(kind).check_allocation_size(size) {
            log::debug!("MeshCache: no room for {size} {} bytes", kind.name());
            AllocError::Fail
        } else {
            log::warn!(
                "MeshCache: {size} {} bytes exceed the growth granularity of {}",
                kind.name(),
                self.storage.set(kind).granularity()
            );
            AllocError::TooBig
        }
    }

    /// Find `size` bytes in one buffer set, reclaiming memory as needed.
    fn alloc_buffer(
        &mut self,
        kind: BufferKind,
        size: u64,
        wait_for_cache: bool,
    ) -> Option<(BufferId, u64)> {
        let storage = &mut self.storage;
        let lists = &mut self.lists;
        let target = Some(kind);

        if let Some(found) = storage.set_mut(kind).alloc(size) {
            return Some(found);
        }

        // Pending-free items are already dead; reclaiming them costs nothing.
        let mut need_more_space = !lists.evict_pending_free(storage, target, size, false);

        if need_more_space && storage.total_size() + MIN_GRANULARITY <= self.params.mem_limit {
            if lists.evict_lru_till_limit(storage, target, size, self.params.lru_tail_size) {
                need_more_space = false;
            } else {
                let granularity = storage.set(kind).granularity();
                if size > granularity {
                    return None;
                }
                let headroom = self.params.mem_limit - storage.total_size();
                let alloc_size = headroom.min(granularity) & !(ALLOC_UNIT - 1);
                if size <= alloc_size {
                    match storage.create_buffer(kind, alloc_size, AllocClass::Chunk, self.strategy) {
                        Ok(buffer) => {
                            self.chunks.push((kind, buffer));
                            need_more_space = false;
                            log::debug!(
                                "MeshCache: grew {} buffers by {}K, total {}K",
                                kind.name(),
                                alloc_size / 1024,
                                storage.total_size() / 1024
                            );
                        }
                        Err(err) => {
                            log::debug!("MeshCache: growing {} buffers failed: {err}", kind.name());
                        }
                    }
                }
            }
        }

        if need_more_space && lists.evict_lru(storage, target, size) {
            need_more_space = false;
        }

        if storage.evicted_in_lock > self.params.lock_evict_size_limit {
            log::warn!(
                "MeshCache: {}K evicted while locked exceeds the {}K budget",
                storage.evicted_in_lock / 1024,
                self.params.lock_evict_size_limit / 1024
            );
            return None;
        }

        if need_more_space && lists.evict_mru(storage, Tier::PrevFrame, target, size, false) {
            need_more_space = false;
        }

        if need_more_space
            && wait_for_cache
            && lists.evict_mru(storage, Tier::ThisFrame, target, size, true)
        {
            need_more_space = false;
        }

        if need_more_space
            && wait_for_cache
            && lists.evict_pending_free(storage, target, size, true)
        {
            need_more_space = false;
        }

        if need_more_space {
            return None;
        }

        let found = storage.set_mut(kind).alloc(size);
        if found.is_none() {
            log::error!(
                "MeshCache: expected room for {size} {} bytes, but allocation failed",
                kind.name()
            );
        }
        found
    }

    /// Open an item's ranges for CPU writes.
    ///
    /// Maps the owning buffers if needed; locks the buffers if needed.
    pub fn lock_mesh_cache_item(
        &mut self,
        handle: CacheItemHandle,
    ) -> Result<MeshWriteRegion<'_>, MeshCacheError> {
        if !self.locked {
            self.lock_buffers()?;
        }

        let item = self.lists.get(handle).ok_or(MeshCacheError::InvalidHandle)?;
        if item.destroyed {
            return Err(MeshCacheError::ItemDestroyed);
        }
        let vertex = item.vertex.map(|r| (r, item.vertex_bytes()));
        let index = item.index.map(|r| (r, item.index_bytes()));

        let strategy = self.strategy;
        let Storage {
            device,
            vertex: vertex_set,
            index: index_set,
            ..
        } = &mut self.storage;

        let vertices = map_item_range(vertex_set, device.as_ref(), strategy, vertex)?;
        let indices = map_item_range(index_set, device.as_ref(), strategy, index)?;
        Ok(MeshWriteRegion { vertices, indices })
    }

    /// Evict one item. Returns the bytes released right away (0 if the item
    /// is still in use by the GPU and was parked as pending-free).
    pub fn evict(&mut self, handle: CacheItemHandle) -> Result<u64, MeshCacheError> {
        if !self.lists.contains(handle) {
            return Err(MeshCacheError::InvalidHandle);
        }
        Ok(self.lists.evict(handle, &mut self.storage, None))
    }

    /// Mark an item as used this frame.
    pub fn touch(&mut self, handle: CacheItemHandle) -> Result<(), MeshCacheError> {
        let item = self.lists.get(handle).ok_or(MeshCacheError::InvalidHandle)?;
        if item.destroyed {
            return Err(MeshCacheError::ItemDestroyed);
        }
        self.lists.move_to_front(handle, Tier::ThisFrame);
        Ok(())
    }

    /// Record that a submitted draw reads an item.
    ///
    /// Returns the inserted fence, or `None` if the device has no fences.
    /// Evicted items cannot be fenced again.
    pub fn fence_item(
        &mut self,
        handle: CacheItemHandle,
        kind: FenceKind,
    ) -> Result<Option<FenceToken>, MeshCacheError> {
        let item = self.lists.get(handle).ok_or(MeshCacheError::InvalidHandle)?;
        if item.destroyed {
            return Err(MeshCacheError::ItemDestroyed);
        }
        if !self
            .storage
            .device
            .capabilities()
            .contains(DeviceCaps::FENCES)
        {
            return Ok(None);
        }
        let token = self.storage.device.insert_fence();
        if let Some(item) = self.lists.get_mut(handle) {
            item.fences.set(kind, token);
        }
        Ok(Some(token))
    }

    /// Advance to the next frame.
    ///
    /// Ages the tiers, reclaims pending-free items whose fence cleared,
    /// destroys retired buffers that are no longer in use and shrinks the
    /// cache if it holds much more than recent frames needed.
    pub fn end_frame(&mut self) {
        if self.locked {
            log::warn!("MeshCache: end_frame called with locked buffers; unlocking");
            self.unlock_internal();
        }
        if !self.initialized {
            return;
        }

        self.lists.end_frame();
        self.lists
            .evict_pending_free(&mut self.storage, None, 0, false);
        self.destroy_pending_buffers();
        self.shrink();

        log::trace!(
            "MeshCache: end frame (prev: {}, lru: {}, pending: {}, total: {}K)",
            self.lists.tier_len(Tier::PrevFrame),
            self.lists.tier_len(Tier::LruTail),
            self.lists.tier_len(Tier::PendingFree),
            self.storage.total_size() / 1024
        );
    }

    /// Evict everything and destroy all on-demand buffers. The reserve stays.
    pub fn clear_cache(&mut self) {
        if !self.initialized {
            return;
        }
        self.lists.evict_all(&mut self.storage);
        self.retire_buffers(Some(AllocClass::Chunk));
        log::debug!(
            "MeshCache: cleared, total {}K",
            self.storage.total_size() / 1024
        );
    }

    /// Get a usage snapshot.
    pub fn stats(&self) -> MeshCacheStats {
        let pool = |set: &BufferSet| {
            let total_size = set.total_size();
            PoolStats {
                total_size,
                used_size: total_size - set.free_size(),
            }
        };
        MeshCacheStats {
            vertex: pool(&self.storage.vertex),
            index: pool(&self.storage.index),
            buffer_count: self.storage.vertex.len() + self.storage.index.len(),
            item_count: self.lists.len(),
            gpu_memory: self.strategy.uses_device_memory(),
        }
    }

    /// Get an item.
    pub fn item(&self, handle: CacheItemHandle) -> Option<&CacheItem> {
        self.lists.get(handle)
    }

    /// Whether an item still holds usable data.
    pub fn is_resident(&self, handle: CacheItemHandle) -> bool {
        self.lists.get(handle).is_some_and(|item| !item.destroyed)
    }

    /// Get the tier of an item.
    pub fn tier_of(&self, handle: CacheItemHandle) -> Option<Tier> {
        self.lists.get(handle).map(CacheItem::tier)
    }

    /// Bytes held by the items of a tier.
    pub fn tier_size(&self, tier: Tier) -> u64 {
        self.lists.tier_size(tier)
    }

    /// Number of items in a tier.
    pub fn tier_len(&self, tier: Tier) -> usize {
        self.lists.tier_len(tier)
    }

    /// Whether the buffers are locked.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Whether the cache is ready for use.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Get the active buffer-update strategy.
    pub fn buffer_update(&self) -> BufferUpdate {
        self.strategy
    }

    /// Get the (adjusted) parameters.
    pub fn params(&self) -> &CacheParams {
        &self.params
    }

    /// Number of retired buffers waiting for their fences.
    pub fn pending_destruction_count(&self) -> usize {
        self.pending_destruction.len()
    }

    /// Vertex bytes evicted since the last `lock_buffers`.
    pub fn evicted_in_lock(&self) -> u64 {
        self.storage.evicted_in_lock
    }

    /// Get the device.
    pub fn device(&self) -> &Arc<dyn MeshDevice> {
        &self.storage.device
    }

    /// Get the buffer set of one kind.
    pub fn buffers(&self, kind: BufferKind) -> &BufferSet {
        self.storage.set(kind)
    }

    /// Device buffer to bind for an item's range of one kind.
    pub fn gpu_buffer(&self, handle: CacheItemHandle, kind: BufferKind) -> Option<GpuBufferId> {
        let buffer = self.lists.get(handle)?.range(kind)?.buffer?;
        self.storage.set(kind).buffer(buffer)?.gpu_buffer()
    }

    fn apply_granularity(&mut self) {
        let (vertex, index) = CacheParams::split_vertex_index(self.params.mem_granularity);
        self.storage.vertex.set_granularity(vertex);
        self.storage.index.set_granularity(index);
    }

    /// Create one vertex and one index buffer sharing `size` bytes.
    fn alloc_cache_buffers(&mut self, size: u64, class: AllocClass) -> Result<(), DeviceError> {
        let (vertex_size, index_size) = CacheParams::split_vertex_index(size);
        let vertex = if vertex_size > 0 {
            Some(
                self.storage
                    .create_buffer(BufferKind::Vertex, vertex_size, class, self.strategy)?,
            )
        } else {
            None
        };

        if index_size > 0
            && let Err(err) =
                self.storage
                    .create_buffer(BufferKind::Index, index_size, class, self.strategy)
        {
            if let Some(vertex) = vertex {
                self.storage
                    .vertex
                    .destroy_buffer(vertex, self.storage.device.as_ref());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Shrink when the allocated total exceeds what recent frames used by
    /// more than one granularity, newest chunks first.
    fn shrink(&mut self) {
        let frame_size = self.lists.tier_size(Tier::PrevFrame);
        let lru_size = self.lists.tier_size(Tier::LruTail);
        let mut expected = frame_size + lru_size.min(self.params.lru_tail_size);
        expected += expected / 4;

        let granularity = self.params.mem_granularity;
        let mut extra = self.storage.total_size().saturating_sub(expected);

        while extra > granularity {
            let Some((kind, buffer)) = self.chunks.pop() else {
                break;
            };
            extra = extra.saturating_sub(self.release_buffer(kind, buffer));
            log::debug!(
                "MeshCache: shrank to {}K (frame: {}K, lru: {}K)",
                self.storage.total_size() / 1024,
                frame_size / 1024,
                lru_size / 1024
            );
        }
    }

    /// Release every buffer of a class (all when `None`).
    fn retire_buffers(&mut self, class: Option<AllocClass>) {
        for kind in BufferKind::ALL {
            let doomed: Vec<BufferId> = self
                .storage
                .set(kind)
                .buffers()
                .filter(|b| class.is_none_or(|class| b.class() == class))
                .map(MeshBuffer::id)
                .collect();
            for buffer in doomed {
                self.release_buffer(kind, buffer);
            }
        }
        self.chunks
            .retain(|(kind, buffer)| self.storage.set(*kind).buffer(*buffer).is_some());
    }

    /// Evict the items inside a buffer and destroy it, or retire it until
    /// the fences of its remaining items clear. Returns the buffer size.
    fn release_buffer(&mut self, kind: BufferKind, buffer: BufferId) -> u64 {
        let Some(size) = self.storage.set(kind).buffer(buffer).map(MeshBuffer::size) else {
            return 0;
        };
        let device = Arc::clone(&self.storage.device);

        let remaining = self.lists.evict_in_buffer(&mut self.storage, kind, buffer);
        if remaining.is_empty() {
            self.storage
                .set_mut(kind)
                .destroy_buffer(buffer, device.as_ref());
            return size;
        }

        let mut fences = Vec::new();
        for handle in remaining {
            if let Some(item) = self.lists.get_mut(handle) {
                fences.extend(item.fences.pending_tokens(device.as_ref()));
                if let Some(range) = item.range_mut(kind) {
                    range.buffer = None;
                }
            }
        }
        fences.sort_unstable();
        fences.dedup();

        if let Some(retired) = self.storage.set_mut(kind).take_buffer(buffer) {
            log::debug!(
                "MeshCache: {} buffer {} retired until {} fences clear",
                kind.name(),
                buffer.raw(),
                fences.len()
            );
            self.pending_destruction.push(RetiredBuffer {
                buffer: retired,
                fences,
            });
        }
        size
    }

    fn destroy_pending_buffers(&mut self) {
        let device = Arc::clone(&self.storage.device);
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_destruction)
            .into_iter()
            .partition(|retired| {
                retired
                    .fences
                    .iter()
                    .all(|fence| !device.is_fence_pending(*fence))
            });
        self.pending_destruction = waiting;
        for retired in ready {
            retired.buffer.destroy(device.as_ref(), false);
        }
    }
}

impl Drop for MeshCache {
    fn drop(&mut self) {
        self.reset(false);
    }
}

impl std::fmt::Debug for MeshCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshCache")
            .field("device", &self.storage.device.name())
            .field("strategy", &self.strategy)
            .field("params", &self.params)
            .field("locked", &self.locked)
            .field("initialized", &self.initialized)
            .field("stats", &self.stats())
            .finish()
    }
}

fn select_strategy(caps: DeviceCaps, params: &CacheParams) -> Option<BufferUpdate> {
    match params.buffer_update {
        Some(forced) => caps.supports(forced).then_some(forced),
        None => caps.preferred_buffer_update(),
    }
}

fn map_item_range<'a>(
    set: &'a mut BufferSet,
    device: &dyn MeshDevice,
    strategy: BufferUpdate,
    range: Option<(ItemRange, u64)>,
) -> Result<&'a mut [u8], MeshCacheError> {
    let Some((range, bytes)) = range else {
        return Ok(Default::default());
    };
    let id = range.buffer.ok_or(MeshCacheError::ItemDestroyed)?;
    let buffer = set.buffer_mut(id).ok_or(MeshCacheError::InvalidHandle)?;
    Ok(buffer.map_range(device, strategy, ByteRange::new(range.offset, bytes))?)
}
