//! Cache items: one mesh's live allocation.

use crate::resources::BufferId;
use crate::sync::FenceTracker;
use crate::types::BufferKind;

use super::Tier;

/// Handle to an item of a [`MeshCache`](super::MeshCache).
///
/// Handles are generational: once the item is freed, the handle stops
/// resolving even if its slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheItemHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// The part of one buffer owned by an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRange {
    /// Owning buffer. Cleared when the buffer was destroyed while the item
    /// was still waiting on its fence.
    pub buffer: Option<BufferId>,
    /// Byte offset inside the buffer.
    pub offset: u64,
    /// Allocated size in bytes (a whole number of allocation units).
    pub size: u64,
}

/// One cached mesh.
#[derive(Debug, Clone)]
pub struct CacheItem {
    pub(crate) vertex: Option<ItemRange>,
    pub(crate) index: Option<ItemRange>,
    pub(crate) vertex_bytes: u64,
    pub(crate) vertex_count: u32,
    pub(crate) index_count: u32,
    pub(crate) tier: Tier,
    pub(crate) fences: FenceTracker,
    pub(crate) destroyed: bool,
}

impl CacheItem {
    pub(crate) fn new(
        vertex: Option<ItemRange>,
        index: Option<ItemRange>,
        vertex_bytes: u64,
        vertex_count: u32,
        index_count: u32,
    ) -> Self {
        Self {
            vertex,
            index,
            vertex_bytes,
            vertex_count,
            index_count,
            tier: Tier::ThisFrame,
            fences: FenceTracker::new(),
            destroyed: false,
        }
    }

    /// Get the vertex range, if the mesh has vertex data.
    pub fn vertex_range(&self) -> Option<ItemRange> {
        self.vertex
    }

    /// Get the index range, if the mesh has index data.
    pub fn index_range(&self) -> Option<ItemRange> {
        self.index
    }

    /// Get the range of one kind.
    pub fn range(&self, kind: BufferKind) -> Option<ItemRange> {
        match kind {
            BufferKind::Vertex => self.vertex,
            BufferKind::Index => self.index,
        }
    }

    pub(crate) fn range_mut(&mut self, kind: BufferKind) -> &mut Option<ItemRange> {
        match kind {
            BufferKind::Vertex => &mut self.vertex,
            BufferKind::Index => &mut self.index,
        }
    }

    /// Requested vertex data size in bytes.
    pub fn vertex_bytes(&self) -> u64 {
        self.vertex_bytes
    }

    /// Index data size in bytes.
    pub fn index_bytes(&self) -> u64 {
        u64::from(self.index_count) * crate::types::INDEX_SIZE
    }

    /// Get the number of vertices.
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Get the number of indices.
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Get the tier the item currently belongs to.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Get the recorded GPU uses.
    pub fn fences(&self) -> &FenceTracker {
        &self.fences
    }

    /// Whether the item was evicted and only waits for its fence.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Bytes held in both buffers.
    pub fn allocated_size(&self) -> u64 {
        self.vertex.map_or(0, |r| r.size) + self.index.map_or(0, |r| r.size)
    }

    /// Whether any range of this item lives in the given buffer.
    pub fn uses_buffer(&self, kind: BufferKind, buffer: BufferId) -> bool {
        self.range(kind).is_some_and(|r| r.buffer == Some(buffer))
    }
}

static_assertions::assert_impl_all!(CacheItemHandle: Send, Sync, Copy);
static_assertions::assert_impl_all!(CacheItem: Send, Sync);
