//! Cache usage statistics.

/// Usage of one buffer set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Bytes across all buffers.
    pub total_size: u64,
    /// Bytes handed out to items, including pending-free ones.
    pub used_size: u64,
}

impl PoolStats {
    /// Bytes still free.
    pub fn free_size(&self) -> u64 {
        self.total_size - self.used_size
    }
}

/// Snapshot of a [`MeshCache`](super::MeshCache).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshCacheStats {
    /// Vertex buffer usage.
    pub vertex: PoolStats,
    /// Index buffer usage.
    pub index: PoolStats,
    /// Number of live buffers of both kinds.
    pub buffer_count: usize,
    /// Number of live items, including pending-free ones.
    pub item_count: usize,
    /// Whether the buffers live in device memory.
    pub gpu_memory: bool,
}

impl MeshCacheStats {
    /// Total bytes across both kinds.
    pub fn total_size(&self) -> u64 {
        self.vertex.total_size + self.index.total_size
    }

    /// Used bytes across both kinds.
    pub fn used_size(&self) -> u64 {
        self.vertex.used_size + self.index.used_size
    }
}

static_assertions::assert_impl_all!(MeshCacheStats: Send, Sync, Copy);
