//! Mesh cache configuration.

use crate::error::MeshCacheError;
use crate::types::{ALLOC_UNIT, BufferUpdate, align_to_unit};

/// Smallest growth granularity the cache works with.
pub const MIN_GRANULARITY: u64 = 16 * 1024;

/// Smallest budget of bytes that may be evicted within one lock session.
pub const MIN_LOCK_EVICT_SIZE_LIMIT: u64 = 256 * 1024;

/// Memory budgets of a mesh cache.
///
/// Every byte budget covers vertex and index storage together; the cache
/// splits it between the two buffer sets (see
/// [`split_vertex_index`](Self::split_vertex_index)).
///
/// # Example
///
/// ```
/// use redlilium_mesh_cache::CacheParams;
///
/// let params = CacheParams::new()
///     .with_mem_reserve(1024 * 1024)
///     .with_mem_granularity(256 * 1024)
///     .with_mem_limit(4 * 1024 * 1024);
/// assert!(params.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CacheParams {
    /// Always-resident capacity, allocated at initialization.
    pub mem_reserve: u64,
    /// Size of every buffer grown on demand.
    pub mem_granularity: u64,
    /// Ceiling for the total size of all buffers.
    pub mem_limit: u64,
    /// Bytes of `LruTail` items kept when the cache could grow instead.
    pub lru_tail_size: u64,
    /// Vertex bytes that may be evicted between `lock_buffers` and
    /// `unlock_buffers` before allocations start failing.
    pub lock_evict_size_limit: u64,
    /// Force a buffer-update strategy instead of picking the best one.
    pub buffer_update: Option<BufferUpdate>,
}

impl Default for CacheParams {
    fn default() -> Self {
        Self {
            mem_reserve: 2 * 1024 * 1024,
            mem_granularity: 512 * 1024,
            mem_limit: 8 * 1024 * 1024,
            lru_tail_size: 2 * 1024 * 1024,
            lock_evict_size_limit: MIN_LOCK_EVICT_SIZE_LIMIT,
            buffer_update: None,
        }
    }
}

impl CacheParams {
    /// Create parameters with default budgets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reserve size.
    pub fn with_mem_reserve(mut self, size: u64) -> Self {
        self.mem_reserve = size;
        self
    }

    /// Set the growth granularity.
    pub fn with_mem_granularity(mut self, size: u64) -> Self {
        self.mem_granularity = size;
        self
    }

    /// Set the memory ceiling.
    pub fn with_mem_limit(mut self, size: u64) -> Self {
        self.mem_limit = size;
        self
    }

    /// Set the `LruTail` budget.
    pub fn with_lru_tail_size(mut self, size: u64) -> Self {
        self.lru_tail_size = size;
        self
    }

    /// Set the evicted-while-locked budget.
    pub fn with_lock_evict_size_limit(mut self, size: u64) -> Self {
        self.lock_evict_size_limit = size;
        self
    }

    /// Force a buffer-update strategy.
    pub fn with_buffer_update(mut self, strategy: BufferUpdate) -> Self {
        self.buffer_update = Some(strategy);
        self
    }

    /// Check the parameters before use.
    pub fn validate(&self) -> Result<(), MeshCacheError> {
        if self.mem_granularity == 0 {
            return Err(MeshCacheError::InvalidParameter(
                "mem_granularity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Normalize the parameters to what the cache supports.
    pub fn adjusted(&self) -> Self {
        let mem_granularity = align_to_unit(self.mem_granularity.max(MIN_GRANULARITY));
        let mem_reserve = align_to_unit(self.mem_reserve);
        Self {
            mem_reserve,
            mem_granularity,
            mem_limit: self.mem_limit.max(mem_reserve),
            lru_tail_size: self.lru_tail_size,
            lock_evict_size_limit: self.lock_evict_size_limit.max(MIN_LOCK_EVICT_SIZE_LIMIT),
            buffer_update: self.buffer_update,
        }
    }

    /// Split a byte budget into its vertex and index parts (5:4).
    ///
    /// Both parts are whole allocation units.
    pub fn split_vertex_index(size: u64) -> (u64, u64) {
        let units = size / ALLOC_UNIT;
        let vertex_units = units * 5 / 9;
        (
            vertex_units * ALLOC_UNIT,
            (units - vertex_units) * ALLOC_UNIT,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_vertex_index() {
        assert_eq!(
            CacheParams::split_vertex_index(1024 * 1024),
            (582_528, 466_048)
        );
        assert_eq!(CacheParams::split_vertex_index(256 * 1024), (145_632, 116_512));
        assert_eq!(CacheParams::split_vertex_index(0), (0, 0));
    }

    #[test]
    fn test_adjusted_clamps() {
        let params = CacheParams::new()
            .with_mem_reserve(1000)
            .with_mem_granularity(100)
            .with_mem_limit(10)
            .with_lock_evict_size_limit(1);
        let adjusted = params.adjusted();

        assert_eq!(adjusted.mem_granularity, MIN_GRANULARITY);
        assert_eq!(adjusted.mem_reserve, 1008);
        assert_eq!(adjusted.mem_limit, 1008);
        assert_eq!(adjusted.lock_evict_size_limit, MIN_LOCK_EVICT_SIZE_LIMIT);
    }

    #[test]
    fn test_validate() {
        assert!(CacheParams::default().validate().is_ok());
        assert!(matches!(
            CacheParams::new().with_mem_granularity(0).validate(),
            Err(MeshCacheError::InvalidParameter(_))
        ));
    }
}
