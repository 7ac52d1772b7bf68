//! Buffer types and descriptors.

/// Granularity of every sub-allocation, in bytes.
///
/// Offsets and sizes handed out by the cache are always multiples of this,
/// which keeps index data naturally aligned and vertex data aligned for any
/// attribute type up to a `vec4<f32>`.
pub const ALLOC_UNIT: u64 = 16;

/// The data a mesh buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Vertex attribute data.
    Vertex,
    /// Index data ([`IndexType`](crate::types::IndexType) elements).
    Index,
}

impl BufferKind {
    /// Both kinds, vertex first.
    pub const ALL: [BufferKind; 2] = [BufferKind::Vertex, BufferKind::Index];

    /// Human readable name, used in logs and buffer labels.
    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Index => "index",
        }
    }
}

/// Why a buffer was allocated, which decides when it may be destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocClass {
    /// Always-resident capacity. Only released by a full reset or a
    /// reserve-size change.
    Reserve,
    /// Grown on demand and destroyed again when the cache shrinks.
    Chunk,
}

/// A byte range inside one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ByteRange {
    /// Byte offset from the start of the buffer.
    pub offset: u64,
    /// Size of the range in bytes.
    pub size: u64,
}

impl ByteRange {
    /// Create a new byte range.
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Get the end offset (offset + size).
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Whether the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether two ranges share at least one byte.
    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// How CPU writes into mesh buffers become visible to the GPU.
///
/// Chosen once per cache initialization from the device capabilities, in the
/// declaration order below. The strategy never changes allocation or
/// eviction behavior, only what happens on map and unmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BufferUpdate {
    /// Map the whole buffer without driver synchronization, flush the
    /// written ranges explicitly and rely on fences to avoid overwriting
    /// ranges the GPU may still read.
    MapUnsynchronized,
    /// Map the whole buffer with driver synchronization.
    Map,
    /// Write into a CPU staging copy and upload the dirty ranges on unmap.
    UpdateSubrange,
    /// Keep mesh data in client memory only; draws source it directly.
    ClientBuffers,
}

impl BufferUpdate {
    /// All strategies in priority order.
    pub const PRIORITY: [BufferUpdate; 4] = [
        BufferUpdate::MapUnsynchronized,
        BufferUpdate::Map,
        BufferUpdate::UpdateSubrange,
        BufferUpdate::ClientBuffers,
    ];

    /// Whether buffers for this strategy live in device memory.
    pub fn uses_device_memory(self) -> bool {
        !matches!(self, Self::ClientBuffers)
    }

    /// Whether the strategy needs a CPU-side copy of every buffer.
    pub fn uses_cpu_copy(self) -> bool {
        matches!(self, Self::UpdateSubrange | Self::ClientBuffers)
    }
}

/// Align a value up to the given power-of-two alignment.
#[inline]
fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Round a byte size up to a whole number of allocation units.
#[inline]
pub(crate) fn align_to_unit(size: u64) -> u64 {
    align_up(size, ALLOC_UNIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range_overlap() {
        let a = ByteRange::new(0, 64);
        let b = ByteRange::new(64, 64);
        let c = ByteRange::new(32, 64);

        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
        assert_eq!(c.end(), 96);
    }

    #[test]
    fn test_align_to_unit() {
        assert_eq!(align_to_unit(0), 0);
        assert_eq!(align_to_unit(1), 16);
        assert_eq!(align_to_unit(16), 16);
        assert_eq!(align_to_unit(5000), 5008);
    }

    #[test]
    fn test_buffer_update_memory_placement() {
        assert!(BufferUpdate::MapUnsynchronized.uses_device_memory());
        assert!(!BufferUpdate::MapUnsynchronized.uses_cpu_copy());
        assert!(BufferUpdate::UpdateSubrange.uses_device_memory());
        assert!(BufferUpdate::UpdateSubrange.uses_cpu_copy());
        assert!(!BufferUpdate::ClientBuffers.uses_device_memory());
    }
}
