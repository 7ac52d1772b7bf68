//! Common types shared across the mesh cache.
//!
//! This module contains the buffer classification enums, byte ranges, fence
//! kinds and the buffer-update strategy used throughout the crate.

mod buffer;

pub use buffer::{ALLOC_UNIT, AllocClass, BufferKind, BufferUpdate, ByteRange};
pub(crate) use buffer::align_to_unit;

/// Element type of cached index data.
pub type IndexType = u16;

/// Size of one index in bytes.
pub const INDEX_SIZE: u64 = std::mem::size_of::<IndexType>() as u64;

/// The pipeline stage a fence guards.
///
/// Mesh storage is read by the vertex stage, so eviction consults the
/// [`Vertex`](FenceKind::Vertex) fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FenceKind {
    /// Vertex fetch and shading.
    Vertex,
    /// Fragment shading.
    Fragment,
}

impl FenceKind {
    /// Both kinds, vertex first.
    pub const ALL: [FenceKind; 2] = [FenceKind::Vertex, FenceKind::Fragment];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Vertex => 0,
            Self::Fragment => 1,
        }
    }
}
