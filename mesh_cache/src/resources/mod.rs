//! Mesh storage: range allocator, buffers and buffer sets.

mod buffer;
mod buffer_set;
mod range_allocator;

pub use buffer::{BufferId, MeshBuffer};
pub use buffer_set::BufferSet;
pub use range_allocator::RangeAllocator;
