//! Graphics device abstraction consumed by the mesh cache.
//!
//! The cache never talks to a graphics API directly. Everything it needs
//! (buffer storage, CPU mapping, sub-range uploads and fences) goes through
//! the [`MeshDevice`] trait, so the same allocation and eviction logic runs
//! on every backend.
//!
//! # Available Devices
//!
//! - [`DummyDevice`]: CPU-only device for tests, benchmarks and headless runs.
//!   Fences only complete when explicitly told to, which makes GPU latency
//!   fully deterministic.

pub mod dummy;

use std::ptr::NonNull;

use bitflags::bitflags;

use crate::error::DeviceError;
use crate::types::{BufferKind, BufferUpdate, ByteRange};

pub use dummy::DummyDevice;

bitflags! {
    /// Capabilities a device reports to the mesh cache.
    ///
    /// They decide which [`BufferUpdate`](crate::types::BufferUpdate)
    /// strategy is chosen at initialization.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceCaps: u32 {
        /// GPU fences can be inserted and queried.
        const FENCES = 1 << 0;
        /// Buffers can be mapped without synchronization, with explicit flushes.
        const MAP_BUFFER_RANGE = 1 << 1;
        /// Buffers can be mapped with driver synchronization.
        const MAP_BUFFER = 1 << 2;
        /// Buffer sub-ranges can be updated from CPU memory.
        const UPDATE_SUBRANGE = 1 << 3;
        /// Draws can source vertex/index data from client memory.
        const CLIENT_BUFFERS = 1 << 4;
    }
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self::empty()
    }
}

impl DeviceCaps {
    /// Whether a buffer-update strategy can run on these capabilities.
    pub fn supports(self, strategy: BufferUpdate) -> bool {
        match strategy {
            BufferUpdate::MapUnsynchronized => {
                self.contains(DeviceCaps::FENCES | DeviceCaps::MAP_BUFFER_RANGE)
            }
            BufferUpdate::Map => self.contains(DeviceCaps::MAP_BUFFER),
            BufferUpdate::UpdateSubrange => self.contains(DeviceCaps::UPDATE_SUBRANGE),
            BufferUpdate::ClientBuffers => self.contains(DeviceCaps::CLIENT_BUFFERS),
        }
    }

    /// The highest-priority supported strategy.
    pub fn preferred_buffer_update(self) -> Option<BufferUpdate> {
        BufferUpdate::PRIORITY
            .into_iter()
            .find(|strategy| self.supports(*strategy))
    }
}

/// An opaque handle to device buffer storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuBufferId(pub u64);

/// A marker in the GPU command stream.
///
/// A fence is *pending* until the GPU has executed every command submitted
/// before it was inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceToken(pub u64);

/// How a buffer is mapped for CPU writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapMode {
    /// No driver synchronization; written ranges are flushed explicitly.
    Unsynchronized,
    /// The driver synchronizes with in-flight GPU reads.
    Synchronized,
}

/// The graphics-API collaborator of the mesh cache.
///
/// A device creates and destroys buffer storage, maps it for CPU writes,
/// uploads sub-ranges and provides fences. All calls come from the single
/// thread that drives the cache.
///
/// # Safety
///
/// Implementors must guarantee that a pointer returned by
/// [`map_buffer`](Self::map_buffer) is valid for reads and writes of the
/// whole buffer size, and is not accessed by anything else on the CPU, until
/// the matching [`unmap_buffer`](Self::unmap_buffer) or
/// [`destroy_buffer`](Self::destroy_buffer). The cache hands out slices into
/// that memory.
pub unsafe trait MeshDevice {
    /// Get the device name.
    fn name(&self) -> &str;

    /// Get the device capabilities.
    fn capabilities(&self) -> DeviceCaps;

    /// Create buffer storage of `size` bytes for the given kind of data.
    fn create_buffer(&self, kind: BufferKind, size: u64) -> Result<GpuBufferId, DeviceError>;

    /// Destroy buffer storage. A mapped buffer is implicitly unmapped.
    fn destroy_buffer(&self, buffer: GpuBufferId);

    /// Map the whole buffer for CPU writes.
    fn map_buffer(&self, buffer: GpuBufferId, mode: MapMode) -> Result<NonNull<u8>, DeviceError>;

    /// Make writes to a range of an unsynchronized mapping visible to the GPU.
    fn flush_mapped_range(&self, buffer: GpuBufferId, range: ByteRange);

    /// Unmap a mapped buffer.
    ///
    /// Returns `false` if the contents written while mapped were lost and
    /// must be written again.
    fn unmap_buffer(&self, buffer: GpuBufferId) -> bool;

    /// Copy `data` into the buffer at `offset`.
    fn update_subrange(&self, buffer: GpuBufferId, offset: u64, data: &[u8]);

    /// Insert a fence after all work submitted so far.
    fn insert_fence(&self) -> FenceToken;

    /// Check whether the GPU has not reached a fence yet (non-blocking).
    fn is_fence_pending(&self, fence: FenceToken) -> bool;

    /// Block until the GPU has reached a fence.
    fn wait_fence(&self, fence: FenceToken);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps_default_empty() {
        assert!(DeviceCaps::default().is_empty());
    }

    #[test]
    fn test_strategy_priority() {
        assert_eq!(
            DeviceCaps::all().preferred_buffer_update(),
            Some(BufferUpdate::MapUnsynchronized)
        );
        // Unsynchronized mapping is useless without fences.
        assert_eq!(
            (DeviceCaps::MAP_BUFFER_RANGE | DeviceCaps::MAP_BUFFER).preferred_buffer_update(),
            Some(BufferUpdate::Map)
        );
        assert_eq!(
            (DeviceCaps::UPDATE_SUBRANGE | DeviceCaps::CLIENT_BUFFERS).preferred_buffer_update(),
            Some(BufferUpdate::UpdateSubrange)
        );
        assert_eq!(DeviceCaps::FENCES.preferred_buffer_update(), None);
    }

    #[test]
    fn test_fence_token_order() {
        assert!(FenceToken(1) < FenceToken(2));
    }
}
