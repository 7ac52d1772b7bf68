//! A growable list of same-kind mesh buffers.

use crate::device::MeshDevice;
use crate::error::DeviceError;
use crate::types::{AllocClass, BufferKind, BufferUpdate, align_to_unit};

use super::{BufferId, MeshBuffer};

/// All vertex buffers, or all index buffers, of one cache.
///
/// Allocation tries the existing buffers in creation order, so the reserve
/// is always filled before any chunk.
#[derive(Debug)]
pub struct BufferSet {
    kind: BufferKind,
    granularity: u64,
    buffers: Vec<MeshBuffer>,
    next_id: u32,
}

impl BufferSet {
    /// Create an empty set growing by `granularity` bytes.
    pub fn new(kind: BufferKind, granularity: u64) -> Self {
        Self {
            kind,
            granularity,
            buffers: Vec::new(),
            next_id: 0,
        }
    }

    /// Get the kind of data stored.
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Get the growth granularity in bytes.
    pub fn granularity(&self) -> u64 {
        self.granularity
    }

    pub(crate) fn set_granularity(&mut self, granularity: u64) {
        self.granularity = granularity;
    }

    /// Whether a single allocation of `size` bytes can ever fit a chunk.
    pub fn check_allocation_size(&self, size: u64) -> bool {
        size <= self.granularity
    }

    /// Create a new buffer of `size` bytes.
    ///
    /// Device failures are returned as-is; the set never retries.
    pub(crate) fn create_buffer(
        &mut self,
        size: u64,
        class: AllocClass,
        device: &dyn MeshDevice,
        strategy: BufferUpdate,
    ) -> Result<BufferId, DeviceError> {
        let size = align_to_unit(size);
        let id = BufferId(self.next_id);
        let buffer = MeshBuffer::new(id, self.kind, class, size, device, strategy)?;
        self.next_id += 1;
        self.buffers.push(buffer);
        Ok(id)
    }

    /// Allocate `size` bytes from the first buffer that has room.
    pub(crate) fn alloc(&mut self, size: u64) -> Option<(BufferId, u64)> {
        self.buffers
            .iter_mut()
            .find_map(|buffer| buffer.alloc(size).map(|offset| (buffer.id(), offset)))
    }

    /// Free a range, returning the size of the free block it merged into.
    ///
    /// Returns 0 when the buffer reference was cleared or the buffer no
    /// longer exists.
    pub(crate) fn free(&mut self, size: u64, buffer: Option<BufferId>, offset: u64) -> u64 {
        match buffer.and_then(|id| self.buffer_mut(id)) {
            Some(buffer) => buffer.free(offset, size),
            None => 0,
        }
    }

    /// Get a buffer by id.
    pub fn buffer(&self, id: BufferId) -> Option<&MeshBuffer> {
        self.buffers.iter().find(|b| b.id() == id)
    }

    pub(crate) fn buffer_mut(&mut self, id: BufferId) -> Option<&mut MeshBuffer> {
        self.buffers.iter_mut().find(|b| b.id() == id)
    }

    /// Iterate over all buffers in creation order.
    pub fn buffers(&self) -> impl Iterator<Item = &MeshBuffer> {
        self.buffers.iter()
    }

    /// Get the number of buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the set holds no buffers.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Total bytes across all buffers.
    pub fn total_size(&self) -> u64 {
        self.buffers.iter().map(MeshBuffer::size).sum()
    }

    /// Free bytes across all buffers.
    pub fn free_size(&self) -> u64 {
        self.buffers.iter().map(|b| b.allocator().free_size()).sum()
    }

    /// Unmap every buffer written since the last unmap.
    pub(crate) fn unmap_all(&mut self, device: &dyn MeshDevice, strategy: BufferUpdate) {
        for buffer in &mut self.buffers {
            buffer.unmap(device, strategy);
        }
    }

    /// Remove a buffer from the set without destroying its storage.
    pub(crate) fn take_buffer(&mut self, id: BufferId) -> Option<MeshBuffer> {
        let index = self.buffers.iter().position(|b| b.id() == id)?;
        Some(self.buffers.remove(index))
    }

    /// Destroy one buffer.
    pub(crate) fn destroy_buffer(&mut self, id: BufferId, device: &dyn MeshDevice) -> bool {
        match self.take_buffer(id) {
            Some(buffer) => {
                buffer.destroy(device, false);
                true
            }
            None => false,
        }
    }

    /// Destroy every buffer of `class`, or all buffers when `class` is `None`.
    ///
    /// With `lost` set the device is not touched.
    pub(crate) fn destroy_buffers(
        &mut self,
        class: Option<AllocClass>,
        lost: bool,
        device: &dyn MeshDevice,
    ) {
        let (doomed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.buffers)
            .into_iter()
            .partition(|b| class.is_none_or(|class| b.class() == class));
        self.buffers = kept;
        for buffer in doomed {
            buffer.destroy(device, lost);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DummyDevice;

    const STRATEGY: BufferUpdate = BufferUpdate::MapUnsynchronized;

    #[test]
    fn test_existing_buffers_preferred() {
        let device = DummyDevice::new();
        let mut set = BufferSet::new(BufferKind::Vertex, 1024);
        let reserve = set
            .create_buffer(2048, AllocClass::Reserve, &device, STRATEGY)
            .unwrap();
        let chunk = set
            .create_buffer(1024, AllocClass::Chunk, &device, STRATEGY)
            .unwrap();

        assert_eq!(set.alloc(1024), Some((reserve, 0)));
        assert_eq!(set.alloc(1024), Some((reserve, 1024)));
        assert_eq!(set.alloc(512), Some((chunk, 0)));
        assert_eq!(set.alloc(1024), None);

        assert_eq!(set.total_size(), 3072);
        assert_eq!(set.free_size(), 512);
    }

    #[test]
    fn test_free_with_cleared_reference() {
        let device = DummyDevice::new();
        let mut set = BufferSet::new(BufferKind::Index, 1024);
        let id = set
            .create_buffer(1024, AllocClass::Reserve, &device, STRATEGY)
            .unwrap();
        let (_, offset) = set.alloc(256).unwrap();

        assert_eq!(set.free(256, None, offset), 0);
        assert_eq!(set.free(256, Some(id), offset), 1024);
    }

    #[test]
    fn test_destroy_by_class() {
        let device = DummyDevice::new();
        let mut set = BufferSet::new(BufferKind::Vertex, 512);
        set.create_buffer(1024, AllocClass::Reserve, &device, STRATEGY)
            .unwrap();
        let chunk = set
            .create_buffer(512, AllocClass::Chunk, &device, STRATEGY)
            .unwrap();
        set.create_buffer(512, AllocClass::Chunk, &device, STRATEGY)
            .unwrap();

        set.destroy_buffers(Some(AllocClass::Chunk), false, &device);
        assert_eq!(set.len(), 1);
        assert_eq!(device.live_buffer_count(), 1);
        assert!(set.buffer(chunk).is_none());
        assert_eq!(set.free(16, Some(chunk), 0), 0);

        set.destroy_buffers(None, false, &device);
        assert!(set.is_empty());
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn test_create_failure_is_reported() {
        let device = DummyDevice::new().with_memory_budget(1024);
        let mut set = BufferSet::new(BufferKind::Vertex, 1024);
        set.create_buffer(1024, AllocClass::Reserve, &device, STRATEGY)
            .unwrap();
        assert_eq!(
            set.create_buffer(1024, AllocClass::Chunk, &device, STRATEGY),
            Err(DeviceError::OutOfMemory)
        );
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let device = DummyDevice::new();
        let mut set = BufferSet::new(BufferKind::Vertex, 512);
        let first = set
            .create_buffer(512, AllocClass::Chunk, &device, STRATEGY)
            .unwrap();
        assert!(set.destroy_buffer(first, &device));
        let second = set
            .create_buffer(512, AllocClass::Chunk, &device, STRATEGY)
            .unwrap();
        assert_ne!(first, second);
        assert!(!set.destroy_buffer(first, &device));
    }
}
