//! A single vertex or index buffer with its range allocator.

use std::ptr::NonNull;

use crate::device::{GpuBufferId, MapMode, MeshDevice};
use crate::error::DeviceError;
use crate::types::{AllocClass, BufferKind, BufferUpdate, ByteRange};

use super::RangeAllocator;

/// Identifier of a buffer inside its [`BufferSet`](super::BufferSet).
///
/// Identifiers are never reused by a set, so a stale id simply stops
/// resolving once its buffer is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u32);

impl BufferId {
    /// Get the raw id value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// One block of mesh storage.
///
/// Depending on the [`BufferUpdate`] strategy the block is device memory,
/// a CPU copy, or both.
#[derive(Debug)]
pub struct MeshBuffer {
    id: BufferId,
    kind: BufferKind,
    class: AllocClass,
    size: u64,
    allocator: RangeAllocator,
    gpu: Option<GpuBufferId>,
    mapped: Option<NonNull<u8>>,
    cpu_copy: Option<Box<[u8]>>,
    /// Ranges written since the last unmap.
    dirty: Vec<ByteRange>,
}

impl MeshBuffer {
    /// Create storage for a buffer of `size` bytes.
    pub(crate) fn new(
        id: BufferId,
        kind: BufferKind,
        class: AllocClass,
        size: u64,
        device: &dyn MeshDevice,
        strategy: BufferUpdate,
    ) -> Result<Self, DeviceError> {
        let gpu = if strategy.uses_device_memory() {
            Some(device.create_buffer(kind, size)?)
        } else {
            None
        };

        let cpu_copy = if strategy.uses_cpu_copy() {
            match usize::try_from(size) {
                Ok(len) => Some(vec![0u8; len].into_boxed_slice()),
                Err(_) => {
                    if let Some(gpu) = gpu {
                        device.destroy_buffer(gpu);
                    }
                    return Err(DeviceError::OutOfMemory);
                }
            }
        } else {
            None
        };

        log::trace!(
            "MeshBuffer: created {} buffer {} ({class:?}, size: {size})",
            kind.name(),
            id.0
        );

        Ok(Self {
            id,
            kind,
            class,
            size,
            allocator: RangeAllocator::new(size),
            gpu,
            mapped: None,
            cpu_copy,
            dirty: Vec::new(),
        })
    }

    /// Get the buffer id.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Get the kind of data stored.
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Get the allocation class.
    pub fn class(&self) -> AllocClass {
        self.class
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get the device buffer, if the strategy uses device memory.
    pub fn gpu_buffer(&self) -> Option<GpuBufferId> {
        self.gpu
    }

    /// Get the client-side copy, if the strategy keeps one.
    pub fn client_data(&self) -> Option<&[u8]> {
        self.cpu_copy.as_deref()
    }

    /// Get the range allocator.
    pub fn allocator(&self) -> &RangeAllocator {
        &self.allocator
    }

    /// Whether the buffer is currently open for CPU writes.
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some() || !self.dirty.is_empty()
    }

    pub(crate) fn alloc(&mut self, size: u64) -> Option<u64> {
        self.allocator.alloc(size)
    }

    pub(crate) fn free(&mut self, offset: u64, size: u64) -> u64 {
        self.allocator.free(offset, size)
    }

    /// Open a range for CPU writes and record it as dirty.
    ///
    /// Device storage is mapped on first use; later calls reuse the mapping.
    pub(crate) fn map_range(
        &mut self,
        device: &dyn MeshDevice,
        strategy: BufferUpdate,
        range: ByteRange,
    ) -> Result<&mut [u8], DeviceError> {
        debug_assert!(range.end() <= self.size, "mapped range out of bounds");
        let start = usize::try_from(range.offset).map_err(|_| DeviceError::OutOfMemory)?;
        let len = usize::try_from(range.size).map_err(|_| DeviceError::OutOfMemory)?;

        let mode = match strategy {
            BufferUpdate::MapUnsynchronized => Some(MapMode::Unsynchronized),
            BufferUpdate::Map => Some(MapMode::Synchronized),
            BufferUpdate::UpdateSubrange | BufferUpdate::ClientBuffers => None,
        };

        if let Some(mode) = mode
            && self.mapped.is_none()
        {
            let gpu = self
                .gpu
                .ok_or_else(|| DeviceError::MapFailed("buffer has no device storage".to_string()))?;
            self.mapped = Some(device.map_buffer(gpu, mode)?);
            log::trace!("MeshBuffer: mapped {} buffer {}", self.kind.name(), self.id.0);
        }

        self.mark_dirty(range);

        if let Some(ptr) = self.mapped {
            // SAFETY: the device keeps the mapping valid for the whole buffer
            // until unmap/destroy, both of which need `&mut self`.
            return Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr().add(start), len) });
        }

        let copy = self
            .cpu_copy
            .as_deref_mut()
            .ok_or_else(|| DeviceError::MapFailed("buffer has no client storage".to_string()))?;
        Ok(&mut copy[start..start + len])
    }

    fn mark_dirty(&mut self, range: ByteRange) {
        if let Some(last) = self.dirty.last_mut()
            && last.end() == range.offset
        {
            last.size += range.size;
            return;
        }
        self.dirty.push(range);
    }

    /// Make every write since the last unmap visible to the GPU.
    pub(crate) fn unmap(&mut self, device: &dyn MeshDevice, strategy: BufferUpdate) {
        let dirty = std::mem::take(&mut self.dirty);

        match strategy {
            BufferUpdate::MapUnsynchronized | BufferUpdate::Map => {
                let (Some(gpu), Some(_)) = (self.gpu, self.mapped.take()) else {
                    return;
                };
                if strategy == BufferUpdate::MapUnsynchronized {
                    for range in &dirty {
                        device.flush_mapped_range(gpu, *range);
                    }
                }
                if !device.unmap_buffer(gpu) {
                    log::warn!(
                        "MeshBuffer: contents of {} buffer {} lost on unmap",
                        self.kind.name(),
                        self.id.0
                    );
                }
            }
            BufferUpdate::UpdateSubrange => {
                let (Some(gpu), Some(copy)) = (self.gpu, self.cpu_copy.as_deref()) else {
                    return;
                };
                for range in &dirty {
                    let start = range.offset as usize;
                    let end = range.end() as usize;
                    device.update_subrange(gpu, range.offset, &copy[start..end]);
                }
            }
            BufferUpdate::ClientBuffers => {}
        }

        if !dirty.is_empty() {
            log::trace!(
                "MeshBuffer: unmapped {} buffer {} ({} dirty ranges)",
                self.kind.name(),
                self.id.0,
                dirty.len()
            );
        }
    }

    /// Release the storage.
    ///
    /// With `lost` set the device is not touched; only bookkeeping is dropped.
    pub(crate) fn destroy(mut self, device: &dyn MeshDevice, lost: bool) {
        self.mapped = None;
        if !lost && let Some(gpu) = self.gpu.take() {
            device.destroy_buffer(gpu);
        }
        log::trace!(
            "MeshBuffer: destroyed {} buffer {} ({:?}, size: {}, lost: {lost})",
            self.kind.name(),
            self.id.0,
            self.class,
            self.size
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DummyDevice;

    fn buffer(device: &DummyDevice, strategy: BufferUpdate) -> MeshBuffer {
        MeshBuffer::new(
            BufferId(1),
            BufferKind::Vertex,
            AllocClass::Reserve,
            256,
            device,
            strategy,
        )
        .unwrap()
    }

    #[test]
    fn test_storage_per_strategy() {
        let device = DummyDevice::new();

        let mapped = buffer(&device, BufferUpdate::MapUnsynchronized);
        assert!(mapped.gpu_buffer().is_some());
        assert!(mapped.client_data().is_none());

        let staged = buffer(&device, BufferUpdate::UpdateSubrange);
        assert!(staged.gpu_buffer().is_some());
        assert!(staged.client_data().is_some());

        let client = buffer(&device, BufferUpdate::ClientBuffers);
        assert!(client.gpu_buffer().is_none());
        assert_eq!(client.client_data().map(<[u8]>::len), Some(256));

        assert_eq!(device.live_buffer_count(), 2);
    }

    #[test]
    fn test_unsynchronized_flushes_dirty_ranges() {
        let device = DummyDevice::new();
        let mut buf = buffer(&device, BufferUpdate::MapUnsynchronized);

        buf.map_range(&device, BufferUpdate::MapUnsynchronized, ByteRange::new(0, 16))
            .unwrap()
            .fill(7);
        buf.map_range(&device, BufferUpdate::MapUnsynchronized, ByteRange::new(64, 16))
            .unwrap()
            .fill(9);
        assert!(buf.is_mapped());

        buf.unmap(&device, BufferUpdate::MapUnsynchronized);
        assert!(!buf.is_mapped());
        assert_eq!(device.flush_count(), 2);

        let data = device.read_buffer(buf.gpu_buffer().unwrap()).unwrap();
        assert_eq!(data[0], 7);
        assert_eq!(data[64], 9);
        assert_eq!(data[32], 0);
    }

    #[test]
    fn test_update_subrange_uploads_on_unmap() {
        let device = DummyDevice::new();
        let mut buf = buffer(&device, BufferUpdate::UpdateSubrange);

        buf.map_range(&device, BufferUpdate::UpdateSubrange, ByteRange::new(16, 16))
            .unwrap()
            .fill(3);
        buf.map_range(&device, BufferUpdate::UpdateSubrange, ByteRange::new(32, 16))
            .unwrap()
            .fill(4);
        let gpu = buf.gpu_buffer().unwrap();
        assert_eq!(device.read_buffer(gpu).unwrap()[16], 0);

        buf.unmap(&device, BufferUpdate::UpdateSubrange);
        // Adjacent ranges are merged into one upload.
        assert_eq!(device.update_count(), 1);
        let data = device.read_buffer(gpu).unwrap();
        assert_eq!(&data[16..48], &[[3u8; 16], [4u8; 16]].concat()[..]);
    }

    #[test]
    fn test_destroy_lost_skips_device() {
        let device = DummyDevice::new();
        let buf = buffer(&device, BufferUpdate::Map);
        buf.destroy(&device, true);
        assert_eq!(device.live_buffer_count(), 1);

        let buf = buffer(&device, BufferUpdate::Map);
        buf.destroy(&device, false);
        assert_eq!(device.live_buffer_count(), 1);
    }
}
