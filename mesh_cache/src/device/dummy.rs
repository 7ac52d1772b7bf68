//! Dummy mesh device for testing and development.
//!
//! This device keeps every buffer in CPU memory and never talks to a GPU.
//! Fences are serial numbers that stay pending until the owner completes
//! them, so tests can hold a region "in flight" for as long as they need.

use std::collections::HashMap;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::error::DeviceError;
use crate::types::{BufferKind, ByteRange};

use super::{DeviceCaps, FenceToken, GpuBufferId, MapMode, MeshDevice};

#[derive(Debug)]
struct DummyBuffer {
    kind: BufferKind,
    data: Box<[u8]>,
    mapped: bool,
}

#[derive(Debug, Default)]
struct DummyState {
    buffers: HashMap<u64, DummyBuffer>,
    next_buffer: u64,
    allocated: u64,
    last_fence: u64,
    completed_fence: u64,
    flush_count: u64,
    update_count: u64,
    lost: bool,
}

/// CPU-only mesh device.
#[derive(Debug)]
pub struct DummyDevice {
    caps: DeviceCaps,
    memory_budget: Option<u64>,
    state: Mutex<DummyState>,
}

impl DummyDevice {
    /// Create a new dummy device supporting every update strategy.
    pub fn new() -> Self {
        Self {
            caps: DeviceCaps::all(),
            memory_budget: None,
            state: Mutex::new(DummyState::default()),
        }
    }

    /// Report only the given capabilities.
    pub fn with_capabilities(mut self, caps: DeviceCaps) -> Self {
        self.caps = caps;
        self
    }

    /// Fail buffer creation once `budget` bytes are allocated.
    pub fn with_memory_budget(mut self, budget: u64) -> Self {
        self.memory_budget = Some(budget);
        self
    }

    /// Number of buffers currently alive.
    pub fn live_buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Number of live buffers of the given kind.
    pub fn live_buffer_count_of(&self, kind: BufferKind) -> usize {
        self.state
            .lock()
            .buffers
            .values()
            .filter(|b| b.kind == kind)
            .count()
    }

    /// Bytes held by live buffers.
    pub fn allocated_bytes(&self) -> u64 {
        self.state.lock().allocated
    }

    /// Number of `flush_mapped_range` calls so far.
    pub fn flush_count(&self) -> u64 {
        self.state.lock().flush_count
    }

    /// Number of `update_subrange` calls so far.
    pub fn update_count(&self) -> u64 {
        self.state.lock().update_count
    }

    /// Copy a buffer's contents out, or `None` if it does not exist.
    pub fn read_buffer(&self, buffer: GpuBufferId) -> Option<Vec<u8>> {
        self.state
            .lock()
            .buffers
            .get(&buffer.0)
            .map(|b| b.data.to_vec())
    }

    /// Whether a buffer is currently mapped.
    pub fn is_mapped(&self, buffer: GpuBufferId) -> bool {
        self.state
            .lock()
            .buffers
            .get(&buffer.0)
            .is_some_and(|b| b.mapped)
    }

    /// Mark every fence up to and including `fence` as reached by the GPU.
    pub fn complete_fences_through(&self, fence: FenceToken) {
        let mut state = self.state.lock();
        state.completed_fence = state.completed_fence.max(fence.0);
    }

    /// Mark every fence inserted so far as reached.
    pub fn complete_all_fences(&self) {
        let mut state = self.state.lock();
        state.completed_fence = state.last_fence;
    }

    /// Last fence handed out, if any.
    pub fn last_fence(&self) -> Option<FenceToken> {
        let state = self.state.lock();
        (state.last_fence > 0).then_some(FenceToken(state.last_fence))
    }

    /// Simulate losing the device: creation and mapping fail from now on.
    pub fn simulate_device_lost(&self) {
        log::trace!("DummyDevice: simulating device loss");
        self.state.lock().lost = true;
    }
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: mapped pointers point into a boxed slice that is only freed by
// `destroy_buffer`, and boxed memory does not move when the map rehashes.
unsafe impl MeshDevice for DummyDevice {
    fn name(&self) -> &str {
        "Dummy Mesh Device"
    }

    fn capabilities(&self) -> DeviceCaps {
        self.caps
    }

    fn create_buffer(&self, kind: BufferKind, size: u64) -> Result<GpuBufferId, DeviceError> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(DeviceError::DeviceLost);
        }
        if let Some(budget) = self.memory_budget
            && state.allocated + size > budget
        {
            log::trace!(
                "DummyDevice: out of memory creating {} buffer (size: {size}, allocated: {})",
                kind.name(),
                state.allocated
            );
            return Err(DeviceError::OutOfMemory);
        }
        let len = usize::try_from(size).map_err(|_| DeviceError::OutOfMemory)?;

        state.next_buffer += 1;
        let id = state.next_buffer;
        state.allocated += size;
        state.buffers.insert(
            id,
            DummyBuffer {
                kind,
                data: vec![0u8; len].into_boxed_slice(),
                mapped: false,
            },
        );
        log::trace!(
            "DummyDevice: created {} buffer {id} (size: {size})",
            kind.name()
        );
        Ok(GpuBufferId(id))
    }

    fn destroy_buffer(&self, buffer: GpuBufferId) {
        let mut state = self.state.lock();
        if let Some(removed) = state.buffers.remove(&buffer.0) {
            state.allocated -= removed.data.len() as u64;
            log::trace!("DummyDevice: destroyed buffer {}", buffer.0);
        }
    }

    fn map_buffer(&self, buffer: GpuBufferId, mode: MapMode) -> Result<NonNull<u8>, DeviceError> {
        let required = match mode {
            MapMode::Unsynchronized => DeviceCaps::MAP_BUFFER_RANGE,
            MapMode::Synchronized => DeviceCaps::MAP_BUFFER,
        };
        if !self.caps.contains(required) {
            return Err(DeviceError::Unsupported(format!("{mode:?} buffer mapping")));
        }

        let mut state = self.state.lock();
        if state.lost {
            return Err(DeviceError::DeviceLost);
        }
        let entry = state
            .buffers
            .get_mut(&buffer.0)
            .ok_or(DeviceError::InvalidBuffer(buffer))?;
        entry.mapped = true;
        log::trace!("DummyDevice: mapped buffer {} ({mode:?})", buffer.0);
        NonNull::new(entry.data.as_mut_ptr())
            .ok_or_else(|| DeviceError::MapFailed("zero-sized buffer".to_string()))
    }

    fn flush_mapped_range(&self, buffer: GpuBufferId, range: ByteRange) {
        let mut state = self.state.lock();
        debug_assert!(
            state
                .buffers
                .get(&buffer.0)
                .is_some_and(|b| b.mapped && range.end() <= b.data.len() as u64),
            "flush of unmapped buffer or out-of-bounds range"
        );
        state.flush_count += 1;
    }

    fn unmap_buffer(&self, buffer: GpuBufferId) -> bool {
        let mut state = self.state.lock();
        let lost = state.lost;
        match state.buffers.get_mut(&buffer.0) {
            Some(entry) => {
                entry.mapped = false;
                log::trace!("DummyDevice: unmapped buffer {}", buffer.0);
                !lost
            }
            None => false,
        }
    }

    fn update_subrange(&self, buffer: GpuBufferId, offset: u64, data: &[u8]) {
        let mut state = self.state.lock();
        state.update_count += 1;
        if let Some(entry) = state.buffers.get_mut(&buffer.0) {
            let start = offset as usize;
            let end = start + data.len();
            if end <= entry.data.len() {
                entry.data[start..end].copy_from_slice(data);
            } else {
                log::warn!(
                    "DummyDevice: update of buffer {} out of bounds ({start}..{end})",
                    buffer.0
                );
            }
        }
    }

    fn insert_fence(&self) -> FenceToken {
        let mut state = self.state.lock();
        state.last_fence += 1;
        FenceToken(state.last_fence)
    }

    fn is_fence_pending(&self, fence: FenceToken) -> bool {
        let state = self.state.lock();
        !state.lost && fence.0 > state.completed_fence
    }

    fn wait_fence(&self, fence: FenceToken) {
        log::trace!("DummyDevice: waiting for fence {}", fence.0);
        self.complete_fences_through(fence);
    }
}

static_assertions::assert_impl_all!(DummyDevice: Send, Sync);
