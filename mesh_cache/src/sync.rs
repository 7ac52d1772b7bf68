//! Fence tracking for cached meshes.
//!
//! Every cache item remembers the last fence inserted after a draw that read
//! it, once per [`FenceKind`]. The tracker answers whether that use is still
//! in flight on the GPU and can block until it is not.

use crate::device::{FenceToken, MeshDevice};
use crate::types::FenceKind;

/// State of a tracked fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    /// No fence was ever recorded.
    None,
    /// The GPU has not reached the fence yet.
    Pending,
    /// The GPU has passed the fence.
    Cleared,
}

/// Last GPU use of a resource, one fence slot per [`FenceKind`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FenceTracker {
    fences: [Option<FenceToken>; 2],
}

impl FenceTracker {
    /// Create a tracker with no recorded use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new use, replacing the previous fence of that kind.
    pub fn set(&mut self, kind: FenceKind, fence: FenceToken) {
        self.fences[kind.index()] = Some(fence);
    }

    /// Get the recorded fence of a kind.
    pub fn fence(&self, kind: FenceKind) -> Option<FenceToken> {
        self.fences[kind.index()]
    }

    /// Query the state of a fence kind (non-blocking).
    pub fn state(&self, kind: FenceKind, device: &dyn MeshDevice) -> FenceState {
        match self.fence(kind) {
            None => FenceState::None,
            Some(token) if device.is_fence_pending(token) => FenceState::Pending,
            Some(_) => FenceState::Cleared,
        }
    }

    /// Whether the last use of this kind is still in flight.
    pub fn is_pending(&self, kind: FenceKind, device: &dyn MeshDevice) -> bool {
        self.state(kind, device) == FenceState::Pending
    }

    /// Block until the last use of this kind has completed.
    pub fn wait(&self, kind: FenceKind, device: &dyn MeshDevice) {
        if let Some(token) = self.fence(kind)
            && device.is_fence_pending(token)
        {
            device.wait_fence(token);
        }
    }

    /// All recorded fences that are still in flight.
    pub fn pending_tokens(&self, device: &dyn MeshDevice) -> Vec<FenceToken> {
        self.fences
            .iter()
            .flatten()
            .copied()
            .filter(|token| device.is_fence_pending(*token))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DummyDevice;

    #[test]
    fn test_empty_tracker() {
        let device = DummyDevice::new();
        let tracker = FenceTracker::new();
        assert_eq!(tracker.state(FenceKind::Vertex, &device), FenceState::None);
        assert!(!tracker.is_pending(FenceKind::Vertex, &device));
        assert!(tracker.pending_tokens(&device).is_empty());
    }

    #[test]
    fn test_pending_then_cleared() {
        let device = DummyDevice::new();
        let mut tracker = FenceTracker::new();
        let token = device.insert_fence();
        tracker.set(FenceKind::Vertex, token);

        assert_eq!(tracker.state(FenceKind::Vertex, &device), FenceState::Pending);
        assert_eq!(tracker.state(FenceKind::Fragment, &device), FenceState::None);

        device.complete_fences_through(token);
        assert_eq!(tracker.state(FenceKind::Vertex, &device), FenceState::Cleared);
    }

    #[test]
    fn test_wait_clears() {
        let device = DummyDevice::new();
        let mut tracker = FenceTracker::new();
        tracker.set(FenceKind::Fragment, device.insert_fence());
        assert!(tracker.is_pending(FenceKind::Fragment, &device));

        tracker.wait(FenceKind::Fragment, &device);
        assert!(!tracker.is_pending(FenceKind::Fragment, &device));
    }

    #[test]
    fn test_set_replaces_previous_use() {
        let device = DummyDevice::new();
        let mut tracker = FenceTracker::new();
        let first = device.insert_fence();
        let second = device.insert_fence();
        tracker.set(FenceKind::Vertex, first);
        tracker.set(FenceKind::Vertex, second);

        device.complete_fences_through(first);
        assert!(tracker.is_pending(FenceKind::Vertex, &device));
        assert_eq!(tracker.pending_tokens(&device), vec![second]);
    }
}
