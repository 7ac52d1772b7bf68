//! Mesh cache error types.

use std::fmt;

use crate::device::GpuBufferId;

/// Errors reported by a [`MeshDevice`](crate::device::MeshDevice).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device could not provide the requested memory.
    OutOfMemory,
    /// The GPU device was lost.
    DeviceLost,
    /// Mapping a buffer for CPU access failed.
    MapFailed(String),
    /// The buffer handle does not name a live buffer.
    InvalidBuffer(GpuBufferId),
    /// The operation is not supported by this device.
    Unsupported(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::MapFailed(msg) => write!(f, "buffer map failed: {msg}"),
            Self::InvalidBuffer(id) => write!(f, "invalid buffer handle {id:?}"),
            Self::Unsupported(msg) => write!(f, "operation not supported: {msg}"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Errors that can occur while driving the mesh cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshCacheError {
    /// The cache could not be initialized (no update strategy, reserve
    /// allocation failed, ...).
    InitializationFailed(String),
    /// The cache has been reset and not initialized again.
    NotInitialized,
    /// `lock_buffers` was called while the buffers were already locked.
    AlreadyLocked,
    /// An operation that needs locked buffers was called while unlocked.
    NotLocked,
    /// The item handle is stale or was never issued by this cache.
    InvalidHandle,
    /// The item was evicted and only waits for its fence before being freed.
    ItemDestroyed,
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// The device collaborator failed.
    Device(DeviceError),
}

impl fmt::Display for MeshCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "mesh cache initialization failed: {msg}"),
            Self::NotInitialized => write!(f, "mesh cache is not initialized"),
            Self::AlreadyLocked => write!(f, "mesh cache buffers are already locked"),
            Self::NotLocked => write!(f, "mesh cache buffers are not locked"),
            Self::InvalidHandle => write!(f, "invalid mesh cache item handle"),
            Self::ItemDestroyed => write!(f, "mesh cache item was evicted"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::Device(err) => write!(f, "device error: {err}"),
        }
    }
}

impl std::error::Error for MeshCacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Device(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DeviceError> for MeshCacheError {
    fn from(err: DeviceError) -> Self {
        Self::Device(err)
    }
}

/// Outcome of a failed [`MeshCache::alloc_cache_item`](crate::MeshCache::alloc_cache_item).
///
/// The caller is expected to skip drawing the mesh for this frame rather than
/// propagate the failure further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocError {
    /// Not enough space right now. Retrying in a later frame may succeed.
    Fail,
    /// The request is larger than a growth chunk can ever hold with the
    /// current parameters. Retrying with the same size is pointless.
    TooBig,
    /// Protocol violation: the buffers could not be locked for allocation.
    StateError,
}

impl AllocError {
    /// Whether the same request may succeed later.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Fail)
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fail => write!(f, "mesh cache allocation failed"),
            Self::TooBig => write!(f, "mesh is larger than the cache growth granularity"),
            Self::StateError => write!(f, "mesh cache is in the wrong state for allocation"),
        }
    }
}

impl std::error::Error for AllocError {}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeviceError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = MeshCacheError::InitializationFailed("no reserve".to_string());
        assert_eq!(err.to_string(), "mesh cache initialization failed: no reserve");
    }

    #[test]
    fn test_device_error_wrapping() {
        let err: MeshCacheError = DeviceError::DeviceLost.into();
        assert_eq!(err.to_string(), "device error: GPU device lost");
        assert!(err.source().is_some());
        assert!(MeshCacheError::NotLocked.source().is_none());
    }

    #[test]
    fn test_alloc_error_retry() {
        assert!(AllocError::Fail.is_retryable());
        assert!(!AllocError::TooBig.is_retryable());
        assert!(!AllocError::StateError.is_retryable());
    }
}
