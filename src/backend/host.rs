//! Host-only backend.

use super::{BufferBackend, BufferContext, Region, Storage};
use crate::error::{Error, Result};
use crate::memory::{HeapSegment, PinnedSegment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostKind {
    Heap,
    Pinned,
}

/// Backend for buffers that live entirely in host memory.
///
/// Only the `HostToHost` context is served.
#[derive(Debug, Clone)]
pub struct HostBackend {
    kind: HostKind,
}

impl HostBackend {
    /// Ordinary heap storage.
    pub fn heap() -> Self {
        Self {
            kind: HostKind::Heap,
        }
    }

    /// Page-locked storage (falls back to pageable memory if locking fails).
    pub fn pinned() -> Self {
        Self {
            kind: HostKind::Pinned,
        }
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::heap()
    }
}

impl BufferBackend for HostBackend {
    fn name(&self) -> &str {
        match self.kind {
            HostKind::Heap => "host",
            HostKind::Pinned => "pinned_host",
        }
    }

    fn supports(&self, context: BufferContext) -> bool {
        context == BufferContext::HostToHost
    }

    fn allocate(&self, context: BufferContext, bytes: usize) -> Result<Storage> {
        if !self.supports(context) {
            return Err(Error::Unsupported(format!(
                "backend '{}' only serves host_to_host, not {context}",
                self.name()
            )));
        }
        let region = match self.kind {
            HostKind::Heap => Region::host(HeapSegment::new(bytes)?),
            HostKind::Pinned => Region::host(PinnedSegment::new_or_fallback(bytes).map_err(
                |err| Error::AllocationFailed(format!("pinned region of {bytes} bytes: {err}")),
            )?),
        };
        Storage::single(context, region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDomain;

    #[test]
    fn test_heap_backend_allocates_host_to_host() {
        let storage = HostBackend::heap()
            .allocate(BufferContext::HostToHost, 256)
            .unwrap();
        assert_eq!(storage.len(), 256);
        assert_eq!(storage.read_region().domain(), MemoryDomain::Host);
    }

    #[test]
    fn test_pinned_backend() {
        let backend = HostBackend::pinned();
        assert_eq!(backend.name(), "pinned_host");
        let storage = backend.allocate(BufferContext::HostToHost, 100).unwrap();
        assert_eq!(storage.len(), 100);
    }

    #[test]
    fn test_host_backend_rejects_device_contexts() {
        let backend = HostBackend::default();
        for context in [
            BufferContext::HostToDevice,
            BufferContext::DeviceToHost,
            BufferContext::DeviceToDevice,
        ] {
            assert!(!backend.supports(context));
            assert!(matches!(
                backend.allocate(context, 64),
                Err(Error::Unsupported(_))
            ));
        }
    }

    #[test]
    fn test_zero_bytes_fails() {
        assert!(matches!(
            HostBackend::heap().allocate(BufferContext::HostToHost, 0),
            Err(Error::AllocationFailed(_))
        ));
    }
}
