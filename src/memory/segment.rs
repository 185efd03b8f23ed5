//! Memory segment trait and types.

use std::fmt;

/// Type of host memory backing a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryType {
    /// Ordinary pageable heap memory.
    Host,
    /// Page-locked host memory, suitable as a DMA staging area for devices.
    ///
    /// A segment created as pinned may fall back to pageable memory when the
    /// process lock limit is exhausted; see [`super::PinnedSegment::is_locked`].
    PinnedHost,
}

impl MemoryType {
    /// Is this memory guaranteed to stay resident?
    #[inline]
    pub fn is_pinned(&self) -> bool {
        matches!(self, MemoryType::PinnedHost)
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryType::Host => f.write_str("host"),
            MemoryType::PinnedHost => f.write_str("pinned-host"),
        }
    }
}

/// Which side of a host/device pair a region lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryDomain {
    /// CPU-addressable memory (heap or pinned).
    Host,
    /// Device memory, reachable only through a [`crate::device::DeviceMemory`].
    Device,
}

impl fmt::Display for MemoryDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryDomain::Host => f.write_str("host"),
            MemoryDomain::Device => f.write_str("device"),
        }
    }
}

/// Trait for host memory segment backends.
///
/// A memory segment represents a contiguous, CPU-addressable region used as
/// buffer storage. Device memory is not a segment: it is only reachable
/// through a [`crate::device::DeviceMemory`] capability.
///
/// # Safety
///
/// Implementations must ensure that:
/// - Pointers remain valid for the lifetime of the segment
/// - Thread-safety requirements are met (Send + Sync)
/// - The region is zero-initialized on creation
pub trait MemorySegment: Send + Sync {
    /// Get a raw pointer to the start of this segment.
    fn as_ptr(&self) -> *const u8;

    /// Get a mutable pointer to the start of this segment.
    fn as_mut_ptr(&self) -> *mut u8;

    /// Total size of the segment in bytes.
    fn len(&self) -> usize;

    /// Returns true if the segment has zero length.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The type of memory backing this segment.
    fn memory_type(&self) -> MemoryType;

    /// Get the segment as a byte slice.
    ///
    /// # Safety
    ///
    /// The caller must ensure no mutable references exist to this memory.
    unsafe fn as_slice(&self) -> &[u8] {
        // SAFETY: Caller guarantees no mutable references exist.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len()) }
    }

    /// Get the segment as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// The caller must ensure exclusive access to this memory. Buffers hand
    /// out disjoint ranges to the writer and readers; the segment itself does
    /// no synchronization.
    #[allow(clippy::mut_from_ref)]
    unsafe fn as_mut_slice(&self) -> &mut [u8] {
        // SAFETY: Caller guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.len()) }
    }
}

impl fmt::Debug for dyn MemorySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySegment")
            .field("len", &self.len())
            .field("memory_type", &self.memory_type())
            .finish()
    }
}
