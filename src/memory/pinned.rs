//! Page-locked host memory segment.
//!
//! Pinned memory is the host side of a host/device buffer pair: device copy
//! engines can DMA from it without first staging through pageable memory.
//!
//! # Requirements
//!
//! - `mlock` permission (`CAP_IPC_LOCK`) or a sufficient `RLIMIT_MEMLOCK`
//!
//! When the lock limit is exhausted the segment falls back to ordinary
//! anonymous memory and [`PinnedSegment::is_locked`] reports `false`.

use super::{MemorySegment, MemoryType};
use crate::error::{Error, Result};
use rustix::mm::{MapFlags, ProtFlags};
use std::ptr::NonNull;

/// A page-aligned, page-locked host memory segment.
pub struct PinnedSegment {
    /// Pointer to the mmap'd region.
    ptr: NonNull<u8>,
    /// Size requested by the caller.
    len: usize,
    /// Size actually mapped (rounded up to the page size).
    mapped_len: usize,
    /// Whether `mlock` succeeded.
    locked: bool,
}

// SAFETY: The mapping is owned by this segment and freed only on drop.
// Concurrent access to disjoint ranges is coordinated by the owning buffer.
unsafe impl Send for PinnedSegment {}
unsafe impl Sync for PinnedSegment {}

impl PinnedSegment {
    /// Allocate and lock a new segment of at least `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `size` is zero
    /// - `mmap` fails
    /// - `mlock` fails (use [`PinnedSegment::new_or_fallback`] to tolerate this)
    pub fn new(size: usize) -> Result<Self> {
        let mut segment = Self::map(size)?;
        // SAFETY: ptr/mapped_len describe the mapping we just created.
        unsafe { rustix::mm::mlock(segment.ptr.as_ptr().cast(), segment.mapped_len)? };
        segment.locked = true;
        Ok(segment)
    }

    /// Try to allocate locked memory, falling back to unlocked memory when the
    /// lock limit is hit.
    pub fn new_or_fallback(size: usize) -> Result<Self> {
        let mut segment = Self::map(size)?;
        // SAFETY: ptr/mapped_len describe the mapping we just created.
        match unsafe { rustix::mm::mlock(segment.ptr.as_ptr().cast(), segment.mapped_len) } {
            Ok(()) => segment.locked = true,
            Err(errno) => {
                tracing::warn!(
                    bytes = segment.mapped_len,
                    %errno,
                    "mlock failed, pinned segment falls back to pageable memory"
                );
            }
        }
        Ok(segment)
    }

    fn map(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }

        let page = rustix::param::page_size();
        let mapped_len = size.div_ceil(page) * page;

        let ptr = unsafe {
            rustix::mm::mmap_anonymous(
                std::ptr::null_mut(),
                mapped_len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::PRIVATE,
            )?
        };

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| Error::AllocationFailed("mmap returned null".into()))?;

        Ok(Self {
            ptr,
            len: size,
            mapped_len,
            locked: false,
        })
    }

    /// Whether the pages are actually locked in memory.
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl MemorySegment for PinnedSegment {
    fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn memory_type(&self) -> MemoryType {
        MemoryType::PinnedHost
    }
}

impl Drop for PinnedSegment {
    fn drop(&mut self) {
        unsafe {
            if self.locked {
                let _ = rustix::mm::munlock(self.ptr.as_ptr().cast(), self.mapped_len);
            }
            let _ = rustix::mm::munmap(self.ptr.as_ptr().cast(), self.mapped_len);
        }
    }
}

impl std::fmt::Debug for PinnedSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedSegment")
            .field("len", &self.len)
            .field("mapped_len", &self.mapped_len)
            .field("locked", &self.locked)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_segment_rounds_to_page() {
        let segment = PinnedSegment::new_or_fallback(100).unwrap();
        assert_eq!(segment.len(), 100);
        assert_eq!(segment.mapped_len % rustix::param::page_size(), 0);
        assert_eq!(segment.memory_type(), MemoryType::PinnedHost);
    }

    #[test]
    fn test_pinned_segment_zero_size_fails() {
        assert!(PinnedSegment::new_or_fallback(0).is_err());
    }

    #[test]
    fn test_pinned_segment_is_zeroed_and_writable() {
        let segment = PinnedSegment::new_or_fallback(4096).unwrap();
        unsafe {
            assert!(segment.as_slice().iter().all(|&b| b == 0));
            segment.as_mut_slice()[..5].copy_from_slice(b"hello");
            assert_eq!(&segment.as_slice()[..5], b"hello");
        }
    }
}
