//! Heap-backed memory segment.

use super::{MemorySegment, MemoryType};
use crate::error::{Error, Result};
use std::cell::UnsafeCell;

/// A memory segment backed by a heap allocation.
///
/// This is the storage behind plain host buffers.
///
/// # Example
///
/// ```rust
/// use sigbuf::memory::{HeapSegment, MemorySegment};
///
/// let segment = HeapSegment::new(1024).unwrap();
/// assert_eq!(segment.len(), 1024);
/// ```
pub struct HeapSegment {
    /// Boxed so the region never moves; `UnsafeCell` because writers and
    /// readers mutate disjoint ranges through a shared handle.
    data: Box<[UnsafeCell<u8>]>,
}

// SAFETY: The segment only hands out raw pointers; callers coordinate access
// to disjoint ranges through the owning buffer's lock.
unsafe impl Send for HeapSegment {}
unsafe impl Sync for HeapSegment {}

impl HeapSegment {
    /// Create a new zero-initialized heap segment.
    ///
    /// # Errors
    ///
    /// Returns an error if size is 0.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }

        let data = (0..size).map(|_| UnsafeCell::new(0u8)).collect();
        Ok(Self { data })
    }
}

impl MemorySegment for HeapSegment {
    fn as_ptr(&self) -> *const u8 {
        UnsafeCell::raw_get(self.data.as_ptr()) as *const u8
    }

    fn as_mut_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.data.as_ptr())
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn memory_type(&self) -> MemoryType {
        MemoryType::Host
    }
}
