//! Host memory segments used as buffer storage.
//!
//! # Architecture
//!
//! - [`MemorySegment`]: Trait for CPU-addressable storage backends
//! - [`HeapSegment`]: Ordinary heap memory
//! - [`PinnedSegment`]: Page-locked memory for device staging
//! - [`MemoryDomain`]: Host or device side of a region
//!
//! Device memory is not a segment; see [`crate::device`].

mod heap;
mod pinned;
mod segment;

pub use heap::HeapSegment;
pub use pinned::PinnedSegment;
pub use segment::{MemoryDomain, MemorySegment, MemoryType};
