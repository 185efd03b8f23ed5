//! Default buffer sizes.
//!
//! Stages that do not ask for a specific buffer size get one sized in bytes
//! rather than items, so wide items (vectors, frames) do not blow up memory
//! and narrow items (bytes, samples) still get a useful run length.
//!
//! # Usage
//!
//! ```rust
//! use sigbuf::defaults;
//!
//! // complex float samples
//! assert_eq!(defaults::default_capacity_items(8), 4096);
//! ```

// =============================================================================
// Sizes
// =============================================================================

/// Default buffer size in bytes (32 KiB).
pub const DEFAULT_BUFFER_BYTES: usize = 32 * 1024;

/// Smallest capacity handed out by [`default_capacity_items`].
///
/// Two items is the least that lets a writer and a reader make progress
/// without waiting on each other for every item.
pub const MIN_CAPACITY_ITEMS: usize = 2;

/// Downstream read granularity assumed when the consumers declare none.
pub const DEFAULT_DOWNSTREAM_LCM: usize = 1;

// =============================================================================
// Helpers
// =============================================================================

/// Default capacity in items for items of `item_size` bytes.
pub fn default_capacity_items(item_size: usize) -> usize {
    (DEFAULT_BUFFER_BYTES / item_size.max(1)).max(MIN_CAPACITY_ITEMS)
}
