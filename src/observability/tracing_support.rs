//! Tracing integration for structured logging and spans.

use tracing::{Level, Span, span};

/// Create the span a buffer logs under for its whole lifetime.
///
/// # Example
///
/// ```rust
/// use sigbuf::observability::span_buffer;
///
/// let span = span_buffer("fir_filter0", 7);
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_buffer(owner: &str, id: u64) -> Span {
    span!(Level::DEBUG, "buffer", owner = %owner, id = id)
}

/// Log a write cursor advance.
#[inline]
pub fn trace_write(write_index: usize, nitems: usize, written: u64) {
    tracing::trace!(write_index, nitems, written, "write pointer advanced");
}

/// Log a read cursor advance.
#[inline]
pub fn trace_read(reader: u64, read_index: usize, nitems: usize, items_read: u64) {
    tracing::trace!(reader, read_index, nitems, items_read, "read pointer advanced");
}
