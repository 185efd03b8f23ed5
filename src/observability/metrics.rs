//! Metrics collection using metrics-rs.

use crate::backend::BufferContext;
use metrics::{Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Number of `Buffer`s currently alive in the process.
static LIVE_BUFFERS: AtomicUsize = AtomicUsize::new(0);

// Metric names as constants for consistency
const BUFFERS_ALLOCATED: &str = "sigbuf_buffers_allocated";
const RELOCATIONS: &str = "sigbuf_relocations_total";
const RELOCATED_ITEMS: &str = "sigbuf_relocated_items_total";
const TRANSFER_BYTES: &str = "sigbuf_transfer_bytes_total";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_gauge!(
        BUFFERS_ALLOCATED,
        Unit::Count,
        "Number of stream buffers currently allocated"
    );
    metrics::describe_counter!(
        RELOCATIONS,
        Unit::Count,
        "Data relocations performed by single-mapped buffers"
    );
    metrics::describe_counter!(
        RELOCATED_ITEMS,
        Unit::Count,
        "Items moved or copied by single-mapped relocations"
    );
    metrics::describe_counter!(
        TRANSFER_BYTES,
        Unit::Bytes,
        "Bytes copied between host and device regions after production"
    );
}

/// Why a single-mapped buffer moved data around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationKind {
    /// Reader history copied to the front when the writer hit the end.
    History,
    /// Unread tail brought forward for a reader stalled near the end.
    Input,
    /// Unread data compacted to the front to make room for the writer.
    Output,
}

impl RelocationKind {
    /// Label value used in metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            RelocationKind::History => "history",
            RelocationKind::Input => "input",
            RelocationKind::Output => "output",
        }
    }
}

/// Number of buffers currently alive in this process.
pub fn buffers_currently_allocated() -> usize {
    LIVE_BUFFERS.load(Ordering::SeqCst)
}

pub(crate) fn record_buffer_created() {
    let live = LIVE_BUFFERS.fetch_add(1, Ordering::SeqCst) + 1;
    gauge!(BUFFERS_ALLOCATED).set(live as f64);
}

pub(crate) fn record_buffer_dropped() {
    let live = LIVE_BUFFERS.fetch_sub(1, Ordering::SeqCst) - 1;
    gauge!(BUFFERS_ALLOCATED).set(live as f64);
}

/// Record one relocation moving `items` items.
#[inline]
pub fn record_relocation(kind: RelocationKind, items: usize) {
    counter!(RELOCATIONS, "kind" => kind.as_str()).increment(1);
    counter!(RELOCATED_ITEMS, "kind" => kind.as_str()).increment(items as u64);
}

/// Record a post-production copy across memory domains.
#[inline]
pub fn record_transfer(context: BufferContext, bytes: usize) {
    counter!(TRANSFER_BYTES, "direction" => context.as_str()).increment(bytes as u64);
}
