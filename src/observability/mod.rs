//! Observability features: metrics and tracing.
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `sigbuf_buffers_allocated` | Gauge | Buffers currently alive |
//! | `sigbuf_relocations_total` | Counter | Relocations, labelled by `kind` |
//! | `sigbuf_relocated_items_total` | Counter | Items moved by relocations, labelled by `kind` |
//! | `sigbuf_transfer_bytes_total` | Counter | Host/device copy volume, labelled by `direction` |
//!
//! Nothing is exported unless the application installs a `metrics` recorder.
//!
//! ## Tracing
//!
//! Each buffer owns a `buffer` span (owner name and buffer id); allocation,
//! relocation and blocked-callback decisions are logged at `debug`, cursor
//! movement at `trace`.
//!
//! ## Example
//!
//! ```rust
//! use sigbuf::observability::{buffers_currently_allocated, init_metrics};
//!
//! init_metrics();
//! println!("{} buffers alive", buffers_currently_allocated());
//! ```

mod metrics;
mod tracing_support;

pub use metrics::{
    RelocationKind, buffers_currently_allocated, init_metrics, record_relocation, record_transfer,
};
pub(crate) use metrics::{record_buffer_created, record_buffer_dropped};
pub use tracing_support::{span_buffer, trace_read, trace_write};
