//! # sigbuf
//!
//! Inter-stage buffers for block-based streaming signal processing.
//!
//! A producing stage writes items into a [`Buffer`]; any number of consuming
//! stages read them through their own [`BufferReader`]. Storage can live in
//! heap memory, pinned host memory, or device memory reached only through
//! explicit copies, selected per buffer type through the
//! [`BufferTypeRegistry`].
//!
//! ## Features
//!
//! - **Single writer, many readers**: one cursor table, one lock per buffer
//! - **Flat storage with relocation**: single-mapped buffers move history and
//!   stalled tails to the front instead of needing mirrored memory
//! - **Cooperative backpressure**: no blocking calls, only "no room" results
//!   and blocked callbacks for the executor to drive
//! - **Host/device contexts**: host-to-device, device-to-host, host-to-host
//!   and device-to-device storage behind one interface
//!
//! ## Quick Start
//!
//! ```rust
//! use sigbuf::prelude::*;
//!
//! let factory = BufferTypeRegistry::global().lookup(&BufferType::host()).unwrap();
//! let buffer = factory
//!     .make(1024, 4, 1, &ProducerInfo::new("source"), &BufferOwner::new("source"))
//!     .unwrap();
//! let mut reader = buffer.add_reader(1, 0).unwrap();
//!
//! let n = buffer.space_available().unwrap().min(256);
//! // ... fill `n` items at buffer.write_pointer() ...
//! buffer.post_work(n).unwrap();
//! buffer.update_write_pointer(n);
//!
//! assert_eq!(reader.items_available(), n);
//! reader.update_read_pointer(n);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod backend;
pub mod buffer;
pub mod defaults;
pub mod device;
pub mod error;
pub mod memory;
pub mod observability;
pub mod registry;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::backend::{BufferBackend, BufferContext, DeviceBackend, HostBackend};
    pub use crate::buffer::{
        Buffer, BufferOwner, BufferReader, BufferRequest, MappingType, ProducerInfo, Tag, TagValue,
    };
    pub use crate::device::{DeviceMemory, EmulatedDevice};
    pub use crate::error::{Error, Result};
    pub use crate::registry::{BufferFactory, BufferType, BufferTypeRegistry};
}

pub use buffer::{Buffer, BufferReader};
pub use error::{Error, Result};
pub use registry::{BufferType, BufferTypeRegistry};
