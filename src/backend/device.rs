//! Device-aware backend.

use super::{BufferBackend, BufferContext, Region, Storage};
use crate::device::DeviceMemory;
use crate::error::{Error, Result};
use crate::memory::{HeapSegment, PinnedSegment};
use std::sync::Arc;

/// Backend that places storage on a device, a pinned host staging area, or
/// both, depending on the buffer's context.
///
/// - `HostToHost`: one heap region
/// - `DeviceToDevice`: one device region
/// - `HostToDevice` / `DeviceToHost`: a pinned host region mirrored by a
///   device region
#[derive(Debug, Clone)]
pub struct DeviceBackend {
    device: Arc<dyn DeviceMemory>,
}

impl DeviceBackend {
    /// Create a backend allocating through `device`.
    pub fn new(device: Arc<dyn DeviceMemory>) -> Self {
        Self { device }
    }

    /// The device this backend allocates on.
    pub fn device(&self) -> &Arc<dyn DeviceMemory> {
        &self.device
    }
}

impl BufferBackend for DeviceBackend {
    fn name(&self) -> &str {
        self.device.name()
    }

    fn supports(&self, _context: BufferContext) -> bool {
        true
    }

    fn allocate(&self, context: BufferContext, bytes: usize) -> Result<Storage> {
        let device_region = || {
            Region::device(self.device.clone(), bytes).map_err(|err| match err {
                Error::AllocationFailed(_) => err,
                other => Error::AllocationFailed(format!(
                    "device '{}' could not provide {bytes} bytes: {other}",
                    self.device.name()
                )),
            })
        };

        let storage = match context {
            BufferContext::HostToHost => {
                Storage::single(context, Region::host(HeapSegment::new(bytes)?))?
            }
            BufferContext::DeviceToDevice => Storage::single(context, device_region()?)?,
            BufferContext::HostToDevice | BufferContext::DeviceToHost => {
                let host = PinnedSegment::new_or_fallback(bytes).map_err(|err| {
                    Error::AllocationFailed(format!("pinned region of {bytes} bytes: {err}"))
                })?;
                Storage::split(context, Region::host(host), device_region()?)?
            }
        };

        tracing::debug!(device = %self.device.name(), %context, bytes, "allocated device buffer storage");
        Ok(storage)
    }
}
