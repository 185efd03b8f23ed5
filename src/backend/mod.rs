//! Storage backends and transfer contexts.
//!
//! A backend turns a byte count and a [`BufferContext`] into [`Storage`]: one
//! region for single-domain contexts, a host region plus a device region for
//! contexts that cross domains. The buffer core only ever talks to the
//! resulting `Storage`; it never learns which allocator or device produced it.
//!
//! | Context | Writer sees | Readers see | After each production step |
//! |---------|-------------|-------------|----------------------------|
//! | `HostToHost` | host | host | nothing |
//! | `HostToDevice` | host | device | copy host → device |
//! | `DeviceToHost` | device | host | copy device → host |
//! | `DeviceToDevice` | device | device | nothing |

mod device;
mod host;
mod storage;

pub use device::DeviceBackend;
pub use host::HostBackend;
pub use storage::{Region, Storage};

use crate::error::Result;
use crate::memory::MemoryDomain;
use std::fmt;

/// Direction of data flow through a buffer, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferContext {
    /// Producer writes host memory, consumers read device memory.
    HostToDevice,
    /// Producer writes device memory, consumers read host memory.
    DeviceToHost,
    /// Both sides on the host.
    #[default]
    HostToHost,
    /// Both sides on the device.
    DeviceToDevice,
}

impl BufferContext {
    /// All four contexts.
    pub const ALL: [BufferContext; 4] = [
        BufferContext::HostToDevice,
        BufferContext::DeviceToHost,
        BufferContext::HostToHost,
        BufferContext::DeviceToDevice,
    ];

    /// The domain the producer writes into.
    #[inline]
    pub fn write_domain(self) -> MemoryDomain {
        match self {
            BufferContext::HostToDevice | BufferContext::HostToHost => MemoryDomain::Host,
            BufferContext::DeviceToHost | BufferContext::DeviceToDevice => MemoryDomain::Device,
        }
    }

    /// The domain consumers read from.
    #[inline]
    pub fn read_domain(self) -> MemoryDomain {
        match self {
            BufferContext::HostToDevice | BufferContext::DeviceToDevice => MemoryDomain::Device,
            BufferContext::DeviceToHost | BufferContext::HostToHost => MemoryDomain::Host,
        }
    }

    /// Whether data has to be copied after every production step.
    #[inline]
    pub fn crosses_domains(self) -> bool {
        self.write_domain() != self.read_domain()
    }

    /// Short label, also used as the metrics `direction` label.
    pub fn as_str(self) -> &'static str {
        match self {
            BufferContext::HostToDevice => "host_to_device",
            BufferContext::DeviceToHost => "device_to_host",
            BufferContext::HostToHost => "host_to_host",
            BufferContext::DeviceToDevice => "device_to_device",
        }
    }
}

impl fmt::Display for BufferContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A strategy for acquiring buffer storage.
///
/// Backends are stateless apart from the allocator handle they carry and are
/// shared between all buffers of one buffer type.
pub trait BufferBackend: Send + Sync + fmt::Debug {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    /// Whether this backend can serve `context`.
    fn supports(&self, context: BufferContext) -> bool;

    /// Allocate `bytes` of storage laid out for `context`.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Unsupported`] if the context cannot be served
    /// - [`crate::Error::AllocationFailed`] if memory cannot be acquired
    fn allocate(&self, context: BufferContext, bytes: usize) -> Result<Storage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_domains() {
        assert_eq!(BufferContext::HostToDevice.write_domain(), MemoryDomain::Host);
        assert_eq!(BufferContext::HostToDevice.read_domain(), MemoryDomain::Device);
        assert_eq!(BufferContext::DeviceToHost.write_domain(), MemoryDomain::Device);
        assert_eq!(BufferContext::DeviceToHost.read_domain(), MemoryDomain::Host);
        assert_eq!(BufferContext::DeviceToDevice.read_domain(), MemoryDomain::Device);
        assert_eq!(BufferContext::HostToHost.write_domain(), MemoryDomain::Host);
    }

    #[test]
    fn test_crosses_domains() {
        let crossing: Vec<_> = BufferContext::ALL
            .into_iter()
            .filter(|c| c.crosses_domains())
            .collect();
        assert_eq!(
            crossing,
            vec![BufferContext::HostToDevice, BufferContext::DeviceToHost]
        );
    }

    #[test]
    fn test_context_display() {
        assert_eq!(BufferContext::default().to_string(), "host_to_host");
        assert_eq!(BufferContext::DeviceToDevice.to_string(), "device_to_device");
    }
}
