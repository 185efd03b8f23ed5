//! Device memory capability.
//!
//! Buffers never talk to a GPU driver directly. A device backend hands them a
//! [`DeviceMemory`] implementation, an opaque allocate/copy capability, and
//! every access to device-resident data goes through it. This keeps the
//! buffer and reader logic free of driver specifics: CUDA, HIP or Vulkan
//! bindings live in the implementor's crate.
//!
//! [`EmulatedDevice`] implements the capability over separately allocated
//! host memory. It exercises every host/device code path without hardware.

mod emulated;

pub use emulated::EmulatedDevice;

use crate::error::{Error, Result};
use std::fmt;

/// Address of a device allocation, in the device's own address space.
///
/// Not dereferenceable from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(usize);

impl DevicePtr {
    /// Wrap a raw device address.
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// The raw device address.
    pub const fn addr(self) -> usize {
        self.0
    }

    /// Offset this pointer by `bytes`.
    #[inline]
    pub const fn add(self, bytes: usize) -> Self {
        Self(self.0 + bytes)
    }

    /// The address as an opaque pointer, for APIs that traffic in `*mut u8`.
    #[inline]
    pub fn as_raw(self) -> *mut u8 {
        self.0 as *mut u8
    }
}

/// Device memory management trait.
///
/// Implementations wrap a device runtime's allocation and copy calls.
/// All copy methods are `unsafe` because the host side is a raw pointer and
/// the device side is an unchecked address: the caller guarantees both ranges
/// lie inside live allocations.
pub trait DeviceMemory: Send + Sync {
    /// Human-readable device name, used in logs and registry names.
    fn name(&self) -> &str;

    /// Allocate `bytes` of zero-initialized device memory.
    fn allocate(&self, bytes: usize) -> Result<DevicePtr>;

    /// Release an allocation made by [`DeviceMemory::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from this device and must not be used afterwards.
    unsafe fn free(&self, ptr: DevicePtr, bytes: usize);

    /// Copy `len` bytes from host memory to the device.
    ///
    /// # Safety
    ///
    /// `src..src+len` must be readable host memory; `dst..dst+len` must lie in
    /// a live device allocation.
    unsafe fn copy_to_device(&self, dst: DevicePtr, src: *const u8, len: usize) -> Result<()>;

    /// Copy `len` bytes from the device to host memory.
    ///
    /// # Safety
    ///
    /// `dst..dst+len` must be writable host memory; `src..src+len` must lie in
    /// a live device allocation.
    unsafe fn copy_to_host(&self, dst: *mut u8, src: DevicePtr, len: usize) -> Result<()>;

    /// Copy between two non-overlapping device ranges.
    ///
    /// # Safety
    ///
    /// Both ranges must lie in live device allocations and must not overlap.
    unsafe fn copy_on_device(&self, dst: DevicePtr, src: DevicePtr, len: usize) -> Result<()>;

    /// Move between two possibly overlapping device ranges.
    ///
    /// Most device runtimes have no overlapping device-to-device copy, so the
    /// default refuses instead of silently producing corrupted data.
    ///
    /// # Safety
    ///
    /// Both ranges must lie in live device allocations.
    unsafe fn move_on_device(&self, dst: DevicePtr, src: DevicePtr, len: usize) -> Result<()> {
        let _ = (dst, src);
        Err(Error::Unsupported(format!(
            "device-to-device move of {len} bytes is not implemented by device '{}'",
            self.name()
        )))
    }

    /// Whether [`DeviceMemory::move_on_device`] is implemented.
    fn supports_move(&self) -> bool {
        false
    }
}

impl fmt::Debug for dyn DeviceMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMemory")
            .field("name", &self.name())
            .field("supports_move", &self.supports_move())
            .finish()
    }
}
