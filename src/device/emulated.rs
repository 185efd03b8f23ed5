//! Host-memory stand-in for a device.

use super::{DeviceMemory, DevicePtr};
use crate::error::{Error, Result};
use crate::memory::{HeapSegment, MemorySegment};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// A device whose "device memory" is a separate set of heap allocations.
///
/// Every copy is range-checked against the live allocations, so a buffer bug
/// that would scribble outside a device region surfaces as
/// [`Error::TransferFailed`] instead of memory corruption.
///
/// # Example
///
/// ```rust
/// use sigbuf::device::{DeviceMemory, EmulatedDevice};
///
/// let device = EmulatedDevice::new("emu0");
/// let ptr = device.allocate(64).unwrap();
/// let src = [7u8; 16];
/// unsafe { device.copy_to_device(ptr, src.as_ptr(), src.len()).unwrap() };
///
/// let mut back = [0u8; 16];
/// unsafe { device.copy_to_host(back.as_mut_ptr(), ptr, back.len()).unwrap() };
/// assert_eq!(back, src);
/// # unsafe { device.free(ptr, 64) };
/// ```
pub struct EmulatedDevice {
    name: String,
    allocations: Mutex<HashMap<usize, HeapSegment>>,
    move_supported: bool,
    fail_transfers: AtomicBool,
    bytes_to_device: AtomicU64,
    bytes_to_host: AtomicU64,
}

impl EmulatedDevice {
    /// Create an emulated device without device-to-device move support.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allocations: Mutex::new(HashMap::new()),
            move_supported: false,
            fail_transfers: AtomicBool::new(false),
            bytes_to_device: AtomicU64::new(0),
            bytes_to_host: AtomicU64::new(0),
        }
    }

    /// Declare overlapping device-to-device moves as supported.
    pub fn with_move_support(mut self) -> Self {
        self.move_supported = true;
        self
    }

    /// Make every subsequent copy fail until switched off again.
    pub fn inject_transfer_fault(&self, fail: bool) {
        self.fail_transfers.store(fail, Ordering::SeqCst);
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total bytes copied host-to-device so far.
    pub fn bytes_to_device(&self) -> u64 {
        self.bytes_to_device.load(Ordering::Relaxed)
    }

    /// Total bytes copied device-to-host so far.
    pub fn bytes_to_host(&self) -> u64 {
        self.bytes_to_host.load(Ordering::Relaxed)
    }

    fn check_fault(&self, what: &str) -> Result<()> {
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(Error::TransferFailed(format!(
                "{what} on device '{}' failed (injected fault)",
                self.name
            )));
        }
        Ok(())
    }

    /// Verify that `[ptr, ptr + len)` lies inside one live allocation.
    fn check_range(&self, ptr: DevicePtr, len: usize) -> Result<()> {
        let allocations = self
            .allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let inside = allocations.iter().any(|(&base, segment)| {
            ptr.addr() >= base && ptr.addr() + len <= base + segment.len()
        });
        if inside {
            Ok(())
        } else {
            Err(Error::TransferFailed(format!(
                "device range {:#x}+{len} is outside every allocation of '{}'",
                ptr.addr(),
                self.name
            )))
        }
    }
}

impl DeviceMemory for EmulatedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn allocate(&self, bytes: usize) -> Result<DevicePtr> {
        let segment = HeapSegment::new(bytes)?;
        let base = segment.as_mut_ptr() as usize;
        self.allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(base, segment);
        Ok(DevicePtr::new(base))
    }

    unsafe fn free(&self, ptr: DevicePtr, _bytes: usize) {
        let removed = self
            .allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ptr.addr());
        if removed.is_none() {
            tracing::warn!(device = %self.name, addr = ptr.addr(), "free of unknown device pointer");
        }
    }

    unsafe fn copy_to_device(&self, dst: DevicePtr, src: *const u8, len: usize) -> Result<()> {
        self.check_fault("host-to-device copy")?;
        self.check_range(dst, len)?;
        // SAFETY: dst range checked above; caller guarantees the host range.
        unsafe { std::ptr::copy_nonoverlapping(src, dst.as_raw(), len) };
        self.bytes_to_device.fetch_add(len as u64, Ordering::Relaxed);
        Ok(())
    }

    unsafe fn copy_to_host(&self, dst: *mut u8, src: DevicePtr, len: usize) -> Result<()> {
        self.check_fault("device-to-host copy")?;
        self.check_range(src, len)?;
        // SAFETY: src range checked above; caller guarantees the host range.
        unsafe { std::ptr::copy_nonoverlapping(src.as_raw() as *const u8, dst, len) };
        self.bytes_to_host.fetch_add(len as u64, Ordering::Relaxed);
        Ok(())
    }

    unsafe fn copy_on_device(&self, dst: DevicePtr, src: DevicePtr, len: usize) -> Result<()> {
        self.check_fault("device-to-device copy")?;
        self.check_range(dst, len)?;
        self.check_range(src, len)?;
        // SAFETY: both ranges checked; caller guarantees they do not overlap.
        unsafe { std::ptr::copy_nonoverlapping(src.as_raw() as *const u8, dst.as_raw(), len) };
        Ok(())
    }

    unsafe fn move_on_device(&self, dst: DevicePtr, src: DevicePtr, len: usize) -> Result<()> {
        if !self.move_supported {
            return Err(Error::Unsupported(format!(
                "device-to-device move of {len} bytes is not implemented by device '{}'",
                self.name
            )));
        }
        self.check_fault("device-to-device move")?;
        self.check_range(dst, len)?;
        self.check_range(src, len)?;
        // SAFETY: both ranges checked; `copy` tolerates overlap.
        unsafe { std::ptr::copy(src.as_raw() as *const u8, dst.as_raw(), len) };
        Ok(())
    }

    fn supports_move(&self) -> bool {
        self.move_supported
    }
}

impl std::fmt::Debug for EmulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedDevice")
            .field("name", &self.name)
            .field("allocations", &self.allocation_count())
            .field("move_supported", &self.move_supported)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_device() {
        let device = EmulatedDevice::new("emu");
        let ptr = device.allocate(32).unwrap();
        let src: Vec<u8> = (0..32).collect();
        let mut dst = vec![0u8; 32];
        unsafe {
            device.copy_to_device(ptr, src.as_ptr(), 32).unwrap();
            device.copy_to_host(dst.as_mut_ptr(), ptr, 32).unwrap();
            device.free(ptr, 32);
        }
        assert_eq!(src, dst);
        assert_eq!(device.bytes_to_device(), 32);
        assert_eq!(device.bytes_to_host(), 32);
        assert_eq!(device.allocation_count(), 0);
    }

    #[test]
    fn test_out_of_range_copy_is_rejected() {
        let device = EmulatedDevice::new("emu");
        let ptr = device.allocate(16).unwrap();
        let src = [0u8; 32];
        let err = unsafe { device.copy_to_device(ptr, src.as_ptr(), 32) }.unwrap_err();
        assert!(matches!(err, Error::TransferFailed(_)));
        unsafe { device.free(ptr, 16) };
    }

    #[test]
    fn test_move_unsupported_by_default() {
        let device = EmulatedDevice::new("emu");
        let ptr = device.allocate(16).unwrap();
        let err = unsafe { device.move_on_device(ptr, ptr.add(4), 8) }.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert!(!device.supports_move());
        unsafe { device.free(ptr, 16) };
    }

    #[test]
    fn test_move_with_support_handles_overlap() {
        let device = EmulatedDevice::new("emu").with_move_support();
        let ptr = device.allocate(8).unwrap();
        let src = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut out = [0u8; 8];
        unsafe {
            device.copy_to_device(ptr, src.as_ptr(), 8).unwrap();
            device.move_on_device(ptr, ptr.add(2), 6).unwrap();
            device.copy_to_host(out.as_mut_ptr(), ptr, 8).unwrap();
            device.free(ptr, 8);
        }
        assert_eq!(out, [3, 4, 5, 6, 7, 8, 7, 8]);
    }

    #[test]
    fn test_injected_fault() {
        let device = EmulatedDevice::new("emu");
        let ptr = device.allocate(8).unwrap();
        device.inject_transfer_fault(true);
        let src = [0u8; 8];
        assert!(unsafe { device.copy_to_device(ptr, src.as_ptr(), 8) }.is_err());
        device.inject_transfer_fault(false);
        assert!(unsafe { device.copy_to_device(ptr, src.as_ptr(), 8) }.is_ok());
        unsafe { device.free(ptr, 8) };
    }
}
