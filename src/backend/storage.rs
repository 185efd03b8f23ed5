//! Buffer storage: one or two regions plus the primitives that move data in them.

use super::BufferContext;
use crate::device::{DeviceMemory, DevicePtr};
use crate::error::{Error, Result};
use crate::memory::{MemoryDomain, MemorySegment};
use crate::observability::record_transfer;
use std::fmt;
use std::sync::Arc;

/// A contiguous region of buffer storage in one memory domain.
pub enum Region {
    /// CPU-addressable memory.
    Host(Box<dyn MemorySegment>),
    /// Memory owned by a device; freed through the device on drop.
    Device {
        /// The device the allocation belongs to.
        device: Arc<dyn DeviceMemory>,
        /// Start of the allocation.
        ptr: DevicePtr,
        /// Allocation size in bytes.
        len: usize,
    },
}

impl Region {
    /// Wrap a host memory segment.
    pub fn host(segment: impl MemorySegment + 'static) -> Self {
        Region::Host(Box::new(segment))
    }

    /// Allocate `bytes` on `device`.
    pub fn device(device: Arc<dyn DeviceMemory>, bytes: usize) -> Result<Self> {
        let ptr = device.allocate(bytes)?;
        Ok(Region::Device {
            device,
            ptr,
            len: bytes,
        })
    }

    /// The domain this region lives in.
    #[inline]
    pub fn domain(&self) -> MemoryDomain {
        match self {
            Region::Host(_) => MemoryDomain::Host,
            Region::Device { .. } => MemoryDomain::Device,
        }
    }

    /// Size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Region::Host(segment) => segment.len(),
            Region::Device { len, .. } => *len,
        }
    }

    /// Returns true if the region has zero length.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Address of byte `offset`.
    ///
    /// For device regions the result is a device address and must not be
    /// dereferenced on the host.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.len());
        match self {
            // SAFETY: offset is within (or one past) the segment.
            Region::Host(segment) => unsafe { segment.as_mut_ptr().add(offset) },
            Region::Device { ptr, .. } => ptr.add(offset).as_raw(),
        }
    }

    fn check_range(&self, offset: usize, len: usize, what: &str) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(Error::InvariantViolation(format!(
                "{what}: range {offset}+{len} exceeds {} region of {} bytes",
                self.domain(),
                self.len()
            ))),
        }
    }

    /// Copy `len` bytes from `src` to `dst` inside this region.
    ///
    /// The two ranges must not overlap; use [`Region::move_within`] otherwise.
    pub fn copy_within(&self, dst: usize, src: usize, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        self.check_range(src, len, "copy source")?;
        self.check_range(dst, len, "copy destination")?;
        if src < dst + len && dst < src + len {
            return Err(Error::InvariantViolation(format!(
                "copy ranges overlap: {src}..{} and {dst}..{}",
                src + len,
                dst + len
            )));
        }
        match self {
            // SAFETY: both ranges checked in bounds and disjoint.
            Region::Host(_) => unsafe {
                std::ptr::copy_nonoverlapping(self.ptr_at(src), self.ptr_at(dst), len);
                Ok(())
            },
            Region::Device { device, ptr, .. } => unsafe {
                device.copy_on_device(ptr.add(dst), ptr.add(src), len)
            },
        }
    }

    /// Move `len` bytes from `src` to `dst` inside this region; the ranges
    /// may overlap.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] for device regions whose device has no
    /// overlapping move.
    pub fn move_within(&self, dst: usize, src: usize, len: usize) -> Result<()> {
        if len == 0 || dst == src {
            return Ok(());
        }
        self.check_range(src, len, "move source")?;
        self.check_range(dst, len, "move destination")?;
        match self {
            // SAFETY: both ranges checked in bounds; `copy` handles overlap.
            Region::Host(_) => unsafe {
                std::ptr::copy(self.ptr_at(src), self.ptr_at(dst), len);
                Ok(())
            },
            Region::Device { device, ptr, .. } => unsafe {
                device.move_on_device(ptr.add(dst), ptr.add(src), len)
            },
        }
    }

    /// Copy `[offset, offset + len)` of this region to the same range of `dst`.
    fn transfer_to(&self, dst: &Region, offset: usize, len: usize) -> Result<()> {
        self.check_range(offset, len, "transfer source")?;
        dst.check_range(offset, len, "transfer destination")?;
        // SAFETY: ranges checked against both regions, which are distinct
        // allocations.
        unsafe {
            match (self, dst) {
                (Region::Host(_), Region::Device { device, ptr, .. }) => {
                    device.copy_to_device(ptr.add(offset), self.ptr_at(offset), len)
                }
                (Region::Device { device, ptr, .. }, Region::Host(_)) => {
                    device.copy_to_host(dst.ptr_at(offset), ptr.add(offset), len)
                }
                (Region::Host(_), Region::Host(_)) => {
                    std::ptr::copy_nonoverlapping(self.ptr_at(offset), dst.ptr_at(offset), len);
                    Ok(())
                }
                (Region::Device { device, ptr, .. }, Region::Device { ptr: dst_ptr, .. }) => {
                    device.copy_on_device(dst_ptr.add(offset), ptr.add(offset), len)
                }
            }
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Region::Device { device, ptr, len } = self {
            // SAFETY: the allocation came from this device and is not used
            // after the region is gone.
            unsafe { device.free(*ptr, *len) };
        }
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Host(segment) => f
                .debug_struct("Region::Host")
                .field("len", &segment.len())
                .field("memory_type", &segment.memory_type())
                .finish(),
            Region::Device { device, len, .. } => f
                .debug_struct("Region::Device")
                .field("device", &device.name())
                .field("len", len)
                .finish(),
        }
    }
}

enum Layout {
    Single(Region),
    Split { host: Region, device: Region },
}

/// The storage of one buffer, laid out for its [`BufferContext`].
pub struct Storage {
    context: BufferContext,
    layout: Layout,
}

impl Storage {
    /// Storage made of one region, for `HostToHost` and `DeviceToDevice`.
    pub fn single(context: BufferContext, region: Region) -> Result<Self> {
        if context.crosses_domains() || region.domain() != context.read_domain() {
            return Err(Error::Unsupported(format!(
                "a single {} region cannot serve context {context}",
                region.domain()
            )));
        }
        Ok(Self {
            context,
            layout: Layout::Single(region),
        })
    }

    /// Storage made of a host and a device region of equal size, for
    /// `HostToDevice` and `DeviceToHost`.
    pub fn split(context: BufferContext, host: Region, device: Region) -> Result<Self> {
        if !context.crosses_domains() {
            return Err(Error::Unsupported(format!(
                "context {context} does not need a host/device region pair"
            )));
        }
        if host.domain() != MemoryDomain::Host || device.domain() != MemoryDomain::Device {
            return Err(Error::InvariantViolation(
                "split storage needs one host and one device region".into(),
            ));
        }
        if host.len() != device.len() {
            return Err(Error::InvariantViolation(format!(
                "host region ({}) and device region ({}) differ in size",
                host.len(),
                device.len()
            )));
        }
        Ok(Self {
            context,
            layout: Layout::Split { host, device },
        })
    }

    /// The transfer context this storage was laid out for.
    #[inline]
    pub fn context(&self) -> BufferContext {
        self.context
    }

    /// Size of each region in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.write_region().len()
    }

    /// Returns true if the storage has zero length.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn region_in(&self, domain: MemoryDomain) -> &Region {
        match &self.layout {
            Layout::Single(region) => region,
            Layout::Split { host, device } => match domain {
                MemoryDomain::Host => host,
                MemoryDomain::Device => device,
            },
        }
    }

    /// The region the producer writes into.
    #[inline]
    pub fn write_region(&self) -> &Region {
        self.region_in(self.context.write_domain())
    }

    /// The region readers observe; relocation happens here.
    #[inline]
    pub fn read_region(&self) -> &Region {
        self.region_in(self.context.read_domain())
    }

    /// Address of byte `offset` in the write region.
    #[inline]
    pub fn write_ptr(&self, offset: usize) -> *mut u8 {
        self.write_region().ptr_at(offset)
    }

    /// Address of byte `offset` in the read region.
    #[inline]
    pub fn read_ptr(&self, offset: usize) -> *const u8 {
        self.read_region().ptr_at(offset)
    }

    /// Make freshly written bytes `[offset, offset + len)` visible to readers.
    ///
    /// Copies write region to read region for cross-domain contexts and does
    /// nothing otherwise.
    pub fn post_work(&self, offset: usize, len: usize) -> Result<()> {
        let Layout::Split { .. } = &self.layout else {
            return Ok(());
        };
        if len == 0 {
            return Ok(());
        }
        let result = self
            .write_region()
            .transfer_to(self.read_region(), offset, len);
        match &result {
            Ok(()) => record_transfer(self.context, len),
            Err(err) => tracing::warn!(
                context = %self.context,
                offset,
                len,
                error = %err,
                "post-work transfer failed"
            ),
        }
        result
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Storage");
        s.field("context", &self.context);
        match &self.layout {
            Layout::Single(region) => s.field("region", region),
            Layout::Split { host, device } => s.field("host", host).field("device", device),
        };
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::EmulatedDevice;
    use crate::memory::HeapSegment;

    fn host_region(len: usize) -> Region {
        Region::host(HeapSegment::new(len).unwrap())
    }

    fn fill(region: &Region, data: &[u8]) {
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), region.ptr_at(0), data.len()) };
    }

    fn contents(region: &Region) -> Vec<u8> {
        let mut out = vec![0u8; region.len()];
        unsafe { std::ptr::copy_nonoverlapping(region.ptr_at(0), out.as_mut_ptr(), out.len()) };
        out
    }

    #[test]
    fn test_host_copy_and_move() {
        let region = host_region(8);
        fill(&region, &[1, 2, 3, 4, 5, 6, 7, 8]);
        region.copy_within(0, 6, 2).unwrap();
        assert_eq!(contents(&region), vec![7, 8, 3, 4, 5, 6, 7, 8]);
        region.move_within(1, 0, 4).unwrap();
        assert_eq!(contents(&region), vec![7, 7, 8, 3, 4, 6, 7, 8]);
    }

    #[test]
    fn test_overlapping_copy_rejected() {
        let region = host_region(8);
        let err = region.copy_within(0, 2, 4).unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let region = host_region(8);
        assert!(region.move_within(6, 0, 4).is_err());
    }

    #[test]
    fn test_device_region_freed_on_drop() {
        let device = Arc::new(EmulatedDevice::new("emu"));
        let region = Region::device(device.clone(), 64).unwrap();
        assert_eq!(region.domain(), MemoryDomain::Device);
        assert_eq!(device.allocation_count(), 1);
        drop(region);
        assert_eq!(device.allocation_count(), 0);
    }

    #[test]
    fn test_single_rejects_crossing_context() {
        assert!(Storage::single(BufferContext::HostToDevice, host_region(8)).is_err());
        assert!(Storage::single(BufferContext::DeviceToDevice, host_region(8)).is_err());
        assert!(Storage::single(BufferContext::HostToHost, host_region(8)).is_ok());
    }

    #[test]
    fn test_split_post_work_copies_to_device() {
        let device = Arc::new(EmulatedDevice::new("emu"));
        let storage = Storage::split(
            BufferContext::HostToDevice,
            host_region(16),
            Region::device(device.clone(), 16).unwrap(),
        )
        .unwrap();
        fill(storage.write_region(), &[9u8; 16]);
        storage.post_work(4, 8).unwrap();
        assert_eq!(device.bytes_to_device(), 8);

        let mut back = [0u8; 16];
        unsafe {
            device
                .copy_to_host(back.as_mut_ptr(), DevicePtr::new(storage.read_ptr(0) as usize), 16)
                .unwrap();
        }
        assert_eq!(&back[..4], &[0; 4]);
        assert_eq!(&back[4..12], &[9; 8]);
        assert_eq!(&back[12..], &[0; 4]);
    }

    #[test]
    fn test_post_work_noop_for_single_region() {
        let storage = Storage::single(BufferContext::HostToHost, host_region(16)).unwrap();
        storage.post_work(0, 16).unwrap();
        assert_eq!(storage.write_ptr(0) as *const u8, storage.read_ptr(0));
    }

    #[test]
    fn test_split_size_mismatch() {
        let device = Arc::new(EmulatedDevice::new("emu"));
        let err = Storage::split(
            BufferContext::DeviceToHost,
            host_region(16),
            Region::device(device, 32).unwrap(),
        )
        .unwrap_err();
        assert!(err.is_invariant_violation());
    }
}
