// src/device/mod.rs
// Device memory abstraction: addresses, allocation, host<->device copies and the upload stream
// Exists so pools and records can hold raw device addresses independent of the backing runtime

pub mod buffer;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod host;
pub mod storage;
pub mod tagged;

pub use buffer::{DeviceSlice, TypedBuffer};
#[cfg(feature = "gpu")]
pub use gpu::{GpuContext, GpuMemory};
pub use host::HostMemory;
pub use storage::MultiTypeStorage;
pub use tagged::{DeviceVariant, Tagged, TaggedPtr, VariantRecord};

use crate::error::{RenderError, RenderResult};
use bytemuck::{Pod, Zeroable};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Raw device address. `NULL` (0) is never handed out by an allocator.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    pub const NULL: DevicePtr = DevicePtr(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn addr(self) -> u64 {
        self.0
    }

    /// Byte offset from this address; offsetting NULL stays NULL.
    pub fn offset(self, bytes: usize) -> DevicePtr {
        if self.is_null() {
            self
        } else {
            DevicePtr(self.0 + bytes as u64)
        }
    }
}

impl fmt::Debug for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("DevicePtr(null)")
        } else {
            write!(f, "DevicePtr({:#x})", self.0)
        }
    }
}

/// Counters of host<->device traffic, used by tests and debug logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub allocations: u64,
    pub frees: u64,
    pub blocking_copies: u64,
    pub async_copies: u64,
    pub bytes_to_device: u64,
    pub bytes_to_host: u64,
}

/// A device heap with one ordered upload stream.
///
/// Blocking copies and readbacks are ordered after every queued async copy.
/// Async copies become visible to the device after `synchronize()`.
pub trait DeviceMemory: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Allocate `size` bytes. Zero-sized requests return `DevicePtr::NULL`.
    fn alloc(&self, size: usize) -> RenderResult<DevicePtr>;

    /// Release an allocation made by `alloc`. Freeing NULL is a no-op.
    fn free(&self, ptr: DevicePtr) -> RenderResult<()>;

    fn copy_to_device(&self, dst: DevicePtr, data: &[u8]) -> RenderResult<()>;

    fn copy_to_device_async(&self, dst: DevicePtr, data: &[u8]) -> RenderResult<()>;

    fn copy_to_host(&self, src: DevicePtr, len: usize) -> RenderResult<Vec<u8>>;

    fn synchronize(&self) -> RenderResult<()>;

    fn allocated_bytes(&self) -> usize;

    fn transfer_stats(&self) -> TransferStats;
}

/// Shared handle to a device heap.
pub type DeviceHandle = Arc<dyn DeviceMemory>;

/// Read one Pod record from device memory.
pub fn read_record<T: Pod>(memory: &dyn DeviceMemory, ptr: DevicePtr) -> RenderResult<T> {
    if ptr.is_null() {
        return Err(RenderError::device("read through a null device pointer"));
    }
    let bytes = memory.copy_to_host(ptr, std::mem::size_of::<T>())?;
    Ok(bytemuck::pod_read_unaligned(&bytes))
}

/// Read `count` consecutive Pod records from device memory.
pub fn read_array<T: Pod>(
    memory: &dyn DeviceMemory,
    ptr: DevicePtr,
    count: usize,
) -> RenderResult<Vec<T>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if ptr.is_null() {
        return Err(RenderError::device("read through a null device pointer"));
    }
    let stride = std::mem::size_of::<T>();
    let bytes = memory.copy_to_host(ptr, stride * count)?;
    Ok(bytes
        .chunks_exact(stride)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

const ADDRESS_BASE: u64 = 0x1000_0000;
const ADDRESS_ALIGN: u64 = 256;

/// Monotonic address allocator shared by the backends. Addresses are never reused.
#[derive(Debug)]
pub(crate) struct AddressSpace {
    next: u64,
}

impl AddressSpace {
    pub(crate) fn new() -> Self {
        Self { next: ADDRESS_BASE }
    }

    pub(crate) fn reserve(&mut self, size: usize) -> DevicePtr {
        let base = self.next;
        let end = base + size.max(1) as u64;
        self.next = (end + ADDRESS_ALIGN - 1) / ADDRESS_ALIGN * ADDRESS_ALIGN;
        DevicePtr(base)
    }
}

/// Resolve `ptr..ptr+len` to (allocation base, offset) within `allocations`.
pub(crate) fn locate<A>(
    allocations: &BTreeMap<u64, A>,
    ptr: DevicePtr,
    len: usize,
    size_of: impl Fn(&A) -> usize,
) -> RenderResult<(u64, usize)> {
    let (base, alloc) = allocations
        .range(..=ptr.0)
        .next_back()
        .ok_or_else(|| RenderError::device(format!("{ptr:?} is not a device allocation")))?;
    let offset = (ptr.0 - base) as usize;
    let capacity = size_of(alloc);
    if offset + len > capacity {
        return Err(RenderError::device(format!(
            "access of {len} bytes at {ptr:?} overruns allocation {:#x} of {capacity} bytes",
            base
        )));
    }
    Ok((*base, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_space_is_monotonic_and_aligned() {
        let mut space = AddressSpace::new();
        let a = space.reserve(10);
        let b = space.reserve(0);
        let c = space.reserve(300);
        assert!(!a.is_null());
        assert!(a < b && b < c);
        assert_eq!(b.addr() % ADDRESS_ALIGN, 0);
        assert_eq!(c.addr() % ADDRESS_ALIGN, 0);
    }

    #[test]
    fn locate_rejects_overrun() {
        let mut allocations = BTreeMap::new();
        allocations.insert(ADDRESS_BASE, vec![0u8; 16]);
        let ok = locate(&allocations, DevicePtr(ADDRESS_BASE + 8), 8, |v| v.len());
        assert_eq!(ok.unwrap(), (ADDRESS_BASE, 8));
        assert!(locate(&allocations, DevicePtr(ADDRESS_BASE + 8), 9, |v| v.len()).is_err());
        assert!(locate(&allocations, DevicePtr(4), 1, |v| v.len()).is_err());
    }

    #[test]
    fn null_offset_stays_null() {
        assert!(DevicePtr::NULL.offset(64).is_null());
        assert_eq!(DevicePtr(0x100).offset(16), DevicePtr(0x110));
    }
}
