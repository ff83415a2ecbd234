// src/device/host.rs
// Host-resident device heap with an ordered asynchronous upload stream
// Exists to run the upload subsystem and the wavefront kernels without a GPU adapter

use super::{locate, AddressSpace, DeviceMemory, DevicePtr, TransferStats};
use crate::error::{RenderError, RenderResult};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;

struct PendingCopy {
    dst: DevicePtr,
    data: Vec<u8>,
}

struct HostHeap {
    space: AddressSpace,
    allocations: BTreeMap<u64, Vec<u8>>,
    allocated: usize,
}

/// Device memory emulated in host RAM.
///
/// Allocations are zero-initialized. An optional byte budget turns
/// over-allocation into a device error, like running out of VRAM.
pub struct HostMemory {
    heap: RwLock<HostHeap>,
    stream: Mutex<Vec<PendingCopy>>,
    stats: Mutex<TransferStats>,
    budget: Option<usize>,
}

impl HostMemory {
    pub fn new() -> Self {
        Self {
            heap: RwLock::new(HostHeap {
                space: AddressSpace::new(),
                allocations: BTreeMap::new(),
                allocated: 0,
            }),
            stream: Mutex::new(Vec::new()),
            stats: Mutex::new(TransferStats::default()),
            budget: None,
        }
    }

    pub fn with_budget(budget_bytes: usize) -> Self {
        Self {
            budget: Some(budget_bytes),
            ..Self::new()
        }
    }

    /// Number of async copies queued but not yet synchronized.
    pub fn pending_copies(&self) -> usize {
        self.stream.lock().len()
    }

    pub fn allocation_count(&self) -> usize {
        self.heap.read().allocations.len()
    }

    fn write(heap: &mut HostHeap, dst: DevicePtr, data: &[u8]) -> RenderResult<()> {
        let (base, offset) = locate(&heap.allocations, dst, data.len(), |a| a.len())?;
        let Some(bytes) = heap.allocations.get_mut(&base) else {
            return Err(RenderError::device(format!("{dst:?} vanished during copy")));
        };
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Apply every queued copy in submission order.
    fn flush_stream(&self) -> RenderResult<()> {
        let pending = std::mem::take(&mut *self.stream.lock());
        if pending.is_empty() {
            return Ok(());
        }
        let mut heap = self.heap.write();
        for copy in pending {
            Self::write(&mut heap, copy.dst, &copy.data)?;
        }
        Ok(())
    }
}

impl Default for HostMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceMemory for HostMemory {
    fn backend_name(&self) -> &'static str {
        "host"
    }

    fn alloc(&self, size: usize) -> RenderResult<DevicePtr> {
        if size == 0 {
            return Ok(DevicePtr::NULL);
        }
        let mut heap = self.heap.write();
        if let Some(budget) = self.budget {
            if heap.allocated + size > budget {
                return Err(RenderError::device(format!(
                    "out of device memory: requested {size} bytes with {} of {budget} in use",
                    heap.allocated
                )));
            }
        }
        let ptr = heap.space.reserve(size);
        heap.allocations.insert(ptr.addr(), vec![0u8; size]);
        heap.allocated += size;
        self.stats.lock().allocations += 1;
        Ok(ptr)
    }

    fn free(&self, ptr: DevicePtr) -> RenderResult<()> {
        if ptr.is_null() {
            return Ok(());
        }
        self.flush_stream()?;
        let mut heap = self.heap.write();
        let bytes = heap
            .allocations
            .remove(&ptr.addr())
            .ok_or_else(|| RenderError::device(format!("free of unknown allocation {ptr:?}")))?;
        heap.allocated -= bytes.len();
        self.stats.lock().frees += 1;
        Ok(())
    }

    fn copy_to_device(&self, dst: DevicePtr, data: &[u8]) -> RenderResult<()> {
        self.flush_stream()?;
        Self::write(&mut self.heap.write(), dst, data)?;
        let mut stats = self.stats.lock();
        stats.blocking_copies += 1;
        stats.bytes_to_device += data.len() as u64;
        Ok(())
    }

    fn copy_to_device_async(&self, dst: DevicePtr, data: &[u8]) -> RenderResult<()> {
        // Validate the target now so a bad address fails at the call site.
        locate(&self.heap.read().allocations, dst, data.len(), |a| a.len())?;
        self.stream.lock().push(PendingCopy {
            dst,
            data: data.to_vec(),
        });
        let mut stats = self.stats.lock();
        stats.async_copies += 1;
        stats.bytes_to_device += data.len() as u64;
        Ok(())
    }

    fn copy_to_host(&self, src: DevicePtr, len: usize) -> RenderResult<Vec<u8>> {
        self.flush_stream()?;
        let heap = self.heap.read();
        let (base, offset) = locate(&heap.allocations, src, len, |a| a.len())?;
        let out = heap.allocations[&base][offset..offset + len].to_vec();
        self.stats.lock().bytes_to_host += len as u64;
        Ok(out)
    }

    fn synchronize(&self) -> RenderResult<()> {
        self.flush_stream()
    }

    fn allocated_bytes(&self) -> usize {
        self.heap.read().allocated
    }

    fn transfer_stats(&self) -> TransferStats {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_copy_round_trips() {
        let memory = HostMemory::new();
        let ptr = memory.alloc(8).unwrap();
        memory.copy_to_device(ptr, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(memory.copy_to_host(ptr.offset(4), 4).unwrap(), vec![5, 6, 7, 8]);
        assert_eq!(memory.transfer_stats().blocking_copies, 1);
    }

    #[test]
    fn async_copies_stay_queued_until_synchronize() {
        let memory = HostMemory::new();
        let ptr = memory.alloc(4).unwrap();
        memory.copy_to_device_async(ptr, &[9, 9, 9, 9]).unwrap();
        assert_eq!(memory.pending_copies(), 1);
        memory.synchronize().unwrap();
        assert_eq!(memory.pending_copies(), 0);
        assert_eq!(memory.copy_to_host(ptr, 4).unwrap(), vec![9, 9, 9, 9]);
    }

    #[test]
    fn readback_is_ordered_after_queued_copies() {
        let memory = HostMemory::new();
        let ptr = memory.alloc(4).unwrap();
        memory.copy_to_device_async(ptr, &[1, 1, 1, 1]).unwrap();
        memory.copy_to_device_async(ptr, &[2, 2, 2, 2]).unwrap();
        assert_eq!(memory.copy_to_host(ptr, 4).unwrap(), vec![2, 2, 2, 2]);
    }

    #[test]
    fn budget_turns_into_device_error() {
        let memory = HostMemory::with_budget(64);
        let a = memory.alloc(48).unwrap();
        let err = memory.alloc(32).unwrap_err();
        assert!(matches!(err, RenderError::Device(_)));
        memory.free(a).unwrap();
        assert!(memory.alloc(32).is_ok());
    }

    #[test]
    fn out_of_bounds_and_unknown_pointers_fail() {
        let memory = HostMemory::new();
        let ptr = memory.alloc(4).unwrap();
        assert!(memory.copy_to_device(ptr, &[0; 8]).is_err());
        assert!(memory.copy_to_device_async(DevicePtr(0x10), &[0]).is_err());
        assert!(memory.free(DevicePtr(0x10)).is_err());
        assert!(memory.free(DevicePtr::NULL).is_ok());
    }

    #[test]
    fn addresses_are_not_reused_after_free() {
        let memory = HostMemory::new();
        let a = memory.alloc(16).unwrap();
        memory.free(a).unwrap();
        let b = memory.alloc(16).unwrap();
        assert_ne!(a, b);
        assert_eq!(memory.allocated_bytes(), 16);
    }
}
