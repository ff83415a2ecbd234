// src/device/gpu.rs
// wgpu-backed device heap: one storage buffer per allocation behind a virtual address range
// Exists so the same pools and records can live on a real adapter when one is present

use super::{locate, AddressSpace, DeviceMemory, DevicePtr, TransferStats};
use crate::error::{RenderError, RenderResult};
use futures_intrusive::channel::shared::oneshot_channel;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

const COPY_ALIGN: usize = wgpu::COPY_BUFFER_ALIGNMENT as usize;

fn align_up(value: usize) -> usize {
    (value + COPY_ALIGN - 1) / COPY_ALIGN * COPY_ALIGN
}

pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

static CTX: OnceCell<Option<GpuContext>> = OnceCell::new();

impl GpuContext {
    /// Process-wide context, or `None` when no adapter is available.
    pub fn shared() -> Option<&'static GpuContext> {
        CTX.get_or_init(|| {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            }))?;
            let (device, queue) = match pollster::block_on(adapter.request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("pathwave-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )) {
                Ok(pair) => pair,
                Err(err) => {
                    log::warn!("wgpu request_device failed: {err}");
                    return None;
                }
            };
            log::info!("wgpu device ready: {:?}", adapter.get_info().name);
            Some(GpuContext {
                device: Arc::new(device),
                queue: Arc::new(queue),
            })
        })
        .as_ref()
    }
}

struct GpuAllocation {
    buffer: wgpu::Buffer,
    size: usize,
}

struct GpuHeap {
    space: AddressSpace,
    allocations: BTreeMap<u64, GpuAllocation>,
    allocated: usize,
}

/// Device heap where every allocation is a `wgpu::Buffer`.
///
/// Async copies are `Queue::write_buffer` calls that the next submit flushes;
/// blocking copies submit and wait immediately.
pub struct GpuMemory {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    heap: Mutex<GpuHeap>,
    stats: Mutex<TransferStats>,
}

impl GpuMemory {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            heap: Mutex::new(GpuHeap {
                space: AddressSpace::new(),
                allocations: BTreeMap::new(),
                allocated: 0,
            }),
            stats: Mutex::new(TransferStats::default()),
        }
    }

    pub fn from_shared_context() -> Option<Self> {
        GpuContext::shared().map(|ctx| Self::new(ctx.device.clone(), ctx.queue.clone()))
    }

    fn write(&self, dst: DevicePtr, data: &[u8]) -> RenderResult<()> {
        let heap = self.heap.lock();
        let (base, offset) = locate(&heap.allocations, dst, data.len(), |a| a.size)?;
        if offset % COPY_ALIGN != 0 {
            return Err(RenderError::device(format!(
                "device copy target {dst:?} is not {COPY_ALIGN}-byte aligned"
            )));
        }
        let allocation = &heap.allocations[&base];
        if data.len() % COPY_ALIGN == 0 {
            self.queue
                .write_buffer(&allocation.buffer, offset as u64, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(align_up(data.len()), 0);
            self.queue
                .write_buffer(&allocation.buffer, offset as u64, &padded);
        }
        Ok(())
    }

    fn submit_and_wait(&self) {
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pathwave-upload-flush"),
            });
        self.queue.submit(std::iter::once(encoder.finish()));
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }
}

impl DeviceMemory for GpuMemory {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn alloc(&self, size: usize) -> RenderResult<DevicePtr> {
        if size == 0 {
            return Ok(DevicePtr::NULL);
        }
        let padded = align_up(size);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pathwave-device-allocation"),
            size: padded as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let mut heap = self.heap.lock();
        let ptr = heap.space.reserve(padded);
        heap.allocations.insert(
            ptr.addr(),
            GpuAllocation {
                buffer,
                size: padded,
            },
        );
        heap.allocated += padded;
        self.stats.lock().allocations += 1;
        Ok(ptr)
    }

    fn free(&self, ptr: DevicePtr) -> RenderResult<()> {
        if ptr.is_null() {
            return Ok(());
        }
        let mut heap = self.heap.lock();
        let allocation = heap
            .allocations
            .remove(&ptr.addr())
            .ok_or_else(|| RenderError::device(format!("free of unknown allocation {ptr:?}")))?;
        heap.allocated -= allocation.size;
        allocation.buffer.destroy();
        self.stats.lock().frees += 1;
        Ok(())
    }

    fn copy_to_device(&self, dst: DevicePtr, data: &[u8]) -> RenderResult<()> {
        self.write(dst, data)?;
        self.submit_and_wait();
        let mut stats = self.stats.lock();
        stats.blocking_copies += 1;
        stats.bytes_to_device += data.len() as u64;
        Ok(())
    }

    fn copy_to_device_async(&self, dst: DevicePtr, data: &[u8]) -> RenderResult<()> {
        self.write(dst, data)?;
        let mut stats = self.stats.lock();
        stats.async_copies += 1;
        stats.bytes_to_device += data.len() as u64;
        Ok(())
    }

    fn copy_to_host(&self, src: DevicePtr, len: usize) -> RenderResult<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let heap = self.heap.lock();
        let (base, offset) = locate(&heap.allocations, src, len, |a| a.size)?;
        let start = offset / COPY_ALIGN * COPY_ALIGN;
        let end = align_up(offset + len);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pathwave-readback-staging"),
            size: (end - start) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pathwave-readback-encoder"),
            });
        encoder.copy_buffer_to_buffer(
            &heap.allocations[&base].buffer,
            start as u64,
            &staging,
            0,
            (end - start) as u64,
        );
        drop(heap);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        match pollster::block_on(receiver.receive()) {
            Some(Ok(())) => {}
            Some(Err(err)) => return Err(RenderError::device(format!("readback map failed: {err}"))),
            None => return Err(RenderError::device("map_async callback channel dropped")),
        }

        let data = slice.get_mapped_range();
        let out = data[offset - start..offset - start + len].to_vec();
        drop(data);
        staging.unmap();
        self.stats.lock().bytes_to_host += len as u64;
        Ok(out)
    }

    fn synchronize(&self) -> RenderResult<()> {
        self.submit_and_wait();
        Ok(())
    }

    fn allocated_bytes(&self) -> usize {
        self.heap.lock().allocated
    }

    fn transfer_stats(&self) -> TransferStats {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Get a GPU heap for testing, or skip if no adapter is available
    fn gpu_memory_or_skip() -> Option<GpuMemory> {
        let memory = GpuMemory::from_shared_context();
        if memory.is_none() {
            eprintln!("no wgpu adapter; skipping");
        }
        memory
    }

    #[test]
    fn gpu_round_trip_unaligned_tail() {
        let Some(memory) = gpu_memory_or_skip() else {
            return;
        };
        let ptr = memory.alloc(12).unwrap();
        memory.copy_to_device(ptr, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap();
        assert_eq!(memory.copy_to_host(ptr.offset(2), 6).unwrap(), vec![3, 4, 5, 6, 7, 8]);
        memory.free(ptr).unwrap();
        assert_eq!(memory.allocated_bytes(), 0);
    }

    #[test]
    fn gpu_async_copy_visible_after_synchronize() {
        let Some(memory) = gpu_memory_or_skip() else {
            return;
        };
        let ptr = memory.alloc(8).unwrap();
        memory.copy_to_device_async(ptr, &[7; 8]).unwrap();
        memory.synchronize().unwrap();
        assert_eq!(memory.copy_to_host(ptr, 8).unwrap(), vec![7; 8]);
    }
}
