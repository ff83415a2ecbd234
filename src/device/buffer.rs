// src/device/buffer.rs
// Typed device arrays and the flat slice descriptor embedded in launch parameters
// Exists so pools can hold fixed-layout records without hand-computing byte offsets

use super::{read_array, read_record, DeviceHandle, DeviceMemory, DevicePtr};
use crate::error::{RenderError, RenderResult};
use bytemuck::{Pod, Zeroable};
use std::marker::PhantomData;
use std::mem::size_of;

/// Non-owning view of a device array, as stored inside device records.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DeviceSlice {
    pub ptr: DevicePtr,
    pub len: u64,
}

impl DeviceSlice {
    pub const EMPTY: DeviceSlice = DeviceSlice {
        ptr: DevicePtr::NULL,
        len: 0,
    };

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read element `index`, interpreting the slice as an array of `T`.
    pub fn get<T: Pod>(&self, memory: &dyn DeviceMemory, index: usize) -> RenderResult<T> {
        if index >= self.len() {
            return Err(RenderError::device(format!(
                "slice index {index} out of range for length {}",
                self.len
            )));
        }
        read_record(memory, self.ptr.offset(index * size_of::<T>()))
    }

    pub fn read_all<T: Pod>(&self, memory: &dyn DeviceMemory) -> RenderResult<Vec<T>> {
        read_array(memory, self.ptr, self.len())
    }
}

/// Owning typed array in device memory. Freed on drop.
///
/// `resize` reallocates: every address previously taken from the buffer is invalid afterwards.
pub struct TypedBuffer<T: Pod> {
    memory: DeviceHandle,
    ptr: DevicePtr,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> TypedBuffer<T> {
    pub fn new(memory: DeviceHandle) -> Self {
        Self {
            memory,
            ptr: DevicePtr::NULL,
            len: 0,
            _marker: PhantomData,
        }
    }

    /// Zero-initialized buffer of `len` elements.
    pub fn with_len(memory: DeviceHandle, len: usize) -> RenderResult<Self> {
        let mut buffer = Self::new(memory);
        buffer.resize(len)?;
        Ok(buffer)
    }

    pub fn alloc_and_copy_from_host(memory: DeviceHandle, data: &[T]) -> RenderResult<Self> {
        let buffer = Self::with_len(memory, data.len())?;
        buffer.copy_from_host(data)?;
        Ok(buffer)
    }

    /// Reallocate to `len` zeroed elements. Invalidates all addresses into the old storage.
    pub fn resize(&mut self, len: usize) -> RenderResult<()> {
        if len == self.len && !self.ptr.is_null() {
            return Ok(());
        }
        let ptr = self.memory.alloc(len * size_of::<T>())?;
        let old = std::mem::replace(&mut self.ptr, ptr);
        self.len = len;
        self.memory.free(old)
    }

    /// Blocking copy of the whole buffer contents.
    pub fn copy_from_host(&self, data: &[T]) -> RenderResult<()> {
        if data.len() != self.len {
            return Err(RenderError::upload(format!(
                "copy of {} elements into buffer of {}",
                data.len(),
                self.len
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        self.memory
            .copy_to_device(self.ptr, bytemuck::cast_slice(data))
    }

    /// Same-size rewrite queued on the upload stream.
    pub fn copy_from_host_async(&self, data: &[T]) -> RenderResult<()> {
        if data.len() != self.len {
            return Err(RenderError::upload(format!(
                "async copy of {} elements into buffer of {}",
                data.len(),
                self.len
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        self.memory
            .copy_to_device_async(self.ptr, bytemuck::cast_slice(data))
    }

    pub fn set(&self, index: usize, value: &T) -> RenderResult<()> {
        let dst = self.ptr_at(index)?;
        self.memory.copy_to_device(dst, bytemuck::bytes_of(value))
    }

    pub fn get(&self, index: usize) -> RenderResult<T> {
        read_record(self.memory.as_ref(), self.ptr_at(index)?)
    }

    pub fn read_all(&self) -> RenderResult<Vec<T>> {
        read_array(self.memory.as_ref(), self.ptr, self.len)
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn ptr_at(&self, index: usize) -> RenderResult<DevicePtr> {
        if index >= self.len {
            return Err(RenderError::device(format!(
                "buffer index {index} out of range for length {}",
                self.len
            )));
        }
        Ok(self.ptr.offset(index * size_of::<T>()))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_size(&self) -> usize {
        self.len * size_of::<T>()
    }

    pub fn as_slice(&self) -> DeviceSlice {
        DeviceSlice {
            ptr: self.ptr,
            len: self.len as u64,
        }
    }

    pub fn memory(&self) -> &DeviceHandle {
        &self.memory
    }
}

impl<T: Pod> Drop for TypedBuffer<T> {
    fn drop(&mut self) {
        if let Err(err) = self.memory.free(self.ptr) {
            log::warn!("failed to free device buffer {:?}: {err}", self.ptr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostMemory;
    use std::sync::Arc;

    #[test]
    fn set_get_and_slice_view_agree() {
        let memory: DeviceHandle = Arc::new(HostMemory::new());
        let buffer = TypedBuffer::<[f32; 2]>::alloc_and_copy_from_host(
            memory.clone(),
            &[[1.0, 2.0], [3.0, 4.0]],
        )
        .unwrap();
        buffer.set(1, &[5.0, 6.0]).unwrap();
        assert_eq!(buffer.get(1).unwrap(), [5.0, 6.0]);
        let slice = buffer.as_slice();
        assert_eq!(slice.len(), 2);
        assert_eq!(slice.get::<[f32; 2]>(memory.as_ref(), 0).unwrap(), [1.0, 2.0]);
        assert!(slice.get::<[f32; 2]>(memory.as_ref(), 2).is_err());
    }

    #[test]
    fn resize_moves_storage_and_drop_frees() {
        let memory: DeviceHandle = Arc::new(HostMemory::new());
        {
            let mut buffer = TypedBuffer::<u32>::with_len(memory.clone(), 4).unwrap();
            let before = buffer.ptr();
            buffer.resize(8).unwrap();
            assert_ne!(before, buffer.ptr());
            assert_eq!(buffer.read_all().unwrap(), vec![0; 8]);
            assert_eq!(memory.allocated_bytes(), 32);
        }
        assert_eq!(memory.allocated_bytes(), 0);
    }

    #[test]
    fn empty_buffer_is_null() {
        let memory: DeviceHandle = Arc::new(HostMemory::new());
        let buffer = TypedBuffer::<u32>::alloc_and_copy_from_host(memory, &[]).unwrap();
        assert!(buffer.ptr().is_null());
        assert!(buffer.read_all().unwrap().is_empty());
        assert!(buffer.get(0).is_err());
    }
}
