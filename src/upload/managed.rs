// src/upload/managed.rs
// Managed objects: a weak leaf reference paired with the device slot mirroring it
// Exists so leaves can be re-copied into fixed slots without the upload side owning them

use crate::device::{DeviceMemory, DevicePtr};
use crate::error::RenderResult;
use crate::rt::DeviceObject;
use crate::scene::{LeafId, SceneGraphLeaf, SceneLeaf};
use std::sync::{Arc, Weak};

/// How a record reaches its slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyMode {
    /// Structural upload; returns once the bytes are on the device.
    Blocking,
    /// Value refresh queued on the upload stream.
    Async,
}

/// Type-erased view of a `ManagedObject`.
pub(crate) trait Managed: Send + Sync {
    fn leaf_id(&self) -> LeafId;

    /// Dirty flag of the leaf, `None` once the leaf is gone.
    fn leaf_updated(&self) -> Option<bool>;

    fn clear_updated(&self);

    /// Refresh the staging record from the leaf and copy it. `false` when the leaf is gone.
    fn upload(&mut self, memory: &dyn DeviceMemory, mode: CopyMode) -> RenderResult<bool>;

    fn ptr(&self) -> DevicePtr;

    fn staged_bytes(&self) -> &[u8];
}

/// A leaf mirrored into one fixed-size device slot.
pub struct ManagedObject<R: DeviceObject> {
    leaf: Weak<SceneLeaf<R::Leaf>>,
    id: LeafId,
    ptr: DevicePtr,
    record: R,
}

impl<R: DeviceObject> ManagedObject<R> {
    /// `record` carries the structural fields; value fields are refreshed on every upload.
    pub fn new(leaf: &Arc<SceneLeaf<R::Leaf>>, ptr: DevicePtr, record: R) -> Self {
        Self {
            leaf: Arc::downgrade(leaf),
            id: leaf.id(),
            ptr,
            record,
        }
    }

    pub fn record(&self) -> &R {
        &self.record
    }
}

impl<R: DeviceObject> Managed for ManagedObject<R> {
    fn leaf_id(&self) -> LeafId {
        self.id
    }

    fn leaf_updated(&self) -> Option<bool> {
        self.leaf.upgrade().map(|leaf| leaf.is_updated())
    }

    fn clear_updated(&self) {
        if let Some(leaf) = self.leaf.upgrade() {
            leaf.set_updated(false);
        }
    }

    fn upload(&mut self, memory: &dyn DeviceMemory, mode: CopyMode) -> RenderResult<bool> {
        let Some(leaf) = self.leaf.upgrade() else {
            return Ok(false);
        };
        let before = std::mem::size_of_val(&self.record);
        self.record.sync_from(&leaf.read());
        debug_assert_eq!(before, std::mem::size_of_val(&self.record));
        let bytes = bytemuck::bytes_of(&self.record);
        match mode {
            CopyMode::Blocking => memory.copy_to_device(self.ptr, bytes)?,
            CopyMode::Async => memory.copy_to_device_async(self.ptr, bytes)?,
        }
        Ok(true)
    }

    fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    fn staged_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HostMemory, TypedBuffer};
    use crate::rt::MaterialData;
    use crate::scene::Material;
    use glam::Vec3;

    #[test]
    fn upload_round_trips_and_weak_leaf_goes_quiet() {
        let memory = Arc::new(HostMemory::new());
        let slot = TypedBuffer::<MaterialData>::with_len(memory.clone(), 1).unwrap();
        let leaf = Arc::new(SceneLeaf::new(Material::diffuse(Vec3::new(0.1, 0.2, 0.3))));
        let mut managed = ManagedObject::new(&leaf, slot.ptr(), MaterialData::default());

        assert!(managed.upload(memory.as_ref(), CopyMode::Blocking).unwrap());
        assert_eq!(slot.get(0).unwrap(), *managed.record());
        assert_eq!(managed.leaf_updated(), Some(false));

        leaf.modify(|m| m.roughness = 0.25);
        assert_eq!(managed.leaf_updated(), Some(true));
        assert!(managed.upload(memory.as_ref(), CopyMode::Async).unwrap());
        assert_eq!(memory.pending_copies(), 1);
        assert_eq!(slot.get(0).unwrap().roughness, 0.25);

        drop(leaf);
        assert_eq!(managed.leaf_updated(), None);
        assert!(!managed.upload(memory.as_ref(), CopyMode::Async).unwrap());
    }
}
