// src/rt/scene_data.rs
// Trace-ready scene descriptor: flat references into the device pools

use crate::device::{DevicePtr, DeviceSlice, TaggedPtr};
use bytemuck::{Pod, Zeroable};

/// Snapshot of the pools consumed read-only by the tracing kernels.
///
/// Holds addresses, not copies. Any pool resize makes an older snapshot stale;
/// fetch a new one after every full scene upload.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SceneData {
    /// `MeshData` per mesh.
    pub meshes: DeviceSlice,
    /// `InstanceData` per instance.
    pub instances: DeviceSlice,
    /// `MaterialData` per material.
    pub materials: DeviceSlice,
    /// `TaggedPtr` per light, mesh lights first.
    pub lights: DeviceSlice,
    /// `TaggedPtr` per infinite light.
    pub infinite_lights: DeviceSlice,
    /// `UniformLightSampler`.
    pub light_sampler: DevicePtr,
    /// Root of the acceleration structure.
    pub traversable: DevicePtr,
    pub camera_medium: TaggedPtr,
    /// 0 single-level, 1 multi-level.
    pub accel_kind: u32,
    pub _pad: u32,
}

const _: () = assert!(std::mem::size_of::<SceneData>() == 120);

impl SceneData {
    pub fn light_count(&self) -> usize {
        self.lights.len()
    }
}
