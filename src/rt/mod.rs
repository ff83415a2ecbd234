// src/rt/mod.rs
// Fixed-layout device records mirrored from scene leaves
// Exists so kernels read plain Pod structs whose cross-references are raw device addresses

pub mod light;
pub mod medium;
pub mod records;
pub mod sampler;
pub mod scene_data;

pub use light::{
    light_record, DiffuseAreaLight, DirectionalLight, InfiniteLight, LightKind, LightRecord,
    PointLight, SpotLight,
};
pub use medium::{
    medium_record, GridMediumData, HomogeneousMedium, MediumKind, MediumRecord, RgbGridMedium,
    ScalarGridMedium,
};
pub use records::{InstanceData, MaterialData, MediumInterfaceData, MeshData};
pub use sampler::UniformLightSampler;
pub use scene_data::SceneData;

use bytemuck::Pod;
use glam::Vec3;

/// A device record that mirrors one scene leaf.
///
/// `sync_from` rewrites the value fields only. Device pointers, counts and
/// indices are structural: they are fixed when the record is created and a
/// change to them needs a full scene upload.
pub trait DeviceObject: Pod + Send + Sync {
    type Leaf: Send + Sync + 'static;

    fn sync_from(&mut self, leaf: &Self::Leaf);
}

pub(crate) fn to3(v: Vec3) -> [f32; 3] {
    v.to_array()
}

pub(crate) fn synced<R: DeviceObject>(mut record: R, leaf: &R::Leaf) -> R {
    record.sync_from(leaf);
    record
}
