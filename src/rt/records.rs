// src/rt/records.rs
// Material, mesh and instance records in their device layout

use super::{to3, DeviceObject};
use crate::device::{DevicePtr, TaggedPtr};
use crate::scene::{Material, Mesh, MeshInstance};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MaterialData {
    pub base_color: [f32; 3],
    pub roughness: f32,
    pub emission: [f32; 3],
    pub metallic: f32,
    pub ior: f32,
    pub _pad: [f32; 3],
}

impl MaterialData {
    pub fn is_emissive(&self) -> bool {
        Vec3::from(self.emission).max_element() > 0.0
    }
}

impl DeviceObject for MaterialData {
    type Leaf = Material;

    fn sync_from(&mut self, leaf: &Material) {
        self.base_color = to3(leaf.base_color);
        self.roughness = leaf.roughness;
        self.emission = to3(leaf.emission);
        self.metallic = leaf.metallic;
        self.ior = leaf.ior;
    }
}

/// Media on either side of a surface. Null handles mean vacuum.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MediumInterfaceData {
    pub inside: TaggedPtr,
    pub outside: TaggedPtr,
}

impl MediumInterfaceData {
    pub fn is_transition(&self) -> bool {
        self.inside != self.outside
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshData {
    /// `[f32; 3]` per vertex.
    pub positions: DevicePtr,
    pub normals: DevicePtr,
    /// `[f32; 2]` per vertex.
    pub texcoords: DevicePtr,
    pub tangents: DevicePtr,
    /// `[u32; 3]` per triangle.
    pub indices: DevicePtr,
    /// Null for interface-only meshes.
    pub material: DevicePtr,
    pub media: MediumInterfaceData,
    pub le: [f32; 3],
    pub triangle_count: u32,
    pub vertex_count: u32,
    pub _pad: u32,
}

impl MeshData {
    pub fn emits(&self) -> bool {
        Vec3::from(self.le).max_element() > 0.0
    }
}

impl DeviceObject for MeshData {
    type Leaf = Mesh;

    fn sync_from(&mut self, leaf: &Mesh) {
        self.le = to3(leaf.le);
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub transform: [[f32; 4]; 4],
    pub inverse: [[f32; 4]; 4],
    /// Inverse transpose, for normals.
    pub normal: [[f32; 4]; 4],
    pub mesh: DevicePtr,
    /// `DiffuseAreaLight` per triangle, or null when the mesh does not emit.
    pub lights: DevicePtr,
    pub light_count: u32,
    pub mesh_index: u32,
    pub instance_id: u32,
    pub _pad: u32,
}

impl Default for InstanceData {
    fn default() -> Self {
        let mut data = Self::zeroed();
        data.set_transform(Mat4::IDENTITY);
        data
    }
}

impl InstanceData {
    pub fn set_transform(&mut self, transform: Mat4) {
        let inverse = transform.inverse();
        self.transform = transform.to_cols_array_2d();
        self.inverse = inverse.to_cols_array_2d();
        self.normal = inverse.transpose().to_cols_array_2d();
    }

    pub fn transform(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.transform)
    }

    pub fn normal_transform(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.normal)
    }
}

impl DeviceObject for InstanceData {
    type Leaf = MeshInstance;

    fn sync_from(&mut self, leaf: &MeshInstance) {
        self.set_transform(leaf.transform);
    }
}

const _: () = {
    assert!(std::mem::size_of::<MaterialData>() == 48);
    assert!(std::mem::size_of::<MediumInterfaceData>() == 32);
    assert!(std::mem::size_of::<MeshData>() == 104);
    assert!(std::mem::size_of::<InstanceData>() == 224);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_sync_keeps_structure() {
        let mut data = InstanceData {
            mesh: DevicePtr(0x2000),
            mesh_index: 3,
            ..InstanceData::default()
        };
        let leaf = MeshInstance::with_transform(7, Mat4::from_scale(Vec3::splat(2.0)));
        data.sync_from(&leaf);
        assert_eq!(data.mesh, DevicePtr(0x2000));
        assert_eq!(data.mesh_index, 3);
        assert_eq!(data.inverse[0][0], 0.5);
        assert_eq!(data.normal_transform().x_axis.x, 0.5);
    }

    #[test]
    fn material_sync_copies_values() {
        let mut data = MaterialData::default();
        data.sync_from(&Material::emissive(Vec3::new(4.0, 3.0, 2.0)));
        assert!(data.is_emissive());
        assert_eq!(data.base_color, [0.0; 3]);
        assert_eq!(data.ior, 1.5);
    }
}
