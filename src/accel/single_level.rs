// src/accel/single_level.rs
// Flat acceleration structure: one BVH over every world-space triangle, instance transforms baked in.
// RELEVANT FILES:src/accel/cpu_bvh.rs,src/accel/mod.rs

use super::cpu_bvh::{BuildOptions, BvhCPU, BvhNode};
use super::types::{intersect_triangle, triangle_aabb, Aabb, Ray, TriangleHit};
use super::{AccelGeometry, AccelInstance};
use crate::device::{DeviceHandle, DevicePtr, TypedBuffer};
use crate::error::RenderResult;
use glam::{Mat4, Vec3};

#[derive(Debug, Clone, Copy)]
struct WorldTriangle {
    vertices: [Vec3; 3],
    instance: u32,
    prim: u32,
}

pub struct SingleLevelAccel {
    geometry: AccelGeometry,
    instance_meshes: Vec<usize>,
    triangles: Vec<WorldTriangle>,
    bvh: BvhCPU,
    nodes: TypedBuffer<BvhNode>,
}

fn bake(
    geometry: &AccelGeometry,
    instances: impl Iterator<Item = (usize, Mat4)>,
) -> Vec<WorldTriangle> {
    let mut triangles = Vec::new();
    for (instance, (mesh, transform)) in instances.enumerate() {
        let Some(tris) = geometry.meshes.get(mesh) else {
            continue;
        };
        for (prim, tri) in tris.iter().enumerate() {
            triangles.push(WorldTriangle {
                vertices: tri.map(|v| transform.transform_point3(v)),
                instance: instance as u32,
                prim: prim as u32,
            });
        }
    }
    triangles
}

fn bounds(triangles: &[WorldTriangle]) -> Vec<Aabb> {
    triangles.iter().map(|t| triangle_aabb(&t.vertices)).collect()
}

impl SingleLevelAccel {
    pub fn build(
        geometry: AccelGeometry,
        instances: &[AccelInstance],
        options: &BuildOptions,
        memory: DeviceHandle,
    ) -> anyhow::Result<Self> {
        let triangles = bake(&geometry, instances.iter().map(|i| (i.mesh, i.transform)));
        let bvh = BvhCPU::build(&bounds(&triangles), options)?;
        let nodes = TypedBuffer::alloc_and_copy_from_host(memory, &bvh.nodes)?;
        Ok(Self {
            geometry,
            instance_meshes: instances.iter().map(|i| i.mesh).collect(),
            triangles,
            bvh,
            nodes,
        })
    }

    /// Re-bake triangles with new transforms and refit.
    pub fn update(&mut self, transforms: &[Mat4]) -> RenderResult<()> {
        debug_assert_eq!(transforms.len(), self.instance_meshes.len());
        let instances = self
            .instance_meshes
            .iter()
            .copied()
            .zip(transforms.iter().copied());
        self.triangles = bake(&self.geometry, instances);
        self.bvh.refit(&bounds(&self.triangles))?;
        self.nodes.copy_from_host_async(&self.bvh.nodes)
    }

    pub fn intersect(&self, ray: &Ray, t_max: f32) -> Option<TriangleHit> {
        let mut best = None;
        self.bvh.traverse(ray, t_max, false, |i, t_max| {
            let tri = &self.triangles[i as usize];
            let (t, b1, b2) = intersect_triangle(ray, &tri.vertices, t_max)?;
            best = Some(TriangleHit {
                t,
                b1,
                b2,
                instance: tri.instance,
                prim: tri.prim,
            });
            Some(t)
        });
        best
    }

    pub fn occluded(&self, ray: &Ray, t_max: f32) -> bool {
        self.bvh.traverse(ray, t_max, true, |i, t_max| {
            intersect_triangle(ray, &self.triangles[i as usize].vertices, t_max).map(|h| h.0)
        })
    }

    pub fn traversable(&self) -> DevicePtr {
        self.nodes.ptr()
    }

    pub fn bvh(&self) -> &BvhCPU {
        &self.bvh
    }

    pub fn primitive_count(&self) -> usize {
        self.triangles.len()
    }
}
