// src/accel/multi_level.rs
// Two-level acceleration structure: one object-space BLAS per mesh and a TLAS over instance bounds.
// Transform updates refit only the TLAS; bottom-level trees are never touched after build.
// RELEVANT FILES:src/accel/cpu_bvh.rs,src/accel/mod.rs,src/rt/records.rs

use super::cpu_bvh::{BuildOptions, BvhCPU, BvhNode};
use super::types::{intersect_triangle, triangle_aabb, Aabb, Ray, TriangleHit};
use super::{AccelGeometry, AccelInstance};
use crate::device::{DeviceHandle, DevicePtr, TypedBuffer};
use crate::error::RenderResult;
use anyhow::Context;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Per-instance TLAS leaf payload in device memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TlasInstance {
    pub world_to_object: [[f32; 4]; 4],
    pub blas_nodes: DevicePtr,
    pub instance_id: u32,
    pub _pad: u32,
}

const _: () = assert!(std::mem::size_of::<TlasInstance>() == 80);

struct Blas {
    triangles: Vec<[Vec3; 3]>,
    bvh: BvhCPU,
    nodes: TypedBuffer<BvhNode>,
}

struct TlasEntry {
    mesh: usize,
    transform: Mat4,
    inverse: Mat4,
}

pub struct MultiLevelAccel {
    blas: Vec<Blas>,
    entries: Vec<TlasEntry>,
    /// TLAS primitive -> instance index. Instances of empty meshes are left out.
    tlas_prims: Vec<u32>,
    tlas: BvhCPU,
    tlas_nodes: TypedBuffer<BvhNode>,
    records: TypedBuffer<TlasInstance>,
}

impl MultiLevelAccel {
    pub fn build(
        geometry: AccelGeometry,
        instances: &[AccelInstance],
        options: &BuildOptions,
        memory: DeviceHandle,
    ) -> anyhow::Result<Self> {
        let mut blas = Vec::with_capacity(geometry.meshes.len());
        for (mesh, triangles) in geometry.meshes.into_iter().enumerate() {
            let prim_aabbs: Vec<Aabb> = triangles.iter().map(triangle_aabb).collect();
            let bvh = BvhCPU::build(&prim_aabbs, options)
                .with_context(|| format!("BLAS build for mesh {mesh}"))?;
            let nodes = TypedBuffer::alloc_and_copy_from_host(memory.clone(), &bvh.nodes)?;
            blas.push(Blas {
                triangles,
                bvh,
                nodes,
            });
        }

        let entries: Vec<TlasEntry> = instances
            .iter()
            .map(|i| TlasEntry {
                mesh: i.mesh,
                transform: i.transform,
                inverse: i.transform.inverse(),
            })
            .collect();
        let tlas_prims: Vec<u32> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| blas.get(e.mesh).is_some_and(|b| !b.bvh.is_empty()))
            .map(|(i, _)| i as u32)
            .collect();

        let mut accel = Self {
            blas,
            entries,
            tlas_prims,
            tlas: BvhCPU::default(),
            tlas_nodes: TypedBuffer::new(memory.clone()),
            records: TypedBuffer::new(memory),
        };
        accel.tlas = BvhCPU::build(&accel.instance_bounds(), options).context("TLAS build")?;
        accel.tlas_nodes.resize(accel.tlas.nodes.len())?;
        accel.tlas_nodes.copy_from_host(&accel.tlas.nodes)?;
        let records = accel.instance_records();
        accel.records.resize(records.len())?;
        accel.records.copy_from_host(&records)?;
        Ok(accel)
    }

    fn instance_bounds(&self) -> Vec<Aabb> {
        self.tlas_prims
            .iter()
            .map(|&i| {
                let entry = &self.entries[i as usize];
                self.blas[entry.mesh].bvh.world_aabb().transformed(&entry.transform)
            })
            .collect()
    }

    fn instance_records(&self) -> Vec<TlasInstance> {
        self.tlas_prims
            .iter()
            .map(|&i| {
                let entry = &self.entries[i as usize];
                TlasInstance {
                    world_to_object: entry.inverse.to_cols_array_2d(),
                    blas_nodes: self.blas[entry.mesh].nodes.ptr(),
                    instance_id: i,
                    _pad: 0,
                }
            })
            .collect()
    }

    /// Move instances and refit the TLAS. BLAS stay as built.
    pub fn update(&mut self, transforms: &[Mat4]) -> RenderResult<()> {
        debug_assert_eq!(transforms.len(), self.entries.len());
        for (entry, transform) in self.entries.iter_mut().zip(transforms) {
            entry.transform = *transform;
            entry.inverse = transform.inverse();
        }
        self.tlas.refit(&self.instance_bounds())?;
        self.tlas_nodes.copy_from_host_async(&self.tlas.nodes)?;
        self.records.copy_from_host_async(&self.instance_records())
    }

    pub fn intersect(&self, ray: &Ray, t_max: f32) -> Option<TriangleHit> {
        let mut best = None;
        self.tlas.traverse(ray, t_max, false, |p, t_max| {
            let instance = self.tlas_prims[p as usize];
            let entry = &self.entries[instance as usize];
            let blas = &self.blas[entry.mesh];
            let local = ray.transformed(&entry.inverse);
            let mut nearest = None;
            blas.bvh.traverse(&local, t_max, false, |prim, t_max| {
                let (t, b1, b2) = intersect_triangle(&local, &blas.triangles[prim as usize], t_max)?;
                nearest = Some(TriangleHit {
                    t,
                    b1,
                    b2,
                    instance,
                    prim,
                });
                Some(t)
            });
            let hit = nearest?;
            best = Some(hit);
            Some(hit.t)
        });
        best
    }

    pub fn occluded(&self, ray: &Ray, t_max: f32) -> bool {
        self.tlas.traverse(ray, t_max, true, |p, t_max| {
            let entry = &self.entries[self.tlas_prims[p as usize] as usize];
            let blas = &self.blas[entry.mesh];
            let local = ray.transformed(&entry.inverse);
            let hit = blas.bvh.traverse(&local, t_max, true, |prim, t_max| {
                intersect_triangle(&local, &blas.triangles[prim as usize], t_max).map(|h| h.0)
            });
            hit.then_some(0.0)
        })
    }

    pub fn traversable(&self) -> DevicePtr {
        self.tlas_nodes.ptr()
    }

    pub fn tlas(&self) -> &BvhCPU {
        &self.tlas
    }

    /// BLAS of `mesh`, for checking that updates leave it alone.
    pub fn blas_nodes(&self, mesh: usize) -> Option<&[BvhNode]> {
        self.blas.get(mesh).map(|b| b.bvh.nodes.as_slice())
    }

    pub fn primitive_count(&self) -> usize {
        self.tlas_prims
            .iter()
            .map(|&i| self.blas[self.entries[i as usize].mesh].triangles.len())
            .sum()
    }
}
