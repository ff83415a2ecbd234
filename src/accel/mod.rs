// src/accel/mod.rs
// Acceleration structure manager: single-level or multi-level BVH behind one build/update/trace contract.
// The layout is fixed at build time from the scene parameters.
// RELEVANT FILES:src/accel/cpu_bvh.rs,src/accel/single_level.rs,src/accel/multi_level.rs,src/upload/mod.rs

pub mod cpu_bvh;
pub mod multi_level;
pub mod single_level;
pub mod types;

pub use cpu_bvh::{BuildOptions, BuildStats, BvhCPU, BvhNode};
pub use multi_level::{MultiLevelAccel, TlasInstance};
pub use single_level::SingleLevelAccel;
pub use types::{Aabb, Ray, TriangleHit};

use crate::config::AccelKind;
use crate::device::{DeviceHandle, DevicePtr};
use crate::error::{RenderError, RenderResult};
use glam::{Mat4, Vec3};
use std::time::Instant;

/// Object-space triangles of every mesh, indexed like the mesh pool.
#[derive(Debug, Clone, Default)]
pub struct AccelGeometry {
    pub meshes: Vec<Vec<[Vec3; 3]>>,
}

impl AccelGeometry {
    pub fn triangle_count(&self) -> usize {
        self.meshes.iter().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelInstance {
    pub mesh: usize,
    pub transform: Mat4,
}

/// Backend-specific structure
pub enum AccelStructure {
    SingleLevel(SingleLevelAccel),
    MultiLevel(MultiLevelAccel),
}

impl AccelStructure {
    /// Build from scratch. A failed build is fatal for rendering.
    pub fn build(
        kind: AccelKind,
        geometry: AccelGeometry,
        instances: &[AccelInstance],
        options: &BuildOptions,
        memory: DeviceHandle,
    ) -> RenderResult<Self> {
        let start = Instant::now();
        let triangles = geometry.triangle_count();
        let accel = match kind {
            AccelKind::SingleLevel => {
                SingleLevelAccel::build(geometry, instances, options, memory).map(Self::SingleLevel)
            }
            AccelKind::MultiLevel => {
                MultiLevelAccel::build(geometry, instances, options, memory).map(Self::MultiLevel)
            }
        }
        .map_err(|err| RenderError::accel(format!("{kind} build failed: {err:#}")))?;
        log::info!(
            "Built {kind} acceleration structure: {} primitives from {triangles} mesh triangles, {} nodes in {:.2} ms",
            accel.primitive_count(),
            accel.node_count(),
            start.elapsed().as_secs_f32() * 1000.0
        );
        Ok(accel)
    }

    /// Refit to new instance transforms. The instance and mesh sets must be the ones built with;
    /// after a structural change call `build` instead.
    pub fn update(&mut self, transforms: &[Mat4]) -> RenderResult<()> {
        match self {
            Self::SingleLevel(accel) => accel.update(transforms),
            Self::MultiLevel(accel) => accel.update(transforms),
        }
    }

    pub fn intersect(&self, ray: &Ray, t_max: f32) -> Option<TriangleHit> {
        match self {
            Self::SingleLevel(accel) => accel.intersect(ray, t_max),
            Self::MultiLevel(accel) => accel.intersect(ray, t_max),
        }
    }

    pub fn occluded(&self, ray: &Ray, t_max: f32) -> bool {
        match self {
            Self::SingleLevel(accel) => accel.occluded(ray, t_max),
            Self::MultiLevel(accel) => accel.occluded(ray, t_max),
        }
    }

    /// Device address of the root structure, null for an empty scene.
    pub fn traversable(&self) -> DevicePtr {
        match self {
            Self::SingleLevel(accel) => accel.traversable(),
            Self::MultiLevel(accel) => accel.traversable(),
        }
    }

    pub fn kind(&self) -> AccelKind {
        match self {
            Self::SingleLevel(_) => AccelKind::SingleLevel,
            Self::MultiLevel(_) => AccelKind::MultiLevel,
        }
    }

    pub fn primitive_count(&self) -> usize {
        match self {
            Self::SingleLevel(accel) => accel.primitive_count(),
            Self::MultiLevel(accel) => accel.primitive_count(),
        }
    }

    /// Nodes of the top structure.
    pub fn node_count(&self) -> usize {
        self.top().nodes.len()
    }

    pub fn world_bounds(&self) -> Aabb {
        self.top().world_aabb()
    }

    fn top(&self) -> &BvhCPU {
        match self {
            Self::SingleLevel(accel) => accel.bvh(),
            Self::MultiLevel(accel) => accel.tlas(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceMemory, HostMemory};
    use std::sync::Arc;

    fn two_quads() -> (AccelGeometry, Vec<AccelInstance>) {
        let quad = vec![
            [Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 0.0)],
            [Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 0.0), Vec3::new(-1.0, 1.0, 0.0)],
        ];
        let geometry = AccelGeometry {
            meshes: vec![quad],
        };
        let instances = vec![
            AccelInstance {
                mesh: 0,
                transform: Mat4::IDENTITY,
            },
            AccelInstance {
                mesh: 0,
                transform: Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0)),
            },
        ];
        (geometry, instances)
    }

    fn build(kind: AccelKind) -> AccelStructure {
        let (geometry, instances) = two_quads();
        let memory: DeviceHandle = Arc::new(HostMemory::new());
        AccelStructure::build(kind, geometry, &instances, &BuildOptions::default(), memory).unwrap()
    }

    #[test]
    fn both_layouts_find_the_front_instance() {
        for kind in [AccelKind::SingleLevel, AccelKind::MultiLevel] {
            let accel = build(kind);
            let ray = Ray::new(Vec3::new(0.2, 0.1, 5.0), Vec3::NEG_Z);
            let hit = accel.intersect(&ray, f32::INFINITY).unwrap();
            assert_eq!(hit.instance, 0, "{kind}");
            assert!((hit.t - 5.0).abs() < 1e-5);
            assert!(accel.occluded(&ray, 6.0));
            assert!(!accel.occluded(&ray, 4.0));
            assert!(!accel.traversable().is_null());
            assert_eq!(accel.primitive_count(), 4);
        }
    }

    #[test]
    fn update_moves_instances() {
        for kind in [AccelKind::SingleLevel, AccelKind::MultiLevel] {
            let mut accel = build(kind);
            let root = accel.traversable();
            accel
                .update(&[
                    Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)),
                    Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0)),
                ])
                .unwrap();
            let ray = Ray::new(Vec3::new(0.2, 0.1, 5.0), Vec3::NEG_Z);
            let hit = accel.intersect(&ray, f32::INFINITY).unwrap();
            assert_eq!(hit.instance, 1, "{kind}");
            assert!((hit.t - 8.0).abs() < 1e-5);
            assert_eq!(accel.traversable(), root);
        }
    }

    #[test]
    fn empty_scene_builds_and_misses() {
        let memory: DeviceHandle = Arc::new(HostMemory::new());
        for kind in [AccelKind::SingleLevel, AccelKind::MultiLevel] {
            let accel = AccelStructure::build(
                kind,
                AccelGeometry::default(),
                &[],
                &BuildOptions::default(),
                memory.clone(),
            )
            .unwrap();
            assert!(accel.traversable().is_null());
            let ray = Ray::new(Vec3::ZERO, Vec3::X);
            assert!(accel.intersect(&ray, f32::INFINITY).is_none());
        }
        assert_eq!(memory.allocated_bytes(), 0);
    }

    #[test]
    fn degenerate_geometry_is_an_accel_error() {
        let geometry = AccelGeometry {
            meshes: vec![vec![[Vec3::splat(f32::INFINITY), Vec3::ZERO, Vec3::X]]],
        };
        let instances = [AccelInstance {
            mesh: 0,
            transform: Mat4::IDENTITY,
        }];
        let memory: DeviceHandle = Arc::new(HostMemory::new());
        let err = AccelStructure::build(
            AccelKind::MultiLevel,
            geometry,
            &instances,
            &BuildOptions::default(),
            memory,
        )
        .err()
        .unwrap();
        assert!(matches!(err, RenderError::Accel(_)));
    }
}
