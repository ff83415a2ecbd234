// src/scene/mod.rs
// Minimal host scene graph: leaves with authoring data and a dirty flag
// Exists so the upload subsystem has leaves to mirror, poll and weakly reference

pub mod camera;
pub mod light;
pub mod material;
pub mod medium;
pub mod mesh;

pub use camera::Camera;
pub use light::{Light, LightDesc};
pub use material::Material;
pub use medium::{GridValues, Medium, MediumDesc};
pub use mesh::{Mesh, MeshInstance};

use glam::Vec3;
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_LEAF_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a scene leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafId(u64);

impl LeafId {
    pub fn next() -> Self {
        LeafId(NEXT_LEAF_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// What the upload subsystem needs to know about any leaf.
pub trait SceneGraphLeaf: Send + Sync {
    fn id(&self) -> LeafId;
    fn is_updated(&self) -> bool;
    fn set_updated(&self, updated: bool);
}

/// A data-bearing scene node. `modify` marks it dirty.
pub struct SceneLeaf<T> {
    id: LeafId,
    data: RwLock<T>,
    updated: AtomicBool,
}

impl<T> SceneLeaf<T> {
    pub fn new(data: T) -> Self {
        Self {
            id: LeafId::next(),
            data: RwLock::new(data),
            updated: AtomicBool::new(false),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.data.read()
    }

    pub fn modify<R>(&self, edit: impl FnOnce(&mut T) -> R) -> R {
        let result = edit(&mut self.data.write());
        self.updated.store(true, Ordering::Release);
        result
    }
}

impl<T: Send + Sync> SceneGraphLeaf for SceneLeaf<T> {
    fn id(&self) -> LeafId {
        self.id
    }

    fn is_updated(&self) -> bool {
        self.updated.load(Ordering::Acquire)
    }

    fn set_updated(&self, updated: bool) {
        self.updated.store(updated, Ordering::Release);
    }
}

/// Owner of every leaf. Entities refer to each other by index into these lists.
#[derive(Default)]
pub struct Scene {
    pub materials: Vec<Arc<SceneLeaf<Material>>>,
    pub media: Vec<Arc<SceneLeaf<Medium>>>,
    pub meshes: Vec<Arc<SceneLeaf<Mesh>>>,
    pub instances: Vec<Arc<SceneLeaf<MeshInstance>>>,
    pub lights: Vec<Arc<SceneLeaf<Light>>>,
    pub camera: Camera,
}

impl Scene {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            ..Self::default()
        }
    }

    pub fn add_material(&mut self, material: Material) -> usize {
        self.materials.push(Arc::new(SceneLeaf::new(material)));
        self.materials.len() - 1
    }

    pub fn add_medium(&mut self, medium: Medium) -> usize {
        self.media.push(Arc::new(SceneLeaf::new(medium)));
        self.media.len() - 1
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> usize {
        self.meshes.push(Arc::new(SceneLeaf::new(mesh)));
        self.meshes.len() - 1
    }

    pub fn add_instance(&mut self, instance: MeshInstance) -> usize {
        self.instances.push(Arc::new(SceneLeaf::new(instance)));
        self.instances.len() - 1
    }

    pub fn add_light(&mut self, light: Light) -> usize {
        self.lights.push(Arc::new(SceneLeaf::new(light)));
        self.lights.len() - 1
    }

    /// Add a mesh and one identity instance of it.
    pub fn add_mesh_instance(&mut self, mesh: Mesh) -> usize {
        let mesh = self.add_mesh(mesh);
        self.add_instance(MeshInstance::new(mesh))
    }

    /// World-space bounds of all instanced geometry.
    pub fn world_bounds(&self) -> Option<(Vec3, Vec3)> {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for instance in &self.instances {
            let instance = instance.read();
            let Some(mesh) = self.meshes.get(instance.mesh) else {
                continue;
            };
            for p in &mesh.read().positions {
                let w = instance.transform.transform_point3(*p);
                min = min.min(w);
                max = max.max(w);
            }
        }
        (min.cmple(max).all()).then_some((min, max))
    }

    /// Center and radius of the bounding sphere of the world bounds.
    pub fn bounding_sphere(&self) -> (Vec3, f32) {
        match self.world_bounds() {
            Some((min, max)) => {
                let center = (min + max) * 0.5;
                (center, (max - center).length().max(1e-3))
            }
            None => (Vec3::ZERO, 1.0),
        }
    }
}
