// src/upload/mod.rs
// Scene upload and synchronization: host leaves -> typed device pools -> SceneData + acceleration structure
// Exists so kernels only ever see flat device records whose cross-references are raw addresses

pub mod managed;

pub use managed::{CopyMode, ManagedObject};

use crate::accel::{AccelGeometry, AccelInstance, AccelStructure, BuildOptions};
use crate::config::{AccelKind, SceneParameters};
use crate::device::{
    DeviceHandle, DevicePtr, HostMemory, MultiTypeStorage, TaggedPtr, TypedBuffer,
    VariantRecord,
};
use crate::error::{RenderError, RenderResult};
use crate::rt::{
    light_record, medium_record, DeviceObject, DiffuseAreaLight, InstanceData, LightKind,
    LightRecord, MaterialData, MediumInterfaceData, MediumKind, MediumRecord, MeshData,
    SceneData, UniformLightSampler,
};
use crate::scene::{LeafId, Mesh, MeshInstance, Scene, SceneGraphLeaf, SceneLeaf};
use glam::{Mat4, Vec3};
use managed::Managed;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Per-mesh vertex and index arrays. Structural: sized once per upload.
struct MeshBuffers {
    positions: TypedBuffer<[f32; 3]>,
    normals: TypedBuffer<[f32; 3]>,
    texcoords: TypedBuffer<[f32; 2]>,
    tangents: TypedBuffer<[f32; 3]>,
    indices: TypedBuffer<[u32; 3]>,
}

impl MeshBuffers {
    fn upload(memory: &DeviceHandle, mesh: &Mesh) -> RenderResult<Self> {
        let v3 = |v: &Vec<Vec3>| v.iter().map(|p| p.to_array()).collect::<Vec<_>>();
        Ok(Self {
            positions: TypedBuffer::alloc_and_copy_from_host(memory.clone(), &v3(&mesh.positions))?,
            normals: TypedBuffer::alloc_and_copy_from_host(memory.clone(), &v3(&mesh.normals))?,
            texcoords: TypedBuffer::alloc_and_copy_from_host(
                memory.clone(),
                &mesh.texcoords.iter().map(|t| t.to_array()).collect::<Vec<_>>(),
            )?,
            tangents: TypedBuffer::alloc_and_copy_from_host(memory.clone(), &v3(&mesh.tangents))?,
            indices: TypedBuffer::alloc_and_copy_from_host(memory.clone(), &mesh.indices)?,
        })
    }
}

/// Voxel payloads of grid media.
enum GridPayload {
    Scalar(TypedBuffer<f32>),
    Rgb(TypedBuffer<[f32; 3]>),
}

/// Counters of the last full upload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub materials: usize,
    pub media: usize,
    pub meshes: usize,
    pub instances: usize,
    pub mesh_lights: usize,
    pub explicit_lights: usize,
    pub skipped_entities: usize,
}

impl UploadStats {
    pub fn total_lights(&self) -> usize {
        self.mesh_lights + self.explicit_lights
    }
}

/// Device-side mirror of one scene.
///
/// Owns every pool; kernels read them through `get_scene_data()`. Leaves are
/// only referenced weakly, so dropping a leaf on the host side turns its
/// managed object into a no-op.
pub struct RtScene {
    memory: DeviceHandle,
    params: SceneParameters,
    managed: HashMap<LeafId, Box<dyn Managed>>,
    upload_sequence: Vec<LeafId>,
    materials: TypedBuffer<MaterialData>,
    meshes: TypedBuffer<MeshData>,
    instances: TypedBuffer<InstanceData>,
    mesh_buffers: Vec<MeshBuffers>,
    mesh_lights: Vec<Option<TypedBuffer<DiffuseAreaLight>>>,
    lights: MultiTypeStorage<LightKind>,
    media: MultiTypeStorage<MediumKind>,
    grids: Vec<GridPayload>,
    infinite_lights: TypedBuffer<TaggedPtr>,
    light_sampler: TypedBuffer<UniformLightSampler>,
    launch_params: TypedBuffer<SceneData>,
    accel: Option<AccelStructure>,
    accel_instances: Vec<Weak<SceneLeaf<MeshInstance>>>,
    accel_transforms: Vec<Mat4>,
    scene_data: SceneData,
    stats: UploadStats,
}

impl RtScene {
    pub fn new(memory: DeviceHandle, params: SceneParameters) -> Self {
        Self {
            managed: HashMap::new(),
            upload_sequence: Vec::new(),
            materials: TypedBuffer::new(memory.clone()),
            meshes: TypedBuffer::new(memory.clone()),
            instances: TypedBuffer::new(memory.clone()),
            mesh_buffers: Vec::new(),
            mesh_lights: Vec::new(),
            lights: MultiTypeStorage::new(memory.clone()),
            media: MultiTypeStorage::new(memory.clone()),
            grids: Vec::new(),
            infinite_lights: TypedBuffer::new(memory.clone()),
            light_sampler: TypedBuffer::new(memory.clone()),
            launch_params: TypedBuffer::new(memory.clone()),
            accel: None,
            accel_instances: Vec::new(),
            accel_transforms: Vec::new(),
            scene_data: SceneData::default(),
            stats: UploadStats::default(),
            memory,
            params,
        }
    }

    /// Scene on the host-emulated device, honoring the configured memory budget.
    pub fn with_host_memory(params: SceneParameters) -> Self {
        let memory: DeviceHandle = match params.device_memory_budget {
            Some(budget) => Arc::new(HostMemory::with_budget(budget as usize)),
            None => Arc::new(HostMemory::new()),
        };
        Self::new(memory, params)
    }

    pub fn memory(&self) -> &DeviceHandle {
        &self.memory
    }

    pub fn params(&self) -> &SceneParameters {
        &self.params
    }

    pub fn accel(&self) -> Option<&AccelStructure> {
        self.accel.as_ref()
    }

    pub fn upload_stats(&self) -> UploadStats {
        self.stats
    }

    /// Device slot of a leaf's managed object.
    pub fn managed_ptr(&self, leaf: LeafId) -> Option<DevicePtr> {
        self.managed.get(&leaf).map(|m| m.ptr())
    }

    /// Bytes last staged for a leaf, as copied to its slot.
    pub fn staged_bytes(&self, leaf: LeafId) -> Option<&[u8]> {
        self.managed.get(&leaf).map(|m| m.staged_bytes())
    }

    pub fn managed_count(&self) -> usize {
        self.managed.len()
    }

    /// Leaves in the order their managed objects were first uploaded.
    pub fn upload_sequence(&self) -> &[LeafId] {
        &self.upload_sequence
    }

    pub fn light_storage(&self) -> &MultiTypeStorage<LightKind> {
        &self.lights
    }

    pub fn medium_storage(&self) -> &MultiTypeStorage<MediumKind> {
        &self.media
    }

    /// Mirror `leaf` into `slot` with a blocking copy and keep it for later updates.
    ///
    /// `record` carries the structural fields; its value fields are taken from the leaf.
    pub fn upload_managed_object<R: DeviceObject>(
        &mut self,
        leaf: &Arc<SceneLeaf<R::Leaf>>,
        slot: DevicePtr,
        record: R,
    ) -> RenderResult<()> {
        let mut object = ManagedObject::new(leaf, slot, record);
        object.upload(self.memory.as_ref(), CopyMode::Blocking)?;
        let id = leaf.id();
        if self.managed.insert(id, Box::new(object)).is_none() {
            self.upload_sequence.push(id);
        }
        Ok(())
    }

    /// Queue a value refresh of a previously uploaded leaf.
    ///
    /// Returns `false` without touching the device when the leaf was never
    /// uploaded or no longer exists. Call `synchronize` before tracing.
    pub fn update_managed_object(&mut self, leaf: LeafId) -> RenderResult<bool> {
        match self.managed.get_mut(&leaf) {
            Some(object) => object.upload(self.memory.as_ref(), CopyMode::Async),
            None => Ok(false),
        }
    }

    /// Re-copy exactly the leaves that report an update and clear their flags.
    pub fn update_scene_data(&mut self) -> RenderResult<usize> {
        let mut updated = 0;
        for id in &self.upload_sequence {
            let Some(object) = self.managed.get_mut(id) else {
                continue;
            };
            if object.leaf_updated() != Some(true) {
                continue;
            }
            if object.upload(self.memory.as_ref(), CopyMode::Async)? {
                object.clear_updated();
                updated += 1;
            }
        }
        if updated > 0 {
            log::debug!("Re-uploaded {updated} updated scene object(s)");
        }
        Ok(updated)
    }

    /// Refit the acceleration structure to the current instance transforms.
    ///
    /// Only valid while the instance and mesh sets are the ones uploaded; after
    /// adding or removing either, call `upload_scene_data` again.
    pub fn update_accel_structure(&mut self) -> RenderResult<()> {
        for (leaf, transform) in self.accel_instances.iter().zip(&mut self.accel_transforms) {
            if let Some(leaf) = leaf.upgrade() {
                *transform = leaf.read().transform;
            }
        }
        let accel = self
            .accel
            .as_mut()
            .ok_or_else(|| RenderError::accel("update before the first build"))?;
        accel.update(&self.accel_transforms)
    }

    /// Wait for every queued copy.
    pub fn synchronize(&self) -> RenderResult<()> {
        self.memory.synchronize()
    }

    pub fn get_scene_data(&self) -> SceneData {
        self.scene_data
    }

    /// Copy the current `SceneData` into a device-resident launch parameter block.
    pub fn upload_launch_params(&mut self) -> RenderResult<DevicePtr> {
        self.launch_params.resize(1)?;
        self.launch_params.set(0, &self.scene_data)?;
        Ok(self.launch_params.ptr())
    }

    /// Snapshot of the current pools.
    pub fn assemble(&self) -> SceneData {
        SceneData {
            meshes: self.meshes.as_slice(),
            instances: self.instances.as_slice(),
            materials: self.materials.as_slice(),
            lights: self.lights.pointer_slice(),
            infinite_lights: self.infinite_lights.as_slice(),
            light_sampler: self.light_sampler.ptr(),
            traversable: self
                .accel
                .as_ref()
                .map_or(DevicePtr::NULL, AccelStructure::traversable),
            camera_medium: self.scene_data.camera_medium,
            accel_kind: match self.params.accel {
                AccelKind::SingleLevel => 0,
                AccelKind::MultiLevel => 1,
            },
            _pad: 0,
        }
    }

    fn reset(&mut self) {
        let memory = self.memory.clone();
        let params = self.params.clone();
        *self = Self::new(memory, params);
    }

    /// Full upload: materials, media, meshes, instances, lights; then a device
    /// barrier and the acceleration structure build.
    pub fn upload_scene_data(&mut self, scene: &Scene) -> RenderResult<()> {
        self.reset();
        self.upload_materials(scene)?;
        let media = self.upload_media(scene)?;
        let geometry = self.upload_meshes(scene, &media)?;
        let emission = mesh_emission(scene);
        self.upload_instances(scene, &emission)?;
        self.upload_lights(scene)?;

        // Instance records hold raw addresses into light storage.
        self.memory.synchronize()?;

        self.scene_data.camera_medium = match scene.camera.medium {
            Some(index) => *media.get(index).ok_or_else(|| {
                RenderError::upload(format!("camera references medium {index} of {}", media.len()))
            })?,
            None => TaggedPtr::NULL,
        };

        let instances: Vec<AccelInstance> = scene
            .instances
            .iter()
            .map(|leaf| {
                let inst = leaf.read();
                AccelInstance {
                    mesh: inst.mesh,
                    transform: inst.transform,
                }
            })
            .collect();
        self.accel_instances = scene.instances.iter().map(Arc::downgrade).collect();
        self.accel_transforms = instances.iter().map(|i| i.transform).collect();
        let options = BuildOptions {
            max_leaf_size: self.params.bvh_max_leaf_size,
        };
        self.accel = Some(AccelStructure::build(
            self.params.accel,
            geometry,
            &instances,
            &options,
            self.memory.clone(),
        )?);

        self.scene_data = self.assemble();
        log::info!(
            "Uploaded scene: {} materials, {} media, {} meshes, {} instances, {} lights, {} skipped",
            self.stats.materials,
            self.stats.media,
            self.stats.meshes,
            self.stats.instances,
            self.stats.total_lights(),
            self.stats.skipped_entities
        );
        Ok(())
    }

    fn upload_materials(&mut self, scene: &Scene) -> RenderResult<()> {
        self.materials.resize(scene.materials.len())?;
        for (index, leaf) in scene.materials.iter().enumerate() {
            let slot = self.materials.ptr_at(index)?;
            self.upload_managed_object(leaf, slot, MaterialData::default())?;
        }
        self.stats.materials = scene.materials.len();
        Ok(())
    }

    /// Returns the tagged handle of every scene medium, null where skipped.
    fn upload_media(&mut self, scene: &Scene) -> RenderResult<Vec<TaggedPtr>> {
        let mut handles = Vec::with_capacity(scene.media.len());
        for (index, leaf) in scene.media.iter().enumerate() {
            let record = medium_record(&leaf.read());
            let record = match record {
                Ok(record) => record,
                Err(err) if !err.is_fatal() => {
                    log::error!("{err}; medium {index} ({}) skipped", leaf.read().kind_name());
                    self.stats.skipped_entities += 1;
                    handles.push(TaggedPtr::NULL);
                    continue;
                }
                Err(err) => return Err(err),
            };
            let handle = match record {
                MediumRecord::Homogeneous(r) => self.place_medium(leaf, r)?,
                MediumRecord::GridScalar(mut r, values) => {
                    let buffer = TypedBuffer::alloc_and_copy_from_host(self.memory.clone(), &values)?;
                    r.0.values = buffer.ptr();
                    self.grids.push(GridPayload::Scalar(buffer));
                    self.place_medium(leaf, r)?
                }
                MediumRecord::GridRgb(mut r, values) => {
                    let buffer = TypedBuffer::alloc_and_copy_from_host(self.memory.clone(), &values)?;
                    r.0.values = buffer.ptr();
                    self.grids.push(GridPayload::Rgb(buffer));
                    self.place_medium(leaf, r)?
                }
            };
            handles.push(handle);
            self.stats.media += 1;
        }
        self.media.add_pointers(scene.media.iter().map(|leaf| leaf.id()));
        self.media.upload_pointers()?;
        Ok(handles)
    }

    fn place_medium<R>(&mut self, leaf: &Arc<SceneLeaf<crate::scene::Medium>>, record: R) -> RenderResult<TaggedPtr>
    where
        R: DeviceObject<Leaf = crate::scene::Medium> + VariantRecord<Kind = MediumKind>,
    {
        let tagged = self.media.emplace_entity::<R>(leaf.id())?;
        self.upload_managed_object(leaf, tagged.ptr(), record)?;
        Ok(tagged.raw())
    }

    fn upload_meshes(&mut self, scene: &Scene, media: &[TaggedPtr]) -> RenderResult<AccelGeometry> {
        self.meshes.resize(scene.meshes.len())?;
        let mut geometry = AccelGeometry::default();
        let medium_at = |index: Option<usize>| -> RenderResult<TaggedPtr> {
            match index {
                None => Ok(TaggedPtr::NULL),
                Some(i) => media.get(i).copied().ok_or_else(|| {
                    RenderError::upload(format!("mesh references medium {i} of {}", media.len()))
                }),
            }
        };
        for (index, leaf) in scene.meshes.iter().enumerate() {
            let (buffers, record, triangles) = {
                let mesh = leaf.read();
                mesh.validate()?;
                let material = match mesh.material {
                    Some(m) => self.materials.ptr_at(m).map_err(|_| {
                        RenderError::upload(format!(
                            "mesh {index} references material {m} of {}",
                            self.materials.len()
                        ))
                    })?,
                    None => DevicePtr::NULL,
                };
                let buffers = MeshBuffers::upload(&self.memory, &mesh)?;
                let record = MeshData {
                    positions: buffers.positions.ptr(),
                    normals: buffers.normals.ptr(),
                    texcoords: buffers.texcoords.ptr(),
                    tangents: buffers.tangents.ptr(),
                    indices: buffers.indices.ptr(),
                    material,
                    media: MediumInterfaceData {
                        inside: medium_at(mesh.inside_medium)?,
                        outside: medium_at(mesh.outside_medium)?,
                    },
                    le: [0.0; 3],
                    triangle_count: mesh.triangle_count() as u32,
                    vertex_count: mesh.vertex_count() as u32,
                    _pad: 0,
                };
                let triangles = (0..mesh.triangle_count())
                    .filter_map(|t| mesh.triangle_vertices(t))
                    .collect::<Vec<_>>();
                (buffers, record, triangles)
            };
            let slot = self.meshes.ptr_at(index)?;
            self.upload_managed_object(leaf, slot, record)?;
            self.mesh_buffers.push(buffers);
            geometry.meshes.push(triangles);
        }
        self.stats.meshes = scene.meshes.len();
        Ok(geometry)
    }

    fn upload_instances(&mut self, scene: &Scene, emission: &[Option<Vec3>]) -> RenderResult<()> {
        self.instances.resize(scene.instances.len())?;
        for (index, leaf) in scene.instances.iter().enumerate() {
            let mesh_index = leaf.read().mesh;
            let mesh = self.meshes.ptr_at(mesh_index).map_err(|_| {
                RenderError::upload(format!(
                    "instance {index} references mesh {mesh_index} of {}",
                    self.meshes.len()
                ))
            })?;
            let slot = self.instances.ptr_at(index)?;

            // One diffuse area light per triangle of an emissive mesh.
            let lights = match emission.get(mesh_index).copied().flatten() {
                Some(le) => {
                    let triangles = scene.meshes[mesh_index].read().triangle_count();
                    let records: Vec<DiffuseAreaLight> = (0..triangles)
                        .map(|triangle| DiffuseAreaLight {
                            instance: slot,
                            triangle: triangle as u32,
                            two_sided: 1,
                            le: le.to_array(),
                            _pad: 0.0,
                        })
                        .collect();
                    Some(TypedBuffer::alloc_and_copy_from_host(self.memory.clone(), &records)?)
                }
                None => None,
            };
            let record = InstanceData {
                mesh,
                lights: lights.as_ref().map_or(DevicePtr::NULL, TypedBuffer::ptr),
                light_count: lights.as_ref().map_or(0, |l| l.len() as u32),
                mesh_index: mesh_index as u32,
                instance_id: index as u32,
                ..InstanceData::default()
            };
            self.upload_managed_object(leaf, slot, record)?;
            self.mesh_lights.push(lights);
        }
        self.stats.instances = scene.instances.len();
        Ok(())
    }

    fn upload_lights(&mut self, scene: &Scene) -> RenderResult<()> {
        for buffer in self.mesh_lights.iter().flatten() {
            for triangle in 0..buffer.len() {
                let ptr = buffer.ptr_at(triangle)?;
                self.lights
                    .add_pointer(TaggedPtr::new(LightKind::DiffuseArea, ptr));
            }
        }
        self.stats.mesh_lights = self.lights.pointers().len();

        let sphere = scene.bounding_sphere();
        for leaf in &scene.lights {
            let record = light_record(&leaf.read(), sphere);
            let record = match record {
                Ok(record) => record,
                Err(err) if !err.is_fatal() => {
                    log::error!("{err}; light skipped");
                    self.stats.skipped_entities += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };
            match record {
                LightRecord::Point(r) => self.place_light(leaf, r)?,
                LightRecord::Directional(r) => self.place_light(leaf, r)?,
                LightRecord::Spot(r) => self.place_light(leaf, r)?,
                LightRecord::Infinite(r) => self.place_light(leaf, r)?,
            }
            self.stats.explicit_lights += 1;
        }
        self.lights.add_pointers(scene.lights.iter().map(|leaf| leaf.id()));

        let count = self.lights.pointers().len();
        log::info!("A total of {count} light(s) processed!");
        if count == 0 {
            log::error!("No light source found in the scene; the image will be black");
        }

        let lights = self.lights.upload_pointers()?;
        let infinite = self.lights.kind_pointers(LightKind::Infinite);
        self.infinite_lights.resize(infinite.len())?;
        self.infinite_lights.copy_from_host(&infinite)?;
        let sampler = UniformLightSampler::new(lights.ptr, count);
        self.light_sampler.resize(1)?;
        self.light_sampler.set(0, &sampler)
    }

    fn place_light<R>(&mut self, leaf: &Arc<SceneLeaf<crate::scene::Light>>, record: R) -> RenderResult<()>
    where
        R: DeviceObject<Leaf = crate::scene::Light> + VariantRecord<Kind = LightKind>,
    {
        let tagged = self.lights.emplace_entity::<R>(leaf.id())?;
        self.upload_managed_object(leaf, tagged.ptr(), record)
    }
}

/// Radiance of each mesh's triangles: the mesh's own `le`, else its material emission.
fn mesh_emission(scene: &Scene) -> Vec<Option<Vec3>> {
    scene
        .meshes
        .iter()
        .map(|leaf| {
            let mesh = leaf.read();
            if mesh.is_emissive() {
                return Some(mesh.le);
            }
            let material = mesh.material.and_then(|m| scene.materials.get(m))?;
            let material = material.read();
            material.is_emissive().then_some(material.emission)
        })
        .collect()
}
