// src/path_tracing/bound.rs
// Per-frame view of an uploaded scene: SceneData read back and tagged pointers resolved
// Exists so stage kernels dispatch on closed enums built from tags, never on host scene types
// RELEVANT FILES:src/rt/scene_data.rs,src/device/tagged.rs,src/upload/mod.rs,src/path_tracing/wavefront/stages.rs

use super::sampler::{uniform_sphere, uniform_triangle, UNIFORM_SPHERE_PDF};
use super::workitem::{MediumId, SurfaceInteraction};
use crate::accel::{AccelStructure, Ray, TriangleHit};
use crate::device::{read_array, read_record, DeviceMemory, DevicePtr, TaggedPtr};
use crate::error::{RenderError, RenderResult};
use crate::rt::{
    DiffuseAreaLight, DirectionalLight, HomogeneousMedium, InfiniteLight, InstanceData, LightKind,
    MaterialData, MediumKind, MeshData, PointLight, RgbGridMedium, ScalarGridMedium, SceneData,
    SpotLight, UniformLightSampler,
};
use crate::upload::RtScene;
use glam::{Mat4, Vec2, Vec3};
use std::collections::HashMap;
use std::mem::size_of;

struct BoundMesh {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    texcoords: Vec<Vec2>,
    indices: Vec<[u32; 3]>,
    material: Option<MaterialData>,
    inside: MediumId,
    outside: MediumId,
}

struct BoundInstance {
    mesh: usize,
    transform: Mat4,
    normal: Mat4,
    lights: DevicePtr,
}

/// A light resolved from its tagged pointer.
#[derive(Clone, Copy, Debug)]
pub enum BoundLight {
    Point(PointLight),
    Directional(DirectionalLight),
    Spot(SpotLight),
    Infinite(InfiniteLight),
    Area {
        vertices: [Vec3; 3],
        n: Vec3,
        area: f32,
        le: Vec3,
        two_sided: bool,
    },
}

impl BoundLight {
    pub fn is_delta(&self) -> bool {
        matches!(self, Self::Point(_) | Self::Directional(_) | Self::Spot(_))
    }

    /// Radiance leaving an area light towards `w` from a point with normal `n`.
    pub fn area_le(&self, n: Vec3, w: Vec3) -> Vec3 {
        match *self {
            Self::Area { le, two_sided, .. } if two_sided || n.dot(w) > 0.0 => le,
            _ => Vec3::ZERO,
        }
    }
}

/// Direction and radiance towards one light from a shading point.
#[derive(Clone, Copy, Debug)]
pub struct LightSample {
    pub wi: Vec3,
    /// Point on the light, or `None` for lights at infinity.
    pub p: Option<Vec3>,
    pub le: Vec3,
    /// Solid-angle density, 1 for delta lights.
    pub pdf: f32,
    pub delta: bool,
}

#[derive(Clone, Debug)]
pub enum GridVoxels {
    Scalar(Vec<f32>),
    Rgb(Vec<Vec3>),
}

/// A medium resolved from its tagged pointer.
#[derive(Clone, Debug)]
pub enum BoundMedium {
    Homogeneous {
        sigma_a: Vec3,
        sigma_s: Vec3,
        g: f32,
    },
    Grid {
        world_to_medium: Mat4,
        bounds_min: Vec3,
        bounds_max: Vec3,
        resolution: [u32; 3],
        sigma_a: Vec3,
        sigma_s: Vec3,
        max_density: f32,
        g: f32,
        voxels: GridVoxels,
    },
}

impl BoundMedium {
    pub fn g(&self) -> f32 {
        match self {
            Self::Homogeneous { g, .. } | Self::Grid { g, .. } => *g,
        }
    }

    /// Scalar bound on extinction over every channel and point.
    pub fn majorant(&self) -> f32 {
        match self {
            Self::Homogeneous {
                sigma_a, sigma_s, ..
            } => (*sigma_a + *sigma_s).max_element(),
            Self::Grid {
                sigma_a,
                sigma_s,
                max_density,
                ..
            } => (*sigma_a + *sigma_s).max_element() * max_density,
        }
    }

    /// `(sigma_a, sigma_s)` at world point `p`.
    pub fn coefficients(&self, p: Vec3) -> (Vec3, Vec3) {
        match self {
            Self::Homogeneous {
                sigma_a, sigma_s, ..
            } => (*sigma_a, *sigma_s),
            Self::Grid {
                world_to_medium,
                bounds_min,
                bounds_max,
                resolution,
                sigma_a,
                sigma_s,
                voxels,
                ..
            } => {
                let q = world_to_medium.transform_point3(p);
                let extent = *bounds_max - *bounds_min;
                let rel = (q - *bounds_min) / extent;
                if !(rel.cmpge(Vec3::ZERO).all() && rel.cmplt(Vec3::ONE).all()) {
                    return (Vec3::ZERO, Vec3::ZERO);
                }
                let res = Vec3::new(resolution[0] as f32, resolution[1] as f32, resolution[2] as f32);
                let cell = (rel * res).floor();
                let [x, y, z] = [cell.x as usize, cell.y as usize, cell.z as usize];
                let index = x + resolution[0] as usize * (y + resolution[1] as usize * z);
                let density = match voxels {
                    GridVoxels::Scalar(v) => Vec3::splat(v.get(index).copied().unwrap_or(0.0)),
                    GridVoxels::Rgb(v) => v.get(index).copied().unwrap_or(Vec3::ZERO),
                };
                (*sigma_a * density, *sigma_s * density)
            }
        }
    }

    /// Ray parameter range `[t0, t1]` within `[0, t_max]` where the medium can be non-empty.
    pub fn clip(&self, ray: &Ray, t_max: f32) -> Option<(f32, f32)> {
        match self {
            Self::Homogeneous { .. } => Some((0.0, t_max)),
            Self::Grid {
                world_to_medium,
                bounds_min,
                bounds_max,
                ..
            } => {
                let local = ray.transformed(world_to_medium);
                let inv = Vec3::ONE / local.dir;
                let a = (*bounds_min - local.origin) * inv;
                let b = (*bounds_max - local.origin) * inv;
                let t0 = a.min(b).max_element().max(0.0);
                let t1 = a.max(b).min_element().min(t_max);
                (t0 <= t1).then_some((t0, t1))
            }
        }
    }

    /// Transmittance along `ray` over `[0, t_max]`. Ratio tracking for grids.
    pub fn transmittance(&self, ray: &Ray, t_max: f32, mut u: impl FnMut() -> f32) -> Vec3 {
        match self {
            Self::Homogeneous {
                sigma_a, sigma_s, ..
            } => {
                let sigma_t = *sigma_a + *sigma_s;
                let tau = sigma_t * t_max;
                let beer = Vec3::new((-tau.x).exp(), (-tau.y).exp(), (-tau.z).exp());
                Vec3::select(sigma_t.cmpgt(Vec3::ZERO), beer, Vec3::ONE)
            }
            Self::Grid { .. } => {
                let Some((t0, t1)) = self.clip(ray, t_max) else {
                    return Vec3::ONE;
                };
                let m = self.majorant();
                if m <= 0.0 {
                    return Vec3::ONE;
                }
                let mut tr = Vec3::ONE;
                let mut t = t0;
                loop {
                    t -= (1.0 - u()).ln() / m;
                    if t >= t1 {
                        return tr;
                    }
                    let (sa, ss) = self.coefficients(ray.at(t));
                    tr *= (Vec3::ONE - (sa + ss) / m).max(Vec3::ZERO);
                    if tr.max_element() <= 0.0 {
                        return Vec3::ZERO;
                    }
                }
            }
        }
    }
}

/// Host-side view of the device scene for one frame.
pub struct BoundScene<'a> {
    accel: Option<&'a AccelStructure>,
    data: SceneData,
    meshes: Vec<BoundMesh>,
    instances: Vec<BoundInstance>,
    lights: Vec<BoundLight>,
    light_index: HashMap<u64, u32>,
    infinite: Vec<u32>,
    media: Vec<BoundMedium>,
    sampler: UniformLightSampler,
    camera_medium: MediumId,
    scene_radius: f32,
    opaque: bool,
}

impl<'a> BoundScene<'a> {
    pub fn new(scene: &'a RtScene) -> RenderResult<Self> {
        let memory = scene.memory().as_ref();
        let data = scene.get_scene_data();
        let accel = scene.accel();
        let mut media = MediaTable::default();

        let mut meshes = Vec::with_capacity(data.meshes.len());
        for record in data.meshes.read_all::<MeshData>(memory)? {
            meshes.push(bind_mesh(memory, &record, &mut media)?);
        }

        let mut instances = Vec::with_capacity(data.instances.len());
        let mut instance_index = HashMap::new();
        for (i, record) in data
            .instances
            .read_all::<InstanceData>(memory)?
            .into_iter()
            .enumerate()
        {
            let address = data.instances.ptr.offset(i * size_of::<InstanceData>());
            instance_index.insert(address.addr(), i);
            instances.push(BoundInstance {
                mesh: record.mesh_index as usize,
                transform: record.transform(),
                normal: record.normal_transform(),
                lights: record.lights,
            });
        }

        let pointers = data.lights.read_all::<TaggedPtr>(memory)?;
        let mut lights = Vec::with_capacity(pointers.len());
        let mut light_index = HashMap::with_capacity(pointers.len());
        for tagged in &pointers {
            let light = match tagged.kind::<LightKind>() {
                Some(LightKind::Point) => BoundLight::Point(read_record(memory, tagged.ptr())?),
                Some(LightKind::Directional) => {
                    BoundLight::Directional(read_record(memory, tagged.ptr())?)
                }
                Some(LightKind::Spot) => BoundLight::Spot(read_record(memory, tagged.ptr())?),
                Some(LightKind::Infinite) => {
                    BoundLight::Infinite(read_record(memory, tagged.ptr())?)
                }
                Some(LightKind::DiffuseArea) => {
                    let record: DiffuseAreaLight = read_record(memory, tagged.ptr())?;
                    let instance = instance_index
                        .get(&record.instance.addr())
                        .and_then(|&i| instances.get(i))
                        .ok_or_else(|| RenderError::render("area light of an unknown instance"))?;
                    bind_area_light(&record, instance, &meshes)?
                }
                None => {
                    return Err(RenderError::render(format!(
                        "light pointer carries unknown tag {}",
                        tagged.tag()
                    )))
                }
            };
            light_index.insert(tagged.ptr().addr(), lights.len() as u32);
            lights.push(light);
        }

        let infinite = data
            .infinite_lights
            .read_all::<TaggedPtr>(memory)?
            .iter()
            .filter_map(|t| light_index.get(&t.ptr().addr()).copied())
            .collect();
        let sampler = if data.light_sampler.is_null() {
            UniformLightSampler::default()
        } else {
            read_record(memory, data.light_sampler)?
        };
        let camera_medium = media.resolve(memory, data.camera_medium)?;
        let scene_radius = accel
            .map(|a| a.world_bounds())
            .filter(|b| b.is_valid())
            .map_or(1.0, |b| (b.extent().length() * 0.5).max(1e-3));
        let opaque = meshes.iter().all(|m| m.material.is_some());

        Ok(Self {
            accel,
            data,
            meshes,
            instances,
            lights,
            light_index,
            infinite,
            media: media.media,
            sampler,
            camera_medium,
            scene_radius,
            opaque,
        })
    }

    pub fn scene_data(&self) -> &SceneData {
        &self.data
    }

    pub fn camera_medium(&self) -> MediumId {
        self.camera_medium
    }

    pub fn light_count(&self) -> usize {
        self.lights.len()
    }

    pub fn light(&self, index: u32) -> Option<&BoundLight> {
        self.lights.get(index as usize)
    }

    pub fn infinite_lights(&self) -> impl Iterator<Item = &BoundLight> {
        self.infinite.iter().filter_map(|&i| self.lights.get(i as usize))
    }

    pub fn medium(&self, id: u32) -> Option<&BoundMedium> {
        self.media.get(id as usize)
    }

    pub fn light_pmf(&self) -> f32 {
        self.sampler.pmf()
    }

    /// Pick a light for next-event estimation. Returns its index and probability.
    pub fn pick_light(&self, u: f32) -> Option<(u32, f32)> {
        let (index, pmf) = self.sampler.sample(u)?;
        (index < self.lights.len()).then_some((index as u32, pmf))
    }

    /// True when every surface has a material, so any hit blocks a shadow ray.
    pub fn is_opaque(&self) -> bool {
        self.opaque
    }

    pub fn intersect(&self, ray: &Ray, t_max: f32) -> Option<TriangleHit> {
        self.accel.and_then(|a| a.intersect(ray, t_max))
    }

    pub fn occluded(&self, ray: &Ray, t_max: f32) -> bool {
        self.accel.is_some_and(|a| a.occluded(ray, t_max))
    }

    /// Shading data at a closest hit.
    pub fn surface(&self, ray: &Ray, hit: &TriangleHit) -> Option<SurfaceInteraction> {
        let instance = self.instances.get(hit.instance as usize)?;
        let mesh = self.meshes.get(instance.mesh)?;
        let [i0, i1, i2] = mesh.indices.get(hit.prim as usize)?.map(|i| i as usize);
        let v = [
            instance.transform.transform_point3(*mesh.positions.get(i0)?),
            instance.transform.transform_point3(*mesh.positions.get(i1)?),
            instance.transform.transform_point3(*mesh.positions.get(i2)?),
        ];
        let n = (v[1] - v[0]).cross(v[2] - v[0]).normalize_or_zero();
        let b0 = 1.0 - hit.b1 - hit.b2;
        let ns = match (mesh.normals.get(i0), mesh.normals.get(i1), mesh.normals.get(i2)) {
            (Some(n0), Some(n1), Some(n2)) => {
                let local = *n0 * b0 + *n1 * hit.b1 + *n2 * hit.b2;
                let world = instance.normal.transform_vector3(local).normalize_or_zero();
                if world == Vec3::ZERO {
                    n
                } else {
                    world
                }
            }
            _ => n,
        };
        let uv = match (mesh.texcoords.get(i0), mesh.texcoords.get(i1), mesh.texcoords.get(i2)) {
            (Some(t0), Some(t1), Some(t2)) => *t0 * b0 + *t1 * hit.b1 + *t2 * hit.b2,
            _ => Vec2::new(hit.b1, hit.b2),
        };
        let light = if instance.lights.is_null() {
            None
        } else {
            let address = instance
                .lights
                .offset(hit.prim as usize * size_of::<DiffuseAreaLight>());
            self.light_index.get(&address.addr()).copied()
        };
        Some(SurfaceInteraction {
            p: ray.at(hit.t),
            n,
            ns,
            uv,
            wo: -ray.dir,
            material: mesh.material,
            inside: mesh.inside,
            outside: mesh.outside,
            light,
        })
    }

    /// Sample a direction towards light `index` from `p`.
    pub fn sample_light(&self, index: u32, p: Vec3, u: Vec2) -> Option<LightSample> {
        let sample = match *self.light(index)? {
            BoundLight::Point(light) => {
                let position = Vec3::from(light.position);
                let d = position - p;
                let dist2 = d.length_squared();
                if dist2 <= 0.0 {
                    return None;
                }
                LightSample {
                    wi: d / dist2.sqrt(),
                    p: Some(position),
                    le: Vec3::from(light.intensity) / dist2,
                    pdf: 1.0,
                    delta: true,
                }
            }
            BoundLight::Spot(light) => {
                let position = Vec3::from(light.position);
                let d = position - p;
                let dist2 = d.length_squared();
                if dist2 <= 0.0 {
                    return None;
                }
                let wi = d / dist2.sqrt();
                let cos = (-wi).dot(Vec3::from(light.direction).normalize_or_zero());
                let falloff = smoothstep(light.cos_falloff_end, light.cos_falloff_start, cos);
                LightSample {
                    wi,
                    p: Some(position),
                    le: Vec3::from(light.intensity) * falloff / dist2,
                    pdf: 1.0,
                    delta: true,
                }
            }
            BoundLight::Directional(light) => LightSample {
                wi: -Vec3::from(light.direction).normalize_or_zero(),
                p: None,
                le: Vec3::from(light.radiance),
                pdf: 1.0,
                delta: true,
            },
            BoundLight::Infinite(light) => LightSample {
                wi: uniform_sphere(u),
                p: None,
                le: Vec3::from(light.radiance) * light.scale,
                pdf: UNIFORM_SPHERE_PDF,
                delta: false,
            },
            BoundLight::Area {
                vertices, n, area, ..
            } => {
                let (b1, b2) = uniform_triangle(u);
                let q = vertices[0] * (1.0 - b1 - b2) + vertices[1] * b1 + vertices[2] * b2;
                let d = q - p;
                let dist2 = d.length_squared();
                if dist2 <= 0.0 {
                    return None;
                }
                let wi = d / dist2.sqrt();
                let le = self.lights[index as usize].area_le(n, -wi);
                let pdf = area_pdf(n, area, wi, dist2)?;
                LightSample {
                    wi,
                    p: Some(q),
                    le,
                    pdf,
                    delta: false,
                }
            }
        };
        Some(sample)
    }

    /// Solid-angle density of reaching a point `q` on area light `index` from `p`.
    pub fn area_light_pdf(&self, index: u32, p: Vec3, q: Vec3) -> f32 {
        match self.light(index) {
            Some(BoundLight::Area { n, area, .. }) => {
                let d = q - p;
                let dist2 = d.length_squared();
                area_pdf(*n, *area, d / dist2.sqrt().max(f32::MIN_POSITIVE), dist2).unwrap_or(0.0)
            }
            _ => 0.0,
        }
    }

    /// Distance used for shadow rays towards lights at infinity.
    pub fn scene_diameter(&self) -> f32 {
        2.0 * self.scene_radius
    }
}

fn area_pdf(n: Vec3, area: f32, wi: Vec3, dist2: f32) -> Option<f32> {
    let cos = n.dot(wi).abs();
    (cos > 1e-8 && area > 0.0).then(|| dist2 / (cos * area))
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge0 >= edge1 {
        return if x >= edge1 { 1.0 } else { 0.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[derive(Default)]
struct MediaTable {
    media: Vec<BoundMedium>,
    by_pointer: HashMap<TaggedPtr, u32>,
}

impl MediaTable {
    fn resolve(&mut self, memory: &dyn DeviceMemory, tagged: TaggedPtr) -> RenderResult<MediumId> {
        if tagged.is_null() {
            return Ok(None);
        }
        if let Some(&id) = self.by_pointer.get(&tagged) {
            return Ok(Some(id));
        }
        let medium = match tagged.kind::<MediumKind>() {
            Some(MediumKind::Homogeneous) => {
                let r: HomogeneousMedium = read_record(memory, tagged.ptr())?;
                BoundMedium::Homogeneous {
                    sigma_a: r.sigma_a.into(),
                    sigma_s: r.sigma_s.into(),
                    g: r.g,
                }
            }
            Some(MediumKind::GridScalar) => {
                let ScalarGridMedium(r) = read_record(memory, tagged.ptr())?;
                let values = read_array::<f32>(memory, r.values, voxel_count(r.resolution))?;
                bind_grid(&r, GridVoxels::Scalar(values))
            }
            Some(MediumKind::GridRgb) => {
                let RgbGridMedium(r) = read_record(memory, tagged.ptr())?;
                let values = read_array::<[f32; 3]>(memory, r.values, voxel_count(r.resolution))?;
                bind_grid(&r, GridVoxels::Rgb(values.into_iter().map(Vec3::from).collect()))
            }
            None => {
                return Err(RenderError::render(format!(
                    "medium pointer carries unknown tag {}",
                    tagged.tag()
                )))
            }
        };
        let id = self.media.len() as u32;
        self.media.push(medium);
        self.by_pointer.insert(tagged, id);
        Ok(Some(id))
    }
}

fn voxel_count(resolution: [u32; 3]) -> usize {
    resolution.iter().map(|&r| r as usize).product()
}

fn bind_grid(r: &crate::rt::GridMediumData, voxels: GridVoxels) -> BoundMedium {
    BoundMedium::Grid {
        world_to_medium: Mat4::from_cols_array_2d(&r.world_to_medium),
        bounds_min: r.bounds_min.into(),
        bounds_max: r.bounds_max.into(),
        resolution: r.resolution,
        sigma_a: r.sigma_a.into(),
        sigma_s: r.sigma_s.into(),
        max_density: r.max_density,
        g: r.g,
        voxels,
    }
}

fn read_optional<T: bytemuck::Pod>(
    memory: &dyn DeviceMemory,
    ptr: DevicePtr,
    count: usize,
) -> RenderResult<Vec<T>> {
    if ptr.is_null() {
        Ok(Vec::new())
    } else {
        read_array(memory, ptr, count)
    }
}

fn bind_mesh(
    memory: &dyn DeviceMemory,
    record: &MeshData,
    media: &mut MediaTable,
) -> RenderResult<BoundMesh> {
    let vertices = record.vertex_count as usize;
    let v3 = |v: Vec<[f32; 3]>| v.into_iter().map(Vec3::from).collect::<Vec<_>>();
    // Equal sides mean the mesh is not a medium boundary.
    let (inside, outside) = if record.media.is_transition() {
        (
            media.resolve(memory, record.media.inside)?,
            media.resolve(memory, record.media.outside)?,
        )
    } else {
        (None, None)
    };
    Ok(BoundMesh {
        positions: v3(read_optional(memory, record.positions, vertices)?),
        normals: v3(read_optional(memory, record.normals, vertices)?),
        texcoords: read_optional::<[f32; 2]>(memory, record.texcoords, vertices)?
            .into_iter()
            .map(Vec2::from)
            .collect(),
        indices: read_optional(memory, record.indices, record.triangle_count as usize)?,
        material: if record.material.is_null() {
            None
        } else {
            Some(read_record(memory, record.material)?)
        },
        inside,
        outside,
    })
}

fn bind_area_light(
    record: &DiffuseAreaLight,
    instance: &BoundInstance,
    meshes: &[BoundMesh],
) -> RenderResult<BoundLight> {
    let missing = || RenderError::render(format!("area light triangle {} is out of range", record.triangle));
    let mesh = meshes.get(instance.mesh).ok_or_else(missing)?;
    let tri = mesh.indices.get(record.triangle as usize).ok_or_else(missing)?;
    let mut vertices = [Vec3::ZERO; 3];
    for (v, &i) in vertices.iter_mut().zip(tri) {
        let p = mesh.positions.get(i as usize).ok_or_else(missing)?;
        *v = instance.transform.transform_point3(*p);
    }
    let cross = (vertices[1] - vertices[0]).cross(vertices[2] - vertices[0]);
    Ok(BoundLight::Area {
        vertices,
        n: cross.normalize_or_zero(),
        area: 0.5 * cross.length(),
        le: Vec3::from(record.le),
        two_sided: record.two_sided != 0,
    })
}
