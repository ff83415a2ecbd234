// src/path_tracing/workitem.rs
// Per-ray records passed between wavefront stages
// Each item is produced by one stage and consumed by exactly one successor stage

use super::sampler::PcgSampler;
use crate::accel::Ray;
use crate::rt::MaterialData;
use glam::{Vec2, Vec3};

/// Index into the bound medium table; `None` is vacuum.
pub type MediumId = Option<u32>;

/// How the vertex that spawned a ray sampled its direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BsdfType {
    /// Camera rays and delta lobes: emission is taken without MIS.
    Specular,
    Diffuse,
}

/// Shading point the next light sample is taken from.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LightSampleContext {
    pub p: Vec3,
    /// Zero inside media.
    pub n: Vec3,
}

/// Per-pixel accumulator.
#[derive(Clone, Copy, Debug)]
pub struct PixelState {
    pub l: Vec3,
    pub sampler: PcgSampler,
}

impl PixelState {
    pub fn new(seed: u64, pixel: u32) -> Self {
        Self {
            l: Vec3::ZERO,
            sampler: PcgSampler::new(seed, u64::from(pixel)),
        }
    }
}

/// Surface point found by a closest-hit query.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceInteraction {
    pub p: Vec3,
    /// Geometric normal following the triangle winding.
    pub n: Vec3,
    /// Interpolated shading normal.
    pub ns: Vec3,
    pub uv: Vec2,
    pub wo: Vec3,
    /// `None` for interface-only surfaces that only separate media.
    pub material: Option<MaterialData>,
    pub inside: MediumId,
    pub outside: MediumId,
    /// Area light of the hit triangle.
    pub light: Option<u32>,
}

impl SurfaceInteraction {
    /// Whether the surface separates two different media.
    pub fn is_transition(&self) -> bool {
        self.inside != self.outside
    }

    /// Medium on the side `w` points into. Surfaces that are not a medium
    /// boundary leave the ray in `current`.
    pub fn medium_towards(&self, w: Vec3, current: MediumId) -> MediumId {
        if !self.is_transition() {
            current
        } else if w.dot(self.n) > 0.0 {
            self.outside
        } else {
            self.inside
        }
    }

    /// Ray leaving the surface along `dir`, nudged off the triangle.
    pub fn spawn_ray(&self, dir: Vec3) -> Ray {
        Ray::new(offset_origin(self.p, self.n, dir), dir)
    }

    pub fn spawn_ray_to(&self, target: Vec3) -> (Ray, f32) {
        let origin = offset_origin(self.p, self.n, target - self.p);
        let d = target - origin;
        let dist = d.length();
        (Ray::new(origin, d / dist.max(f32::MIN_POSITIVE)), dist)
    }

    pub fn ctx(&self) -> LightSampleContext {
        LightSampleContext {
            p: self.p,
            n: self.n,
        }
    }
}

pub(crate) fn offset_origin(p: Vec3, n: Vec3, dir: Vec3) -> Vec3 {
    let scale = 1e-4 * p.abs().max_element().max(1.0);
    let offset = n * scale;
    if dir.dot(n) < 0.0 {
        p - offset
    } else {
        p + offset
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RayWorkItem {
    pub ray: Ray,
    pub ctx: LightSampleContext,
    pub thp: Vec3,
    pub pu: Vec3,
    pub pl: Vec3,
    pub bsdf_type: BsdfType,
    pub medium: MediumId,
    pub depth: u32,
    pub pixel_id: u32,
    pub rng: PcgSampler,
}

#[derive(Clone, Copy, Debug)]
pub struct MissRayWorkItem {
    pub ray: Ray,
    pub ctx: LightSampleContext,
    pub thp: Vec3,
    pub pu: Vec3,
    pub pl: Vec3,
    pub bsdf_type: BsdfType,
    pub depth: u32,
    pub pixel_id: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct HitLightWorkItem {
    pub light: u32,
    pub ctx: LightSampleContext,
    pub p: Vec3,
    pub wo: Vec3,
    pub n: Vec3,
    pub uv: Vec2,
    pub thp: Vec3,
    pub pu: Vec3,
    pub pl: Vec3,
    pub bsdf_type: BsdfType,
    pub depth: u32,
    pub pixel_id: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct ShadowRayWorkItem {
    pub ray: Ray,
    pub t_max: f32,
    /// Unweighted contribution; divided by `mean(pu + pl)` when visible.
    pub ld: Vec3,
    pub pu: Vec3,
    pub pl: Vec3,
    pub medium: MediumId,
    pub pixel_id: u32,
    pub rng: PcgSampler,
}

#[derive(Clone, Copy, Debug)]
pub struct ScatterRayWorkItem {
    pub thp: Vec3,
    pub pu: Vec3,
    pub intr: SurfaceInteraction,
    /// Medium the incoming ray travelled through.
    pub medium: MediumId,
    pub depth: u32,
    pub pixel_id: u32,
    pub rng: PcgSampler,
}

#[derive(Clone, Copy, Debug)]
pub struct MediumSampleWorkItem {
    pub ray: Ray,
    pub ctx: LightSampleContext,
    pub thp: Vec3,
    pub pu: Vec3,
    pub pl: Vec3,
    /// Distance to `intr`, or infinity when the ray escapes.
    pub t_max: f32,
    /// Surface the ray reaches if the medium lets it through.
    pub intr: Option<SurfaceInteraction>,
    pub bsdf_type: BsdfType,
    pub medium: u32,
    pub depth: u32,
    pub pixel_id: u32,
    pub rng: PcgSampler,
}

#[derive(Clone, Copy, Debug)]
pub struct MediumScatterWorkItem {
    pub p: Vec3,
    pub thp: Vec3,
    pub pu: Vec3,
    pub wo: Vec3,
    pub medium: u32,
    /// HG asymmetry of the medium's phase function.
    pub g: f32,
    pub depth: u32,
    pub pixel_id: u32,
    pub rng: PcgSampler,
}
