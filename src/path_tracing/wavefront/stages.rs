// src/path_tracing/wavefront/stages.rs
// Stage kernels of the wavefront loop: raygen, intersect, media, miss, hit-light, scatter, shadow
// Each kernel drains one queue in parallel and pushes into its successors
// RELEVANT FILES:src/path_tracing/wavefront/mod.rs,src/path_tracing/wavefront/queues.rs,src/path_tracing/bound.rs

use super::queues::WorkQueue;
use super::stats::{bump, FrameCounters};
use crate::accel::Ray;
use crate::config::PathTracerParams;
use crate::error::RenderResult;
use crate::path_tracing::bound::{BoundLight, BoundScene};
use crate::path_tracing::sampler::{
    cosine_hemisphere, henyey_greenstein, sample_henyey_greenstein, PcgSampler, UNIFORM_SPHERE_PDF,
};
use crate::path_tracing::workitem::{
    BsdfType, HitLightWorkItem, LightSampleContext, MediumId, MediumSampleWorkItem,
    MediumScatterWorkItem, MissRayWorkItem, PixelState, RayWorkItem, ScatterRayWorkItem,
    ShadowRayWorkItem, SurfaceInteraction,
};
use crate::scene::Camera;
use glam::{Vec2, Vec3};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::f32::consts::FRAC_1_PI;

/// Interfaces a shadow ray may cross before it is treated as blocked.
const MAX_SHADOW_SEGMENTS: usize = 64;
/// Pull shadow rays this fraction short of the sampled light point.
const SHADOW_EPSILON: f32 = 1e-3;

/// Queues fed by a closest-hit query.
pub(crate) struct SurfaceQueues<'q> {
    pub miss: &'q WorkQueue<MissRayWorkItem>,
    pub hit_light: &'q WorkQueue<HitLightWorkItem>,
    pub scatter: &'q WorkQueue<ScatterRayWorkItem>,
    pub next_ray: &'q WorkQueue<RayWorkItem>,
}

/// Queues fed by a scattering vertex.
pub(crate) struct ScatterQueues<'q> {
    pub shadow: &'q WorkQueue<ShadowRayWorkItem>,
    pub next_ray: &'q WorkQueue<RayWorkItem>,
}

pub(crate) struct Stages<'s, 'a> {
    pub scene: &'s BoundScene<'a>,
    pub params: &'s PathTracerParams,
    pub pixels: &'s [Mutex<PixelState>],
    pub counters: &'s FrameCounters,
}

fn mean(v: Vec3) -> f32 {
    (v.x + v.y + v.z) / 3.0
}

fn weighted(v: Vec3, denom: f32) -> Vec3 {
    if denom > 0.0 && denom.is_finite() {
        v / denom
    } else {
        Vec3::ZERO
    }
}

fn face_forward(n: Vec3, w: Vec3) -> Vec3 {
    if n.dot(w) < 0.0 {
        -n
    } else {
        n
    }
}

impl Stages<'_, '_> {
    fn add_radiance(&self, pixel_id: u32, l: Vec3) {
        if !l.is_finite() || l == Vec3::ZERO {
            return;
        }
        if let Some(pixel) = self.pixels.get(pixel_id as usize) {
            pixel.lock().l += l;
        }
    }

    fn push_ray(
        &self,
        queue: &WorkQueue<RayWorkItem>,
        item: RayWorkItem,
        continuation: bool,
    ) -> RenderResult<()> {
        queue.push(item)?;
        bump(&self.counters.ray_queue_entries);
        if continuation {
            bump(&self.counters.re_entries);
        }
        Ok(())
    }

    /// Emission reached by a path, weighted against light sampling when NEE could have found it.
    fn emitted(&self, thp: Vec3, pu: Vec3, pl: Vec3, bsdf_type: BsdfType, le: Vec3, light_pdf: f32) -> Vec3 {
        if !self.params.nee || bsdf_type == BsdfType::Specular {
            weighted(thp * le, mean(pu))
        } else {
            weighted(thp * le, mean(pu + pl * light_pdf))
        }
    }

    /// One jittered camera ray per pixel.
    pub fn generate_camera_rays(
        &self,
        camera: &Camera,
        width: u32,
        height: u32,
        rays: &WorkQueue<RayWorkItem>,
    ) -> RenderResult<()> {
        let aspect = width as f32 / height.max(1) as f32;
        let medium = self.scene.camera_medium();
        (0..width * height).into_par_iter().try_for_each(|pixel_id| {
            let Some(pixel) = self.pixels.get(pixel_id as usize) else {
                return Ok(());
            };
            let (jitter, rng) = {
                let mut state = pixel.lock();
                let jitter = state.sampler.get_2d();
                (jitter, state.sampler.split(u64::from(pixel_id)))
            };
            let uv = Vec2::new(
                ((pixel_id % width) as f32 + jitter.x) / width as f32,
                ((pixel_id / width) as f32 + jitter.y) / height as f32,
            );
            let ray = Ray::new(camera.position, camera.ray_direction(uv, aspect));
            bump(&self.counters.camera_rays);
            self.push_ray(
                rays,
                RayWorkItem {
                    ray,
                    ctx: LightSampleContext {
                        p: camera.position,
                        n: Vec3::ZERO,
                    },
                    thp: Vec3::ONE,
                    pu: Vec3::ONE,
                    pl: Vec3::ONE,
                    bsdf_type: BsdfType::Specular,
                    medium,
                    depth: 0,
                    pixel_id,
                    rng,
                },
                false,
            )
        })
    }

    /// Closest hit for every queued ray. Rays inside a medium go to the medium sampler first.
    pub fn intersect(
        &self,
        rays: &[RayWorkItem],
        out: &SurfaceQueues<'_>,
        medium_sample: &WorkQueue<MediumSampleWorkItem>,
    ) -> RenderResult<()> {
        rays.par_iter().try_for_each(|r| {
            let hit = self.scene.intersect(&r.ray, f32::INFINITY);
            let intr = hit.and_then(|h| self.scene.surface(&r.ray, &h));
            match r.medium {
                Some(medium) => {
                    medium_sample.push(MediumSampleWorkItem {
                        ray: r.ray,
                        ctx: r.ctx,
                        thp: r.thp,
                        pu: r.pu,
                        pl: r.pl,
                        t_max: match (hit, intr) {
                            (Some(h), Some(_)) => h.t,
                            _ => f32::INFINITY,
                        },
                        intr,
                        bsdf_type: r.bsdf_type,
                        medium,
                        depth: r.depth,
                        pixel_id: r.pixel_id,
                        rng: r.rng,
                    })?;
                    bump(&self.counters.medium_samples);
                    Ok(())
                }
                None => self.dispatch_hit(r, intr, out),
            }
        })
    }

    /// Route a ray that reached `intr` (or escaped) to the stage that handles it.
    fn dispatch_hit(
        &self,
        r: &RayWorkItem,
        intr: Option<SurfaceInteraction>,
        out: &SurfaceQueues<'_>,
    ) -> RenderResult<()> {
        let Some(intr) = intr else {
            out.miss.push(MissRayWorkItem {
                ray: r.ray,
                ctx: r.ctx,
                thp: r.thp,
                pu: r.pu,
                pl: r.pl,
                bsdf_type: r.bsdf_type,
                depth: r.depth,
                pixel_id: r.pixel_id,
            })?;
            return Ok(());
        };
        if let Some(light) = intr.light {
            out.hit_light.push(HitLightWorkItem {
                light,
                ctx: r.ctx,
                p: intr.p,
                wo: intr.wo,
                n: intr.n,
                uv: intr.uv,
                thp: r.thp,
                pu: r.pu,
                pl: r.pl,
                bsdf_type: r.bsdf_type,
                depth: r.depth,
                pixel_id: r.pixel_id,
            })?;
        } else if intr.material.is_some() {
            out.scatter.push(ScatterRayWorkItem {
                thp: r.thp,
                pu: r.pu,
                intr,
                medium: r.medium,
                depth: r.depth,
                pixel_id: r.pixel_id,
                rng: r.rng,
            })?;
        } else {
            // Interface only: cross into the medium on the far side.
            let dir = r.ray.dir;
            let next = RayWorkItem {
                ray: intr.spawn_ray(dir),
                medium: intr.medium_towards(dir, r.medium),
                ..*r
            };
            self.push_ray(out.next_ray, next, true)?;
        }
        Ok(())
    }

    /// Delta tracking through the current medium up to the next surface.
    pub fn sample_media(
        &self,
        items: &[MediumSampleWorkItem],
        out: &SurfaceQueues<'_>,
        medium_scatter: &WorkQueue<MediumScatterWorkItem>,
    ) -> RenderResult<()> {
        items.par_iter().try_for_each(|item| {
            let mut rng = item.rng;
            let mut thp = item.thp;
            let mut scattered_at = None;
            let medium = self.scene.medium(item.medium);

            if let Some(medium) = medium {
                let m = medium.majorant();
                if let Some((t0, t1)) = medium.clip(&item.ray, item.t_max).filter(|_| m > 0.0) {
                    let mut t = t0;
                    loop {
                        t -= (1.0 - rng.get_1d()).ln() / m;
                        if t >= t1 {
                            break;
                        }
                        let p = item.ray.at(t);
                        let (sigma_a, sigma_s) = medium.coefficients(p);
                        let sigma_n = (Vec3::splat(m) - sigma_a - sigma_s).max(Vec3::ZERO);
                        let p_absorb = mean(sigma_a) / m;
                        let p_scatter = mean(sigma_s) / m;
                        let u = rng.get_1d();
                        if u < p_absorb {
                            bump(&self.counters.absorbed);
                            return Ok(());
                        }
                        if u < p_absorb + p_scatter {
                            thp *= weighted(sigma_s, mean(sigma_s));
                            scattered_at = Some(p);
                            break;
                        }
                        let n = mean(sigma_n);
                        if n > 0.0 {
                            thp *= sigma_n / n;
                        }
                    }
                }
            }

            if let Some(p) = scattered_at {
                medium_scatter.push(MediumScatterWorkItem {
                    p,
                    thp,
                    pu: item.pu,
                    wo: -item.ray.dir,
                    medium: item.medium,
                    g: medium.map_or(0.0, |m| m.g()),
                    depth: item.depth,
                    pixel_id: item.pixel_id,
                    rng,
                })?;
                return Ok(());
            }

            let passed = RayWorkItem {
                ray: item.ray,
                ctx: item.ctx,
                thp,
                pu: item.pu,
                pl: item.pl,
                bsdf_type: item.bsdf_type,
                medium: Some(item.medium),
                depth: item.depth,
                pixel_id: item.pixel_id,
                rng,
            };
            self.dispatch_hit(&passed, item.intr, out)
        })
    }

    /// Escaped rays pick up every infinite light.
    pub fn handle_miss(&self, items: &[MissRayWorkItem]) {
        let light_pdf = self.scene.light_pmf() * UNIFORM_SPHERE_PDF;
        items.par_iter().for_each(|item| {
            let l = self
                .scene
                .infinite_lights()
                .filter_map(|light| match light {
                    BoundLight::Infinite(inf) => Some(Vec3::from(inf.radiance) * inf.scale),
                    _ => None,
                })
                .map(|le| self.emitted(item.thp, item.pu, item.pl, item.bsdf_type, le, light_pdf))
                .sum::<Vec3>();
            self.add_radiance(item.pixel_id, l);
            bump(&self.counters.miss);
        });
    }

    /// Emission from a directly hit area light.
    pub fn handle_hit_light(&self, items: &[HitLightWorkItem]) {
        items.par_iter().for_each(|item| {
            if let Some(light) = self.scene.light(item.light) {
                let le = light.area_le(item.n, item.wo);
                let light_pdf =
                    self.scene.light_pmf() * self.scene.area_light_pdf(item.light, item.ctx.p, item.p);
                let l = self.emitted(item.thp, item.pu, item.pl, item.bsdf_type, le, light_pdf);
                self.add_radiance(item.pixel_id, l);
            }
            bump(&self.counters.hit_light);
        });
    }

    /// Sample one light from `p` and queue the shadow ray carrying its unweighted contribution.
    ///
    /// `eval` returns the scattering function value (cosine included) and its
    /// direction-sampling density for a light direction.
    #[allow(clippy::too_many_arguments)]
    fn sample_direct(
        &self,
        shadow: &WorkQueue<ShadowRayWorkItem>,
        rng: &mut PcgSampler,
        p: Vec3,
        surface: Option<&SurfaceInteraction>,
        medium: MediumId,
        thp: Vec3,
        pu: Vec3,
        pixel_id: u32,
        eval: impl Fn(Vec3) -> (Vec3, f32),
    ) -> RenderResult<()> {
        let pick = rng.get_1d();
        let u = rng.get_2d();
        let Some((index, pmf)) = self.scene.pick_light(pick) else {
            return Ok(());
        };
        let Some(ls) = self.scene.sample_light(index, p, u) else {
            return Ok(());
        };
        if ls.pdf <= 0.0 || ls.le.max_element() <= 0.0 {
            return Ok(());
        }
        let (f, scatter_pdf) = eval(ls.wi);
        if f.max_element() <= 0.0 {
            return Ok(());
        }

        let far = if ls.delta {
            self.scene.scene_diameter()
        } else {
            f32::INFINITY
        };
        let (ray, t_max, medium) = match (surface, ls.p) {
            (Some(intr), Some(q)) => {
                let (ray, dist) = intr.spawn_ray_to(q);
                (ray, dist * (1.0 - SHADOW_EPSILON), intr.medium_towards(ls.wi, medium))
            }
            (Some(intr), None) => (intr.spawn_ray(ls.wi), far, intr.medium_towards(ls.wi, medium)),
            (None, Some(q)) => (
                Ray::new(p, ls.wi),
                (q - p).length() * (1.0 - SHADOW_EPSILON),
                medium,
            ),
            (None, None) => (Ray::new(p, ls.wi), far, medium),
        };

        let light_pdf = pmf * ls.pdf;
        shadow.push(ShadowRayWorkItem {
            ray,
            t_max,
            ld: thp * f * ls.le,
            pu: if ls.delta {
                Vec3::ZERO
            } else {
                pu * scatter_pdf
            },
            pl: pu * light_pdf,
            medium,
            pixel_id,
            rng: rng.split(u64::from(pixel_id)),
        })?;
        bump(&self.counters.shadow_spawned);
        Ok(())
    }

    /// Depth limit then Russian roulette. Returns the surviving throughput.
    fn continue_path(&self, depth: u32, thp: Vec3, rng: &mut PcgSampler) -> Option<Vec3> {
        if depth + 1 >= self.params.max_depth {
            bump(&self.counters.depth_terminated);
            return None;
        }
        if depth >= self.params.rr_start_depth {
            let rr = self.params.rr;
            if rng.get_1d() >= rr {
                bump(&self.counters.rr_terminated);
                return None;
            }
            return Some(thp / rr);
        }
        Some(thp)
    }

    /// Phase-function NEE and continuation at real scattering events inside media.
    pub fn scatter_media(
        &self,
        items: &[MediumScatterWorkItem],
        out: &ScatterQueues<'_>,
    ) -> RenderResult<()> {
        items.par_iter().try_for_each(|item| {
            bump(&self.counters.medium_scatters);
            let mut rng = item.rng;
            let (wo, g) = (item.wo, item.g);
            if self.params.nee {
                self.sample_direct(
                    out.shadow,
                    &mut rng,
                    item.p,
                    None,
                    Some(item.medium),
                    item.thp,
                    item.pu,
                    item.pixel_id,
                    |wi| {
                        let phase = henyey_greenstein(wo.dot(wi), g);
                        (Vec3::splat(phase), phase)
                    },
                )?;
            }

            let Some(thp) = self.continue_path(item.depth, item.thp, &mut rng) else {
                return Ok(());
            };
            let (wi, pdf) = sample_henyey_greenstein(wo, g, rng.get_2d());
            if pdf <= 0.0 || wi == Vec3::ZERO || thp.max_element() <= 0.0 {
                bump(&self.counters.zero_throughput);
                return Ok(());
            }
            let next = RayWorkItem {
                ray: Ray::new(item.p, wi),
                ctx: LightSampleContext {
                    p: item.p,
                    n: Vec3::ZERO,
                },
                thp,
                pu: item.pu,
                pl: item.pu / pdf,
                bsdf_type: BsdfType::Diffuse,
                medium: Some(item.medium),
                depth: item.depth + 1,
                pixel_id: item.pixel_id,
                rng,
            };
            self.push_ray(out.next_ray, next, true)
        })
    }

    /// Lambertian NEE and cosine-sampled continuation at material surfaces.
    pub fn scatter_surfaces(
        &self,
        items: &[ScatterRayWorkItem],
        out: &ScatterQueues<'_>,
    ) -> RenderResult<()> {
        items.par_iter().try_for_each(|item| {
            bump(&self.counters.surface_scatters);
            let intr = item.intr;
            let mut rng = item.rng;
            let albedo = intr
                .material
                .map_or(Vec3::ZERO, |m| Vec3::from(m.base_color));
            let ns = face_forward(intr.ns, intr.wo);
            let wo_side = intr.wo.dot(intr.n);
            let reflects = move |wi: Vec3| wi.dot(intr.n) * wo_side > 0.0;

            if self.params.nee {
                self.sample_direct(
                    out.shadow,
                    &mut rng,
                    intr.p,
                    Some(&intr),
                    item.medium,
                    item.thp,
                    item.pu,
                    item.pixel_id,
                    |wi| {
                        let cos = ns.dot(wi);
                        if cos <= 0.0 || !reflects(wi) {
                            return (Vec3::ZERO, 0.0);
                        }
                        (albedo * FRAC_1_PI * cos, cos * FRAC_1_PI)
                    },
                )?;
            }

            let Some(thp) = self.continue_path(item.depth, item.thp, &mut rng) else {
                return Ok(());
            };
            let wi = cosine_hemisphere(ns, rng.get_2d());
            let pdf = ns.dot(wi) * FRAC_1_PI;
            let thp = thp * albedo;
            if pdf <= 0.0 || !reflects(wi) || thp.max_element() <= 0.0 {
                bump(&self.counters.zero_throughput);
                return Ok(());
            }
            let next = RayWorkItem {
                ray: intr.spawn_ray(wi),
                ctx: intr.ctx(),
                thp,
                pu: item.pu,
                pl: item.pu / pdf,
                bsdf_type: BsdfType::Diffuse,
                medium: intr.medium_towards(wi, item.medium),
                depth: item.depth + 1,
                pixel_id: item.pixel_id,
                rng,
            };
            self.push_ray(out.next_ray, next, true)
        })
    }

    /// Visibility and transmittance of every shadow ray; visible ones add their MIS-weighted radiance.
    pub fn trace_shadows(&self, items: &[ShadowRayWorkItem]) {
        items.par_iter().for_each(|item| {
            match self.shadow_transmittance(item) {
                Some(tr) => {
                    let l = weighted(item.ld * tr, mean(item.pu + item.pl));
                    self.add_radiance(item.pixel_id, l);
                    bump(&self.counters.shadow_contributed);
                }
                None => bump(&self.counters.shadow_occluded),
            }
        });
    }

    /// `None` when a surface blocks the ray.
    fn shadow_transmittance(&self, item: &ShadowRayWorkItem) -> Option<Vec3> {
        if item.medium.is_none() && self.scene.is_opaque() {
            return (!self.scene.occluded(&item.ray, item.t_max)).then_some(Vec3::ONE);
        }

        let mut rng = item.rng;
        let mut ray = item.ray;
        let mut remaining = item.t_max;
        let mut medium = item.medium;
        let mut tr = Vec3::ONE;
        for _ in 0..MAX_SHADOW_SEGMENTS {
            let hit = self.scene.intersect(&ray, remaining);
            let segment = hit.map_or(remaining, |h| h.t);
            if let Some(m) = medium.and_then(|id| self.scene.medium(id)) {
                tr *= m.transmittance(&ray, segment, || rng.get_1d());
            }
            let Some(hit) = hit else {
                return Some(tr);
            };
            let intr = self.scene.surface(&ray, &hit)?;
            if intr.material.is_some() || intr.light.is_some() {
                return None;
            }
            medium = intr.medium_towards(ray.dir, medium);
            let next = intr.spawn_ray(ray.dir);
            remaining -= (next.origin - ray.origin).dot(ray.dir);
            if remaining <= 0.0 {
                return Some(tr);
            }
            ray = next;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mis_weights_fall_back_to_zero_on_bad_denominators() {
        assert_eq!(weighted(Vec3::ONE, 0.0), Vec3::ZERO);
        assert_eq!(weighted(Vec3::ONE, f32::INFINITY), Vec3::ZERO);
        assert_eq!(weighted(Vec3::splat(2.0), 2.0), Vec3::ONE);
        assert!((mean(Vec3::new(1.0, 2.0, 3.0)) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn shading_normal_faces_the_viewer() {
        assert_eq!(face_forward(Vec3::Z, Vec3::NEG_Z), Vec3::NEG_Z);
        assert_eq!(face_forward(Vec3::Z, Vec3::Z), Vec3::Z);
    }
}
