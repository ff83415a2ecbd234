// src/path_tracing/sampler.rs
// PCG32 random stream plus the direction sampling routines the stages share

use glam::{Vec2, Vec3};
use std::f32::consts::PI;

const PCG_MULT: u64 = 0x5851_f42d_4c95_7f2d;

/// PCG32 (XSH-RR) stream. Small enough to ride along in every work item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcgSampler {
    state: u64,
    inc: u64,
}

impl PcgSampler {
    pub fn new(seed: u64, stream: u64) -> Self {
        let mut rng = Self {
            state: 0,
            inc: (stream << 1) | 1,
        };
        rng.next_u32();
        rng.state = rng.state.wrapping_add(seed);
        rng.next_u32();
        rng
    }

    pub fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.state = old.wrapping_mul(PCG_MULT).wrapping_add(self.inc);
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        let rot = (old >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    pub fn next_u64(&mut self) -> u64 {
        (u64::from(self.next_u32()) << 32) | u64::from(self.next_u32())
    }

    /// Uniform in `[0, 1)`.
    pub fn get_1d(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 * (1.0 / (1u32 << 24) as f32)
    }

    pub fn get_2d(&mut self) -> Vec2 {
        Vec2::new(self.get_1d(), self.get_1d())
    }

    /// Independent stream derived from this one.
    pub fn split(&mut self, stream: u64) -> PcgSampler {
        PcgSampler::new(self.next_u64(), stream)
    }
}

/// Orthonormal basis around `n` (Duff et al.).
pub fn frame_from_z(n: Vec3) -> (Vec3, Vec3) {
    let sign = 1.0f32.copysign(n.z);
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    (
        Vec3::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x),
        Vec3::new(b, sign + n.y * n.y * a, -n.y),
    )
}

pub fn to_world(n: Vec3, local: Vec3) -> Vec3 {
    let (t, b) = frame_from_z(n);
    t * local.x + b * local.y + n * local.z
}

/// Cosine-weighted direction about `n`; pdf is `cos / pi`.
pub fn cosine_hemisphere(n: Vec3, u: Vec2) -> Vec3 {
    let r = u.x.sqrt();
    let phi = 2.0 * PI * u.y;
    let local = Vec3::new(r * phi.cos(), r * phi.sin(), (1.0 - u.x).max(0.0).sqrt());
    to_world(n, local).normalize_or_zero()
}

pub fn uniform_sphere(u: Vec2) -> Vec3 {
    let z = 1.0 - 2.0 * u.x;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = 2.0 * PI * u.y;
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

pub const UNIFORM_SPHERE_PDF: f32 = 1.0 / (4.0 * PI);

/// Uniform point on a triangle as barycentrics of the second and third vertex.
pub fn uniform_triangle(u: Vec2) -> (f32, f32) {
    let su = u.x.sqrt();
    (u.y * su, 1.0 - su)
}

/// Henyey-Greenstein phase value for `cos_theta = dot(wo, wi)`.
pub fn henyey_greenstein(cos_theta: f32, g: f32) -> f32 {
    let denom = 1.0 + g * g + 2.0 * g * cos_theta;
    (1.0 - g * g) / (4.0 * PI * denom * denom.max(1e-12).sqrt())
}

/// Sample `wi` from the HG lobe around `wo`. Returns the direction and its pdf.
pub fn sample_henyey_greenstein(wo: Vec3, g: f32, u: Vec2) -> (Vec3, f32) {
    let cos_theta = if g.abs() < 1e-3 {
        1.0 - 2.0 * u.x
    } else {
        let sqr = (1.0 - g * g) / (1.0 + g - 2.0 * g * u.x);
        -(1.0 + g * g - sqr * sqr) / (2.0 * g)
    }
    .clamp(-1.0, 1.0);
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi = 2.0 * PI * u.y;
    let local = Vec3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta);
    let wi = to_world(wo, local).normalize_or_zero();
    (wi, henyey_greenstein(cos_theta, g))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_are_deterministic_and_distinct() {
        let mut a = PcgSampler::new(7, 1);
        let mut b = PcgSampler::new(7, 1);
        let mut c = PcgSampler::new(7, 2);
        let xs: Vec<u32> = (0..8).map(|_| a.next_u32()).collect();
        let ys: Vec<u32> = (0..8).map(|_| b.next_u32()).collect();
        let zs: Vec<u32> = (0..8).map(|_| c.next_u32()).collect();
        assert_eq!(xs, ys);
        assert_ne!(xs, zs);
    }

    #[test]
    fn floats_stay_in_unit_interval() {
        let mut rng = PcgSampler::new(3, 0);
        let mut sum = 0.0;
        for _ in 0..10_000 {
            let u = rng.get_1d();
            assert!((0.0..1.0).contains(&u));
            sum += u;
        }
        assert!((sum / 10_000.0 - 0.5).abs() < 0.02);
    }

    #[test]
    fn frame_is_orthonormal() {
        for n in [Vec3::Z, Vec3::NEG_Z, Vec3::new(0.3, -0.5, 0.8).normalize()] {
            let (t, b) = frame_from_z(n);
            assert!(t.dot(b).abs() < 1e-5);
            assert!(t.dot(n).abs() < 1e-5);
            assert!((t.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn hemisphere_samples_face_the_normal() {
        let mut rng = PcgSampler::new(11, 0);
        let n = Vec3::new(0.0, 1.0, 0.0);
        for _ in 0..1000 {
            assert!(cosine_hemisphere(n, rng.get_2d()).dot(n) >= -1e-5);
        }
    }

    #[test]
    fn isotropic_hg_matches_uniform_sphere() {
        assert!((henyey_greenstein(0.3, 0.0) - UNIFORM_SPHERE_PDF).abs() < 1e-6);
        let (wi, pdf) = sample_henyey_greenstein(Vec3::X, 0.7, Vec2::new(0.4, 0.2));
        assert!((wi.length() - 1.0).abs() < 1e-4);
        assert!((pdf - henyey_greenstein(wi.dot(Vec3::X), 0.7)).abs() < 1e-3);
    }
}
