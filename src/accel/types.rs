// src/accel/types.rs
// Core types for ray queries - AABB, rays, triangle hits and the ray/triangle test.
// This file exists to share GPU-compatible bounds and intersection helpers between both accel layouts.
// RELEVANT FILES:src/accel/cpu_bvh.rs,src/accel/single_level.rs,src/accel/multi_level.rs

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Axis-aligned bounding box - GPU compatible layout
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Aabb {
    pub min: [f32; 3],
    pub _pad0: f32,
    pub max: [f32; 3],
    pub _pad1: f32,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    /// Create empty AABB (inverted bounds for union operations)
    pub fn empty() -> Self {
        Self::new([f32::INFINITY; 3], [f32::NEG_INFINITY; 3])
    }

    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self {
            min,
            _pad0: 0.0,
            max,
            _pad1: 0.0,
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.expand_point(*p);
        }
        aabb
    }

    pub fn expand_point(&mut self, point: Vec3) {
        self.min = Vec3::from(self.min).min(point).to_array();
        self.max = Vec3::from(self.max).max(point).to_array();
    }

    pub fn expand_aabb(&mut self, other: &Aabb) {
        self.min = Vec3::from(self.min).min(Vec3::from(other.min)).to_array();
        self.max = Vec3::from(self.max).max(Vec3::from(other.max)).to_array();
    }

    pub fn center(&self) -> Vec3 {
        (Vec3::from(self.min) + Vec3::from(self.max)) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        Vec3::from(self.max) - Vec3::from(self.min)
    }

    /// Check if AABB is valid (min <= max)
    pub fn is_valid(&self) -> bool {
        Vec3::from(self.min).cmple(Vec3::from(self.max)).all()
    }

    pub fn is_finite(&self) -> bool {
        Vec3::from(self.min).is_finite() && Vec3::from(self.max).is_finite()
    }

    /// Bounds of the eight transformed corners.
    pub fn transformed(&self, transform: &Mat4) -> Aabb {
        if !self.is_valid() {
            return *self;
        }
        let (lo, hi) = (Vec3::from(self.min), Vec3::from(self.max));
        let mut out = Aabb::empty();
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { lo.x } else { hi.x },
                if i & 2 == 0 { lo.y } else { hi.y },
                if i & 4 == 0 { lo.z } else { hi.z },
            );
            out.expand_point(transform.transform_point3(corner));
        }
        out
    }

    /// Slab test. Returns the entry distance when the box is hit within `[0, t_max]`.
    pub fn hit(&self, origin: Vec3, inv_dir: Vec3, t_max: f32) -> Option<f32> {
        let t0 = (Vec3::from(self.min) - origin) * inv_dir;
        let t1 = (Vec3::from(self.max) - origin) * inv_dir;
        let near = t0.min(t1).max_element().max(0.0);
        let far = t0.max(t1).min_element().min(t_max);
        (near <= far).then_some(near)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub dir: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, dir: Vec3) -> Self {
        Self { origin, dir }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.dir * t
    }

    pub fn transformed(&self, transform: &Mat4) -> Ray {
        Ray {
            origin: transform.transform_point3(self.origin),
            dir: transform.transform_vector3(self.dir),
        }
    }

    pub(crate) fn inv_dir(&self) -> Vec3 {
        Vec3::ONE / self.dir
    }
}

/// Closest-hit result of a scene query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    pub t: f32,
    /// Barycentrics of the second and third vertex.
    pub b1: f32,
    pub b2: f32,
    pub instance: u32,
    pub prim: u32,
}

/// Moller-Trumbore. Returns `(t, b1, b2)` for hits in `(t_min, t_max)`.
pub fn intersect_triangle(ray: &Ray, tri: &[Vec3; 3], t_max: f32) -> Option<(f32, f32, f32)> {
    const EPS: f32 = 1e-9;
    let e1 = tri[1] - tri[0];
    let e2 = tri[2] - tri[0];
    let p = ray.dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < EPS {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray.origin - tri[0];
    let b1 = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&b1) {
        return None;
    }
    let q = s.cross(e1);
    let b2 = ray.dir.dot(q) * inv_det;
    if b2 < 0.0 || b1 + b2 > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    (t > 0.0 && t < t_max).then_some((t, b1, b2))
}

pub fn triangle_aabb(tri: &[Vec3; 3]) -> Aabb {
    Aabb::from_points(tri.iter())
}
