// src/scene/camera.rs
// Pinhole camera producing primary rays for the wavefront generator

use glam::{Vec2, Vec3};

#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_deg: f32,
    /// Scene medium index the camera sits in, if any.
    pub medium: Option<usize>,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y_deg: 45.0,
            medium: None,
        }
    }
}

impl Camera {
    pub fn look_at(position: Vec3, target: Vec3, fov_y_deg: f32) -> Self {
        Self {
            position,
            target,
            fov_y_deg,
            ..Self::default()
        }
    }

    /// Normalized world direction through film position `uv` in `[0,1]^2` (v down).
    pub fn ray_direction(&self, uv: Vec2, aspect: f32) -> Vec3 {
        let forward = (self.target - self.position).normalize_or_zero();
        let right = forward.cross(self.up).normalize_or_zero();
        let up = right.cross(forward);
        let half_h = (self.fov_y_deg.to_radians() * 0.5).tan();
        let half_w = half_h * aspect;
        let x = (2.0 * uv.x - 1.0) * half_w;
        let y = (1.0 - 2.0 * uv.y) * half_h;
        (forward + right * x + up * y).normalize_or_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_ray_looks_at_target() {
        let camera = Camera::look_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, 60.0);
        let dir = camera.ray_direction(Vec2::splat(0.5), 1.0);
        assert!((dir - Vec3::NEG_Z).length() < 1e-6);
        let top = camera.ray_direction(Vec2::new(0.5, 0.0), 1.0);
        assert!(top.y > 0.0);
    }
}
