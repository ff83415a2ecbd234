// src/scene/material.rs
// Host-side material description

use glam::Vec3;

/// Diffuse-dominant material with optional emission.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub base_color: Vec3,
    pub emission: Vec3,
    pub roughness: f32,
    pub metallic: f32,
    pub ior: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Vec3::splat(0.8),
            emission: Vec3::ZERO,
            roughness: 1.0,
            metallic: 0.0,
            ior: 1.5,
        }
    }
}

impl Material {
    pub fn diffuse(base_color: Vec3) -> Self {
        Self {
            base_color,
            ..Self::default()
        }
    }

    pub fn emissive(radiance: Vec3) -> Self {
        Self {
            base_color: Vec3::ZERO,
            emission: radiance,
            ..Self::default()
        }
    }

    pub fn is_emissive(&self) -> bool {
        self.emission.max_element() > 0.0
    }
}
