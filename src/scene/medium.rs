// src/scene/medium.rs
// Host-side participating media: homogeneous or a density grid

use glam::{Mat4, Vec3};
use half::f16;

/// Voxel payload of a heterogeneous medium, x fastest.
#[derive(Clone, Debug, PartialEq)]
pub enum GridValues {
    Scalar(Vec<f32>),
    Rgb(Vec<[f32; 3]>),
    /// Half-precision densities. Kept on the host only.
    Half(Vec<f16>),
}

impl GridValues {
    pub fn len(&self) -> usize {
        match self {
            GridValues::Scalar(v) => v.len(),
            GridValues::Rgb(v) => v.len(),
            GridValues::Half(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value_type(&self) -> &'static str {
        match self {
            GridValues::Scalar(_) => "float",
            GridValues::Rgb(_) => "rgb",
            GridValues::Half(_) => "half",
        }
    }

    /// Largest per-voxel density, the grid's contribution to the majorant.
    pub fn max_density(&self) -> f32 {
        let max = match self {
            GridValues::Scalar(v) => v.iter().copied().fold(0.0, f32::max),
            GridValues::Rgb(v) => v
                .iter()
                .flat_map(|rgb| rgb.iter().copied())
                .fold(0.0, f32::max),
            GridValues::Half(v) => v.iter().map(|h| h.to_f32()).fold(0.0, f32::max),
        };
        max.max(0.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MediumDesc {
    Homogeneous {
        sigma_a: Vec3,
        sigma_s: Vec3,
    },
    /// Densities scale `sigma_a`/`sigma_s` inside `[bounds_min, bounds_max]` in medium space.
    Grid {
        resolution: [u32; 3],
        values: GridValues,
        sigma_a: Vec3,
        sigma_s: Vec3,
        bounds_min: Vec3,
        bounds_max: Vec3,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Medium {
    pub desc: MediumDesc,
    /// Henyey-Greenstein asymmetry.
    pub g: f32,
    /// Medium space to world space.
    pub transform: Mat4,
}

impl Medium {
    pub fn homogeneous(sigma_a: Vec3, sigma_s: Vec3, g: f32) -> Self {
        Self {
            desc: MediumDesc::Homogeneous { sigma_a, sigma_s },
            g,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn grid(
        resolution: [u32; 3],
        values: GridValues,
        sigma_a: Vec3,
        sigma_s: Vec3,
        bounds: (Vec3, Vec3),
        g: f32,
    ) -> Self {
        Self {
            desc: MediumDesc::Grid {
                resolution,
                values,
                sigma_a,
                sigma_s,
                bounds_min: bounds.0,
                bounds_max: bounds.1,
            },
            g,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn kind_name(&self) -> String {
        match &self.desc {
            MediumDesc::Homogeneous { .. } => "homogeneous".to_string(),
            MediumDesc::Grid { values, .. } => format!("grid<{}>", values.value_type()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_density_covers_every_value_type() {
        assert_eq!(GridValues::Scalar(vec![0.5, 2.0]).max_density(), 2.0);
        assert_eq!(GridValues::Rgb(vec![[0.1, 3.0, 0.2]]).max_density(), 3.0);
        let half = GridValues::Half(vec![f16::from_f32(1.5)]);
        assert_eq!(half.max_density(), 1.5);
        assert_eq!(half.value_type(), "half");
    }
}
