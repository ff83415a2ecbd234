// src/scene/light.rs
// Host-side explicit lights: a transform plus one of a closed set of kinds

use glam::{Mat4, Vec3};

/// Local-space description. Directional and spot lights emit along local +Z.
#[derive(Clone, Debug, PartialEq)]
pub enum LightDesc {
    Point {
        intensity: Vec3,
    },
    Directional {
        radiance: Vec3,
    },
    Spot {
        intensity: Vec3,
        cos_falloff_start: f32,
        cos_falloff_end: f32,
    },
    /// Uniform environment radiance.
    Infinite {
        radiance: Vec3,
        scale: f32,
    },
    /// Rectangular area emitter in the local XY plane. Has no device representation.
    Rect {
        radiance: Vec3,
        width: f32,
        height: f32,
    },
}

impl LightDesc {
    pub fn kind_name(&self) -> &'static str {
        match self {
            LightDesc::Point { .. } => "point",
            LightDesc::Directional { .. } => "directional",
            LightDesc::Spot { .. } => "spot",
            LightDesc::Infinite { .. } => "infinite",
            LightDesc::Rect { .. } => "rect",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Light {
    pub transform: Mat4,
    pub desc: LightDesc,
}

/// Frame whose +Z axis points along `direction`, translated to `origin`.
fn frame_along(origin: Vec3, direction: Vec3) -> Mat4 {
    let z = direction.normalize_or_zero();
    let z = if z == Vec3::ZERO { Vec3::Z } else { z };
    let (x, y) = z.any_orthonormal_pair();
    Mat4::from_cols(x.extend(0.0), y.extend(0.0), z.extend(0.0), origin.extend(1.0))
}

impl Light {
    pub fn point(position: Vec3, intensity: Vec3) -> Self {
        Self {
            transform: Mat4::from_translation(position),
            desc: LightDesc::Point { intensity },
        }
    }

    /// `direction` is the direction the light travels.
    pub fn directional(direction: Vec3, radiance: Vec3) -> Self {
        Self {
            transform: frame_along(Vec3::ZERO, direction),
            desc: LightDesc::Directional { radiance },
        }
    }

    pub fn spot(
        position: Vec3,
        target: Vec3,
        intensity: Vec3,
        falloff_start_deg: f32,
        total_width_deg: f32,
    ) -> Self {
        Self {
            transform: frame_along(position, target - position),
            desc: LightDesc::Spot {
                intensity,
                cos_falloff_start: falloff_start_deg.to_radians().cos(),
                cos_falloff_end: total_width_deg.to_radians().cos(),
            },
        }
    }

    pub fn infinite(radiance: Vec3) -> Self {
        Self {
            transform: Mat4::IDENTITY,
            desc: LightDesc::Infinite {
                radiance,
                scale: 1.0,
            },
        }
    }

    pub fn rect(center: Vec3, normal: Vec3, radiance: Vec3, width: f32, height: f32) -> Self {
        Self {
            transform: frame_along(center, normal),
            desc: LightDesc::Rect {
                radiance,
                width,
                height,
            },
        }
    }

    pub fn position(&self) -> Vec3 {
        self.transform.transform_point3(Vec3::ZERO)
    }

    pub fn direction(&self) -> Vec3 {
        self.transform.transform_vector3(Vec3::Z).normalize_or_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spot_frame_points_at_target() {
        let light = Light::spot(Vec3::new(0.0, 4.0, 0.0), Vec3::ZERO, Vec3::ONE, 20.0, 30.0);
        assert!((light.direction() - Vec3::NEG_Y).length() < 1e-5);
        assert!((light.position() - Vec3::new(0.0, 4.0, 0.0)).length() < 1e-5);
        if let LightDesc::Spot {
            cos_falloff_start,
            cos_falloff_end,
            ..
        } = light.desc
        {
            assert!(cos_falloff_start > cos_falloff_end);
        } else {
            panic!("expected spot light");
        }
    }

    #[test]
    fn degenerate_direction_falls_back_to_z() {
        let light = Light::directional(Vec3::ZERO, Vec3::ONE);
        assert_eq!(light.direction(), Vec3::Z);
    }
}
