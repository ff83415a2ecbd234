// src/rt/light.rs
// Light kinds, their device records and the kind -> record construction table

use super::{synced, to3, DeviceObject};
use crate::device::{DevicePtr, DeviceVariant, VariantRecord};
use crate::error::{RenderError, RenderResult};
use crate::scene::{Light, LightDesc};
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::mem::size_of;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightKind {
    Point,
    Directional,
    Spot,
    Infinite,
    DiffuseArea,
}

impl LightKind {
    /// Delta lights cannot be hit by a ray and contribute only through NEE.
    pub fn is_delta(self) -> bool {
        matches!(self, LightKind::Point | LightKind::Directional | LightKind::Spot)
    }
}

impl DeviceVariant for LightKind {
    const ALL: &'static [Self] = &[
        LightKind::Point,
        LightKind::Directional,
        LightKind::Spot,
        LightKind::Infinite,
        LightKind::DiffuseArea,
    ];

    fn tag(self) -> u32 {
        match self {
            LightKind::Point => 1,
            LightKind::Directional => 2,
            LightKind::Spot => 3,
            LightKind::Infinite => 4,
            LightKind::DiffuseArea => 5,
        }
    }

    fn record_size(self) -> usize {
        match self {
            LightKind::Point => size_of::<PointLight>(),
            LightKind::Directional => size_of::<DirectionalLight>(),
            LightKind::Spot => size_of::<SpotLight>(),
            LightKind::Infinite => size_of::<InfiniteLight>(),
            LightKind::DiffuseArea => size_of::<DiffuseAreaLight>(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            LightKind::Point => "point",
            LightKind::Directional => "directional",
            LightKind::Spot => "spot",
            LightKind::Infinite => "infinite",
            LightKind::DiffuseArea => "diffuse-area",
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PointLight {
    pub position: [f32; 3],
    pub _pad0: f32,
    pub intensity: [f32; 3],
    pub _pad1: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DirectionalLight {
    /// Direction the light travels.
    pub direction: [f32; 3],
    pub scene_radius: f32,
    pub radiance: [f32; 3],
    pub _pad: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SpotLight {
    pub position: [f32; 3],
    pub cos_falloff_start: f32,
    pub direction: [f32; 3],
    pub cos_falloff_end: f32,
    pub intensity: [f32; 3],
    pub _pad: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct InfiniteLight {
    pub radiance: [f32; 3],
    pub scale: f32,
    pub scene_center: [f32; 3],
    pub scene_radius: f32,
}

/// Emission of one triangle of an emissive mesh instance.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DiffuseAreaLight {
    /// `InstanceData` owning the triangle.
    pub instance: DevicePtr,
    pub triangle: u32,
    pub two_sided: u32,
    pub le: [f32; 3],
    pub _pad: f32,
}

const _: () = {
    assert!(size_of::<PointLight>() == 32);
    assert!(size_of::<DirectionalLight>() == 32);
    assert!(size_of::<SpotLight>() == 48);
    assert!(size_of::<InfiniteLight>() == 32);
    assert!(size_of::<DiffuseAreaLight>() == 32);
};

macro_rules! light_variant {
    ($record:ty, $kind:expr) => {
        impl VariantRecord for $record {
            type Kind = LightKind;
            const KIND: LightKind = $kind;
        }
    };
}

light_variant!(PointLight, LightKind::Point);
light_variant!(DirectionalLight, LightKind::Directional);
light_variant!(SpotLight, LightKind::Spot);
light_variant!(InfiniteLight, LightKind::Infinite);
light_variant!(DiffuseAreaLight, LightKind::DiffuseArea);

fn kind_changed(record: LightKind, leaf: &Light) {
    log::warn!(
        "light changed kind from {} to {}; needs a full scene upload",
        record.name(),
        leaf.desc.kind_name()
    );
}

impl DeviceObject for PointLight {
    type Leaf = Light;

    fn sync_from(&mut self, leaf: &Light) {
        match leaf.desc {
            LightDesc::Point { intensity } => {
                self.position = to3(leaf.position());
                self.intensity = to3(intensity);
            }
            _ => kind_changed(LightKind::Point, leaf),
        }
    }
}

impl DeviceObject for DirectionalLight {
    type Leaf = Light;

    fn sync_from(&mut self, leaf: &Light) {
        match leaf.desc {
            LightDesc::Directional { radiance } => {
                self.direction = to3(leaf.direction());
                self.radiance = to3(radiance);
            }
            _ => kind_changed(LightKind::Directional, leaf),
        }
    }
}

impl DeviceObject for SpotLight {
    type Leaf = Light;

    fn sync_from(&mut self, leaf: &Light) {
        match leaf.desc {
            LightDesc::Spot {
                intensity,
                cos_falloff_start,
                cos_falloff_end,
            } => {
                self.position = to3(leaf.position());
                self.direction = to3(leaf.direction());
                self.intensity = to3(intensity);
                self.cos_falloff_start = cos_falloff_start;
                self.cos_falloff_end = cos_falloff_end;
            }
            _ => kind_changed(LightKind::Spot, leaf),
        }
    }
}

impl DeviceObject for InfiniteLight {
    type Leaf = Light;

    fn sync_from(&mut self, leaf: &Light) {
        match leaf.desc {
            LightDesc::Infinite { radiance, scale } => {
                self.radiance = to3(radiance);
                self.scale = scale;
            }
            _ => kind_changed(LightKind::Infinite, leaf),
        }
    }
}

/// Device record chosen for an explicit light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LightRecord {
    Point(PointLight),
    Directional(DirectionalLight),
    Spot(SpotLight),
    Infinite(InfiniteLight),
}

impl LightRecord {
    pub fn kind(&self) -> LightKind {
        match self {
            LightRecord::Point(_) => LightKind::Point,
            LightRecord::Directional(_) => LightKind::Directional,
            LightRecord::Spot(_) => LightKind::Spot,
            LightRecord::Infinite(_) => LightKind::Infinite,
        }
    }
}

/// Construction table for explicit lights.
///
/// `scene_sphere` is the world bounding sphere, fixed into the records of lights at infinity.
pub fn light_record(light: &Light, scene_sphere: (Vec3, f32)) -> RenderResult<LightRecord> {
    let (center, radius) = scene_sphere;
    Ok(match light.desc {
        LightDesc::Point { .. } => LightRecord::Point(synced(PointLight::default(), light)),
        LightDesc::Directional { .. } => LightRecord::Directional(synced(
            DirectionalLight {
                scene_radius: radius,
                ..Default::default()
            },
            light,
        )),
        LightDesc::Spot { .. } => LightRecord::Spot(synced(SpotLight::default(), light)),
        LightDesc::Infinite { .. } => LightRecord::Infinite(synced(
            InfiniteLight {
                scene_center: to3(center),
                scene_radius: radius,
                ..Default::default()
            },
            light,
        )),
        LightDesc::Rect { .. } => {
            return Err(RenderError::unsupported("light type", light.desc.kind_name()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_unique_and_nonzero() {
        let mut tags: Vec<u32> = LightKind::ALL.iter().map(|k| k.tag()).collect();
        assert!(tags.iter().all(|&t| t != 0));
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), LightKind::ALL.len());
        for kind in LightKind::ALL {
            assert_eq!(LightKind::from_tag(kind.tag()), Some(*kind));
        }
    }

    #[test]
    fn table_builds_every_supported_kind() {
        let sphere = (Vec3::ZERO, 10.0);
        let lights = [
            Light::point(Vec3::Y, Vec3::ONE),
            Light::directional(Vec3::NEG_Y, Vec3::ONE),
            Light::spot(Vec3::Y, Vec3::ZERO, Vec3::ONE, 10.0, 20.0),
            Light::infinite(Vec3::splat(0.5)),
        ];
        let kinds: Vec<LightKind> = lights
            .iter()
            .map(|l| light_record(l, sphere).unwrap().kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                LightKind::Point,
                LightKind::Directional,
                LightKind::Spot,
                LightKind::Infinite
            ]
        );
        if let LightRecord::Directional(d) = light_record(&lights[1], sphere).unwrap() {
            assert_eq!(d.scene_radius, 10.0);
            assert!((Vec3::from(d.direction) - Vec3::NEG_Y).length() < 1e-5);
        }
    }

    #[test]
    fn rect_light_is_unsupported() {
        let rect = Light::rect(Vec3::ZERO, Vec3::Y, Vec3::ONE, 1.0, 1.0);
        let err = light_record(&rect, (Vec3::ZERO, 1.0)).unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Unsupported light type: rect");
    }

    #[test]
    fn sync_ignores_kind_change() {
        let mut record = PointLight::default();
        record.sync_from(&Light::point(Vec3::X, Vec3::ONE));
        let before = record;
        record.sync_from(&Light::infinite(Vec3::ONE));
        assert_eq!(record, before);
    }
}
