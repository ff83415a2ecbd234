// src/rt/medium.rs
// Medium kinds, their device records and the kind -> record construction table

use super::{synced, to3, DeviceObject};
use crate::device::{DevicePtr, DeviceVariant, VariantRecord};
use crate::error::{RenderError, RenderResult};
use crate::scene::{GridValues, Medium, MediumDesc};
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediumKind {
    Homogeneous,
    GridScalar,
    GridRgb,
}

impl DeviceVariant for MediumKind {
    const ALL: &'static [Self] = &[
        MediumKind::Homogeneous,
        MediumKind::GridScalar,
        MediumKind::GridRgb,
    ];

    fn tag(self) -> u32 {
        match self {
            MediumKind::Homogeneous => 1,
            MediumKind::GridScalar => 2,
            MediumKind::GridRgb => 3,
        }
    }

    fn record_size(self) -> usize {
        match self {
            MediumKind::Homogeneous => size_of::<HomogeneousMedium>(),
            MediumKind::GridScalar | MediumKind::GridRgb => size_of::<GridMediumData>(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            MediumKind::Homogeneous => "homogeneous",
            MediumKind::GridScalar => "grid<float>",
            MediumKind::GridRgb => "grid<rgb>",
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct HomogeneousMedium {
    pub sigma_a: [f32; 3],
    pub g: f32,
    pub sigma_s: [f32; 3],
    pub _pad: f32,
}

/// Voxel grid medium. `values` holds `f32` or `[f32; 3]` densities depending on the tag.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GridMediumData {
    pub world_to_medium: [[f32; 4]; 4],
    pub bounds_min: [f32; 3],
    pub g: f32,
    pub bounds_max: [f32; 3],
    /// Largest voxel density; the majorant is `max_density * sigma_t`.
    pub max_density: f32,
    pub sigma_a: [f32; 3],
    pub _pad0: f32,
    pub sigma_s: [f32; 3],
    pub _pad1: f32,
    pub resolution: [u32; 3],
    pub _pad2: u32,
    pub values: DevicePtr,
}

#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ScalarGridMedium(pub GridMediumData);

#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct RgbGridMedium(pub GridMediumData);

const _: () = {
    assert!(size_of::<HomogeneousMedium>() == 32);
    assert!(size_of::<GridMediumData>() == 152);
};

impl VariantRecord for HomogeneousMedium {
    type Kind = MediumKind;
    const KIND: MediumKind = MediumKind::Homogeneous;
}

impl VariantRecord for ScalarGridMedium {
    type Kind = MediumKind;
    const KIND: MediumKind = MediumKind::GridScalar;
}

impl VariantRecord for RgbGridMedium {
    type Kind = MediumKind;
    const KIND: MediumKind = MediumKind::GridRgb;
}

impl DeviceObject for HomogeneousMedium {
    type Leaf = Medium;

    fn sync_from(&mut self, leaf: &Medium) {
        match leaf.desc {
            MediumDesc::Homogeneous { sigma_a, sigma_s } => {
                self.sigma_a = to3(sigma_a);
                self.sigma_s = to3(sigma_s);
                self.g = leaf.g;
            }
            _ => log::warn!("medium is no longer homogeneous; needs a full scene upload"),
        }
    }
}

impl GridMediumData {
    fn sync_grid(&mut self, leaf: &Medium) {
        match &leaf.desc {
            MediumDesc::Grid {
                sigma_a,
                sigma_s,
                bounds_min,
                bounds_max,
                ..
            } => {
                self.world_to_medium = leaf.transform.inverse().to_cols_array_2d();
                self.sigma_a = to3(*sigma_a);
                self.sigma_s = to3(*sigma_s);
                self.bounds_min = to3(*bounds_min);
                self.bounds_max = to3(*bounds_max);
                self.g = leaf.g;
            }
            _ => log::warn!("medium is no longer a grid; needs a full scene upload"),
        }
    }
}

impl DeviceObject for ScalarGridMedium {
    type Leaf = Medium;

    fn sync_from(&mut self, leaf: &Medium) {
        self.0.sync_grid(leaf);
    }
}

impl DeviceObject for RgbGridMedium {
    type Leaf = Medium;

    fn sync_from(&mut self, leaf: &Medium) {
        self.0.sync_grid(leaf);
    }
}

/// Device record chosen for a medium, with the voxel payload still to be placed.
#[derive(Clone, Debug, PartialEq)]
pub enum MediumRecord {
    Homogeneous(HomogeneousMedium),
    GridScalar(ScalarGridMedium, Vec<f32>),
    GridRgb(RgbGridMedium, Vec<[f32; 3]>),
}

impl MediumRecord {
    pub fn kind(&self) -> MediumKind {
        match self {
            MediumRecord::Homogeneous(_) => MediumKind::Homogeneous,
            MediumRecord::GridScalar(..) => MediumKind::GridScalar,
            MediumRecord::GridRgb(..) => MediumKind::GridRgb,
        }
    }
}

/// Construction table for media.
pub fn medium_record(medium: &Medium) -> RenderResult<MediumRecord> {
    let (resolution, values) = match &medium.desc {
        MediumDesc::Homogeneous { .. } => {
            return Ok(MediumRecord::Homogeneous(synced(
                HomogeneousMedium::default(),
                medium,
            )))
        }
        MediumDesc::Grid {
            resolution, values, ..
        } => (*resolution, values),
    };
    let voxels = resolution.iter().map(|&r| r as usize).product::<usize>();
    if voxels == 0 || voxels != values.len() {
        return Err(RenderError::upload(format!(
            "grid of resolution {resolution:?} carries {} values",
            values.len()
        )));
    }
    let mut grid = GridMediumData::zeroed();
    grid.resolution = resolution;
    grid.max_density = values.max_density();
    grid.sync_grid(medium);
    Ok(match values {
        GridValues::Scalar(v) => MediumRecord::GridScalar(ScalarGridMedium(grid), v.clone()),
        GridValues::Rgb(v) => MediumRecord::GridRgb(RgbGridMedium(grid), v.clone()),
        GridValues::Half(_) => {
            return Err(RenderError::unsupported("grid value type", values.value_type()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use half::f16;

    fn unit_bounds() -> (Vec3, Vec3) {
        (Vec3::ZERO, Vec3::ONE)
    }

    #[test]
    fn table_picks_kind_by_value_type() {
        let homogeneous = Medium::homogeneous(Vec3::splat(0.1), Vec3::splat(0.5), 0.0);
        assert_eq!(
            medium_record(&homogeneous).unwrap().kind(),
            MediumKind::Homogeneous
        );
        let scalar = Medium::grid(
            [2, 1, 1],
            GridValues::Scalar(vec![0.25, 4.0]),
            Vec3::ZERO,
            Vec3::ONE,
            unit_bounds(),
            0.3,
        );
        match medium_record(&scalar).unwrap() {
            MediumRecord::GridScalar(record, values) => {
                assert_eq!(record.0.max_density, 4.0);
                assert_eq!(record.0.resolution, [2, 1, 1]);
                assert_eq!(record.0.g, 0.3);
                assert_eq!(values.len(), 2);
            }
            other => panic!("unexpected record {other:?}"),
        }
        let rgb = Medium::grid(
            [1, 1, 1],
            GridValues::Rgb(vec![[1.0, 2.0, 3.0]]),
            Vec3::ZERO,
            Vec3::ONE,
            unit_bounds(),
            0.0,
        );
        assert_eq!(medium_record(&rgb).unwrap().kind(), MediumKind::GridRgb);
    }

    #[test]
    fn half_grid_is_unsupported() {
        let medium = Medium::grid(
            [1, 1, 1],
            GridValues::Half(vec![f16::ONE]),
            Vec3::ZERO,
            Vec3::ONE,
            unit_bounds(),
            0.0,
        );
        let err = medium_record(&medium).unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Unsupported grid value type: half");
    }

    #[test]
    fn mismatched_voxel_count_is_an_upload_error() {
        let medium = Medium::grid(
            [2, 2, 2],
            GridValues::Scalar(vec![1.0]),
            Vec3::ZERO,
            Vec3::ONE,
            unit_bounds(),
            0.0,
        );
        assert!(matches!(
            medium_record(&medium),
            Err(RenderError::Upload(_))
        ));
    }
}
