// src/rt/sampler.rs
// Uniform light sampler over the registered light pointers

use crate::device::DevicePtr;
use bytemuck::{Pod, Zeroable};

/// Picks each of `count` lights with equal probability.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct UniformLightSampler {
    /// `TaggedPtr` array of every light, mesh lights first.
    pub lights: DevicePtr,
    pub count: u32,
    pub _pad: u32,
}

impl UniformLightSampler {
    pub fn new(lights: DevicePtr, count: usize) -> Self {
        Self {
            lights,
            count: count as u32,
            _pad: 0,
        }
    }

    /// Light index for a uniform sample `u` in `[0, 1)` and its probability.
    pub fn sample(&self, u: f32) -> Option<(usize, f32)> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as usize;
        let index = ((u * n as f32) as usize).min(n - 1);
        Some((index, self.pmf()))
    }

    pub fn pmf(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            1.0 / self.count as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_clamps_and_reports_pmf() {
        let sampler = UniformLightSampler::new(DevicePtr(0x100), 4);
        assert_eq!(sampler.sample(0.0), Some((0, 0.25)));
        assert_eq!(sampler.sample(0.999_999), Some((3, 0.25)));
        assert_eq!(sampler.sample(1.0).map(|s| s.0), Some(3));
        assert_eq!(UniformLightSampler::default().sample(0.5), None);
    }
}
