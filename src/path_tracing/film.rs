// src/path_tracing/film.rs
// Radiance accumulation across frames and the resolved RGB image

use glam::Vec3;

/// Running per-pixel radiance sums.
#[derive(Clone, Debug)]
pub struct Film {
    width: u32,
    height: u32,
    sums: Vec<Vec3>,
    samples: u32,
}

impl Film {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            sums: vec![Vec3::ZERO; (width as usize) * (height as usize)],
            samples: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Samples per pixel accumulated so far.
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Add one frame: `radiance` holds the per-pixel sum over `spp` samples.
    pub fn accumulate(&mut self, radiance: impl IntoIterator<Item = Vec3>, spp: u32) {
        for (sum, l) in self.sums.iter_mut().zip(radiance) {
            *sum += l;
        }
        self.samples += spp;
    }

    pub fn reset(&mut self) {
        self.sums.fill(Vec3::ZERO);
        self.samples = 0;
    }

    /// Mean radiance per pixel.
    pub fn resolve(&self) -> Image {
        let scale = if self.samples == 0 {
            0.0
        } else {
            1.0 / self.samples as f32
        };
        Image {
            width: self.width,
            height: self.height,
            pixels: self.sums.iter().map(|s| (*s * scale).to_array()).collect(),
        }
    }
}

/// Linear RGB image, row-major from the top-left pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[f32; 3]>,
}

impl Image {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    pub fn is_black(&self) -> bool {
        self.pixels.iter().flatten().all(|&c| c == 0.0)
    }

    /// Mean over every pixel and channel.
    pub fn mean(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.pixels.iter().flatten().map(|&c| f64::from(c)).sum();
        (sum / (self.pixels.len() * 3) as f64) as f32
    }

    pub fn is_finite(&self) -> bool {
        self.pixels.iter().flatten().all(|c| c.is_finite())
    }

    /// Interleaved RGB floats.
    pub fn as_raw(&self) -> &[f32] {
        bytemuck::cast_slice(&self.pixels)
    }
}
