// src/path_tracing/wavefront/mod.rs
// Wavefront path tracer: frame scheduler cycling the stage kernels over shared queues
// Paths advance one bounce per iteration until the ray queue drains

pub mod queues;
mod stages;
pub mod stats;

use crate::config::{PathTracerParams, RendererConfig};
use crate::error::{RenderError, RenderResult};
use crate::path_tracing::bound::BoundScene;
use crate::path_tracing::film::{Film, Image};
use crate::path_tracing::workitem::PixelState;
use crate::scene::Camera;
use crate::upload::RtScene;
use glam::Vec3;
use parking_lot::Mutex;
use queues::WavefrontQueues;
use stages::{ScatterQueues, Stages, SurfaceQueues};
use stats::FrameCounters;
use std::sync::atomic::Ordering;

pub use queues::WorkQueue;
pub use stats::FrameStats;

/// Iterations allowed beyond `max_depth` for interface crossings, which keep depth unchanged.
const PASS_THROUGH_ITERATIONS: u32 = 64;

/// Wavefront path tracer over an uploaded [`RtScene`].
pub struct WavefrontPathTracer {
    params: PathTracerParams,
    width: u32,
    height: u32,
    queues: WavefrontQueues,
    pixels: Vec<Mutex<PixelState>>,
    film: Film,
    frame_index: u32,
    last_stats: FrameStats,
}

fn validate_params(params: &PathTracerParams) -> RenderResult<()> {
    RendererConfig {
        path_tracer: params.clone(),
        ..RendererConfig::default()
    }
    .validate()
}

fn pixel_states(seed: u64, count: usize) -> Vec<Mutex<PixelState>> {
    (0..count)
        .map(|i| Mutex::new(PixelState::new(seed, i as u32)))
        .collect()
}

impl WavefrontPathTracer {
    pub fn new(width: u32, height: u32, params: PathTracerParams) -> RenderResult<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::config(format!(
                "film size must be non-zero, got {width}x{height}"
            )));
        }
        validate_params(&params)?;
        let count = width as usize * height as usize;
        log::info!(
            "Wavefront path tracer {}x{}: max_depth={} rr={} nee={} spp={}",
            width,
            height,
            params.max_depth,
            params.rr,
            params.nee,
            params.spp
        );
        Ok(Self {
            pixels: pixel_states(params.seed, count),
            queues: WavefrontQueues::new(count),
            film: Film::new(width, height),
            params,
            width,
            height,
            frame_index: 0,
            last_stats: FrameStats::default(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn params(&self) -> &PathTracerParams {
        &self.params
    }

    /// Replace the tracer parameters. Accumulation restarts.
    pub fn set_params(&mut self, params: PathTracerParams) -> RenderResult<()> {
        validate_params(&params)?;
        self.pixels = pixel_states(params.seed, self.pixels.len());
        self.params = params;
        self.reset_accumulation();
        Ok(())
    }

    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Err(RenderError::config(format!(
                "film size must be non-zero, got {width}x{height}"
            )));
        }
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        let count = width as usize * height as usize;
        self.width = width;
        self.height = height;
        self.queues = WavefrontQueues::new(count);
        self.pixels = pixel_states(self.params.seed, count);
        self.film = Film::new(width, height);
        self.frame_index = 0;
        Ok(())
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn reset_accumulation(&mut self) {
        self.film.reset();
        self.frame_index = 0;
    }

    /// Queue ledger of the most recent frame.
    pub fn last_stats(&self) -> FrameStats {
        self.last_stats
    }

    /// Mean radiance over every accumulated frame.
    pub fn image(&self) -> Image {
        self.film.resolve()
    }

    /// Trace `spp` samples per pixel and fold them into the accumulated image.
    pub fn render_frame(&mut self, scene: &RtScene, camera: &Camera) -> RenderResult<FrameStats> {
        let bound = BoundScene::new(scene)?;
        if bound.light_count() == 0 {
            log::debug!("frame {}: scene has no lights", self.frame_index);
        }
        let counters = FrameCounters::default();
        for pixel in &mut self.pixels {
            pixel.get_mut().l = Vec3::ZERO;
        }

        let max_iterations = self.params.max_depth.saturating_mul(4) + PASS_THROUGH_ITERATIONS;
        let stages = Stages {
            scene: &bound,
            params: &self.params,
            pixels: &self.pixels,
            counters: &counters,
        };
        for _ in 0..self.params.spp {
            self.queues.reset_all();
            stages.generate_camera_rays(camera, self.width, self.height, &self.queues.ray)?;

            let mut iteration = 0;
            while !self.queues.ray.is_empty() {
                if iteration >= max_iterations {
                    let stranded = self.queues.ray.len();
                    log::warn!(
                        "{} path(s) still active after {} iterations; terminating them",
                        stranded,
                        iteration
                    );
                    counters
                        .depth_terminated
                        .fetch_add(stranded as u64, Ordering::Relaxed);
                    break;
                }
                let WavefrontQueues {
                    ray,
                    next_ray,
                    miss,
                    hit_light,
                    shadow,
                    scatter,
                    medium_sample,
                    medium_scatter,
                } = &mut self.queues;
                {
                    let out = SurfaceQueues {
                        miss: &*miss,
                        hit_light: &*hit_light,
                        scatter: &*scatter,
                        next_ray: &*next_ray,
                    };
                    stages.intersect(ray.as_slice(), &out, &*medium_sample)?;
                    stages.sample_media(medium_sample.as_slice(), &out, &*medium_scatter)?;
                }
                stages.handle_miss(miss.as_slice());
                stages.handle_hit_light(hit_light.as_slice());
                {
                    let out = ScatterQueues {
                        shadow: &*shadow,
                        next_ray: &*next_ray,
                    };
                    stages.scatter_media(medium_scatter.as_slice(), &out)?;
                    stages.scatter_surfaces(scatter.as_slice(), &out)?;
                }
                stages.trace_shadows(shadow.as_slice());
                log::trace!(
                    "iteration {}: ray={} miss={} hit_light={} scatter={} medium={} shadow={} next={}",
                    iteration,
                    ray.len(),
                    miss.len(),
                    hit_light.len(),
                    scatter.len(),
                    medium_sample.len(),
                    shadow.len(),
                    next_ray.len()
                );

                self.queues.advance();
                iteration += 1;
                counters.iterations.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.film.accumulate(
            self.pixels.iter_mut().map(|p| p.get_mut().l),
            self.params.spp,
        );
        let stats = counters.snapshot();
        log::debug!(
            "frame {}: camera_rays={} entries={} re_entries={} miss={} hit_light={} absorbed={} rr={} depth={} zero={} shadow={}/{}",
            self.frame_index,
            stats.camera_rays,
            stats.ray_queue_entries,
            stats.re_entries,
            stats.miss,
            stats.hit_light,
            stats.absorbed,
            stats.rr_terminated,
            stats.depth_terminated,
            stats.zero_throughput,
            stats.shadow_contributed,
            stats.shadow_spawned
        );
        if !stats.is_conserved() {
            log::warn!("frame {}: queue ledger does not balance: {:?}", self.frame_index, stats);
        }
        self.frame_index += 1;
        self.last_stats = stats;
        Ok(stats)
    }

    /// Render `frames` frames and return the accumulated image.
    pub fn render(&mut self, scene: &RtScene, camera: &Camera, frames: u32) -> RenderResult<Image> {
        for _ in 0..frames {
            self.render_frame(scene, camera)?;
        }
        Ok(self.image())
    }
}
