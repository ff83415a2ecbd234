// src/path_tracing/mod.rs
// Wavefront path tracing over an uploaded scene: work items, queues, stage kernels and film
// RELEVANT FILES:src/path_tracing/wavefront/mod.rs,src/path_tracing/bound.rs,src/upload/mod.rs

pub mod bound;
pub mod film;
pub mod sampler;
pub mod wavefront;
pub mod workitem;

pub use bound::{BoundLight, BoundMedium, BoundScene, LightSample};
pub use film::{Film, Image};
pub use sampler::PcgSampler;
pub use wavefront::{FrameStats, WavefrontPathTracer, WorkQueue};
pub use workitem::{BsdfType, SurfaceInteraction};
