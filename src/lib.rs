//! Scene upload and wavefront path tracing.
//! Host scene leaves are mirrored into fixed-layout device records, indexed by a BVH,
//! and rendered by a queue-driven path tracer with next-event estimation and participating media.

pub mod accel;
pub mod config;
pub mod device;
pub mod error;
pub mod path_tracing;
pub mod rt;
pub mod scene;
pub mod upload;

pub use config::{AccelKind, PathTracerParams, RendererConfig, SceneParameters};
pub use error::{RenderError, RenderResult};
pub use path_tracing::{FrameStats, Image, WavefrontPathTracer};
pub use scene::{Camera, Scene};
pub use upload::{RtScene, UploadStats};
