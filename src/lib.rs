//! Live depth heatmaps: frames in, one inference at a time, grid sums out.

pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod perf;
pub mod pipeline;
pub mod postprocess;
pub mod sink;
pub mod source;

#[cfg(feature = "libcamera")]
pub mod camera;
#[cfg(feature = "ipc")]
pub mod ipc;

pub use config::PipelineConfig;
pub use error::Error;
pub use frame::{Frame, PixelFormat};
pub use pipeline::{Admission, Coordinator, Pipeline};
