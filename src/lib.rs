//! Real-time segmentation effects: frames in, person mask from a model,
//! one of six GPU effects composited over the live frame.

pub mod assets;
pub mod config;
pub mod control;
pub mod error;
pub mod fps;
pub mod frame;
pub mod gpu;
pub mod inference;
pub mod pipeline;
pub mod source;
#[cfg(feature = "wgpu")]
pub mod ui;

pub use config::PipelineConfig;
pub use error::{FrameError, PipelineError, PipelineResult};
