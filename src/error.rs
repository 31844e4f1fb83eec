//! Error types for the effects pipeline.
//!
//! Two families, matching how the orchestrator reacts to them:
//! [`PipelineError`] stops the pipeline (startup, missing kernels, cached
//! resources that cannot be allocated) while [`FrameError`] only drops the
//! frame that produced it.

use thiserror::Error;

use crate::gpu::types::{BufferKind, TextureKind};

/// Fatal errors. Nothing downstream can run once one of these is raised.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No wgpu render state or adapter was handed to the app.
    #[error("GPU unavailable: {0}")]
    GpuUnavailable(String),

    /// Thread-group limits that cannot produce a valid dispatch shape.
    #[error("invalid execution limits: {0}")]
    InvalidLimits(String),

    /// A kernel entry point is not present in the compiled shader sources.
    #[error("missing kernel program `{0}`")]
    MissingKernel(&'static str),

    /// Shader compilation or pipeline validation failed.
    #[error("kernel `{kernel}` failed to compile: {reason}")]
    KernelCompile { kernel: &'static str, reason: String },

    /// An initial asset (background image) could not be loaded.
    #[error("asset `{path}` could not be loaded: {reason}")]
    Asset { path: String, reason: String },

    /// A cached texture could not be allocated.
    #[error("failed to allocate {kind:?} texture ({width}x{height}): {reason}")]
    TextureAllocation {
        kind: TextureKind,
        width: u32,
        height: u32,
        reason: String,
    },

    /// A cached buffer could not be allocated.
    #[error("failed to allocate {kind:?} buffer ({size} bytes): {reason}")]
    BufferAllocation {
        kind: BufferKind,
        size: u64,
        reason: String,
    },

    /// A handle outlived the resource it pointed to (the cache resized it).
    #[error("stale handle for {0}")]
    StaleHandle(String),

    /// A resource the frame plan depends on has never been created.
    #[error("missing cached resource: {0}")]
    MissingResource(String),

    /// Configuration could not be read or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// The frame source could not be started.
    #[error("frame source error: {0}")]
    Source(String),
}

/// Per-frame faults. The frame is dropped and the loop continues.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("inference failed: {0}")]
    Inference(String),

    #[error("inference returned no result")]
    EmptyResult,

    #[error("malformed {what} buffer: expected {expected} elements, got {actual}")]
    MalformedBuffer {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("frame resize failed: {0}")]
    Resize(String),

    /// The model emitted the other output family than the one configured.
    #[error("model output family mismatch: configured {configured}, got {actual}")]
    FamilyMismatch {
        configured: &'static str,
        actual: &'static str,
    },

    /// The cycle hit a fatal pipeline error while composing.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl FrameError {
    /// True when the error must stop the pipeline instead of dropping a frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::Pipeline(_))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_buffer_reports_sizes() {
        let err = FrameError::MalformedBuffer {
            what: "mask",
            expected: 16,
            actual: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("16"));
        assert!(msg.contains("12"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn pipeline_errors_inside_frame_errors_are_fatal() {
        let err: FrameError = PipelineError::MissingKernel("glow").into();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("glow"));
    }

    #[test]
    fn allocation_error_names_kind() {
        let err = PipelineError::TextureAllocation {
            kind: TextureKind::Output,
            width: 640,
            height: 480,
            reason: "out of memory".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Output"));
        assert!(msg.contains("640x480"));
    }
}
