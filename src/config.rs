//! Startup configuration.
//!
//! Everything here is decided once before the first frame: model geometry,
//! output family, control sensitivity, blur radii and the frame source.
//! Values come from an optional JSON file; missing fields fall back to the
//! defaults below.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::gpu::effects::EffectMode;
use crate::source::{CameraPosition, Orientation};

/// Environment variable consulted when no config path is given on the CLI.
pub const CONFIG_ENV: &str = "SHADOW_FX_CONFIG";

/// Shape of the model output. The two families cannot be told apart from
/// the buffer alone, so this is always configured explicitly.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFamily {
    /// One integer class id per pixel (softmax + argmax).
    #[default]
    Softmax,
    /// One foreground probability per pixel; converted to classes on the GPU.
    Sigmoid,
}

impl ModelFamily {
    pub fn name(self) -> &'static str {
        match self {
            ModelFamily::Softmax => "softmax",
            ModelFamily::Sigmoid => "sigmoid",
        }
    }
}

/// Where frames come from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SourceKind {
    /// Generated test pattern, no hardware required.
    Synthetic,
    /// A capture device (requires the `camera` feature).
    Camera { index: u32 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub input_width: u32,
    pub input_height: u32,
    pub mask_width: u32,
    pub mask_height: u32,
    pub family: ModelFamily,
    /// Class id the effects treat as foreground (PASCAL VOC "person").
    pub person_class: i32,
    /// Probability above which a pixel becomes `person_class`.
    pub probability_threshold: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_width: 513,
            input_height: 513,
            mask_width: 513,
            mask_height: 513,
            family: ModelFamily::Softmax,
            person_class: 15,
            probability_threshold: 0.5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// How far (in points) the knob can travel from the center.
    pub max_distance: f32,
    /// The vertical axis divides by `max_distance * vertical_divisor_factor`.
    /// Kept at 2.0 to compensate for portrait framing.
    pub vertical_divisor_factor: f32,
    /// Seconds of inactivity before the knob is hidden.
    pub hide_after_secs: f32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            max_distance: 120.0,
            vertical_divisor_factor: 2.0,
            hide_after_secs: 1.5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Preferred execution width (SIMD/warp size). wgpu cannot query it.
    pub execution_width: u32,
    /// Upper bound for threads per group, clamped to the device limit.
    pub max_threads_per_group: u32,
    pub blur_sigma: f32,
    pub glow_sigma: f32,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            execution_width: 32,
            max_threads_per_group: 256,
            blur_sigma: 6.0,
            glow_sigma: 24.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub orientation: Orientation,
    pub position: CameraPosition,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Synthetic,
            width: 1280,
            height: 720,
            fps: 30,
            orientation: Orientation::Portrait,
            position: CameraPosition::Front,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FpsConfig {
    pub smoothing: f64,
    pub min_interval_secs: f64,
    pub window_secs: f64,
}

impl Default for FpsConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.75,
            min_interval_secs: 0.01,
            window_secs: 1.0,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub control: ControlConfig,
    pub gpu: GpuConfig,
    pub capture: CaptureConfig,
    pub fps: FpsConfig,
    /// Background image for Shadow mode. `None` uses a generated backdrop.
    pub background: Option<PathBuf>,
    pub initial_mode: EffectMode,
}

impl PipelineConfig {
    /// Read a JSON config file and validate it.
    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?;
        let config: PipelineConfig = serde_json::from_str(&text)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config from an explicit path, then the environment,
    /// then the defaults.
    pub fn load(cli_path: Option<PathBuf>) -> PipelineResult<Self> {
        let path = cli_path.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        match path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading pipeline config");
                Self::from_file(&path)
            }
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let m = &self.model;
        if m.input_width == 0 || m.input_height == 0 {
            return Err(PipelineError::Config("model input size must be non-zero".into()));
        }
        if m.mask_width == 0 || m.mask_height == 0 {
            return Err(PipelineError::Config("mask size must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&m.probability_threshold) {
            return Err(PipelineError::Config(
                "probability_threshold must be within [0, 1]".into(),
            ));
        }
        if self.gpu.blur_sigma <= 0.0 || self.gpu.glow_sigma <= 0.0 {
            return Err(PipelineError::Config("blur sigmas must be positive".into()));
        }
        if self.control.max_distance <= 0.0 || self.control.vertical_divisor_factor <= 0.0 {
            return Err(PipelineError::Config(
                "control distances must be positive".into(),
            ));
        }
        if self.capture.width == 0 || self.capture.height == 0 || self.capture.fps == 0 {
            return Err(PipelineError::Config("capture size and fps must be non-zero".into()));
        }
        Ok(())
    }

    /// Number of pixels in the segmentation mask.
    pub fn mask_len(&self) -> usize {
        self.model.mask_width as usize * self.model.mask_height as usize
    }
}
