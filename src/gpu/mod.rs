//! Módulo de aceleración por hardware (GPU) del pipeline de efectos.
//! Divide las responsabilidades en despacho, recursos, tabla de efectos y backends.

pub mod backend;
pub mod dispatch;
pub mod effects;
pub mod reference;
pub mod resources;
pub mod types;
#[cfg(feature = "wgpu")]
pub mod wgpu_backend;

pub use backend::GpuBackend;
pub use dispatch::{dispatch_1d, dispatch_2d, ExecutionLimits};
pub use effects::{plan_frame, EffectMode, FramePlan, Kernel};
pub use reference::ReferenceBackend;
pub use resources::{BufferHandle, ResourceCache, TextureHandle};
pub use types::{BufferKind, ControlOffset, TextureKind};
#[cfg(feature = "wgpu")]
pub use wgpu_backend::{DisplayPipeline, WgpuBackend};
