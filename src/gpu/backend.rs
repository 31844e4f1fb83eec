//! The seam between the frame planner and whatever executes kernels.
//!
//! [`WgpuBackend`](super::wgpu_backend::WgpuBackend) records real command
//! buffers; [`ReferenceBackend`](super::reference::ReferenceBackend) runs
//! every kernel invocation on the CPU so the pipeline can be exercised
//! without a device.

use super::dispatch::{DeviceLimits, ExecutionLimits};
use super::effects::FramePlan;
use super::resources::ResourceCache;
use super::types::{BufferKind, TextureKind};
use crate::error::PipelineResult;

pub trait GpuBackend: Sized {
    type Texture;
    type Buffer;
    /// Encoded work for one presentation cycle.
    type Commands;

    fn name(&self) -> &'static str;

    fn device_limits(&self) -> DeviceLimits;

    /// Build one program per kernel with the group shapes baked in. Called
    /// once at startup; a kernel that cannot be built is fatal.
    fn compile_kernels(&mut self, limits: ExecutionLimits, linear_block: u32) -> PipelineResult<()>;

    /// Allocate a texture. The format and usage follow from `kind`.
    fn create_texture(
        &self,
        kind: TextureKind,
        width: u32,
        height: u32,
    ) -> PipelineResult<Self::Texture>;

    /// Allocate a zero-initialized buffer of `size` bytes.
    fn create_buffer(&self, kind: BufferKind, size: u64) -> PipelineResult<Self::Buffer>;

    fn write_buffer(&self, buffer: &Self::Buffer, data: &[u8]);

    /// Replace the full contents of a texture. `data` is tightly packed rows
    /// in the texture's format.
    fn write_texture(&self, texture: &Self::Texture, width: u32, height: u32, data: &[u8]);

    /// Encode every pass of `plan`, in order, against the cached resources.
    fn encode(&self, plan: &FramePlan, cache: &ResourceCache<Self>) -> PipelineResult<Self::Commands>;

    /// Hand encoded work to the device queue. The egui paint callback
    /// returns command buffers to egui instead of calling this.
    fn submit(&self, commands: Self::Commands);
}
