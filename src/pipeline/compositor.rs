//! Owns the GPU side of the pipeline: resources, dispatch shapes and the
//! encoding of one presentation cycle.

use std::sync::Arc;
use std::time::Instant;

use image::RgbaImage;

use super::state::{PipelineState, StateCell};
use crate::assets;
use crate::config::{ModelFamily, PipelineConfig};
use crate::control::Controls;
use crate::error::{FrameError, PipelineError, PipelineResult};
use crate::fps::FpsCounter;
use crate::frame::Frame;
use crate::gpu::dispatch::{dispatch_1d, Dispatch1d, ExecutionLimits};
use crate::gpu::effects::{plan_frame, AuxResource, EffectMode, Kernel, PlanContext};
use crate::gpu::types::{BufferKind, MixParams, TextureKind};
use crate::gpu::{GpuBackend, ResourceCache, TextureHandle};
use crate::inference::ModelOutput;

/// Result of one [`Compositor::present`] call.
#[derive(Debug)]
pub struct Presentation<C> {
    pub commands: C,
    pub mode: EffectMode,
    pub kernels: Vec<Kernel>,
    pub aux: AuxResource,
    /// A new frame was consumed by this cycle (counted for FPS).
    pub fresh: bool,
    pub output: TextureHandle,
}

pub struct Compositor<B: GpuBackend> {
    backend: B,
    cache: ResourceCache<B>,
    limits: ExecutionLimits,
    convert_dispatch: Dispatch1d,
    mask_size: (u32, u32),
    mask_len: usize,
    family: ModelFamily,
    person_class: i32,
    threshold: f32,
    blur_sigma: f32,
    glow_sigma: f32,
    controls: Arc<Controls>,
    state: Arc<StateCell>,
    fps: FpsCounter,
    last_frame: Option<Frame>,
    fresh: bool,
    frames_composed: u64,
}

impl<B: GpuBackend> Compositor<B> {
    /// Resolve dispatch shapes, build every kernel and allocate the
    /// resources that exist from startup. Any failure here is fatal.
    pub fn new(
        mut backend: B,
        config: &PipelineConfig,
        controls: Arc<Controls>,
        state: Arc<StateCell>,
        background: &RgbaImage,
    ) -> PipelineResult<Self> {
        let limits = ExecutionLimits::resolve(
            config.gpu.execution_width,
            config.gpu.max_threads_per_group,
            backend.device_limits(),
        )?;
        let mask_len = config.mask_len();
        let mask_elems = u32::try_from(mask_len)
            .map_err(|_| PipelineError::Config(format!("mask of {mask_len} pixels is too large")))?;
        let convert_dispatch = dispatch_1d(
            mask_elems,
            limits.execution_width,
            limits.max_threads_per_group,
        )?;
        let [gx, gy] = limits.group_2d();
        tracing::info!(
            backend = backend.name(),
            group_x = gx,
            group_y = gy,
            linear_block = convert_dispatch.block_size,
            linear_blocks = convert_dispatch.num_blocks,
            "Resolved dispatch shapes"
        );
        backend.compile_kernels(limits, convert_dispatch.block_size)?;

        let mut cache = ResourceCache::new();
        let table = assets::color_table();
        let table_bytes: &[u8] = bytemuck::cast_slice(&table);
        let lut = cache.get_or_create_buffer(&backend, BufferKind::ColorTable, table_bytes.len() as u64)?;
        cache.write_buffer(&backend, lut, table_bytes)?;

        let bg = cache.get_or_create_texture(
            &backend,
            TextureKind::Background,
            background.width(),
            background.height(),
        )?;
        cache.write_texture(&backend, bg, background.as_raw())?;

        let mask_bytes = mask_len as u64 * 4;
        cache.get_or_create_buffer(&backend, BufferKind::SegmentationMask, mask_bytes)?;
        if config.model.family == ModelFamily::Sigmoid {
            cache.get_or_create_buffer(&backend, BufferKind::Probabilities, mask_bytes)?;
        }
        cache.get_or_create_buffer(
            &backend,
            BufferKind::MixParams,
            std::mem::size_of::<MixParams>() as u64,
        )?;

        let mut fps = FpsCounter::new(&config.fps);
        fps.start(Instant::now());

        Ok(Self {
            backend,
            cache,
            limits,
            convert_dispatch,
            mask_size: (config.model.mask_width, config.model.mask_height),
            mask_len,
            family: config.model.family,
            person_class: config.model.person_class,
            threshold: config.model.probability_threshold,
            blur_sigma: config.gpu.blur_sigma,
            glow_sigma: config.gpu.glow_sigma,
            controls,
            state,
            fps,
            last_frame: None,
            fresh: false,
            frames_composed: 0,
        })
    }

    /// Install a frame and its model output as the next thing to present.
    ///
    /// The model output is copied into the mask buffer as raw bytes (or
    /// into the probability buffer for sigmoid models). On error nothing is
    /// replaced and the previous output stays on screen.
    pub fn compose(&mut self, frame: Frame, output: ModelOutput) -> Result<(), FrameError> {
        if output.is_empty() {
            return Err(FrameError::EmptyResult);
        }
        if output.family() != self.family {
            return Err(FrameError::FamilyMismatch {
                configured: self.family.name(),
                actual: output.family().name(),
            });
        }
        if output.len() != self.mask_len {
            return Err(FrameError::MalformedBuffer {
                what: match output {
                    ModelOutput::Classes(_) => "mask",
                    ModelOutput::Probabilities(_) => "probabilities",
                },
                expected: self.mask_len,
                actual: output.len(),
            });
        }
        if frame.width() == 0 || frame.height() == 0 {
            return Err(FrameError::Resize("empty frame".into()));
        }

        match output {
            ModelOutput::Classes(_) => self.cache.upload_mask(&self.backend, output.as_bytes())?,
            ModelOutput::Probabilities(_) => {
                self.cache.upload_probabilities(&self.backend, output.as_bytes())?
            }
        };

        let input = self
            .cache
            .get_or_create_texture(&self.backend, TextureKind::Input, frame.width(), frame.height())?;
        self.cache.write_texture(&self.backend, input, frame.image.as_raw())?;

        self.last_frame = Some(frame);
        self.fresh = true;
        self.frames_composed += 1;
        Ok(())
    }

    /// Encode one cycle for the current mode and control offset.
    ///
    /// Returns `None` until the first frame has been composed. Without a
    /// fresh frame the last frame and mask are re-encoded so control
    /// changes show up immediately; those cycles are not counted as frames.
    pub fn present(&mut self, now: Instant) -> PipelineResult<Option<Presentation<B::Commands>>> {
        let Some((fw, fh)) = self.last_frame.as_ref().map(|f| (f.width(), f.height())) else {
            return Ok(None);
        };
        // Read once: every pass of this cycle sees the same mode and offset.
        let mode = self.controls.mode();
        let offset = self.controls.offset();

        let ctx = PlanContext {
            frame_size: (fw, fh),
            mask_size: self.mask_size,
            family: self.family,
            limits: self.limits,
            convert_dispatch: self.convert_dispatch,
            blur_sigma: self.blur_sigma,
            glow_sigma: self.glow_sigma,
        };
        let plan = plan_frame(mode, &ctx, &mut self.cache, &self.backend)?;

        let params = MixParams {
            width: fw as i32,
            height: fh as i32,
            dx: offset.dx,
            dy: offset.dy,
            mask_width: self.mask_size.0 as i32,
            mask_height: self.mask_size.1 as i32,
            person_class: self.person_class,
            threshold: self.threshold,
        };
        let uniform = self.cache.existing_buffer(BufferKind::MixParams)?;
        self.cache
            .write_buffer(&self.backend, uniform, bytemuck::bytes_of(&params))?;

        let commands = self.backend.encode(&plan, &self.cache)?;

        let fresh = std::mem::take(&mut self.fresh);
        if fresh {
            self.fps.frame_completed(now);
            // The worker may already be inferring the next frame; only close
            // the cycle that handed this frame over.
            self.state
                .transition(PipelineState::Presenting, PipelineState::Idle);
        }
        Ok(Some(Presentation {
            commands,
            mode,
            kernels: plan.kernels(),
            aux: plan.aux,
            fresh,
            output: plan.output,
        }))
    }

    pub fn fps(&self) -> f64 {
        self.fps.fps()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn cache(&self) -> &ResourceCache<B> {
        &self.cache
    }

    /// The output texture, once a cycle has created it.
    pub fn output_handle(&self) -> Option<TextureHandle> {
        self.cache.existing_texture(TextureKind::Output).ok()
    }

    /// The frame currently bound as input.
    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    pub fn frames_composed(&self) -> u64 {
        self.frames_composed
    }

    pub fn limits(&self) -> ExecutionLimits {
        self.limits
    }
}
