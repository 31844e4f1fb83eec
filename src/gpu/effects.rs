//! Effect modes and the static table that turns a mode into GPU passes.
//!
//! The table is data only. [`plan_frame`] resolves it against the resource
//! cache for one presentation cycle, producing a [`FramePlan`] that any
//! backend can encode.

use serde::{Deserialize, Serialize};

use super::backend::GpuBackend;
use super::dispatch::{dispatch_2d, Dispatch, Dispatch1d, ExecutionLimits};
use super::resources::{BufferHandle, ResourceCache, TextureHandle};
use super::types::{BlurAxis, BlurParams, BlurTarget, BufferKind, MixParams, TextureKind};
use crate::config::ModelFamily;
use crate::error::PipelineResult;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectMode {
    #[default]
    MaskColors,
    Shadow,
    Saturation,
    Pixelate,
    Blur,
    Glow,
}

impl EffectMode {
    pub const ALL: [EffectMode; 6] = [
        EffectMode::MaskColors,
        EffectMode::Shadow,
        EffectMode::Saturation,
        EffectMode::Pixelate,
        EffectMode::Blur,
        EffectMode::Glow,
    ];

    /// Menu label.
    pub fn label(self) -> &'static str {
        match self {
            EffectMode::MaskColors => "Segmentation Mask",
            EffectMode::Shadow => "Shadow",
            EffectMode::Saturation => "Saturation & Brightness",
            EffectMode::Pixelate => "Pixelate",
            EffectMode::Blur => "Blur Background",
            EffectMode::Glow => "Glow",
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }
}

/// Every compute program the pipeline dispatches.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    MaskColors,
    Shadow,
    Saturation,
    Pixelate,
    Composite,
    Glow,
    ConvertMaskToTexture,
    ConvertProbabilitiesToMask,
    BlurColor,
    BlurMask,
}

impl Kernel {
    pub const ALL: [Kernel; 10] = [
        Kernel::MaskColors,
        Kernel::Shadow,
        Kernel::Saturation,
        Kernel::Pixelate,
        Kernel::Composite,
        Kernel::Glow,
        Kernel::ConvertMaskToTexture,
        Kernel::ConvertProbabilitiesToMask,
        Kernel::BlurColor,
        Kernel::BlurMask,
    ];

    /// Shader entry point name.
    pub fn entry_point(self) -> &'static str {
        match self {
            Kernel::MaskColors => "maskColors",
            Kernel::Shadow => "shadow",
            Kernel::Saturation => "saturation",
            Kernel::Pixelate => "pixelate",
            Kernel::Composite => "composite",
            Kernel::Glow => "glow",
            Kernel::ConvertMaskToTexture => "convertMaskToTexture",
            Kernel::ConvertProbabilitiesToMask => "convertProbabilitiesToMask",
            Kernel::BlurColor => "blurColor",
            Kernel::BlurMask => "blurMask",
        }
    }

    /// Runs over a flat element range instead of an image.
    pub fn is_linear(self) -> bool {
        matches!(self, Kernel::ConvertProbabilitiesToMask)
    }
}

/// Work that must finish before a mode's main kernel can run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrePass {
    /// Separable Gaussian over the input frame into `BlurredColor`.
    BlurInput,
    /// Person mask buffer into the single-channel `MaskTexture`.
    MaskToTexture,
    /// Separable Gaussian over `MaskTexture` into `Glow`.
    BlurMask,
}

/// The one mode-specific input bound next to frame, mask and params.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AuxResource {
    None,
    ColorTable,
    Background,
    BlurredColor,
    Glow,
}

#[derive(Debug)]
pub struct EffectSpec {
    pub mode: EffectMode,
    pub kernel: Kernel,
    pub pre_passes: &'static [PrePass],
    pub aux: AuxResource,
}

pub static EFFECT_TABLE: [EffectSpec; 6] = [
    EffectSpec {
        mode: EffectMode::MaskColors,
        kernel: Kernel::MaskColors,
        pre_passes: &[],
        aux: AuxResource::ColorTable,
    },
    EffectSpec {
        mode: EffectMode::Shadow,
        kernel: Kernel::Shadow,
        pre_passes: &[],
        aux: AuxResource::Background,
    },
    EffectSpec {
        mode: EffectMode::Saturation,
        kernel: Kernel::Saturation,
        pre_passes: &[],
        aux: AuxResource::None,
    },
    EffectSpec {
        mode: EffectMode::Pixelate,
        kernel: Kernel::Pixelate,
        pre_passes: &[],
        aux: AuxResource::None,
    },
    EffectSpec {
        mode: EffectMode::Blur,
        kernel: Kernel::Composite,
        pre_passes: &[PrePass::BlurInput],
        aux: AuxResource::BlurredColor,
    },
    EffectSpec {
        mode: EffectMode::Glow,
        kernel: Kernel::Glow,
        pre_passes: &[PrePass::MaskToTexture, PrePass::BlurMask],
        aux: AuxResource::Glow,
    },
];

pub fn effect_spec(mode: EffectMode) -> &'static EffectSpec {
    // Table rows are in `EffectMode` discriminant order.
    &EFFECT_TABLE[mode as usize]
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Binding {
    Texture(TextureHandle),
    Buffer(BufferHandle),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PassRole {
    /// Probability to class conversion (sigmoid models only).
    Conversion,
    PrePass,
    Main,
}

/// One dispatch. Bindings are listed in shader binding order.
#[derive(Clone, Debug, PartialEq)]
pub struct PassStep {
    pub dispatch: Dispatch,
    pub bindings: Vec<Binding>,
}

/// One logical pass. Separable blurs have two steps, everything else one.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedPass {
    pub kernel: Kernel,
    pub role: PassRole,
    pub steps: Vec<PassStep>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FramePlan {
    pub mode: EffectMode,
    pub aux: AuxResource,
    pub passes: Vec<PlannedPass>,
    pub output: TextureHandle,
}

impl FramePlan {
    pub fn kernels(&self) -> Vec<Kernel> {
        self.passes.iter().map(|p| p.kernel).collect()
    }

    pub fn count(&self, role: PassRole) -> usize {
        self.passes.iter().filter(|p| p.role == role).count()
    }

    pub fn main_pass(&self) -> Option<&PlannedPass> {
        self.passes.iter().find(|p| p.role == PassRole::Main)
    }
}

/// Everything besides the mode that shapes a frame plan.
#[derive(Copy, Clone, Debug)]
pub struct PlanContext {
    pub frame_size: (u32, u32),
    pub mask_size: (u32, u32),
    pub family: ModelFamily,
    pub limits: ExecutionLimits,
    /// Precomputed at startup; the mask size never changes.
    pub convert_dispatch: Dispatch1d,
    pub blur_sigma: f32,
    pub glow_sigma: f32,
}

impl PlanContext {
    fn grid(&self, (width, height): (u32, u32)) -> PipelineResult<Dispatch> {
        let d = dispatch_2d(
            width,
            height,
            self.limits.execution_width,
            self.limits.max_threads_per_group,
        )?;
        Ok(Dispatch::Grid(d))
    }
}

/// Resolve `mode` into the ordered passes for one cycle.
///
/// The mode is read once by the caller, so pre-passes and the main pass
/// always come from the same table row.
pub fn plan_frame<B: GpuBackend>(
    mode: EffectMode,
    ctx: &PlanContext,
    cache: &mut ResourceCache<B>,
    backend: &B,
) -> PipelineResult<FramePlan> {
    let spec = effect_spec(mode);
    let (fw, fh) = ctx.frame_size;
    let mask = cache.existing_buffer(BufferKind::SegmentationMask)?;
    let params = cache.get_or_create_buffer(
        backend,
        BufferKind::MixParams,
        std::mem::size_of::<MixParams>() as u64,
    )?;

    let mut passes = Vec::with_capacity(spec.pre_passes.len() + 2);

    if ctx.family == ModelFamily::Sigmoid {
        let probabilities = cache.existing_buffer(BufferKind::Probabilities)?;
        passes.push(PlannedPass {
            kernel: Kernel::ConvertProbabilitiesToMask,
            role: PassRole::Conversion,
            steps: vec![PassStep {
                dispatch: Dispatch::Linear(ctx.convert_dispatch),
                bindings: vec![
                    Binding::Buffer(probabilities),
                    Binding::Buffer(mask),
                    Binding::Buffer(params),
                ],
            }],
        });
    }

    let input = cache.get_or_create_texture(backend, TextureKind::Input, fw, fh)?;
    let output = cache.get_or_create_texture(backend, TextureKind::Output, fw, fh)?;

    for pre in spec.pre_passes {
        let pass = match pre {
            PrePass::BlurInput => blur_pass(
                cache,
                backend,
                ctx,
                BlurTarget::Color,
                input,
                ctx.frame_size,
                ctx.blur_sigma,
            )?,
            PrePass::MaskToTexture => {
                let (mw, mh) = ctx.mask_size;
                let target = cache.get_or_create_texture(backend, TextureKind::MaskTexture, mw, mh)?;
                PlannedPass {
                    kernel: Kernel::ConvertMaskToTexture,
                    role: PassRole::PrePass,
                    steps: vec![PassStep {
                        dispatch: ctx.grid(ctx.mask_size)?,
                        bindings: vec![
                            Binding::Buffer(mask),
                            Binding::Texture(target),
                            Binding::Buffer(params),
                        ],
                    }],
                }
            }
            PrePass::BlurMask => {
                let source = cache.existing_texture(TextureKind::MaskTexture)?;
                blur_pass(
                    cache,
                    backend,
                    ctx,
                    BlurTarget::Mask,
                    source,
                    ctx.mask_size,
                    ctx.glow_sigma,
                )?
            }
        };
        passes.push(pass);
    }

    let mut bindings = vec![
        Binding::Texture(input),
        Binding::Texture(output),
        Binding::Buffer(mask),
        Binding::Buffer(params),
    ];
    match spec.aux {
        AuxResource::None => {}
        AuxResource::ColorTable => {
            bindings.push(Binding::Buffer(cache.existing_buffer(BufferKind::ColorTable)?))
        }
        AuxResource::Background => {
            bindings.push(Binding::Texture(cache.existing_texture(TextureKind::Background)?))
        }
        AuxResource::BlurredColor => {
            bindings.push(Binding::Texture(cache.existing_texture(TextureKind::BlurredColor)?))
        }
        AuxResource::Glow => {
            bindings.push(Binding::Texture(cache.existing_texture(TextureKind::Glow)?))
        }
    }
    passes.push(PlannedPass {
        kernel: spec.kernel,
        role: PassRole::Main,
        steps: vec![PassStep {
            dispatch: ctx.grid((fw, fh))?,
            bindings,
        }],
    });

    Ok(FramePlan {
        mode,
        aux: spec.aux,
        passes,
        output,
    })
}

fn blur_pass<B: GpuBackend>(
    cache: &mut ResourceCache<B>,
    backend: &B,
    ctx: &PlanContext,
    target: BlurTarget,
    source: TextureHandle,
    (width, height): (u32, u32),
    sigma: f32,
) -> PipelineResult<PlannedPass> {
    let (kernel, scratch_kind, out_kind) = match target {
        BlurTarget::Color => (Kernel::BlurColor, TextureKind::BlurScratch, TextureKind::BlurredColor),
        BlurTarget::Mask => (Kernel::BlurMask, TextureKind::GlowScratch, TextureKind::Glow),
    };
    let scratch = cache.get_or_create_texture(backend, scratch_kind, width, height)?;
    let out = cache.get_or_create_texture(backend, out_kind, width, height)?;
    let grid = ctx.grid((width, height))?;

    let mut steps = Vec::with_capacity(2);
    for (axis, from, to) in [
        (BlurAxis::Horizontal, source, scratch),
        (BlurAxis::Vertical, scratch, out),
    ] {
        let uniform = cache.get_or_create_buffer(
            backend,
            BufferKind::BlurParams(target, axis),
            std::mem::size_of::<BlurParams>() as u64,
        )?;
        let params = BlurParams::new(axis, sigma);
        cache.write_buffer(backend, uniform, bytemuck::bytes_of(&params))?;
        steps.push(PassStep {
            dispatch: grid,
            bindings: vec![
                Binding::Texture(from),
                Binding::Texture(to),
                Binding::Buffer(uniform),
            ],
        });
    }

    Ok(PlannedPass {
        kernel,
        role: PassRole::PrePass,
        steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::dispatch::{dispatch_1d, DeviceLimits};
    use crate::gpu::reference::ReferenceBackend;

    fn context(family: ModelFamily) -> PlanContext {
        let limits = ExecutionLimits::resolve(8, 64, DeviceLimits::default()).unwrap();
        PlanContext {
            frame_size: (40, 30),
            mask_size: (16, 16),
            family,
            limits,
            convert_dispatch: dispatch_1d(256, 8, 64).unwrap(),
            blur_sigma: 1.0,
            glow_sigma: 2.0,
        }
    }

    fn seeded_cache(backend: &ReferenceBackend, family: ModelFamily) -> ResourceCache<ReferenceBackend> {
        let mut cache = ResourceCache::new();
        cache.upload_mask(backend, &[0u8; 16 * 16 * 4]).unwrap();
        if family == ModelFamily::Sigmoid {
            cache.upload_probabilities(backend, &[0u8; 16 * 16 * 4]).unwrap();
        }
        cache
            .get_or_create_buffer(backend, BufferKind::ColorTable, 21 * 3 * 4)
            .unwrap();
        cache
            .get_or_create_texture(backend, TextureKind::Background, 10, 10)
            .unwrap();
        cache
    }

    #[test]
    fn table_rows_follow_mode_order() {
        for (i, mode) in EffectMode::ALL.iter().enumerate() {
            assert_eq!(EFFECT_TABLE[i].mode, *mode);
            assert_eq!(effect_spec(*mode).mode, *mode);
            assert_eq!(EffectMode::from_u8(mode.as_u8()), Some(*mode));
        }
        assert_eq!(EffectMode::from_u8(6), None);
    }

    #[test]
    fn pass_counts_per_mode() {
        let backend = ReferenceBackend::new();
        let ctx = context(ModelFamily::Softmax);
        let mut cache = seeded_cache(&backend, ModelFamily::Softmax);

        let expected = [
            (EffectMode::MaskColors, vec![Kernel::MaskColors]),
            (EffectMode::Shadow, vec![Kernel::Shadow]),
            (EffectMode::Saturation, vec![Kernel::Saturation]),
            (EffectMode::Pixelate, vec![Kernel::Pixelate]),
            (EffectMode::Blur, vec![Kernel::BlurColor, Kernel::Composite]),
            (
                EffectMode::Glow,
                vec![Kernel::ConvertMaskToTexture, Kernel::BlurMask, Kernel::Glow],
            ),
        ];
        for (mode, kernels) in expected {
            let plan = plan_frame(mode, &ctx, &mut cache, &backend).unwrap();
            assert_eq!(plan.kernels(), kernels, "{mode:?}");
            assert_eq!(plan.count(PassRole::Main), 1);
            assert_eq!(plan.count(PassRole::Conversion), 0);
            assert_eq!(plan.count(PassRole::PrePass), effect_spec(mode).pre_passes.len());
            assert_eq!(plan.passes.last().map(|p| p.role), Some(PassRole::Main));
        }
    }

    #[test]
    fn sigmoid_models_convert_first() {
        let backend = ReferenceBackend::new();
        let ctx = context(ModelFamily::Sigmoid);
        let mut cache = seeded_cache(&backend, ModelFamily::Sigmoid);
        let plan = plan_frame(EffectMode::Glow, &ctx, &mut cache, &backend).unwrap();
        assert_eq!(
            plan.kernels(),
            vec![
                Kernel::ConvertProbabilitiesToMask,
                Kernel::ConvertMaskToTexture,
                Kernel::BlurMask,
                Kernel::Glow
            ]
        );
        let convert = &plan.passes[0].steps[0];
        assert!(matches!(convert.dispatch, Dispatch::Linear(_)));
    }

    #[test]
    fn blur_passes_have_two_halves() {
        let backend = ReferenceBackend::new();
        let ctx = context(ModelFamily::Softmax);
        let mut cache = seeded_cache(&backend, ModelFamily::Softmax);
        let plan = plan_frame(EffectMode::Blur, &ctx, &mut cache, &backend).unwrap();
        let blur = &plan.passes[0];
        assert_eq!(blur.steps.len(), 2);
        // The horizontal half writes the scratch the vertical half reads.
        assert_eq!(blur.steps[0].bindings[1], blur.steps[1].bindings[0]);
    }

    #[test]
    fn main_pass_binds_only_its_own_aux() {
        let backend = ReferenceBackend::new();
        let ctx = context(ModelFamily::Softmax);
        let mut cache = seeded_cache(&backend, ModelFamily::Softmax);

        let shadow = plan_frame(EffectMode::Shadow, &ctx, &mut cache, &backend).unwrap();
        let background = cache.existing_texture(TextureKind::Background).unwrap();
        assert_eq!(
            shadow.main_pass().unwrap().steps[0].bindings.last(),
            Some(&Binding::Texture(background))
        );

        let pixelate = plan_frame(EffectMode::Pixelate, &ctx, &mut cache, &backend).unwrap();
        assert_eq!(pixelate.aux, AuxResource::None);
        assert_eq!(pixelate.main_pass().unwrap().steps[0].bindings.len(), 4);
    }

    #[test]
    fn missing_mask_buffer_is_fatal() {
        let backend = ReferenceBackend::new();
        let ctx = context(ModelFamily::Softmax);
        let mut cache = ResourceCache::new();
        assert!(plan_frame(EffectMode::Saturation, &ctx, &mut cache, &backend).is_err());
    }
}
