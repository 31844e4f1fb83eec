//! CPU implementation of every compute kernel.
//!
//! Each dispatch runs all of its invocations, out-of-bounds guard included,
//! so tests observe the same coverage the GPU would. Rows of a grid run in
//! parallel with rayon. Colour textures are quantized to 8 bits on store to
//! match `rgba8unorm`.
//!
//! BORDER HANDLING: blur taps and shifted mask lookups clamp to the edge,
//! like `textureLoad` with clamped coordinates in the shaders.

use std::sync::Arc;

use parking_lot::RwLock;
use rayon::prelude::*;

use super::backend::GpuBackend;
use super::dispatch::{DeviceLimits, Dispatch, Dispatch1d, Dispatch2d, ExecutionLimits};
use super::effects::{Binding, FramePlan, Kernel, PassStep};
use super::resources::ResourceCache;
use super::types::{BlurParams, BufferKind, MixParams, TextureFormat, TextureKind};
use crate::error::{PipelineError, PipelineResult};

/// A texture held on the CPU, one `f32` per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct CpuTexture {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    data: Vec<f32>,
}

impl CpuTexture {
    pub fn new(format: TextureFormat, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format,
            data: vec![0.0; width as usize * height as usize * format.channels()],
        }
    }

    /// Load with clamp-to-edge addressing. Single-channel textures read as
    /// `(r, 0, 0, 1)`.
    pub fn load(&self, x: i32, y: i32) -> [f32; 4] {
        let x = x.clamp(0, self.width as i32 - 1) as usize;
        let y = y.clamp(0, self.height as i32 - 1) as usize;
        let c = self.format.channels();
        let i = (y * self.width as usize + x) * c;
        match self.format {
            TextureFormat::Rgba8Unorm => [
                self.data[i],
                self.data[i + 1],
                self.data[i + 2],
                self.data[i + 3],
            ],
            TextureFormat::R32Float => [self.data[i], 0.0, 0.0, 1.0],
        }
    }

    fn store_all(&mut self, texels: &[[f32; 4]]) {
        match self.format {
            TextureFormat::Rgba8Unorm => {
                for (dst, src) in self.data.chunks_exact_mut(4).zip(texels) {
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d = quantize(*s);
                    }
                }
            }
            TextureFormat::R32Float => {
                for (dst, src) in self.data.iter_mut().zip(texels) {
                    *dst = src[0];
                }
            }
        }
    }

    fn fill_from_bytes(&mut self, data: &[u8]) {
        match self.format {
            TextureFormat::Rgba8Unorm => {
                for (dst, &b) in self.data.iter_mut().zip(data) {
                    *dst = b as f32 / 255.0;
                }
            }
            TextureFormat::R32Float => {
                for (dst, b) in self.data.iter_mut().zip(data.chunks_exact(4)) {
                    *dst = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                }
            }
        }
    }

    /// 8-bit RGBA copy. Single-channel textures come out as gray.
    pub fn to_rgba8(&self) -> image::RgbaImage {
        image::RgbaImage::from_fn(self.width, self.height, |x, y| {
            let t = self.load(x as i32, y as i32);
            let px = match self.format {
                TextureFormat::Rgba8Unorm => [t[0], t[1], t[2], t[3]],
                TextureFormat::R32Float => [t[0], t[0], t[0], 1.0],
            };
            image::Rgba(px.map(to_byte))
        })
    }
}

fn quantize(v: f32) -> f32 {
    to_byte(v) as f32 / 255.0
}

fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub type CpuTextureRef = Arc<RwLock<CpuTexture>>;
pub type CpuBufferRef = Arc<RwLock<Vec<u8>>>;

/// What one dispatch actually did, for assertions.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutedStep {
    pub kernel: Kernel,
    pub dispatch: Dispatch,
    /// Invocations launched, including those the guard rejected.
    pub invocations: u64,
    /// Invocations that passed the guard and wrote a result.
    pub writes: u64,
}

pub struct ReferenceBackend {
    limits: DeviceLimits,
}

impl Default for ReferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceBackend {
    pub fn new() -> Self {
        Self {
            limits: DeviceLimits::default(),
        }
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self { limits }
    }
}

impl GpuBackend for ReferenceBackend {
    type Texture = CpuTextureRef;
    type Buffer = CpuBufferRef;
    type Commands = Vec<ExecutedStep>;

    fn name(&self) -> &'static str {
        "cpu-reference"
    }

    fn device_limits(&self) -> DeviceLimits {
        self.limits
    }

    fn compile_kernels(&mut self, _limits: ExecutionLimits, _linear_block: u32) -> PipelineResult<()> {
        Ok(())
    }

    fn create_texture(&self, kind: TextureKind, width: u32, height: u32) -> PipelineResult<CpuTextureRef> {
        Ok(Arc::new(RwLock::new(CpuTexture::new(kind.format(), width, height))))
    }

    fn create_buffer(&self, _kind: BufferKind, size: u64) -> PipelineResult<CpuBufferRef> {
        Ok(Arc::new(RwLock::new(vec![0u8; size as usize])))
    }

    fn write_buffer(&self, buffer: &CpuBufferRef, data: &[u8]) {
        let mut buf = buffer.write();
        buf[..data.len()].copy_from_slice(data);
    }

    fn write_texture(&self, texture: &CpuTextureRef, _width: u32, _height: u32, data: &[u8]) {
        texture.write().fill_from_bytes(data);
    }

    /// Runs the plan immediately; the returned log is the "command buffer".
    fn encode(&self, plan: &FramePlan, cache: &ResourceCache<Self>) -> PipelineResult<Vec<ExecutedStep>> {
        let mut log = Vec::new();
        for pass in &plan.passes {
            for step in &pass.steps {
                log.push(execute(pass.kernel, step, cache)?);
            }
        }
        Ok(log)
    }

    fn submit(&self, _commands: Vec<ExecutedStep>) {}
}

fn binding(kernel: Kernel, step: &PassStep, index: usize) -> PipelineResult<Binding> {
    step.bindings.get(index).copied().ok_or_else(|| {
        PipelineError::MissingResource(format!("binding {index} of {}", kernel.entry_point()))
    })
}

fn texture_at(
    kernel: Kernel,
    step: &PassStep,
    index: usize,
    cache: &ResourceCache<ReferenceBackend>,
) -> PipelineResult<CpuTextureRef> {
    match binding(kernel, step, index)? {
        Binding::Texture(h) => Ok(cache.texture(h)?.clone()),
        Binding::Buffer(_) => Err(PipelineError::MissingResource(format!(
            "binding {index} of {} must be a texture",
            kernel.entry_point()
        ))),
    }
}

fn buffer_at(
    kernel: Kernel,
    step: &PassStep,
    index: usize,
    cache: &ResourceCache<ReferenceBackend>,
) -> PipelineResult<CpuBufferRef> {
    match binding(kernel, step, index)? {
        Binding::Buffer(h) => Ok(cache.buffer(h)?.clone()),
        Binding::Texture(_) => Err(PipelineError::MissingResource(format!(
            "binding {index} of {} must be a buffer",
            kernel.entry_point()
        ))),
    }
}

fn read_i32s(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn read_f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn read_uniform<T: bytemuck::Pod>(bytes: &[u8]) -> T {
    bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<T>()])
}

fn grid_of(kernel: Kernel, dispatch: Dispatch) -> PipelineResult<Dispatch2d> {
    match dispatch {
        Dispatch::Grid(d) => Ok(d),
        Dispatch::Linear(_) => Err(PipelineError::InvalidLimits(format!(
            "{} needs a 2-D dispatch",
            kernel.entry_point()
        ))),
    }
}

fn execute(
    kernel: Kernel,
    step: &PassStep,
    cache: &ResourceCache<ReferenceBackend>,
) -> PipelineResult<ExecutedStep> {
    match kernel {
        Kernel::ConvertProbabilitiesToMask => {
            let Dispatch::Linear(d) = step.dispatch else {
                return Err(PipelineError::InvalidLimits(
                    "convertProbabilitiesToMask needs a 1-D dispatch".into(),
                ));
            };
            let probabilities = read_f32s(&buffer_at(kernel, step, 0, cache)?.read());
            let mask = buffer_at(kernel, step, 1, cache)?;
            let params: MixParams = read_uniform(&buffer_at(kernel, step, 2, cache)?.read());
            let (invocations, writes) = convert_probabilities(d, &probabilities, &mut mask.write(), &params);
            Ok(ExecutedStep {
                kernel,
                dispatch: step.dispatch,
                invocations,
                writes,
            })
        }
        Kernel::ConvertMaskToTexture => {
            let grid = grid_of(kernel, step.dispatch)?;
            let mask = read_i32s(&buffer_at(kernel, step, 0, cache)?.read());
            let target = texture_at(kernel, step, 1, cache)?;
            let params: MixParams = read_uniform(&buffer_at(kernel, step, 2, cache)?.read());
            let (w, h) = {
                let t = target.read();
                (t.width, t.height)
            };
            let run = run_grid(grid, w, h, |x, y| {
                let label = mask[(y * w + x) as usize];
                let v = if label == params.person_class { 1.0 } else { 0.0 };
                [v, 0.0, 0.0, 1.0]
            });
            target.write().store_all(&run.texels);
            Ok(run.record(kernel, step.dispatch))
        }
        Kernel::BlurColor | Kernel::BlurMask => {
            let grid = grid_of(kernel, step.dispatch)?;
            let source = texture_at(kernel, step, 0, cache)?.read().clone();
            let target = texture_at(kernel, step, 1, cache)?;
            let params: BlurParams = read_uniform(&buffer_at(kernel, step, 2, cache)?.read());
            let weights = gaussian_weights(params.radius, params.sigma);
            let run = run_grid(grid, source.width, source.height, |x, y| {
                blur_texel(&source, &weights, params.direction, x as i32, y as i32)
            });
            target.write().store_all(&run.texels);
            Ok(run.record(kernel, step.dispatch))
        }
        Kernel::MaskColors
        | Kernel::Shadow
        | Kernel::Saturation
        | Kernel::Pixelate
        | Kernel::Composite
        | Kernel::Glow => {
            let grid = grid_of(kernel, step.dispatch)?;
            let input = texture_at(kernel, step, 0, cache)?.read().clone();
            let target = texture_at(kernel, step, 1, cache)?;
            let mask = read_i32s(&buffer_at(kernel, step, 2, cache)?.read());
            let params: MixParams = read_uniform(&buffer_at(kernel, step, 3, cache)?.read());
            let aux = match kernel {
                Kernel::MaskColors => Aux::Table(read_u32s(&buffer_at(kernel, step, 4, cache)?.read())),
                Kernel::Shadow | Kernel::Composite | Kernel::Glow => {
                    Aux::Texture(texture_at(kernel, step, 4, cache)?.read().clone())
                }
                _ => Aux::None,
            };
            let ctx = EffectInputs {
                input: &input,
                mask: &mask,
                params,
                aux: &aux,
            };
            let run = run_grid(grid, params.width as u32, params.height as u32, |x, y| {
                effect_texel(kernel, &ctx, x as i32, y as i32)
            });
            target.write().store_all(&run.texels);
            Ok(run.record(kernel, step.dispatch))
        }
    }
}

fn read_u32s(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

struct GridRun {
    texels: Vec<[f32; 4]>,
    invocations: u64,
    writes: u64,
}

impl GridRun {
    fn record(&self, kernel: Kernel, dispatch: Dispatch) -> ExecutedStep {
        ExecutedStep {
            kernel,
            dispatch,
            invocations: self.invocations,
            writes: self.writes,
        }
    }
}

/// Launch every invocation of `grid`; those outside `width x height` return
/// without writing. Texels come back in row-major order.
fn run_grid<F>(grid: Dispatch2d, width: u32, height: u32, f: F) -> GridRun
where
    F: Fn(u32, u32) -> [f32; 4] + Sync,
{
    let [cover_x, cover_y] = grid.coverage();
    let rows: Vec<Vec<[f32; 4]>> = (0..cover_y)
        .into_par_iter()
        .map(|gy| {
            let mut row = Vec::new();
            for gx in 0..cover_x {
                if gx >= width as u64 || gy >= height as u64 {
                    continue;
                }
                row.push(f(gx as u32, gy as u32));
            }
            row
        })
        .collect();
    let texels: Vec<[f32; 4]> = rows.into_iter().flatten().collect();
    GridRun {
        writes: texels.len() as u64,
        invocations: cover_x * cover_y,
        texels,
    }
}

fn convert_probabilities(
    d: Dispatch1d,
    probabilities: &[f32],
    mask: &mut [u8],
    params: &MixParams,
) -> (u64, u64) {
    let count = (params.mask_width * params.mask_height) as usize;
    let invocations = d.block_size as u64 * d.num_blocks as u64;
    let mut writes = 0;
    for i in 0..invocations as usize {
        if i >= count || i >= probabilities.len() {
            continue;
        }
        let label = if probabilities[i] > params.threshold {
            params.person_class
        } else {
            0
        };
        mask[i * 4..i * 4 + 4].copy_from_slice(&label.to_le_bytes());
        writes += 1;
    }
    (invocations, writes)
}

pub(crate) fn gaussian_weights(radius: i32, sigma: f32) -> Vec<f32> {
    let two_sigma_sq = 2.0 * sigma * sigma;
    let raw: Vec<f32> = (-radius..=radius)
        .map(|k| (-((k * k) as f32) / two_sigma_sq).exp())
        .collect();
    let sum: f32 = raw.iter().sum();
    raw.into_iter().map(|w| w / sum).collect()
}

fn blur_texel(source: &CpuTexture, weights: &[f32], dir: [i32; 2], x: i32, y: i32) -> [f32; 4] {
    let radius = (weights.len() / 2) as i32;
    let mut acc = [0.0f32; 4];
    for (i, w) in weights.iter().enumerate() {
        let k = i as i32 - radius;
        let t = source.load(x + k * dir[0], y + k * dir[1]);
        for c in 0..4 {
            acc[c] += t[c] * w;
        }
    }
    acc
}

enum Aux {
    None,
    Table(Vec<u32>),
    Texture(CpuTexture),
}

struct EffectInputs<'a> {
    input: &'a CpuTexture,
    mask: &'a [i32],
    params: MixParams,
    aux: &'a Aux,
}

impl EffectInputs<'_> {
    /// Nearest mask coordinate for frame pixel `(x, y)`.
    fn mask_coord(&self, x: i32, y: i32) -> (i32, i32) {
        let p = &self.params;
        let mx = (x * p.mask_width / p.width).min(p.mask_width - 1);
        let my = (y * p.mask_height / p.height).min(p.mask_height - 1);
        (mx, my)
    }

    fn label(&self, x: i32, y: i32) -> i32 {
        let (mx, my) = self.mask_coord(x, y);
        self.mask[(my * self.params.mask_width + mx) as usize]
    }

    fn is_person(&self, x: i32, y: i32) -> bool {
        self.label(x, y) == self.params.person_class
    }
}

const LUMA: [f32; 3] = [0.299, 0.587, 0.114];
const GLOW_COLD: [f32; 3] = [0.2, 0.9, 1.0];
const GLOW_WARM: [f32; 3] = [1.0, 0.55, 0.1];

fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn effect_texel(kernel: Kernel, ctx: &EffectInputs<'_>, x: i32, y: i32) -> [f32; 4] {
    let p = &ctx.params;
    let input = ctx.input.load(x, y);
    let dx = p.dx.clamp(-1.0, 1.0);
    let dy = p.dy.clamp(-1.0, 1.0);

    if kernel == Kernel::MaskColors {
        let Aux::Table(table) = ctx.aux else {
            return input;
        };
        let entries = (table.len() / 3) as i32;
        let idx = ctx.label(x, y).clamp(0, (entries - 1).max(0)) as usize;
        let t = dx.abs();
        let mut out = [0.0, 0.0, 0.0, 1.0];
        for c in 0..3 {
            let lut = table.get(idx * 3 + c).copied().unwrap_or(0) as f32 / 255.0;
            out[c] = mix(lut, input[c], t);
        }
        return out;
    }

    if kernel == Kernel::Glow {
        let Aux::Texture(glow) = ctx.aux else {
            return input;
        };
        let m = if ctx.is_person(x, y) { 1.0 } else { 0.0 };
        let (mx, my) = ctx.mask_coord(x, y);
        let g = glow.load(mx, my)[0];
        let halo = (g - m).clamp(0.0, 1.0) * 2.0 * (1.0 + dx);
        let warmth = (dy * 0.5 + 0.5).clamp(0.0, 1.0);
        let mut out = [0.0, 0.0, 0.0, 1.0];
        for c in 0..3 {
            let tint = mix(GLOW_COLD[c], GLOW_WARM[c], warmth);
            out[c] = (input[c] + halo * tint).clamp(0.0, 1.0);
        }
        return out;
    }

    if ctx.is_person(x, y) {
        return input;
    }

    match kernel {
        Kernel::Shadow => {
            let Aux::Texture(bg) = ctx.aux else {
                return input;
            };
            let bx = (x as i64 * bg.width as i64 / p.width as i64) as i32;
            let by = (y as i64 * bg.height as i64 / p.height as i64) as i32;
            let mut out = bg.load(bx, by);
            let sx = (x as f32 - dx * p.width as f32 * 0.25).floor() as i32;
            let sy = (y as f32 - dy * p.height as f32 * 0.25).floor() as i32;
            if sx >= 0 && sy >= 0 && sx < p.width && sy < p.height && ctx.is_person(sx, sy) {
                for c in out.iter_mut().take(3) {
                    *c *= 0.4;
                }
            }
            out[3] = 1.0;
            out
        }
        Kernel::Saturation => {
            let gray = input[0] * LUMA[0] + input[1] * LUMA[1] + input[2] * LUMA[2];
            let s = (0.5 - 0.5 * dx).clamp(0.0, 1.0);
            let b = 1.0 - 0.5 * dy;
            let mut out = [0.0, 0.0, 0.0, 1.0];
            for c in 0..3 {
                out[c] = (mix(gray, input[c], s) * b).clamp(0.0, 1.0);
            }
            out
        }
        Kernel::Pixelate => {
            let block = 2 + ((dx + 1.0) * 15.0).floor() as i32;
            let bx = ((x / block) * block + block / 2).min(p.width - 1);
            let by = ((y / block) * block + block / 2).min(p.height - 1);
            ctx.input.load(bx, by)
        }
        Kernel::Composite => {
            let Aux::Texture(blurred) = ctx.aux else {
                return input;
            };
            let t = (1.0 + dx).clamp(0.0, 1.0);
            let b = blurred.load(x, y);
            let mut out = [0.0, 0.0, 0.0, 1.0];
            for c in 0..3 {
                out[c] = mix(input[c], b[c], t);
            }
            out
        }
        _ => input,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::dispatch::{dispatch_1d, dispatch_2d};
    use crate::gpu::effects::{PassRole, PlannedPass};

    fn mix_params(width: i32, height: i32, mask: i32) -> MixParams {
        MixParams {
            width,
            height,
            dx: 0.0,
            dy: 0.0,
            mask_width: mask,
            mask_height: mask,
            person_class: 15,
            threshold: 0.5,
        }
    }

    #[test]
    fn gaussian_weights_are_normalized_and_symmetric() {
        let w = gaussian_weights(18, 6.0);
        assert_eq!(w.len(), 37);
        let sum: f32 = w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        for i in 0..18 {
            assert!((w[i] - w[w.len() - 1 - i]).abs() < 1e-7);
        }
        assert!(w[18] > w[17]);
    }

    #[test]
    fn guard_skips_out_of_bounds_invocations() {
        let grid = dispatch_2d(10, 3, 4, 16).unwrap();
        let run = run_grid(grid, 10, 3, |x, y| [x as f32, y as f32, 0.0, 1.0]);
        assert_eq!(run.invocations, 12 * 4);
        assert_eq!(run.writes, 30);
        assert_eq!(run.texels[29], [9.0, 2.0, 0.0, 1.0]);
    }

    #[test]
    fn probabilities_threshold_to_person_class() {
        let d = dispatch_1d(4, 4, 4).unwrap();
        let mut mask = vec![0u8; 16];
        let params = MixParams {
            mask_width: 2,
            mask_height: 2,
            ..mix_params(2, 2, 2)
        };
        let (_, writes) = convert_probabilities(d, &[0.1, 0.9, 0.5, 0.51], &mut mask, &params);
        assert_eq!(writes, 4);
        assert_eq!(read_i32s(&mask), vec![0, 15, 0, 15]);
    }

    #[test]
    fn mask_sampling_resolves_resolution_mismatch() {
        let input = CpuTexture::new(TextureFormat::Rgba8Unorm, 8, 4);
        let mask = [1, 2, 3, 4];
        let aux = Aux::None;
        let ctx = EffectInputs {
            input: &input,
            mask: &mask,
            params: MixParams {
                mask_width: 2,
                mask_height: 2,
                ..mix_params(8, 4, 2)
            },
            aux: &aux,
        };
        assert_eq!(ctx.label(0, 0), 1);
        assert_eq!(ctx.label(7, 0), 2);
        assert_eq!(ctx.label(0, 3), 3);
        assert_eq!(ctx.label(7, 3), 4);
    }

    #[test]
    fn person_pixels_pass_through_saturation() {
        let mut input = CpuTexture::new(TextureFormat::Rgba8Unorm, 2, 1);
        input.store_all(&[[1.0, 0.0, 0.0, 1.0], [1.0, 0.0, 0.0, 1.0]]);
        let mask = [15, 0];
        let aux = Aux::None;
        let ctx = EffectInputs {
            input: &input,
            mask: &mask,
            params: MixParams {
                mask_width: 2,
                mask_height: 1,
                dx: 1.0,
                ..mix_params(2, 1, 2)
            },
            aux: &aux,
        };
        assert_eq!(effect_texel(Kernel::Saturation, &ctx, 0, 0), [1.0, 0.0, 0.0, 1.0]);
        // Full desaturation of the background pixel.
        let bg = effect_texel(Kernel::Saturation, &ctx, 1, 0);
        assert!((bg[0] - 0.299).abs() < 1e-3 && (bg[1] - 0.299).abs() < 1e-3);
    }

    #[test]
    fn blur_of_constant_image_is_constant() {
        let backend = ReferenceBackend::new();
        let mut cache = ResourceCache::new();
        let src = cache
            .get_or_create_texture(&backend, TextureKind::MaskTexture, 9, 7)
            .unwrap();
        let dst = cache
            .get_or_create_texture(&backend, TextureKind::Glow, 9, 7)
            .unwrap();
        let ones: Vec<u8> = std::iter::repeat(1.0f32.to_le_bytes())
            .take(63)
            .flatten()
            .collect();
        cache.write_texture(&backend, src, &ones).unwrap();
        let uniform = cache
            .get_or_create_buffer(
                &backend,
                BufferKind::BlurParams(
                    crate::gpu::types::BlurTarget::Mask,
                    crate::gpu::types::BlurAxis::Horizontal,
                ),
                16,
            )
            .unwrap();
        let params = BlurParams::new(crate::gpu::types::BlurAxis::Horizontal, 2.0);
        cache
            .write_buffer(&backend, uniform, bytemuck::bytes_of(&params))
            .unwrap();

        let pass = PlannedPass {
            kernel: Kernel::BlurMask,
            role: PassRole::PrePass,
            steps: vec![PassStep {
                dispatch: Dispatch::Grid(dispatch_2d(9, 7, 4, 16).unwrap()),
                bindings: vec![
                    Binding::Texture(src),
                    Binding::Texture(dst),
                    Binding::Buffer(uniform),
                ],
            }],
        };
        let log = execute(pass.kernel, &pass.steps[0], &cache).unwrap();
        assert_eq!(log.writes, 63);
        let out = cache.texture(dst).unwrap().read().clone();
        for y in 0..7 {
            for x in 0..9 {
                assert!((out.load(x, y)[0] - 1.0).abs() < 1e-5);
            }
        }
    }
}
