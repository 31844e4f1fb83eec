//! Backend wgpu: compila un pipeline de cómputo por kernel y graba los pases del frame.
//! También define el pipeline de renderizado que muestra la textura de salida en pantalla.

use std::collections::HashMap;
use std::sync::Arc;

use eframe::wgpu;

use super::backend::GpuBackend;
use super::dispatch::{DeviceLimits, ExecutionLimits};
use super::effects::{Binding, FramePlan, Kernel};
use super::resources::ResourceCache;
use super::types::{BufferKind, TextureFormat, TextureKind};
use crate::error::{PipelineError, PipelineResult};

const COMMON_WGSL: &str = include_str!("../shaders/common.wgsl");
const EFFECT_BINDINGS_WGSL: &str = include_str!("../shaders/effect_bindings.wgsl");
const DISPLAY_WGSL: &str = include_str!("../shaders/display.wgsl");

/// Kernel body, without the shared header.
fn kernel_body(kernel: Kernel) -> &'static str {
    match kernel {
        Kernel::MaskColors => include_str!("../shaders/mask_colors.wgsl"),
        Kernel::Shadow => include_str!("../shaders/shadow.wgsl"),
        Kernel::Saturation => include_str!("../shaders/saturation.wgsl"),
        Kernel::Pixelate => include_str!("../shaders/pixelate.wgsl"),
        Kernel::Composite => include_str!("../shaders/composite.wgsl"),
        Kernel::Glow => include_str!("../shaders/glow.wgsl"),
        Kernel::ConvertMaskToTexture => include_str!("../shaders/convert_mask.wgsl"),
        Kernel::ConvertProbabilitiesToMask => include_str!("../shaders/convert_probabilities.wgsl"),
        Kernel::BlurColor => include_str!("../shaders/blur_color.wgsl"),
        Kernel::BlurMask => include_str!("../shaders/blur_mask.wgsl"),
    }
}

fn is_effect(kernel: Kernel) -> bool {
    matches!(
        kernel,
        Kernel::MaskColors
            | Kernel::Shadow
            | Kernel::Saturation
            | Kernel::Pixelate
            | Kernel::Composite
            | Kernel::Glow
    )
}

/// Full WGSL for one kernel with the group shape substituted in.
pub fn kernel_source(kernel: Kernel, limits: ExecutionLimits, linear_block: u32) -> String {
    let [gx, gy] = limits.group_2d();
    let mut src = String::from(COMMON_WGSL);
    if is_effect(kernel) {
        src.push_str(EFFECT_BINDINGS_WGSL);
    }
    src.push_str(kernel_body(kernel));
    src.replace("WG_LINEAR", &linear_block.to_string())
        .replace("WG_X", &gx.to_string())
        .replace("WG_Y", &gy.to_string())
}

/// Shape of one binding slot in a kernel's bind group layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Slot {
    Sampled,
    StorageTexture(TextureFormat),
    ReadBuffer,
    ReadWriteBuffer,
    Uniform,
}

fn kernel_slots(kernel: Kernel) -> Vec<Slot> {
    const COLOR_OUT: Slot = Slot::StorageTexture(TextureFormat::Rgba8Unorm);
    const FLOAT_OUT: Slot = Slot::StorageTexture(TextureFormat::R32Float);
    let effect = [Slot::Sampled, COLOR_OUT, Slot::ReadBuffer, Slot::Uniform];
    let with_aux = |aux: Slot| {
        let mut slots = effect.to_vec();
        slots.push(aux);
        slots
    };
    match kernel {
        Kernel::MaskColors => with_aux(Slot::ReadBuffer),
        Kernel::Shadow | Kernel::Composite | Kernel::Glow => with_aux(Slot::Sampled),
        Kernel::Saturation | Kernel::Pixelate => effect.to_vec(),
        Kernel::ConvertMaskToTexture => vec![Slot::ReadBuffer, FLOAT_OUT, Slot::Uniform],
        Kernel::ConvertProbabilitiesToMask => vec![Slot::ReadBuffer, Slot::ReadWriteBuffer, Slot::Uniform],
        Kernel::BlurColor => vec![Slot::Sampled, COLOR_OUT, Slot::Uniform],
        Kernel::BlurMask => vec![Slot::Sampled, FLOAT_OUT, Slot::Uniform],
    }
}

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
    }
}

fn layout_entry(binding: u32, slot: Slot) -> wgpu::BindGroupLayoutEntry {
    let ty = match slot {
        // r32float is not filterable; every compute kernel uses textureLoad.
        Slot::Sampled => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        Slot::StorageTexture(format) => wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: wgpu_format(format),
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        Slot::ReadBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        Slot::ReadWriteBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        Slot::Uniform => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
    };
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty,
        count: None,
    }
}

/// A cached texture with the views the pipeline binds.
pub struct WgpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    /// sRGB reinterpretation used by the display pass on sRGB surfaces.
    pub srgb_view: Option<wgpu::TextureView>,
    pub kind: TextureKind,
}

struct KernelPipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipelines: HashMap<Kernel, KernelPipeline>,
}

impl WgpuBackend {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            pipelines: HashMap::new(),
        }
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// Run `f` inside OutOfMemory + Validation error scopes and report the
    /// first captured error.
    fn scoped<T>(&self, f: impl FnOnce() -> T) -> (T, Option<String>) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        (value, validation.or(oom).map(|e| e.to_string()))
    }

    fn compile(&self, kernel: Kernel, limits: ExecutionLimits, linear_block: u32) -> PipelineResult<KernelPipeline> {
        let entry = kernel.entry_point();
        let source = kernel_source(kernel, limits, linear_block);
        if !source.contains(&format!("fn {entry}(")) {
            return Err(PipelineError::MissingKernel(entry));
        }

        let entries: Vec<_> = kernel_slots(kernel)
            .into_iter()
            .enumerate()
            .map(|(i, slot)| layout_entry(i as u32, slot))
            .collect();

        let (built, error) = self.scoped(|| {
            let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(entry),
                source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Owned(source)),
            });
            let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(entry),
                entries: &entries,
            });
            let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(entry),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: entry,
            });
            KernelPipeline { pipeline, layout }
        });

        match error {
            Some(reason) => Err(PipelineError::KernelCompile { kernel: entry, reason }),
            None => Ok(built),
        }
    }
}

impl GpuBackend for WgpuBackend {
    type Texture = WgpuTexture;
    type Buffer = wgpu::Buffer;
    type Commands = wgpu::CommandBuffer;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn device_limits(&self) -> DeviceLimits {
        DeviceLimits::from_wgpu(&self.device.limits())
    }

    fn compile_kernels(&mut self, limits: ExecutionLimits, linear_block: u32) -> PipelineResult<()> {
        for kernel in Kernel::ALL {
            let compiled = self.compile(kernel, limits, linear_block)?;
            tracing::debug!(kernel = kernel.entry_point(), "Compiled kernel");
            self.pipelines.insert(kernel, compiled);
        }
        let [gx, gy] = limits.group_2d();
        tracing::info!(
            kernels = self.pipelines.len(),
            group_x = gx,
            group_y = gy,
            linear_block,
            "Compute pipelines ready"
        );
        Ok(())
    }

    fn create_texture(&self, kind: TextureKind, width: u32, height: u32) -> PipelineResult<WgpuTexture> {
        let format = wgpu_format(kind.format());
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING;
        if kind.is_storage() {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        if kind.is_upload_target() {
            usage |= wgpu::TextureUsages::COPY_DST;
        }
        if kind == TextureKind::Output {
            usage |= wgpu::TextureUsages::COPY_SRC;
        }
        let srgb_formats = [wgpu::TextureFormat::Rgba8UnormSrgb];
        let view_formats: &[wgpu::TextureFormat] = if kind == TextureKind::Output {
            &srgb_formats
        } else {
            &[]
        };

        let (texture, error) = self.scoped(|| {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(kind.label()),
                size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats,
            })
        });
        if let Some(reason) = error {
            return Err(PipelineError::TextureAllocation { kind, width, height, reason });
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let srgb_view = (kind == TextureKind::Output).then(|| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                format: Some(wgpu::TextureFormat::Rgba8UnormSrgb),
                ..Default::default()
            })
        });
        Ok(WgpuTexture { texture, view, srgb_view, kind })
    }

    fn create_buffer(&self, kind: BufferKind, size: u64) -> PipelineResult<wgpu::Buffer> {
        let usage = if kind.is_uniform() {
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST
        } else {
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST
        };
        let (buffer, error) = self.scoped(|| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(kind.label()),
                size,
                usage,
                mapped_at_creation: false,
            })
        });
        match error {
            Some(reason) => Err(PipelineError::BufferAllocation { kind, size, reason }),
            None => Ok(buffer),
        }
    }

    fn write_buffer(&self, buffer: &wgpu::Buffer, data: &[u8]) {
        self.queue.write_buffer(buffer, 0, data);
    }

    fn write_texture(&self, texture: &WgpuTexture, width: u32, height: u32, data: &[u8]) {
        let bpp = texture.kind.format().bytes_per_pixel();
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout { offset: 0, bytes_per_row: Some(width * bpp), rows_per_image: Some(height) },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
    }

    fn encode(&self, plan: &FramePlan, cache: &ResourceCache<Self>) -> PipelineResult<wgpu::CommandBuffer> {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("effect_frame"),
        });

        for pass in &plan.passes {
            let entry = pass.kernel.entry_point();
            let kernel = self
                .pipelines
                .get(&pass.kernel)
                .ok_or(PipelineError::MissingKernel(entry))?;

            for step in &pass.steps {
                let mut entries = Vec::with_capacity(step.bindings.len());
                for (i, binding) in step.bindings.iter().enumerate() {
                    let resource = match binding {
                        Binding::Texture(h) => wgpu::BindingResource::TextureView(&cache.texture(*h)?.view),
                        Binding::Buffer(h) => cache.buffer(*h)?.as_entire_binding(),
                    };
                    entries.push(wgpu::BindGroupEntry { binding: i as u32, resource });
                }
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(entry),
                    layout: &kernel.layout,
                    entries: &entries,
                });

                let [x, y, z] = step.dispatch.workgroups();
                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(entry),
                    timestamp_writes: None,
                });
                cpass.set_pipeline(&kernel.pipeline);
                cpass.set_bind_group(0, &bind_group, &[]);
                cpass.dispatch_workgroups(x, y, z);
            }
        }

        Ok(encoder.finish())
    }

    fn submit(&self, commands: wgpu::CommandBuffer) {
        self.queue.submit(Some(commands));
    }
}

/// Render program that draws the output texture over the paint rect.
pub struct DisplayPipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    srgb_target: bool,
}

impl DisplayPipeline {
    pub fn new(device: &wgpu::Device, target_format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("display_shader"),
            source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(DISPLAY_WGSL)),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("display_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("display_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("display_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vertexFunc",
                buffers: &[],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fragmentFunc",
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("display_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            pipeline,
            layout,
            sampler,
            srgb_target: target_format.is_srgb(),
        }
    }

    /// Bind the output texture. On sRGB targets the sRGB view is sampled so
    /// the camera's gamma-encoded bytes reach the screen unchanged.
    pub fn bind_group(&self, device: &wgpu::Device, output: &WgpuTexture) -> wgpu::BindGroup {
        let view = match (&output.srgb_view, self.srgb_target) {
            (Some(srgb), true) => srgb,
            _ => &output.view,
        };
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("display_bind_group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
            ],
        })
    }

    pub fn draw<'a>(&'a self, render_pass: &mut wgpu::RenderPass<'a>, bind_group: &'a wgpu::BindGroup) {
        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, bind_group, &[]);
        render_pass.draw(0..4, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ExecutionLimits {
        ExecutionLimits::resolve(32, 256, DeviceLimits::default()).unwrap()
    }

    #[test]
    fn every_kernel_source_has_its_entry_point() {
        for kernel in Kernel::ALL {
            let src = kernel_source(kernel, limits(), 256);
            assert!(src.contains(&format!("fn {}(", kernel.entry_point())), "{kernel:?}");
            assert!(!src.contains("WG_"), "{kernel:?} still has placeholders");
        }
    }

    #[test]
    fn group_shape_is_baked_in() {
        let src = kernel_source(Kernel::Shadow, limits(), 256);
        assert!(src.contains("@workgroup_size(32, 8)"));
        let src = kernel_source(Kernel::ConvertProbabilitiesToMask, limits(), 128);
        assert!(src.contains("@workgroup_size(128)"));
    }

    #[test]
    fn slot_count_matches_declared_bindings() {
        for kernel in Kernel::ALL {
            let src = kernel_source(kernel, limits(), 256);
            let declared = src.matches("@binding(").count();
            assert_eq!(declared, kernel_slots(kernel).len(), "{kernel:?}");
        }
    }
}
