//! Tipos compartidos entre el planificador de frames y los backends.
//! Las estructuras `#[repr(C)]` deben coincidir con el layout de los uniforms WGSL.

/// Pixel formats the pipeline allocates. Colour images are stored as
/// 8-bit RGBA; single-channel images (mask texture, glow) as 32-bit float
/// so kernels can write them as storage textures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    R32Float,
}

impl TextureFormat {
    pub fn channels(self) -> usize {
        match self {
            TextureFormat::Rgba8Unorm => 4,
            TextureFormat::R32Float => 1,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        4
    }
}

/// Every texture slot in the cache. Frame-sized kinds follow the camera
/// resolution; mask-sized kinds follow the model resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// The current frame promoted to the GPU.
    Input,
    /// Render target of the main effect pass, sampled by the display pass.
    Output,
    /// Blur mode: input after the full separable blur.
    BlurredColor,
    /// Blur mode: horizontal half of the separable blur.
    BlurScratch,
    /// Glow mode: 0/1 person mask as a texture.
    MaskTexture,
    /// Glow mode: blurred mask.
    Glow,
    /// Glow mode: horizontal half of the mask blur.
    GlowScratch,
    /// Shadow mode replacement background.
    Background,
}

impl TextureKind {
    pub fn format(self) -> TextureFormat {
        match self {
            TextureKind::MaskTexture | TextureKind::Glow | TextureKind::GlowScratch => {
                TextureFormat::R32Float
            }
            _ => TextureFormat::Rgba8Unorm,
        }
    }

    /// Written by a compute kernel (needs storage usage).
    pub fn is_storage(self) -> bool {
        !matches!(self, TextureKind::Input | TextureKind::Background)
    }

    /// Filled from the CPU.
    pub fn is_upload_target(self) -> bool {
        matches!(self, TextureKind::Input | TextureKind::Background)
    }

    pub fn label(self) -> &'static str {
        match self {
            TextureKind::Input => "input_texture",
            TextureKind::Output => "output_texture",
            TextureKind::BlurredColor => "blurred_color_texture",
            TextureKind::BlurScratch => "blur_scratch_texture",
            TextureKind::MaskTexture => "mask_texture",
            TextureKind::Glow => "glow_texture",
            TextureKind::GlowScratch => "glow_scratch_texture",
            TextureKind::Background => "background_texture",
        }
    }
}

/// Which image a blur pass runs over.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlurTarget {
    Color,
    Mask,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlurAxis {
    Horizontal,
    Vertical,
}

impl BlurAxis {
    pub fn direction(self) -> [i32; 2] {
        match self {
            BlurAxis::Horizontal => [1, 0],
            BlurAxis::Vertical => [0, 1],
        }
    }
}

/// Every buffer slot in the cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// One `i32` class id per mask pixel.
    SegmentationMask,
    /// One `f32` foreground probability per mask pixel (sigmoid models).
    Probabilities,
    /// Class id to colour lookup, one `u32` per component.
    ColorTable,
    /// Per-frame [`MixParams`] uniform.
    MixParams,
    /// Per-half [`BlurParams`] uniform.
    BlurParams(BlurTarget, BlurAxis),
}

impl BufferKind {
    pub fn is_uniform(self) -> bool {
        matches!(self, BufferKind::MixParams | BufferKind::BlurParams(..))
    }

    pub fn label(self) -> &'static str {
        match self {
            BufferKind::SegmentationMask => "segmentation_mask",
            BufferKind::Probabilities => "probabilities",
            BufferKind::ColorTable => "color_table",
            BufferKind::MixParams => "mix_params",
            BufferKind::BlurParams(BlurTarget::Color, BlurAxis::Horizontal) => "blur_color_h_params",
            BufferKind::BlurParams(BlurTarget::Color, BlurAxis::Vertical) => "blur_color_v_params",
            BufferKind::BlurParams(BlurTarget::Mask, BlurAxis::Horizontal) => "blur_mask_h_params",
            BufferKind::BlurParams(BlurTarget::Mask, BlurAxis::Vertical) => "blur_mask_v_params",
        }
    }
}

/// Uniform shared by the effect kernels and both mask conversions.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MixParams {
    pub width: i32,
    pub height: i32,
    pub dx: f32,
    pub dy: f32,
    pub mask_width: i32,
    pub mask_height: i32,
    pub person_class: i32,
    pub threshold: f32,
}

/// Uniform for one half of a separable Gaussian blur.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlurParams {
    pub direction: [i32; 2],
    pub radius: i32,
    pub sigma: f32,
}

impl BlurParams {
    pub fn new(axis: BlurAxis, sigma: f32) -> Self {
        Self {
            direction: axis.direction(),
            radius: blur_radius(sigma),
            sigma,
        }
    }
}

/// Kernel half-width for a Gaussian of standard deviation `sigma`.
pub fn blur_radius(sigma: f32) -> i32 {
    (3.0 * sigma).ceil().max(1.0) as i32
}

/// The user's 2-D effect strength, each axis in `[-1, 1]`.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ControlOffset {
    pub dx: f32,
    pub dy: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_layouts_are_16_byte_multiples() {
        assert_eq!(std::mem::size_of::<MixParams>(), 32);
        assert_eq!(std::mem::size_of::<BlurParams>(), 16);
    }

    #[test]
    fn single_channel_kinds_use_float_storage() {
        assert_eq!(TextureKind::Glow.format(), TextureFormat::R32Float);
        assert_eq!(TextureKind::MaskTexture.format(), TextureFormat::R32Float);
        assert_eq!(TextureKind::Output.format(), TextureFormat::Rgba8Unorm);
        assert!(!TextureKind::Input.is_storage());
        assert!(TextureKind::Output.is_storage());
    }

    #[test]
    fn blur_radius_covers_three_sigma() {
        assert_eq!(blur_radius(6.0), 18);
        assert_eq!(blur_radius(24.0), 72);
        assert_eq!(blur_radius(0.1), 1);
    }
}
