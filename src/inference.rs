//! Segmentation inference seam.
//!
//! The worker only needs something that turns a model-sized image into a
//! mask-sized class or probability grid. [`KeyingModel`] is the built-in
//! engine: a chroma-key matte shaped like a segmentation network's output,
//! so the whole pipeline runs without external model runtimes.

use image::RgbaImage;
use rayon::prelude::*;

use crate::config::{ModelConfig, ModelFamily};
use crate::error::FrameError;

/// Raw model output, before any GPU work.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelOutput {
    /// One class id per mask pixel.
    Classes(Vec<i32>),
    /// One foreground probability per mask pixel.
    Probabilities(Vec<f32>),
}

impl ModelOutput {
    pub fn family(&self) -> ModelFamily {
        match self {
            ModelOutput::Classes(_) => ModelFamily::Softmax,
            ModelOutput::Probabilities(_) => ModelFamily::Sigmoid,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ModelOutput::Classes(v) => v.len(),
            ModelOutput::Probabilities(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Native-endian bytes, as uploaded into the mask or probability buffer.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ModelOutput::Classes(v) => bytemuck::cast_slice(v),
            ModelOutput::Probabilities(v) => bytemuck::cast_slice(v),
        }
    }
}

/// A segmentation model. Runs on the frame worker thread, outside any lock.
pub trait InferenceEngine: Send {
    /// Resolution the input image must be resized to.
    fn input_size(&self) -> (u32, u32);

    fn family(&self) -> ModelFamily;

    fn infer(&mut self, image: &RgbaImage) -> Result<ModelOutput, FrameError>;
}

/// Chroma distance keyer posing as a person-segmentation model.
#[derive(Clone, Debug)]
pub struct KeyingModel {
    input: (u32, u32),
    mask: (u32, u32),
    family: ModelFamily,
    person_class: i32,
    threshold: f32,
    key_chroma: [f32; 2],
    tolerance: f32,
    softness: f32,
}

fn chroma(rgb: [u8; 3]) -> [f32; 2] {
    let [r, g, b] = rgb.map(|c| c as f32 / 255.0);
    let cb = -0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    [cb, cr]
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

impl KeyingModel {
    pub fn new(config: &ModelConfig, key: [u8; 3]) -> Self {
        Self {
            input: (config.input_width, config.input_height),
            mask: (config.mask_width, config.mask_height),
            family: config.family,
            person_class: config.person_class,
            threshold: config.probability_threshold,
            key_chroma: chroma(key),
            tolerance: 0.12,
            softness: 0.06,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f32, softness: f32) -> Self {
        self.tolerance = tolerance.max(0.0);
        self.softness = softness.max(1e-4);
        self
    }

    /// Foreground probability of one pixel.
    pub fn foreground(&self, rgb: [u8; 3]) -> f32 {
        let [cb, cr] = chroma(rgb);
        let d = ((cb - self.key_chroma[0]).powi(2) + (cr - self.key_chroma[1]).powi(2)).sqrt();
        smoothstep(self.tolerance, self.tolerance + self.softness, d)
    }

    fn probabilities(&self, image: &RgbaImage) -> Vec<f32> {
        let (iw, ih) = image.dimensions();
        let (mw, mh) = self.mask;
        let mut out = vec![0.0f32; mw as usize * mh as usize];
        out.par_chunks_mut(mw as usize)
            .enumerate()
            .for_each(|(my, row)| {
                let sy = ((my as u64 * ih as u64) / mh as u64).min(ih as u64 - 1) as u32;
                for (mx, p) in row.iter_mut().enumerate() {
                    let sx = ((mx as u64 * iw as u64) / mw as u64).min(iw as u64 - 1) as u32;
                    let px = image.get_pixel(sx, sy);
                    *p = self.foreground([px[0], px[1], px[2]]);
                }
            });
        out
    }
}

impl InferenceEngine for KeyingModel {
    fn input_size(&self) -> (u32, u32) {
        self.input
    }

    fn family(&self) -> ModelFamily {
        self.family
    }

    fn infer(&mut self, image: &RgbaImage) -> Result<ModelOutput, FrameError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(FrameError::Inference("empty input image".into()));
        }
        let probabilities = self.probabilities(image);
        Ok(match self.family {
            ModelFamily::Sigmoid => ModelOutput::Probabilities(probabilities),
            ModelFamily::Softmax => ModelOutput::Classes(
                probabilities
                    .into_iter()
                    .map(|p| if p > self.threshold { self.person_class } else { 0 })
                    .collect(),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const KEY: [u8; 3] = [0, 177, 64];

    fn config(family: ModelFamily) -> ModelConfig {
        ModelConfig {
            input_width: 8,
            input_height: 8,
            mask_width: 4,
            mask_height: 4,
            family,
            ..ModelConfig::default()
        }
    }

    fn half_keyed() -> RgbaImage {
        RgbaImage::from_fn(8, 8, |x, _| {
            if x < 4 {
                Rgba([KEY[0], KEY[1], KEY[2], 255])
            } else {
                Rgba([200, 60, 60, 255])
            }
        })
    }

    #[test]
    fn key_colour_is_background() {
        let model = KeyingModel::new(&config(ModelFamily::Sigmoid), KEY);
        assert_eq!(model.foreground(KEY), 0.0);
        assert_eq!(model.foreground([200, 60, 60]), 1.0);
    }

    #[test]
    fn softmax_family_emits_person_class() {
        let mut model = KeyingModel::new(&config(ModelFamily::Softmax), KEY);
        let ModelOutput::Classes(classes) = model.infer(&half_keyed()).unwrap() else {
            panic!("expected classes");
        };
        assert_eq!(classes.len(), 16);
        assert_eq!(&classes[0..4], &[0, 0, 15, 15]);
    }

    #[test]
    fn sigmoid_family_emits_probabilities() {
        let mut model = KeyingModel::new(&config(ModelFamily::Sigmoid), KEY);
        let out = model.infer(&half_keyed()).unwrap();
        assert_eq!(out.family(), ModelFamily::Sigmoid);
        assert_eq!(out.as_bytes().len(), 16 * 4);
    }

    #[test]
    fn empty_image_is_a_frame_error() {
        let mut model = KeyingModel::new(&config(ModelFamily::Softmax), KEY);
        assert!(matches!(model.infer(&RgbaImage::new(0, 0)), Err(FrameError::Inference(_))));
    }
}
