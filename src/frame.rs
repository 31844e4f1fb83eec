//! A captured frame and its preparation for the model.

use std::time::Instant;

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::error::FrameError;

/// One colour image from the frame source. Owned by the worker for a
/// single cycle; only its pixels outlive it, as the GPU input texture.
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbaImage,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(image: RgbaImage, timestamp: Instant) -> Self {
        Self { image, timestamp }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Resize to the model's fixed input resolution.
    pub fn resized_for_model(&self, width: u32, height: u32) -> Result<RgbaImage, FrameError> {
        if self.width() == 0 || self.height() == 0 {
            return Err(FrameError::Resize(format!(
                "cannot resize empty {}x{} frame",
                self.width(),
                self.height()
            )));
        }
        if width == 0 || height == 0 {
            return Err(FrameError::Resize(format!("invalid model size {width}x{height}")));
        }
        if self.width() == width && self.height() == height {
            return Ok(self.image.clone());
        }
        Ok(imageops::resize(&self.image, width, height, FilterType::Triangle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resizes_to_model_resolution() {
        let frame = Frame::new(RgbaImage::new(640, 480), Instant::now());
        let resized = frame.resized_for_model(513, 513).unwrap();
        assert_eq!(resized.dimensions(), (513, 513));
    }

    #[test]
    fn empty_frames_fail_to_resize() {
        let frame = Frame::new(RgbaImage::new(0, 0), Instant::now());
        assert!(matches!(frame.resized_for_model(513, 513), Err(FrameError::Resize(_))));
    }
}
