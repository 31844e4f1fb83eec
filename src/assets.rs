//! Startup assets: the class colour table and the Shadow-mode background.

use std::path::Path;

use image::{Rgba, RgbaImage};

use crate::error::{PipelineError, PipelineResult};

/// One colour per segmentation class (PASCAL VOC order plus a spare row).
pub const PALETTE: [[u8; 3]; 22] = [
    [0, 0, 0],
    [60, 0, 0],
    [0, 60, 0],
    [60, 60, 0],
    [0, 0, 60],
    [60, 0, 60],
    [0, 60, 60],
    [60, 60, 60],
    [120, 0, 0],
    [0, 120, 0],
    [120, 120, 0],
    [0, 0, 120],
    [120, 0, 120],
    [0, 120, 120],
    [120, 120, 120],
    [240, 0, 0],
    [0, 240, 0],
    [240, 240, 0],
    [0, 0, 240],
    [240, 0, 240],
    [0, 240, 240],
    [240, 240, 240],
];

/// The palette flattened to one `u32` per component, as the mask-colour
/// kernel indexes it.
pub fn color_table() -> Vec<u32> {
    PALETTE
        .iter()
        .flat_map(|rgb| rgb.iter().map(|&c| c as u32))
        .collect()
}

/// Load the background image, or generate one when no path is configured.
/// A configured path that cannot be decoded is fatal.
pub fn load_background(path: Option<&Path>) -> PipelineResult<RgbaImage> {
    match path {
        Some(path) => {
            let img = image::open(path).map_err(|e| PipelineError::Asset {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            let img = img.to_rgba8();
            tracing::info!(
                path = %path.display(),
                width = img.width(),
                height = img.height(),
                "Loaded background"
            );
            Ok(img)
        }
        None => Ok(procedural_background(512, 512)),
    }
}

/// Warm diagonal gradient with a soft horizon band.
pub fn procedural_background(width: u32, height: u32) -> RgbaImage {
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    RgbaImage::from_fn(width, height, |x, y| {
        let u = x as f32 / w;
        let v = y as f32 / h;
        let band = (1.0 - ((v - 0.62) * 6.0).abs()).clamp(0.0, 1.0);
        let r = 40.0 + 180.0 * (1.0 - v) + 30.0 * band;
        let g = 60.0 + 90.0 * (1.0 - v) * (1.0 - 0.5 * u) + 40.0 * band;
        let b = 120.0 + 100.0 * v;
        Rgba([r.min(255.0) as u8, g.min(255.0) as u8, b.min(255.0) as u8, 255])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_nine_is_dark_green() {
        let table = color_table();
        assert_eq!(table.len(), PALETTE.len() * 3);
        assert_eq!(&table[27..30], &[0, 120, 0]);
    }

    #[test]
    fn missing_background_is_an_asset_error() {
        let err = load_background(Some(Path::new("/no/such/background.jpg"))).unwrap_err();
        assert!(matches!(err, PipelineError::Asset { .. }));
    }

    #[test]
    fn background_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bg.png");
        procedural_background(32, 16).save(&path).unwrap();
        let loaded = load_background(Some(&path)).unwrap();
        assert_eq!(loaded.dimensions(), (32, 16));
    }

    #[test]
    fn default_background_is_opaque() {
        let bg = load_background(None).unwrap();
        assert!(bg.pixels().all(|p| p[3] == 255));
    }
}
