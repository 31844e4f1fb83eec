//! Smoothed frames-per-second estimate.
//!
//! Purely observational: the compositor reports completed cycles and the UI
//! reads [`FpsCounter::fps`]. Nothing is gated on it.

use std::time::Instant;

use crate::config::FpsConfig;

#[derive(Clone, Debug)]
pub struct FpsCounter {
    smoothing: f64,
    min_interval: f64,
    window: f64,
    window_start: Option<Instant>,
    frames: u32,
    fps: f64,
}

impl FpsCounter {
    pub fn new(config: &FpsConfig) -> Self {
        Self {
            smoothing: config.smoothing,
            min_interval: config.min_interval_secs,
            window: config.window_secs,
            window_start: None,
            frames: 0,
            fps: 0.0,
        }
    }

    /// Open a counting window at `now`.
    pub fn start(&mut self, now: Instant) {
        self.window_start = Some(now);
        self.frames = 0;
    }

    /// Record one completed cycle.
    ///
    /// Samples shorter than the minimum interval only count frames; that
    /// keeps `frames / elapsed` from blowing up right after a reset.
    pub fn frame_completed(&mut self, now: Instant) {
        let Some(start) = self.window_start else {
            self.start(now);
            return;
        };
        self.frames += 1;
        let elapsed = now.saturating_duration_since(start).as_secs_f64();
        if elapsed >= self.min_interval {
            let current = self.frames as f64 / elapsed;
            self.fps = self.smoothing * self.fps + (1.0 - self.smoothing) * current;
        }
        if elapsed >= self.window {
            self.start(now);
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(&FpsConfig::default())
    }
}
