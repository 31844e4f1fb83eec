//! Pointer input to effect strength, and the live controls shared between
//! the UI thread and the compositor.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::ControlConfig;
use crate::gpu::effects::EffectMode;
use crate::gpu::types::ControlOffset;

/// Maps a pointer position around the pad centre to a [`ControlOffset`].
///
/// The vertical axis divides by `max_distance * vertical_divisor_factor`,
/// so on a portrait view the knob travels twice as far vertically for the
/// same change. This asymmetry is intentional.
#[derive(Clone, Debug)]
pub struct ControlPad {
    max_distance: f32,
    vertical_factor: f32,
    hide_after: Duration,
}

impl ControlPad {
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            max_distance: config.max_distance,
            vertical_factor: config.vertical_divisor_factor,
            hide_after: Duration::from_secs_f32(config.hide_after_secs.max(0.0)),
        }
    }

    fn divisors(&self) -> [f32; 2] {
        [self.max_distance, self.max_distance * self.vertical_factor]
    }

    /// `clamp((pointer - center) / divisor, -1, 1)` per axis.
    pub fn offset_for(&self, pointer: [f32; 2], center: [f32; 2]) -> ControlOffset {
        let [div_x, div_y] = self.divisors();
        ControlOffset {
            dx: ((pointer[0] - center[0]) / div_x).clamp(-1.0, 1.0),
            dy: ((pointer[1] - center[1]) / div_y).clamp(-1.0, 1.0),
        }
    }

    /// Where to draw the knob for `offset`.
    pub fn knob_position(&self, offset: ControlOffset, center: [f32; 2]) -> [f32; 2] {
        let [div_x, div_y] = self.divisors();
        [center[0] + offset.dx * div_x, center[1] + offset.dy * div_y]
    }

    /// The knob is hidden once the pad has been idle for `hide_after`. The
    /// offset itself is kept.
    pub fn is_visible(&self, last_used: Option<Instant>, now: Instant) -> bool {
        last_used.is_some_and(|t| now.saturating_duration_since(t) <= self.hide_after)
    }
}

fn pack(offset: ControlOffset) -> u64 {
    ((offset.dx.to_bits() as u64) << 32) | offset.dy.to_bits() as u64
}

fn unpack(bits: u64) -> ControlOffset {
    ControlOffset {
        dx: f32::from_bits((bits >> 32) as u32),
        dy: f32::from_bits(bits as u32),
    }
}

/// Mode and offset, written by the UI and read by the compositor at
/// encoding time. Each value is a single atomic word: readers always see a
/// whole offset, never one axis from an older write.
#[derive(Debug)]
pub struct Controls {
    mode: AtomicU8,
    offset: AtomicU64,
    last_used: Mutex<Option<Instant>>,
}

impl Controls {
    pub fn new(mode: EffectMode) -> Self {
        Self {
            mode: AtomicU8::new(mode.as_u8()),
            offset: AtomicU64::new(pack(ControlOffset::default())),
            last_used: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> EffectMode {
        EffectMode::from_u8(self.mode.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn set_mode(&self, mode: EffectMode) {
        let previous = self.mode.swap(mode.as_u8(), Ordering::Relaxed);
        if previous != mode.as_u8() {
            tracing::info!(mode = mode.label(), "Effect mode changed");
        }
    }

    pub fn offset(&self) -> ControlOffset {
        unpack(self.offset.load(Ordering::Relaxed))
    }

    pub fn set_offset(&self, offset: ControlOffset, now: Instant) {
        self.offset.store(pack(offset), Ordering::Relaxed);
        *self.last_used.lock() = Some(now);
    }

    pub fn last_used(&self) -> Option<Instant> {
        *self.last_used.lock()
    }
}

impl Default for Controls {
    fn default() -> Self {
        Self::new(EffectMode::default())
    }
}
