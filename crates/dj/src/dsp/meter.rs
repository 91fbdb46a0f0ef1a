//! RMS level metering.

use std::sync::atomic::{AtomicU32, Ordering};

/// Display scale applied to RMS before clamping to `[0, 1]`.
const DISPLAY_GAIN: f32 = 4.0;

/// Sliding-window RMS over the most recent `window` stereo frames.
///
/// Frames not yet seen count as silence, so the level rises from 0 as the
/// window fills.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    powers: Vec<f32>,
    cursor: usize,
    sum: f64,
}

impl LevelMeter {
    pub fn new(window: usize) -> Self {
        Self {
            powers: vec![0.0; window.max(1)],
            cursor: 0,
            sum: 0.0,
        }
    }

    #[inline]
    pub fn push(&mut self, frame: (f32, f32)) {
        let power = (frame.0 * frame.0 + frame.1 * frame.1) * 0.5;
        self.sum += power as f64 - self.powers[self.cursor] as f64;
        self.powers[self.cursor] = power;
        self.cursor += 1;
        if self.cursor == self.powers.len() {
            self.cursor = 0;
            // Recompute once per window so rounding error cannot accumulate
            self.sum = self.powers.iter().map(|p| *p as f64).sum();
        }
    }

    pub fn rms(&self) -> f32 {
        (self.sum.max(0.0) / self.powers.len() as f64).sqrt() as f32
    }

    /// RMS scaled for display and clamped to `[0, 1]`.
    pub fn display_level(&self) -> f32 {
        (self.rms() * DISPLAY_GAIN).clamp(0.0, 1.0)
    }

    pub fn reset(&mut self) {
        self.powers.fill(0.0);
        self.cursor = 0;
        self.sum = 0.0;
    }
}

/// `f32` level readable from any thread without locking.
#[derive(Debug, Default)]
pub struct AtomicLevel(AtomicU32);

impl AtomicLevel {
    pub fn store(&self, level: f32) {
        self.0.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}
