//! Small DSP building blocks shared by the mixer, effects and analysis.

mod biquad;
mod meter;
mod smoother;

pub use biquad::{BiquadCoeffs, BiquadState};
pub use meter::{AtomicLevel, LevelMeter};
pub use smoother::Smoother;

/// Convert decibels to a linear gain factor.
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}
