//! Audio-thread side of the mixer.
//!
//! Gains are smoothed per sample. Filter and EQ settings are smoothed at
//! control rate (every [`CONTROL_INTERVAL`] frames) and coefficients are only
//! recomputed when a smoothed value has actually moved.

use std::f32::consts::FRAC_1_SQRT_2;

use super::{ChannelSettings, EqBands};
use crate::config::MixerConfig;
use crate::dsp::{BiquadCoeffs, BiquadState, LevelMeter, Smoother};

/// Frames between filter/EQ coefficient updates.
pub const CONTROL_INTERVAL: usize = 32;

/// Filter sweep endpoints in Hz.
const LOWPASS_OPEN_HZ: f32 = 22050.0;
const LOWPASS_CLOSED_HZ: f32 = 20.0;
const HIGHPASS_OPEN_HZ: f32 = 10.0;
const HIGHPASS_CLOSED_HZ: f32 = 20000.0;

/// Low-pass and high-pass corner frequencies for a bipolar filter value.
///
/// Negative values sweep the low-pass from 22050 Hz down to 20 Hz, positive
/// values sweep the high-pass from 10 Hz up to 20 kHz. Both sweeps are
/// exponential so the knob feels even across octaves.
pub fn filter_cutoffs(value: f32) -> (f32, f32) {
    let value = value.clamp(-1.0, 1.0);
    let lowpass = if value < 0.0 {
        LOWPASS_OPEN_HZ * (LOWPASS_CLOSED_HZ / LOWPASS_OPEN_HZ).powf(-value)
    } else {
        LOWPASS_OPEN_HZ
    };
    let highpass = if value > 0.0 {
        HIGHPASS_OPEN_HZ * (HIGHPASS_CLOSED_HZ / HIGHPASS_OPEN_HZ).powf(value)
    } else {
        HIGHPASS_OPEN_HZ
    };
    (lowpass, highpass)
}

fn ms(value: f32) -> f32 {
    value / 1000.0
}

/// High shelf, mid peak and low shelf in series.
struct ThreeBandEq {
    sample_rate: f32,
    low_hz: f32,
    mid_hz: f32,
    mid_q: f32,
    high_hz: f32,
    gains: [Smoother; 3],
    applied: [f32; 3],
    coeffs: [BiquadCoeffs; 3],
    states: [BiquadState; 3],
}

impl ThreeBandEq {
    fn new(sample_rate: f32, config: &MixerConfig) -> Self {
        let control_rate = sample_rate / CONTROL_INTERVAL as f32;
        let smoother = Smoother::new(0.0, ms(config.param_smoothing_ms), control_rate);
        Self {
            sample_rate,
            low_hz: config.low_shelf_hz,
            mid_hz: config.mid_peak_hz,
            mid_q: config.mid_q,
            high_hz: config.high_shelf_hz,
            gains: [smoother; 3],
            applied: [0.0; 3],
            coeffs: [BiquadCoeffs::passthrough(); 3],
            states: [BiquadState::default(); 3],
        }
    }

    fn set(&mut self, bands: &EqBands) {
        self.gains[0].set_target(bands.high);
        self.gains[1].set_target(bands.mid);
        self.gains[2].set_target(bands.low);
    }

    fn update(&mut self) {
        let [high, mid, low] = [
            self.gains[0].next(),
            self.gains[1].next(),
            self.gains[2].next(),
        ];
        if [high, mid, low] == self.applied {
            return;
        }
        self.coeffs = [
            BiquadCoeffs::high_shelf(self.high_hz, high, self.sample_rate),
            BiquadCoeffs::peaking(self.mid_hz, mid, self.mid_q, self.sample_rate),
            BiquadCoeffs::low_shelf(self.low_hz, low, self.sample_rate),
        ];
        self.applied = [high, mid, low];
    }

    #[inline]
    fn process(&mut self, mut x: (f32, f32)) -> (f32, f32) {
        for (state, coeffs) in self.states.iter_mut().zip(&self.coeffs) {
            x = state.process(x, coeffs);
        }
        x
    }
}

/// One deck's channel: trim, filter pair, three-band EQ, fader.
pub struct ChannelStrip {
    sample_rate: f32,
    trim: Smoother,
    gain: Smoother,
    filter: Smoother,
    applied_filter: Option<f32>,
    lowpass: BiquadCoeffs,
    highpass: BiquadCoeffs,
    lowpass_state: BiquadState,
    highpass_state: BiquadState,
    eq: ThreeBandEq,
    countdown: usize,
}

impl ChannelStrip {
    pub fn new(sample_rate: u32, config: &MixerConfig) -> Self {
        let sr = sample_rate as f32;
        let control_rate = sr / CONTROL_INTERVAL as f32;
        Self {
            sample_rate: sr,
            trim: Smoother::new(1.0, ms(config.param_smoothing_ms), sr),
            gain: Smoother::new(0.0, ms(config.gain_smoothing_ms), sr),
            filter: Smoother::new(0.0, ms(config.param_smoothing_ms), control_rate),
            applied_filter: None,
            lowpass: BiquadCoeffs::passthrough(),
            highpass: BiquadCoeffs::passthrough(),
            lowpass_state: BiquadState::default(),
            highpass_state: BiquadState::default(),
            eq: ThreeBandEq::new(sr, config),
            countdown: 0,
        }
    }

    /// Retarget every parameter. `gain` is fader times crossfader.
    pub fn apply(&mut self, settings: &ChannelSettings, gain: f32) {
        self.trim.set_target(settings.trim);
        self.filter.set_target(settings.filter);
        self.eq.set(&settings.eq);
        self.gain.set_target(gain);
    }

    /// Current smoothed fader gain.
    pub fn gain(&self) -> f32 {
        self.gain.value()
    }

    fn update_coefficients(&mut self) {
        let filter = self.filter.next();
        if self.applied_filter != Some(filter) {
            let (lp, hp) = filter_cutoffs(filter);
            self.lowpass = BiquadCoeffs::lowpass(lp, FRAC_1_SQRT_2, self.sample_rate);
            self.highpass = BiquadCoeffs::highpass(hp, FRAC_1_SQRT_2, self.sample_rate);
            self.applied_filter = Some(filter);
        }
        self.eq.update();
    }

    #[inline]
    pub fn process(&mut self, input: (f32, f32)) -> (f32, f32) {
        if self.countdown == 0 {
            self.update_coefficients();
            self.countdown = CONTROL_INTERVAL;
        }
        self.countdown -= 1;

        let trim = self.trim.next();
        let x = (input.0 * trim, input.1 * trim);
        let x = self.lowpass_state.process(x, &self.lowpass);
        let x = self.highpass_state.process(x, &self.highpass);
        let x = self.eq.process(x);
        let gain = self.gain.next();
        (x.0 * gain, x.1 * gain)
    }
}

/// Master EQ and output meter.
pub struct MasterBus {
    eq: ThreeBandEq,
    meter: LevelMeter,
    countdown: usize,
}

impl MasterBus {
    pub fn new(sample_rate: u32, config: &MixerConfig) -> Self {
        Self {
            eq: ThreeBandEq::new(sample_rate as f32, config),
            meter: LevelMeter::new(config.meter_window),
            countdown: 0,
        }
    }

    pub fn apply(&mut self, eq: &EqBands) {
        self.eq.set(eq);
    }

    #[inline]
    pub fn process(&mut self, input: (f32, f32)) -> (f32, f32) {
        if self.countdown == 0 {
            self.eq.update();
            self.countdown = CONTROL_INTERVAL;
        }
        self.countdown -= 1;

        let out = self.eq.process(input);
        self.meter.push(out);
        out
    }

    pub fn meter(&self) -> &LevelMeter {
        &self.meter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44_100;

    fn sine_peak(strip: &mut ChannelStrip, freq: f32, frames: usize) -> f32 {
        let mut peak = 0.0f32;
        for n in 0..frames {
            let x = (std::f32::consts::TAU * freq * n as f32 / SR as f32).sin();
            let (l, _) = strip.process((x, x));
            if n > frames / 2 {
                peak = peak.max(l.abs());
            }
        }
        peak
    }

    #[test]
    fn test_filter_cutoffs() {
        assert_eq!(filter_cutoffs(0.0), (22050.0, 10.0));
        let (lp, hp) = filter_cutoffs(-1.0);
        assert!((lp - 20.0).abs() < 0.01);
        assert_eq!(hp, 10.0);
        let (lp, hp) = filter_cutoffs(1.0);
        assert_eq!(lp, 22050.0);
        assert!((hp - 20000.0).abs() < 0.5);
    }

    #[test]
    fn test_unity_strip_passes_midrange() {
        let mut strip = ChannelStrip::new(SR, &MixerConfig::default());
        strip.apply(&ChannelSettings::default(), 1.0);
        let peak = sine_peak(&mut strip, 1000.0, SR as usize);
        assert!((peak - 1.0).abs() < 0.02, "peak {peak}");
    }

    #[test]
    fn test_gain_ramps_instead_of_stepping() {
        let mut strip = ChannelStrip::new(SR, &MixerConfig::default());
        strip.apply(&ChannelSettings::default(), 1.0);
        let (first, _) = strip.process((1.0, 1.0));
        assert!(first < 0.01, "first sample {first}");
    }

    #[test]
    fn test_lowpass_sweep_removes_highs() {
        let mut strip = ChannelStrip::new(SR, &MixerConfig::default());
        let settings = ChannelSettings {
            filter: -0.8,
            ..ChannelSettings::default()
        };
        strip.apply(&settings, 1.0);
        let peak = sine_peak(&mut strip, 5000.0, SR as usize);
        assert!(peak < 0.05, "peak {peak}");
    }

    #[test]
    fn test_master_meters_output() {
        let mut master = MasterBus::new(SR, &MixerConfig::default());
        master.apply(&EqBands::default());
        for _ in 0..4096 {
            master.process((0.1, 0.1));
        }
        assert!((master.meter().display_level() - 0.4).abs() < 0.01);
    }
}
