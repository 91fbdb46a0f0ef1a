//! LFO-modulated short delay.

use std::f32::consts::TAU;

use super::StereoEffect;

pub struct Flanger {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write: usize,
    phase: f32,
    phase_step: f32,
    center: f32,
    depth: f32,
}

impl Flanger {
    /// `center` and `depth` are in seconds, `rate_hz` is the LFO frequency.
    pub fn new(sample_rate: u32, center: f32, depth: f32, rate_hz: f32) -> Self {
        let sr = sample_rate as f32;
        let center = center.max(0.0) * sr;
        let depth = depth.clamp(0.0, center.max(0.0) / sr) * sr;
        // Room for the deepest excursion plus the interpolation neighbour
        let len = (center + depth).ceil() as usize + 2;
        Self {
            buffer_l: vec![0.0; len],
            buffer_r: vec![0.0; len],
            write: 0,
            phase: 0.0,
            phase_step: rate_hz.max(0.0) / sr,
            center,
            depth,
        }
    }

    #[inline]
    fn read(buffer: &[f32], position: f32) -> f32 {
        let i0 = position as usize % buffer.len();
        let i1 = (i0 + 1) % buffer.len();
        let frac = position.fract();
        buffer[i0] + (buffer[i1] - buffer[i0]) * frac
    }
}

impl StereoEffect for Flanger {
    #[inline]
    fn process(&mut self, input: (f32, f32)) -> (f32, f32) {
        let len = self.buffer_l.len();
        self.buffer_l[self.write] = input.0;
        self.buffer_r[self.write] = input.1;

        let delay = self.center + self.depth * (TAU * self.phase).sin();
        let position = self.write as f32 + len as f32 - delay;
        let out = (
            Self::read(&self.buffer_l, position),
            Self::read(&self.buffer_r, position),
        );

        self.write = (self.write + 1) % len;
        self.phase += self.phase_step;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        out
    }

    fn reset(&mut self) {
        self.buffer_l.fill(0.0);
        self.buffer_r.fill(0.0);
        self.write = 0;
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impulse_arrives_near_center_delay() {
        // 5 ms center at 1 kHz = 5 frames; LFO frozen at phase 0
        let mut flanger = Flanger::new(1000, 0.005, 0.002, 0.0);
        let mut out = vec![flanger.process((1.0, 1.0))];
        for _ in 0..10 {
            out.push(flanger.process((0.0, 0.0)));
        }
        assert!((out[5].0 - 1.0).abs() < 1e-6);
        assert!(out[4].0.abs() < 1e-6);
    }

    #[test]
    fn test_output_is_bounded() {
        let mut flanger = Flanger::new(44_100, 0.005, 0.002, 0.5);
        for n in 0..44_100 {
            let x = (n as f32 * 0.05).sin();
            let (l, r) = flanger.process((x, x));
            assert!(l.abs() <= 1.0 + 1e-5 && r.abs() <= 1.0 + 1e-5);
        }
    }
}
