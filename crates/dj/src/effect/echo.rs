//! Feedback echo.

use super::StereoEffect;

/// Single-tap stereo delay with feedback.
pub struct Echo {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    pos: usize,
    feedback: f32,
}

impl Echo {
    pub fn new(sample_rate: u32, delay_seconds: f32, feedback: f32) -> Self {
        let len = ((delay_seconds.max(0.0) * sample_rate as f32).round() as usize).max(1);
        Self {
            buffer_l: vec![0.0; len],
            buffer_r: vec![0.0; len],
            pos: 0,
            feedback: feedback.clamp(0.0, 0.95),
        }
    }

    /// Delay length in frames.
    pub fn delay_frames(&self) -> usize {
        self.buffer_l.len()
    }
}

impl StereoEffect for Echo {
    #[inline]
    fn process(&mut self, input: (f32, f32)) -> (f32, f32) {
        // The slot about to be overwritten holds the sample from one delay ago
        let delayed = (self.buffer_l[self.pos], self.buffer_r[self.pos]);
        self.buffer_l[self.pos] = input.0 + delayed.0 * self.feedback;
        self.buffer_r[self.pos] = input.1 + delayed.1 * self.feedback;
        self.pos += 1;
        if self.pos == self.buffer_l.len() {
            self.pos = 0;
        }
        delayed
    }

    fn reset(&mut self) {
        self.buffer_l.fill(0.0);
        self.buffer_r.fill(0.0);
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impulse_repeats_with_feedback() {
        let mut echo = Echo::new(1000, 0.5, 0.4);
        assert_eq!(echo.delay_frames(), 500);

        let mut out = Vec::new();
        out.push(echo.process((1.0, 1.0)));
        for _ in 1..1001 {
            out.push(echo.process((0.0, 0.0)));
        }
        assert_eq!(out[0], (0.0, 0.0));
        assert_eq!(out[500], (1.0, 1.0));
        assert!((out[1000].0 - 0.4).abs() < 1e-6);
        assert_eq!(out[250], (0.0, 0.0));
    }
}
