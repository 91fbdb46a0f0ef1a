//! Decoded, immutable PCM track.

use crate::decode::DecodeError;

/// Planar `f32` audio held fully in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
    frames: usize,
}

impl Track {
    /// Build a track from per-channel sample buffers.
    ///
    /// All channels must have the same length and there must be at least one
    /// frame. Channels beyond the second are kept but only the first two are
    /// rendered.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, DecodeError> {
        if sample_rate == 0 {
            return Err(DecodeError::InvalidLayout("sample rate is 0".into()));
        }
        let frames = channels.first().map(Vec::len).unwrap_or(0);
        if channels.iter().any(|c| c.len() != frames) {
            return Err(DecodeError::InvalidLayout(
                "channels have different lengths".into(),
            ));
        }
        if frames == 0 {
            return Err(DecodeError::Empty);
        }
        Ok(Self {
            channels,
            sample_rate,
            frames,
        })
    }

    /// Build a track from interleaved samples.
    pub fn from_interleaved(
        samples: &[f32],
        channel_count: usize,
        sample_rate: u32,
    ) -> Result<Self, DecodeError> {
        if channel_count == 0 || samples.len() % channel_count != 0 {
            return Err(DecodeError::InvalidLayout(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channel_count
            )));
        }
        let mut channels = vec![Vec::with_capacity(samples.len() / channel_count); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, sample) in channels.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
        Self::new(channels, sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Average of all channels.
    pub fn mono(&self) -> Vec<f32> {
        let scale = 1.0 / self.channels.len() as f32;
        (0..self.frames)
            .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() * scale)
            .collect()
    }

    /// Stereo frame at `position` seconds using linear interpolation.
    ///
    /// When `wrap` is set, the frame after the last one is the first frame;
    /// otherwise the last frame is held. Mono tracks are duplicated to both
    /// sides.
    #[inline]
    pub fn frame_at(&self, position: f64, wrap: bool) -> (f32, f32) {
        let index = position * self.sample_rate as f64;
        if index.is_nan() || index < 0.0 {
            return (0.0, 0.0);
        }
        let i0 = (index as usize).min(self.frames - 1);
        let frac = (index - i0 as f64).clamp(0.0, 1.0) as f32;
        let i1 = if i0 + 1 < self.frames {
            i0 + 1
        } else if wrap {
            0
        } else {
            i0
        };

        let left = &self.channels[0];
        let right = self.channels.get(1).unwrap_or(left);
        let lerp = |c: &[f32]| c[i0] + (c[i1] - c[i0]) * frac;
        (lerp(left), lerp(right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_and_ragged() {
        assert!(matches!(
            Track::new(vec![vec![]], 44_100),
            Err(DecodeError::Empty)
        ));
        assert!(Track::new(vec![vec![0.0; 3], vec![0.0; 2]], 44_100).is_err());
        assert!(Track::new(vec![vec![0.0; 3]], 0).is_err());
        assert!(Track::from_interleaved(&[0.0; 5], 2, 44_100).is_err());
    }

    #[test]
    fn test_interleaved_split() {
        let track = Track::from_interleaved(&[1.0, -1.0, 0.5, -0.5], 2, 10).unwrap();
        assert_eq!(track.frames(), 2);
        assert_eq!(track.channel(0).unwrap(), &[1.0, 0.5]);
        assert_eq!(track.channel(1).unwrap(), &[-1.0, -0.5]);
        assert!((track.duration() - 0.2).abs() < 1e-12);
        assert_eq!(track.mono(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_frame_interpolation() {
        let track = Track::new(vec![vec![0.0, 1.0, 0.0]], 1).unwrap();
        assert_eq!(track.frame_at(0.5, false), (0.5, 0.5));
        assert_eq!(track.frame_at(2.5, false), (0.0, 0.0));
        assert_eq!(track.frame_at(-1.0, false), (0.0, 0.0));

        let ramp = Track::new(vec![vec![1.0, 0.0, 0.5]], 1).unwrap();
        assert_eq!(ramp.frame_at(2.5, true), (0.75, 0.75));
        assert_eq!(ramp.frame_at(2.5, false), (0.5, 0.5));
    }
}
