//! Peak-interval tempo estimation.
//!
//! The estimator low-passes a mono mixdown to isolate the kick, picks peaks
//! above a fraction of the loudest sample, histograms the gaps between
//! consecutive peaks and reads the tempo off the most common gap. The result
//! is folded by octaves into the configured range.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dsp::{BiquadCoeffs, BiquadState};
use crate::track::Track;

/// Tuning for [`BpmEstimator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BpmConfig {
    /// Length of the centered excerpt that is analyzed.
    pub slice_seconds: f64,
    pub lowpass_hz: f32,
    /// Peak threshold as a fraction of the loudest filtered sample.
    pub threshold_ratio: f32,
    /// Stride used when scanning for the loudest sample.
    pub peak_stride: usize,
    pub min_peak_spacing_seconds: f64,
    /// Fewer peaks than this and the fallback tempo is used.
    pub min_peaks: usize,
    /// Histogram bucket width in samples.
    pub histogram_bin_samples: usize,
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub fallback_bpm: f64,
}

impl Default for BpmConfig {
    fn default() -> Self {
        Self {
            slice_seconds: 30.0,
            lowpass_hz: 150.0,
            threshold_ratio: 0.35,
            peak_stride: 100,
            min_peak_spacing_seconds: 0.3,
            min_peaks: 10,
            histogram_bin_samples: 500,
            min_bpm: 70.0,
            max_bpm: 180.0,
            fallback_bpm: 128.0,
        }
    }
}

/// Why an estimate could not be produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisFailure {
    #[error("no samples to analyze")]
    EmptyBuffer,
    #[error("only {found} peaks found")]
    TooFewPeaks { found: usize },
    #[error("no dominant peak interval")]
    NoDominantInterval,
    #[error("tempo is not a finite positive number")]
    NonFiniteTempo,
    #[error("analysis cancelled")]
    Cancelled,
}

/// Tempo estimator for decoded tracks.
#[derive(Debug, Clone, Default)]
pub struct BpmEstimator {
    config: BpmConfig,
}

impl BpmEstimator {
    pub fn new(config: BpmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BpmConfig {
        &self.config
    }

    /// Estimate the tempo of `track`. Never fails: anything that goes wrong
    /// yields the fallback tempo.
    pub fn estimate(&self, track: &Track) -> f64 {
        self.estimate_samples(&track.mono(), track.sample_rate(), None)
            .unwrap_or(self.config.fallback_bpm)
    }

    /// Estimate from mono samples, resolving failures to the fallback tempo.
    /// Returns `None` only when `cancel` was raised.
    pub fn estimate_samples(
        &self,
        samples: &[f32],
        sample_rate: u32,
        cancel: Option<&AtomicBool>,
    ) -> Option<f64> {
        match self.analyze(samples, sample_rate, cancel) {
            Ok(bpm) => Some(bpm),
            Err(AnalysisFailure::Cancelled) => None,
            Err(failure @ AnalysisFailure::TooFewPeaks { .. }) => {
                log::debug!(
                    "Tempo estimate fell back to {}: {}",
                    self.config.fallback_bpm,
                    failure
                );
                Some(self.config.fallback_bpm)
            }
            Err(failure) => {
                log::warn!(
                    "Tempo estimate fell back to {}: {}",
                    self.config.fallback_bpm,
                    failure
                );
                Some(self.config.fallback_bpm)
            }
        }
    }

    /// Run the estimator and report exactly why it failed, if it did.
    pub fn analyze(
        &self,
        samples: &[f32],
        sample_rate: u32,
        cancel: Option<&AtomicBool>,
    ) -> Result<f64, AnalysisFailure> {
        if samples.is_empty() || sample_rate == 0 {
            return Err(AnalysisFailure::EmptyBuffer);
        }
        let sr = sample_rate as f64;
        let slice = centered_slice(samples, (self.config.slice_seconds * sr) as usize);

        let coeffs = BiquadCoeffs::lowpass(
            self.config.lowpass_hz,
            std::f32::consts::FRAC_1_SQRT_2,
            sample_rate as f32,
        );
        let mut state = BiquadState::default();
        let mut filtered = Vec::with_capacity(slice.len());
        for chunk in slice.chunks(sample_rate as usize) {
            check_cancel(cancel)?;
            filtered.extend(chunk.iter().map(|s| state.process_mono(*s, &coeffs)));
        }

        let loudest = filtered
            .iter()
            .step_by(self.config.peak_stride.max(1))
            .fold(0.0f32, |max, s| max.max(s.abs()));
        if !(loudest > 0.0 && loudest.is_finite()) {
            return Err(AnalysisFailure::TooFewPeaks { found: 0 });
        }
        let threshold = loudest * self.config.threshold_ratio;

        let min_gap = (self.config.min_peak_spacing_seconds * sr) as usize;
        let peaks = pick_peaks(&filtered, threshold, min_gap);
        if peaks.len() < self.config.min_peaks {
            return Err(AnalysisFailure::TooFewPeaks { found: peaks.len() });
        }
        check_cancel(cancel)?;

        let interval = dominant_interval(&peaks, self.config.histogram_bin_samples)
            .ok_or(AnalysisFailure::NoDominantInterval)?;
        let bpm = 60.0 / (interval as f64 / sr);
        let bpm = fold_into_range(bpm, self.config.min_bpm, self.config.max_bpm)
            .ok_or(AnalysisFailure::NonFiniteTempo)?;

        log::debug!(
            "Estimated {} BPM from {} peaks (interval {} samples)",
            bpm.round(),
            peaks.len(),
            interval
        );
        Ok(bpm.round())
    }
}

fn check_cancel(cancel: Option<&AtomicBool>) -> Result<(), AnalysisFailure> {
    match cancel {
        Some(flag) if flag.load(Ordering::Acquire) => Err(AnalysisFailure::Cancelled),
        _ => Ok(()),
    }
}

/// Up to `len` samples from the middle of `samples`.
fn centered_slice(samples: &[f32], len: usize) -> &[f32] {
    if len == 0 || samples.len() <= len {
        return samples;
    }
    let start = (samples.len() - len) / 2;
    &samples[start..start + len]
}

/// Indices where `|x|` exceeds `threshold`, at least `min_gap` apart.
fn pick_peaks(samples: &[f32], threshold: f32, min_gap: usize) -> Vec<usize> {
    let mut peaks = Vec::new();
    let mut last: Option<usize> = None;
    for (i, s) in samples.iter().enumerate() {
        if s.abs() > threshold && last.map_or(true, |l| i - l >= min_gap) {
            peaks.push(i);
            last = Some(i);
        }
    }
    peaks
}

/// Most common gap between consecutive peaks, quantized to `bin` samples.
/// Ties go to the shorter gap.
fn dominant_interval(peaks: &[usize], bin: usize) -> Option<usize> {
    let bin = bin.max(1);
    let mut histogram: BTreeMap<usize, usize> = BTreeMap::new();
    for pair in peaks.windows(2) {
        let bucket = ((pair[1] - pair[0]) as f64 / bin as f64).round() as usize;
        if bucket > 0 {
            *histogram.entry(bucket).or_default() += 1;
        }
    }

    let mut best: Option<(usize, usize)> = None;
    for (bucket, count) in histogram {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((bucket, count));
        }
    }
    best.map(|(bucket, _)| bucket * bin)
}

/// Double or halve `bpm` until it lies in `[min, max]`.
fn fold_into_range(mut bpm: f64, min: f64, max: f64) -> Option<f64> {
    if !(bpm.is_finite() && bpm > 0.0 && min > 0.0) {
        return None;
    }
    while bpm < min {
        bpm *= 2.0;
    }
    while bpm > max {
        bpm /= 2.0;
    }
    Some(bpm)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44_100;

    /// Decaying 60 Hz thumps at `bpm` for `seconds`.
    fn kick_track(bpm: f64, seconds: f64) -> Vec<f32> {
        let len = (seconds * SR as f64) as usize;
        let period = (60.0 / bpm * SR as f64) as usize;
        (0..len)
            .map(|i| {
                let t = (i % period) as f32 / SR as f32;
                (std::f32::consts::TAU * 60.0 * t).sin() * (-t * 30.0).exp()
            })
            .collect()
    }

    #[test]
    fn test_detects_120() {
        let estimator = BpmEstimator::default();
        let bpm = estimator.analyze(&kick_track(120.0, 20.0), SR, None).unwrap();
        assert_eq!(bpm, 120.0);
    }

    #[test]
    fn test_slow_tempo_folds_up() {
        let estimator = BpmEstimator::default();
        let bpm = estimator.analyze(&kick_track(60.0, 40.0), SR, None).unwrap();
        assert_eq!(bpm, 120.0);
    }

    #[test]
    fn test_silence_falls_back() {
        let estimator = BpmEstimator::default();
        let silence = vec![0.0; SR as usize * 5];
        assert_eq!(
            estimator.analyze(&silence, SR, None),
            Err(AnalysisFailure::TooFewPeaks { found: 0 })
        );
        assert_eq!(estimator.estimate_samples(&silence, SR, None), Some(128.0));
    }

    #[test]
    fn test_short_track_falls_back() {
        let estimator = BpmEstimator::default();
        let track = Track::new(vec![kick_track(120.0, 2.0)], SR).unwrap();
        assert_eq!(estimator.estimate(&track), 128.0);
    }

    #[test]
    fn test_cancel_stops_analysis() {
        let estimator = BpmEstimator::default();
        let flag = AtomicBool::new(true);
        assert_eq!(
            estimator.estimate_samples(&kick_track(120.0, 5.0), SR, Some(&flag)),
            None
        );
    }

    #[test]
    fn test_histogram_tie_prefers_shorter_gap() {
        // Gaps: 1000, 1000, 2000, 2000
        let peaks = [0, 1000, 2000, 4000, 6000];
        assert_eq!(dominant_interval(&peaks, 500), Some(1000));
    }

    #[test]
    fn test_fold_into_range() {
        assert_eq!(fold_into_range(45.0, 70.0, 180.0), Some(90.0));
        assert_eq!(fold_into_range(400.0, 70.0, 180.0), Some(100.0));
        assert_eq!(fold_into_range(0.0, 70.0, 180.0), None);
        assert_eq!(fold_into_range(f64::INFINITY, 70.0, 180.0), None);
    }

    #[test]
    fn test_centered_slice() {
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        assert_eq!(centered_slice(&samples, 4), &[3.0, 4.0, 5.0, 6.0]);
        assert_eq!(centered_slice(&samples, 20).len(), 10);
    }
}
