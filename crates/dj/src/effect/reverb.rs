//! Convolution reverb.
//!
//! Uniformly partitioned overlap-save convolution. The impulse response is
//! split into blocks of `B` frames, each pre-transformed to a `2B`-point
//! spectrum once and shared by every deck. At run time each completed input
//! block is transformed, pushed onto a frequency-domain delay line and
//! multiplied against the partitions. Output lags input by one block.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::StereoEffect;

/// Partition size in frames.
pub const REVERB_BLOCK: usize = 512;

/// Cutoff of the one-pole filter that darkens the synthesized noise.
const NOISE_CUTOFF_HZ: f32 = 6000.0;
const NOISE_SEED: u64 = 0x7d1a_c0de;

/// Pre-partitioned stereo impulse response.
#[derive(Debug)]
pub struct ImpulseResponse {
    sample_rate: u32,
    block: usize,
    frames: usize,
    partitions: [Vec<Vec<Complex<f32>>>; 2],
}

impl ImpulseResponse {
    /// Partition explicit left/right responses into `block`-frame spectra.
    pub fn new(sample_rate: u32, left: &[f32], right: &[f32], block: usize) -> Self {
        let block = block.max(1);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(block * 2);
        let mut scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        let partitions = [
            Self::partition(left, block, fft.as_ref(), &mut scratch),
            Self::partition(right, block, fft.as_ref(), &mut scratch),
        ];
        Self {
            sample_rate,
            block,
            frames: left.len().max(right.len()),
            partitions,
        }
    }

    /// Decaying stereo noise: `seconds` long, envelope `(1 - t/len)^decay`,
    /// each channel normalized to unit energy. Deterministic for a given
    /// sample rate.
    pub fn synthesize(sample_rate: u32, seconds: f32, decay: f32) -> Self {
        let len = ((seconds.max(0.0) * sample_rate as f32) as usize).max(1);
        let k = 1.0 - (-std::f32::consts::TAU * NOISE_CUTOFF_HZ / sample_rate as f32).exp();

        let channel = |seed: u64| -> Vec<f32> {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut lp = 0.0f32;
            let mut samples: Vec<f32> = (0..len)
                .map(|i| {
                    let noise: f32 = rng.random_range(-1.0..1.0);
                    lp += k * (noise - lp);
                    let envelope = (1.0 - i as f32 / len as f32).powf(decay);
                    lp * envelope
                })
                .collect();
            let energy: f32 = samples.iter().map(|s| s * s).sum();
            if energy > 0.0 {
                let scale = energy.sqrt().recip();
                samples.iter_mut().for_each(|s| *s *= scale);
            }
            samples
        };

        let left = channel(NOISE_SEED);
        let right = channel(NOISE_SEED ^ 0x5bd1_e995);
        Self::new(sample_rate, &left, &right, REVERB_BLOCK)
    }

    fn partition(
        samples: &[f32],
        block: usize,
        fft: &dyn Fft<f32>,
        scratch: &mut [Complex<f32>],
    ) -> Vec<Vec<Complex<f32>>> {
        let mut parts: Vec<Vec<Complex<f32>>> = samples
            .chunks(block)
            .map(|chunk| {
                let mut spectrum = vec![Complex::default(); block * 2];
                for (bin, s) in spectrum.iter_mut().zip(chunk) {
                    bin.re = *s;
                }
                fft.process_with_scratch(&mut spectrum, scratch);
                spectrum
            })
            .collect();
        if parts.is_empty() {
            parts.push(vec![Complex::default(); block * 2]);
        }
        parts
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn block(&self) -> usize {
        self.block
    }
}

/// One channel of partitioned convolution against a shared response.
pub struct Convolver {
    ir: Arc<ImpulseResponse>,
    channel: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    window: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    history: Vec<Vec<Complex<f32>>>,
    head: usize,
    acc: Vec<Complex<f32>>,
    output: Vec<f32>,
    pos: usize,
}

impl Convolver {
    pub fn new(ir: Arc<ImpulseResponse>, channel: usize) -> Self {
        let block = ir.block;
        let size = block * 2;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let ifft = planner.plan_fft_inverse(size);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        let partitions = ir.partitions[channel.min(1)].len();
        Self {
            channel: channel.min(1),
            fft,
            ifft,
            scratch: vec![Complex::default(); scratch_len],
            window: vec![0.0; size],
            spectrum: vec![Complex::default(); size],
            history: vec![vec![Complex::default(); size]; partitions],
            head: 0,
            acc: vec![Complex::default(); size],
            output: vec![0.0; block],
            pos: 0,
            ir,
        }
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let block = self.output.len();
        let out = self.output[self.pos];
        self.window[block + self.pos] = input;
        self.pos += 1;
        if self.pos == block {
            self.pos = 0;
            self.convolve_block();
        }
        out
    }

    fn convolve_block(&mut self) {
        let block = self.output.len();
        let size = block * 2;

        for (bin, s) in self.spectrum.iter_mut().zip(&self.window) {
            *bin = Complex::new(*s, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let count = self.history.len();
        self.head = (self.head + count - 1) % count;
        self.history[self.head].copy_from_slice(&self.spectrum);

        self.acc.fill(Complex::default());
        let partitions = &self.ir.partitions[self.channel];
        for (p, h) in partitions.iter().enumerate() {
            let x = &self.history[(self.head + p) % count];
            for ((a, xk), hk) in self.acc.iter_mut().zip(x).zip(h) {
                *a += xk * hk;
            }
        }
        self.ifft.process_with_scratch(&mut self.acc, &mut self.scratch);

        let norm = 1.0 / size as f32;
        for (out, bin) in self.output.iter_mut().zip(&self.acc[block..]) {
            *out = bin.re * norm;
        }
        self.window.copy_within(block..size, 0);
    }

    pub fn reset(&mut self) {
        self.window.fill(0.0);
        for spectrum in &mut self.history {
            spectrum.fill(Complex::default());
        }
        self.output.fill(0.0);
        self.pos = 0;
    }
}

/// Stereo convolution reverb.
pub struct Reverb {
    left: Convolver,
    right: Convolver,
}

impl Reverb {
    pub fn new(ir: Arc<ImpulseResponse>) -> Self {
        Self {
            left: Convolver::new(ir.clone(), 0),
            right: Convolver::new(ir, 1),
        }
    }
}

impl StereoEffect for Reverb {
    #[inline]
    fn process(&mut self, input: (f32, f32)) -> (f32, f32) {
        (self.left.process(input.0), self.right.process(input.1))
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}
