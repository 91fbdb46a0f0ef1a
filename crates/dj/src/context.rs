//! Shared rendering context.
//!
//! The context is the engine's sense of "now". Control code reads
//! [`AudioContext::current_time`], which is the end of the block the renderer
//! has most recently committed to. Anything published at that instant takes
//! effect on the next rendered block, so commands are sample-accurate with
//! respect to the timeline the listener hears.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::config::EffectsConfig;
use crate::effect::ImpulseResponse;

/// Handle to the audio timeline. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AudioContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    sample_rate: u32,
    frames_scheduled: AtomicU64,
    closed: AtomicBool,
    reverb_seconds: f32,
    reverb_decay: f32,
    reverb: OnceLock<Arc<ImpulseResponse>>,
}

impl AudioContext {
    /// Create a context at `sample_rate` with default effect settings.
    pub fn new(sample_rate: u32) -> Self {
        Self::with_effects(sample_rate, &EffectsConfig::default())
    }

    /// Create a context whose reverb impulse follows `effects`.
    pub fn with_effects(sample_rate: u32, effects: &EffectsConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                sample_rate: sample_rate.max(1),
                frames_scheduled: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                reverb_seconds: effects.reverb_seconds,
                reverb_decay: effects.reverb_decay,
                reverb: OnceLock::new(),
            }),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    /// Frames committed to the timeline so far.
    pub fn frames(&self) -> u64 {
        self.inner.frames_scheduled.load(Ordering::Acquire)
    }

    /// Current time on the audio timeline in seconds.
    pub fn current_time(&self) -> f64 {
        self.frames() as f64 / self.inner.sample_rate as f64
    }

    /// Commit `frames` more frames to the timeline and return the frame index
    /// at which they start. Called once per rendered block.
    pub fn advance(&self, frames: u64) -> u64 {
        self.inner
            .frames_scheduled
            .fetch_add(frames, Ordering::AcqRel)
    }

    /// Reverb impulse response shared by every deck. Synthesized on first use.
    pub fn reverb_impulse(&self) -> Arc<ImpulseResponse> {
        let inner = &self.inner;
        inner
            .reverb
            .get_or_init(|| {
                log::debug!(
                    "Synthesizing {:.1}s reverb impulse at {} Hz",
                    inner.reverb_seconds,
                    inner.sample_rate
                );
                Arc::new(ImpulseResponse::synthesize(
                    inner.sample_rate,
                    inner.reverb_seconds,
                    inner.reverb_decay,
                ))
            })
            .clone()
    }

    /// Stop the timeline. Rendering produces silence from here on.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            log::info!("Audio context closed at {:.3}s", self.current_time());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
