//! The audio graph.
//!
//! ```text
//! deck A voice -> channel strip -> meter -> effect send --+
//!                                                         +-> master EQ -> meter -> output, recorder tap
//! deck B voice -> channel strip -> meter -> effect send --+
//! ```
//!
//! [`RenderGraph::render`] is called from the audio callback. It never locks
//! and never allocates: control changes arrive as snapshots over lock-free
//! rings and are applied at block boundaries.

pub(crate) mod feed;
mod voice;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use voice::DeckVoice;

use crate::config::EngineConfig;
use crate::context::AudioContext;
use crate::deck::{DeckFeed, DeckId};
use crate::dsp::{AtomicLevel, LevelMeter};
use crate::effect::EffectChain;
use crate::mixer::{ChannelStrip, MasterBus, MixerFeed, MixerState};
use crate::recorder::RecordTap;

/// Largest block rendered between snapshot checks.
pub const MAX_BLOCK_FRAMES: usize = 128;

/// Meter readings published by the renderer.
#[derive(Debug, Default)]
pub struct Levels {
    decks: [AtomicLevel; 2],
    master: AtomicLevel,
}

impl Levels {
    pub fn deck(&self, deck: DeckId) -> f32 {
        self.decks[deck.index()].load()
    }

    pub fn master(&self) -> f32 {
        self.master.load()
    }

    pub fn readings(&self) -> LevelReadings {
        LevelReadings {
            decks: [self.decks[0].load(), self.decks[1].load()],
            master: self.master.load(),
        }
    }
}

/// Display levels in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LevelReadings {
    pub decks: [f32; 2],
    pub master: f32,
}

/// One deck's path from voice to master.
struct ChannelPath {
    voice: DeckVoice,
    strip: ChannelStrip,
    meter: LevelMeter,
    effects: EffectChain,
}

impl ChannelPath {
    fn sync(&mut self) {
        if self.voice.sync() {
            let snapshot = self.voice.snapshot();
            self.effects.set_active(snapshot.effect);
            self.effects.set_wet(snapshot.wet);
        }
    }

    #[inline]
    fn process(&mut self, now: f64) -> (f32, f32) {
        let dry = self.voice.next_frame(now);
        let post_fader = self.strip.process(dry);
        self.meter.push(post_fader);
        self.effects.process(post_fader)
    }
}

/// Everything the audio callback owns.
pub struct RenderGraph {
    ctx: AudioContext,
    paths: [ChannelPath; 2],
    master: MasterBus,
    mixer: MixerFeed,
    levels: Arc<Levels>,
    tap: RecordTap,
}

impl RenderGraph {
    pub fn new(
        ctx: &AudioContext,
        config: &EngineConfig,
        decks: [DeckFeed; 2],
        mixer: MixerFeed,
        tap: RecordTap,
        levels: Arc<Levels>,
    ) -> Self {
        let sample_rate = ctx.sample_rate();
        let ir = ctx.reverb_impulse();
        let paths = decks.map(|feed| ChannelPath {
            voice: DeckVoice::new(feed, sample_rate, config.mixer.declick_ms / 1000.0),
            strip: ChannelStrip::new(sample_rate, &config.mixer),
            meter: LevelMeter::new(config.mixer.meter_window),
            effects: EffectChain::new(sample_rate, Arc::clone(&ir), &config.effects),
        });
        Self {
            ctx: ctx.clone(),
            paths,
            master: MasterBus::new(sample_rate, &config.mixer),
            mixer,
            levels,
            tap,
        }
    }

    /// Fill an interleaved stereo buffer.
    pub fn render(&mut self, out: &mut [f32]) {
        self.render_interleaved(out, 2);
    }

    /// Fill an interleaved buffer with `channels` channels. Channels past the
    /// second are left silent; a mono device gets the average of both sides.
    pub fn render_interleaved(&mut self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        if channels == 0 || self.ctx.is_closed() {
            return;
        }
        for block in out.chunks_mut(MAX_BLOCK_FRAMES * channels) {
            self.render_block(block, channels);
        }
    }

    fn apply_mixer(&mut self, state: &MixerState) {
        let gains = state.channel_gains();
        for (i, path) in self.paths.iter_mut().enumerate() {
            path.strip.apply(&state.channels[i], gains[i]);
        }
        self.master.apply(&state.master_eq);
    }

    fn render_block(&mut self, block: &mut [f32], channels: usize) {
        if let Some(state) = self.mixer.snapshots.latest() {
            self.apply_mixer(&state);
        }
        for path in &mut self.paths {
            path.sync();
        }

        let frames = block.len() / channels;
        let start = self.ctx.advance(frames as u64);
        let sample_rate = self.ctx.sample_rate() as f64;

        for (i, frame) in block.chunks_exact_mut(channels).enumerate() {
            let now = (start + i as u64) as f64 / sample_rate;
            let a = self.paths[0].process(now);
            let b = self.paths[1].process(now);
            let out = self.master.process((a.0 + b.0, a.1 + b.1));

            if channels == 1 {
                frame[0] = (out.0 + out.1) * 0.5;
            } else {
                frame[0] = out.0;
                frame[1] = out.1;
            }
            self.tap.push(out);
        }

        for (i, path) in self.paths.iter().enumerate() {
            self.levels.decks[i].store(path.meter.display_level());
        }
        self.levels.master.store(self.master.meter().display_level());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::DeckEngine;
    use crate::mixer::MixerBus;
    use crate::recorder::Recorder;
    use crate::track::Track;

    const SR: u32 = 44_100;

    struct Rig {
        ctx: AudioContext,
        decks: [DeckEngine; 2],
        mixer: MixerBus,
        graph: RenderGraph,
        levels: Arc<Levels>,
        _recorder: Recorder,
    }

    fn rig() -> Rig {
        let ctx = AudioContext::new(SR);
        let config = EngineConfig::default();
        let (a, feed_a) = DeckEngine::new(DeckId::A, &ctx);
        let (b, feed_b) = DeckEngine::new(DeckId::B, &ctx);
        let (mixer, mixer_feed) = MixerBus::new();
        let (recorder, tap) = Recorder::new(&ctx, 1.0);
        let levels = Arc::new(Levels::default());
        let graph = RenderGraph::new(
            &ctx,
            &config,
            [feed_a, feed_b],
            mixer_feed,
            tap,
            Arc::clone(&levels),
        );
        Rig {
            ctx,
            decks: [a, b],
            mixer,
            graph,
            levels,
            _recorder: recorder,
        }
    }

    fn sine(freq: f32, seconds: f32) -> Track {
        let frames = (SR as f32 * seconds) as usize;
        let samples = (0..frames)
            .map(|n| 0.5 * (std::f32::consts::TAU * freq * n as f32 / SR as f32).sin())
            .collect();
        Track::new(vec![samples], SR).unwrap()
    }

    #[test]
    fn test_render_advances_timeline() {
        let mut rig = rig();
        let mut out = vec![1.0; 2 * 1000];
        rig.graph.render(&mut out);
        assert_eq!(rig.ctx.frames(), 1000);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_closed_context_renders_silence() {
        let mut rig = rig();
        let _ = rig.decks[0].load(sine(440.0, 1.0));
        rig.decks[0].play();
        rig.ctx.close();

        let mut out = vec![1.0; 2 * 512];
        rig.graph.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(rig.ctx.frames(), 0);
    }

    #[test]
    fn test_playing_deck_reaches_output() {
        let mut rig = rig();
        let _ = rig.decks[0].load(sine(440.0, 1.0));
        rig.decks[0].play();

        let mut out = vec![0.0; 2 * 8192];
        rig.graph.render(&mut out);
        let peak = out[8192..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.2, "peak {peak}");
        assert!(rig.levels.deck(DeckId::A) > 0.5);
        assert_eq!(rig.levels.deck(DeckId::B), 0.0);
        assert!(rig.levels.master() > 0.5);
        assert!((rig.decks[0].position() - 8192.0 / SR as f64).abs() < 1e-9);
    }

    #[test]
    fn test_crossfader_isolates_deck() {
        let mut rig = rig();
        for deck in &mut rig.decks {
            let _ = deck.load(sine(440.0, 1.0));
            deck.play();
        }
        rig.mixer.set_crossfader(1.0);

        let mut out = vec![0.0; 2 * 8192];
        rig.graph.render(&mut out);
        assert!(rig.levels.deck(DeckId::A) < 1e-3);
        assert!(rig.levels.deck(DeckId::B) > 0.5);
    }

    #[test]
    fn test_mono_device_gets_both_sides() {
        let mut rig = rig();
        let _ = rig.decks[0].load(sine(440.0, 1.0));
        rig.decks[0].play();

        let mut out = vec![0.0; 4096];
        rig.graph.render_interleaved(&mut out, 1);
        assert_eq!(rig.ctx.frames(), 4096);
        assert!(out[2048..].iter().any(|s| s.abs() > 0.1));
    }
}
