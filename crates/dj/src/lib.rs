//! Twindeck DJ engine
//!
//! A two-deck mixing engine: sample-accurate transport under changing rate,
//! direction and looping, BPM estimation, per-deck effects and a mixer with
//! crossfader curves, channel EQ/trim/filter and a recording tap.
//!
//! # Layout
//!
//! - Control plane: [`DeckEngine`], [`MixerBus`] and [`Recorder`], usually
//!   held together in a [`Console`] and driven by [`DjModule`].
//! - Render plane: [`RenderGraph`], fed by lock-free snapshots and run from
//!   the audio callback ([`AudioOutput`]).
//! - Both share one [`AudioContext`], the timeline every clock reads.

pub mod analysis;
pub mod clock;
pub mod config;
pub mod context;
pub mod deck;
pub mod decode;
pub mod dsp;
pub mod effect;
pub mod mixer;
pub mod module;
pub mod recorder;
pub mod render;
pub mod track;

pub use analysis::{AnalysisFailure, BpmConfig, BpmEstimator};
pub use clock::SampleClock;
pub use config::{ConfigError, ConfigManager, EngineConfig};
pub use context::AudioContext;
pub use deck::{DeckEngine, DeckId, DeckState, TransportState};
pub use decode::{DecodeError, Decoder, SymphoniaDecoder};
pub use effect::{EffectChain, EffectKind};
pub use mixer::{CrossfaderCurve, EqBand, MixerBus, MixerState};
pub use module::{
    AudioOutput, Console, DisplayFrame, DisplayTicker, DjCommand, DjEvent, DjModule, OutputError,
};
pub use recorder::{
    CaptureSink, OpenSink, PendingStop, Recorder, RecorderError, RecordingSummary, WavCaptureSink,
};
pub use render::{LevelReadings, Levels, RenderGraph};
pub use track::Track;
