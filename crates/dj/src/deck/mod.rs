//! Deck transport, tempo and cue control.
//!
//! A [`DeckEngine`] lives on the control side. Every command settles pending
//! state (such as reaching the end of the track), updates the deck, and
//! publishes a [`DeckSnapshot`] that the renderer picks up at the start of its
//! next block. Reads never change state.

mod tap_tempo;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use serde::{Deserialize, Serialize};

pub use tap_tempo::{TapTempo, TAP_HISTORY, TAP_RESET_GAP};

use crate::analysis::AnalysisRequest;
use crate::clock::SampleClock;
use crate::context::AudioContext;
use crate::decode::{DecodeError, Decoder};
use crate::effect::EffectKind;
use crate::render::feed::{snapshot_channel, SnapshotReceiver, SnapshotSender, SNAPSHOT_CAPACITY};
use crate::track::Track;

/// Number of hot cue slots per deck.
pub const HOT_CUE_SLOTS: usize = 4;
/// Tempo assumed until analysis finishes.
pub const DEFAULT_BPM: f64 = 128.0;
pub const PITCH_RANGE: (f64, f64) = (0.5, 2.0);
pub const BEND_RANGE: (f64, f64) = (-0.5, 0.5);

/// Deck identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeckId {
    A,
    B,
}

impl DeckId {
    pub const ALL: [DeckId; 2] = [Self::A, Self::B];

    /// Get the deck as a numeric index (0 for A, 1 for B).
    pub fn index(&self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    /// Get the deck from a numeric index.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::A),
            1 => Some(Self::B),
            _ => None,
        }
    }

    /// Get the other deck.
    pub fn other(&self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl std::fmt::Display for DeckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

impl std::str::FromStr for DeckId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "a" | "A" | "1" => Ok(Self::A),
            "b" | "B" | "2" => Ok(Self::B),
            other => Err(format!("unknown deck '{}'", other)),
        }
    }
}

/// Transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportState {
    /// No track loaded.
    #[default]
    Empty,
    /// Track loaded and not moving.
    Paused,
    /// Track is playing.
    Playing,
}

/// What the renderer needs to play a deck.
#[derive(Debug, Clone)]
pub struct DeckSnapshot {
    pub track: Option<Arc<Track>>,
    pub clock: SampleClock,
    pub playing: bool,
    pub looping: bool,
    pub effect: EffectKind,
    pub wet: f32,
}

impl Default for DeckSnapshot {
    fn default() -> Self {
        Self {
            track: None,
            clock: SampleClock::new(0.0),
            playing: false,
            looping: false,
            effect: EffectKind::None,
            wet: 0.0,
        }
    }
}

/// Renderer end of a deck's links.
pub struct DeckFeed {
    pub(crate) snapshots: SnapshotReceiver<DeckSnapshot>,
    pub(crate) retired: Producer<Arc<Track>>,
}

/// Observable deck state at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckState {
    pub id: DeckId,
    pub transport: TransportState,
    pub position: f64,
    pub duration: f64,
    /// Signed playback rate.
    pub rate: f64,
    pub pitch: f64,
    pub bend: f64,
    pub sync_rate: f64,
    pub reverse: bool,
    pub looping: bool,
    pub bpm: f64,
    pub displayed_bpm: f64,
    pub analyzing: bool,
    pub hot_cues: [Option<f64>; HOT_CUE_SLOTS],
    pub effect: EffectKind,
    pub wet: f32,
}

/// Control side of one deck.
pub struct DeckEngine {
    id: DeckId,
    ctx: AudioContext,
    track: Option<Arc<Track>>,
    clock: SampleClock,
    transport: TransportState,
    pitch: f64,
    bend: f64,
    sync_rate: f64,
    reverse: bool,
    looping: bool,
    hot_cues: [Option<f64>; HOT_CUE_SLOTS],
    bpm: f64,
    bpm_is_manual: bool,
    analyzing: bool,
    generation: u64,
    effect: EffectKind,
    wet: f32,
    tap: TapTempo,
    snapshots: SnapshotSender<DeckSnapshot>,
    retired: Mutex<Consumer<Arc<Track>>>,
}

impl DeckEngine {
    /// Create an empty deck and the feed its renderer consumes.
    pub fn new(id: DeckId, ctx: &AudioContext) -> (Self, DeckFeed) {
        let (snapshots, snapshot_rx) = snapshot_channel(SNAPSHOT_CAPACITY);
        let (retired_tx, retired) = RingBuffer::new(SNAPSHOT_CAPACITY);
        let engine = Self {
            id,
            ctx: ctx.clone(),
            track: None,
            clock: SampleClock::new(0.0),
            transport: TransportState::Empty,
            pitch: 1.0,
            bend: 0.0,
            sync_rate: 1.0,
            reverse: false,
            looping: false,
            hot_cues: [None; HOT_CUE_SLOTS],
            bpm: 0.0,
            bpm_is_manual: false,
            analyzing: false,
            generation: 0,
            effect: EffectKind::None,
            wet: 0.0,
            tap: TapTempo::default(),
            snapshots,
            retired: Mutex::new(retired),
        };
        let feed = DeckFeed {
            snapshots: snapshot_rx,
            retired: retired_tx,
        };
        (engine, feed)
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    // Reads

    fn now(&self) -> f64 {
        self.ctx.current_time()
    }

    /// True when a non-looping deck has run off either end but no command has
    /// settled it yet.
    fn has_ended(&self, now: f64) -> bool {
        self.transport == TransportState::Playing
            && !self.looping
            && self.clock.has_left_track(now)
    }

    pub fn transport(&self) -> TransportState {
        if self.has_ended(self.now()) {
            TransportState::Paused
        } else {
            self.transport
        }
    }

    pub fn is_playing(&self) -> bool {
        self.transport() == TransportState::Playing
    }

    pub fn has_track(&self) -> bool {
        self.track.is_some()
    }

    pub fn track(&self) -> Option<&Arc<Track>> {
        self.track.as_ref()
    }

    /// Position in seconds, in `[0, duration)`.
    pub fn position(&self) -> f64 {
        let now = self.now();
        if self.has_ended(now) {
            0.0
        } else {
            self.clock.position_at(now)
        }
    }

    pub fn duration(&self) -> f64 {
        self.clock.duration()
    }

    /// Signed playback rate: `(pitch + bend + sync_rate - 1) * (reverse ? -1 : 1)`.
    pub fn rate(&self) -> f64 {
        let magnitude = self.pitch + self.bend + (self.sync_rate - 1.0);
        if self.reverse {
            -magnitude
        } else {
            magnitude
        }
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    pub fn bend(&self) -> f64 {
        self.bend
    }

    pub fn sync_rate(&self) -> f64 {
        self.sync_rate
    }

    pub fn is_reversed(&self) -> bool {
        self.reverse
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Track tempo before pitch and sync.
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Tempo as heard: `bpm * |rate|`.
    pub fn displayed_bpm(&self) -> f64 {
        self.bpm * self.rate().abs()
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn hot_cue(&self, slot: usize) -> Option<f64> {
        self.hot_cues.get(slot).copied().flatten()
    }

    pub fn effect(&self) -> EffectKind {
        self.effect
    }

    pub fn wet(&self) -> f32 {
        self.wet
    }

    pub fn state(&self) -> DeckState {
        DeckState {
            id: self.id,
            transport: self.transport(),
            position: self.position(),
            duration: self.duration(),
            rate: self.rate(),
            pitch: self.pitch,
            bend: self.bend,
            sync_rate: self.sync_rate,
            reverse: self.reverse,
            looping: self.looping,
            bpm: self.bpm,
            displayed_bpm: self.displayed_bpm(),
            analyzing: self.analyzing,
            hot_cues: self.hot_cues,
            effect: self.effect,
            wet: self.wet,
        }
    }

    // Commands

    /// Commit an end-of-track stop that has happened since the last command.
    fn settle(&mut self, now: f64) {
        if self.has_ended(now) {
            self.clock.park(0.0, now);
            self.transport = TransportState::Paused;
            log::debug!("Deck {}: reached end of track", self.id);
        }
    }

    fn publish(&mut self) {
        let snapshot = DeckSnapshot {
            track: self.track.clone(),
            clock: self.clock,
            playing: self.transport == TransportState::Playing,
            looping: self.looping,
            effect: self.effect,
            wet: self.wet,
        };
        self.snapshots.send(snapshot);
    }

    fn apply_rate(&mut self) {
        let now = self.now();
        self.settle(now);
        self.clock.set_rate(self.rate(), now);
        self.publish();
    }

    /// Replace the deck's track. Everything resets: paused at 0, pitch 1,
    /// no bend or sync, forward, not looping, hot cues cleared, no effect
    /// and tempo 128 until analysis reports.
    pub fn load(&mut self, track: Track) -> AnalysisRequest {
        let track = Arc::new(track);
        let now = self.now();

        self.generation += 1;
        self.clock = SampleClock::new(track.duration());
        self.clock.seek(0.0, now);
        self.transport = TransportState::Paused;
        self.pitch = 1.0;
        self.bend = 0.0;
        self.sync_rate = 1.0;
        self.reverse = false;
        self.looping = false;
        self.hot_cues = [None; HOT_CUE_SLOTS];
        self.bpm = DEFAULT_BPM;
        self.bpm_is_manual = false;
        self.analyzing = true;
        self.tap.reset();
        self.effect = EffectKind::None;
        self.wet = 0.0;
        self.track = Some(Arc::clone(&track));
        self.publish();

        log::info!(
            "Deck {}: loaded {:.2}s track ({} Hz, {} ch)",
            self.id,
            track.duration(),
            track.sample_rate(),
            track.channel_count()
        );

        AnalysisRequest {
            deck: self.id,
            generation: self.generation,
            track,
        }
    }

    /// Decode `bytes` and load the result. The deck is untouched on failure.
    pub fn load_bytes(
        &mut self,
        decoder: &dyn Decoder,
        bytes: Vec<u8>,
        extension: Option<&str>,
    ) -> Result<AnalysisRequest, DecodeError> {
        let track = decoder.decode(bytes, extension)?;
        Ok(self.load(track))
    }

    /// Remove the track. Any analysis in flight becomes stale.
    pub fn eject(&mut self) {
        if self.track.is_none() {
            return;
        }
        self.generation += 1;
        self.track = None;
        self.clock = SampleClock::new(0.0);
        self.transport = TransportState::Empty;
        self.hot_cues = [None; HOT_CUE_SLOTS];
        self.bpm = 0.0;
        self.bpm_is_manual = false;
        self.analyzing = false;
        self.publish();
        log::info!("Deck {}: ejected", self.id);
    }

    pub fn play(&mut self) {
        if self.track.is_none() {
            log::debug!("Deck {}: play ignored, no track loaded", self.id);
            return;
        }
        let now = self.now();
        self.settle(now);
        if self.transport == TransportState::Playing {
            return;
        }
        self.clock.set_rate(self.rate(), now);
        self.clock.start(now);
        self.transport = TransportState::Playing;
        self.publish();
        log::info!("Deck {}: playing from {:.2}s", self.id, self.clock.position_at(now));
    }

    pub fn pause(&mut self) {
        let now = self.now();
        self.settle(now);
        if self.transport != TransportState::Playing {
            return;
        }
        self.clock.pause(now);
        self.transport = TransportState::Paused;
        self.publish();
        log::info!("Deck {}: paused at {:.2}s", self.id, self.clock.position_at(now));
    }

    pub fn toggle_play(&mut self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Jump to `position` seconds, normalized into the track. Playback state
    /// is kept.
    pub fn seek(&mut self, position: f64) {
        if self.track.is_none() || !position.is_finite() {
            return;
        }
        let now = self.now();
        self.settle(now);
        self.clock.seek(position, now);
        self.publish();
        log::debug!("Deck {}: seek to {:.3}s", self.id, self.clock.position_at(now));
    }

    /// Pitch factor, clamped to `[0.5, 2.0]`.
    pub fn set_pitch(&mut self, pitch: f64) {
        if !pitch.is_finite() {
            return;
        }
        self.pitch = pitch.clamp(PITCH_RANGE.0, PITCH_RANGE.1);
        self.apply_rate();
    }

    /// Temporary rate offset for nudging, clamped to `[-0.5, 0.5]`.
    pub fn set_bend(&mut self, bend: f64) {
        if !bend.is_finite() {
            return;
        }
        self.bend = bend.clamp(BEND_RANGE.0, BEND_RANGE.1);
        self.apply_rate();
    }

    pub fn set_sync_rate(&mut self, sync_rate: f64) {
        if !(sync_rate.is_finite() && sync_rate > 0.0) {
            return;
        }
        self.sync_rate = sync_rate;
        self.apply_rate();
    }

    /// Match `target_bpm` by resetting pitch to 1 and setting the sync rate.
    /// Does nothing while the deck's own tempo is unknown.
    pub fn sync_to_bpm(&mut self, target_bpm: f64) -> bool {
        if self.bpm <= 0.0 || !(target_bpm.is_finite() && target_bpm > 0.0) {
            log::debug!("Deck {}: cannot sync, tempo unknown", self.id);
            return false;
        }
        self.sync_rate = target_bpm / self.bpm;
        self.pitch = 1.0;
        self.apply_rate();
        log::info!(
            "Deck {}: synced to {:.1} BPM (rate {:.4})",
            self.id,
            target_bpm,
            self.sync_rate
        );
        true
    }

    pub fn toggle_reverse(&mut self) {
        self.reverse = !self.reverse;
        self.apply_rate();
        log::debug!("Deck {}: reverse {}", self.id, self.reverse);
    }

    pub fn toggle_loop(&mut self) {
        let now = self.now();
        self.settle(now);
        self.clock.reanchor(now);
        self.looping = !self.looping;
        self.publish();
        log::debug!("Deck {}: loop {}", self.id, self.looping);
    }

    /// Jump to a stored cue, or store the current position if the slot is
    /// empty. Playback state is kept either way.
    pub fn trigger_hot_cue(&mut self, slot: usize) {
        if self.track.is_none() || slot >= HOT_CUE_SLOTS {
            return;
        }
        let now = self.now();
        self.settle(now);
        match self.hot_cues[slot] {
            Some(position) => {
                self.clock.seek(position, now);
                self.publish();
                log::info!("Deck {}: jumped to hot cue {}", self.id, slot + 1);
            }
            None => {
                let position = self.clock.position_at(now);
                self.hot_cues[slot] = Some(position);
                log::info!(
                    "Deck {}: hot cue {} set at {:.3}s",
                    self.id,
                    slot + 1,
                    position
                );
            }
        }
    }

    pub fn clear_hot_cue(&mut self, slot: usize) {
        if let Some(cue) = self.hot_cues.get_mut(slot) {
            if cue.take().is_some() {
                log::info!("Deck {}: hot cue {} cleared", self.id, slot + 1);
            }
        }
    }

    /// Register a tap at the current instant.
    pub fn tap_bpm(&mut self) -> Option<f64> {
        self.tap_bpm_at(Instant::now())
    }

    /// Register a tap at `at`. Once two taps are in, the tapped tempo becomes
    /// the deck's tempo and overrides analysis.
    pub fn tap_bpm_at(&mut self, at: Instant) -> Option<f64> {
        if self.track.is_none() {
            log::debug!("Deck {}: tap ignored, no track loaded", self.id);
            return None;
        }
        let bpm = self.tap.tap(at)?;
        self.bpm = bpm;
        self.bpm_is_manual = true;
        log::debug!("Deck {}: tapped {:.1} BPM", self.id, bpm);
        Some(bpm)
    }

    /// Set the tempo by hand. Overrides any pending analysis.
    pub fn set_bpm(&mut self, bpm: f64) {
        if self.track.is_none() || !(bpm.is_finite() && bpm > 0.0) {
            return;
        }
        self.bpm = bpm;
        self.bpm_is_manual = true;
    }

    /// Apply an analysis result. Returns false when `generation` is stale.
    pub fn complete_analysis(&mut self, generation: u64, bpm: f64) -> bool {
        if generation != self.generation || self.track.is_none() {
            log::debug!(
                "Deck {}: dropping stale analysis {} (current {})",
                self.id,
                generation,
                self.generation
            );
            return false;
        }
        self.analyzing = false;
        if self.bpm_is_manual {
            log::debug!("Deck {}: keeping manual tempo {:.1}", self.id, self.bpm);
        } else if bpm.is_finite() && bpm > 0.0 {
            self.bpm = bpm;
            log::info!("Deck {}: analyzed {:.0} BPM", self.id, bpm);
        }
        true
    }

    pub fn set_active_effect(&mut self, effect: EffectKind) {
        self.effect = effect;
        self.publish();
        log::debug!("Deck {}: effect {}", self.id, effect);
    }

    pub fn set_wet(&mut self, wet: f32) {
        if !wet.is_finite() {
            return;
        }
        self.wet = wet.clamp(0.0, 1.0);
        self.publish();
    }

    /// Retry a snapshot the renderer had no room for and free tracks the
    /// renderer has let go of.
    pub fn housekeeping(&mut self) {
        self.snapshots.flush();
        let mut freed = 0;
        while let Ok(track) = self.retired.get_mut().pop() {
            drop(track);
            freed += 1;
        }
        if freed > 0 {
            log::trace!("Deck {}: released {} retired tracks", self.id, freed);
        }
    }
}
