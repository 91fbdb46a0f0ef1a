//! The control-plane half of the engine.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::context::AudioContext;
use crate::deck::{DeckEngine, DeckId};
use crate::mixer::MixerBus;
use crate::recorder::{OpenSink, PendingStop, Recorder, RecorderError, WavCaptureSink};
use crate::render::{LevelReadings, Levels, RenderGraph};

use super::display::DisplayFrame;

/// Both decks, the mixer and the recorder, as one unit.
///
/// Everything here runs on the control side. The matching [`RenderGraph`] is
/// returned from [`Console::new`] and belongs on the audio thread.
pub struct Console {
    ctx: AudioContext,
    decks: [DeckEngine; 2],
    mixer: MixerBus,
    recorder: Recorder,
    levels: Arc<Levels>,
    recording_dir: PathBuf,
}

impl Console {
    pub fn new(ctx: &AudioContext, config: &EngineConfig) -> (Self, RenderGraph) {
        let (deck_a, feed_a) = DeckEngine::new(DeckId::A, ctx);
        let (deck_b, feed_b) = DeckEngine::new(DeckId::B, ctx);
        let (mixer, mixer_feed) = MixerBus::new();
        let (recorder, tap) = Recorder::new(ctx, config.recording.buffer_seconds);
        let levels = Arc::new(Levels::default());

        let graph = RenderGraph::new(
            ctx,
            config,
            [feed_a, feed_b],
            mixer_feed,
            tap,
            Arc::clone(&levels),
        );
        let console = Self {
            ctx: ctx.clone(),
            decks: [deck_a, deck_b],
            mixer,
            recorder,
            levels,
            recording_dir: config.recording.directory.clone(),
        };
        (console, graph)
    }

    pub fn context(&self) -> &AudioContext {
        &self.ctx
    }

    pub fn deck(&self, id: DeckId) -> &DeckEngine {
        &self.decks[id.index()]
    }

    pub fn deck_mut(&mut self, id: DeckId) -> &mut DeckEngine {
        &mut self.decks[id.index()]
    }

    pub fn mixer(&self) -> &MixerBus {
        &self.mixer
    }

    pub fn mixer_mut(&mut self) -> &mut MixerBus {
        &mut self.mixer
    }

    pub fn levels(&self) -> LevelReadings {
        self.levels.readings()
    }

    /// Match `id`'s tempo to what the other deck is currently playing at.
    pub fn sync_to_deck(&mut self, id: DeckId) -> bool {
        let target = self.deck(id.other()).displayed_bpm();
        self.deck_mut(id).sync_to_bpm(target)
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// WAV sink at `path`, or at a timestamped file in the configured
    /// directory. Nothing is created until it is opened.
    pub fn recording_sink(&self, path: Option<PathBuf>) -> WavCaptureSink {
        match path {
            Some(path) => WavCaptureSink::new(path),
            None => WavCaptureSink::timestamped(&self.recording_dir),
        }
    }

    /// Start recording into an opened sink. Returns false if a recording is
    /// already running or still finishing.
    pub fn start_recording(&mut self, sink: OpenSink) -> Result<bool, RecorderError> {
        self.recorder.start_recording(sink)
    }

    /// Disarm the recording. The caller waits on the result, off any lock.
    pub fn stop_recording(&mut self) -> Option<PendingStop> {
        self.recorder.stop_recording()
    }

    /// Read-only view for the display tick. Never changes transport state.
    pub fn display_frame(&self) -> DisplayFrame {
        DisplayFrame {
            time: self.ctx.current_time(),
            decks: [self.decks[0].state(), self.decks[1].state()],
            levels: self.levels.readings(),
            crossfader: self.mixer.crossfader(),
            curve: self.mixer.curve(),
            recording: self.recorder.is_recording(),
        }
    }

    /// Periodic upkeep: retry parked snapshots and free retired tracks.
    pub fn housekeeping(&mut self) {
        for deck in &mut self.decks {
            deck.housekeeping();
        }
        self.mixer.housekeeping();
    }
}
