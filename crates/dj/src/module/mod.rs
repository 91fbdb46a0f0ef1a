//! Async control module.
//!
//! [`DjModule`] owns the command loop. It applies [`DjCommand`]s to the shared
//! [`Console`], runs decoding and tempo analysis off the loop, and reports
//! what happened as [`DjEvent`]s.

mod audio_engine;
mod console;
mod display;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use parking_lot::RwLock;
use tokio::sync::mpsc;

pub use audio_engine::{
    default_device_name, list_audio_devices, AudioDeviceInfo, AudioOutput, OutputError,
};
pub use console::Console;
pub use display::{DisplayFrame, DisplayTicker};

use crate::analysis::{AnalysisOutcome, AnalysisRequest, AnalysisTask, BpmConfig};
use crate::config::EngineConfig;
use crate::context::AudioContext;
use crate::deck::{DeckEngine, DeckId};
use crate::decode::{Decoder, SymphoniaDecoder};
use crate::effect::EffectKind;
use crate::mixer::{CrossfaderCurve, EqBand};
use crate::recorder::{OpenSink, PendingStop, RecorderError, RecordingSummary};
use crate::track::Track;

/// How often parked snapshots are retried and retired tracks freed.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(50);

/// Commands for the DJ module.
#[derive(Debug, Clone)]
pub enum DjCommand {
    // Loading
    /// Decode encoded audio and load it. `extension` is a format hint.
    Load {
        deck: DeckId,
        bytes: Vec<u8>,
        extension: Option<String>,
    },
    /// Read and decode a file, then load it.
    LoadFile { deck: DeckId, path: PathBuf },
    /// Load already decoded audio.
    LoadTrack { deck: DeckId, track: Track },
    Eject { deck: DeckId },

    // Transport
    Play { deck: DeckId },
    Pause { deck: DeckId },
    TogglePlay { deck: DeckId },
    /// Seek to a position in seconds.
    Seek { deck: DeckId, position: f64 },

    // Rate
    SetPitch { deck: DeckId, pitch: f64 },
    SetBend { deck: DeckId, bend: f64 },
    SetSyncRate { deck: DeckId, sync_rate: f64 },
    ToggleReverse { deck: DeckId },
    ToggleLoop { deck: DeckId },

    // Cues and tempo
    TriggerHotCue { deck: DeckId, slot: usize },
    ClearHotCue { deck: DeckId, slot: usize },
    TapBpm { deck: DeckId },
    SetBpm { deck: DeckId, bpm: f64 },
    /// Match this deck's tempo to the other deck.
    SyncToDeck { deck: DeckId },

    // Effects
    SetEffect { deck: DeckId, effect: EffectKind },
    SetWet { deck: DeckId, wet: f32 },

    // Mixer
    SetCrossfader { position: f32 },
    SetCurve { curve: CrossfaderCurve },
    SetVolume { deck: DeckId, volume: f32 },
    SetTrim { deck: DeckId, trim: f32 },
    SetEq { deck: DeckId, band: EqBand, db: f32 },
    SetMasterEq { band: EqBand, db: f32 },
    SetFilter { deck: DeckId, value: f32 },

    // Recording
    /// Record to `path`, or to a timestamped file in the recordings directory.
    StartRecording { path: Option<PathBuf> },
    StopRecording,

    Shutdown,
}

impl DjCommand {
    /// Short name for logging. Load payloads are too large to debug-print.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Load { .. } => "load",
            Self::LoadFile { .. } => "load_file",
            Self::LoadTrack { .. } => "load_track",
            Self::Eject { .. } => "eject",
            Self::Play { .. } => "play",
            Self::Pause { .. } => "pause",
            Self::TogglePlay { .. } => "toggle_play",
            Self::Seek { .. } => "seek",
            Self::SetPitch { .. } => "set_pitch",
            Self::SetBend { .. } => "set_bend",
            Self::SetSyncRate { .. } => "set_sync_rate",
            Self::ToggleReverse { .. } => "toggle_reverse",
            Self::ToggleLoop { .. } => "toggle_loop",
            Self::TriggerHotCue { .. } => "trigger_hot_cue",
            Self::ClearHotCue { .. } => "clear_hot_cue",
            Self::TapBpm { .. } => "tap_bpm",
            Self::SetBpm { .. } => "set_bpm",
            Self::SyncToDeck { .. } => "sync_to_deck",
            Self::SetEffect { .. } => "set_effect",
            Self::SetWet { .. } => "set_wet",
            Self::SetCrossfader { .. } => "set_crossfader",
            Self::SetCurve { .. } => "set_curve",
            Self::SetVolume { .. } => "set_volume",
            Self::SetTrim { .. } => "set_trim",
            Self::SetEq { .. } => "set_eq",
            Self::SetMasterEq { .. } => "set_master_eq",
            Self::SetFilter { .. } => "set_filter",
            Self::StartRecording { .. } => "start_recording",
            Self::StopRecording => "stop_recording",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Events emitted by the DJ module.
#[derive(Debug, Clone, PartialEq)]
pub enum DjEvent {
    TrackLoaded {
        deck: DeckId,
        duration: f64,
        sample_rate: u32,
        channels: usize,
    },
    /// Decoding failed; the deck is unchanged.
    LoadFailed { deck: DeckId, error: String },
    /// Analysis finished for the current load. `bpm` is the deck's tempo
    /// afterwards, which stays manual if one was set in the meantime.
    BpmAnalyzed { deck: DeckId, bpm: f64 },
    /// A tap produced a tempo.
    BpmTapped { deck: DeckId, bpm: f64 },
    RecordingStarted { path: PathBuf },
    RecordingStopped { summary: RecordingSummary },
    RecordingFailed { error: String },
}

enum LoadSource {
    Bytes {
        bytes: Vec<u8>,
        extension: Option<String>,
    },
    File(PathBuf),
}

/// Disk work for the recorder, finished on the blocking pool.
enum RecorderUpdate {
    Opened {
        path: PathBuf,
        result: Result<OpenSink, RecorderError>,
    },
    Stopped(Result<RecordingSummary, RecorderError>),
}

struct Decoded {
    deck: DeckId,
    request: u64,
    result: anyhow::Result<Track>,
}

/// Runs commands against a shared [`Console`].
pub struct DjModule {
    ctx: AudioContext,
    console: Arc<RwLock<Console>>,
    decoder: Arc<dyn Decoder>,
    analysis_config: BpmConfig,
    analyses: [Option<AnalysisTask>; 2],
    /// Latest decode request per deck; older results are discarded.
    load_requests: [u64; 2],
    analysis_tx: mpsc::UnboundedSender<AnalysisOutcome>,
    analysis_rx: Option<mpsc::UnboundedReceiver<AnalysisOutcome>>,
    decoded_tx: mpsc::UnboundedSender<Decoded>,
    decoded_rx: Option<mpsc::UnboundedReceiver<Decoded>>,
    recorder_tx: mpsc::UnboundedSender<RecorderUpdate>,
    recorder_rx: Option<mpsc::UnboundedReceiver<RecorderUpdate>>,
    /// A sink is being opened or a writer is finishing.
    recorder_busy: bool,
    shut_down: bool,
}

impl DjModule {
    pub fn new(console: Arc<RwLock<Console>>, config: &EngineConfig) -> Self {
        let ctx = console.read().context().clone();
        let (analysis_tx, analysis_rx) = mpsc::unbounded_channel();
        let (decoded_tx, decoded_rx) = mpsc::unbounded_channel();
        let (recorder_tx, recorder_rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            console,
            decoder: Arc::new(SymphoniaDecoder),
            analysis_config: config.analysis.clone(),
            analyses: [None, None],
            load_requests: [0; 2],
            analysis_tx,
            analysis_rx: Some(analysis_rx),
            decoded_tx,
            decoded_rx: Some(decoded_rx),
            recorder_tx,
            recorder_rx: Some(recorder_rx),
            recorder_busy: false,
            shut_down: false,
        }
    }

    /// Replace the decoder used for `Load` and `LoadFile`.
    pub fn with_decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn console(&self) -> &Arc<RwLock<Console>> {
        &self.console
    }

    /// Process commands until `Shutdown` arrives or the sender is dropped,
    /// then shut down.
    pub async fn run(
        &mut self,
        mut commands: mpsc::Receiver<DjCommand>,
        events: mpsc::Sender<DjEvent>,
    ) -> anyhow::Result<()> {
        let mut analysis_rx = self
            .analysis_rx
            .take()
            .context("DJ module is already running")?;
        let mut decoded_rx = self
            .decoded_rx
            .take()
            .context("DJ module is already running")?;
        let mut recorder_rx = self
            .recorder_rx
            .take()
            .context("DJ module is already running")?;

        log::info!("DJ module running");
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                command = commands.recv() => match command {
                    Some(DjCommand::Shutdown) | None => {
                        log::info!("DJ module received shutdown");
                        break;
                    }
                    Some(command) => self.handle_command(command),
                },
                Some(decoded) = decoded_rx.recv() => self.finish_load(decoded),
                Some(outcome) = analysis_rx.recv() => self.finish_analysis(outcome),
                Some(update) = recorder_rx.recv() => self.finish_recorder(update),
                _ = housekeeping.tick() => {
                    self.housekeeping();
                    None
                }
            };
            if let Some(event) = event {
                // A closed event channel only means nobody is listening
                let _ = events.send(event).await;
            }
        }

        if let Some(pending) = self.shutdown() {
            self.wait_for_stop(pending);
        }
        // Let an open or stop already in flight land before returning
        while self.recorder_busy {
            let Some(update) = recorder_rx.recv().await else {
                break;
            };
            if let Some(event) = self.finish_recorder(update) {
                let _ = events.send(event).await;
            }
        }
        self.analysis_rx = Some(analysis_rx);
        self.decoded_rx = Some(decoded_rx);
        self.recorder_rx = Some(recorder_rx);
        Ok(())
    }

    /// Apply one command. Commands that make no sense in the current state
    /// are ignored. Loads spawn work, so this needs a tokio runtime.
    pub fn handle_command(&mut self, command: DjCommand) -> Option<DjEvent> {
        log::debug!("DJ command: {}", command.name());
        match command {
            DjCommand::Load {
                deck,
                bytes,
                extension,
            } => {
                self.spawn_decode(deck, LoadSource::Bytes { bytes, extension });
                None
            }
            DjCommand::LoadFile { deck, path } => {
                self.spawn_decode(deck, LoadSource::File(path));
                None
            }
            DjCommand::LoadTrack { deck, track } => {
                // Supersede any decode still in flight for this deck
                self.load_requests[deck.index()] += 1;
                Some(self.load_track(deck, track))
            }
            DjCommand::Eject { deck } => {
                self.load_requests[deck.index()] += 1;
                self.analyses[deck.index()] = None;
                self.console.write().deck_mut(deck).eject();
                None
            }
            DjCommand::Play { deck } => self.with_deck(deck, |d| d.play()),
            DjCommand::Pause { deck } => self.with_deck(deck, |d| d.pause()),
            DjCommand::TogglePlay { deck } => self.with_deck(deck, |d| d.toggle_play()),
            DjCommand::Seek { deck, position } => self.with_deck(deck, |d| d.seek(position)),
            DjCommand::SetPitch { deck, pitch } => self.with_deck(deck, |d| d.set_pitch(pitch)),
            DjCommand::SetBend { deck, bend } => self.with_deck(deck, |d| d.set_bend(bend)),
            DjCommand::SetSyncRate { deck, sync_rate } => {
                self.with_deck(deck, |d| d.set_sync_rate(sync_rate))
            }
            DjCommand::ToggleReverse { deck } => self.with_deck(deck, |d| d.toggle_reverse()),
            DjCommand::ToggleLoop { deck } => self.with_deck(deck, |d| d.toggle_loop()),
            DjCommand::TriggerHotCue { deck, slot } => {
                self.with_deck(deck, |d| d.trigger_hot_cue(slot))
            }
            DjCommand::ClearHotCue { deck, slot } => {
                self.with_deck(deck, |d| d.clear_hot_cue(slot))
            }
            DjCommand::TapBpm { deck } => {
                let bpm = self.console.write().deck_mut(deck).tap_bpm()?;
                Some(DjEvent::BpmTapped { deck, bpm })
            }
            DjCommand::SetBpm { deck, bpm } => self.with_deck(deck, |d| d.set_bpm(bpm)),
            DjCommand::SyncToDeck { deck } => {
                self.console.write().sync_to_deck(deck);
                None
            }
            DjCommand::SetEffect { deck, effect } => {
                self.with_deck(deck, |d| d.set_active_effect(effect))
            }
            DjCommand::SetWet { deck, wet } => self.with_deck(deck, |d| d.set_wet(wet)),
            DjCommand::SetCrossfader { position } => {
                self.console.write().mixer_mut().set_crossfader(position);
                None
            }
            DjCommand::SetCurve { curve } => {
                self.console.write().mixer_mut().set_curve(curve);
                None
            }
            DjCommand::SetVolume { deck, volume } => {
                self.console.write().mixer_mut().set_volume(deck, volume);
                None
            }
            DjCommand::SetTrim { deck, trim } => {
                self.console.write().mixer_mut().set_trim(deck, trim);
                None
            }
            DjCommand::SetEq { deck, band, db } => {
                self.console.write().mixer_mut().set_eq(deck, band, db);
                None
            }
            DjCommand::SetMasterEq { band, db } => {
                self.console.write().mixer_mut().set_master_eq(band, db);
                None
            }
            DjCommand::SetFilter { deck, value } => {
                self.console.write().mixer_mut().set_filter(deck, value);
                None
            }
            DjCommand::StartRecording { path } => {
                self.spawn_open_recording(path);
                None
            }
            DjCommand::StopRecording => {
                let pending = self.console.write().stop_recording();
                if let Some(pending) = pending {
                    self.wait_for_stop(pending);
                }
                None
            }
            DjCommand::Shutdown => {
                if let Some(pending) = self.shutdown() {
                    self.wait_for_stop(pending);
                }
                None
            }
        }
    }

    fn with_deck(
        &self,
        deck: DeckId,
        f: impl FnOnce(&mut DeckEngine),
    ) -> Option<DjEvent> {
        f(self.console.write().deck_mut(deck));
        None
    }

    fn spawn_decode(&mut self, deck: DeckId, source: LoadSource) {
        let slot = &mut self.load_requests[deck.index()];
        *slot += 1;
        let request = *slot;
        let decoder = Arc::clone(&self.decoder);
        let results = self.decoded_tx.clone();

        tokio::task::spawn_blocking(move || {
            let result = match source {
                LoadSource::Bytes { bytes, extension } => decoder
                    .decode(bytes, extension.as_deref())
                    .map_err(anyhow::Error::from),
                LoadSource::File(path) => decode_file(decoder.as_ref(), &path),
            };
            let _ = results.send(Decoded {
                deck,
                request,
                result,
            });
        });
    }

    fn finish_load(&mut self, decoded: Decoded) -> Option<DjEvent> {
        let Decoded {
            deck,
            request,
            result,
        } = decoded;
        if request != self.load_requests[deck.index()] {
            log::debug!("Deck {}: discarding superseded load {}", deck, request);
            return None;
        }
        match result {
            Ok(track) => Some(self.load_track(deck, track)),
            Err(e) => {
                log::warn!("Deck {}: load failed: {:#}", deck, e);
                Some(DjEvent::LoadFailed {
                    deck,
                    error: format!("{:#}", e),
                })
            }
        }
    }

    fn load_track(&mut self, deck: DeckId, track: Track) -> DjEvent {
        let event = DjEvent::TrackLoaded {
            deck,
            duration: track.duration(),
            sample_rate: track.sample_rate(),
            channels: track.channel_count(),
        };
        let request = self.console.write().deck_mut(deck).load(track);
        self.start_analysis(request);
        event
    }

    /// Replacing the slot drops the previous task, which cancels it.
    fn start_analysis(&mut self, request: AnalysisRequest) {
        let deck = request.deck;
        self.analyses[deck.index()] = Some(AnalysisTask::spawn(
            request,
            self.analysis_config.clone(),
            self.analysis_tx.clone(),
        ));
    }

    fn finish_analysis(&mut self, outcome: AnalysisOutcome) -> Option<DjEvent> {
        let AnalysisOutcome {
            deck,
            generation,
            bpm,
        } = outcome;
        let slot = &mut self.analyses[deck.index()];
        if slot.as_ref().is_some_and(|task| task.generation() == generation) {
            *slot = None;
        }

        let mut console = self.console.write();
        let engine = console.deck_mut(deck);
        if !engine.complete_analysis(generation, bpm) {
            return None;
        }
        Some(DjEvent::BpmAnalyzed {
            deck,
            bpm: engine.bpm(),
        })
    }

    fn spawn_open_recording(&mut self, path: Option<PathBuf>) {
        let (sink, sample_rate) = {
            let console = self.console.read();
            if self.recorder_busy || console.is_recording() {
                log::debug!("start_recording ignored: recorder busy");
                return;
            }
            (console.recording_sink(path), self.ctx.sample_rate())
        };
        self.recorder_busy = true;
        let path = sink.path().to_path_buf();
        let updates = self.recorder_tx.clone();

        tokio::task::spawn_blocking(move || {
            let result = OpenSink::open(Box::new(sink), sample_rate);
            let _ = updates.send(RecorderUpdate::Opened { path, result });
        });
    }

    /// Join the writer on the blocking pool; the summary comes back as an
    /// update.
    fn wait_for_stop(&mut self, pending: PendingStop) {
        self.recorder_busy = true;
        let updates = self.recorder_tx.clone();
        tokio::task::spawn_blocking(move || {
            let _ = updates.send(RecorderUpdate::Stopped(pending.wait()));
        });
    }

    fn finish_recorder(&mut self, update: RecorderUpdate) -> Option<DjEvent> {
        self.recorder_busy = false;
        match update {
            RecorderUpdate::Opened { path, result } => {
                let sink = match result {
                    Ok(sink) => sink,
                    Err(e) => {
                        log::error!("Failed to open {}: {}", path.display(), e);
                        return Some(DjEvent::RecordingFailed {
                            error: e.to_string(),
                        });
                    }
                };
                if self.shut_down {
                    log::debug!("Discarding recording opened after shutdown");
                    tokio::task::spawn_blocking(move || {
                        if let Err(e) = sink.close() {
                            log::warn!("Failed to close unused recording: {}", e);
                        }
                    });
                    return None;
                }
                let started = self.console.write().start_recording(sink);
                match started {
                    Ok(true) => Some(DjEvent::RecordingStarted { path }),
                    Ok(false) => None,
                    Err(e) => {
                        log::error!("Failed to start recording: {}", e);
                        Some(DjEvent::RecordingFailed {
                            error: e.to_string(),
                        })
                    }
                }
            }
            RecorderUpdate::Stopped(Ok(summary)) => Some(DjEvent::RecordingStopped { summary }),
            RecorderUpdate::Stopped(Err(e)) => {
                log::error!("Failed to finish recording: {}", e);
                Some(DjEvent::RecordingFailed {
                    error: e.to_string(),
                })
            }
        }
    }

    fn housekeeping(&mut self) {
        self.console.write().housekeeping();
        for slot in &mut self.analyses {
            if slot.as_ref().is_some_and(|task| task.is_finished()) {
                *slot = None;
            }
        }
    }

    /// Stop everything: cancel analysis, pause both decks, disarm any
    /// recording and close the audio context. Safe to call more than once.
    /// Returns the recording that was still running; dropping it lets the
    /// writer finish the file in the background.
    pub fn shutdown(&mut self) -> Option<PendingStop> {
        if self.shut_down {
            return None;
        }
        self.shut_down = true;
        log::info!("Shutting down DJ module");

        for slot in &mut self.analyses {
            if let Some(task) = slot.take() {
                task.cancel();
            }
        }

        let pending = {
            let mut console = self.console.write();
            for deck in DeckId::ALL {
                console.deck_mut(deck).pause();
            }
            let pending = console.stop_recording();
            console.housekeeping();
            pending
        };

        self.ctx.close();
        log::info!("DJ module shutdown complete");
        pending
    }
}

fn decode_file(decoder: &dyn Decoder, path: &std::path::Path) -> anyhow::Result<Track> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let extension = path.extension().and_then(|e| e.to_str());
    decoder
        .decode(bytes, extension)
        .with_context(|| format!("failed to decode {}", path.display()))
}
