//! Periodic, read-only status polling.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::console::Console;
use crate::deck::DeckState;
use crate::mixer::CrossfaderCurve;
use crate::render::LevelReadings;

/// Everything a status display shows, captured at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayFrame {
    /// Timeline time the frame was taken at.
    pub time: f64,
    pub decks: [DeckState; 2],
    pub levels: LevelReadings,
    pub crossfader: f32,
    pub curve: CrossfaderCurve,
    pub recording: bool,
}

/// A tokio interval that hands a [`DisplayFrame`] to a callback each tick.
///
/// Late ticks are skipped rather than bunched up.
pub struct DisplayTicker {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DisplayTicker {
    /// Start ticking every `period`. Must be called inside a tokio runtime.
    pub fn start<F>(console: Arc<RwLock<Console>>, period: Duration, mut on_frame: F) -> Self
    where
        F: FnMut(DisplayFrame) + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        let frame = console.read().display_frame();
                        on_frame(frame);
                    }
                }
            }
            log::debug!("Display ticker stopped");
        });
        Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Period for a refresh rate, clamped to at least 1 fps.
    pub fn period_for_fps(fps: u32) -> Duration {
        Duration::from_secs_f64(1.0 / fps.max(1) as f64)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the ticker and wait for its task to finish.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::warn!("Display ticker task failed: {}", e);
            }
        }
    }
}

impl Drop for DisplayTicker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
