//! Background tempo analysis.

mod bpm;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use bpm::{AnalysisFailure, BpmConfig, BpmEstimator};

use crate::deck::DeckId;
use crate::track::Track;

/// Work order produced when a deck loads a track.
///
/// `generation` identifies the load; a result whose generation no longer
/// matches the deck's is stale and gets dropped.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub deck: DeckId,
    pub generation: u64,
    pub track: Arc<Track>,
}

/// Finished estimate for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisOutcome {
    pub deck: DeckId,
    pub generation: u64,
    pub bpm: f64,
}

/// Handle to an estimate running on the blocking pool.
pub struct AnalysisTask {
    deck: DeckId,
    generation: u64,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl AnalysisTask {
    /// Start estimating on tokio's blocking pool. The outcome is sent on
    /// `results` unless the task is cancelled first.
    pub fn spawn(
        request: AnalysisRequest,
        config: BpmConfig,
        results: mpsc::UnboundedSender<AnalysisOutcome>,
    ) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let AnalysisRequest {
            deck,
            generation,
            track,
        } = request;

        let handle = tokio::task::spawn_blocking(move || {
            log::debug!("Deck {}: analyzing generation {}", deck, generation);
            let estimator = BpmEstimator::new(config);
            let mono = track.mono();
            let Some(bpm) = estimator.estimate_samples(&mono, track.sample_rate(), Some(&flag))
            else {
                log::debug!("Deck {}: analysis {} cancelled", deck, generation);
                return;
            };
            if flag.load(Ordering::Acquire) {
                return;
            }
            let _ = results.send(AnalysisOutcome {
                deck,
                generation,
                bpm,
            });
        });

        Self {
            deck,
            generation,
            cancel,
            handle,
        }
    }

    pub fn deck(&self) -> DeckId {
        self.deck
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Ask the estimator to stop at its next checkpoint and discard its result.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for AnalysisTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clicks(bpm: f64, seconds: f64, sample_rate: u32) -> Track {
        let period = (60.0 / bpm * sample_rate as f64) as usize;
        let len = (seconds * sample_rate as f64) as usize;
        let samples = (0..len)
            .map(|i| {
                let t = (i % period) as f32 / sample_rate as f32;
                (std::f32::consts::TAU * 60.0 * t).sin() * (-t * 30.0).exp()
            })
            .collect();
        Track::new(vec![samples], sample_rate).unwrap()
    }

    #[tokio::test]
    async fn test_task_reports_outcome() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = AnalysisRequest {
            deck: DeckId::B,
            generation: 7,
            track: Arc::new(clicks(120.0, 12.0, 22_050)),
        };
        let _task = AnalysisTask::spawn(request, BpmConfig::default(), tx);

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.deck, DeckId::B);
        assert_eq!(outcome.generation, 7);
        assert_eq!(outcome.bpm, 120.0);
    }
}
