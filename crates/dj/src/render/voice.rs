//! Renderer side of a deck.

use std::sync::Arc;

use rtrb::Producer;

use crate::clock::{normalize, SampleClock};
use crate::deck::{DeckFeed, DeckSnapshot};
use crate::dsp::Smoother;
use crate::track::Track;

/// Reads a deck's track at the position its clock dictates.
///
/// Starting and stopping fade over a few milliseconds. While fading out the
/// voice keeps reading from the clock it had before the stop so the tail
/// carries on moving rather than freezing on one sample.
pub struct DeckVoice {
    feed: DeckFeed,
    current: DeckSnapshot,
    tail: Option<SampleClock>,
    level: Smoother,
}

impl DeckVoice {
    pub fn new(feed: DeckFeed, sample_rate: u32, declick_seconds: f32) -> Self {
        Self {
            feed,
            current: DeckSnapshot::default(),
            tail: None,
            level: Smoother::new(0.0, declick_seconds, sample_rate as f32),
        }
    }

    /// Take every snapshot published since the last block, retiring any
    /// track they replace. Returns true when something changed.
    pub fn sync(&mut self) -> bool {
        let Self {
            feed,
            current,
            tail,
            level,
        } = self;
        let DeckFeed { snapshots, retired } = feed;
        let mut changed = false;
        snapshots.drain(|next| {
            accept(current, tail, level, retired, next);
            changed = true;
        });
        changed
    }

    pub fn snapshot(&self) -> &DeckSnapshot {
        &self.current
    }

    /// Stereo frame at timeline time `now` (seconds).
    #[inline]
    pub fn next_frame(&mut self, now: f64) -> (f32, f32) {
        let level = self.level.next();
        let Some(track) = self.current.track.as_deref() else {
            return (0.0, 0.0);
        };
        if level == 0.0 && !self.current.playing {
            self.tail = None;
            return (0.0, 0.0);
        }

        let clock = if self.current.playing {
            &self.current.clock
        } else {
            match &self.tail {
                Some(tail) => tail,
                None => return (0.0, 0.0),
            }
        };

        let duration = clock.duration();
        let raw = clock.raw_position_at(now);
        let looping = self.current.looping;
        if !looping && (raw < 0.0 || raw >= duration) {
            return (0.0, 0.0);
        }
        let (l, r) = track.frame_at(normalize(raw, duration), looping);
        (l * level, r * level)
    }
}

fn accept(
    current: &mut DeckSnapshot,
    tail: &mut Option<SampleClock>,
    level: &mut Smoother,
    retired: &mut Producer<Arc<Track>>,
    next: DeckSnapshot,
) {
    let same_track = match (&current.track, &next.track) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    };

    if !same_track {
        *tail = None;
        level.jump_to(0.0);
    } else if current.playing && !next.playing {
        *tail = Some(current.clock);
    } else if next.playing {
        *tail = None;
    }
    level.set_target(if next.playing { 1.0 } else { 0.0 });

    let previous = std::mem::replace(current, next);
    if !same_track {
        if let Some(track) = previous.track {
            retire(retired, track);
        }
    }
}

/// Hand a track back to the control thread for freeing. If the return ring
/// is full the track is dropped here instead.
fn retire(ring: &mut Producer<Arc<Track>>, track: Arc<Track>) {
    let _ = ring.push(track);
}
