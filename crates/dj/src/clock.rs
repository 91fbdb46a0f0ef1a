//! Closed-form playback clock.
//!
//! A deck never accumulates position sample by sample. Instead it keeps an
//! anchor `(t0, p0)` and a rate, and derives the position at any time `t` as
//! `p0 + (t - t0) * rate`, folded into `[0, duration)`. Every rate, seek, or
//! transport change re-anchors first, so the position is continuous across
//! the change and never drifts.

/// Playback clock for a single deck.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleClock {
    anchor_time: f64,
    anchor_position: f64,
    rate: f64,
    duration: f64,
    running: bool,
}

impl SampleClock {
    /// Create a stopped clock at position 0 for a track of `duration` seconds.
    ///
    /// Non-finite or negative durations are treated as an empty track.
    pub fn new(duration: f64) -> Self {
        let duration = if duration.is_finite() && duration > 0.0 {
            duration
        } else {
            0.0
        };
        Self {
            anchor_time: 0.0,
            anchor_position: 0.0,
            rate: 1.0,
            duration,
            running: false,
        }
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Current anchor as `(t0, p0)`.
    pub fn anchor(&self) -> (f64, f64) {
        (self.anchor_time, self.anchor_position)
    }

    /// Unwrapped position at `now`. May fall outside `[0, duration)` while
    /// running; callers use this to detect the track edge.
    pub fn raw_position_at(&self, now: f64) -> f64 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        if self.running {
            self.anchor_position + (now - self.anchor_time) * self.rate
        } else {
            self.anchor_position
        }
    }

    /// Position at `now`, always in `[0, duration)` (or 0 for an empty track).
    pub fn position_at(&self, now: f64) -> f64 {
        normalize(self.raw_position_at(now), self.duration)
    }

    /// True when a running clock has crossed either edge of the track.
    pub fn has_left_track(&self, now: f64) -> bool {
        if !self.running || self.duration <= 0.0 {
            return false;
        }
        let raw = self.raw_position_at(now);
        raw >= self.duration || raw < 0.0
    }

    /// Start running from the current anchor position.
    pub fn start(&mut self, now: f64) {
        if self.running {
            return;
        }
        self.anchor_time = now;
        self.running = true;
    }

    /// Freeze the position at `now`.
    pub fn pause(&mut self, now: f64) {
        if !self.running {
            return;
        }
        self.anchor_position = self.position_at(now);
        self.anchor_time = now;
        self.running = false;
    }

    /// Move the anchor to `now` without changing the observed position.
    pub fn reanchor(&mut self, now: f64) {
        self.anchor_position = self.position_at(now);
        self.anchor_time = now;
    }

    /// Change the rate at `now`. The position is continuous across the change.
    pub fn set_rate(&mut self, rate: f64, now: f64) {
        if self.running {
            self.reanchor(now);
        }
        self.rate = rate;
    }

    /// Jump to `target` (normalized into the track) at `now`.
    pub fn seek(&mut self, target: f64, now: f64) {
        self.anchor_position = normalize(target, self.duration);
        self.anchor_time = now;
    }

    /// Stop and rest at `position`.
    pub fn park(&mut self, position: f64, now: f64) {
        self.running = false;
        self.seek(position, now);
    }
}

/// Fold `position` into `[0, duration)`. An empty track always yields 0.
pub fn normalize(position: f64, duration: f64) -> f64 {
    if duration <= 0.0 || !position.is_finite() {
        return 0.0;
    }
    let wrapped = position.rem_euclid(duration);
    // rem_euclid can round up to exactly `duration` for tiny negative inputs
    if wrapped >= duration {
        0.0
    } else {
        wrapped
    }
}
