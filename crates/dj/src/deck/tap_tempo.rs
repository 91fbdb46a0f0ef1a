//! Tap tempo.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Taps kept for averaging.
pub const TAP_HISTORY: usize = 4;
/// A pause longer than this starts a fresh measurement.
pub const TAP_RESET_GAP: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Default)]
pub struct TapTempo {
    taps: VecDeque<Instant>,
}

impl TapTempo {
    /// Record a tap at `at`. Returns the tempo once two or more taps are held.
    pub fn tap(&mut self, at: Instant) -> Option<f64> {
        if let Some(&last) = self.taps.back() {
            if at.saturating_duration_since(last) > TAP_RESET_GAP {
                self.taps.clear();
            }
        }
        self.taps.push_back(at);
        while self.taps.len() > TAP_HISTORY {
            self.taps.pop_front();
        }
        self.bpm()
    }

    /// Mean tapped tempo rounded to one decimal.
    pub fn bpm(&self) -> Option<f64> {
        let (first, last) = (self.taps.front()?, self.taps.back()?);
        let intervals = self.taps.len().checked_sub(1).filter(|n| *n > 0)?;
        let mean_ms = last.saturating_duration_since(*first).as_secs_f64() * 1000.0 / intervals as f64;
        if mean_ms <= 0.0 {
            return None;
        }
        Some((60_000.0 / mean_ms * 10.0).round() / 10.0)
    }

    pub fn reset(&mut self) {
        self.taps.clear();
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_steady_taps() {
        let base = Instant::now();
        let mut tap = TapTempo::default();
        assert_eq!(tap.tap(base), None);
        assert_eq!(tap.tap(base + ms(500)), Some(120.0));
        assert_eq!(tap.tap(base + ms(1000)), Some(120.0));
        assert_eq!(tap.tap(base + ms(1500)), Some(120.0));
    }

    #[test]
    fn test_history_is_bounded() {
        let base = Instant::now();
        let mut tap = TapTempo::default();
        // Slow taps followed by fast ones; only the last four count
        for t in [0, 1000, 2000, 2400, 2800, 3200] {
            tap.tap(base + ms(t));
        }
        assert_eq!(tap.len(), TAP_HISTORY);
        assert_eq!(tap.bpm(), Some(150.0));
    }

    #[test]
    fn test_long_gap_resets() {
        let base = Instant::now();
        let mut tap = TapTempo::default();
        assert_eq!(tap.tap(base), None);
        for t in [500, 1000, 1500] {
            assert_eq!(tap.tap(base + ms(t)), Some(120.0));
        }
        assert_eq!(tap.len(), 4);

        // 3 s after the last tap: a fresh measurement with one tap in it
        assert_eq!(tap.tap(base + ms(4500)), None);
        assert_eq!(tap.len(), 1);
        assert_eq!(tap.tap(base + ms(5000)), Some(120.0));
        assert_eq!(tap.len(), 2);
    }

    #[test]
    fn test_gap_at_limit_keeps_history() {
        let base = Instant::now();
        let mut tap = TapTempo::default();
        tap.tap(base);
        assert_eq!(tap.tap(base + TAP_RESET_GAP), Some(30.0));
        assert_eq!(tap.len(), 2);
    }

    #[test]
    fn test_rounds_to_one_decimal() {
        let base = Instant::now();
        let mut tap = TapTempo::default();
        tap.tap(base);
        assert_eq!(tap.tap(base + ms(467)), Some(128.5));
    }
}
