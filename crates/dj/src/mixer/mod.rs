//! Crossfader, channel and master settings.
//!
//! [`MixerBus`] holds the control-side view of the mixer and publishes a
//! [`MixerState`] snapshot on every change. The audio path lives in
//! [`channel`]: one [`ChannelStrip`] per deck and a [`MasterBus`].

mod channel;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use channel::{ChannelStrip, MasterBus, CONTROL_INTERVAL};

use crate::deck::DeckId;
use crate::render::feed::{snapshot_channel, SnapshotReceiver, SnapshotSender, SNAPSHOT_CAPACITY};

/// Cut curve slope: full gain within 4% of travel from each end.
pub const CUT_SLOPE: f64 = 25.0;
pub const CHANNEL_EQ_RANGE_DB: f32 = 15.0;
pub const MASTER_EQ_RANGE_DB: f32 = 12.0;
pub const TRIM_RANGE: (f32, f32) = (0.0, 2.0);

/// Crossfader gain law.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossfaderCurve {
    Linear,
    #[default]
    ConstantPower,
    Cut,
}

impl CrossfaderCurve {
    pub const ALL: [CrossfaderCurve; 3] = [Self::Linear, Self::ConstantPower, Self::Cut];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::ConstantPower => "constant_power",
            Self::Cut => "cut",
        }
    }

    /// Gains for decks A and B at crossfader `position` in `[-1, 1]`.
    pub fn gains(self, position: f64) -> (f64, f64) {
        let position = if position.is_finite() {
            position.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let x = (position + 1.0) / 2.0;
        match self {
            Self::Linear => (1.0 - x, x),
            Self::ConstantPower => (
                (x * std::f64::consts::FRAC_PI_2).cos(),
                ((1.0 - x) * std::f64::consts::FRAC_PI_2).cos(),
            ),
            Self::Cut => (
                ((1.0 - x) * CUT_SLOPE).min(1.0),
                (x * CUT_SLOPE).min(1.0),
            ),
        }
    }
}

impl std::fmt::Display for CrossfaderCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CrossfaderCurve {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "constant_power" | "power" | "constant-power" => Ok(Self::ConstantPower),
            "cut" => Ok(Self::Cut),
            other => Err(format!("unknown crossfader curve '{}'", other)),
        }
    }
}

/// EQ band selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EqBand {
    Low,
    Mid,
    High,
}

impl FromStr for EqBand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" | "lo" => Ok(Self::Low),
            "mid" => Ok(Self::Mid),
            "high" | "hi" => Ok(Self::High),
            other => Err(format!("unknown eq band '{}'", other)),
        }
    }
}

/// Three-band EQ gains in dB.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EqBands {
    pub low: f32,
    pub mid: f32,
    pub high: f32,
}

impl EqBands {
    pub fn get(&self, band: EqBand) -> f32 {
        match band {
            EqBand::Low => self.low,
            EqBand::Mid => self.mid,
            EqBand::High => self.high,
        }
    }

    fn set(&mut self, band: EqBand, db: f32) {
        match band {
            EqBand::Low => self.low = db,
            EqBand::Mid => self.mid = db,
            EqBand::High => self.high = db,
        }
    }
}

/// One deck's channel settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Fader, `[0, 1]`.
    pub volume: f32,
    /// Pre-EQ gain, `[0, 2]`.
    pub trim: f32,
    pub eq: EqBands,
    /// Bipolar filter, `[-1, 1]`. Negative sweeps a low-pass down, positive a
    /// high-pass up.
    pub filter: f32,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            trim: 1.0,
            eq: EqBands::default(),
            filter: 0.0,
        }
    }
}

/// Everything the renderer needs from the mixer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MixerState {
    pub crossfader: f32,
    pub curve: CrossfaderCurve,
    pub channels: [ChannelSettings; 2],
    pub master_eq: EqBands,
}

impl MixerState {
    /// Effective channel gains: fader times crossfader curve.
    pub fn channel_gains(&self) -> [f32; 2] {
        let (a, b) = self.curve.gains(self.crossfader as f64);
        [
            self.channels[0].volume * a as f32,
            self.channels[1].volume * b as f32,
        ]
    }

    pub fn channel(&self, deck: DeckId) -> &ChannelSettings {
        &self.channels[deck.index()]
    }
}

/// Control side of the mixer.
pub struct MixerBus {
    state: MixerState,
    snapshots: SnapshotSender<MixerState>,
}

/// Renderer end of the mixer link.
pub struct MixerFeed {
    pub(crate) snapshots: SnapshotReceiver<MixerState>,
}

impl MixerBus {
    pub fn new() -> (Self, MixerFeed) {
        let (snapshots, rx) = snapshot_channel(SNAPSHOT_CAPACITY);
        let mut bus = Self {
            state: MixerState::default(),
            snapshots,
        };
        bus.publish();
        (bus, MixerFeed { snapshots: rx })
    }

    fn publish(&mut self) {
        self.snapshots.send(self.state);
    }

    pub fn state(&self) -> &MixerState {
        &self.state
    }

    pub fn crossfader(&self) -> f32 {
        self.state.crossfader
    }

    pub fn curve(&self) -> CrossfaderCurve {
        self.state.curve
    }

    /// Current deck A and B crossfader gains.
    pub fn crossfader_gains(&self) -> (f64, f64) {
        self.state.curve.gains(self.state.crossfader as f64)
    }

    pub fn set_crossfader(&mut self, position: f32) {
        if !position.is_finite() {
            return;
        }
        self.state.crossfader = position.clamp(-1.0, 1.0);
        self.publish();
    }

    pub fn set_curve(&mut self, curve: CrossfaderCurve) {
        self.state.curve = curve;
        self.publish();
        log::debug!("Crossfader curve set to {}", curve);
    }

    pub fn set_volume(&mut self, deck: DeckId, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        self.state.channels[deck.index()].volume = volume.clamp(0.0, 1.0);
        self.publish();
    }

    pub fn set_trim(&mut self, deck: DeckId, trim: f32) {
        if !trim.is_finite() {
            return;
        }
        self.state.channels[deck.index()].trim = trim.clamp(TRIM_RANGE.0, TRIM_RANGE.1);
        self.publish();
    }

    /// Channel EQ in dB, clamped to ±15.
    pub fn set_eq(&mut self, deck: DeckId, band: EqBand, db: f32) {
        if !db.is_finite() {
            return;
        }
        self.state.channels[deck.index()]
            .eq
            .set(band, db.clamp(-CHANNEL_EQ_RANGE_DB, CHANNEL_EQ_RANGE_DB));
        self.publish();
    }

    /// Master EQ in dB, clamped to ±12.
    pub fn set_master_eq(&mut self, band: EqBand, db: f32) {
        if !db.is_finite() {
            return;
        }
        self.state
            .master_eq
            .set(band, db.clamp(-MASTER_EQ_RANGE_DB, MASTER_EQ_RANGE_DB));
        self.publish();
    }

    pub fn set_filter(&mut self, deck: DeckId, value: f32) {
        if !value.is_finite() {
            return;
        }
        self.state.channels[deck.index()].filter = value.clamp(-1.0, 1.0);
        self.publish();
    }

    pub fn housekeeping(&mut self) {
        self.snapshots.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_linear_curve() {
        assert_eq!(CrossfaderCurve::Linear.gains(-1.0), (1.0, 0.0));
        assert_eq!(CrossfaderCurve::Linear.gains(0.0), (0.5, 0.5));
        assert_eq!(CrossfaderCurve::Linear.gains(1.0), (0.0, 1.0));
    }

    #[test]
    fn test_constant_power_curve() {
        let (a, b) = CrossfaderCurve::ConstantPower.gains(0.0);
        assert!(close(a, std::f64::consts::FRAC_1_SQRT_2));
        assert!(close(b, std::f64::consts::FRAC_1_SQRT_2));

        let (a, b) = CrossfaderCurve::ConstantPower.gains(-1.0);
        assert!(close(a, 1.0) && b.abs() < 1e-12);

        for i in -10..=10 {
            let (a, b) = CrossfaderCurve::ConstantPower.gains(i as f64 / 10.0);
            assert!(close(a * a + b * b, 1.0));
        }
    }

    #[test]
    fn test_cut_curve() {
        assert_eq!(CrossfaderCurve::Cut.gains(0.0), (1.0, 1.0));
        assert_eq!(CrossfaderCurve::Cut.gains(-1.0), (1.0, 0.0));
        assert_eq!(CrossfaderCurve::Cut.gains(1.0), (0.0, 1.0));
        let (_, b) = CrossfaderCurve::Cut.gains(-0.98);
        assert!(close(b, 0.25));
    }

    #[test]
    fn test_out_of_range_position_clamps() {
        assert_eq!(
            CrossfaderCurve::Linear.gains(7.0),
            CrossfaderCurve::Linear.gains(1.0)
        );
        assert_eq!(CrossfaderCurve::Linear.gains(f64::NAN), (0.5, 0.5));
    }

    #[test]
    fn test_bus_clamps_and_publishes() {
        let (mut bus, mut feed) = MixerBus::new();
        bus.set_crossfader(-3.0);
        bus.set_volume(DeckId::B, 1.5);
        bus.set_trim(DeckId::A, 9.0);
        bus.set_eq(DeckId::A, EqBand::Low, -40.0);
        bus.set_master_eq(EqBand::High, 20.0);
        bus.set_filter(DeckId::B, f32::NAN);

        let state = feed.snapshots.latest().unwrap();
        assert_eq!(state.crossfader, -1.0);
        assert_eq!(state.channels[1].volume, 1.0);
        assert_eq!(state.channels[0].trim, 2.0);
        assert_eq!(state.channels[0].eq.low, -15.0);
        assert_eq!(state.master_eq.high, 12.0);
        assert_eq!(state.channels[1].filter, 0.0);
        let gains = state.channel_gains();
        assert_eq!(gains[0], 1.0);
        assert!(gains[1].abs() < 1e-6);
    }

    #[test]
    fn test_parse_curve() {
        assert_eq!("cut".parse::<CrossfaderCurve>(), Ok(CrossfaderCurve::Cut));
        assert!("log".parse::<CrossfaderCurve>().is_err());
    }
}
