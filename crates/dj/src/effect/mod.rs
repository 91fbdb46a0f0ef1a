//! Per-deck effect send with wet/dry mix.

mod echo;
mod flanger;
mod reverb;

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use echo::Echo;
pub use flanger::Flanger;
pub use reverb::{Convolver, ImpulseResponse, Reverb, REVERB_BLOCK};

use crate::config::EffectsConfig;
use crate::dsp::Smoother;

/// Mix level below which a pending effect switch takes over.
const SWITCH_THRESHOLD: f32 = 1e-3;

/// A stereo, sample-at-a-time processor.
pub trait StereoEffect: Send {
    fn process(&mut self, input: (f32, f32)) -> (f32, f32);
    fn reset(&mut self);
}

/// Which effect a deck sends to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    #[default]
    None,
    Echo,
    Reverb,
    Flanger,
}

impl EffectKind {
    pub const ALL: [EffectKind; 4] = [Self::None, Self::Echo, Self::Reverb, Self::Flanger];

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Echo => "echo",
            Self::Reverb => "reverb",
            Self::Flanger => "flanger",
        }
    }
}

impl std::fmt::Display for EffectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EffectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown effect '{}'", s))
    }
}

/// One deck's effect units and the wet/dry blend in front of them.
///
/// Output is `dry * (1 - wet) + effect(dry) * wet`. Switching effects first
/// fades the current unit out, then brings the new one in, so a change never
/// steps the signal.
pub struct EffectChain {
    active: EffectKind,
    pending: Option<EffectKind>,
    wet: f32,
    mix: Smoother,
    echo: Echo,
    reverb: Reverb,
    flanger: Flanger,
}

impl EffectChain {
    pub fn new(sample_rate: u32, ir: Arc<ImpulseResponse>, config: &EffectsConfig) -> Self {
        Self {
            active: EffectKind::None,
            pending: None,
            wet: 0.0,
            mix: Smoother::new(
                0.0,
                config.wet_smoothing_ms / 1000.0,
                sample_rate as f32,
            ),
            echo: Echo::new(
                sample_rate,
                config.echo_delay_ms / 1000.0,
                config.echo_feedback,
            ),
            reverb: Reverb::new(ir),
            flanger: Flanger::new(
                sample_rate,
                config.flanger_center_ms / 1000.0,
                config.flanger_depth_ms / 1000.0,
                config.flanger_rate_hz,
            ),
        }
    }

    /// Effect currently audible, or the one being faded in.
    pub fn active(&self) -> EffectKind {
        self.pending.unwrap_or(self.active)
    }

    pub fn set_active(&mut self, kind: EffectKind) {
        if kind == self.active {
            self.pending = None;
        } else {
            self.pending = Some(kind);
        }
    }

    pub fn set_wet(&mut self, wet: f32) {
        if wet.is_finite() {
            self.wet = wet.clamp(0.0, 1.0);
        }
    }

    #[inline]
    pub fn process(&mut self, dry: (f32, f32)) -> (f32, f32) {
        if let Some(next) = self.pending {
            if self.mix.value() <= SWITCH_THRESHOLD {
                self.switch_to(next);
            }
        }

        let target = if self.pending.is_some() || self.active == EffectKind::None {
            0.0
        } else {
            self.wet
        };
        self.mix.set_target(target);
        let wet = self.mix.next();

        let processed = match self.active {
            EffectKind::None => return dry,
            EffectKind::Echo => self.echo.process(dry),
            EffectKind::Reverb => self.reverb.process(dry),
            EffectKind::Flanger => self.flanger.process(dry),
        };
        (
            dry.0 * (1.0 - wet) + processed.0 * wet,
            dry.1 * (1.0 - wet) + processed.1 * wet,
        )
    }

    fn switch_to(&mut self, kind: EffectKind) {
        match kind {
            EffectKind::None => {}
            EffectKind::Echo => self.echo.reset(),
            EffectKind::Reverb => self.reverb.reset(),
            EffectKind::Flanger => self.flanger.reset(),
        }
        self.mix.jump_to(0.0);
        self.active = kind;
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> EffectChain {
        let ir = Arc::new(ImpulseResponse::synthesize(8000, 0.05, 2.0));
        EffectChain::new(8000, ir, &EffectsConfig::default())
    }

    #[test]
    fn test_none_passes_dry() {
        let mut chain = chain();
        chain.set_wet(1.0);
        for n in 0..100 {
            let x = n as f32 / 100.0;
            assert_eq!(chain.process((x, -x)), (x, -x));
        }
    }

    #[test]
    fn test_zero_wet_is_dry() {
        let mut chain = chain();
        chain.set_active(EffectKind::Echo);
        chain.set_wet(0.0);
        for n in 0..1000 {
            let x = (n as f32 * 0.1).sin();
            let (l, r) = chain.process((x, x));
            assert!((l - x).abs() < 1e-6 && (r - x).abs() < 1e-6);
        }
    }

    #[test]
    fn test_wet_ramps_in() {
        let mut chain = chain();
        chain.set_active(EffectKind::Echo);
        chain.set_wet(1.0);
        // Echo outputs silence for the first delay period, so the result is dry * (1 - wet)
        let first = chain.process((1.0, 1.0)).0;
        assert!(first > 0.9, "no step on switch: {first}");
        for _ in 0..2000 {
            chain.process((1.0, 1.0));
        }
        assert_eq!(chain.active(), EffectKind::Echo);
    }

    #[test]
    fn test_parse_effect_kind() {
        assert_eq!("Reverb".parse::<EffectKind>(), Ok(EffectKind::Reverb));
        assert!("chorus".parse::<EffectKind>().is_err());
    }
}
