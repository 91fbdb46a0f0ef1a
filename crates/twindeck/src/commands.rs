//! Line-oriented console commands read from stdin.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context};
use twindeck_dj::deck::HOT_CUE_SLOTS;
use twindeck_dj::{DeckId, DjCommand};

pub const HELP: &str = "\
commands (deck is a or b):
  load <deck> <file>        eject <deck>
  play <deck>               pause <deck>          toggle <deck>
  seek <deck> <seconds>     pitch <deck> <rate>   bend <deck> <offset>
  reverse <deck>            loop <deck>           sync <deck>
  cue <deck> <1-4>          clear <deck> <1-4>
  tap <deck>                bpm <deck> <bpm>
  fx <deck> <none|echo|reverb|flanger>            wet <deck> <0-1>
  xfade <-1..1>             curve <linear|power|cut>
  volume <deck> <0-1>       trim <deck> <0-2>     filter <deck> <-1..1>
  eq <deck> <low|mid|high> <db>                   master-eq <low|mid|high> <db>
  rec [file]                stop-rec              quit";

/// What a line of input asked for.
#[derive(Debug)]
pub enum Input {
    Command(DjCommand),
    Help,
    Empty,
}

/// Parse one line of input.
pub fn parse(line: &str) -> anyhow::Result<Input> {
    let mut args = line.split_whitespace();
    let Some(verb) = args.next() else {
        return Ok(Input::Empty);
    };
    let mut args = Args {
        verb,
        rest: args.collect(),
        next: 0,
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "help" | "?" => return Ok(Input::Help),
        "quit" | "exit" | "q" => DjCommand::Shutdown,

        "load" => {
            let deck = args.deck()?;
            // Paths may contain spaces
            let path = args.remainder()?;
            DjCommand::LoadFile {
                deck,
                path: PathBuf::from(path),
            }
        }
        "eject" => DjCommand::Eject { deck: args.deck()? },
        "play" => DjCommand::Play { deck: args.deck()? },
        "pause" => DjCommand::Pause { deck: args.deck()? },
        "toggle" => DjCommand::TogglePlay { deck: args.deck()? },
        "seek" => DjCommand::Seek {
            deck: args.deck()?,
            position: args.value("position")?,
        },
        "pitch" => DjCommand::SetPitch {
            deck: args.deck()?,
            pitch: args.value("pitch")?,
        },
        "bend" => DjCommand::SetBend {
            deck: args.deck()?,
            bend: args.value("bend")?,
        },
        "reverse" => DjCommand::ToggleReverse { deck: args.deck()? },
        "loop" => DjCommand::ToggleLoop { deck: args.deck()? },
        "sync" => DjCommand::SyncToDeck { deck: args.deck()? },

        "cue" => DjCommand::TriggerHotCue {
            deck: args.deck()?,
            slot: args.slot()?,
        },
        "clear" => DjCommand::ClearHotCue {
            deck: args.deck()?,
            slot: args.slot()?,
        },
        "tap" => DjCommand::TapBpm { deck: args.deck()? },
        "bpm" => DjCommand::SetBpm {
            deck: args.deck()?,
            bpm: args.value("bpm")?,
        },

        "fx" => DjCommand::SetEffect {
            deck: args.deck()?,
            effect: args.value("effect")?,
        },
        "wet" => DjCommand::SetWet {
            deck: args.deck()?,
            wet: args.value("wet")?,
        },

        "xfade" => DjCommand::SetCrossfader {
            position: args.value("position")?,
        },
        "curve" => DjCommand::SetCurve {
            curve: args.value("curve")?,
        },
        "volume" => DjCommand::SetVolume {
            deck: args.deck()?,
            volume: args.value("volume")?,
        },
        "trim" => DjCommand::SetTrim {
            deck: args.deck()?,
            trim: args.value("trim")?,
        },
        "filter" => DjCommand::SetFilter {
            deck: args.deck()?,
            value: args.value("filter")?,
        },
        "eq" => DjCommand::SetEq {
            deck: args.deck()?,
            band: args.value("band")?,
            db: args.value("gain")?,
        },
        "master-eq" => DjCommand::SetMasterEq {
            band: args.value("band")?,
            db: args.value("gain")?,
        },

        "rec" => DjCommand::StartRecording {
            path: args.remainder().ok().map(PathBuf::from),
        },
        "stop-rec" => DjCommand::StopRecording,

        other => bail!("unknown command '{}', try 'help'", other),
    };

    args.finish()?;
    Ok(Input::Command(command))
}

struct Args<'a> {
    verb: &'a str,
    rest: Vec<&'a str>,
    next: usize,
}

impl<'a> Args<'a> {
    fn word(&mut self, what: &str) -> anyhow::Result<&'a str> {
        let word = self
            .rest
            .get(self.next)
            .copied()
            .with_context(|| format!("{}: missing {}", self.verb, what))?;
        self.next += 1;
        Ok(word)
    }

    fn value<T>(&mut self, what: &str) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let word = self.word(what)?;
        word.parse()
            .map_err(|e| anyhow!("{}: bad {} '{}': {}", self.verb, what, word, e))
    }

    fn deck(&mut self) -> anyhow::Result<DeckId> {
        self.value("deck")
    }

    /// Hot cue slots are numbered from 1 on the command line.
    fn slot(&mut self) -> anyhow::Result<usize> {
        let slot: usize = self.value("slot")?;
        if !(1..=HOT_CUE_SLOTS).contains(&slot) {
            bail!("{}: slot must be 1-{}", self.verb, HOT_CUE_SLOTS);
        }
        Ok(slot - 1)
    }

    /// Everything left, joined back with single spaces.
    fn remainder(&mut self) -> anyhow::Result<String> {
        if self.next >= self.rest.len() {
            bail!("{}: missing path", self.verb);
        }
        let rest = self.rest[self.next..].join(" ");
        self.next = self.rest.len();
        Ok(rest)
    }

    fn finish(&self) -> anyhow::Result<()> {
        if self.next < self.rest.len() {
            bail!(
                "{}: unexpected '{}'",
                self.verb,
                self.rest[self.next..].join(" ")
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twindeck_dj::{CrossfaderCurve, EffectKind, EqBand};

    fn command(line: &str) -> DjCommand {
        match parse(line).unwrap() {
            Input::Command(command) => command,
            other => panic!("expected a command, got {:?}", other),
        }
    }

    #[test]
    fn test_transport_commands() {
        assert!(matches!(command("play a"), DjCommand::Play { deck: DeckId::A }));
        assert!(matches!(command("PAUSE B"), DjCommand::Pause { deck: DeckId::B }));
        match command("seek 2 31.5") {
            DjCommand::Seek { deck, position } => {
                assert_eq!(deck, DeckId::B);
                assert_eq!(position, 31.5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_load_keeps_spaces_in_path() {
        match command("load a /music/My Track.flac") {
            DjCommand::LoadFile { deck, path } => {
                assert_eq!(deck, DeckId::A);
                assert_eq!(path, PathBuf::from("/music/My Track.flac"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse("load a").is_err());
    }

    #[test]
    fn test_hot_cue_slots_are_one_based() {
        assert!(matches!(
            command("cue b 1"),
            DjCommand::TriggerHotCue {
                deck: DeckId::B,
                slot: 0
            }
        ));
        assert!(matches!(
            command("clear a 4"),
            DjCommand::ClearHotCue {
                deck: DeckId::A,
                slot: 3
            }
        ));
        assert!(parse("cue a 0").is_err());
        assert!(parse("cue a 5").is_err());
    }

    #[test]
    fn test_mixer_commands() {
        match command("eq a high -6") {
            DjCommand::SetEq { deck, band, db } => {
                assert_eq!(deck, DeckId::A);
                assert_eq!(band, EqBand::High);
                assert_eq!(db, -6.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            command("curve power"),
            DjCommand::SetCurve {
                curve: CrossfaderCurve::ConstantPower
            }
        ));
        assert!(matches!(
            command("fx b Reverb"),
            DjCommand::SetEffect {
                deck: DeckId::B,
                effect: EffectKind::Reverb
            }
        ));
    }

    #[test]
    fn test_recording_path_is_optional() {
        assert!(matches!(
            command("rec"),
            DjCommand::StartRecording { path: None }
        ));
        match command("rec sets/friday.wav") {
            DjCommand::StartRecording { path } => {
                assert_eq!(path, Some(PathBuf::from("sets/friday.wav")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse("play c").is_err());
        assert!(parse("pitch a fast").is_err());
        assert!(parse("play a now").is_err());
        assert!(parse("dance").is_err());
        assert!(matches!(parse("   ").unwrap(), Input::Empty));
        assert!(matches!(parse("help").unwrap(), Input::Help));
    }
}
