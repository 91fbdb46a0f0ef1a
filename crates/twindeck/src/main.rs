use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use twindeck_dj::module::list_audio_devices;
use twindeck_dj::{
    AudioContext, AudioOutput, BpmEstimator, ConfigManager, Console, DeckId, Decoder,
    DisplayFrame, DisplayTicker, DjCommand, DjEvent, DjModule, EngineConfig, SymphoniaDecoder,
    TransportState,
};

mod commands;

use commands::Input;

/// Two-deck DJ mixing console for the terminal.
#[derive(Parser, Debug)]
#[command(name = "twindeck")]
#[command(about = "Two-deck DJ console")]
struct Args {
    /// Config file (defaults to ~/.twindeck/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the output device and read commands from stdin
    Play {
        /// Track to load on deck A
        #[arg(long)]
        deck_a: Option<PathBuf>,

        /// Track to load on deck B
        #[arg(long)]
        deck_b: Option<PathBuf>,
    },
    /// Print the estimated tempo of a file
    Analyze { file: PathBuf },
    /// List output devices
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config_manager = ConfigManager::new(args.config);
    let config = config_manager
        .load()
        .with_context(|| format!("loading {:?}", config_manager.config_path()))?;

    match args.command.unwrap_or(Command::Play {
        deck_a: None,
        deck_b: None,
    }) {
        Command::Play { deck_a, deck_b } => play(config, deck_a, deck_b).await,
        Command::Analyze { file } => analyze(&config, &file),
        Command::Devices => {
            for device in list_audio_devices() {
                let marker = if device.is_default { " (default)" } else { "" };
                println!("{}{}: {} channels", device.name, marker, device.max_channels);
            }
            Ok(())
        }
    }
}

async fn play(
    config: EngineConfig,
    deck_a: Option<PathBuf>,
    deck_b: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut output = AudioOutput::open(&config.audio)?;
    let ctx = AudioContext::with_effects(output.sample_rate(), &config.effects);
    let (console, graph) = Console::new(&ctx, &config);
    output.start(graph)?;

    let console = Arc::new(RwLock::new(console));
    let mut module = DjModule::new(Arc::clone(&console), &config);

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (ev_tx, mut ev_rx) = mpsc::channel(64);

    for (deck, path) in [(DeckId::A, deck_a), (DeckId::B, deck_b)] {
        if let Some(path) = path {
            cmd_tx.send(DjCommand::LoadFile { deck, path }).await?;
        }
    }

    let events = tokio::spawn(async move {
        while let Some(event) = ev_rx.recv().await {
            report(&event);
        }
    });

    let mut ticker = DisplayTicker::start(
        Arc::clone(&console),
        DisplayTicker::period_for_fps(config.display.fps),
        print_status,
    );

    println!("{}", commands::HELP);
    std::thread::Builder::new()
        .name("twindeck-stdin".into())
        .spawn(move || read_commands(cmd_tx))?;

    module.run(cmd_rx, ev_tx).await?;

    ticker.stop().await;
    output.stop();
    let _ = events.await;
    eprintln!();
    Ok(())
}

/// Forward parsed stdin lines until `quit` or end of input.
fn read_commands(commands: mpsc::Sender<DjCommand>) {
    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        match commands::parse(&line) {
            Ok(Input::Command(command)) => {
                let quit = matches!(command, DjCommand::Shutdown);
                if commands.blocking_send(command).is_err() || quit {
                    return;
                }
            }
            Ok(Input::Help) => println!("{}", commands::HELP),
            Ok(Input::Empty) => {}
            Err(e) => eprintln!("{:#}", e),
        }
    }
    let _ = commands.blocking_send(DjCommand::Shutdown);
}

fn report(event: &DjEvent) {
    match event {
        DjEvent::TrackLoaded {
            deck,
            duration,
            sample_rate,
            channels,
        } => log::info!(
            "Deck {}: loaded {:.1}s ({} Hz, {} ch)",
            deck,
            duration,
            sample_rate,
            channels
        ),
        DjEvent::LoadFailed { deck, error } => log::error!("Deck {}: load failed: {}", deck, error),
        DjEvent::BpmAnalyzed { deck, bpm } => log::info!("Deck {}: {:.1} BPM", deck, bpm),
        DjEvent::BpmTapped { deck, bpm } => log::info!("Deck {}: tapped {:.1} BPM", deck, bpm),
        DjEvent::RecordingStarted { path } => log::info!("Recording to {}", path.display()),
        DjEvent::RecordingStopped { summary } => log::info!(
            "Recording stopped: {:.1}s written, {} frames dropped",
            summary.seconds(),
            summary.frames_dropped
        ),
        DjEvent::RecordingFailed { error } => log::error!("Recording failed: {}", error),
    }
}

fn print_status(frame: DisplayFrame) {
    let mut line = String::new();
    for deck in &frame.decks {
        let transport = match deck.transport {
            TransportState::Empty => "--",
            TransportState::Paused => "||",
            TransportState::Playing => ">>",
        };
        line.push_str(&format!(
            "{} {} {:>6.1}/{:<6.1} {:>6.1}bpm {:>4.0}% | ",
            deck.id,
            transport,
            deck.position,
            deck.duration,
            deck.displayed_bpm,
            frame.levels.decks[deck.id.index()] * 100.0,
        ));
    }
    line.push_str(&format!(
        "xf {:+.2} {} | out {:>3.0}%{}",
        frame.crossfader,
        frame.curve,
        frame.levels.master * 100.0,
        if frame.recording { " REC" } else { "" }
    ));

    let mut stderr = std::io::stderr().lock();
    let _ = write!(stderr, "\r{}", line);
    let _ = stderr.flush();
}

fn analyze(config: &EngineConfig, file: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let extension = file.extension().and_then(|e| e.to_str());
    let track = SymphoniaDecoder
        .decode(bytes, extension)
        .with_context(|| format!("decoding {}", file.display()))?;
    let bpm = BpmEstimator::new(config.analysis.clone()).estimate(&track);
    println!(
        "{}: {:.1}s, {:.0} BPM",
        file.display(),
        track.duration(),
        bpm
    );
    Ok(())
}
