//! Console behaviour through the render graph and the async module.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use twindeck_dj::{
    AudioContext, Console, DeckId, DjCommand, DjEvent, DjModule, EngineConfig, OpenSink,
    RenderGraph, Track, TransportState,
};

const SR: u32 = 44_100;

fn console() -> (Console, RenderGraph, AudioContext) {
    let _ = env_logger::builder().is_test(true).try_init();
    let ctx = AudioContext::new(SR);
    let (console, graph) = Console::new(&ctx, &EngineConfig::default());
    (console, graph, ctx)
}

fn sine(seconds: f64) -> Track {
    let frames = (seconds * SR as f64) as usize;
    let samples = (0..frames)
        .map(|n| 0.5 * (std::f32::consts::TAU * 440.0 * n as f32 / SR as f32).sin())
        .collect();
    Track::new(vec![samples], SR).unwrap()
}

/// Decaying 60 Hz thumps on every beat.
fn kicks(bpm: f64, seconds: f64, sample_rate: u32) -> Track {
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

fn render_seconds(graph: &mut RenderGraph, seconds: f64) -> Vec<f32> {
    let mut out = vec![0.0; 2 * (seconds * SR as f64) as usize];
    // Device-sized callbacks
    for chunk in out.chunks_mut(2 * 512) {
        graph.render(chunk);
    }
    out
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn test_render_follows_transport() {
    let (mut console, mut graph, _ctx) = console();
    let deck = console.deck_mut(DeckId::A);
    let _ = deck.load(sine(2.0));
    deck.play();

    render_seconds(&mut graph, 0.5);
    assert!(close(console.deck(DeckId::A).position(), 0.5));

    console.deck_mut(DeckId::A).pause();
    render_seconds(&mut graph, 0.25);
    assert!(close(console.deck(DeckId::A).position(), 0.5));

    let deck = console.deck_mut(DeckId::A);
    deck.toggle_reverse();
    deck.play();
    render_seconds(&mut graph, 0.25);
    assert!(close(console.deck(DeckId::A).position(), 0.25));
}

#[test]
fn test_end_of_track_stops_and_parks() {
    let (mut console, mut graph, _ctx) = console();
    let deck = console.deck_mut(DeckId::A);
    let _ = deck.load(sine(1.0));
    deck.play();

    let out = render_seconds(&mut graph, 1.5);
    let deck = console.deck(DeckId::A);
    assert!(!deck.is_playing());
    assert_eq!(deck.transport(), TransportState::Paused);
    assert_eq!(deck.position(), 0.0);

    let tail = &out[out.len() - 2 * SR as usize / 4..];
    assert!(tail.iter().all(|s| s.abs() < 1e-4));
}

#[test]
fn test_looping_deck_wraps() {
    let (mut console, mut graph, _ctx) = console();
    let deck = console.deck_mut(DeckId::A);
    let _ = deck.load(sine(1.0));
    deck.toggle_loop();
    deck.play();

    let out = render_seconds(&mut graph, 1.25);
    let deck = console.deck(DeckId::A);
    assert!(deck.is_playing());
    assert!(close(deck.position(), 0.25));

    let tail = &out[out.len() - 2 * 4096..];
    assert!(tail.iter().any(|s| s.abs() > 0.1));
}

#[test]
fn test_recording_captures_master() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("set.wav");
    let (mut console, mut graph, _ctx) = console();
    let deck = console.deck_mut(DeckId::B);
    let _ = deck.load(sine(2.0));
    deck.play();

    let sink = console.recording_sink(Some(path.clone()));
    let sink = OpenSink::open(Box::new(sink), SR).unwrap();
    assert!(console.start_recording(sink).unwrap());
    let out = render_seconds(&mut graph, 0.5);
    let summary = console.stop_recording().unwrap().wait().unwrap();
    assert_eq!(summary.frames_written, SR as u64 / 2);
    assert_eq!(summary.frames_dropped, 0);

    let mut reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.duration(), SR / 2);
    let recorded: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
    assert_eq!(recorded, out);
}

#[test]
fn test_meters_track_the_crossfader() {
    let (mut console, mut graph, _ctx) = console();
    for id in DeckId::ALL {
        let deck = console.deck_mut(id);
        let _ = deck.load(sine(2.0));
        deck.play();
    }
    console.mixer_mut().set_crossfader(-1.0);
    render_seconds(&mut graph, 0.5);

    let levels = console.levels();
    assert!(levels.decks[0] > 0.5);
    assert!(levels.decks[1] < 1e-3);
    assert!(levels.master > 0.5);
}

async fn next_event(events: &mut mpsc::Receiver<DjEvent>) -> DjEvent {
    tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

fn module() -> (DjModule, Arc<RwLock<Console>>, AudioContext) {
    let _ = env_logger::builder().is_test(true).try_init();
    let ctx = AudioContext::new(SR);
    let config = EngineConfig::default();
    let (console, _graph) = Console::new(&ctx, &config);
    let console = Arc::new(RwLock::new(console));
    (DjModule::new(Arc::clone(&console), &config), console, ctx)
}

#[tokio::test]
async fn test_module_loads_and_analyzes() {
    let (mut module, console, ctx) = module();
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (ev_tx, mut ev_rx) = mpsc::channel(16);
    let runner = tokio::spawn(async move { module.run(cmd_rx, ev_tx).await });

    cmd_tx
        .send(DjCommand::LoadTrack {
            deck: DeckId::A,
            track: kicks(120.0, 12.0, 22_050),
        })
        .await
        .unwrap();

    assert_eq!(
        next_event(&mut ev_rx).await,
        DjEvent::TrackLoaded {
            deck: DeckId::A,
            duration: 12.0,
            sample_rate: 22_050,
            channels: 1,
        }
    );
    assert_eq!(
        next_event(&mut ev_rx).await,
        DjEvent::BpmAnalyzed {
            deck: DeckId::A,
            bpm: 120.0,
        }
    );
    assert!(!console.read().deck(DeckId::A).is_analyzing());

    cmd_tx.send(DjCommand::Shutdown).await.unwrap();
    runner.await.unwrap().unwrap();
    assert!(ctx.is_closed());
}

#[tokio::test]
async fn test_module_reports_failed_load() {
    let (mut module, console, _ctx) = module();
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (ev_tx, mut ev_rx) = mpsc::channel(16);
    let runner = tokio::spawn(async move { module.run(cmd_rx, ev_tx).await });

    cmd_tx
        .send(DjCommand::Load {
            deck: DeckId::B,
            bytes: b"not audio at all".to_vec(),
            extension: None,
        })
        .await
        .unwrap();

    match next_event(&mut ev_rx).await {
        DjEvent::LoadFailed { deck, .. } => assert_eq!(deck, DeckId::B),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(console.read().deck(DeckId::B).transport(), TransportState::Empty);

    drop(cmd_tx);
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_superseded_analysis_is_ignored() {
    let (mut module, console, _ctx) = module();
    module.handle_command(DjCommand::LoadTrack {
        deck: DeckId::A,
        track: kicks(100.0, 12.0, 22_050),
    });
    module.handle_command(DjCommand::LoadTrack {
        deck: DeckId::A,
        track: kicks(120.0, 12.0, 22_050),
    });
    assert_eq!(console.read().deck(DeckId::A).generation(), 2);

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (ev_tx, mut ev_rx) = mpsc::channel(16);
    let runner = tokio::spawn(async move { module.run(cmd_rx, ev_tx).await });

    assert_eq!(
        next_event(&mut ev_rx).await,
        DjEvent::BpmAnalyzed {
            deck: DeckId::A,
            bpm: 120.0,
        }
    );

    cmd_tx.send(DjCommand::Shutdown).await.unwrap();
    runner.await.unwrap().unwrap();
    while let Some(event) = ev_rx.recv().await {
        assert!(!matches!(event, DjEvent::BpmAnalyzed { .. }), "{:?}", event);
    }
}

#[tokio::test]
async fn test_manual_tempo_beats_analysis() {
    let (mut module, console, _ctx) = module();
    module.handle_command(DjCommand::LoadTrack {
        deck: DeckId::B,
        track: kicks(120.0, 12.0, 22_050),
    });
    module.handle_command(DjCommand::SetBpm {
        deck: DeckId::B,
        bpm: 133.0,
    });

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (ev_tx, mut ev_rx) = mpsc::channel(16);
    let runner = tokio::spawn(async move { module.run(cmd_rx, ev_tx).await });

    assert_eq!(
        next_event(&mut ev_rx).await,
        DjEvent::BpmAnalyzed {
            deck: DeckId::B,
            bpm: 133.0,
        }
    );
    assert_eq!(console.read().deck(DeckId::B).bpm(), 133.0);

    drop(cmd_tx);
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_finishes_recording() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("take.wav");
    let (mut module, console, ctx) = module();
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (ev_tx, mut ev_rx) = mpsc::channel(16);
    let runner = tokio::spawn(async move { module.run(cmd_rx, ev_tx).await });

    cmd_tx
        .send(DjCommand::StartRecording {
            path: Some(path.clone()),
        })
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut ev_rx).await,
        DjEvent::RecordingStarted { path: path.clone() }
    );
    assert!(console.read().is_recording());

    cmd_tx.send(DjCommand::Shutdown).await.unwrap();
    match next_event(&mut ev_rx).await {
        DjEvent::RecordingStopped { summary } => assert_eq!(summary.frames_written, 0),
        other => panic!("unexpected event {:?}", other),
    }
    runner.await.unwrap().unwrap();

    assert!(!console.read().is_recording());
    assert!(ctx.is_closed());
    assert_eq!(hound::WavReader::open(&path).unwrap().duration(), 0);
}

#[tokio::test]
async fn test_recording_stops_and_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.wav");
    let second = dir.path().join("second.wav");
    let (mut module, console, _ctx) = module();
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (ev_tx, mut ev_rx) = mpsc::channel(16);
    let runner = tokio::spawn(async move { module.run(cmd_rx, ev_tx).await });

    for path in [&first, &second] {
        cmd_tx
            .send(DjCommand::StartRecording {
                path: Some(path.clone()),
            })
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut ev_rx).await,
            DjEvent::RecordingStarted { path: path.clone() }
        );
        cmd_tx.send(DjCommand::StopRecording).await.unwrap();
        match next_event(&mut ev_rx).await {
            DjEvent::RecordingStopped { summary } => assert_eq!(summary.frames_written, 0),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!console.read().is_recording());
    }

    drop(cmd_tx);
    runner.await.unwrap().unwrap();
    assert!(hound::WavReader::open(&first).is_ok());
    assert!(hound::WavReader::open(&second).is_ok());
}
