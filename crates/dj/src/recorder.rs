//! Master output capture.
//!
//! The render graph owns a [`RecordTap`] and pushes every master frame into
//! it. While armed, frames go into a lock-free ring that a writer thread drains
//! into a [`CaptureSink`]. The tap never blocks: when the ring is full the
//! frame is counted as dropped.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use thiserror::Error;

use crate::context::AudioContext;

const CHANNELS: u16 = 2;
const WRITE_CHUNK_SAMPLES: usize = 8192;
const IDLE_SLEEP: Duration = Duration::from_millis(5);

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture sink used before begin()")]
    NotStarted,

    #[error("recording writer thread panicked")]
    WriterPanicked,

    #[error("recorder is unusable after a writer failure")]
    Unavailable,
}

/// Destination for captured master audio.
pub trait CaptureSink: Send {
    fn begin(&mut self, sample_rate: u32, channels: u16) -> Result<(), RecorderError>;

    /// Interleaved samples. Calls may split a frame across two writes.
    fn write(&mut self, samples: &[f32]) -> Result<(), RecorderError>;

    fn finish(&mut self) -> Result<(), RecorderError>;
}

/// 32-bit float WAV file.
pub struct WavCaptureSink {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl WavCaptureSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    /// A sink in `directory` named after the current local time.
    pub fn timestamped(directory: &Path) -> Self {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        Self::new(directory.join(format!("twindeck-{}.wav", stamp)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CaptureSink for WavCaptureSink {
    fn begin(&mut self, sample_rate: u32, channels: u16) -> Result<(), RecorderError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        self.writer = Some(hound::WavWriter::create(&self.path, spec)?);
        log::info!("Recording to {}", self.path.display());
        Ok(())
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), RecorderError> {
        let writer = self.writer.as_mut().ok_or(RecorderError::NotStarted)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), RecorderError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

/// Render-side end of the recorder.
pub struct RecordTap {
    producer: Producer<f32>,
    armed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl RecordTap {
    #[inline]
    pub fn push(&mut self, (l, r): (f32, f32)) {
        if !self.armed.load(Ordering::Relaxed) {
            return;
        }
        if self.producer.slots() < 2 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let _ = self.producer.push(l);
        let _ = self.producer.push(r);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingSummary {
    pub sample_rate: u32,
    pub frames_written: u64,
    pub frames_dropped: u64,
}

impl RecordingSummary {
    pub fn seconds(&self) -> f64 {
        self.frames_written as f64 / self.sample_rate.max(1) as f64
    }
}

/// A sink whose `begin` has already run.
///
/// Opening touches the filesystem, so callers do it wherever blocking is
/// acceptable and hand the result to [`Recorder::start_recording`].
pub struct OpenSink(Box<dyn CaptureSink>);

impl OpenSink {
    pub fn open(mut sink: Box<dyn CaptureSink>, sample_rate: u32) -> Result<Self, RecorderError> {
        sink.begin(sample_rate, CHANNELS)?;
        Ok(Self(sink))
    }

    /// Finish a sink that never started recording.
    pub fn close(mut self) -> Result<(), RecorderError> {
        self.0.finish()
    }
}

struct Writer {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<u64, RecorderError>>,
}

/// A recording that has been told to stop but whose writer may still be
/// flushing. Dropping it lets the writer finish on its own.
pub struct PendingStop {
    sample_rate: u32,
    frames_dropped: u64,
    handle: JoinHandle<Result<u64, RecorderError>>,
}

impl PendingStop {
    /// Block until the writer has drained the ring and finished the sink.
    pub fn wait(self) -> Result<RecordingSummary, RecorderError> {
        let frames_written = self
            .handle
            .join()
            .map_err(|_| RecorderError::WriterPanicked)??;
        let summary = RecordingSummary {
            sample_rate: self.sample_rate,
            frames_written,
            frames_dropped: self.frames_dropped,
        };
        if summary.frames_dropped > 0 {
            log::warn!("Recording dropped {} frames", summary.frames_dropped);
        }
        log::info!("Recording finished: {:.1}s captured", summary.seconds());
        Ok(summary)
    }
}

/// Control side of the recorder. Nothing here waits on the disk.
pub struct Recorder {
    sample_rate: u32,
    // Idle ring end. The writer thread takes it while recording and puts it
    // back once its sink is finished.
    consumer: Arc<Mutex<Option<Consumer<f32>>>>,
    armed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    writer: Option<Writer>,
}

impl Recorder {
    /// `buffer_seconds` sizes the ring between the tap and the writer thread.
    pub fn new(ctx: &AudioContext, buffer_seconds: f32) -> (Self, RecordTap) {
        let sample_rate = ctx.sample_rate();
        let frames = (sample_rate as f32 * buffer_seconds.max(0.0)) as usize;
        let (producer, consumer) = RingBuffer::new(frames.max(1024) * CHANNELS as usize);
        let armed = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));
        let tap = RecordTap {
            producer,
            armed: Arc::clone(&armed),
            dropped: Arc::clone(&dropped),
        };
        let recorder = Self {
            sample_rate,
            consumer: Arc::new(Mutex::new(Some(consumer))),
            armed,
            dropped,
            writer: None,
        };
        (recorder, tap)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_recording(&self) -> bool {
        self.writer.is_some()
    }

    /// Start draining the tap into `sink`. Returns false, dropping the sink,
    /// if a recording is running or the previous writer is still finishing.
    pub fn start_recording(&mut self, sink: OpenSink) -> Result<bool, RecorderError> {
        if self.writer.is_some() {
            log::debug!("start_recording ignored: already recording");
            return Ok(false);
        }
        let Some(mut consumer) = self.consumer.lock().take() else {
            log::debug!("start_recording ignored: previous recording still finishing");
            return Ok(false);
        };
        while consumer.pop().is_ok() {}

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let slot = Arc::clone(&self.consumer);
        let OpenSink(mut sink) = sink;
        self.dropped.store(0, Ordering::Relaxed);
        self.armed.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name("twindeck-recorder".into())
            .spawn(move || {
                let result = drain_into(&mut consumer, sink.as_mut(), &thread_stop);
                *slot.lock() = Some(consumer);
                result
            });
        match handle {
            Ok(handle) => {
                self.writer = Some(Writer { stop, handle });
                Ok(true)
            }
            Err(e) => {
                // The closure and its consumer are gone with the failed spawn
                self.armed.store(false, Ordering::Release);
                Err(RecorderError::Io(e))
            }
        }
    }

    /// Disarm the tap and tell the writer to finish. Returns `None` when
    /// nothing was recording.
    pub fn stop_recording(&mut self) -> Option<PendingStop> {
        let Some(writer) = self.writer.take() else {
            log::debug!("stop_recording ignored: not recording");
            return None;
        };
        self.armed.store(false, Ordering::Release);
        writer.stop.store(true, Ordering::Release);
        log::info!("Recording stopping");
        Some(PendingStop {
            sample_rate: self.sample_rate,
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            handle: writer.handle,
        })
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        // The detached writer still drains and finishes its sink
        if self.stop_recording().is_some() {
            log::debug!("Recorder dropped while recording; writer finishing in background");
        }
    }
}

/// Writer thread body. Returns whole frames written.
fn drain_into(
    consumer: &mut Consumer<f32>,
    sink: &mut dyn CaptureSink,
    stop: &AtomicBool,
) -> Result<u64, RecorderError> {
    let mut samples = 0u64;
    loop {
        // Read the flag before draining so nothing pushed before the stop is lost
        let stopping = stop.load(Ordering::Acquire);
        let available = consumer.slots().min(WRITE_CHUNK_SAMPLES);
        if available == 0 {
            if stopping {
                break;
            }
            thread::sleep(IDLE_SLEEP);
            continue;
        }
        if let Ok(chunk) = consumer.read_chunk(available) {
            let (first, second) = chunk.as_slices();
            sink.write(first)?;
            sink.write(second)?;
            chunk.commit_all();
            samples += available as u64;
        }
    }
    sink.finish()?;
    Ok(samples / CHANNELS as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct MemorySink {
        samples: Arc<Mutex<Vec<f32>>>,
        finished: Arc<AtomicBool>,
    }

    impl CaptureSink for MemorySink {
        fn begin(&mut self, _: u32, channels: u16) -> Result<(), RecorderError> {
            assert_eq!(channels, 2);
            Ok(())
        }

        fn write(&mut self, samples: &[f32]) -> Result<(), RecorderError> {
            self.samples.lock().extend_from_slice(samples);
            Ok(())
        }

        fn finish(&mut self) -> Result<(), RecorderError> {
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn open(sink: MemorySink) -> OpenSink {
        OpenSink::open(Box::new(sink), 8_000).unwrap()
    }

    #[test]
    fn test_captures_only_while_armed() {
        let ctx = AudioContext::new(8_000);
        let (mut recorder, mut tap) = Recorder::new(&ctx, 1.0);
        tap.push((9.0, 9.0));

        let sink = MemorySink::default();
        assert!(recorder.start_recording(open(sink.clone())).unwrap());
        for i in 0..500 {
            tap.push((i as f32, -(i as f32)));
        }
        let summary = recorder.stop_recording().unwrap().wait().unwrap();
        tap.push((9.0, 9.0));

        assert_eq!(summary.frames_written, 500);
        assert_eq!(summary.frames_dropped, 0);
        assert!(sink.finished.load(Ordering::SeqCst));
        let samples = sink.samples.lock();
        assert_eq!(samples.len(), 1000);
        assert_eq!(&samples[..4], &[0.0, 0.0, 1.0, -1.0]);
    }

    #[test]
    fn test_start_twice_and_stop_idle_are_noops() {
        let ctx = AudioContext::new(8_000);
        let (mut recorder, _tap) = Recorder::new(&ctx, 1.0);
        assert!(recorder.stop_recording().is_none());

        assert!(recorder.start_recording(open(MemorySink::default())).unwrap());
        assert!(!recorder.start_recording(open(MemorySink::default())).unwrap());
        assert!(recorder.is_recording());
        let pending = recorder.stop_recording().unwrap();
        assert!(!recorder.is_recording());
        pending.wait().unwrap();

        // The ring is back once the writer has finished
        assert!(recorder.start_recording(open(MemorySink::default())).unwrap());
        recorder.stop_recording().unwrap().wait().unwrap();
    }

    #[test]
    fn test_full_ring_counts_drops() {
        let ctx = AudioContext::new(8_000);
        let (mut recorder, mut tap) = Recorder::new(&ctx, 0.0);
        // Arm without a writer so nothing drains the ring
        recorder.armed.store(true, Ordering::Release);
        for _ in 0..1500 {
            tap.push((0.5, 0.5));
        }
        assert_eq!(recorder.dropped.load(Ordering::Relaxed), 476);
    }

    #[test]
    fn test_wav_sink_writes_float_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("take.wav");
        let ctx = AudioContext::new(22_050);
        let (mut recorder, mut tap) = Recorder::new(&ctx, 1.0);

        let sink = OpenSink::open(Box::new(WavCaptureSink::new(&path)), recorder.sample_rate())
            .unwrap();
        assert!(path.exists());
        assert!(recorder.start_recording(sink).unwrap());
        for _ in 0..2205 {
            tap.push((0.25, -0.25));
        }
        let summary = recorder.stop_recording().unwrap().wait().unwrap();
        assert!((summary.seconds() - 0.1).abs() < 1e-9);

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 22_050);
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_format, hound::SampleFormat::Float);
        assert_eq!(reader.duration(), 2205);
    }

    /// Finishing blocks until the test releases it.
    struct GatedSink {
        release: std::sync::mpsc::Receiver<()>,
    }

    impl CaptureSink for GatedSink {
        fn begin(&mut self, _: u32, _: u16) -> Result<(), RecorderError> {
            Ok(())
        }

        fn write(&mut self, _: &[f32]) -> Result<(), RecorderError> {
            Ok(())
        }

        fn finish(&mut self) -> Result<(), RecorderError> {
            self.release
                .recv_timeout(Duration::from_secs(5))
                .map_err(|_| RecorderError::NotStarted)
        }
    }

    #[test]
    fn test_stop_does_not_wait_for_sink() {
        let ctx = AudioContext::new(8_000);
        let (mut recorder, mut tap) = Recorder::new(&ctx, 1.0);
        let (release, gate) = std::sync::mpsc::channel();
        let sink = OpenSink::open(Box::new(GatedSink { release: gate }), 8_000).unwrap();
        assert!(recorder.start_recording(sink).unwrap());
        tap.push((0.1, 0.1));

        // Returns while the writer is still stuck in finish()
        let pending = recorder.stop_recording().unwrap();
        assert!(!recorder.is_recording());
        assert!(!recorder.start_recording(open(MemorySink::default())).unwrap());

        release.send(()).unwrap();
        let summary = pending.wait().unwrap();
        assert_eq!(summary.frames_written, 1);
        assert!(recorder.start_recording(open(MemorySink::default())).unwrap());
    }

    #[test]
    fn test_dropped_recorder_still_finishes_sink() {
        let ctx = AudioContext::new(8_000);
        let (mut recorder, mut tap) = Recorder::new(&ctx, 1.0);
        let sink = MemorySink::default();
        assert!(recorder.start_recording(open(sink.clone())).unwrap());
        tap.push((0.5, 0.5));
        drop(recorder);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !sink.finished.load(Ordering::SeqCst) {
            assert!(std::time::Instant::now() < deadline, "writer never finished");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sink.samples.lock().len(), 2);
    }

    #[test]
    fn test_timestamped_name() {
        let sink = WavCaptureSink::timestamped(Path::new("/tmp/sets"));
        let name = sink.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("twindeck-") && name.ends_with(".wav"));
        assert_eq!(sink.path().parent(), Some(Path::new("/tmp/sets")));
    }
}
