//! Compressed audio to [`Track`] decoding.

use std::io::Cursor;

use symphonia::core::audio::{AudioBuffer, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::track::Track;

/// Failure to turn source bytes into a [`Track`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported format: {0}")]
    Unsupported(String),
    #[error("no audio track in source")]
    NoAudioTrack,
    #[error("corrupt audio data: {0}")]
    Corrupt(String),
    #[error("source decoded to zero frames")]
    Empty,
    #[error("invalid sample layout: {0}")]
    InvalidLayout(String),
}

impl From<SymphoniaError> for DecodeError {
    fn from(err: SymphoniaError) -> Self {
        match err {
            SymphoniaError::Unsupported(what) => Self::Unsupported(what.to_string()),
            other => Self::Corrupt(other.to_string()),
        }
    }
}

/// Anything that can turn an encoded file into PCM.
pub trait Decoder: Send + Sync {
    /// Decode `bytes`. `extension` is a hint such as `"mp3"`.
    fn decode(&self, bytes: Vec<u8>, extension: Option<&str>) -> Result<Track, DecodeError>;
}

/// Decoder backed by symphonia (WAV, AIFF, MP3, FLAC).
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoder;

impl Decoder for SymphoniaDecoder {
    fn decode(&self, bytes: Vec<u8>, extension: Option<&str>) -> Result<Track, DecodeError> {
        let source_len = bytes.len();
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| DecodeError::Unsupported("missing sample rate".into()))?;

        let mut decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        let mut channels: Vec<Vec<f32>> = Vec::new();
        let mut skipped_packets = 0usize;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let mut planar: AudioBuffer<f32> = decoded.make_equivalent();
                    decoded.convert(&mut planar);
                    let count = planar.spec().channels.count();
                    if channels.is_empty() {
                        channels = vec![Vec::new(); count];
                    }
                    for (ch, out) in channels.iter_mut().enumerate().take(count) {
                        out.extend_from_slice(planar.chan(ch));
                    }
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    skipped_packets += 1;
                    log::debug!("Skipping undecodable packet: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if skipped_packets > 0 {
            log::warn!("Skipped {} corrupt packets while decoding", skipped_packets);
        }

        let track = Track::new(channels, sample_rate)?;
        log::debug!(
            "Decoded {} bytes: {} frames, {} channels @ {} Hz",
            source_len,
            track.frames(),
            track.channel_count(),
            track.sample_rate()
        );
        Ok(track)
    }
}
