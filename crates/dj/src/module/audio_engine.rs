//! Output stream.
//!
//! Opens a cpal output device and runs the [`RenderGraph`] inside its
//! callback. The master mix goes to the first two device channels.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, Stream, StreamConfig, SupportedBufferSize};
use thiserror::Error;

use crate::config::AudioConfig;
use crate::render::RenderGraph;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no output device available")]
    NoDevice,

    #[error("failed to enumerate devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query stream configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("failed to get default stream config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    Build(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),

    #[error("output stream already running")]
    AlreadyRunning,
}

/// An opened output device, optionally running a render graph.
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
}

impl AudioOutput {
    /// Pick a device and negotiate a stereo (or wider) f32 config.
    pub fn open(config: &AudioConfig) -> Result<Self, OutputError> {
        let device = find_device(&config.device_name)?;
        let stream_config = find_config(&device, config)?;
        log::info!(
            "Output device ready: {} channels @ {} Hz",
            stream_config.channels,
            stream_config.sample_rate
        );
        Ok(Self {
            device,
            config: stream_config,
            stream: None,
        })
    }

    /// The rate the render graph's context must be created with.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Move `graph` into the device callback and start the stream.
    pub fn start(&mut self, mut graph: RenderGraph) -> Result<(), OutputError> {
        if self.stream.is_some() {
            return Err(OutputError::AlreadyRunning);
        }
        let channels = self.config.channels as usize;
        let stream = self.device.build_output_stream(
            &self.config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                graph.render_interleaved(data, channels);
            },
            |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )?;
        stream.play()?;
        self.stream = Some(stream);
        log::info!("Audio output started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            log::info!("Audio output stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Device whose name contains `name`, falling back to the default.
fn find_device(name: &str) -> Result<Device, OutputError> {
    let host = cpal::default_host();

    if name.is_empty() {
        return host.default_output_device().ok_or(OutputError::NoDevice);
    }

    for device in host.output_devices()? {
        if let Ok(device_name) = device.name() {
            if device_name.contains(name) {
                log::info!("Found audio device: {}", device_name);
                return Ok(device);
            }
        }
    }

    log::warn!("Device '{}' not found, using default", name);
    host.default_output_device().ok_or(OutputError::NoDevice)
}

fn find_config(device: &Device, config: &AudioConfig) -> Result<StreamConfig, OutputError> {
    let target_rate = config.sample_rate;

    for range in device.supported_output_configs()? {
        if range.channels() < 2 || range.sample_format() != SampleFormat::F32 {
            continue;
        }
        if target_rate < range.min_sample_rate() || target_rate > range.max_sample_rate() {
            continue;
        }
        let buffer_size = match range.buffer_size() {
            SupportedBufferSize::Range { min, max }
                if (*min..=*max).contains(&config.buffer_size) =>
            {
                BufferSize::Fixed(config.buffer_size)
            }
            _ => BufferSize::Default,
        };
        let mut stream_config: StreamConfig = range.with_sample_rate(target_rate).into();
        stream_config.buffer_size = buffer_size;
        return Ok(stream_config);
    }

    let default_config = device.default_output_config()?;
    log::warn!(
        "No stereo f32 config at {} Hz, using device default ({} channels @ {} Hz)",
        target_rate,
        default_config.channels(),
        default_config.sample_rate()
    );
    Ok(default_config.into())
}

/// Information about an audio output device.
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    /// Maximum number of output channels.
    pub max_channels: u16,
    pub is_default: bool,
}

/// List available audio output devices with their capabilities.
pub fn list_audio_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = default_device_name().unwrap_or_default();

    let mut devices = Vec::new();

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let max_channels = device
                    .supported_output_configs()
                    .ok()
                    .and_then(|configs| configs.map(|c| c.channels()).max())
                    .unwrap_or(2);

                devices.push(AudioDeviceInfo {
                    is_default: name == default_name,
                    name,
                    max_channels,
                });
            }
        }
    }

    devices
}

/// Get the default audio device name.
pub fn default_device_name() -> Option<String> {
    let host = cpal::default_host();
    host.default_output_device().and_then(|d| d.name().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices() {
        // Must not panic on machines without audio hardware
        let devices = list_audio_devices();
        println!("Available audio devices: {:?}", devices);
    }
}
