//! Engine configuration and its JSON persistence.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::BpmConfig;

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub display: DisplayConfig,
    pub analysis: BpmConfig,
    pub effects: EffectsConfig,
    pub mixer: MixerConfig,
    pub recording: RecordingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name (empty for the system default).
    pub device_name: String,
    pub sample_rate: u32,
    pub buffer_size: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            sample_rate: 44100,
            buffer_size: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Status refresh rate.
    pub fps: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { fps: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    pub echo_delay_ms: f32,
    pub echo_feedback: f32,
    pub reverb_seconds: f32,
    pub reverb_decay: f32,
    pub flanger_center_ms: f32,
    pub flanger_depth_ms: f32,
    pub flanger_rate_hz: f32,
    pub wet_smoothing_ms: f32,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            echo_delay_ms: 500.0,
            echo_feedback: 0.4,
            reverb_seconds: 2.5,
            reverb_decay: 2.0,
            flanger_center_ms: 5.0,
            flanger_depth_ms: 2.0,
            flanger_rate_hz: 0.5,
            wet_smoothing_ms: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Channel gain and crossfader ramp.
    pub gain_smoothing_ms: f32,
    /// Trim, EQ and filter ramp.
    pub param_smoothing_ms: f32,
    /// Fade applied when a deck starts or stops.
    pub declick_ms: f32,
    pub low_shelf_hz: f32,
    pub mid_peak_hz: f32,
    pub mid_q: f32,
    pub high_shelf_hz: f32,
    /// Frames per RMS meter window.
    pub meter_window: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            gain_smoothing_ms: 50.0,
            param_smoothing_ms: 20.0,
            declick_ms: 5.0,
            low_shelf_hz: 320.0,
            mid_peak_hz: 1000.0,
            mid_q: 0.5,
            high_shelf_hz: 3200.0,
            meter_window: 2048,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Where timestamped recordings are written.
    pub directory: PathBuf,
    /// Seconds of master audio buffered between the renderer and the writer.
    pub buffer_seconds: f32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        let directory = dirs::audio_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("twindeck");
        Self {
            directory,
            buffer_seconds: 2.0,
        }
    }
}

impl EngineConfig {
    /// Check ranges. Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if !(8_000..=192_000).contains(&self.audio.sample_rate) {
            errors.push(format!(
                "audio.sample_rate must be 8000-192000, got {}",
                self.audio.sample_rate
            ));
        }
        if !(16..=8192).contains(&self.audio.buffer_size) {
            errors.push(format!(
                "audio.buffer_size must be 16-8192, got {}",
                self.audio.buffer_size
            ));
        }
        if !(1..=240).contains(&self.display.fps) {
            errors.push(format!("display.fps must be 1-240, got {}", self.display.fps));
        }
        if !(0.0..1.0).contains(&self.effects.echo_feedback) {
            errors.push(format!(
                "effects.echo_feedback must be in [0, 1), got {}",
                self.effects.echo_feedback
            ));
        }
        if !(self.effects.reverb_seconds > 0.0 && self.effects.reverb_seconds <= 10.0) {
            errors.push(format!(
                "effects.reverb_seconds must be in (0, 10], got {}",
                self.effects.reverb_seconds
            ));
        }
        if self.effects.flanger_depth_ms > self.effects.flanger_center_ms {
            errors.push("effects.flanger_depth_ms cannot exceed flanger_center_ms".to_string());
        }
        if self.mixer.meter_window == 0 {
            errors.push("mixer.meter_window must be positive".to_string());
        }
        if !(self.analysis.min_bpm > 0.0 && self.analysis.max_bpm >= self.analysis.min_bpm * 2.0)
        {
            errors.push(format!(
                "analysis tempo range {}-{} must span at least one octave",
                self.analysis.min_bpm, self.analysis.max_bpm
            ));
        }
        if self.recording.buffer_seconds <= 0.0 {
            errors.push("recording.buffer_seconds must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Persisted configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub config: EngineConfig,
    pub created_at: String,
    pub modified_at: String,
}

/// Loads and saves [`EngineConfig`] as JSON.
pub struct ConfigManager {
    config_path: PathBuf,
    config: EngineConfig,
    created_at: Option<String>,
}

impl ConfigManager {
    /// Defaults to `~/.twindeck/config.json`.
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let config_path = config_path.unwrap_or_else(Self::default_path);
        Self {
            config_path,
            config: EngineConfig::default(),
            created_at: None,
        }
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".twindeck")
            .join("config.json")
    }

    /// Load the configuration, writing defaults if the file does not exist.
    pub fn load(&mut self) -> Result<EngineConfig, ConfigError> {
        if !self.config_path.exists() {
            log::info!("No config at {:?}, writing defaults", self.config_path);
            self.save()?;
            return Ok(self.config.clone());
        }

        let content = fs::read_to_string(&self.config_path).map_err(ConfigError::Read)?;
        let file: ConfigFile = serde_json::from_str(&content).map_err(ConfigError::Parse)?;

        if file.version != env!("CARGO_PKG_VERSION") {
            log::warn!(
                "Config file version {} doesn't match engine version {}, using defaults for new settings",
                file.version,
                env!("CARGO_PKG_VERSION")
            );
        }

        file.config.validate()?;
        self.config = file.config;
        self.created_at = Some(file.created_at);
        Ok(self.config.clone())
    }

    pub fn save(&mut self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if parent != Path::new("") && parent != Path::new(".") {
                fs::create_dir_all(parent).map_err(ConfigError::Write)?;
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let created_at = self.created_at.get_or_insert_with(|| now.clone()).clone();
        let file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config: self.config.clone(),
            created_at,
            modified_at: now,
        };

        let content = serde_json::to_string_pretty(&file).map_err(ConfigError::Serialize)?;
        fs::write(&self.config_path, content).map_err(ConfigError::Write)?;
        log::debug!("Saved config to {:?}", self.config_path);
        Ok(())
    }

    /// Replace the configuration and persist it.
    pub fn update(&mut self, config: EngineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        self.save()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to write config file: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("config validation errors: {}", .0.join(", "))]
    Validation(Vec<String>),
}
