use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::error::ConfigError;
use crate::models::{BackendKind, DeviceConfig, PlaybackMode, SampleFormat};

/// Player configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub volume: f32,
    pub max_volume: f32,
    pub backend: BackendKind,
    pub device: Option<String>,
    pub samplerate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub block_frames: u32,
    pub playback_mode: PlaybackMode,
    /// Follow the selected track's native samplerate.
    pub match_samplerate: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        let device = DeviceConfig::default();
        Self {
            volume: 1.0,
            max_volume: 3.0,
            backend: BackendKind::default(),
            device: device.device,
            samplerate: device.samplerate,
            channels: device.channels,
            sample_format: device.sample_format,
            block_frames: device.block_frames,
            playback_mode: PlaybackMode::default(),
            match_samplerate: true,
        }
    }
}

impl PlayerConfig {
    /// Device parameters the engine starts with
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            samplerate: self.samplerate,
            channels: self.channels,
            sample_format: self.sample_format,
            device: self.device.clone(),
            block_frames: self.block_frames,
        }
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: PlayerConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::with_path(config_path)
    }

    /// Manager backed by an explicit file; a missing file yields defaults
    pub fn with_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let config = Self::load_config(&config_path)?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut PlayerConfig),
    {
        updater(&mut self.config);
        self.save_config()
    }

    pub fn set_volume(&mut self, volume: f32) -> Result<(), ConfigError> {
        if volume.is_nan() {
            return Ok(());
        }
        self.config.volume = volume.clamp(0.0, self.config.max_volume);
        self.save_config()
    }

    pub fn set_device(&mut self, device: Option<String>) -> Result<(), ConfigError> {
        self.config.device = device;
        self.save_config()
    }

    pub fn set_backend(&mut self, backend: BackendKind) -> Result<(), ConfigError> {
        self.config.backend = backend;
        self.save_config()
    }

    pub fn set_playback_mode(&mut self, mode: PlaybackMode) -> Result<(), ConfigError> {
        self.config.playback_mode = mode;
        self.save_config()
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = PlayerConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::home_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(".config")
            .join("seaplayer");

        std::fs::create_dir_all(&config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<PlayerConfig, ConfigError> {
        if !path.exists() {
            return Ok(PlayerConfig::default());
        }

        let config_content = std::fs::read_to_string(path)?;
        let config: PlayerConfig = toml::from_str(&config_content)?;

        Ok(config)
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let config_content = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, config_content)?;

        Ok(())
    }
}
