use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::EngineError;

/// Identifier handed out for every registered track
pub type TrackId = uuid::Uuid;

/// Embedded artwork found in the source container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Audio metadata extracted from files
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub cover_image: Option<CoverImage>,
}

impl AudioMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if metadata has any information
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.album.is_none()
            && self.cover_image.is_none()
    }

    /// Create metadata with basic information
    pub fn with_title_artist(title: String, artist: String) -> Self {
        Self {
            title: Some(title),
            artist: Some(artist),
            ..Default::default()
        }
    }
}

/// Playback state enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// Requests that move the playback state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Play,
    Stop,
    Pause,
    Unpause,
    /// Raised by the audio thread when the selected source runs dry.
    TrackEnded,
}

impl PlaybackState {
    /// Transition table. `None` means the request does not apply to the
    /// current state and must not produce a notification.
    ///
    /// `Paused` is only reachable from `Playing`: pausing a stopped player is
    /// a no-op, and `Play` while paused is a no-op as well (use `Unpause`).
    pub fn on(self, transition: Transition) -> Option<PlaybackState> {
        use PlaybackState::*;
        match (self, transition) {
            (Stopped, Transition::Play) => Some(Playing),
            (Playing, Transition::Pause) => Some(Paused),
            (Paused, Transition::Unpause) => Some(Playing),
            (Playing | Paused, Transition::Stop) => Some(Stopped),
            (Playing, Transition::TrackEnded) => Some(Stopped),
            _ => None,
        }
    }

    /// Get a human-readable string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "Stopped",
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            PlaybackState::Stopped => 0,
            PlaybackState::Playing => 1,
            PlaybackState::Paused => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => PlaybackState::Playing,
            2 => PlaybackState::Paused,
            _ => PlaybackState::Stopped,
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happens once the selected track has played to its end
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PlaybackMode {
    /// Advance through the registry once, stop after the last track.
    #[default]
    Play,
    /// Replay the same track.
    RepeatTrack,
    /// Advance through the registry, wrapping to the first track.
    RepeatList,
}

impl PlaybackMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackMode::Play => "play",
            PlaybackMode::RepeatTrack => "repeat-track",
            PlaybackMode::RepeatList => "repeat-list",
        }
    }

    /// Cycle to the following mode
    pub fn next(self) -> Self {
        match self {
            PlaybackMode::Play => PlaybackMode::RepeatTrack,
            PlaybackMode::RepeatTrack => PlaybackMode::RepeatList,
            PlaybackMode::RepeatList => PlaybackMode::Play,
        }
    }
}

impl FromStr for PlaybackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "play" => Ok(PlaybackMode::Play),
            "repeat-track" | "track" => Ok(PlaybackMode::RepeatTrack),
            "repeat-list" | "list" => Ok(PlaybackMode::RepeatList),
            other => Err(format!("unknown playback mode '{}'", other)),
        }
    }
}

/// Output sample type delivered to the device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    #[default]
    F32,
    I16,
    U16,
}

impl SampleFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleFormat::F32 => "f32",
            SampleFormat::I16 => "i16",
            SampleFormat::U16 => "u16",
        }
    }

    pub fn to_cpal(self) -> cpal::SampleFormat {
        match self {
            SampleFormat::F32 => cpal::SampleFormat::F32,
            SampleFormat::I16 => cpal::SampleFormat::I16,
            SampleFormat::U16 => cpal::SampleFormat::U16,
        }
    }
}

impl FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "f32" | "float32" => Ok(SampleFormat::F32),
            "i16" | "int16" => Ok(SampleFormat::I16),
            "u16" | "uint16" => Ok(SampleFormat::U16),
            other => Err(format!("unsupported sample format '{}'", other)),
        }
    }
}

/// Concurrency strategy used to feed the audio hardware
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The device calls the renderer on its own real-time thread.
    #[default]
    Callback,
    /// A loop thread pushes rendered chunks into a device ring buffer.
    Thread,
    /// A helper process owns the device and receives chunks over a pipe.
    Process,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Callback => "callback",
            BackendKind::Thread => "thread",
            BackendKind::Process => "process",
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "callback" => Ok(BackendKind::Callback),
            "thread" | "async" => Ok(BackendKind::Thread),
            "process" | "multiprocess" => Ok(BackendKind::Process),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const MIN_SAMPLERATE: u32 = 8_000;
pub const MAX_SAMPLERATE: u32 = 384_000;
pub const MAX_CHANNELS: u16 = 32;

/// Stream parameters applied to a backend as one unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    pub samplerate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    /// Output device name, `None` for the host default.
    pub device: Option<String>,
    /// Frames rendered per push in the thread and process backends.
    pub block_frames: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            samplerate: 44_100,
            channels: 2,
            sample_format: SampleFormat::F32,
            device: None,
            block_frames: 1024,
        }
    }
}

impl DeviceConfig {
    /// Reject parameters no backend can honour
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(MIN_SAMPLERATE..=MAX_SAMPLERATE).contains(&self.samplerate) {
            return Err(EngineError::DeviceConfig(format!(
                "samplerate {} Hz outside {}..={} Hz",
                self.samplerate, MIN_SAMPLERATE, MAX_SAMPLERATE
            )));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(EngineError::DeviceConfig(format!(
                "channel count {} outside 1..={}",
                self.channels, MAX_CHANNELS
            )));
        }
        if self.block_frames == 0 {
            return Err(EngineError::DeviceConfig("block size must be at least one frame".to_string()));
        }
        Ok(())
    }

    /// Copy of this configuration with the supplied overrides applied
    pub fn merged(&self, overrides: &DeviceOverrides) -> DeviceConfig {
        DeviceConfig {
            samplerate: overrides.samplerate.unwrap_or(self.samplerate),
            channels: overrides.channels.unwrap_or(self.channels),
            sample_format: overrides.sample_format.unwrap_or(self.sample_format),
            device: overrides.device.clone().unwrap_or_else(|| self.device.clone()),
            block_frames: overrides.block_frames.unwrap_or(self.block_frames),
        }
    }

    /// Samples in one rendered block
    pub fn block_samples(&self) -> usize {
        self.block_frames as usize * self.channels as usize
    }

    pub fn describe(&self) -> String {
        format!(
            "{} Hz / {} / {} on {}",
            self.samplerate,
            channel_layout_name(self.channels),
            self.sample_format.as_str(),
            self.device.as_deref().unwrap_or("default device")
        )
    }
}

/// Subset of device parameters to change during reconfiguration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceOverrides {
    pub samplerate: Option<u32>,
    pub channels: Option<u16>,
    pub sample_format: Option<SampleFormat>,
    /// `Some(None)` switches back to the default device.
    pub device: Option<Option<String>>,
    pub block_frames: Option<u32>,
}

impl DeviceOverrides {
    pub fn samplerate(samplerate: u32) -> Self {
        Self {
            samplerate: Some(samplerate),
            ..Default::default()
        }
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_sample_format(mut self, format: SampleFormat) -> Self {
        self.sample_format = Some(format);
        self
    }

    pub fn with_device(mut self, device: Option<String>) -> Self {
        self.device = Some(device);
        self
    }
}

/// Fire-and-forget notifications posted to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    PlaybackStateChanged { state: PlaybackState },
    TrackEnded { id: TrackId },
}

/// Human name of a channel layout
pub fn channel_layout_name(channels: u16) -> &'static str {
    match channels {
        1 => "Mono",
        2 => "Stereo",
        3 => "2.1",
        4 => "Quad",
        6 => "5.1 Surround",
        8 => "7.1 Surround",
        _ => "Multichannel",
    }
}
