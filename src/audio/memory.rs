use std::path::{Path, PathBuf};

use crate::audio::AudioSource;
use crate::error::SourceError;
use crate::models::AudioMetadata;

/// Audio source over interleaved samples held in memory
#[derive(Debug, Clone)]
pub struct PcmBufferSource {
    samples: Vec<f32>,
    channels: u16,
    samplerate: u32,
    position: u64,
    metadata: AudioMetadata,
    name: Option<PathBuf>,
}

impl PcmBufferSource {
    /// Wrap interleaved samples. A trailing partial frame is dropped.
    pub fn new(mut samples: Vec<f32>, channels: u16, samplerate: u32) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);

        Self {
            samples,
            channels,
            samplerate,
            position: 0,
            metadata: AudioMetadata::new(),
            name: None,
        }
    }

    /// Every sample of every frame set to `value`
    pub fn constant(value: f32, frames: u64, channels: u16, samplerate: u32) -> Self {
        let len = frames as usize * channels.max(1) as usize;
        Self::new(vec![value; len], channels, samplerate)
    }

    /// Samples generated per `(frame, channel)`
    pub fn from_fn<F>(frames: u64, channels: u16, samplerate: u32, mut f: F) -> Self
    where
        F: FnMut(u64, u16) -> f32,
    {
        let channels = channels.max(1);
        let mut samples = Vec::with_capacity(frames as usize * channels as usize);
        for frame in 0..frames {
            for channel in 0..channels {
                samples.push(f(frame, channel));
            }
        }
        Self::new(samples, channels, samplerate)
    }

    pub fn with_metadata(mut self, metadata: AudioMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_name(mut self, name: impl Into<PathBuf>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl AudioSource for PcmBufferSource {
    fn read(&mut self, out: &mut [f32]) -> Result<usize, SourceError> {
        let channels = self.channels as usize;
        let wanted = out.len() / channels;
        let remaining = (self.frames() - self.position) as usize;
        let frames = wanted.min(remaining);

        let start = self.position as usize * channels;
        let len = frames * channels;
        out[..len].copy_from_slice(&self.samples[start..start + len]);

        self.position += frames as u64;
        Ok(frames)
    }

    fn seek(&mut self, frame: u64) -> Result<(), SourceError> {
        self.position = frame.min(self.frames());
        Ok(())
    }

    fn tell(&mut self) -> Result<u64, SourceError> {
        Ok(self.position)
    }

    fn frames(&self) -> u64 {
        (self.samples.len() / self.channels as usize) as u64
    }

    fn samplerate(&self) -> u32 {
        self.samplerate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn bitrate(&self) -> Option<u32> {
        Some(self.samplerate.saturating_mul(self.channels as u32).saturating_mul(32))
    }

    fn container_format(&self) -> &str {
        "PCM"
    }

    fn name(&self) -> Option<&Path> {
        self.name.as_deref()
    }

    fn metadata(&self) -> &AudioMetadata {
        &self.metadata
    }
}
