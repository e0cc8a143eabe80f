pub mod buffer;
pub mod device;
pub mod memory;
pub mod metadata;
pub mod source;

use std::path::Path;

use crate::error::SourceError;

pub use buffer::RingBuffer;
pub use device::{DeviceManager, OutputDeviceInfo};
pub use memory::PcmBufferSource;
pub use metadata::MetadataExtractor;
pub use source::{is_supported_extension, FileAudioSource, SUPPORTED_EXTENSIONS};

pub use crate::models::{AudioMetadata, CoverImage};

/// Sequential, seekable provider of interleaved f32 PCM frames
pub trait AudioSource: Send {
    /// Fill `out` with whole interleaved frames and return how many frames
    /// were written. Fewer than requested means the end of the stream was
    /// reached; zero means the source is exhausted.
    fn read(&mut self, out: &mut [f32]) -> Result<usize, SourceError>;

    /// Move the cursor to an absolute frame index. Targets past the end are
    /// clamped to the end.
    fn seek(&mut self, frame: u64) -> Result<(), SourceError>;

    /// Current cursor position in frames
    fn tell(&mut self) -> Result<u64, SourceError>;

    /// Total length in frames
    fn frames(&self) -> u64;

    fn samplerate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Average bitrate in bits per second, when it can be determined
    fn bitrate(&self) -> Option<u32>;

    /// Short container name such as `FLAC` or `WAV`
    fn container_format(&self) -> &str;

    /// Backing file, if any
    fn name(&self) -> Option<&Path>;

    fn metadata(&self) -> &AudioMetadata;
}
