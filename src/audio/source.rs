use std::fs::File;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::audio::{AudioSource, MetadataExtractor};
use crate::error::SourceError;
use crate::models::AudioMetadata;

/// File extensions the player tries to open
pub const SUPPORTED_EXTENSIONS: &[&str] = &["flac", "wav", "wave", "mp3", "ogg", "oga", "m4a", "aac", "alac"];

pub fn is_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Audio source decoding a file through symphonia
pub struct FileAudioSource {
    path: PathBuf,
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    samplerate: u32,
    channels: u16,
    frames: u64,
    bitrate: Option<u32>,
    container: String,
    metadata: AudioMetadata,

    sample_buf: Option<SampleBuffer<f32>>,
    pending: Vec<f32>,
    pending_offset: usize,
    /// Frames still to discard after an inexact seek
    skip_frames: u64,
    position: u64,
    exhausted: bool,
}

impl FileAudioSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| SourceError::Unreadable(format!("Failed to open {}: {}", path.display(), e)))?;
        let file_size = file.metadata().map(|m| m.len()).ok();

        let media_source = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext_str) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext_str);
        }

        let mut probed = symphonia::default::get_probe()
            .format(&hint, media_source, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| SourceError::UnsupportedFormat {
                format: format!("{}: {}", path.display(), e),
            })?;

        let track = probed
            .format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| SourceError::UnsupportedFormat {
                format: format!("{}: no audio track found", path.display()),
            })?;

        let track_id = track.id;
        let codec = track.codec_params.codec;
        let samplerate = track.codec_params.sample_rate.ok_or_else(|| {
            SourceError::Unreadable(format!("{}: unknown sample rate", path.display()))
        })?;
        let channels = track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let frames = track.codec_params.n_frames.unwrap_or(0);
        let time_base = track.codec_params.time_base;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| SourceError::UnsupportedFormat {
                format: format!("{}: {}", path.display(), e),
            })?;

        let metadata = MetadataExtractor::extract(&mut probed.metadata, probed.format.as_mut());
        let container = MetadataExtractor::container_name(path, codec);
        let bitrate = estimate_bitrate(file_size, frames, samplerate);

        debug!(
            "Opened {} ({} Hz, {} ch, {} frames, {})",
            path.display(),
            samplerate,
            channels,
            frames,
            container
        );

        Ok(Self {
            path: path.to_path_buf(),
            format_reader: probed.format,
            decoder,
            track_id,
            time_base,
            samplerate,
            channels,
            frames,
            bitrate,
            container,
            metadata,
            sample_buf: None,
            pending: Vec::new(),
            pending_offset: 0,
            skip_frames: 0,
            position: 0,
            exhausted: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode packets until new samples are pending or the stream ends
    fn refill(&mut self) -> Result<(), SourceError> {
        self.pending.clear();
        self.pending_offset = 0;

        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.exhausted = true;
                    return Ok(());
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(err) => {
                    return Err(SourceError::Unreadable(format!("Failed to read packet: {}", err)));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(err)) => {
                    warn!("Skipping corrupt packet in {}: {}", self.path.display(), err);
                    continue;
                }
                Err(err) => {
                    return Err(SourceError::Unreadable(format!("Failed to decode packet: {}", err)));
                }
            };

            if decoded.frames() == 0 {
                continue;
            }

            let needed = decoded.capacity() * decoded.spec().channels.count();
            let reuse = self.sample_buf.as_ref().map_or(false, |buf| buf.capacity() >= needed);
            if !reuse {
                self.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, *decoded.spec()));
            }
            let Some(sample_buf) = self.sample_buf.as_mut() else {
                continue;
            };
            sample_buf.copy_interleaved_ref(decoded);

            let samples = sample_buf.samples();
            let channels = self.channels as usize;
            let skip = (self.skip_frames as usize * channels).min(samples.len());
            self.skip_frames -= (skip / channels) as u64;

            if skip < samples.len() {
                self.pending.extend_from_slice(&samples[skip..]);
                return Ok(());
            }
        }
    }

    fn frame_of(&self, ts: u64) -> u64 {
        match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(ts);
                time.seconds * self.samplerate as u64 + (time.frac * self.samplerate as f64).round() as u64
            }
            None => ts,
        }
    }
}

fn estimate_bitrate(file_size: Option<u64>, frames: u64, samplerate: u32) -> Option<u32> {
    let size = file_size?;
    if frames == 0 || samplerate == 0 {
        return None;
    }
    let seconds = frames as f64 / samplerate as f64;
    Some((size as f64 * 8.0 / seconds) as u32)
}

impl AudioSource for FileAudioSource {
    fn read(&mut self, out: &mut [f32]) -> Result<usize, SourceError> {
        let channels = self.channels as usize;
        let wanted = out.len() / channels * channels;
        let mut written = 0usize;

        while written < wanted {
            if self.pending_offset >= self.pending.len() {
                if self.exhausted {
                    break;
                }
                self.refill()?;
                continue;
            }

            let available = self.pending.len() - self.pending_offset;
            let n = available.min(wanted - written);
            out[written..written + n]
                .copy_from_slice(&self.pending[self.pending_offset..self.pending_offset + n]);
            self.pending_offset += n;
            written += n;
        }

        let frames = written / channels;
        self.position += frames as u64;
        Ok(frames)
    }

    fn seek(&mut self, frame: u64) -> Result<(), SourceError> {
        let target = if self.frames > 0 { frame.min(self.frames) } else { frame };
        if self.frames > 0 && target == self.frames {
            // Readers reject seeking exactly to the end
            self.pending.clear();
            self.pending_offset = 0;
            self.skip_frames = 0;
            self.exhausted = true;
            self.position = target;
            return Ok(());
        }
        let rate = self.samplerate as u64;
        let time = Time::new(target / rate, (target % rate) as f64 / rate as f64);

        let seeked = self
            .format_reader
            .seek(SeekMode::Accurate, SeekTo::Time { time, track_id: Some(self.track_id) })
            .map_err(|e| SourceError::Seek(format!("Seek to frame {} failed: {}", target, e)))?;

        self.decoder.reset();
        self.pending.clear();
        self.pending_offset = 0;
        self.exhausted = false;

        let actual = self.frame_of(seeked.actual_ts);
        self.skip_frames = target.saturating_sub(actual);
        self.position = target;
        Ok(())
    }

    fn tell(&mut self) -> Result<u64, SourceError> {
        Ok(self.position)
    }

    fn frames(&self) -> u64 {
        self.frames
    }

    fn samplerate(&self) -> u32 {
        self.samplerate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn bitrate(&self) -> Option<u32> {
        self.bitrate
    }

    fn container_format(&self) -> &str {
        &self.container
    }

    fn name(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn metadata(&self) -> &AudioMetadata {
        &self.metadata
    }
}

/// Minimal 16-bit PCM WAV writer for tests
#[cfg(test)]
pub(crate) fn write_test_wav(path: &Path, samplerate: u32, channels: u16, samples: &[i16]) {
    use std::io::Write;

    let data_len = (samples.len() * 2) as u32;
    let block_align = channels * 2;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&samplerate.to_le_bytes());
    bytes.extend_from_slice(&(samplerate * block_align as u32).to_le_bytes());
    bytes.extend_from_slice(&block_align.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    let mut file = File::create(path).unwrap();
    file.write_all(&bytes).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ramp_wav(dir: &TempDir, frames: usize) -> PathBuf {
        let path = dir.path().join("ramp.wav");
        let samples: Vec<i16> = (0..frames).map(|i| (i % 1000) as i16 * 16).collect();
        write_test_wav(&path, 8000, 1, &samples);
        path
    }

    #[test]
    fn test_open_nonexistent_file() {
        match FileAudioSource::open("/nonexistent/file.flac") {
            Err(SourceError::Unreadable(msg)) => assert!(msg.contains("Failed to open")),
            other => panic!("Expected Unreadable, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_open_garbage_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, b"definitely not audio").unwrap();

        assert!(FileAudioSource::open(&path).is_err());
    }

    #[test]
    fn test_wav_properties() {
        let dir = TempDir::new().unwrap();
        let path = ramp_wav(&dir, 8000);
        let source = FileAudioSource::open(&path).unwrap();

        assert_eq!(source.samplerate(), 8000);
        assert_eq!(source.channels(), 1);
        assert_eq!(source.frames(), 8000);
        assert_eq!(source.container_format(), "WAV");
        assert_eq!(source.name(), Some(path.as_path()));
        assert!(source.bitrate().is_some());
    }

    #[test]
    fn test_wav_read_to_end() {
        let dir = TempDir::new().unwrap();
        let path = ramp_wav(&dir, 3000);
        let mut source = FileAudioSource::open(&path).unwrap();

        let mut out = vec![0.0f32; 1024];
        let mut total = 0;
        loop {
            let n = source.read(&mut out).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }

        assert_eq!(total, 3000);
        assert_eq!(source.tell().unwrap(), 3000);
    }

    #[test]
    fn test_wav_sample_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("half.wav");
        write_test_wav(&path, 8000, 2, &[16384, -16384, 16384, -16384]);
        let mut source = FileAudioSource::open(&path).unwrap();

        let mut out = [0.0f32; 4];
        assert_eq!(source.read(&mut out).unwrap(), 2);
        assert!((out[0] - 0.5).abs() < 1e-4);
        assert!((out[1] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_wav_seek_and_rewind() {
        let dir = TempDir::new().unwrap();
        let path = ramp_wav(&dir, 4000);
        let mut source = FileAudioSource::open(&path).unwrap();

        source.seek(500).unwrap();
        assert_eq!(source.tell().unwrap(), 500);

        let mut out = [0.0f32; 1];
        source.read(&mut out).unwrap();
        assert!((out[0] - 500.0 * 16.0 / 32768.0).abs() < 1e-4);

        source.seek(0).unwrap();
        let mut rest = vec![0.0f32; 8000];
        assert_eq!(source.read(&mut rest).unwrap(), 4000);
    }

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_extension(Path::new("a/b.FLAC")));
        assert!(is_supported_extension(Path::new("song.mp3")));
        assert!(!is_supported_extension(Path::new("cover.jpg")));
        assert!(!is_supported_extension(Path::new("README")));
    }
}
