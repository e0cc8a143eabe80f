use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, TryLockError};
use std::time::Duration;

use uuid::Uuid;

use crate::audio::{AudioSource, FileAudioSource, RingBuffer};
use crate::error::SourceError;
use crate::models::{channel_layout_name, AudioMetadata, CoverImage, PlaybackState, TrackId};
use crate::playback::Playbacker;

/// How far the decode-ahead stage runs in front of playback
const LOOKAHEAD: Duration = Duration::from_millis(250);

/// Frames decoded per decode-ahead step
const DECODE_CHUNK_FRAMES: usize = 1024;

/// Outcome of pulling decoded frames on the audio thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pulled {
    /// Frames copied; fewer than asked is an underrun, not the end
    Frames(usize),
    /// The source is exhausted and these were the last frames
    End(usize),
    /// Decoding failed and nothing is left to play
    Failed,
}

/// One track's source plus the frames decoded ahead of playback.
///
/// Lock order is `reader` then `source`. The audio thread only `try_lock`s
/// `reader` and, when decoding ahead, never touches `source` at all.
pub struct TrackStream {
    source: Mutex<Box<dyn AudioSource>>,
    reader: Mutex<()>,
    ahead: OnceLock<RingBuffer>,
    exhausted: AtomicBool,
    failed: AtomicBool,
    channels: u16,
    samplerate: u32,
}

impl TrackStream {
    fn new(source: Box<dyn AudioSource>) -> Self {
        Self {
            channels: source.channels(),
            samplerate: source.samplerate(),
            source: Mutex::new(source),
            reader: Mutex::new(()),
            ahead: OnceLock::new(),
            exhausted: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        }
    }

    pub(crate) fn channels(&self) -> u16 {
        self.channels
    }

    fn lock_source(&self) -> MutexGuard<'_, Box<dyn AudioSource>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_reader(&self) -> MutexGuard<'_, ()> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn try_reader(&self) -> Option<MutexGuard<'_, ()>> {
        match self.reader.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub(crate) fn try_source(&self) -> Option<MutexGuard<'_, Box<dyn AudioSource>>> {
        match self.source.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn buffered_frames(&self) -> u64 {
        self.ahead
            .get()
            .map_or(0, |ring| (ring.available_read() / ring.channels() as usize) as u64)
    }

    /// Playback cursor: the decoder position minus what is still buffered
    pub(crate) fn tell(&self) -> Result<u64, SourceError> {
        let mut source = self.lock_source();
        let decoded = source.tell()?;
        Ok(decoded.saturating_sub(self.buffered_frames()))
    }

    /// Move the cursor and drop anything decoded from the old position
    fn seek(&self, frame: u64) -> Result<(), SourceError> {
        let _reader = self.lock_reader();
        let mut source = self.lock_source();
        if let Some(ring) = self.ahead.get() {
            ring.clear();
        }
        self.exhausted.store(false, Ordering::Release);
        self.failed.store(false, Ordering::Release);
        source.seek(frame)
    }

    /// Host-side read: buffered frames first, then the source
    fn read(&self, out: &mut [f32]) -> Result<usize, SourceError> {
        let _reader = self.lock_reader();
        let mut source = self.lock_source();
        let channels = self.channels as usize;
        let buffered = match self.ahead.get() {
            Some(ring) => ring.read(out) / channels,
            None => 0,
        };
        let decoded = source.read(&mut out[buffered * channels..])?;
        Ok(buffered + decoded)
    }

    /// Decode one chunk into the lookahead ring. Returns whether frames were
    /// added. Runs off the audio thread.
    pub(crate) fn decode_ahead(&self, scratch: &mut Vec<f32>) -> Result<bool, SourceError> {
        let mut source = self.lock_source();
        if self.exhausted.load(Ordering::Acquire) || self.failed.load(Ordering::Acquire) {
            return Ok(false);
        }

        let ring = self.ahead.get_or_init(|| {
            let frames = (self.samplerate as f64 * LOOKAHEAD.as_secs_f64()) as usize;
            RingBuffer::new(frames.max(DECODE_CHUNK_FRAMES * 2), self.channels)
        });
        let frames = ring.available_write_frames().min(DECODE_CHUNK_FRAMES);
        if frames == 0 {
            return Ok(false);
        }

        let channels = self.channels as usize;
        let needed = frames * channels;
        if scratch.len() < needed {
            scratch.resize(needed, 0.0);
        }
        let read = match source.read(&mut scratch[..needed]) {
            Ok(read) => read.min(frames),
            Err(e) => {
                self.failed.store(true, Ordering::Release);
                return Err(e);
            }
        };

        ring.write(&scratch[..read * channels]);
        if read < frames {
            self.exhausted.store(true, Ordering::Release);
        }
        Ok(read > 0)
    }

    pub(crate) fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// Audio-thread read from the lookahead ring. The caller holds
    /// `try_reader`.
    pub(crate) fn pull_ahead(&self, out: &mut [f32]) -> Pulled {
        let channels = self.channels.max(1) as usize;
        let failed = self.failed.load(Ordering::Acquire);
        let exhausted = self.exhausted.load(Ordering::Acquire);
        let (read, drained) = match self.ahead.get() {
            Some(ring) => {
                let read = ring.read(out) / channels;
                (read, ring.is_empty())
            }
            None => (0, true),
        };

        if failed && read == 0 {
            Pulled::Failed
        } else if exhausted && drained {
            Pulled::End(read)
        } else {
            Pulled::Frames(read)
        }
    }
}

/// A registered, playable handle wrapping one audio source.
///
/// Format properties are captured once at creation so display code never
/// contends with the audio thread for the source lock.
pub struct Track {
    id: TrackId,
    stream: Arc<TrackStream>,
    samplerate: u32,
    channels: u16,
    frames: u64,
    bitrate: Option<u32>,
    container: String,
    metadata: AudioMetadata,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("name", &self.display_name())
            .field("samplerate", &self.samplerate)
            .field("channels", &self.channels)
            .field("frames", &self.frames)
            .finish()
    }
}

impl Track {
    pub fn new(source: Box<dyn AudioSource>) -> Result<Self, SourceError> {
        if source.samplerate() == 0 {
            return Err(SourceError::Unreadable("source reports a samplerate of 0 Hz".to_string()));
        }
        if source.channels() == 0 {
            return Err(SourceError::Unreadable("source reports no channels".to_string()));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            samplerate: source.samplerate(),
            channels: source.channels(),
            frames: source.frames(),
            bitrate: source.bitrate(),
            container: source.container_format().to_string(),
            metadata: source.metadata().clone(),
            path: source.name().map(Path::to_path_buf),
            stream: Arc::new(TrackStream::new(source)),
        })
    }

    /// Open a file through symphonia
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let source = FileAudioSource::open(path)?;
        Self::new(Box::new(source))
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub(crate) fn stream(&self) -> Arc<TrackStream> {
        Arc::clone(&self.stream)
    }

    pub fn samplerate(&self) -> u32 {
        self.samplerate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn metadata(&self) -> &AudioMetadata {
        &self.metadata
    }

    pub fn cover_image(&self) -> Option<&CoverImage> {
        self.metadata.cover_image.as_ref()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.samplerate as f64
    }

    /// "Artist - Title", falling back to the title, then the file name
    pub fn display_name(&self) -> String {
        match (&self.metadata.artist, &self.metadata.title) {
            (Some(artist), Some(title)) => format!("{} - {}", artist, title),
            (None, Some(title)) => title.clone(),
            _ => self
                .path
                .as_deref()
                .and_then(Path::file_name)
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Unknown".to_string()),
        }
    }

    /// e.g. "44100 Hz, Stereo, 1411 kbps, FLAC"
    pub fn subtitle(&self) -> String {
        let mut parts = vec![
            format!("{} Hz", self.samplerate),
            channel_layout_name(self.channels).to_string(),
        ];
        if let Some(bitrate) = self.bitrate {
            parts.push(format!("{} kbps", bitrate / 1000));
        }
        parts.push(self.container.clone());
        parts.join(", ")
    }

    /// Current playback cursor in frames
    pub fn position(&self) -> Result<u64, SourceError> {
        self.stream.tell()
    }

    pub fn position_secs(&self) -> Result<f64, SourceError> {
        Ok(self.position()? as f64 / self.samplerate as f64)
    }

    /// Absolute seek in frames; the source clamps past-the-end targets
    pub fn seek(&self, frame: u64) -> Result<(), SourceError> {
        self.stream.seek(frame)
    }

    /// Absolute seek in seconds, clamped to `[0, duration]`
    pub fn set_position_secs(&self, seconds: f64) -> Result<(), SourceError> {
        let clamped = if seconds.is_nan() {
            0.0
        } else {
            seconds.clamp(0.0, self.duration_secs())
        };
        let frame = (clamped * self.samplerate as f64).round() as u64;
        self.seek(frame.min(self.frames))
    }

    /// Relative seek; negative offsets rewind and stop at zero
    pub fn seek_by(&self, offset_secs: f64) -> Result<(), SourceError> {
        let current = self.position_secs()?;
        self.set_position_secs(current + offset_secs)
    }

    /// Pull up to `n_frames` interleaved frames. An empty result means the
    /// source is exhausted.
    pub fn read(&self, n_frames: usize) -> Result<Vec<f32>, SourceError> {
        let channels = self.channels as usize;
        let mut buf = vec![0.0f32; n_frames * channels];
        let frames = self.stream.read(&mut buf)?;
        buf.truncate(frames * channels);
        Ok(buf)
    }

    pub fn is_selected(&self, playbacker: &Playbacker) -> bool {
        playbacker.selected_id() == Some(self.id)
    }

    pub fn is_playing(&self, playbacker: &Playbacker) -> bool {
        self.is_selected(playbacker) && playbacker.state() == PlaybackState::Playing
    }

    pub fn is_paused(&self, playbacker: &Playbacker) -> bool {
        self.is_selected(playbacker) && playbacker.state() == PlaybackState::Paused
    }
}
