use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use crossbeam_channel::Sender;
use log::warn;

use crate::models::{PlayerEvent, PlaybackState, TrackId, Transition};
use crate::playback::state::SharedState;
use crate::track::{Pulled, TrackStream};

/// Track handed to the audio thread on selection
pub(crate) struct ActiveTrack {
    pub id: TrackId,
    pub stream: Arc<TrackStream>,
}

/// Audio-thread side of the selection; changed only under the gate
pub(crate) struct RenderSlot {
    active: Option<ActiveTrack>,
    scratch: Vec<f32>,
}

/// The frame-production routine shared with every backend.
///
/// `render` never blocks: it only `try_lock`s, and any contention, error or
/// panic degrades to a full buffer of silence. With decode-ahead enabled it
/// only drains frames that `decode_ahead` prepared on another thread.
pub struct Renderer {
    shared: Arc<SharedState>,
    events: Sender<PlayerEvent>,
    slot: Mutex<RenderSlot>,
    decodes_ahead: bool,
    ahead_target: Mutex<Option<Arc<TrackStream>>>,
    decode_scratch: Mutex<Vec<f32>>,
}

impl Renderer {
    pub(crate) fn new(shared: Arc<SharedState>, events: Sender<PlayerEvent>, decodes_ahead: bool) -> Self {
        Self {
            shared,
            events,
            slot: Mutex::new(RenderSlot {
                active: None,
                scratch: Vec::new(),
            }),
            decodes_ahead,
            ahead_target: Mutex::new(None),
            decode_scratch: Mutex::new(Vec::new()),
        }
    }

    pub fn decodes_ahead(&self) -> bool {
        self.decodes_ahead
    }

    /// Hold off the audio thread while the Host changes state and cursor
    /// together. `render` yields silence while this guard is alive.
    pub(crate) fn gate(&self) -> MutexGuard<'_, RenderSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Point the renderer at `active`. Takes the gated slot so selection and
    /// renderer never disagree; the previous track is released here.
    pub(crate) fn set_active(&self, slot: &mut RenderSlot, active: Option<ActiveTrack>) {
        let target = active.as_ref().map(|track| Arc::clone(&track.stream));
        *self.ahead_target.lock().unwrap_or_else(PoisonError::into_inner) = target;
        slot.active = active;
    }

    /// Decode the next chunk of the selected track. Called off the audio
    /// thread by backends that decode ahead; returns whether frames were added.
    pub fn decode_ahead(&self) -> bool {
        let target = self
            .ahead_target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(stream) = target else {
            return false;
        };

        let mut scratch = self.decode_scratch.lock().unwrap_or_else(PoisonError::into_inner);
        match catch_unwind(AssertUnwindSafe(|| stream.decode_ahead(&mut scratch))) {
            Ok(Ok(added)) => added,
            Ok(Err(e)) => {
                warn!("Decoding ahead failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Source panicked while decoding ahead");
                stream.mark_failed();
                false
            }
        }
    }

    /// Fill `out` with interleaved frames for a device with `channels`
    /// channels. Always writes every sample of `out`.
    pub fn render(&self, out: &mut [f32], channels: u16) {
        let mut slot = match self.slot.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                out.fill(0.0);
                return;
            }
        };

        if self.shared.state() != PlaybackState::Playing || slot.active.is_none() {
            out.fill(0.0);
            return;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| self.render_active(&mut slot, out, channels)));
        match outcome {
            Ok(Ok(Some(id))) => self.finish_track(id),
            Ok(Ok(None)) => {}
            Ok(Err(message)) => {
                warn!("Source failed during playback: {}", message);
                out.fill(0.0);
                self.halt();
            }
            Err(_) => {
                warn!("Source panicked during playback; stopping");
                out.fill(0.0);
                self.halt();
            }
        }
    }

    /// Pull one block from the active track. Returns the track id when the
    /// source ran dry inside this block.
    fn render_active(
        &self,
        slot: &mut RenderSlot,
        out: &mut [f32],
        channels: u16,
    ) -> Result<Option<TrackId>, String> {
        let RenderSlot { active, scratch } = slot;
        let Some(active) = active.as_ref() else {
            out.fill(0.0);
            return Ok(None);
        };
        let stream = &active.stream;

        let dst_channels = channels.max(1) as usize;
        let src_channels = stream.channels().max(1) as usize;
        let wanted = out.len() / dst_channels;

        let Some(_reader) = stream.try_reader() else {
            out.fill(0.0);
            return Ok(None);
        };

        let needed = wanted * src_channels;
        if scratch.len() < needed {
            scratch.resize(needed, 0.0);
        }
        let input = &mut scratch[..needed];

        let (read, ended) = if self.decodes_ahead {
            match stream.pull_ahead(input) {
                Pulled::Frames(read) => (read, false),
                Pulled::End(read) => (read, true),
                Pulled::Failed => return Err("decoding ahead failed".to_string()),
            }
        } else {
            let Some(mut source) = stream.try_source() else {
                out.fill(0.0);
                return Ok(None);
            };
            let read = source.read(input).map_err(|e| e.to_string())?.min(wanted);
            (read, read < wanted)
        };

        let gain = self.shared.volume();
        let filled = read * dst_channels;
        map_channels(&input[..read * src_channels], src_channels, &mut out[..filled], dst_channels, gain);
        out[filled..].fill(0.0);

        Ok(ended.then_some(active.id))
    }

    fn finish_track(&self, id: TrackId) {
        if self.shared.apply(Transition::TrackEnded).is_some() {
            let _ = self.events.try_send(PlayerEvent::PlaybackStateChanged {
                state: PlaybackState::Stopped,
            });
            let _ = self.events.try_send(PlayerEvent::TrackEnded { id });
        }
    }

    fn halt(&self) {
        if let Some((_, to)) = self.shared.apply(Transition::Stop) {
            let _ = self.events.try_send(PlayerEvent::PlaybackStateChanged { state: to });
        }
    }
}

/// Copy `frames` from `src` into `dst`, adapting the channel count and
/// applying `gain`: mixdown to mono averages, mono is duplicated, anything
/// else copies the common channels and leaves the rest silent.
pub(crate) fn map_channels(src: &[f32], src_channels: usize, dst: &mut [f32], dst_channels: usize, gain: f32) {
    if src_channels == dst_channels {
        for (o, &s) in dst.iter_mut().zip(src.iter()) {
            *o = s * gain;
        }
        return;
    }

    let frames = dst.chunks_exact_mut(dst_channels).zip(src.chunks_exact(src_channels));
    if dst_channels == 1 {
        let scale = gain / src_channels as f32;
        for (o, frame) in frames {
            o[0] = frame.iter().sum::<f32>() * scale;
        }
    } else if src_channels == 1 {
        for (o, frame) in frames {
            o.fill(frame[0] * gain);
        }
    } else {
        let common = src_channels.min(dst_channels);
        for (o, frame) in frames {
            for (d, &s) in o[..common].iter_mut().zip(frame[..common].iter()) {
                *d = s * gain;
            }
            o[common..].fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::thread;
    use std::time::{Duration, Instant};

    use crossbeam_channel::{unbounded, Receiver};

    use crate::audio::{AudioSource, PcmBufferSource};
    use crate::error::SourceError;
    use crate::models::AudioMetadata;
    use crate::track::Track;

    struct Harness {
        renderer: Arc<Renderer>,
        shared: Arc<SharedState>,
        events: Receiver<PlayerEvent>,
    }

    impl Harness {
        fn load(&self, track: ActiveTrack) {
            let mut slot = self.renderer.gate();
            self.renderer.set_active(&mut slot, Some(track));
        }

        fn unload(&self) {
            let mut slot = self.renderer.gate();
            self.renderer.set_active(&mut slot, None);
        }
    }

    fn harness_with(decodes_ahead: bool) -> Harness {
        let shared = Arc::new(SharedState::new(1.0));
        let (event_tx, event_rx) = unbounded();
        Harness {
            renderer: Arc::new(Renderer::new(Arc::clone(&shared), event_tx, decodes_ahead)),
            shared,
            events: event_rx,
        }
    }

    fn harness() -> Harness {
        harness_with(false)
    }

    fn active(source: Box<dyn AudioSource>) -> ActiveTrack {
        let track = Track::new(source).unwrap();
        ActiveTrack {
            id: track.id(),
            stream: track.stream(),
        }
    }

    /// Reads like a slow disk
    struct SlowSource {
        inner: PcmBufferSource,
        delay: Duration,
    }

    impl AudioSource for SlowSource {
        fn read(&mut self, out: &mut [f32]) -> Result<usize, SourceError> {
            thread::sleep(self.delay);
            self.inner.read(out)
        }
        fn seek(&mut self, frame: u64) -> Result<(), SourceError> {
            self.inner.seek(frame)
        }
        fn tell(&mut self) -> Result<u64, SourceError> {
            self.inner.tell()
        }
        fn frames(&self) -> u64 {
            self.inner.frames()
        }
        fn samplerate(&self) -> u32 {
            self.inner.samplerate()
        }
        fn channels(&self) -> u16 {
            self.inner.channels()
        }
        fn bitrate(&self) -> Option<u32> {
            None
        }
        fn container_format(&self) -> &str {
            "TEST"
        }
        fn name(&self) -> Option<&Path> {
            None
        }
        fn metadata(&self) -> &AudioMetadata {
            self.inner.metadata()
        }
    }

    struct BrokenSource {
        metadata: AudioMetadata,
        panic: bool,
    }

    impl AudioSource for BrokenSource {
        fn read(&mut self, _out: &mut [f32]) -> Result<usize, SourceError> {
            if self.panic {
                panic!("decoder bug");
            }
            Err(SourceError::Unreadable("disk vanished".to_string()))
        }
        fn seek(&mut self, _frame: u64) -> Result<(), SourceError> {
            Ok(())
        }
        fn tell(&mut self) -> Result<u64, SourceError> {
            Ok(0)
        }
        fn frames(&self) -> u64 {
            100
        }
        fn samplerate(&self) -> u32 {
            8000
        }
        fn channels(&self) -> u16 {
            1
        }
        fn bitrate(&self) -> Option<u32> {
            None
        }
        fn container_format(&self) -> &str {
            "TEST"
        }
        fn name(&self) -> Option<&Path> {
            None
        }
        fn metadata(&self) -> &AudioMetadata {
            &self.metadata
        }
    }

    #[test]
    fn test_silence_without_track_or_when_stopped() {
        let h = harness();
        let mut out = vec![1.0f32; 64];

        h.shared.apply(Transition::Play);
        h.renderer.render(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.0));

        h.load(active(Box::new(PcmBufferSource::constant(0.5, 100, 2, 8000))));
        h.shared.apply(Transition::Stop);
        out.fill(1.0);
        h.renderer.render(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_paused_renders_silence_without_advancing() {
        let h = harness();
        let track = active(Box::new(PcmBufferSource::constant(0.5, 100, 1, 8000)));
        let stream = Arc::clone(&track.stream);
        h.load(track);
        h.shared.apply(Transition::Play);
        h.shared.apply(Transition::Pause);

        let mut out = vec![1.0f32; 16];
        h.renderer.render(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(stream.tell().unwrap(), 0);
    }

    #[test]
    fn test_volume_applied() {
        let h = harness();
        h.load(active(Box::new(PcmBufferSource::constant(0.8, 100, 1, 8000))));
        h.shared.set_volume(0.5);
        h.shared.apply(Transition::Play);

        let mut out = vec![0.0f32; 32];
        h.renderer.render(&mut out, 1);
        assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));
    }

    #[test]
    fn test_short_read_pads_and_stops_once() {
        let h = harness();
        let track = active(Box::new(PcmBufferSource::constant(1.0, 10, 1, 8000)));
        let id = track.id;
        h.load(track);
        h.shared.apply(Transition::Play);

        let mut out = vec![9.0f32; 16];
        h.renderer.render(&mut out, 1);
        assert!(out[..10].iter().all(|&s| s == 1.0));
        assert!(out[10..].iter().all(|&s| s == 0.0));
        assert_eq!(h.shared.state(), PlaybackState::Stopped);

        let events: Vec<_> = h.events.try_iter().collect();
        assert_eq!(
            events,
            vec![
                PlayerEvent::PlaybackStateChanged { state: PlaybackState::Stopped },
                PlayerEvent::TrackEnded { id },
            ]
        );

        h.renderer.render(&mut out, 1);
        assert!(h.events.try_recv().is_err());
    }

    #[test]
    fn test_exhausted_source_ends_immediately() {
        let h = harness();
        let track = active(Box::new(PcmBufferSource::constant(1.0, 0, 1, 8000)));
        h.load(track);
        h.shared.apply(Transition::Play);

        let mut out = vec![9.0f32; 8];
        h.renderer.render(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(h.shared.state(), PlaybackState::Stopped);
        assert_eq!(h.events.try_iter().count(), 2);
    }

    #[test]
    fn test_source_error_degrades_to_silence_and_stop() {
        for panic in [false, true] {
            let h = harness();
            let broken = BrokenSource { metadata: AudioMetadata::new(), panic };
            h.load(active(Box::new(broken)));
            h.shared.apply(Transition::Play);

            let mut out = vec![9.0f32; 8];
            h.renderer.render(&mut out, 1);
            assert!(out.iter().all(|&s| s == 0.0));
            assert_eq!(h.shared.state(), PlaybackState::Stopped);

            let events: Vec<_> = h.events.try_iter().collect();
            assert_eq!(events, vec![PlayerEvent::PlaybackStateChanged { state: PlaybackState::Stopped }]);
        }
    }

    #[test]
    fn test_gate_forces_silence() {
        let h = harness();
        h.load(active(Box::new(PcmBufferSource::constant(1.0, 100, 1, 8000))));
        h.shared.apply(Transition::Play);

        let guard = h.renderer.gate();
        let mut out = vec![9.0f32; 8];
        h.renderer.render(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.0));
        drop(guard);

        h.renderer.render(&mut out, 1);
        assert!(out.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_clearing_active_track_renders_silence() {
        let h = harness();
        h.load(active(Box::new(PcmBufferSource::constant(1.0, 100, 1, 8000))));
        h.unload();
        h.shared.apply(Transition::Play);

        let mut out = vec![9.0f32; 8];
        h.renderer.render(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(h.shared.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_map_channels_variants() {
        let stereo = [0.2, 0.4, 0.6, 0.8];
        let mut mono = [0.0f32; 2];
        map_channels(&stereo, 2, &mut mono, 1, 1.0);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!((mono[1] - 0.7).abs() < 1e-6);

        let mut up = [0.0f32; 4];
        map_channels(&[0.5, -0.5], 1, &mut up, 2, 2.0);
        assert_eq!(up, [1.0, 1.0, -1.0, -1.0]);

        let mut surround = [9.0f32; 6];
        map_channels(&[0.1, 0.2, 0.3, 0.4], 2, &mut surround[..6], 3, 1.0);
        assert_eq!(surround, [0.1, 0.2, 0.0, 0.3, 0.4, 0.0]);
    }

    #[test]
    fn test_decode_ahead_keeps_slow_source_off_render() {
        let h = harness_with(true);
        let slow = SlowSource {
            inner: PcmBufferSource::constant(0.5, 4000, 1, 8000),
            delay: Duration::from_millis(300),
        };
        h.load(active(Box::new(slow)));
        h.shared.apply(Transition::Play);

        let decoder = Arc::clone(&h.renderer);
        let worker = thread::spawn(move || decoder.decode_ahead());
        thread::sleep(Duration::from_millis(50));

        let mut out = vec![9.0f32; 64];
        let started = Instant::now();
        h.renderer.render(&mut out, 1);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(h.shared.state(), PlaybackState::Playing);

        assert!(worker.join().unwrap());
        h.renderer.render(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_decode_ahead_ends_when_source_and_ring_are_dry() {
        let h = harness_with(true);
        let track = active(Box::new(PcmBufferSource::constant(1.0, 10, 1, 8000)));
        let id = track.id;
        h.load(track);
        h.shared.apply(Transition::Play);

        assert!(h.renderer.decode_ahead());
        let mut out = vec![9.0f32; 16];
        h.renderer.render(&mut out, 1);
        assert!(out[..10].iter().all(|&s| s == 1.0));
        assert!(out[10..].iter().all(|&s| s == 0.0));
        assert_eq!(h.shared.state(), PlaybackState::Stopped);
        assert_eq!(
            h.events.try_iter().collect::<Vec<_>>(),
            vec![
                PlayerEvent::PlaybackStateChanged { state: PlaybackState::Stopped },
                PlayerEvent::TrackEnded { id },
            ]
        );
    }

    #[test]
    fn test_decode_ahead_failure_stops_playback() {
        for panic in [false, true] {
            let h = harness_with(true);
            let broken = BrokenSource { metadata: AudioMetadata::new(), panic };
            h.load(active(Box::new(broken)));
            h.shared.apply(Transition::Play);

            assert!(!h.renderer.decode_ahead());
            let mut out = vec![9.0f32; 8];
            h.renderer.render(&mut out, 1);
            assert!(out.iter().all(|&s| s == 0.0));
            assert_eq!(h.shared.state(), PlaybackState::Stopped);
        }
    }

    #[test]
    fn test_decode_ahead_without_selection() {
        let h = harness_with(true);
        assert!(!h.renderer.decode_ahead());
        assert!(h.renderer.decodes_ahead());
    }
}
