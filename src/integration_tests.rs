//! End-to-end scenarios across the playbacker, renderer and backends

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tempfile::TempDir;

use crate::audio::source::write_test_wav;
use crate::audio::PcmBufferSource;
use crate::backend::sink::capture::CaptureFactory;
use crate::backend::{FrameProducer, StreamBackend, ThreadBackend};
use crate::error::EngineError;
use crate::models::{BackendKind, DeviceConfig, DeviceOverrides, PlaybackMode, PlaybackState, PlayerEvent, TrackId};
use crate::playback::Playbacker;
use crate::track::Track;

fn device(samplerate: u32, channels: u16) -> DeviceConfig {
    DeviceConfig {
        samplerate,
        channels,
        block_frames: 256,
        ..Default::default()
    }
}

fn with_backend(backend: Box<dyn StreamBackend>, config: DeviceConfig) -> Playbacker {
    Playbacker::new(backend, config).unwrap()
}

fn offline(config: DeviceConfig) -> Playbacker {
    let backend = ThreadBackend::new(config.clone(), Arc::new(CaptureFactory::new(None)));
    with_backend(Box::new(backend), config)
}

fn wait_for_end(events: &Receiver<PlayerEvent>) -> Option<TrackId> {
    loop {
        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(PlayerEvent::TrackEnded { id }) => return Some(id),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

#[test]
fn test_five_second_track_plays_out_in_full_buffers() {
    let mut playbacker = offline(device(44_100, 1));
    let events = playbacker.events();
    let frames = 5 * 44_100;
    let id = playbacker.add(Track::new(Box::new(PcmBufferSource::constant(0.5, frames, 1, 44_100))).unwrap());
    playbacker.select_by_id(id).unwrap();
    playbacker.play().unwrap();

    let mut out = vec![9.0f32; 1024];
    let mut calls = 0;
    while playbacker.state() == PlaybackState::Playing {
        out.fill(9.0);
        playbacker.render(&mut out);
        calls += 1;
        assert_eq!(out.len(), 1024);
        assert!(calls <= 216, "track should end by the 216th call");
        if calls < 216 {
            assert!(out.iter().all(|&s| s == 0.5), "call {} was not a full chunk", calls);
        }
    }

    assert_eq!(calls, 216);
    let tail = (frames as usize) - 215 * 1024;
    assert!(out[..tail].iter().all(|&s| s == 0.5));
    assert!(out[tail..].iter().all(|&s| s == 0.0));

    let received: Vec<_> = events.try_iter().collect();
    assert_eq!(
        received,
        vec![
            PlayerEvent::PlaybackStateChanged { state: PlaybackState::Playing },
            PlayerEvent::PlaybackStateChanged { state: PlaybackState::Stopped },
            PlayerEvent::TrackEnded { id },
        ]
    );

    playbacker.render(&mut out);
    assert!(out.iter().all(|&s| s == 0.0));
    assert!(events.try_iter().next().is_none());
}

#[test]
fn test_volume_scales_output() {
    let mut playbacker = offline(device(8000, 2));
    let id = playbacker.add(Track::new(Box::new(PcmBufferSource::constant(0.8, 1000, 2, 8000))).unwrap());
    playbacker.select_by_id(id).unwrap();
    playbacker.set_volume(0.5);
    playbacker.play().unwrap();

    let mut out = vec![0.0f32; 200];
    playbacker.render(&mut out);
    assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));
}

#[test]
fn test_silence_unless_playing() {
    let mut playbacker = offline(device(8000, 1));
    let mut out = vec![1.0f32; 64];
    playbacker.render(&mut out);
    assert!(out.iter().all(|&s| s == 0.0));

    let id = playbacker.add(Track::new(Box::new(PcmBufferSource::constant(0.3, 1000, 1, 8000))).unwrap());
    playbacker.select_by_id(id).unwrap();
    out.fill(1.0);
    playbacker.render(&mut out);
    assert!(out.iter().all(|&s| s == 0.0));

    playbacker.play().unwrap();
    playbacker.pause();
    out.fill(1.0);
    playbacker.render(&mut out);
    assert!(out.iter().all(|&s| s == 0.0));
    assert_eq!(playbacker.get(id).unwrap().position().unwrap(), 0);
}

#[test]
fn test_registry_counts_and_unique_ids() {
    let mut playbacker = offline(device(8000, 1));
    let mut live = Vec::new();
    let mut all = std::collections::HashSet::new();

    for round in 0..50 {
        let id = playbacker.add(Track::new(Box::new(PcmBufferSource::constant(0.0, 8, 1, 8000))).unwrap());
        assert!(all.insert(id));
        live.push(id);
        if round % 3 == 2 {
            let removed = live.remove(round % live.len());
            assert!(playbacker.remove(removed));
        }
        assert_eq!(playbacker.len(), live.len());
    }
}

#[test]
fn test_file_track_stop_resets_position() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ramp.wav");
    let samples: Vec<i16> = (0..8000).map(|i| (i % 1000) as i16).collect();
    write_test_wav(&path, 8000, 1, &samples);

    let mut playbacker = offline(device(8000, 1));
    let id = playbacker.add(Track::open(&path).unwrap());
    playbacker.select_by_id(id).unwrap();
    playbacker.play().unwrap();

    let mut out = vec![0.0f32; 3000];
    playbacker.render(&mut out);
    assert_eq!(playbacker.get(id).unwrap().position().unwrap(), 3000);

    playbacker.stop().unwrap();
    assert_eq!(playbacker.state(), PlaybackState::Stopped);
    assert_eq!(playbacker.get(id).unwrap().position().unwrap(), 0);

    let track = playbacker.get(id).unwrap();
    track.set_position_secs(0.5).unwrap();
    track.seek_by(-10.0).unwrap();
    assert_eq!(track.position().unwrap(), 0);
    track.seek_by(100.0).unwrap();
    assert_eq!(track.position().unwrap(), 8000);
}

#[test]
fn test_thread_backend_reconfigure() {
    let factory = Arc::new(CaptureFactory::new(None));
    let backend = ThreadBackend::new(device(44_100, 2), factory.clone());
    let mut playbacker = with_backend(Box::new(backend), device(44_100, 2));

    playbacker.reconfigure(&DeviceOverrides::samplerate(48_000), false).unwrap();
    assert!(!playbacker.is_engine_running());
    assert!(factory.opened().is_empty());

    playbacker.start_engine().unwrap();
    assert_eq!(factory.opened()[0].samplerate, 48_000);

    playbacker.reconfigure(&DeviceOverrides::samplerate(96_000), true).unwrap();
    assert!(playbacker.is_engine_running());
    let opened = factory.opened();
    assert_eq!(opened.len(), 2);
    assert_eq!(opened[1].samplerate, 96_000);

    playbacker.terminate_engine().unwrap();
    assert!(!playbacker.is_engine_running());
}

#[test]
fn test_failed_reconfigure_keeps_previous_device() {
    let mut factory = CaptureFactory::new(None);
    factory.reject_samplerate = Some(22_050);
    let backend = ThreadBackend::new(device(44_100, 2), Arc::new(factory));
    let mut playbacker = with_backend(Box::new(backend), device(44_100, 2));
    playbacker.start_engine().unwrap();

    let result = playbacker.reconfigure(&DeviceOverrides::samplerate(22_050), true);
    assert!(result.is_err());
    assert_eq!(playbacker.device_config().samplerate, 44_100);
    assert!(!playbacker.is_engine_running());
}

#[test]
fn test_thread_backend_plays_track_to_end() {
    let factory = Arc::new(CaptureFactory::new(None));
    let config = device(8000, 2);
    let backend = ThreadBackend::new(config.clone(), factory.clone());
    let mut playbacker = with_backend(Box::new(backend), config);
    let events = playbacker.events();

    let id = playbacker.add(Track::new(Box::new(PcmBufferSource::constant(0.5, 800, 1, 8000))).unwrap());
    playbacker.select_by_id(id).unwrap();
    playbacker.set_volume(2.0);
    playbacker.play().unwrap();
    playbacker.start_engine().unwrap();

    assert_eq!(wait_for_end(&events), Some(id));
    playbacker.terminate_engine().unwrap();
    assert_eq!(playbacker.state(), PlaybackState::Stopped);

    let samples = factory.sink.samples();
    let audible = samples.iter().filter(|&&s| s != 0.0).count();
    assert_eq!(audible, 1600);
    assert!(samples.iter().filter(|&&s| s != 0.0).all(|&s| (s - 1.0).abs() < 1e-6));
}

#[test]
fn test_repeat_list_across_track_ends() {
    let mut playbacker = offline(device(8000, 1)).with_mode(PlaybackMode::RepeatList);
    let events = playbacker.events();
    let a = playbacker.add(Track::new(Box::new(PcmBufferSource::constant(0.1, 100, 1, 8000))).unwrap());
    let b = playbacker.add(Track::new(Box::new(PcmBufferSource::constant(0.2, 100, 1, 8000))).unwrap());
    playbacker.select_by_id(a).unwrap();
    playbacker.play().unwrap();

    let mut order = Vec::new();
    let mut out = vec![0.0f32; 128];
    for _ in 0..4 {
        order.push(playbacker.selected_id().unwrap());
        playbacker.render(&mut out);
        let ended = events
            .try_iter()
            .find_map(|event| match event {
                PlayerEvent::TrackEnded { id } => Some(id),
                _ => None,
            })
            .unwrap();
        assert!(playbacker.handle_track_ended(ended).unwrap());
    }

    assert_eq!(order, vec![a, b, a, b]);
    assert_eq!(playbacker.state(), PlaybackState::Playing);
}

#[test]
fn test_host_churn_while_engine_runs() {
    let config = device(8000, 2);
    let backend = ThreadBackend::new(config.clone(), Arc::new(CaptureFactory::new(None)));
    let mut playbacker = with_backend(Box::new(backend), config);
    for _ in 0..3 {
        playbacker.add(Track::new(Box::new(PcmBufferSource::constant(0.25, 4000, 2, 8000))).unwrap());
    }
    playbacker.start_engine().unwrap();

    for round in 0..200 {
        playbacker.select_next().unwrap();
        playbacker.play().unwrap();
        if round % 5 == 0 {
            playbacker.pause();
        }
        playbacker.set_volume((round % 4) as f32 * 0.5);
        if round % 7 == 0 {
            playbacker.stop().unwrap();
            let selected = playbacker.selected_track().unwrap();
            assert_eq!(selected.position().unwrap(), 0);
        }
    }

    playbacker.terminate_engine().unwrap();
    assert_eq!(playbacker.len(), 3);
}

#[cfg(unix)]
#[test]
fn test_process_backend_feeds_child_until_track_ends() {
    use crate::backend::{HostCommand, ProcessBackend};

    let config = device(8000, 1);
    let command = HostCommand::new("sh", vec!["-c".to_string(), "cat > /dev/null".to_string()]);
    let backend = ProcessBackend::new(config.clone(), command, Arc::new(CaptureFactory::new(None)));
    let mut playbacker = with_backend(Box::new(backend), config);
    let events = playbacker.events();

    let id = playbacker.add(Track::new(Box::new(PcmBufferSource::constant(0.5, 2000, 1, 8000))).unwrap());
    playbacker.select_by_id(id).unwrap();
    playbacker.play().unwrap();
    playbacker.start_engine().unwrap();

    assert_eq!(wait_for_end(&events), Some(id));
    assert!(playbacker.is_engine_running());
    playbacker.terminate_engine().unwrap();
    assert!(!playbacker.is_engine_running());
}

/// Real-time style backend driven by hand: frames only come from the
/// decode-ahead stage
struct ManualRealtimeBackend {
    config: DeviceConfig,
}

impl StreamBackend for ManualRealtimeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Callback
    }

    fn register(&mut self, _producer: FrameProducer) {}

    fn reconfigure(&mut self, config: &DeviceConfig) -> Result<(), EngineError> {
        self.config = config.clone();
        Ok(())
    }

    fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn decodes_ahead(&self) -> bool {
        true
    }

    fn start(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn is_running(&self) -> bool {
        false
    }
}

#[test]
fn test_decode_ahead_follows_stop_and_seek() {
    let config = device(8000, 1);
    let backend = ManualRealtimeBackend { config: config.clone() };
    let mut playbacker = with_backend(Box::new(backend), config);
    let producer = playbacker.producer();
    assert!(producer.decodes_ahead());

    let ramp = PcmBufferSource::from_fn(8000, 1, 8000, |frame, _| frame as f32);
    let id = playbacker.add(Track::new(Box::new(ramp)).unwrap());
    playbacker.select_by_id(id).unwrap();
    playbacker.play().unwrap();

    let mut out = vec![9.0f32; 100];
    playbacker.render(&mut out);
    assert!(out.iter().all(|&s| s == 0.0), "nothing decoded yet");
    assert_eq!(playbacker.state(), PlaybackState::Playing);

    assert!(producer.decode_ahead());
    playbacker.render(&mut out);
    assert_eq!(out[0], 0.0);
    assert_eq!(out[99], 99.0);
    assert_eq!(playbacker.get(id).unwrap().position().unwrap(), 100);

    playbacker.stop().unwrap();
    assert_eq!(playbacker.get(id).unwrap().position().unwrap(), 0);
    playbacker.play().unwrap();
    assert!(producer.decode_ahead());
    playbacker.render(&mut out);
    assert_eq!(out[0], 0.0);

    playbacker.selected_track().unwrap().seek(4000).unwrap();
    assert!(producer.decode_ahead());
    playbacker.render(&mut out);
    assert_eq!(out[0], 4000.0);
    assert_eq!(playbacker.get(id).unwrap().position().unwrap(), 4100);
}
