use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{debug, info, warn};

use crate::backend::{join_within, FrameProducer, SinkFactory, StreamBackend, SHUTDOWN_TIMEOUT, STARTUP_TIMEOUT};
use crate::error::EngineError;
use crate::models::{BackendKind, DeviceConfig};

/// A loop thread renders whole blocks and pushes them into a sink, sleeping
/// on a tokio timer while the sink is full.
pub struct ThreadBackend {
    config: DeviceConfig,
    factory: Arc<dyn SinkFactory>,
    producer: Option<FrameProducer>,
    running: Arc<AtomicBool>,
    worker: Option<(JoinHandle<()>, Receiver<()>)>,
}

impl ThreadBackend {
    pub fn new(config: DeviceConfig, factory: Arc<dyn SinkFactory>) -> Self {
        Self {
            config,
            factory,
            producer: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

/// Sleep between sink checks: a quarter block, at least a millisecond
pub(crate) fn poll_interval(config: &DeviceConfig) -> Duration {
    let block = Duration::from_secs_f64(config.block_frames as f64 / config.samplerate.max(1) as f64);
    (block / 4).max(Duration::from_millis(1))
}

async fn feed_loop(
    config: DeviceConfig,
    factory: Arc<dyn SinkFactory>,
    producer: FrameProducer,
    running: Arc<AtomicBool>,
    ready: crossbeam_channel::Sender<Result<(), EngineError>>,
) {
    let mut sink = match factory.open(&config) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let block_frames = config.block_frames as usize;
    let mut block = vec![0.0f32; config.block_samples()];
    let poll = poll_interval(&config);

    while running.load(Ordering::Acquire) {
        if sink.writable_frames() < block_frames {
            tokio::time::sleep(poll).await;
            continue;
        }

        producer.render(&mut block, config.channels);
        let written = sink.write(&block);
        if written < block.len() {
            warn!("Sink accepted {} of {} samples", written, block.len());
        }
    }
    debug!("Feeder loop finished");
}

impl StreamBackend for ThreadBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Thread
    }

    fn register(&mut self, producer: FrameProducer) {
        self.producer = Some(producer);
    }

    fn reconfigure(&mut self, config: &DeviceConfig) -> Result<(), EngineError> {
        if self.is_running() {
            self.stop()?;
        }
        self.factory.check(config)?;
        self.config = config.clone();
        Ok(())
    }

    fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn start(&mut self) -> Result<(), EngineError> {
        if self.is_running() {
            return Ok(());
        }
        let producer = self.producer.clone().ok_or(EngineError::NoProducer)?;

        let config = self.config.clone();
        let factory = Arc::clone(&self.factory);
        let running = Arc::clone(&self.running);
        let (ready_tx, ready_rx) = bounded::<Result<(), EngineError>>(1);
        let (done_tx, done_rx) = bounded::<()>(0);

        self.running.store(true, Ordering::Release);
        let handle = thread::Builder::new()
            .name("audio-feeder".to_string())
            .spawn(move || {
                let _done = done_tx;
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(EngineError::Stream(format!("Failed to build runtime: {}", e))));
                        return;
                    }
                };
                runtime.block_on(feed_loop(config, factory, producer, running, ready_tx));
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                EngineError::Stream(format!("Failed to spawn feeder thread: {}", e))
            })?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => {
                info!("Thread backend started on {}", self.config.describe());
                self.worker = Some((handle, done_rx));
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::Release);
                let _ = join_within("audio-feeder", handle, &done_rx, SHUTDOWN_TIMEOUT);
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                self.running.store(false, Ordering::Release);
                let _ = join_within("audio-feeder", handle, &done_rx, SHUTDOWN_TIMEOUT);
                Err(EngineError::Stream("feeder thread did not open the sink".to_string()))
            }
        }
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.running.store(false, Ordering::Release);
        match self.worker.take() {
            Some((handle, done)) => join_within("audio-feeder", handle, &done, SHUTDOWN_TIMEOUT),
            None => Ok(()),
        }
    }

    fn is_running(&self) -> bool {
        self.worker.is_some() && self.running.load(Ordering::Acquire)
    }
}

impl Drop for ThreadBackend {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PcmBufferSource;
    use crate::backend::sink::capture::CaptureFactory;
    use crate::playback::state::SharedState;
    use crate::playback::{Playbacker, Renderer};
    use crate::track::Track;
    use crossbeam_channel::unbounded;
    use std::time::Instant;

    fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_poll_interval() {
        let config = DeviceConfig {
            samplerate: 8000,
            block_frames: 800,
            ..Default::default()
        };
        assert_eq!(poll_interval(&config), Duration::from_millis(25));

        let tiny = DeviceConfig {
            block_frames: 1,
            ..Default::default()
        };
        assert_eq!(poll_interval(&tiny), Duration::from_millis(1));
    }

    #[test]
    fn test_start_requires_producer() {
        let factory = Arc::new(CaptureFactory::new(Some(0)));
        let mut backend = ThreadBackend::new(DeviceConfig::default(), factory);
        assert!(matches!(backend.start(), Err(EngineError::NoProducer)));
    }

    #[test]
    fn test_feeds_rendered_blocks_into_sink() {
        let config = DeviceConfig {
            samplerate: 8000,
            channels: 1,
            block_frames: 64,
            ..Default::default()
        };
        let factory = Arc::new(CaptureFactory::new(Some(640)));
        let backend = ThreadBackend::new(config.clone(), factory.clone());
        let mut playbacker = Playbacker::new(Box::new(backend), config).unwrap();

        let id = playbacker.add(Track::new(Box::new(PcmBufferSource::constant(0.25, 10_000, 1, 8000))).unwrap());
        playbacker.select_by_id(id).unwrap();
        playbacker.play().unwrap();
        playbacker.start_engine().unwrap();

        assert!(wait_until(|| factory.sink.samples().len() >= 640));
        playbacker.terminate_engine().unwrap();

        let samples = factory.sink.samples();
        assert_eq!(samples.len(), 640);
        assert!(samples.iter().all(|&s| (s - 0.25).abs() < 1e-6));
        assert_eq!(factory.opened().len(), 1);
    }

    #[test]
    fn test_open_failure_reported_from_start() {
        let config = DeviceConfig {
            samplerate: 8000,
            ..Default::default()
        };
        let mut factory = CaptureFactory::new(None);
        factory.reject_samplerate = Some(8000);
        let mut backend = ThreadBackend::new(config, Arc::new(factory));

        let (event_tx, _event_rx) = unbounded();
        backend.register(Arc::new(Renderer::new(Arc::new(SharedState::new(1.0)), event_tx, false)));

        assert!(matches!(backend.start(), Err(EngineError::DeviceConfig(_))));
        assert!(!backend.is_running());
    }

    #[test]
    fn test_reconfigure_checks_and_stores() {
        let mut factory = CaptureFactory::new(None);
        factory.reject_samplerate = Some(96_000);
        let mut backend = ThreadBackend::new(DeviceConfig::default(), Arc::new(factory));

        let ok = DeviceConfig { samplerate: 48_000, ..Default::default() };
        backend.reconfigure(&ok).unwrap();
        assert_eq!(backend.config().samplerate, 48_000);

        let rejected = DeviceConfig { samplerate: 96_000, ..Default::default() };
        assert!(backend.reconfigure(&rejected).is_err());
        assert_eq!(backend.config().samplerate, 48_000);
    }
}
