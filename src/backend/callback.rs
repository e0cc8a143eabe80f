use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::StreamTrait;
use cpal::Stream;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{debug, info};

use crate::audio::DeviceManager;
use crate::backend::{join_within, FrameProducer, StreamBackend, SHUTDOWN_TIMEOUT, STARTUP_TIMEOUT};
use crate::error::EngineError;
use crate::models::{BackendKind, DeviceConfig};

/// Pause between decode-ahead steps once the lookahead is full
const DECODE_IDLE: Duration = Duration::from_millis(5);

/// The device calls the renderer on its own real-time thread. A dedicated
/// thread owns the cpal stream so the stream never crosses threads, and
/// decodes ahead of the callback so the callback never reads or decodes.
pub struct CallbackBackend {
    config: DeviceConfig,
    producer: Option<FrameProducer>,
    running: Arc<AtomicBool>,
    worker: Option<(JoinHandle<()>, Receiver<()>)>,
}

impl CallbackBackend {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            producer: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    fn open_stream(config: &DeviceConfig, producer: FrameProducer) -> Result<Stream, EngineError> {
        let devices = DeviceManager::new();
        let device = devices.find_output(config.device.as_deref())?;
        DeviceManager::check_support(&device, config)?;

        let channels = config.channels;
        let stream = DeviceManager::build_output_stream(&device, config, move |out| {
            producer.render(out, channels);
        })?;
        stream
            .play()
            .map_err(|e| EngineError::Stream(format!("Failed to start output stream: {}", e)))?;
        Ok(stream)
    }
}

impl StreamBackend for CallbackBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Callback
    }

    fn register(&mut self, producer: FrameProducer) {
        self.producer = Some(producer);
    }

    fn reconfigure(&mut self, config: &DeviceConfig) -> Result<(), EngineError> {
        if self.is_running() {
            self.stop()?;
        }
        config.validate()?;
        let device = DeviceManager::new().find_output(config.device.as_deref())?;
        DeviceManager::check_support(&device, config)?;

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
        if self.is_running() {
            return Ok(());
        }
        let producer = self.producer.clone().ok_or(EngineError::NoProducer)?;

        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let (ready_tx, ready_rx) = bounded::<Result<(), EngineError>>(1);
        let (done_tx, done_rx) = bounded::<()>(0);

        self.running.store(true, Ordering::Release);
        let handle = thread::Builder::new()
            .name("audio-callback".to_string())
            .spawn(move || {
                let _done = done_tx;
                let decoder = Arc::clone(&producer);
                let stream = match Self::open_stream(&config, producer) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                debug!("Callback stream running: {}", config.describe());

                while running.load(Ordering::Acquire) {
                    if !decoder.decode_ahead() {
                        thread::sleep(DECODE_IDLE);
                    }
                }
                let _ = stream.pause();
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                EngineError::Stream(format!("Failed to spawn audio thread: {}", e))
            })?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => {
                info!("Callback backend started on {}", self.config.describe());
                self.worker = Some((handle, done_rx));
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::Release);
                let _ = join_within("audio-callback", handle, &done_rx, SHUTDOWN_TIMEOUT);
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                self.running.store(false, Ordering::Release);
                let _ = join_within("audio-callback", handle, &done_rx, SHUTDOWN_TIMEOUT);
                Err(EngineError::Stream("audio thread did not open the device".to_string()))
            }
        }
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.running.store(false, Ordering::Release);
        match self.worker.take() {
            Some((handle, done)) => join_within("audio-callback", handle, &done, SHUTDOWN_TIMEOUT),
            None => Ok(()),
        }
    }

    fn is_running(&self) -> bool {
        self.worker.is_some() && self.running.load(Ordering::Acquire)
    }
}

impl Drop for CallbackBackend {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_without_producer_fails() {
        let mut backend = CallbackBackend::new(DeviceConfig::default());
        assert!(matches!(backend.start(), Err(EngineError::NoProducer)));
        assert!(!backend.is_running());
    }

    #[test]
    fn test_stop_when_idle_is_ok() {
        let mut backend = CallbackBackend::new(DeviceConfig::default());
        assert!(backend.stop().is_ok());
        assert_eq!(backend.kind(), BackendKind::Callback);
        assert!(backend.decodes_ahead());
    }

    #[test]
    fn test_reconfigure_rejects_invalid_config() {
        let mut backend = CallbackBackend::new(DeviceConfig::default());
        let bad = DeviceConfig {
            channels: 0,
            ..Default::default()
        };
        assert!(matches!(backend.reconfigure(&bad), Err(EngineError::DeviceConfig(_))));
        assert_eq!(backend.config(), &DeviceConfig::default());
    }
}
