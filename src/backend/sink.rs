use std::sync::Arc;

use cpal::traits::StreamTrait;
use cpal::Stream;
use log::info;

use crate::audio::{DeviceManager, RingBuffer};
use crate::error::EngineError;
use crate::models::DeviceConfig;

/// Blocks of device buffering kept ahead of the hardware
const SINK_BLOCKS: usize = 4;

/// Push-style output: something that accepts interleaved f32 samples
pub trait PcmSink {
    /// Frames that can be written without overflowing
    fn writable_frames(&self) -> usize;

    /// Write samples, returning how many were accepted
    fn write(&mut self, samples: &[f32]) -> usize;
}

/// Opens sinks for the push-based backends
pub trait SinkFactory: Send + Sync {
    /// Verify that `config` can be opened, without opening it
    fn check(&self, config: &DeviceConfig) -> Result<(), EngineError>;

    /// Open a sink. Called on the thread that will write to it.
    fn open(&self, config: &DeviceConfig) -> Result<Box<dyn PcmSink>, EngineError>;
}

/// Sink draining a ring buffer from a cpal output callback
pub struct DeviceSink {
    ring: Arc<RingBuffer>,
    _stream: Stream,
}

impl PcmSink for DeviceSink {
    fn writable_frames(&self) -> usize {
        self.ring.available_write_frames()
    }

    fn write(&mut self, samples: &[f32]) -> usize {
        self.ring.write(samples)
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        let underruns = self.ring.underrun_count();
        if underruns > 0 {
            info!("Output closed after {} buffer underruns", underruns);
        }
    }
}

/// Factory opening the configured cpal output device. The host is looked up
/// per call so the factory itself holds no platform handles.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceSinkFactory;

impl DeviceSinkFactory {
    pub fn new() -> Self {
        Self
    }
}

impl SinkFactory for DeviceSinkFactory {
    fn check(&self, config: &DeviceConfig) -> Result<(), EngineError> {
        config.validate()?;
        let device = DeviceManager::new().find_output(config.device.as_deref())?;
        DeviceManager::check_support(&device, config)
    }

    fn open(&self, config: &DeviceConfig) -> Result<Box<dyn PcmSink>, EngineError> {
        let device = DeviceManager::new().find_output(config.device.as_deref())?;
        DeviceManager::check_support(&device, config)?;

        let ring = Arc::new(RingBuffer::new(
            config.block_frames as usize * SINK_BLOCKS,
            config.channels,
        ));
        let reader = Arc::clone(&ring);
        let stream = DeviceManager::build_output_stream(&device, config, move |out| {
            reader.read_or_silence(out);
        })?;
        stream
            .play()
            .map_err(|e| EngineError::Stream(format!("Failed to start output stream: {}", e)))?;

        Ok(Box::new(DeviceSink { ring, _stream: stream }))
    }
}
