use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SampleRate, Stream, StreamConfig, SupportedStreamConfigRange};
use log::{debug, error, warn};

use crate::error::EngineError;
use crate::models::{DeviceConfig, SampleFormat};

/// Summary of one output device for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub default_samplerate: Option<u32>,
    pub max_channels: u16,
}

/// Output device lookup and stream construction on the default cpal host
pub struct DeviceManager {
    host: Host,
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceManager {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    /// Enumerate output devices with their default configuration
    pub fn list_output_devices(&self) -> Result<Vec<OutputDeviceInfo>, EngineError> {
        let default_name = self
            .host
            .default_output_device()
            .and_then(|device| device.name().ok());

        let devices = self
            .host
            .output_devices()
            .map_err(|e| EngineError::Stream(format!("Failed to enumerate devices: {}", e)))?;

        let mut infos = Vec::new();
        for device in devices {
            let name = match device.name() {
                Ok(name) => name,
                Err(e) => {
                    warn!("Skipping device without a name: {}", e);
                    continue;
                }
            };

            let default_samplerate = device.default_output_config().ok().map(|c| c.sample_rate().0);
            let max_channels = device
                .supported_output_configs()
                .map(|ranges| ranges.map(|r| r.channels()).max().unwrap_or(0))
                .unwrap_or(0);

            infos.push(OutputDeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                default_samplerate,
                max_channels,
            });
        }

        Ok(infos)
    }

    /// Resolve a device by name, `None` meaning the host default
    pub fn find_output(&self, name: Option<&str>) -> Result<Device, EngineError> {
        match name {
            Some(wanted) => {
                let mut devices = self
                    .host
                    .output_devices()
                    .map_err(|e| EngineError::Stream(format!("Failed to enumerate devices: {}", e)))?;
                devices
                    .find(|device| device.name().map(|n| n == wanted).unwrap_or(false))
                    .ok_or_else(|| EngineError::DeviceNotFound {
                        device: wanted.to_string(),
                    })
            }
            None => self.host.default_output_device().ok_or_else(|| EngineError::DeviceNotFound {
                device: "default".to_string(),
            }),
        }
    }

    /// Fail with `DeviceConfig` when the device cannot open the stream as
    /// configured. Devices that do not report their ranges are trusted.
    pub fn check_support(device: &Device, config: &DeviceConfig) -> Result<(), EngineError> {
        match device.supported_output_configs() {
            Ok(ranges) => {
                if supports(ranges, config) {
                    Ok(())
                } else {
                    Err(EngineError::DeviceConfig(format!(
                        "device does not support {}",
                        config.describe()
                    )))
                }
            }
            Err(e) => {
                warn!("Could not query supported configurations: {}", e);
                Ok(())
            }
        }
    }

    pub fn stream_config(config: &DeviceConfig) -> StreamConfig {
        StreamConfig {
            channels: config.channels,
            sample_rate: SampleRate(config.samplerate),
            buffer_size: cpal::BufferSize::Default,
        }
    }

    /// Build a paused output stream whose callback asks `render` for
    /// interleaved f32 samples and converts them to the configured format
    pub fn build_output_stream<F>(
        device: &Device,
        config: &DeviceConfig,
        render: F,
    ) -> Result<Stream, EngineError>
    where
        F: FnMut(&mut [f32]) + Send + 'static,
    {
        let stream_config = Self::stream_config(config);
        debug!("Building output stream: {}", config.describe());

        match config.sample_format {
            SampleFormat::F32 => Self::build_typed::<f32, F>(device, &stream_config, config.block_samples(), render),
            SampleFormat::I16 => Self::build_typed::<i16, F>(device, &stream_config, config.block_samples(), render),
            SampleFormat::U16 => Self::build_typed::<u16, F>(device, &stream_config, config.block_samples(), render),
        }
    }

    fn build_typed<T, F>(
        device: &Device,
        config: &StreamConfig,
        initial_samples: usize,
        mut render: F,
    ) -> Result<Stream, EngineError>
    where
        T: cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
        F: FnMut(&mut [f32]) + Send + 'static,
    {
        let mut scratch = vec![0.0f32; initial_samples];

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if scratch.len() < data.len() {
                        scratch.resize(data.len(), 0.0);
                    }
                    let rendered = &mut scratch[..data.len()];
                    render(rendered);

                    for (out, &sample) in data.iter_mut().zip(rendered.iter()) {
                        *out = T::from_sample(sample);
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| EngineError::Stream(format!("Failed to build output stream: {}", e)))
    }
}

/// Whether any supported range covers the configuration
fn supports<I>(ranges: I, config: &DeviceConfig) -> bool
where
    I: IntoIterator<Item = SupportedStreamConfigRange>,
{
    let wanted_format = config.sample_format.to_cpal();
    ranges.into_iter().any(|range| {
        range.channels() == config.channels
            && range.sample_format() == wanted_format
            && range.min_sample_rate().0 <= config.samplerate
            && config.samplerate <= range.max_sample_rate().0
    })
}
