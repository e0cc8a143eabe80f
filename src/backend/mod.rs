pub mod callback;
pub mod packet;
pub mod process;
pub mod sink;
pub mod threaded;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::warn;

use crate::error::EngineError;
use crate::models::{BackendKind, DeviceConfig};
use crate::playback::Renderer;

pub use callback::CallbackBackend;
pub use packet::{read_packet, write_packet, Packet, PacketError};
pub use process::{run_stream_host, HostCommand, ProcessBackend, STREAM_HOST_ARG};
pub use sink::{DeviceSinkFactory, PcmSink, SinkFactory};
pub use threaded::ThreadBackend;

/// Upper bound on waiting for a backend thread or helper process to exit
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on waiting for a backend to open its output
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Renderer handle every backend pulls frames from
pub type FrameProducer = Arc<Renderer>;

/// Concurrency strategy bridging the renderer to an audio output
pub trait StreamBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Install the frame-production routine. Must happen before `start`.
    fn register(&mut self, producer: FrameProducer);

    /// Apply new stream parameters. Only valid while stopped; configuration
    /// errors are reported here rather than from the audio thread.
    fn reconfigure(&mut self, config: &DeviceConfig) -> Result<(), EngineError>;

    fn config(&self) -> &DeviceConfig;

    /// Whether the renderer must be fed from a decode-ahead stage because
    /// the backend calls it on a real-time thread that may not do I/O
    fn decodes_ahead(&self) -> bool {
        false
    }

    fn start(&mut self) -> Result<(), EngineError>;

    /// Halt the loop, thread or process within `SHUTDOWN_TIMEOUT`
    fn stop(&mut self) -> Result<(), EngineError>;

    fn is_running(&self) -> bool;
}

/// Backend for `kind` opening the configured output device
pub fn build_backend(kind: BackendKind, config: &DeviceConfig) -> Result<Box<dyn StreamBackend>, EngineError> {
    let backend: Box<dyn StreamBackend> = match kind {
        BackendKind::Callback => Box::new(CallbackBackend::new(config.clone())),
        BackendKind::Thread => Box::new(ThreadBackend::new(config.clone(), Arc::new(DeviceSinkFactory::new()))),
        BackendKind::Process => Box::new(ProcessBackend::new(
            config.clone(),
            HostCommand::current_exe()?,
            Arc::new(DeviceSinkFactory::new()),
        )),
    };
    Ok(backend)
}

/// Join a worker whose exit is signalled by `done` disconnecting. A worker
/// still alive after `timeout` is detached.
pub(crate) fn join_within(
    name: &str,
    handle: JoinHandle<()>,
    done: &Receiver<()>,
    timeout: Duration,
) -> Result<(), EngineError> {
    match done.recv_timeout(timeout) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
            if handle.join().is_err() {
                warn!("{} thread panicked during shutdown", name);
            }
            Ok(())
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!("{} thread did not exit within {:?}; detaching", name, timeout);
            Err(EngineError::ShutdownTimeout {
                waited_ms: timeout.as_millis() as u64,
            })
        }
    }
}
