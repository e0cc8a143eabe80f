use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use log::{debug, error, info, warn};

use crate::backend::packet::{read_packet, write_packet, Packet, PacketError};
use crate::backend::{join_within, FrameProducer, PcmSink, SinkFactory, StreamBackend, SHUTDOWN_TIMEOUT};
use crate::error::EngineError;
use crate::models::{BackendKind, DeviceConfig};

/// Subcommand the player binary answers to when acting as the stream host
pub const STREAM_HOST_ARG: &str = "stream-host";

const CHILD_POLL: Duration = Duration::from_millis(10);
const SINK_FULL_SLEEP: Duration = Duration::from_millis(1);

/// How to launch the stream-host process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl HostCommand {
    pub fn new<P: Into<PathBuf>>(program: P, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-run the current executable in stream-host mode
    pub fn current_exe() -> Result<Self, EngineError> {
        let program = std::env::current_exe()
            .map_err(|e| EngineError::HostProcess(format!("cannot locate own executable: {}", e)))?;
        Ok(Self::new(program, vec![STREAM_HOST_ARG.to_string()]))
    }

    fn spawn(&self) -> Result<Child, EngineError> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| EngineError::HostProcess(format!("failed to spawn {}: {}", self.program.display(), e)))
    }
}

/// Renders in a parent-side thread and pipes the blocks to a separate
/// stream-host process that owns the output device.
pub struct ProcessBackend {
    config: DeviceConfig,
    command: HostCommand,
    factory: Arc<dyn SinkFactory>,
    producer: Option<FrameProducer>,
    running: Arc<AtomicBool>,
    worker: Option<(JoinHandle<()>, Receiver<()>)>,
    child: Option<Child>,
}

impl ProcessBackend {
    /// `factory` is only used to check configurations up front; the child
    /// opens its own output.
    pub fn new(config: DeviceConfig, command: HostCommand, factory: Arc<dyn SinkFactory>) -> Self {
        Self {
            config,
            command,
            factory,
            producer: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            child: None,
        }
    }

    /// Wait for the child to exit on its own, killing it at the deadline
    fn reap_child(&mut self) -> Result<(), EngineError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Stream host exited with {}", status);
                    return Ok(());
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(CHILD_POLL),
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to poll stream host: {}", e);
                    break;
                }
            }
        }

        warn!("Stream host did not exit within {:?}; killing it", SHUTDOWN_TIMEOUT);
        let _ = child.kill();
        let _ = child.wait();
        Err(EngineError::ShutdownTimeout {
            waited_ms: SHUTDOWN_TIMEOUT.as_millis() as u64,
        })
    }
}

fn feed_process(config: DeviceConfig, producer: FrameProducer, running: Arc<AtomicBool>, mut stdin: ChildStdin) {
    let mut block = vec![0.0f32; config.block_samples()];

    while running.load(Ordering::Acquire) {
        producer.render(&mut block, config.channels);
        let packet = Packet::Audio {
            samples: std::mem::take(&mut block),
        };
        let sent = write_packet(&mut stdin, &packet);
        if let Packet::Audio { samples } = packet {
            block = samples;
        }

        if let Err(e) = sent {
            error!("Stream host stopped accepting audio: {}", e);
            running.store(false, Ordering::Release);
            return;
        }
    }

    if let Err(e) = write_packet(&mut stdin, &Packet::Shutdown) {
        debug!("Could not send shutdown to stream host: {}", e);
    }
    debug!("Process feeder finished");
}

impl StreamBackend for ProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Process
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
        // A previous host may have died on its own
        self.stop()?;

        let mut child = self.command.spawn()?;
        let Some(mut stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EngineError::HostProcess("stream host has no stdin pipe".to_string()));
        };
        if let Err(e) = write_packet(&mut stdin, &Packet::Init(self.config.clone())) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e.into());
        }

        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let (done_tx, done_rx) = bounded::<()>(0);

        self.running.store(true, Ordering::Release);
        let spawned = thread::Builder::new()
            .name("audio-process-feeder".to_string())
            .spawn(move || {
                let _done = done_tx;
                feed_process(config, producer, running, stdin);
            });

        match spawned {
            Ok(handle) => {
                info!("Process backend started on {}", self.config.describe());
                self.worker = Some((handle, done_rx));
                self.child = Some(child);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                let _ = child.kill();
                let _ = child.wait();
                Err(EngineError::Stream(format!("Failed to spawn feeder thread: {}", e)))
            }
        }
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.running.store(false, Ordering::Release);
        let joined = match self.worker.take() {
            Some((handle, done)) => join_within("audio-process-feeder", handle, &done, SHUTDOWN_TIMEOUT),
            None => Ok(()),
        };
        if joined.is_err() {
            // The feeder is stuck writing; killing the host unblocks it
            if let Some(child) = self.child.as_mut() {
                let _ = child.kill();
            }
        }
        let reaped = self.reap_child();
        joined.and(reaped)
    }

    fn is_running(&self) -> bool {
        self.worker.is_some() && self.running.load(Ordering::Acquire)
    }
}

impl Drop for ProcessBackend {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Stream-host side: read packets from `reader` and play them through a
/// sink from `factory` until shutdown or end of input.
pub fn run_stream_host<R: Read>(mut reader: R, factory: &dyn SinkFactory) -> Result<(), EngineError> {
    let mut sink: Option<Box<dyn PcmSink>> = None;

    loop {
        let packet = match read_packet(&mut reader) {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                debug!("Player closed the pipe");
                break;
            }
            Err(PacketError::Io(e)) if e.kind() == io::ErrorKind::BrokenPipe => break,
            Err(e) => return Err(e.into()),
        };

        match packet {
            Packet::Init(config) => {
                config.validate()?;
                sink = Some(factory.open(&config)?);
                info!("Stream host opened {}", config.describe());
            }
            Packet::Audio { samples } => match sink.as_mut() {
                Some(sink) => write_blocking(sink.as_mut(), &samples),
                None => warn!("Dropping {} samples received before Init", samples.len()),
            },
            Packet::Shutdown => {
                debug!("Stream host received shutdown");
                break;
            }
        }
    }
    Ok(())
}

fn write_blocking(sink: &mut dyn PcmSink, samples: &[f32]) {
    let mut offset = 0;
    while offset < samples.len() {
        let written = sink.write(&samples[offset..]);
        if written == 0 {
            thread::sleep(SINK_FULL_SLEEP);
        }
        offset += written;
    }
}
