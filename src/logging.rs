use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};

use crate::models::{PlaybackState, TrackId};

/// Engine event kept in the in-memory history
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EngineEventType,
    pub duration: Option<Duration>,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEventType {
    StateChanged,
    TrackSelected,
    TrackEnded,
    TrackRemoved,
    DeviceReconfigured,
    EngineStarted,
    EngineStopped,
    SourceError,
    StreamError,
}

impl EngineEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineEventType::StateChanged => "STATE_CHANGED",
            EngineEventType::TrackSelected => "TRACK_SELECTED",
            EngineEventType::TrackEnded => "TRACK_ENDED",
            EngineEventType::TrackRemoved => "TRACK_REMOVED",
            EngineEventType::DeviceReconfigured => "DEVICE_RECONFIGURED",
            EngineEventType::EngineStarted => "ENGINE_STARTED",
            EngineEventType::EngineStopped => "ENGINE_STOPPED",
            EngineEventType::SourceError => "SOURCE_ERROR",
            EngineEventType::StreamError => "STREAM_ERROR",
        }
    }
}

/// Logger for playback engine operations and debugging
#[derive(Clone)]
pub struct AudioLogger {
    events: Arc<Mutex<VecDeque<EngineEvent>>>,
    max_events: usize,
}

impl Default for AudioLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioLogger {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            max_events: 1000, // Keep last 1000 events
        }
    }

    /// Initialize logging system with appropriate log level
    pub fn init() -> Result<(), Box<dyn std::error::Error>> {
        let log_level = std::env::var("SEAPLAYER_LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string());

        let mut builder = env_logger::Builder::new();

        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        });

        match log_level.to_lowercase().as_str() {
            "trace" => builder.filter_level(log::LevelFilter::Trace),
            "debug" => builder.filter_level(log::LevelFilter::Debug),
            "info" => builder.filter_level(log::LevelFilter::Info),
            "warn" => builder.filter_level(log::LevelFilter::Warn),
            "error" => builder.filter_level(log::LevelFilter::Error),
            _ => builder.filter_level(log::LevelFilter::Info),
        };

        builder.try_init()?;

        info!("Player logging initialized with level: {}", log_level);
        Ok(())
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<EngineEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log an engine event
    pub fn log_event(&self, event_type: EngineEventType, details: String, duration: Option<Duration>) {
        match event_type {
            EngineEventType::StateChanged
            | EngineEventType::TrackSelected
            | EngineEventType::TrackEnded
            | EngineEventType::TrackRemoved => {
                debug!("[{}] {}", event_type.as_str(), details);
            }
            EngineEventType::DeviceReconfigured
            | EngineEventType::EngineStarted
            | EngineEventType::EngineStopped => match duration {
                Some(took) => info!("[{}] {} (took: {:?})", event_type.as_str(), details, took),
                None => info!("[{}] {}", event_type.as_str(), details),
            },
            EngineEventType::SourceError => {
                warn!("[{}] {}", event_type.as_str(), details);
            }
            EngineEventType::StreamError => {
                error!("[{}] {}", event_type.as_str(), details);
            }
        }

        let mut events = self.history();
        events.push_back(EngineEvent {
            timestamp: Utc::now(),
            event_type,
            duration,
            details,
        });
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    pub fn log_state_changed(&self, from: PlaybackState, to: PlaybackState) {
        self.log_event(
            EngineEventType::StateChanged,
            format!("Playback state {} -> {}", from, to),
            None,
        );
    }

    pub fn log_track_selected(&self, id: TrackId, name: &str) {
        self.log_event(
            EngineEventType::TrackSelected,
            format!("Selected '{}' ({})", name, id),
            None,
        );
    }

    pub fn log_track_ended(&self, id: TrackId) {
        self.log_event(EngineEventType::TrackEnded, format!("Track {} reached its end", id), None);
    }

    pub fn log_track_removed(&self, id: TrackId, was_selected: bool) {
        let details = if was_selected {
            format!("Removed selected track {} and cleared selection", id)
        } else {
            format!("Removed track {}", id)
        };
        self.log_event(EngineEventType::TrackRemoved, details, None);
    }

    pub fn log_device_reconfigured(&self, description: &str, took: Duration) {
        self.log_event(
            EngineEventType::DeviceReconfigured,
            format!("Device configured for {}", description),
            Some(took),
        );
    }

    pub fn log_engine_started(&self, backend: &str, took: Duration) {
        self.log_event(
            EngineEventType::EngineStarted,
            format!("Started {} backend", backend),
            Some(took),
        );
    }

    pub fn log_engine_stopped(&self, backend: &str, took: Duration) {
        self.log_event(
            EngineEventType::EngineStopped,
            format!("Stopped {} backend", backend),
            Some(took),
        );
    }

    pub fn log_source_error(&self, context: &str, error: &str) {
        self.log_event(EngineEventType::SourceError, format!("{}: {}", context, error), None);
    }

    pub fn log_stream_error(&self, error: &str) {
        self.log_event(EngineEventType::StreamError, error.to_string(), None);
    }

    /// Get recent events for debugging
    pub fn get_recent_events(&self, count: usize) -> Vec<EngineEvent> {
        let events = self.history();
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    /// Number of recorded events of the given type
    pub fn count(&self, event_type: EngineEventType) -> usize {
        self.history().iter().filter(|e| e.event_type == event_type).count()
    }

    /// Clear event history
    pub fn clear_events(&self) {
        self.history().clear();
    }
}

/// Timer utility for measuring operation durations
pub struct OperationTimer {
    start_time: Instant,
    operation_name: &'static str,
}

impl OperationTimer {
    pub fn new(operation_name: &'static str) -> Self {
        trace!("Starting operation: {}", operation_name);
        Self {
            start_time: Instant::now(),
            operation_name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn finish(self) -> Duration {
        let duration = self.elapsed();
        trace!("Completed operation '{}' in {}ms", self.operation_name, duration.as_millis());
        duration
    }
}
