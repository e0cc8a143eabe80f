use thiserror::Error;

/// Main player error type
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),
}

impl PlayerError {
    /// Get user-friendly error message with suggested solutions
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::Engine(err) => err.user_message(),
            PlayerError::Source(err) => err.user_message(),
            PlayerError::Config(err) => err.user_message(),
            PlayerError::File(err) => Self::format_file_error(err),
        }
    }

    /// Get suggested recovery actions for the error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            PlayerError::Engine(err) => err.recovery_suggestions(),
            PlayerError::Source(err) => err.recovery_suggestions(),
            PlayerError::Config(err) => err.recovery_suggestions(),
            PlayerError::File(_) => vec![
                "Check that the file path is correct".to_string(),
                "Check file permissions".to_string(),
            ],
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PlayerError::Engine(EngineError::NotStarted) => ErrorSeverity::Info,
            PlayerError::Engine(EngineError::DeviceNotFound { .. }) => ErrorSeverity::Error,
            PlayerError::Engine(EngineError::ShutdownTimeout { .. }) => ErrorSeverity::Warning,
            PlayerError::Engine(_) => ErrorSeverity::Critical,
            PlayerError::Source(SourceError::UnsupportedFormat { .. }) => ErrorSeverity::Warning,
            PlayerError::Source(_) => ErrorSeverity::Error,
            PlayerError::Config(_) => ErrorSeverity::Warning,
            PlayerError::File(_) => ErrorSeverity::Error,
        }
    }

    fn format_file_error(err: &std::io::Error) -> String {
        match err.kind() {
            std::io::ErrorKind::NotFound => "File or directory not found".to_string(),
            std::io::ErrorKind::PermissionDenied => "Permission denied - cannot access file".to_string(),
            _ => format!("File system error: {}", err),
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// Playback engine and backend errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid device configuration: {0}")]
    DeviceConfig(String),

    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Engine not started")]
    NotStarted,

    #[error("No frame producer registered with the backend")]
    NoProducer,

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Stream host process error: {0}")]
    HostProcess(String),

    #[error("Packet protocol error: {0}")]
    Protocol(String),

    #[error("Backend did not shut down within {waited_ms} ms")]
    ShutdownTimeout { waited_ms: u64 },
}

impl EngineError {
    pub fn user_message(&self) -> String {
        match self {
            EngineError::DeviceConfig(msg) => {
                format!("The audio device rejected the requested configuration: {}", msg)
            }
            EngineError::DeviceNotFound { device } => {
                format!("Audio device '{}' is not available or has been disconnected", device)
            }
            EngineError::NotStarted => "The audio engine is not running".to_string(),
            EngineError::NoProducer => "The audio backend has nothing to play from".to_string(),
            EngineError::Stream(msg) => format!("Audio playback interrupted: {}", msg),
            EngineError::HostProcess(msg) => format!("Audio helper process failed: {}", msg),
            EngineError::Protocol(msg) => format!("Audio helper process sent invalid data: {}", msg),
            EngineError::ShutdownTimeout { .. } => {
                "The audio engine took too long to stop and was terminated".to_string()
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            EngineError::DeviceConfig(_) => vec![
                "Try a common sample rate (44100 or 48000 Hz)".to_string(),
                "Try stereo output or the f32 sample format".to_string(),
            ],
            EngineError::DeviceNotFound { .. } => vec![
                "Use 'seaplayer devices' to see available audio devices".to_string(),
                "Remove the device setting to use the default output".to_string(),
            ],
            EngineError::NotStarted => vec!["Start playback before stopping the engine".to_string()],
            EngineError::NoProducer => vec!["Restart the application".to_string()],
            EngineError::Stream(_) => vec![
                "Check audio device connections".to_string(),
                "Try a different backend with '--backend thread'".to_string(),
            ],
            EngineError::HostProcess(_) | EngineError::Protocol(_) => vec![
                "Try the in-process backends with '--backend callback'".to_string(),
            ],
            EngineError::ShutdownTimeout { .. } => vec![
                "Close other applications holding the audio device".to_string(),
            ],
        }
    }
}

/// Errors raised by audio sources
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source unreadable: {0}")]
    Unreadable(String),

    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Seek error: {0}")]
    Seek(String),
}

impl SourceError {
    pub fn user_message(&self) -> String {
        match self {
            SourceError::Unreadable(msg) => format!("Cannot read audio data: {}", msg),
            SourceError::UnsupportedFormat { format } => {
                format!("Audio format '{}' is not supported by this player", format)
            }
            SourceError::Seek(msg) => format!("Cannot seek in this audio file: {}", msg),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            SourceError::Unreadable(_) => vec![
                "Check that the file exists and is readable".to_string(),
                "Try re-downloading or re-copying the file".to_string(),
            ],
            SourceError::UnsupportedFormat { .. } => vec![
                "Supported formats: FLAC, WAV, MP3, OGG/Vorbis, AAC/ALAC".to_string(),
                "Check if the file extension matches the actual format".to_string(),
            ],
            SourceError::Seek(_) => vec!["Play from the beginning instead of seeking".to_string()],
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => "Could not locate the configuration directory".to_string(),
            ConfigError::IoError(err) => format!("Could not read or write the configuration: {}", err),
            ConfigError::SerializationError(err) => format!("Could not save the configuration: {}", err),
            ConfigError::DeserializationError(err) => {
                format!("Configuration file contains invalid settings: {}", err)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ConfigError::ConfigDirNotFound => vec!["Make sure $HOME is set".to_string()],
            ConfigError::IoError(_) => vec!["Check permissions of ~/.config/seaplayer".to_string()],
            ConfigError::SerializationError(_) => vec!["Try the operation again".to_string()],
            ConfigError::DeserializationError(_) => vec![
                "Fix or delete ~/.config/seaplayer/config.toml to restore defaults".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_player_error_from_engine_error() {
        let err: PlayerError = EngineError::NotStarted.into();
        assert!(matches!(err, PlayerError::Engine(EngineError::NotStarted)));
        assert_eq!(err.severity(), ErrorSeverity::Info);
    }

    #[test]
    fn test_player_error_from_source_error() {
        let err: PlayerError = SourceError::Unreadable("truncated".to_string()).into();
        assert_eq!(err.to_string(), "Source error: Source unreadable: truncated");
        assert_eq!(err.severity().log_level(), log::Level::Error);
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::DeviceNotFound { device: "USB DAC".to_string() };
        assert_eq!(err.to_string(), "Device not found: USB DAC");
        assert!(err.user_message().contains("USB DAC"));

        let err = EngineError::ShutdownTimeout { waited_ms: 2000 };
        assert_eq!(err.to_string(), "Backend did not shut down within 2000 ms");
    }

    #[test]
    fn test_recovery_suggestions_not_empty() {
        let errors: Vec<PlayerError> = vec![
            EngineError::DeviceConfig("bad".to_string()).into(),
            SourceError::Seek("no index".to_string()).into(),
            ConfigError::ConfigDirNotFound.into(),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into(),
        ];
        for err in errors {
            assert!(!err.recovery_suggestions().is_empty(), "{:?}", err);
            assert!(!err.user_message().is_empty());
        }
    }

    #[test]
    fn test_error_source_chain() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let config_error = ConfigError::IoError(io_error);
        let player_error = PlayerError::Config(config_error);

        assert!(player_error.source().is_some());
        assert_eq!(player_error.severity(), ErrorSeverity::Warning);
    }
}
