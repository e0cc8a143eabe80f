use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::{BackendKind, PlaybackMode};

pub mod status;
pub use status::StatusDisplay;

/// Terminal audio player
#[derive(Debug, Parser)]
#[command(name = "seaplayer")]
#[command(about = "A terminal audio player with a pluggable playback engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Play files or directories, reading controls from stdin
    Play {
        /// Files or directories to load
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Engine backend: callback, thread or process
        #[arg(long)]
        backend: Option<BackendKind>,
        /// Output device name
        #[arg(long)]
        device: Option<String>,
        /// Initial volume (1.0 is unity gain)
        #[arg(long)]
        volume: Option<f32>,
        /// What happens when a track ends: play, repeat-track or repeat-list
        #[arg(long)]
        mode: Option<PlaybackMode>,
    },
    /// Show format and tag information
    Info {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// List audio output devices
    Devices,
    /// Output helper spawned by the process backend
    #[command(name = "stream-host", hide = true)]
    StreamHost,
}

/// Interactive control typed while playing
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Play,
    TogglePause,
    Stop,
    Next,
    Previous,
    /// Absolute position
    Seek(Duration),
    /// Relative jump in seconds; negative rewinds
    Jump(f64),
    Volume(f32),
    /// Set a mode, or cycle to the next one
    Mode(Option<PlaybackMode>),
    Status,
    List,
    Help,
    Quit,
}

/// Default step for `forward` and `back`
const JUMP_SECONDS: f64 = 5.0;

impl Cli {
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }

    /// Expand tilde (~) in path to home directory
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            match dirs::home_dir() {
                Some(home_dir) => home_dir.join(rest),
                None => PathBuf::from(path),
            }
        } else if path == "~" {
            dirs::home_dir().unwrap_or_else(|| PathBuf::from(path))
        } else {
            PathBuf::from(path)
        }
    }

    /// Parse one line of interactive input
    pub fn parse_control(input: &str) -> Result<Control, ParseError> {
        let args: Vec<&str> = input.split_whitespace().collect();
        let Some(&command) = args.first() else {
            return Err(ParseError::EmptyCommand);
        };

        match command {
            "play" => Ok(Control::Play),
            "p" | "pause" | "resume" => Ok(Control::TogglePause),
            "s" | "stop" => Ok(Control::Stop),
            "n" | "next" => Ok(Control::Next),
            "b" | "prev" | "previous" => Ok(Control::Previous),
            "seek" => {
                let position = args.get(1).ok_or_else(|| ParseError::MissingArgument {
                    command: "seek".to_string(),
                    argument: "position".to_string(),
                })?;
                Ok(Control::Seek(Self::parse_time(position)?))
            }
            "f" | "forward" => Ok(Control::Jump(Self::parse_step(args.get(1))?)),
            "r" | "back" => Ok(Control::Jump(-Self::parse_step(args.get(1))?)),
            "v" | "volume" => {
                let level = args.get(1).ok_or_else(|| ParseError::MissingArgument {
                    command: "volume".to_string(),
                    argument: "level".to_string(),
                })?;
                match level.parse::<f32>() {
                    Ok(level) if level.is_finite() && level >= 0.0 => Ok(Control::Volume(level)),
                    _ => Err(ParseError::InvalidArgument {
                        argument: "volume level".to_string(),
                        value: level.to_string(),
                        expected: "a number >= 0".to_string(),
                    }),
                }
            }
            "m" | "mode" => match args.get(1) {
                None => Ok(Control::Mode(None)),
                Some(name) => name
                    .parse::<PlaybackMode>()
                    .map(|mode| Control::Mode(Some(mode)))
                    .map_err(|_| ParseError::InvalidArgument {
                        argument: "mode".to_string(),
                        value: name.to_string(),
                        expected: "play, repeat-track or repeat-list".to_string(),
                    }),
            },
            "status" => Ok(Control::Status),
            "l" | "list" => Ok(Control::List),
            "h" | "help" => Ok(Control::Help),
            "q" | "quit" | "exit" => Ok(Control::Quit),
            _ => Err(ParseError::UnknownCommand {
                command: command.to_string(),
            }),
        }
    }

    fn parse_step(arg: Option<&&str>) -> Result<f64, ParseError> {
        match arg {
            None => Ok(JUMP_SECONDS),
            Some(value) => Self::parse_time(value).map(|d| d.as_secs_f64()),
        }
    }

    /// Parse "90", "90s", "1:30" or "1:30.5"
    pub fn parse_time(time_str: &str) -> Result<Duration, ParseError> {
        let trimmed = time_str.trim();
        let invalid = || ParseError::InvalidTimeFormat {
            input: time_str.to_string(),
        };

        if let Some((minutes, seconds)) = trimmed.split_once(':') {
            let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
            let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
            if !(0.0..60.0).contains(&seconds) {
                return Err(invalid());
            }
            Duration::try_from_secs_f64(minutes as f64 * 60.0 + seconds).map_err(|_| invalid())
        } else {
            let seconds: f64 = trimmed.trim_end_matches('s').parse().map_err(|_| invalid())?;
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(invalid());
            }
            Duration::try_from_secs_f64(seconds).map_err(|_| invalid())
        }
    }

    /// "mm:ss", or "h:mm:ss" from one hour on
    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;
        if hours > 0 {
            format!("{}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            format!("{:02}:{:02}", minutes, seconds)
        }
    }

    pub fn help_text() -> &'static str {
        "Controls:\n  \
         play             start the selected track\n  \
         p, pause         toggle pause\n  \
         s, stop          stop and rewind\n  \
         n, next          next track\n  \
         b, prev          previous track\n  \
         seek <time>      jump to a position (90, 90s, 1:30)\n  \
         f, forward [t]   skip ahead (default 5s)\n  \
         r, back [t]      rewind (default 5s)\n  \
         v, volume <x>    set volume (1.0 is unity gain)\n  \
         m, mode [name]   set or cycle playback mode\n  \
         status           show the current track\n  \
         l, list          list loaded tracks\n  \
         q, quit          exit"
    }
}

/// Interactive input errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("Missing argument for {command}: {argument}")]
    MissingArgument { command: String, argument: String },

    #[error("Invalid argument {argument}: got '{value}', expected {expected}")]
    InvalidArgument {
        argument: String,
        value: String,
        expected: String,
    },

    #[error("Invalid time format: {input}")]
    InvalidTimeFormat { input: String },
}
