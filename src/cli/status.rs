use std::time::Duration;

use crate::audio::OutputDeviceInfo;
use crate::cli::Cli;
use crate::models::PlaybackState;
use crate::playback::Playbacker;
use crate::track::Track;

/// Text formatting for the terminal host
pub struct StatusDisplay;

impl StatusDisplay {
    /// Format and tag summary of one track
    pub fn track_card(track: &Track) -> String {
        let metadata = track.metadata();
        let mut lines = vec![
            "┌─ Track Information ─────────────────────────────────────┐".to_string(),
            format!("│ Title: {}", Self::truncate(&track.display_name(), 50)),
        ];
        if let Some(artist) = &metadata.artist {
            lines.push(format!("│ Artist: {}", Self::truncate(artist, 49)));
        }
        if let Some(album) = &metadata.album {
            lines.push(format!("│ Album: {}", Self::truncate(album, 50)));
        }
        lines.push(format!("│ Format: {}", track.subtitle()));
        lines.push(format!("│ Duration: {}", Cli::format_duration(track.duration())));
        if let Some(cover) = track.cover_image() {
            lines.push(format!("│ Cover: {} ({} bytes)", cover.media_type, cover.data.len()));
        }
        if let Some(path) = track.path() {
            lines.push(format!("│ Path: {}", Self::truncate(&path.display().to_string(), 45)));
        }
        lines.push("└─────────────────────────────────────────────────────────┘".to_string());
        lines.join("\n")
    }

    /// One line describing the selected track and the engine
    pub fn status_line(playbacker: &Playbacker) -> String {
        let state = playbacker.state();
        let volume = (playbacker.get_volume() * 100.0).round() as u32;
        let mode = playbacker.mode().as_str();

        match playbacker.selected_track() {
            Some(track) => {
                let position = track.position_secs().unwrap_or(0.0);
                let duration = track.duration_secs();
                let progress = if duration > 0.0 { position / duration } else { 0.0 };
                format!(
                    "{} | {} | [{}] {}/{} | vol {}% | {}",
                    state.as_str(),
                    Self::truncate(&track.display_name(), 40),
                    Self::progress_bar(progress, 20),
                    Cli::format_duration(Duration::from_secs_f64(position)),
                    Cli::format_duration(track.duration()),
                    volume,
                    mode
                )
            }
            None => format!("{} | No track selected | vol {}% | {}", state.as_str(), volume, mode),
        }
    }

    /// Loaded tracks in order, marking the selected one
    pub fn track_list(playbacker: &Playbacker) -> String {
        if playbacker.is_empty() {
            return "No tracks loaded".to_string();
        }
        playbacker
            .tracks()
            .enumerate()
            .map(|(index, track)| {
                let marker = match (track.is_selected(playbacker), playbacker.state()) {
                    (false, _) => ' ',
                    (true, PlaybackState::Playing) => '>',
                    (true, PlaybackState::Paused) => '=',
                    (true, PlaybackState::Stopped) => '*',
                };
                format!(
                    "{} {:>3}. {} [{}]",
                    marker,
                    index + 1,
                    Self::truncate(&track.display_name(), 50),
                    Cli::format_duration(track.duration())
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn device_list(devices: &[OutputDeviceInfo]) -> String {
        if devices.is_empty() {
            return "No output devices found".to_string();
        }
        devices
            .iter()
            .map(|device| {
                let mut line = format!("{} {}", if device.is_default { '*' } else { ' ' }, device.name);
                if let Some(rate) = device.default_samplerate {
                    line.push_str(&format!(" ({} Hz, up to {} channels)", rate, device.max_channels));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn progress_bar(progress: f64, width: usize) -> String {
        let filled = ((progress.clamp(0.0, 1.0)) * width as f64) as usize;
        format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
    }

    /// Truncate to `max_len` characters, ending with "..."
    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", kept)
        }
    }
}
