use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::audio::is_supported_extension;
use crate::error::PlayerError;
use crate::models::TrackId;
use crate::playback::Playbacker;
use crate::track::Track;

/// Outcome of loading one resolved path
pub type LoadResult = (PathBuf, Result<TrackId, PlayerError>);

/// Expand a file or directory into playable paths. Directories are scanned
/// recursively for known audio extensions and the result is sorted; a file
/// is returned as is and left for the decoder to judge.
pub fn resolve(input: &Path) -> Result<Vec<PathBuf>, PlayerError> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        return Err(PlayerError::File(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", input.display()),
        )));
    }

    let mut files = Vec::new();
    scan_directory(input, &mut files)?;
    files.sort();
    Ok(files)
}

fn scan_directory(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), PlayerError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            scan_directory(&path, files)?;
        } else if path.is_file() && is_supported_extension(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// Open every path behind `input` as a Track and register it. Paths that
/// are already registered are skipped; every other path gets its own result.
pub fn load(playbacker: &mut Playbacker, input: &Path) -> Result<Vec<LoadResult>, PlayerError> {
    let mut results = Vec::new();
    for path in resolve(input)? {
        if playbacker.tracks().any(|track| track.path() == Some(path.as_path())) {
            debug!("{} is already loaded", path.display());
            continue;
        }

        let outcome = match Track::open(&path) {
            Ok(track) => Ok(playbacker.add(track)),
            Err(e) => {
                warn!("Cannot load {}: {}", path.display(), e);
                playbacker.logger().log_source_error(&path.display().to_string(), &e.to_string());
                Err(PlayerError::from(e))
            }
        };
        results.push((path, outcome));
    }
    Ok(results)
}
