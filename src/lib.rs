pub mod audio;
pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod input;
pub mod logging;
pub mod models;
pub mod playback;
pub mod track;

#[cfg(test)]
mod integration_tests;

pub use error::*;
pub use models::*;
pub use playback::Playbacker;
pub use track::Track;
