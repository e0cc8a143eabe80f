use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::models::{PlaybackState, Transition};

/// Scalars read by the audio thread and written by the Host
#[derive(Debug)]
pub struct SharedState {
    state: AtomicU8,
    volume: AtomicU32,
}

impl SharedState {
    pub fn new(volume: f32) -> Self {
        Self {
            state: AtomicU8::new(PlaybackState::Stopped.to_u8()),
            volume: AtomicU32::new(volume.to_bits()),
        }
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Apply a transition atomically. Returns `(from, to)` only when the
    /// state actually changed, so exactly one caller observes each change.
    pub fn apply(&self, transition: Transition) -> Option<(PlaybackState, PlaybackState)> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = PlaybackState::from_u8(current);
            let to = from.on(transition)?;
            match self.state.compare_exchange_weak(current, to.to_u8(), Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Some((from, to)),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }
}
