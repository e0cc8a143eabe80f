pub mod renderer;
pub mod state;

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, warn};

use crate::backend::{build_backend, FrameProducer, StreamBackend};
use crate::config::PlayerConfig;
use crate::error::{EngineError, PlayerError, SourceError};
use crate::logging::{AudioLogger, OperationTimer};
use crate::models::{
    BackendKind, DeviceConfig, DeviceOverrides, PlaybackMode, PlaybackState, PlayerEvent, TrackId, Transition,
};
use crate::track::Track;

use renderer::ActiveTrack;
use state::SharedState;

pub use renderer::Renderer;

/// Upper volume bound unless configured otherwise
pub const DEFAULT_MAX_VOLUME: f32 = 3.0;

/// Owns the track registry, the selection and the playback state machine,
/// and drives one stream backend.
///
/// Every method runs on the host thread. The audio thread only sees the
/// shared atomics and the track the renderer was pointed at under its gate.
pub struct Playbacker {
    tracks: HashMap<TrackId, Track>,
    order: Vec<TrackId>,
    selected: Option<TrackId>,
    shared: Arc<SharedState>,
    renderer: Arc<Renderer>,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
    backend: Box<dyn StreamBackend>,
    device: DeviceConfig,
    max_volume: f32,
    mode: PlaybackMode,
    logger: AudioLogger,
}

impl Playbacker {
    /// Wire `backend` to a fresh renderer. The backend is reconfigured when
    /// its configuration differs from `device`.
    pub fn new(mut backend: Box<dyn StreamBackend>, device: DeviceConfig) -> Result<Self, EngineError> {
        device.validate()?;
        if backend.config() != &device {
            backend.reconfigure(&device)?;
        }

        let shared = Arc::new(SharedState::new(1.0));
        let (events_tx, events_rx) = unbounded();
        let renderer = Arc::new(Renderer::new(
            Arc::clone(&shared),
            events_tx.clone(),
            backend.decodes_ahead(),
        ));
        backend.register(Arc::clone(&renderer));

        Ok(Self {
            tracks: HashMap::new(),
            order: Vec::new(),
            selected: None,
            shared,
            renderer,
            events_tx,
            events_rx,
            backend,
            device,
            max_volume: DEFAULT_MAX_VOLUME,
            mode: PlaybackMode::default(),
            logger: AudioLogger::new(),
        })
    }

    /// Build the configured backend and apply the persisted settings
    pub fn from_config(config: &PlayerConfig) -> Result<Self, EngineError> {
        let device = config.device_config();
        let backend = build_backend(config.backend, &device)?;
        Ok(Self::new(backend, device)?
            .with_max_volume(config.max_volume)
            .with_volume(config.volume)
            .with_mode(config.playback_mode))
    }

    pub fn with_volume(self, volume: f32) -> Self {
        self.set_volume(volume);
        self
    }

    pub fn with_max_volume(mut self, max_volume: f32) -> Self {
        if max_volume.is_finite() && max_volume >= 0.0 {
            self.max_volume = max_volume;
            self.set_volume(self.get_volume());
        }
        self
    }

    pub fn with_mode(mut self, mode: PlaybackMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn logger(&self) -> &AudioLogger {
        &self.logger
    }

    // Registry

    pub fn add(&mut self, track: Track) -> TrackId {
        let id = track.id();
        debug!("Registered track {} ({})", id, track.display_name());
        self.order.push(id);
        self.tracks.insert(id, track);
        id
    }

    /// Drop a track. Removing the selected track stops playback and clears
    /// the selection; unknown ids are ignored.
    pub fn remove(&mut self, id: TrackId) -> bool {
        let Some(track) = self.tracks.remove(&id) else {
            return false;
        };
        self.order.retain(|other| *other != id);

        let was_selected = self.selected == Some(id);
        if was_selected {
            let mut gate = self.renderer.gate();
            let changed = self.shared.apply(Transition::Stop);
            self.renderer.set_active(&mut gate, None);
            self.selected = None;
            drop(gate);

            if let Some((from, to)) = changed {
                self.notify(from, to);
            }
        }

        self.logger.log_track_removed(id, was_selected);
        drop(track);
        true
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.tracks.contains_key(&id)
    }

    /// Tracks in registration order
    pub fn tracks(&self) -> impl Iterator<Item = &Track> + '_ {
        self.order.iter().filter_map(move |id| self.tracks.get(id))
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    // Selection

    pub fn selected_id(&self) -> Option<TrackId> {
        self.selected
    }

    pub fn selected_track(&self) -> Option<&Track> {
        self.selected.and_then(|id| self.tracks.get(&id))
    }

    /// Stop the current track (rewinding it) and hand `id` to the renderer.
    /// Returns `false` when `id` is unknown or already selected.
    pub fn select_by_id(&mut self, id: TrackId) -> Result<bool, SourceError> {
        if self.selected == Some(id) {
            return Ok(false);
        }
        let Some(track) = self.tracks.get(&id) else {
            debug!("Ignoring selection of unknown track {}", id);
            return Ok(false);
        };
        let active = ActiveTrack {
            id,
            stream: track.stream(),
        };
        let name = track.display_name();

        self.stop()?;

        let mut gate = self.renderer.gate();
        self.renderer.set_active(&mut gate, Some(active));
        self.selected = Some(id);
        drop(gate);

        self.logger.log_track_selected(id, &name);
        Ok(true)
    }

    /// Select the following track, wrapping to the first
    pub fn select_next(&mut self) -> Result<bool, SourceError> {
        match self.neighbour(true, true) {
            Some(id) => self.select_by_id(id),
            None => Ok(false),
        }
    }

    /// Select the preceding track, wrapping to the last
    pub fn select_previous(&mut self) -> Result<bool, SourceError> {
        match self.neighbour(false, true) {
            Some(id) => self.select_by_id(id),
            None => Ok(false),
        }
    }

    fn neighbour(&self, forward: bool, wrap: bool) -> Option<TrackId> {
        let len = self.order.len();
        if len == 0 {
            return None;
        }
        let current = self
            .selected
            .and_then(|id| self.order.iter().position(|other| *other == id));

        let index = match (current, forward) {
            (None, true) => 0,
            (None, false) => len - 1,
            (Some(i), true) if i + 1 < len => i + 1,
            (Some(_), true) if wrap => 0,
            (Some(i), false) if i > 0 => i - 1,
            (Some(_), false) if wrap => len - 1,
            (Some(_), _) => return None,
        };
        Some(self.order[index])
    }

    // Playback state

    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    /// Start the selected track, rewinding it first if it already played to
    /// the end. Returns whether the state changed.
    pub fn play(&self) -> Result<bool, SourceError> {
        let Some(track) = self.selected_track() else {
            debug!("play() without a selected track");
            return Ok(false);
        };
        if self.state() == PlaybackState::Stopped && track.position()? >= track.frames() {
            track.seek(0)?;
        }

        Ok(self.transition(Transition::Play))
    }

    /// Stop playback and rewind the selected track to frame 0
    pub fn stop(&self) -> Result<bool, SourceError> {
        let gate = self.renderer.gate();
        let changed = self.shared.apply(Transition::Stop);
        let rewound = match self.selected_track() {
            Some(track) => track.seek(0),
            None => Ok(()),
        };
        drop(gate);

        if let Some((from, to)) = changed {
            self.notify(from, to);
        }
        rewound?;
        Ok(changed.is_some())
    }

    /// Pausing is only possible while playing
    pub fn pause(&self) -> bool {
        self.transition(Transition::Pause)
    }

    pub fn unpause(&self) -> bool {
        self.transition(Transition::Unpause)
    }

    pub fn toggle_pause(&self) -> bool {
        match self.state() {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Paused => self.unpause(),
            PlaybackState::Stopped => false,
        }
    }

    fn transition(&self, transition: Transition) -> bool {
        match self.shared.apply(transition) {
            Some((from, to)) => {
                self.notify(from, to);
                true
            }
            None => false,
        }
    }

    fn notify(&self, from: PlaybackState, to: PlaybackState) {
        self.logger.log_state_changed(from, to);
        let _ = self.events_tx.try_send(PlayerEvent::PlaybackStateChanged { state: to });
    }

    // Volume and mode

    /// Clamp to `[0, max_volume]`; NaN leaves the volume unchanged
    pub fn set_volume(&self, volume: f32) {
        if volume.is_nan() {
            warn!("Ignoring NaN volume");
            return;
        }
        self.shared.set_volume(volume.clamp(0.0, self.max_volume));
    }

    pub fn get_volume(&self) -> f32 {
        self.shared.volume()
    }

    pub fn max_volume(&self) -> f32 {
        self.max_volume
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PlaybackMode) {
        self.mode = mode;
    }

    /// Apply the playback mode after the renderer reported `id` as ended.
    /// Returns whether something started playing.
    pub fn handle_track_ended(&mut self, id: TrackId) -> Result<bool, PlayerError> {
        if self.selected != Some(id) {
            debug!("Ignoring end of track {} which is no longer selected", id);
            return Ok(false);
        }
        self.logger.log_track_ended(id);

        let next = match self.mode {
            PlaybackMode::RepeatTrack => Some(id),
            PlaybackMode::RepeatList => self.neighbour(true, true),
            PlaybackMode::Play => self.neighbour(true, false),
        };

        match next {
            Some(next) if next == id => {
                self.stop()?;
            }
            Some(next) => {
                self.select_by_id(next)?;
            }
            None => return Ok(false),
        }
        Ok(self.play()?)
    }

    // Engine

    pub fn device_config(&self) -> &DeviceConfig {
        &self.device
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn is_engine_running(&self) -> bool {
        self.backend.is_running()
    }

    /// Renderer handle driven by the backend
    pub fn producer(&self) -> FrameProducer {
        Arc::clone(&self.renderer)
    }

    /// Notification receiver for the host loop
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events_rx.clone()
    }

    /// Produce one buffer for the current device layout. Backends call the
    /// renderer directly; this is for hosts driving output themselves.
    pub fn render(&self, out: &mut [f32]) {
        self.renderer.render(out, self.device.channels);
    }

    /// Start the backend. Starting a running engine does nothing.
    pub fn start_engine(&mut self) -> Result<(), EngineError> {
        if self.backend.is_running() {
            return Ok(());
        }
        let timer = OperationTimer::new("start_engine");
        if let Err(e) = self.backend.start() {
            self.logger.log_stream_error(&e.to_string());
            return Err(e);
        }
        self.logger.log_engine_started(self.backend.kind().as_str(), timer.finish());
        Ok(())
    }

    /// Halt the backend. Playback state is left as it is.
    pub fn terminate_engine(&mut self) -> Result<(), EngineError> {
        let was_running = self.backend.is_running();
        let timer = OperationTimer::new("terminate_engine");
        self.backend.stop()?;
        if !was_running {
            return Err(EngineError::NotStarted);
        }
        self.logger.log_engine_stopped(self.backend.kind().as_str(), timer.finish());
        Ok(())
    }

    /// Stop the backend, apply `overrides` on top of the current device
    /// configuration and optionally start again. On failure the previous
    /// configuration stays in effect and the engine remains stopped.
    pub fn reconfigure(&mut self, overrides: &DeviceOverrides, restart: bool) -> Result<(), EngineError> {
        let target = self.device.merged(overrides);
        target.validate()?;

        let timer = OperationTimer::new("reconfigure");
        if self.backend.is_running() {
            self.backend.stop()?;
        }
        self.backend.reconfigure(&target)?;
        self.device = target;
        self.logger.log_device_reconfigured(&self.device.describe(), timer.finish());

        if restart {
            self.start_engine()?;
        }
        Ok(())
    }

    /// Switch the device to the selected track's native samplerate,
    /// restarting the engine only if it was running
    pub fn match_selected_samplerate(&mut self) -> Result<bool, EngineError> {
        let Some(samplerate) = self.selected_track().map(Track::samplerate) else {
            return Ok(false);
        };
        if samplerate == self.device.samplerate {
            return Ok(false);
        }
        let restart = self.backend.is_running();
        self.reconfigure(&DeviceOverrides::samplerate(samplerate), restart)?;
        Ok(true)
    }
}

impl Drop for Playbacker {
    fn drop(&mut self) {
        if self.backend.is_running() {
            if let Err(e) = self.backend.stop() {
                warn!("Engine did not shut down cleanly: {}", e);
            }
        }
    }
}
