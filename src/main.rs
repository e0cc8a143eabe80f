use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use seaplayer::audio::DeviceManager;
use seaplayer::backend::{run_stream_host, DeviceSinkFactory};
use seaplayer::cli::{Cli, Commands, Control, StatusDisplay};
use seaplayer::config::{ConfigManager, PlayerConfig};
use seaplayer::input;
use seaplayer::logging::AudioLogger;
use seaplayer::{BackendKind, EngineError, PlaybackMode, PlayerError, PlayerEvent, Playbacker, Track};

const TICK: Duration = Duration::from_millis(100);

/// Session options given on the command line
struct PlayOptions {
    inputs: Vec<PathBuf>,
    backend: Option<BackendKind>,
    device: Option<String>,
    volume: Option<f32>,
    mode: Option<PlaybackMode>,
}

/// Owns the engine for one `play` session and routes input and events to it
struct AppController {
    playbacker: Playbacker,
    config_manager: ConfigManager,
    match_samplerate: bool,
}

impl AppController {
    fn new(mut config_manager: ConfigManager, options: &PlayOptions) -> Result<Self, PlayerError> {
        let mut config: PlayerConfig = config_manager.get_config().clone();
        if let Some(backend) = options.backend {
            config.backend = backend;
        }
        if options.device.is_some() {
            config.device = options.device.clone();
        }
        if let Some(mode) = options.mode {
            config.playback_mode = mode;
        }
        if let Some(volume) = options.volume {
            config.volume = volume;
            config_manager.set_volume(volume)?;
        }

        let playbacker = Playbacker::from_config(&config)?;
        info!(
            "Engine ready: {} backend, {}",
            playbacker.backend_kind(),
            playbacker.device_config().describe()
        );

        Ok(Self {
            playbacker,
            config_manager,
            match_samplerate: config.match_samplerate,
        })
    }

    fn load(&mut self, inputs: &[PathBuf]) -> Result<(), PlayerError> {
        for input in inputs {
            let input = Cli::expand_path(&input.to_string_lossy());
            for (path, outcome) in input::load(&mut self.playbacker, &input)? {
                if let Err(e) = outcome {
                    eprintln!("Skipping {}: {}", path.display(), e.user_message());
                }
            }
        }

        if self.playbacker.is_empty() {
            return Err(PlayerError::File(io::Error::new(
                io::ErrorKind::NotFound,
                "no playable tracks found",
            )));
        }
        println!("Loaded {} tracks", self.playbacker.len());
        Ok(())
    }

    fn follow_samplerate(&mut self) {
        if !self.match_samplerate {
            return;
        }
        match self.playbacker.match_selected_samplerate() {
            Ok(true) => debug!("Output now at {}", self.playbacker.device_config().describe()),
            Ok(false) => {}
            Err(e) => warn!("Keeping the current output rate: {}", e),
        }
    }

    fn start(&mut self) -> Result<(), PlayerError> {
        self.playbacker.select_next()?;
        self.follow_samplerate();
        self.playbacker.start_engine()?;
        self.playbacker.play()?;
        println!("{}", StatusDisplay::status_line(&self.playbacker));
        Ok(())
    }

    fn change_track(&mut self, forward: bool) -> Result<(), PlayerError> {
        let changed = if forward {
            self.playbacker.select_next()?
        } else {
            self.playbacker.select_previous()?
        };
        if changed {
            self.follow_samplerate();
        }
        self.playbacker.play()?;
        Ok(())
    }

    /// Returns `false` once the user asked to quit
    fn apply_control(&mut self, control: Control) -> Result<bool, PlayerError> {
        match control {
            Control::Play => {
                self.playbacker.play()?;
            }
            Control::TogglePause => {
                self.playbacker.toggle_pause();
            }
            Control::Stop => {
                self.playbacker.stop()?;
            }
            Control::Next => self.change_track(true)?,
            Control::Previous => self.change_track(false)?,
            Control::Seek(position) => {
                if let Some(track) = self.playbacker.selected_track() {
                    track.set_position_secs(position.as_secs_f64())?;
                }
            }
            Control::Jump(offset) => {
                if let Some(track) = self.playbacker.selected_track() {
                    track.seek_by(offset)?;
                }
            }
            Control::Volume(volume) => self.playbacker.set_volume(volume),
            Control::Mode(mode) => {
                let mode = mode.unwrap_or_else(|| self.playbacker.mode().next());
                self.playbacker.set_mode(mode);
                println!("Playback mode: {}", mode.as_str());
                return Ok(true);
            }
            Control::Status => {}
            Control::List => {
                println!("{}", StatusDisplay::track_list(&self.playbacker));
                return Ok(true);
            }
            Control::Help => {
                println!("{}", Cli::help_text());
                return Ok(true);
            }
            Control::Quit => return Ok(false),
        }
        println!("{}", StatusDisplay::status_line(&self.playbacker));
        Ok(true)
    }

    fn handle_event(&mut self, event: PlayerEvent) -> Result<(), PlayerError> {
        match event {
            PlayerEvent::PlaybackStateChanged { state } => debug!("Playback state is now {}", state),
            PlayerEvent::TrackEnded { id } => {
                let previous = self.playbacker.selected_id();
                if self.playbacker.handle_track_ended(id)? {
                    if self.playbacker.selected_id() != previous {
                        self.follow_samplerate();
                    }
                    println!("{}", StatusDisplay::status_line(&self.playbacker));
                } else if self.playbacker.selected_id() == Some(id) {
                    println!("End of list");
                }
            }
        }
        Ok(())
    }

    async fn run(&mut self) -> Result<(), PlayerError> {
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let shutdown_flag_clone = Arc::clone(&shutdown_flag);
        if let Err(e) = ctrlc::set_handler(move || {
            shutdown_flag_clone.store(true, Ordering::Relaxed);
        }) {
            warn!("Ctrl-C handler not installed: {}", e);
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        std::thread::spawn(move || {
            let stdin = io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(line.trim().to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let events = self.playbacker.events();
        let mut interval = tokio::time::interval(TICK);
        let mut stdin_open = true;
        println!("Type 'help' for controls.");

        loop {
            if shutdown_flag.load(Ordering::Relaxed) {
                println!("\nReceived interrupt signal. Shutting down gracefully...");
                break;
            }

            tokio::select! {
                biased;

                line = rx.recv(), if stdin_open => match line {
                    Some(line) if line.is_empty() => {}
                    Some(line) => match Cli::parse_control(&line) {
                        Ok(control) => match self.apply_control(control) {
                            Ok(true) => {}
                            Ok(false) => break,
                            Err(e) => eprintln!("Error: {}", e.user_message()),
                        },
                        Err(e) => eprintln!("{} (type 'help' for controls)", e),
                    },
                    None => stdin_open = false,
                },

                _ = interval.tick() => {
                    for event in events.try_iter() {
                        if let Err(e) = self.handle_event(event) {
                            error!("Failed to handle {:?}: {}", event, e);
                            eprintln!("Error: {}", e.user_message());
                        }
                    }
                }
            }
        }

        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), PlayerError> {
        println!("Shutting down...");
        if let Err(e) = self.playbacker.stop() {
            warn!("Error stopping playback: {}", e);
        }
        match self.playbacker.terminate_engine() {
            Ok(()) | Err(EngineError::NotStarted) => {}
            Err(e) => eprintln!("Warning: Error stopping audio engine: {}", e),
        }

        let volume = self.playbacker.get_volume();
        if let Err(e) = self.config_manager.set_volume(volume) {
            eprintln!("Warning: Error saving configuration: {}", e);
        }
        Ok(())
    }
}

fn show_info(inputs: &[PathBuf]) -> Result<(), PlayerError> {
    for input in inputs {
        for path in input::resolve(&Cli::expand_path(&input.to_string_lossy()))? {
            match Track::open(&path) {
                Ok(track) => println!("{}", StatusDisplay::track_card(&track)),
                Err(e) => eprintln!("{}: {}", path.display(), e.user_message()),
            }
        }
    }
    Ok(())
}

fn show_devices() -> Result<(), PlayerError> {
    let devices = DeviceManager::new().list_output_devices()?;
    println!("{}", StatusDisplay::device_list(&devices));
    Ok(())
}

fn report(error: &PlayerError) {
    eprintln!("[{}] {}", error.severity().as_str(), error.user_message());
    for suggestion in error.recovery_suggestions() {
        eprintln!("  - {}", suggestion);
    }
}

#[tokio::main]
async fn main() {
    if std::env::var("SEAPLAYER_LOG_LEVEL").is_err() {
        std::env::set_var("SEAPLAYER_LOG_LEVEL", "warn");
    }
    if let Err(e) = AudioLogger::init() {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse_args();
    let result = match cli.command {
        Commands::StreamHost => {
            run_stream_host(io::stdin().lock(), &DeviceSinkFactory::new()).map_err(PlayerError::from)
        }
        Commands::Devices => show_devices(),
        Commands::Info { inputs } => show_info(&inputs),
        Commands::Play {
            inputs,
            backend,
            device,
            volume,
            mode,
        } => {
            let options = PlayOptions {
                inputs,
                backend,
                device,
                volume,
                mode,
            };
            run_session(options).await
        }
    };

    let _ = io::stdout().flush();
    if let Err(e) = result {
        log::log!(e.severity().log_level(), "{}", e);
        report(&e);
        std::process::exit(1);
    }
}

async fn run_session(options: PlayOptions) -> Result<(), PlayerError> {
    let config_manager = ConfigManager::new()?;
    let mut app = AppController::new(config_manager, &options)?;
    app.load(&options.inputs)?;
    app.start()?;
    app.run().await
}
