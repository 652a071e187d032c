//! nowplaying: inspect and control the media sessions of this machine.
//!
//! ## Subcommands
//!
//! - `list`: print every session once
//! - `watch`: log session changes until Ctrl-C
//! - `control`: send a transport command to one session

mod format;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nowplaying_core::{
    MediaOptions, NowPlaying, PlaybackState, RegistryListener, SessionHandle, SessionListener,
    SessionRegistry, TransportCommand,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "nowplaying")]
#[command(about = "Inspect and control system media sessions")]
#[command(version)]
struct Cli {
    /// TOML file with engine options
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Session list rescan interval in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    poll_ms: Option<u64>,

    /// Per-session probe interval in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    update_ms: Option<u64>,

    /// Position-only refresh interval in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    refresh_ms: Option<u64>,

    /// Poll only; no listener callbacks
    #[arg(long, global = true)]
    no_events: bool,

    /// Debug logging for the whole process
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every media session
    List {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Log session changes until interrupted
    Watch,

    /// Send a transport command
    Control {
        /// Application name (substring match), or `-` for the active session
        #[arg(value_name = "APP")]
        app: String,

        #[arg(value_enum)]
        action: Action,

        /// Target position for `seek`, in seconds
        #[arg(value_name = "SECS")]
        seconds: Option<f64>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Action {
    Play,
    Pause,
    Toggle,
    Next,
    Previous,
    Stop,
    Seek,
}

impl Action {
    fn command(self, seconds: Option<f64>) -> Result<TransportCommand> {
        Ok(match self {
            Action::Play => TransportCommand::Play,
            Action::Pause => TransportCommand::Pause,
            Action::Toggle => TransportCommand::TogglePlayPause,
            Action::Next => TransportCommand::Next,
            Action::Previous => TransportCommand::Previous,
            Action::Stop => TransportCommand::Stop,
            Action::Seek => {
                let seconds = seconds.ok_or_else(|| anyhow!("seek needs a position in seconds"))?;
                let position = Duration::try_from_secs_f64(seconds)
                    .map_err(|_| anyhow!("Invalid seek position: {}", seconds))?;
                TransportCommand::Seek(position)
            }
        })
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info,nowplaying=debug" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Config file first, then command-line overrides
fn load_options(cli: &Cli) -> Result<MediaOptions> {
    let mut options = match &cli.config {
        Some(path) => MediaOptions::load(path)?,
        None => MediaOptions::default(),
    };
    if let Some(ms) = cli.poll_ms {
        options = options.with_session_poll_interval(Duration::from_millis(ms))?;
    }
    if let Some(ms) = cli.update_ms {
        options = options.with_session_update_interval(Duration::from_millis(ms))?;
    }
    if let Some(ms) = cli.refresh_ms {
        options = options.with_position_refresh_interval(Some(Duration::from_millis(ms)))?;
    }
    if cli.no_events {
        options = options.with_event_driven_enabled(false);
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let options = load_options(&cli)?;
    let probe = nowplaying_media_session::create_probe()?;
    let registry = SessionRegistry::start(probe, options).context("Failed to start session registry")?;

    let result = match cli.command {
        Commands::List { json } => list(&registry, json),
        Commands::Watch => watch(&registry).await,
        Commands::Control { app, action, seconds } => control(&registry, &app, action, seconds).await,
    };

    registry.close();
    result
}

fn list(registry: &SessionRegistry, json: bool) -> Result<()> {
    let snapshots: Vec<_> = registry.all_sessions().iter().map(|s| s.snapshot()).collect();

    if json {
        let values: Vec<_> = snapshots.iter().map(|s| s.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    if snapshots.is_empty() {
        println!("No media sessions");
    }
    for snapshot in &snapshots {
        println!("{}", format::session_line(snapshot));
    }
    Ok(())
}

/// Logs per-session events
struct LogListener;

impl SessionListener for LogListener {
    fn on_now_playing_changed(&self, session: &SessionHandle, now_playing: Option<&NowPlaying>) {
        match now_playing {
            Some(np) => info!(
                "[{}] {} ({})",
                session.application_name(),
                format::track(np),
                format::progress(np)
            ),
            None => info!("[{}] nothing playing", session.application_name()),
        }
    }

    fn on_playback_state_changed(&self, session: &SessionHandle, state: PlaybackState) {
        info!("[{}] state: {}", session.application_name(), state);
    }

    fn on_session_active_changed(&self, session: &SessionHandle, active: bool) {
        info!("[{}] active: {}", session.application_name(), active);
    }
}

/// Attaches the log listener to every session that appears, once per session
struct AttachListener {
    session_listener: Arc<LogListener>,
    attached: Mutex<HashSet<String>>,
}

impl AttachListener {
    fn new(session_listener: Arc<LogListener>) -> Self {
        Self {
            session_listener,
            attached: Mutex::new(HashSet::new()),
        }
    }

    /// Returns false when the session already has the log listener
    fn attach(&self, session: &SessionHandle) -> bool {
        let first = self
            .attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id().to_string());
        if first {
            session.add_listener(self.session_listener.clone());
        }
        first
    }
}

impl RegistryListener for AttachListener {
    fn on_session_added(&self, session: &SessionHandle) {
        info!("Session added: {} ({})", session.application_name(), session.id());
        self.attach(session);
    }

    fn on_session_removed(&self, session_id: &str) {
        info!("Session removed: {}", session_id);
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }
}

async fn watch(registry: &SessionRegistry) -> Result<()> {
    if !registry.is_event_driven_enabled() {
        warn!("Event delivery is disabled (--no-events); nothing will be logged");
    }

    // Registered before the walk so no session slips between the two.
    let attacher = Arc::new(AttachListener::new(Arc::new(LogListener)));
    registry.add_listener(attacher.clone());
    for session in registry.all_sessions() {
        info!("{}", format::session_line(&session.snapshot()));
        attacher.attach(&session);
    }

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Interrupted, shutting down");
    Ok(())
}

async fn control(registry: &SessionRegistry, app: &str, action: Action, seconds: Option<f64>) -> Result<()> {
    let command = action.command(seconds)?;
    let session = if app == "-" {
        registry.active_session()
    } else {
        registry.session_by_app(app)
    }
    .ok_or_else(|| anyhow!("No media session matches {:?}", app))?;

    if session.send(command).await {
        info!("{} -> {}", command.as_str(), session.application_name());
        Ok(())
    } else {
        Err(anyhow!(
            "{} rejected {}",
            session.application_name(),
            command.as_str()
        ))
    }
}
