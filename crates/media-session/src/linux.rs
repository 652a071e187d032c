//! Linux media sessions via MPRIS (Media Player Remote Interfacing Specification)
//!
//! Every `org.mpris.MediaPlayer2.*` name on the session bus is one session.
//! The probe is synchronous, so it talks to the bus through zbus's blocking
//! proxies.

use crate::mpris::{self, MediaPlayer2ProxyBlocking, PlayerProxyBlocking, PlayerStatus};
use crate::PlatformSupport;
use anyhow::Result;
use nowplaying_core::{RawSnapshot, SnapshotProbe, TransportCapabilities, TransportControls};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use zbus::blocking::{connection, fdo::DBusProxy, Connection};
use zbus::proxy::CacheProperties;
use zbus::zvariant::ObjectPath;

/// Some players (notably Chromium instances) never answer property reads
const METHOD_TIMEOUT: Duration = Duration::from_secs(2);

fn connect() -> Result<Connection> {
    Ok(connection::Builder::session()?
        .method_timeout(METHOD_TIMEOUT)
        .build()?)
}

/// All MPRIS players currently on the session bus
fn list_players(connection: &Connection) -> Result<Vec<String>> {
    let names = DBusProxy::new(connection)?.list_names()?;
    Ok(names
        .into_iter()
        .map(|name| name.to_string())
        .filter(|name| mpris::is_player_bus(name))
        .collect())
}

/// Property reads must reach the player on every probe: `Position` never emits
/// a change signal.
fn player<'a>(connection: &'a Connection, bus: &'a str) -> Result<PlayerProxyBlocking<'a>> {
    Ok(PlayerProxyBlocking::builder(connection)
        .destination(bus)?
        .cache_properties(CacheProperties::No)
        .build()?)
}

fn read_capabilities(player: &PlayerProxyBlocking<'_>) -> TransportCapabilities {
    TransportCapabilities {
        can_play: player.can_play().unwrap_or(false),
        can_pause: player.can_pause().unwrap_or(false),
        can_next: player.can_go_next().unwrap_or(false),
        can_previous: player.can_go_previous().unwrap_or(false),
        // MPRIS has no CanStop; Stop is available whenever the player is controllable.
        can_stop: player.can_control().unwrap_or(false),
        can_seek: player.can_seek().unwrap_or(false),
    }
}

pub(crate) fn support() -> PlatformSupport {
    match connect().and_then(|connection| list_players(&connection)) {
        Ok(players) => {
            debug!("Session bus reachable, {} MPRIS player(s)", players.len());
            PlatformSupport::available("linux")
        }
        Err(e) => PlatformSupport::unavailable("linux", format!("D-Bus session bus not reachable: {}", e)),
    }
}

pub struct MprisProbe {
    connection: Connection,
}

impl MprisProbe {
    pub fn new() -> Result<Self> {
        Ok(Self {
            connection: connect()?,
        })
    }
}

impl SnapshotProbe for MprisProbe {
    fn probe(&self, session_id: &str) -> Result<Option<RawSnapshot>> {
        let player = player(&self.connection, session_id)?;
        // Metadata and status are required; the rest is optional in practice.
        let status = PlayerStatus {
            playback_status: Some(player.playback_status()?),
            metadata: player.metadata()?,
            position: player.position().ok(),
            rate: player.rate().ok(),
            capabilities: read_capabilities(&player),
        };
        let raw = mpris::snapshot_from_player(&status);
        debug!(
            "MPRIS {}: state={}, title={:?}, position={:?}",
            session_id, raw.state, raw.title, raw.position
        );
        Ok(Some(raw))
    }

    fn list_session_ids(&self) -> Result<Vec<String>> {
        list_players(&self.connection)
    }

    fn application_name(&self, session_id: &str) -> Option<String> {
        let identity = MediaPlayer2ProxyBlocking::builder(&self.connection)
            .destination(session_id)
            .and_then(|builder| builder.cache_properties(CacheProperties::No).build())
            .and_then(|proxy| proxy.identity())
            .map_err(|e| debug!("No Identity for {}: {}", session_id, e))
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        Some(identity.unwrap_or_else(|| mpris::fallback_app_name(session_id)))
    }

    fn controls(&self, session_id: &str) -> Arc<dyn TransportControls> {
        Arc::new(MprisControls {
            connection: self.connection.clone(),
            bus: session_id.to_string(),
        })
    }
}

struct MprisControls {
    connection: Connection,
    bus: String,
}

impl MprisControls {
    fn call(&self, method: &str, f: impl FnOnce(&PlayerProxyBlocking<'_>) -> zbus::Result<()>) -> bool {
        let result = player(&self.connection, &self.bus)
            .and_then(|player| f(&player).map_err(anyhow::Error::from));
        match result {
            Ok(()) => {
                debug!("{} -> {}", method, self.bus);
                true
            }
            Err(e) => {
                warn!("Failed to call {} on {}: {}", method, self.bus, e);
                false
            }
        }
    }
}

impl TransportControls for MprisControls {
    fn play(&self) -> bool {
        self.call("Play", |p| p.play())
    }

    fn pause(&self) -> bool {
        self.call("Pause", |p| p.pause())
    }

    fn toggle_play_pause(&self) -> bool {
        self.call("PlayPause", |p| p.play_pause())
    }

    fn next(&self) -> bool {
        self.call("Next", |p| p.next())
    }

    fn previous(&self) -> bool {
        self.call("Previous", |p| p.previous())
    }

    fn stop(&self) -> bool {
        self.call("Stop", |p| p.stop())
    }

    fn seek(&self, position: Duration) -> bool {
        let track_id = player(&self.connection, &self.bus)
            .and_then(|player| Ok(player.metadata()?))
            .map(|metadata| mpris::track_id(&metadata));
        let track_id = match track_id {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!("Cannot seek {}: current track id unavailable", self.bus);
                return false;
            }
            Err(e) => {
                warn!("Failed to read track id from {}: {}", self.bus, e);
                return false;
            }
        };
        let path = match ObjectPath::try_from(track_id.as_str()) {
            Ok(path) => path,
            Err(e) => {
                warn!("Invalid track id {:?} from {}: {}", track_id, self.bus, e);
                return false;
            }
        };
        self.call("SetPosition", |p| p.set_position(&path, mpris::to_micros(position)))
    }

    fn capabilities(&self) -> TransportCapabilities {
        match player(&self.connection, &self.bus) {
            Ok(player) => read_capabilities(&player),
            Err(e) => {
                debug!("Failed to read capabilities from {}: {}", self.bus, e);
                TransportCapabilities::default()
            }
        }
    }
}
