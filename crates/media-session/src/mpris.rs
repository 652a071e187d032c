//! MPRIS D-Bus interfaces and property mapping.
//!
//! Turns the `org.mpris.MediaPlayer2.Player` properties into a
//! [`RawSnapshot`]. Lengths and positions are in microseconds.

use nowplaying_core::{PlaybackState, RawSnapshot, TransportCapabilities};
use std::collections::HashMap;
use std::time::Duration;
use zbus::proxy;
use zbus::zvariant::{Array, ObjectPath, OwnedValue};

pub const BUS_PREFIX: &str = "org.mpris.MediaPlayer2.";

pub type Metadata = HashMap<String, OwnedValue>;

#[proxy(interface = "org.mpris.MediaPlayer2", default_path = "/org/mpris/MediaPlayer2")]
pub trait MediaPlayer2 {
    #[zbus(property)]
    fn identity(&self) -> zbus::Result<String>;
}

#[proxy(
    interface = "org.mpris.MediaPlayer2.Player",
    default_path = "/org/mpris/MediaPlayer2"
)]
pub trait Player {
    fn play(&self) -> zbus::Result<()>;

    fn pause(&self) -> zbus::Result<()>;

    fn play_pause(&self) -> zbus::Result<()>;

    fn next(&self) -> zbus::Result<()>;

    fn previous(&self) -> zbus::Result<()>;

    fn stop(&self) -> zbus::Result<()>;

    fn set_position(&self, track_id: &ObjectPath<'_>, position: i64) -> zbus::Result<()>;

    #[zbus(property)]
    fn playback_status(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn metadata(&self) -> zbus::Result<Metadata>;

    #[zbus(property)]
    fn position(&self) -> zbus::Result<i64>;

    #[zbus(property)]
    fn rate(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn can_play(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn can_pause(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn can_go_next(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn can_go_previous(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn can_seek(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn can_control(&self) -> zbus::Result<bool>;
}

/// Player properties read in one probe
#[derive(Debug, Default)]
pub struct PlayerStatus {
    pub playback_status: Option<String>,
    pub metadata: Metadata,
    pub position: Option<i64>,
    pub rate: Option<f64>,
    pub capabilities: TransportCapabilities,
}

pub fn is_player_bus(name: &str) -> bool {
    name.len() > BUS_PREFIX.len() && name.starts_with(BUS_PREFIX)
}

/// Application name derived from the bus name, for players without `Identity`.
///
/// `org.mpris.MediaPlayer2.spotify.instance42` becomes `Spotify`.
pub fn fallback_app_name(bus: &str) -> String {
    let player = bus
        .strip_prefix(BUS_PREFIX)
        .and_then(|rest| rest.split('.').next())
        .filter(|segment| !segment.is_empty())
        .unwrap_or(bus);
    let mut chars = player.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn snapshot_from_player(status: &PlayerStatus) -> RawSnapshot {
    let mut raw = snapshot_from_metadata(&status.metadata);
    raw.state = status
        .playback_status
        .as_deref()
        .map(PlaybackState::from_status)
        .unwrap_or_default();
    raw.rate = status.rate;
    raw.position = status.position.and_then(from_micros);
    raw.capabilities = status.capabilities;
    raw
}

fn snapshot_from_metadata(metadata: &Metadata) -> RawSnapshot {
    let duration = micros(metadata, "mpris:length")
        .or_else(|| micros(metadata, "xesam:length"))
        .and_then(from_micros);

    let mut extra = HashMap::new();
    if let Some(genre) = text(metadata, "xesam:genre") {
        extra.insert("genre".to_string(), genre);
    }
    if let Some(url) = text(metadata, "xesam:url") {
        extra.insert("url".to_string(), url);
    }
    if let Some(track) = metadata
        .get("xesam:trackNumber")
        .and_then(|v| v.downcast_ref::<i32>().ok())
    {
        extra.insert("trackNumber".to_string(), track.to_string());
    }

    RawSnapshot {
        title: text(metadata, "xesam:title"),
        artist: text(metadata, "xesam:artist").or_else(|| text(metadata, "xesam:albumArtist")),
        album: text(metadata, "xesam:album"),
        artwork: text(metadata, "mpris:artUrl"),
        duration,
        live_stream: duration.is_some_and(|d| d.is_zero()),
        metadata: extra,
        ..Default::default()
    }
}

/// Object path of the current track, needed by `SetPosition`
pub fn track_id(metadata: &Metadata) -> Option<String> {
    let value = metadata.get("mpris:trackid")?;
    value
        .downcast_ref::<ObjectPath>()
        .map(|path| path.to_string())
        .or_else(|_| value.downcast_ref::<&str>().map(str::to_string))
        .ok()
}

/// Strings (or string arrays) joined with ", ", blank values dropped
fn text(metadata: &Metadata, key: &str) -> Option<String> {
    let value = metadata.get(key)?;
    let parts = match value.downcast_ref::<&str>() {
        Ok(s) => vec![s.to_string()],
        Err(_) => value
            .downcast_ref::<Array>()
            .ok()
            .and_then(|array| Vec::<String>::try_from(array).ok())?,
    };
    let parts: Vec<String> = parts
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(", "))
}

/// Players disagree on the integer type of lengths
fn micros(metadata: &Metadata, key: &str) -> Option<i64> {
    let value = metadata.get(key)?;
    if let Ok(v) = value.downcast_ref::<i64>() {
        Some(v)
    } else if let Ok(v) = value.downcast_ref::<u64>() {
        Some(i64::try_from(v).unwrap_or(i64::MAX))
    } else if let Ok(v) = value.downcast_ref::<i32>() {
        Some(i64::from(v))
    } else {
        value.downcast_ref::<u32>().ok().map(i64::from)
    }
}

fn from_micros(micros: i64) -> Option<Duration> {
    u64::try_from(micros).ok().map(Duration::from_micros)
}

pub fn to_micros(position: Duration) -> i64 {
    i64::try_from(position.as_micros()).unwrap_or(i64::MAX)
}
