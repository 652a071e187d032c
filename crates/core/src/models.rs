use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Metadata keys that churn on every probe without describing the media itself.
///
/// They are carried in [`NowPlaying::metadata`] but ignored by change detection.
pub const VOLATILE_METADATA_KEYS: &[&str] = &[
    "rate",
    "playbackRate",
    "playbackStatus",
    "timelinePosition",
    "timelineTicks",
    "timelineUpdated",
];

/// Playback state reported by a session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
    /// The backend cannot report state; activity is inferred from metadata.
    #[default]
    Unknown,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Unknown => "unknown",
        }
    }

    /// Map a backend status string ("Playing", "Paused", "Stopped") to a state.
    ///
    /// Anything unrecognized becomes `Unknown` rather than an error, since
    /// backends are free to report statuses we have never seen.
    pub fn from_status(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "playing" => PlaybackState::Playing,
            "paused" => PlaybackState::Paused,
            "stopped" => PlaybackState::Stopped,
            _ => PlaybackState::Unknown,
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport controls advertised by a session.
///
/// These are hints: control calls are attempted regardless of the flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TransportCapabilities {
    pub can_play: bool,
    pub can_pause: bool,
    pub can_next: bool,
    pub can_previous: bool,
    pub can_stop: bool,
    pub can_seek: bool,
}

impl TransportCapabilities {
    /// Every control advertised
    pub fn all() -> Self {
        Self {
            can_play: true,
            can_pause: true,
            can_next: true,
            can_previous: true,
            can_stop: true,
            can_seek: true,
        }
    }
}

/// One raw reading from a platform backend, before any smoothing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawSnapshot {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// URL, file path or data URI of the artwork
    pub artwork: Option<String>,
    pub duration: Option<Duration>,
    /// Position as reported by the backend (may be coarse or stale)
    pub position: Option<Duration>,
    pub state: PlaybackState,
    /// Playback rate; `None` is treated as 1.0
    pub rate: Option<f64>,
    pub capabilities: TransportCapabilities,
    pub live_stream: bool,
    pub metadata: HashMap<String, String>,
    /// Owning application, when the backend reports it per snapshot
    pub application: Option<String>,
}

impl RawSnapshot {
    /// Whether the snapshot describes any media at all
    pub fn has_media(&self) -> bool {
        self.title.is_some()
            || self.artist.is_some()
            || self.album.is_some()
            || self.artwork.is_some()
            || self.duration.is_some()
    }

    /// Composite identity used to detect track changes.
    ///
    /// Duration is part of the key because ad breaks commonly reuse the
    /// title and artist of the surrounding track.
    pub fn track_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.title.as_deref().unwrap_or(""),
            self.artist.as_deref().unwrap_or(""),
            self.album.as_deref().unwrap_or(""),
            self.duration
                .map(|d| d.as_millis() as i128)
                .unwrap_or(-1)
        )
    }

    /// Effective playback rate (missing rate means normal speed)
    pub fn effective_rate(&self) -> f64 {
        self.rate.unwrap_or(1.0)
    }
}

/// What a session is currently playing, with a smoothed position.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NowPlaying {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub artwork: Option<String>,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Option<Duration>,
    #[serde(serialize_with = "serialize_millis")]
    pub position: Option<Duration>,
    pub live_stream: bool,
    pub metadata: HashMap<String, String>,
    pub last_updated: DateTime<Utc>,
}

impl NowPlaying {
    /// Build from a raw snapshot, substituting the projected position
    pub fn from_raw(raw: &RawSnapshot, position: Option<Duration>, last_updated: DateTime<Utc>) -> Self {
        Self {
            title: raw.title.clone(),
            artist: raw.artist.clone(),
            album: raw.album.clone(),
            artwork: raw.artwork.clone(),
            duration: raw.duration,
            position,
            live_stream: raw.live_stream,
            metadata: raw.metadata.clone(),
            last_updated,
        }
    }

    /// Copy of this value with a new position and timestamp
    pub fn with_position(&self, position: Option<Duration>, last_updated: DateTime<Utc>) -> Self {
        Self {
            position,
            last_updated,
            ..self.clone()
        }
    }

    /// True when the title is present and not blank
    pub fn has_title(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    /// Metadata without the keys listed in [`VOLATILE_METADATA_KEYS`]
    pub fn stable_metadata(&self) -> impl Iterator<Item = (&String, &String)> {
        self.metadata
            .iter()
            .filter(|(key, _)| !VOLATILE_METADATA_KEYS.contains(&key.as_str()))
    }
}

fn serialize_millis<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}
