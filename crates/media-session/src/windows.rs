//! Windows media sessions via System Media Transport Controls (SMTC)
//!
//! Every SMTC session (Spotify, browsers, media players) is one session, keyed
//! by its `SourceAppUserModelId`.
//!
//! Requires Windows 10 version 1803 or later.

use crate::PlatformSupport;
use anyhow::{anyhow, Result};
use nowplaying_core::{PlaybackState, RawSnapshot, SnapshotProbe, TransportCapabilities, TransportControls};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use windows::{
    Foundation::{AsyncStatus, IAsyncOperation, TimeSpan},
    Media::Control::{
        GlobalSystemMediaTransportControlsSession, GlobalSystemMediaTransportControlsSessionManager,
        GlobalSystemMediaTransportControlsSessionPlaybackStatus,
    },
};

/// Request the session manager (blocking call)
fn request_manager() -> Result<GlobalSystemMediaTransportControlsSessionManager> {
    let operation = GlobalSystemMediaTransportControlsSessionManager::RequestAsync()
        .map_err(|e| anyhow!("Failed to create RequestAsync operation: {}", e))?;
    block_on_async_operation(operation)
}

/// Block on an async Windows operation
fn block_on_async_operation<T>(operation: IAsyncOperation<T>) -> Result<T>
where
    T: windows::core::RuntimeType + Clone,
{
    use std::time::Instant;

    let timeout = Duration::from_secs(2);
    let start = Instant::now();

    loop {
        let status = operation
            .Status()
            .map_err(|e| anyhow!("Failed to get operation status: {}", e))?;
        match status {
            AsyncStatus::Completed => {
                return operation
                    .GetResults()
                    .map_err(|e| anyhow!("Failed to get operation results: {}", e));
            }
            AsyncStatus::Error => return Err(anyhow!("Async operation failed with error")),
            AsyncStatus::Canceled => return Err(anyhow!("Async operation was canceled")),
            AsyncStatus::Started => {
                if start.elapsed() > timeout {
                    return Err(anyhow!("Async operation timed out"));
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            _ => return Err(anyhow!("Unknown async status")),
        }
    }
}

pub(crate) fn support() -> PlatformSupport {
    match request_manager() {
        Ok(_) => PlatformSupport::available("windows"),
        Err(e) => PlatformSupport::unavailable("windows", format!("SMTC manager unavailable: {}", e)),
    }
}

fn find_session(
    manager: &GlobalSystemMediaTransportControlsSessionManager,
    id: &str,
) -> Result<Option<GlobalSystemMediaTransportControlsSession>> {
    let sessions = manager.GetSessions()?;
    for index in 0..sessions.Size()? {
        let session = sessions.GetAt(index)?;
        if session.SourceAppUserModelId()?.to_string() == id {
            return Ok(Some(session));
        }
    }
    Ok(None)
}

/// `TimeSpan` is in 100ns ticks
fn from_ticks(span: TimeSpan) -> Option<Duration> {
    u64::try_from(span.Duration)
        .ok()
        .map(|ticks| Duration::from_nanos(ticks.saturating_mul(100)))
}

fn to_ticks(position: Duration) -> i64 {
    i64::try_from(position.as_nanos() / 100).unwrap_or(i64::MAX)
}

fn non_blank(value: windows::core::Result<windows::core::HSTRING>) -> Option<String> {
    value
        .ok()
        .map(|s| s.to_string().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn map_status(status: GlobalSystemMediaTransportControlsSessionPlaybackStatus) -> PlaybackState {
    match status {
        GlobalSystemMediaTransportControlsSessionPlaybackStatus::Playing => PlaybackState::Playing,
        GlobalSystemMediaTransportControlsSessionPlaybackStatus::Paused => PlaybackState::Paused,
        GlobalSystemMediaTransportControlsSessionPlaybackStatus::Stopped => PlaybackState::Stopped,
        _ => PlaybackState::Unknown,
    }
}

fn read_capabilities(session: &GlobalSystemMediaTransportControlsSession) -> Result<TransportCapabilities> {
    let controls = session.GetPlaybackInfo()?.Controls()?;
    Ok(TransportCapabilities {
        can_play: controls.IsPlayEnabled()?,
        can_pause: controls.IsPauseEnabled()?,
        can_next: controls.IsNextEnabled()?,
        can_previous: controls.IsPreviousEnabled()?,
        can_stop: controls.IsStopEnabled()?,
        can_seek: controls.IsPlaybackPositionEnabled()?,
    })
}

fn read_session(session: &GlobalSystemMediaTransportControlsSession) -> Result<RawSnapshot> {
    let operation = session
        .TryGetMediaPropertiesAsync()
        .map_err(|e| anyhow!("Failed to get media properties: {}", e))?;
    let props = block_on_async_operation(operation)?;

    let mut metadata = HashMap::new();
    if let Ok(genres) = props.Genres() {
        let genres: Vec<String> = (&genres).into_iter().map(|g| g.to_string()).collect();
        if !genres.is_empty() {
            metadata.insert("genre".to_string(), genres.join(", "));
        }
    }
    if let Ok(track) = props.TrackNumber() {
        if track > 0 {
            metadata.insert("trackNumber".to_string(), track.to_string());
        }
    }

    let timeline = session.GetTimelineProperties()?;
    let start = from_ticks(timeline.StartTime()?).unwrap_or_default();
    let duration = from_ticks(timeline.EndTime()?)
        .map(|end| end.saturating_sub(start))
        .filter(|d| !d.is_zero());
    let position = from_ticks(timeline.Position()?).map(|p| p.saturating_sub(start));

    let info = session.GetPlaybackInfo()?;
    let state = map_status(info.PlaybackStatus()?);
    let rate = info.PlaybackRate().ok().and_then(|r| r.Value().ok());

    let raw = RawSnapshot {
        title: non_blank(props.Title()),
        artist: non_blank(props.Artist()).or_else(|| non_blank(props.AlbumArtist())),
        album: non_blank(props.AlbumTitle()),
        artwork: None,
        duration,
        position,
        state,
        rate,
        capabilities: read_capabilities(session).unwrap_or_default(),
        live_stream: false,
        metadata,
        application: None,
    };
    debug!(
        "SMTC metadata: title={:?}, artist={:?}, album={:?}, state={}",
        raw.title, raw.artist, raw.album, raw.state
    );
    Ok(raw)
}

/// `Spotify.exe` and `SpotifyAB.SpotifyMusic_zpdnekdrzrea0!Spotify` both become `Spotify`
fn friendly_app_name(aumid: &str) -> String {
    let name = aumid.rsplit('!').next().unwrap_or(aumid);
    let name = if name.to_lowercase().ends_with(".exe") {
        &name[..name.len() - 4]
    } else {
        name
    };
    name.to_string()
}

pub struct SmtcProbe {
    manager: GlobalSystemMediaTransportControlsSessionManager,
}

impl SmtcProbe {
    pub fn new() -> Result<Self> {
        Ok(Self {
            manager: request_manager()?,
        })
    }
}

impl SnapshotProbe for SmtcProbe {
    fn probe(&self, session_id: &str) -> Result<Option<RawSnapshot>> {
        match find_session(&self.manager, session_id)? {
            Some(session) => read_session(&session).map(Some),
            None => Ok(None),
        }
    }

    fn list_session_ids(&self) -> Result<Vec<String>> {
        let sessions = self.manager.GetSessions()?;
        let mut ids = Vec::new();
        for index in 0..sessions.Size()? {
            ids.push(sessions.GetAt(index)?.SourceAppUserModelId()?.to_string());
        }
        Ok(ids)
    }

    fn application_name(&self, session_id: &str) -> Option<String> {
        Some(friendly_app_name(session_id))
    }

    fn controls(&self, session_id: &str) -> Arc<dyn TransportControls> {
        Arc::new(SmtcControls {
            manager: self.manager.clone(),
            id: session_id.to_string(),
        })
    }
}

struct SmtcControls {
    manager: GlobalSystemMediaTransportControlsSessionManager,
    id: String,
}

impl SmtcControls {
    fn run(
        &self,
        name: &str,
        operation: impl FnOnce(&GlobalSystemMediaTransportControlsSession) -> windows::core::Result<IAsyncOperation<bool>>,
    ) -> bool {
        let result = find_session(&self.manager, &self.id).and_then(|session| {
            let session = session.ok_or_else(|| anyhow!("session is gone"))?;
            block_on_async_operation(operation(&session)?)
        });
        match result {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to {} {}: {}", name, self.id, e);
                false
            }
        }
    }
}

impl TransportControls for SmtcControls {
    fn play(&self) -> bool {
        self.run("play", |s| s.TryPlayAsync())
    }

    fn pause(&self) -> bool {
        self.run("pause", |s| s.TryPauseAsync())
    }

    fn toggle_play_pause(&self) -> bool {
        self.run("toggle", |s| s.TryTogglePlayPauseAsync())
    }

    fn next(&self) -> bool {
        self.run("skip next on", |s| s.TrySkipNextAsync())
    }

    fn previous(&self) -> bool {
        self.run("skip previous on", |s| s.TrySkipPreviousAsync())
    }

    fn stop(&self) -> bool {
        self.run("stop", |s| s.TryStopAsync())
    }

    fn seek(&self, position: Duration) -> bool {
        let ticks = to_ticks(position);
        self.run("seek", move |s| s.TryChangePlaybackPositionAsync(ticks))
    }

    fn capabilities(&self) -> TransportCapabilities {
        match find_session(&self.manager, &self.id) {
            Ok(Some(session)) => read_capabilities(&session).unwrap_or_default(),
            _ => TransportCapabilities::default(),
        }
    }
}
