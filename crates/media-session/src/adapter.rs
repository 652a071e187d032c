//! Output mapping for the macOS MediaRemote adapter.
//!
//! `get --now` prints one JSON object (or `null` when nothing is playing).
//! Times are in seconds.

use anyhow::Result;
use nowplaying_core::{PlaybackState, RawSnapshot, TransportCapabilities};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterPayload {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub artwork_data: Option<String>,
    pub artwork_mime_type: Option<String>,
    pub bundle_identifier: Option<String>,
    pub duration: Option<f64>,
    pub elapsed_time_now: Option<f64>,
    pub elapsed_time: Option<f64>,
    pub playing: Option<bool>,
    pub playback_rate: Option<f64>,
}

pub fn parse_payload(output: &str) -> Result<Option<AdapterPayload>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(serde_json::from_str::<Option<AdapterPayload>>(trimmed)?)
}

/// Map one payload. `previous` is the last snapshot of the session; its
/// duration is reused when the adapter omits it for the same track.
pub fn snapshot_from_payload(payload: &AdapterPayload, previous: Option<&RawSnapshot>) -> RawSnapshot {
    let title = non_blank(payload.title.as_deref());
    let artist = non_blank(payload.artist.as_deref());
    let album = non_blank(payload.album.as_deref());

    let duration = seconds(payload.duration).or_else(|| {
        previous
            .filter(|prev| prev.title == title && prev.artist == artist && prev.album == album)
            .and_then(|prev| prev.duration)
    });

    let state = match payload.playing {
        Some(true) => PlaybackState::Playing,
        Some(false) => PlaybackState::Paused,
        None => PlaybackState::Unknown,
    };

    RawSnapshot {
        title,
        artist,
        album,
        artwork: data_uri(
            payload.artwork_data.as_deref(),
            payload.artwork_mime_type.as_deref(),
        ),
        duration,
        position: seconds(payload.elapsed_time_now).or_else(|| seconds(payload.elapsed_time)),
        state,
        rate: payload.playback_rate,
        capabilities: TransportCapabilities::all(),
        live_stream: duration.is_some_and(|d| d.is_zero()),
        application: non_blank(payload.bundle_identifier.as_deref()),
        ..Default::default()
    }
}

/// Seek target in microseconds, clamped to the track length when one is known
pub fn clamp_seek_micros(target: Duration, duration: Option<Duration>) -> u64 {
    let requested = u64::try_from(target.as_micros()).unwrap_or(u64::MAX);
    match duration {
        Some(d) if !d.is_zero() => requested.min(u64::try_from(d.as_micros()).unwrap_or(u64::MAX)),
        _ => requested,
    }
}

fn seconds(value: Option<f64>) -> Option<Duration> {
    value
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(Duration::from_secs_f64)
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn data_uri(data: Option<&str>, mime: Option<&str>) -> Option<String> {
    let data = data.map(str::trim).filter(|d| !d.is_empty())?;
    let mime = mime.map(str::trim).filter(|m| !m.is_empty()).unwrap_or("image/jpeg");
    Some(format!("data:{};base64,{}", mime, data))
}
