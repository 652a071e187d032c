//! Human-readable session lines.

use nowplaying_core::{NowPlaying, SessionSnapshot};
use std::time::Duration;

/// `m:ss`, or `h:mm:ss` past the hour
pub fn clock(value: Duration) -> String {
    let total = value.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total / 60) % 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

pub fn track(now_playing: &NowPlaying) -> String {
    let title = now_playing.title.as_deref().unwrap_or("(untitled)");
    match now_playing.artist.as_deref() {
        Some(artist) => format!("{} - {}", artist, title),
        None => title.to_string(),
    }
}

pub fn progress(now_playing: &NowPlaying) -> String {
    if now_playing.live_stream {
        return "live".to_string();
    }
    let position = now_playing.position.map(clock).unwrap_or_else(|| "-".to_string());
    match now_playing.duration {
        Some(duration) => format!("{}/{}", position, clock(duration)),
        None => position,
    }
}

pub fn session_line(snapshot: &SessionSnapshot) -> String {
    let marker = if snapshot.active { '*' } else { ' ' };
    let media = match &snapshot.now_playing {
        Some(now_playing) => format!("{} [{}]", track(now_playing), progress(now_playing)),
        None => "(nothing)".to_string(),
    };
    format!(
        "{} {:<16} {:<8} {}  ({})",
        marker,
        snapshot.application_name,
        snapshot.state.as_str(),
        media,
        snapshot.id
    )
}
