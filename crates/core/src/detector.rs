//! Change detection between consecutive session observations.
//!
//! Position is compared at millisecond precision while playing and at
//! whole-second precision otherwise, so a paused value re-reported with float
//! noise does not produce events.

use crate::models::{NowPlaying, PlaybackState};

/// Whether a session counts as active for the given state and metadata
pub fn is_active(state: PlaybackState, now_playing: Option<&NowPlaying>) -> bool {
    match state {
        PlaybackState::Playing => true,
        PlaybackState::Unknown => now_playing.is_some_and(NowPlaying::has_title),
        PlaybackState::Paused | PlaybackState::Stopped => false,
    }
}

pub fn state_changed(prev: PlaybackState, curr: PlaybackState) -> bool {
    prev != curr
}

pub fn active_changed(prev: bool, curr: bool) -> bool {
    prev != curr
}

/// Whether the now-playing value changed enough to notify listeners.
///
/// `state` is the current playback state and selects the position granularity.
pub fn now_playing_changed(
    prev: Option<&NowPlaying>,
    curr: Option<&NowPlaying>,
    state: PlaybackState,
) -> bool {
    match (prev, curr) {
        (None, None) => false,
        (Some(_), None) | (None, Some(_)) => true,
        (Some(a), Some(b)) => !same_media(a, b) || !same_position(a, b, state),
    }
}

fn same_media(a: &NowPlaying, b: &NowPlaying) -> bool {
    a.title == b.title
        && a.artist == b.artist
        && a.album == b.album
        && a.artwork == b.artwork
        && a.duration == b.duration
        && a.live_stream == b.live_stream
        && same_stable_metadata(a, b)
}

fn same_stable_metadata(a: &NowPlaying, b: &NowPlaying) -> bool {
    let a_count = a.stable_metadata().count();
    let b_count = b.stable_metadata().count();
    a_count == b_count && a.stable_metadata().all(|(key, value)| b.metadata.get(key) == Some(value))
}

fn same_position(a: &NowPlaying, b: &NowPlaying, state: PlaybackState) -> bool {
    match (a.position, b.position) {
        (None, None) => true,
        (Some(pa), Some(pb)) if state.is_playing() => pa.as_millis() == pb.as_millis(),
        (Some(pa), Some(pb)) => pa.as_secs() == pb.as_secs(),
        _ => false,
    }
}

/// Which facets changed between two observations, in dispatch order
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Changes {
    pub state: bool,
    pub active: bool,
    pub now_playing: bool,
}

impl Changes {
    pub fn any(&self) -> bool {
        self.state || self.active || self.now_playing
    }
}

/// What the detector saw on one tick
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub state: PlaybackState,
    pub active: bool,
    pub now_playing: Option<NowPlaying>,
}

impl Observation {
    /// The observation used when a session reports nothing
    pub fn idle() -> Self {
        Self {
            state: PlaybackState::Unknown,
            active: false,
            now_playing: None,
        }
    }

    /// Compare against the previous observation
    pub fn diff(&self, prev: &Observation) -> Changes {
        Changes {
            state: state_changed(prev.state, self.state),
            active: active_changed(prev.active, self.active),
            now_playing: now_playing_changed(
                prev.now_playing.as_ref(),
                self.now_playing.as_ref(),
                self.state,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::time::Duration;

    fn track(position_ms: Option<u64>) -> NowPlaying {
        NowPlaying {
            title: Some("Money".to_string()),
            artist: Some("Pink Floyd".to_string()),
            album: Some("The Dark Side of the Moon".to_string()),
            artwork: None,
            duration: Some(Duration::from_millis(382_000)),
            position: position_ms.map(Duration::from_millis),
            live_stream: false,
            metadata: HashMap::new(),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_is_active() {
        let titled = track(None);
        let untitled = NowPlaying {
            title: Some("  ".to_string()),
            ..track(None)
        };
        assert!(is_active(PlaybackState::Playing, None));
        assert!(!is_active(PlaybackState::Paused, Some(&titled)));
        assert!(!is_active(PlaybackState::Stopped, Some(&titled)));
        assert!(is_active(PlaybackState::Unknown, Some(&titled)));
        assert!(!is_active(PlaybackState::Unknown, Some(&untitled)));
        assert!(!is_active(PlaybackState::Unknown, None));
    }

    #[test]
    fn test_none_transitions() {
        let some = track(Some(1_000));
        assert!(!now_playing_changed(None, None, PlaybackState::Playing));
        assert!(now_playing_changed(Some(&some), None, PlaybackState::Unknown));
        assert!(now_playing_changed(None, Some(&some), PlaybackState::Paused));
    }

    #[test]
    fn test_sub_second_delta_ignored_while_paused() {
        let a = track(Some(30_100));
        let b = track(Some(30_900));
        assert!(!now_playing_changed(Some(&a), Some(&b), PlaybackState::Paused));
        assert!(!now_playing_changed(Some(&a), Some(&b), PlaybackState::Stopped));
        assert!(now_playing_changed(Some(&a), Some(&b), PlaybackState::Playing));
    }

    #[test]
    fn test_second_boundary_detected_while_paused() {
        let a = track(Some(30_900));
        let b = track(Some(31_000));
        assert!(now_playing_changed(Some(&a), Some(&b), PlaybackState::Paused));
    }

    #[test]
    fn test_position_presence_change() {
        let a = track(Some(0));
        let b = track(None);
        assert!(now_playing_changed(Some(&a), Some(&b), PlaybackState::Paused));
    }

    #[test]
    fn test_identity_fields_compared() {
        let a = track(Some(1_000));
        let retitled = NowPlaying {
            title: Some("Time".to_string()),
            ..a.clone()
        };
        let new_art = NowPlaying {
            artwork: Some("https://example.invalid/cover.jpg".to_string()),
            ..a.clone()
        };
        assert!(now_playing_changed(Some(&a), Some(&retitled), PlaybackState::Paused));
        assert!(now_playing_changed(Some(&a), Some(&new_art), PlaybackState::Paused));
    }

    #[test]
    fn test_volatile_metadata_ignored() {
        let mut a = track(Some(5_000));
        a.metadata.insert("genre".to_string(), "Rock".to_string());
        a.metadata.insert("playbackRate".to_string(), "1".to_string());

        let mut b = a.clone();
        b.metadata.insert("playbackRate".to_string(), "0.99".to_string());
        b.metadata.insert("timelineTicks".to_string(), "123".to_string());
        b.last_updated = Utc::now() + chrono::Duration::seconds(1);
        assert!(!now_playing_changed(Some(&a), Some(&b), PlaybackState::Playing));

        b.metadata.insert("genre".to_string(), "Jazz".to_string());
        assert!(now_playing_changed(Some(&a), Some(&b), PlaybackState::Playing));
    }

    #[test]
    fn test_observation_diff() {
        let prev = Observation {
            state: PlaybackState::Playing,
            active: true,
            now_playing: Some(track(Some(10_000))),
        };
        let curr = Observation {
            state: PlaybackState::Paused,
            active: false,
            now_playing: Some(track(Some(10_000))),
        };
        assert_eq!(
            curr.diff(&prev),
            Changes {
                state: true,
                active: true,
                now_playing: false,
            }
        );
        assert!(!prev.diff(&prev).any());
        assert!(Observation::idle().diff(&prev).now_playing);
    }
}
