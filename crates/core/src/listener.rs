use crate::models::{NowPlaying, PlaybackState};
use crate::session::SessionHandle;

/// Per-session change callbacks.
///
/// Called from the session's ticker task, in the order state, active,
/// now-playing. Implementations should return quickly; a slow listener delays
/// the next tick of that session only.
pub trait SessionListener: Send + Sync {
    /// `None` means the session stopped reporting media
    fn on_now_playing_changed(&self, _session: &SessionHandle, _now_playing: Option<&NowPlaying>) {}

    fn on_playback_state_changed(&self, _session: &SessionHandle, _state: PlaybackState) {}

    fn on_session_active_changed(&self, _session: &SessionHandle, _active: bool) {}
}

/// Session lifecycle callbacks, fired by the registry after each scan
pub trait RegistryListener: Send + Sync {
    /// The session is already warm and reachable through the registry
    fn on_session_added(&self, _session: &SessionHandle) {}

    fn on_session_removed(&self, _session_id: &str) {}
}
