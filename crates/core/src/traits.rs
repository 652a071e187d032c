use crate::models::{RawSnapshot, TransportCapabilities};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Platform backend that reads raw session state on demand.
///
/// Implementations wrap one OS facility (MPRIS, SMTC, MediaRemote, ...).
/// Calls may block briefly; the engine runs them off the async workers.
pub trait SnapshotProbe: Send + Sync {
    /// Read the current state of one session.
    ///
    /// `Ok(None)` means the session has nothing to report right now.
    fn probe(&self, session_id: &str) -> Result<Option<RawSnapshot>>;

    /// Ids of the sessions that currently exist, in any order
    fn list_session_ids(&self) -> Result<Vec<String>>;

    /// Human-readable name of the application owning a session
    fn application_name(&self, _session_id: &str) -> Option<String> {
        None
    }

    /// Transport controls for a session
    fn controls(&self, session_id: &str) -> Arc<dyn TransportControls>;
}

/// Playback commands against one session.
///
/// Every call returns `true` when the platform accepted the command.
pub trait TransportControls: Send + Sync {
    fn play(&self) -> bool;

    fn pause(&self) -> bool;

    fn toggle_play_pause(&self) -> bool;

    fn next(&self) -> bool;

    fn previous(&self) -> bool;

    fn stop(&self) -> bool;

    /// Seek to an absolute position
    fn seek(&self, position: Duration) -> bool;

    /// Controls the session currently advertises
    fn capabilities(&self) -> TransportCapabilities;
}

/// Controls that reject every command, for sessions without a control surface
#[derive(Debug, Default, Clone, Copy)]
pub struct NoControls;

impl TransportControls for NoControls {
    fn play(&self) -> bool {
        false
    }

    fn pause(&self) -> bool {
        false
    }

    fn toggle_play_pause(&self) -> bool {
        false
    }

    fn next(&self) -> bool {
        false
    }

    fn previous(&self) -> bool {
        false
    }

    fn stop(&self) -> bool {
        false
    }

    fn seek(&self, _position: Duration) -> bool {
        false
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::default()
    }
}
