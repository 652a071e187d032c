use crate::control::{ControlExecutor, TransportCommand};
use crate::hub::{ListenerHub, ListenerId};
use crate::listener::SessionListener;
use crate::models::{NowPlaying, PlaybackState, TransportCapabilities};
use crate::traits::TransportControls;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Everything known about a session after its latest tick
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub application_name: String,
    pub state: PlaybackState,
    pub active: bool,
    pub now_playing: Option<NowPlaying>,
    pub capabilities: TransportCapabilities,
    /// Consecutive probe errors; reset by the next successful probe
    pub probe_failures: u32,
}

impl SessionSnapshot {
    pub(crate) fn empty(id: &str, application_name: &str) -> Self {
        Self {
            id: id.to_string(),
            application_name: application_name.to_string(),
            state: PlaybackState::Unknown,
            active: false,
            now_playing: None,
            capabilities: TransportCapabilities::default(),
            probe_failures: 0,
        }
    }
}

struct SessionShared {
    id: String,
    controls: Arc<dyn TransportControls>,
    executor: Arc<ControlExecutor>,
    snapshot: RwLock<Arc<SessionSnapshot>>,
    listeners: ListenerHub<dyn SessionListener>,
    closed: AtomicBool,
}

/// Cheap, clonable reference to one media session.
///
/// Reads return the state published by the session's last completed tick.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: String,
        application_name: String,
        controls: Arc<dyn TransportControls>,
        executor: Arc<ControlExecutor>,
    ) -> Self {
        let snapshot = SessionSnapshot::empty(&id, &application_name);
        Self {
            shared: Arc::new(SessionShared {
                id,
                controls,
                executor,
                snapshot: RwLock::new(Arc::new(snapshot)),
                listeners: ListenerHub::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn application_name(&self) -> String {
        self.snapshot().application_name.clone()
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        self.snapshot().now_playing.clone()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.snapshot().state
    }

    pub fn is_active(&self) -> bool {
        self.snapshot().active
    }

    pub fn capabilities(&self) -> TransportCapabilities {
        self.snapshot().capabilities
    }

    /// The complete cached state, consistent with a single tick
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.shared
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Direct access to the platform controls (calls block)
    pub fn controls(&self) -> Arc<dyn TransportControls> {
        self.shared.controls.clone()
    }

    /// Run a command on the control thread; `false` if it was rejected or failed
    pub async fn send(&self, command: TransportCommand) -> bool {
        if self.is_closed() {
            return false;
        }
        self.shared
            .executor
            .send(self.shared.controls.clone(), command)
            .await
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) -> ListenerId {
        self.shared.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    /// True once the session has been dropped from the registry
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Build the next snapshot from the current one and publish it in one swap
    pub(crate) fn publish(&self, next: impl FnOnce(&SessionSnapshot) -> SessionSnapshot) {
        let current = self.snapshot();
        let updated = Arc::new(next(&current));
        *self
            .shared
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = updated;
    }

    pub(crate) fn listeners(&self) -> &ListenerHub<dyn SessionListener> {
        &self.shared.listeners
    }

    /// Mark closed and drop listeners; returns `false` if already closed
    pub(crate) fn close(&self) -> bool {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shared.listeners.clear();
        true
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for SessionHandle {}
