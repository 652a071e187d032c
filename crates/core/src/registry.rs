//! Session set reconciliation and lookups.

use crate::config::MediaOptions;
use crate::control::ControlExecutor;
use crate::error::{MediaError, Result};
use crate::hub::{ListenerHub, ListenerId};
use crate::listener::RegistryListener;
use crate::models::PlaybackState;
use crate::session::SessionHandle;
use crate::ticker::SessionTicker;
use crate::traits::SnapshotProbe;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};

struct RegistryInner {
    probe: Arc<dyn SnapshotProbe>,
    options: MediaOptions,
    runtime: Handle,
    executor: Arc<ControlExecutor>,
    sessions: RwLock<HashMap<String, SessionTicker>>,
    listeners: ListenerHub<dyn RegistryListener>,
    /// Serializes reconciliation passes
    scan: Mutex<()>,
    closed: AtomicBool,
}

impl RegistryInner {
    /// One scan: start tickers for new ids, close tickers for vanished ones
    fn reconcile(&self) {
        let _scan = self.scan.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return;
        }

        let listed = match self.probe.list_session_ids() {
            Ok(ids) => ids,
            Err(err) => {
                warn!("Failed to list media sessions: {:#}", err);
                return;
            }
        };
        let mut seen = HashSet::new();
        let wanted: Vec<String> = listed
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();

        let vanished: Vec<SessionTicker> = {
            let mut sessions = self.write_sessions();
            let gone: Vec<String> = sessions
                .keys()
                .filter(|id| !seen.contains(*id))
                .cloned()
                .collect();
            gone.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for ticker in vanished {
            let id = ticker.session().id().to_string();
            ticker.close();
            info!("Media session removed: {}", id);
            if self.options.event_driven_enabled() {
                self.listeners.dispatch(|l| l.on_session_removed(&id));
            }
        }

        let new_ids: Vec<String> = {
            let sessions = self.read_sessions();
            wanted
                .into_iter()
                .filter(|id| !sessions.contains_key(id))
                .collect()
        };
        for id in new_ids {
            // Warm outside the map lock so readers are never blocked on a probe.
            let ticker = SessionTicker::start(
                id.clone(),
                self.probe.clone(),
                &self.options,
                self.executor.clone(),
                &self.runtime,
            );
            let session = ticker.session().clone();
            {
                // `close` sets the flag before draining, so checking it under
                // the map lock keeps late tickers out of a closed registry.
                let mut sessions = self.write_sessions();
                if self.is_closed() {
                    drop(sessions);
                    ticker.close();
                    return;
                }
                sessions.insert(id.clone(), ticker);
            }
            info!(
                "Media session added: {} ({})",
                id,
                session.application_name()
            );
            if self.options.event_driven_enabled() {
                self.listeners.dispatch(|l| l.on_session_added(&session));
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn read_sessions(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SessionTicker>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_sessions(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SessionTicker>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handles ordered by session id
    fn sorted_sessions(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<SessionHandle> = self
            .read_sessions()
            .values()
            .map(|ticker| ticker.session().clone())
            .collect();
        handles.sort_by(|a, b| a.id().cmp(b.id()));
        handles
    }
}

/// The set of media sessions visible through one [`SnapshotProbe`].
///
/// The registry re-lists sessions every `session_poll_interval`, keeps one
/// ticker per session and answers lookups from the tickers' caches.
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRegistry {
    /// Scan once, then keep scanning in the background.
    ///
    /// Must be called inside a tokio runtime. The first scan (including each
    /// session's warm probe) runs on the calling thread; on a multi-threaded
    /// runtime that thread hands its other tasks off while it blocks.
    pub fn start(probe: Arc<dyn SnapshotProbe>, options: MediaOptions) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| MediaError::NoRuntime)?;
        let executor = Arc::new(ControlExecutor::spawn().map_err(MediaError::ControlThread)?);
        let poll_interval = options.session_poll_interval();

        let inner = Arc::new(RegistryInner {
            probe,
            options,
            runtime: runtime.clone(),
            executor,
            sessions: RwLock::new(HashMap::new()),
            listeners: ListenerHub::new(),
            scan: Mutex::new(()),
            closed: AtomicBool::new(false),
        });
        if runtime.runtime_flavor() == RuntimeFlavor::MultiThread {
            tokio::task::block_in_place(|| inner.reconcile());
        } else {
            inner.reconcile();
        }
        debug!(
            "Session registry started with {} session(s)",
            inner.read_sessions().len()
        );

        let poll_task = runtime.spawn(poll(Arc::downgrade(&inner), poll_interval));
        Ok(Self {
            inner,
            poll_task: Mutex::new(Some(poll_task)),
        })
    }

    /// The first playing session by id, else the first session, else `None`
    pub fn active_session(&self) -> Option<SessionHandle> {
        let sessions = self.inner.sorted_sessions();
        sessions
            .iter()
            .find(|s| s.playback_state() == PlaybackState::Playing)
            .or_else(|| sessions.first())
            .cloned()
    }

    /// Every known session, ordered by id
    pub fn all_sessions(&self) -> Vec<SessionHandle> {
        self.inner.sorted_sessions()
    }

    /// First session (by id) whose application name contains `name`, ignoring case
    pub fn session_by_app(&self, name: &str) -> Option<SessionHandle> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.inner
            .sorted_sessions()
            .into_iter()
            .find(|s| s.application_name().to_lowercase().contains(&needle))
    }

    pub fn has_active_sessions(&self) -> bool {
        !self.inner.read_sessions().is_empty()
    }

    pub fn add_listener(&self, listener: Arc<dyn RegistryListener>) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn is_event_driven_enabled(&self) -> bool {
        self.inner.options.event_driven_enabled()
    }

    pub fn options(&self) -> &MediaOptions {
        &self.inner.options
    }

    /// Run a scan now and wait for it
    pub async fn refresh(&self) {
        let inner = self.inner.clone();
        if let Err(err) = tokio::task::spawn_blocking(move || inner.reconcile()).await {
            warn!("Session scan failed: {}", err);
        }
    }

    /// Stop scanning and close every session. Safe to call repeatedly.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self
            .poll_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        let sessions: Vec<SessionTicker> = self
            .inner
            .write_sessions()
            .drain()
            .map(|(_, ticker)| ticker)
            .collect();
        for ticker in &sessions {
            ticker.close();
        }
        self.inner.listeners.clear();
        self.inner.executor.shutdown();
        info!("Session registry closed ({} session(s) released)", sessions.len());
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.close();
    }
}

async fn poll(inner: std::sync::Weak<RegistryInner>, period: std::time::Duration) {
    let mut timer = interval_at(tokio::time::Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        timer.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.is_closed() {
            break;
        }
        if let Err(err) = tokio::task::spawn_blocking(move || inner.reconcile()).await {
            warn!("Session scan failed: {}", err);
        }
    }
}
