//! Per-session polling loop.
//!
//! Each session owns one tokio task. The task probes on a fixed-delay timer,
//! folds the reading through the projector and the detector, publishes the
//! new cache and then notifies listeners. Probes run on the blocking pool and
//! are awaited, so ticks of one session never overlap.

use crate::config::MediaOptions;
use crate::control::ControlExecutor;
use crate::detector::{self, Changes, Observation};
use crate::models::{NowPlaying, PlaybackState, RawSnapshot};
use crate::projector::PositionProjector;
use crate::session::{SessionHandle, SessionSnapshot};
use crate::traits::SnapshotProbe;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Probe-to-event pipeline of one session, independent of any timer
pub(crate) struct TickEngine {
    probe: Arc<dyn SnapshotProbe>,
    session: SessionHandle,
    projector: PositionProjector,
    last: Observation,
    failures: u32,
    event_driven: bool,
}

impl TickEngine {
    pub(crate) fn new(probe: Arc<dyn SnapshotProbe>, session: SessionHandle, event_driven: bool) -> Self {
        Self {
            probe,
            session,
            projector: PositionProjector::new(),
            last: Observation::idle(),
            failures: 0,
            event_driven,
        }
    }

    /// Establish the detection baseline. Fires nothing.
    pub(crate) fn warm(&mut self, now: Instant, wall: DateTime<Utc>) {
        let result = self.probe.probe(self.session.id());
        self.apply(result, now, wall);
    }

    async fn tick(&mut self) {
        let probe = self.probe.clone();
        let id = self.session.id().to_string();
        let result = match tokio::task::spawn_blocking(move || probe.probe(&id)).await {
            Ok(result) => result,
            Err(err) => Err(anyhow!("probe task failed: {}", err)),
        };
        // Closed while the probe was in flight; its result is stale.
        if self.session.is_closed() {
            return;
        }
        let changes = self.apply(result, Instant::now(), Utc::now());
        self.notify(changes);
    }

    /// Fold one probe result into the session cache and return what changed
    pub(crate) fn apply(
        &mut self,
        result: anyhow::Result<Option<RawSnapshot>>,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Changes {
        let observation = match result {
            Ok(Some(raw)) => self.observe(&raw, now, wall),
            Ok(None) => {
                self.failures = 0;
                self.projector.reset();
                self.session.publish(|prev| SessionSnapshot {
                    state: PlaybackState::Unknown,
                    active: false,
                    now_playing: None,
                    probe_failures: 0,
                    ..prev.clone()
                });
                Observation::idle()
            }
            Err(err) => {
                self.failures = self.failures.saturating_add(1);
                warn!(
                    "Probe of session {} failed ({} in a row): {:#}",
                    self.session.id(),
                    self.failures,
                    err
                );
                let failures = self.failures;
                self.session.publish(|prev| SessionSnapshot {
                    probe_failures: failures,
                    ..prev.clone()
                });
                Observation::idle()
            }
        };

        let changes = observation.diff(&self.last);
        self.last = observation;
        changes
    }

    fn observe(&mut self, raw: &RawSnapshot, now: Instant, wall: DateTime<Utc>) -> Observation {
        self.failures = 0;
        let position = self.projector.project(raw, now);
        let now_playing = raw
            .has_media()
            .then(|| NowPlaying::from_raw(raw, position, wall));
        let active = detector::is_active(raw.state, now_playing.as_ref());

        let application = raw
            .application
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());
        self.session.publish(|prev| SessionSnapshot {
            id: prev.id.clone(),
            application_name: application
                .map(str::to_string)
                .unwrap_or_else(|| prev.application_name.clone()),
            state: raw.state,
            active,
            now_playing: now_playing.clone(),
            capabilities: raw.capabilities,
            probe_failures: 0,
        });

        Observation {
            state: raw.state,
            active,
            now_playing,
        }
    }

    /// Advance the published position without probing
    pub(crate) fn refresh_position(&mut self, now: Instant, wall: DateTime<Utc>) -> Changes {
        if !self.last.state.is_playing() {
            return Changes::default();
        }
        let Some(current) = self.last.now_playing.as_ref() else {
            return Changes::default();
        };
        let next = current.with_position(self.projector.project_forward(now), wall);
        if !detector::now_playing_changed(Some(current), Some(&next), self.last.state) {
            return Changes::default();
        }

        let published = next.clone();
        self.session.publish(|prev| SessionSnapshot {
            now_playing: Some(published),
            ..prev.clone()
        });
        self.last.now_playing = Some(next);
        Changes {
            now_playing: true,
            ..Changes::default()
        }
    }

    /// Dispatch in order: state, active, now-playing
    pub(crate) fn notify(&self, changes: Changes) {
        if !self.event_driven || !changes.any() {
            return;
        }
        let session = &self.session;
        let listeners = session.listeners();
        let observation = &self.last;
        if changes.state {
            listeners.dispatch(|l| l.on_playback_state_changed(session, observation.state));
        }
        if changes.active {
            listeners.dispatch(|l| l.on_session_active_changed(session, observation.active));
        }
        if changes.now_playing {
            let now_playing = observation.now_playing.as_ref();
            listeners.dispatch(|l| l.on_now_playing_changed(session, now_playing));
        }
    }
}

/// A live session: its handle plus the task ticking it
pub(crate) struct SessionTicker {
    session: SessionHandle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionTicker {
    /// Create the session, warm it on the calling thread, then start ticking on `runtime`.
    ///
    /// The warm tick probes synchronously; call from a blocking context.
    pub(crate) fn start(
        id: String,
        probe: Arc<dyn SnapshotProbe>,
        options: &MediaOptions,
        executor: Arc<ControlExecutor>,
        runtime: &Handle,
    ) -> Self {
        let application_name = probe
            .application_name(&id)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| id.clone());
        let controls = probe.controls(&id);
        let session = SessionHandle::new(id, application_name, controls, executor);

        let mut engine = TickEngine::new(probe, session.clone(), options.event_driven_enabled());
        engine.warm(Instant::now(), Utc::now());
        debug!(
            "Session {} warm: {}",
            session.id(),
            session.playback_state()
        );

        let refresh = if options.event_driven_enabled() {
            options.position_refresh_interval()
        } else {
            None
        };
        let task = runtime.spawn(run(engine, options.session_update_interval(), refresh));

        Self {
            session,
            task: Mutex::new(Some(task)),
        }
    }

    pub(crate) fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Stop ticking and drop listeners. Safe to call repeatedly.
    pub(crate) fn close(&self) {
        if !self.session.close() {
            return;
        }
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        debug!("Session {} closed", self.session.id());
    }
}

impl Drop for SessionTicker {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run(mut engine: TickEngine, update: Duration, refresh: Option<Duration>) {
    let start = tokio::time::Instant::now();
    let mut updates = fixed_delay(start, update);
    let mut refreshes = refresh.map(|period| fixed_delay(start, period));

    loop {
        tokio::select! {
            _ = updates.tick() => engine.tick().await,
            _ = next_refresh(&mut refreshes) => {
                let changes = engine.refresh_position(Instant::now(), Utc::now());
                engine.notify(changes);
            }
        }
        if engine.session.is_closed() {
            break;
        }
    }
}

fn fixed_delay(start: tokio::time::Instant, period: Duration) -> Interval {
    let mut timer = interval_at(start + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_refresh(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::SessionListener;
    use crate::traits::{NoControls, TransportControls};
    use std::collections::VecDeque;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn playing_at(position_ms: u64) -> RawSnapshot {
        RawSnapshot {
            title: Some("Time".to_string()),
            artist: Some("Pink Floyd".to_string()),
            album: Some("The Dark Side of the Moon".to_string()),
            duration: Some(ms(413_000)),
            position: Some(ms(position_ms)),
            state: PlaybackState::Playing,
            rate: Some(1.0),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct Scripted {
        steps: Mutex<VecDeque<RawSnapshot>>,
    }

    impl SnapshotProbe for Scripted {
        fn probe(&self, _session_id: &str) -> anyhow::Result<Option<RawSnapshot>> {
            Ok(self.steps.lock().unwrap().pop_front())
        }

        fn list_session_ids(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec!["spotify".to_string()])
        }

        fn controls(&self, _session_id: &str) -> Arc<dyn TransportControls> {
            Arc::new(NoControls)
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl SessionListener for Recorder {
        fn on_now_playing_changed(&self, _session: &SessionHandle, now_playing: Option<&NowPlaying>) {
            let event = match now_playing {
                Some(np) => format!(
                    "now_playing:{}@{}",
                    np.title.as_deref().unwrap_or(""),
                    np.position.map(|p| p.as_millis()).unwrap_or(0)
                ),
                None => "now_playing:none".to_string(),
            };
            self.events.lock().unwrap().push(event);
        }

        fn on_playback_state_changed(&self, _session: &SessionHandle, state: PlaybackState) {
            self.events.lock().unwrap().push(format!("state:{}", state));
        }

        fn on_session_active_changed(&self, _session: &SessionHandle, active: bool) {
            self.events.lock().unwrap().push(format!("active:{}", active));
        }
    }

    fn engine(event_driven: bool) -> (TickEngine, Arc<Recorder>) {
        let executor = Arc::new(ControlExecutor::spawn().unwrap());
        let session = SessionHandle::new(
            "spotify".to_string(),
            "Spotify".to_string(),
            Arc::new(NoControls),
            executor,
        );
        let recorder = Arc::new(Recorder::default());
        session.add_listener(recorder.clone());
        let engine = TickEngine::new(Arc::new(Scripted::default()), session, event_driven);
        (engine, recorder)
    }

    fn step(engine: &mut TickEngine, result: anyhow::Result<Option<RawSnapshot>>, now: Instant) {
        let changes = engine.apply(result, now, Utc::now());
        engine.notify(changes);
    }

    #[test]
    fn test_warm_tick_fires_nothing() {
        let probe = Arc::new(Scripted::default());
        probe.steps.lock().unwrap().push_back(playing_at(30_000));
        let (mut engine, recorder) = engine(true);
        engine.probe = probe as Arc<dyn SnapshotProbe>;

        engine.warm(Instant::now(), Utc::now());

        assert!(recorder.take().is_empty());
        let snapshot = engine.session.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert!(snapshot.active);
        assert_eq!(snapshot.now_playing.as_ref().and_then(|n| n.position), Some(ms(30_000)));
    }

    #[test]
    fn test_dispatch_order_state_active_now_playing() {
        let (mut engine, recorder) = engine(true);
        let t0 = Instant::now();
        engine.apply(Ok(Some(playing_at(30_000))), t0, Utc::now());

        let paused = RawSnapshot {
            state: PlaybackState::Paused,
            ..playing_at(30_000)
        };
        step(&mut engine, Ok(Some(paused)), t0 + ms(200));
        assert_eq!(recorder.take(), vec!["state:paused", "active:false"]);

        let next_track = RawSnapshot {
            title: Some("Breathe".to_string()),
            duration: Some(ms(163_000)),
            ..playing_at(0)
        };
        step(&mut engine, Ok(Some(next_track)), t0 + ms(400));
        assert_eq!(
            recorder.take(),
            vec!["state:playing", "active:true", "now_playing:Breathe@0"]
        );
    }

    #[test]
    fn test_losing_metadata_fires_one_none_event() {
        let (mut engine, recorder) = engine(true);
        let t0 = Instant::now();
        engine.apply(Ok(Some(playing_at(1_000))), t0, Utc::now());

        let bare = RawSnapshot {
            state: PlaybackState::Playing,
            ..Default::default()
        };
        step(&mut engine, Ok(Some(bare.clone())), t0 + ms(200));
        step(&mut engine, Ok(Some(bare)), t0 + ms(400));

        assert_eq!(recorder.take(), vec!["now_playing:none"]);
        assert_eq!(engine.session.now_playing(), None);
        assert!(engine.session.is_active());
    }

    #[test]
    fn test_probe_failure_keeps_cache_and_reports_idle() {
        let (mut engine, recorder) = engine(true);
        let t0 = Instant::now();
        engine.apply(Ok(Some(playing_at(30_000))), t0, Utc::now());

        step(&mut engine, Err(anyhow!("dbus timeout")), t0 + ms(200));
        assert_eq!(
            recorder.take(),
            vec!["state:unknown", "active:false", "now_playing:none"]
        );
        let snapshot = engine.session.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert!(snapshot.now_playing.is_some());
        assert_eq!(snapshot.probe_failures, 1);

        step(&mut engine, Err(anyhow!("dbus timeout")), t0 + ms(400));
        assert!(recorder.take().is_empty());
        assert_eq!(engine.session.snapshot().probe_failures, 2);

        step(&mut engine, Ok(Some(playing_at(31_000))), t0 + ms(600));
        assert_eq!(
            recorder.take(),
            vec!["state:playing", "active:true", "now_playing:Time@31000"]
        );
        assert_eq!(engine.session.snapshot().probe_failures, 0);
    }

    #[test]
    fn test_no_data_clears_cache() {
        let (mut engine, recorder) = engine(true);
        let t0 = Instant::now();
        engine.apply(Ok(Some(playing_at(30_000))), t0, Utc::now());

        step(&mut engine, Ok(None), t0 + ms(200));
        assert_eq!(
            recorder.take(),
            vec!["state:unknown", "active:false", "now_playing:none"]
        );
        let snapshot = engine.session.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Unknown);
        assert!(!snapshot.active);
        assert!(snapshot.now_playing.is_none());

        // The projector was reset: the next reading is taken as-is.
        step(&mut engine, Ok(Some(playing_at(5_000))), t0 + ms(400));
        assert_eq!(
            engine.session.now_playing().and_then(|n| n.position),
            Some(ms(5_000))
        );
    }

    #[test]
    fn test_polling_mode_updates_cache_silently() {
        let (mut engine, recorder) = engine(false);
        let t0 = Instant::now();
        engine.apply(Ok(Some(playing_at(30_000))), t0, Utc::now());

        let paused = RawSnapshot {
            state: PlaybackState::Paused,
            ..playing_at(30_000)
        };
        step(&mut engine, Ok(Some(paused)), t0 + ms(200));
        assert!(recorder.take().is_empty());
        assert_eq!(engine.session.playback_state(), PlaybackState::Paused);
    }

    #[test]
    fn test_application_name_from_snapshot() {
        let (mut engine, _recorder) = engine(true);
        assert_eq!(engine.session.application_name(), "Spotify");

        let tagged = RawSnapshot {
            application: Some("com.spotify.client".to_string()),
            ..playing_at(0)
        };
        engine.apply(Ok(Some(tagged)), Instant::now(), Utc::now());
        assert_eq!(engine.session.application_name(), "com.spotify.client");
    }

    #[test]
    fn test_position_refresh_between_probes() {
        let (mut engine, recorder) = engine(true);
        let t0 = Instant::now();
        engine.apply(Ok(Some(playing_at(10_000))), t0, Utc::now());

        let changes = engine.refresh_position(t0 + ms(100), Utc::now());
        engine.notify(changes);
        assert_eq!(recorder.take(), vec!["now_playing:Time@10100"]);
        assert_eq!(
            engine.session.now_playing().and_then(|n| n.position),
            Some(ms(10_100))
        );

        // Same millisecond: nothing to report.
        assert!(!engine.refresh_position(t0 + ms(100), Utc::now()).any());

        let paused = RawSnapshot {
            state: PlaybackState::Paused,
            ..playing_at(10_200)
        };
        engine.apply(Ok(Some(paused)), t0 + ms(200), Utc::now());
        assert!(!engine.refresh_position(t0 + ms(900), Utc::now()).any());
    }

    #[tokio::test]
    async fn test_ticker_close_is_idempotent() {
        let probe = Arc::new(Scripted::default());
        probe.steps.lock().unwrap().push_back(playing_at(1_000));
        let options = MediaOptions::default()
            .with_session_update_interval(Duration::from_secs(3600))
            .unwrap();
        let executor = Arc::new(ControlExecutor::spawn().unwrap());

        let ticker = SessionTicker::start(
            "spotify".to_string(),
            probe,
            &options,
            executor,
            &Handle::current(),
        );
        let session = ticker.session().clone();
        assert_eq!(session.playback_state(), PlaybackState::Playing);
        session.add_listener(Arc::new(Recorder::default()));

        ticker.close();
        ticker.close();
        assert!(session.is_closed());
        assert!(session.listeners().is_empty());
        assert!(!session.send(crate::control::TransportCommand::Play).await);
        // The last published state stays readable.
        assert_eq!(session.playback_state(), PlaybackState::Playing);
    }
}
