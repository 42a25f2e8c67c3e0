use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    api::ApiError,
    matching::Matcher,
    models::{RuleSet, SessionState},
    sensing::{ContextObserver, EventSink, ProducerContext, ScreenCapturer, SensingController},
    settings::AgentSettings,
    utils::WarnOnce,
};

use super::{reconcile, SessionApi, SyncPhase, Transition};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub rule_refresh_interval: Duration,
    pub activity_interval: Duration,
    pub default_capture_interval: Duration,
    pub request_timeout: Duration,
    /// How long shutdown waits for a producer's last write: one screen grab
    /// plus one upload.
    pub producer_grace: Duration,
}

impl From<&AgentSettings> for SyncSettings {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            poll_interval: settings.session_poll_interval(),
            rule_refresh_interval: settings.rule_refresh_interval(),
            activity_interval: settings.activity_interval(),
            default_capture_interval: settings.default_capture_interval(),
            request_timeout: settings.request_timeout(),
            producer_grace: settings.request_timeout() + settings.upload_timeout(),
        }
    }
}

/// OS-facing collaborators handed to the producers of each session.
#[derive(Clone)]
pub struct CaptureSources {
    pub observer: Arc<dyn ContextObserver>,
    pub capturer: Arc<dyn ScreenCapturer>,
    pub sink: Arc<dyn EventSink>,
}

/// Keeps the local session state and the allowlist in step with the backend.
///
/// Two background loops run once `start` is called: the session poll, which
/// drives Idle/Active transitions and the producers, and the allowlist
/// refresh. Both publish whole values through `watch` channels.
#[derive(Clone)]
pub struct SessionSynchronizer {
    api: Arc<dyn SessionApi>,
    sources: CaptureSources,
    matcher: Matcher,
    settings: SyncSettings,
    phase: Arc<Mutex<SyncPhase>>,
    state_tx: Arc<watch::Sender<SessionState>>,
    rules_tx: Arc<watch::Sender<Arc<RuleSet>>>,
    sensing: Arc<Mutex<SensingController>>,
    unknown_context: Arc<WarnOnce>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    shutdown_token: CancellationToken,
}

impl SessionSynchronizer {
    pub fn new(
        api: Arc<dyn SessionApi>,
        sources: CaptureSources,
        matcher: Matcher,
        settings: SyncSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::idle(settings.default_capture_interval));
        let (rules_tx, _) = watch::channel(Arc::new(RuleSet::default()));

        Self {
            api,
            sources,
            matcher,
            settings,
            phase: Arc::new(Mutex::new(SyncPhase::Idle)),
            state_tx: Arc::new(state_tx),
            rules_tx: Arc::new(rules_tx),
            sensing: Arc::new(Mutex::new(SensingController::new())),
            unknown_context: Arc::new(WarnOnce::new()),
            tasks: Arc::new(Mutex::new(Vec::new())),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn rules(&self) -> watch::Receiver<Arc<RuleSet>> {
        self.rules_tx.subscribe()
    }

    pub async fn phase(&self) -> SyncPhase {
        *self.phase.lock().await
    }

    /// Spawn the session poll and allowlist refresh loops.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            log_warn!("synchronizer already started");
            return;
        }

        let poller = self.clone();
        tasks.push(tokio::spawn(async move { poller.poll_loop().await }));
        let refresher = self.clone();
        tasks.push(tokio::spawn(async move { refresher.rule_loop().await }));
        log_info!(
            "synchronizer started (poll every {:?}, allowlist every {:?})",
            self.settings.poll_interval,
            self.settings.rule_refresh_interval
        );
    }

    async fn poll_loop(&self) {
        let mut ticker = time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = self.shutdown_token.cancelled() => break,
            }
        }
    }

    async fn rule_loop(&self) {
        // First tick fires immediately so rules are loaded before the first capture.
        let mut ticker = time::interval(self.settings.rule_refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh_rules_once().await;
                }
                _ = self.shutdown_token.cancelled() => break,
            }
        }
    }

    /// One poll cycle. A failed fetch leaves the local state untouched.
    pub async fn poll_once(&self) -> Transition {
        let remote = match self
            .with_reauth("session poll", move || self.api.current_session())
            .await
        {
            Ok(remote) => remote,
            Err(err) => {
                log_warn!("session poll failed, keeping current state: {err}");
                return Transition::Unchanged;
            }
        };

        let mut phase = self.phase.lock().await;
        let current = self.state_tx.borrow().clone();
        let transition = reconcile(
            *phase,
            &current,
            remote.as_ref(),
            self.settings.default_capture_interval,
        );
        self.apply(&mut phase, &current, transition.clone()).await;
        transition
    }

    /// Replace the cached allowlist. Returns false when the fetch failed and
    /// the previous rules stay in force.
    pub async fn refresh_rules_once(&self) -> bool {
        match self
            .with_reauth("allowlist refresh", move || self.api.active_rules())
            .await
        {
            Ok(entries) => {
                let rules = RuleSet::from_wire(entries, Utc::now());
                let previous = self.rules_tx.borrow().len();
                if previous != rules.len() {
                    log_info!("allowlist refreshed: {} rules (was {previous})", rules.len());
                }
                self.rules_tx.send_replace(Arc::new(rules));
                true
            }
            Err(err) => {
                log_warn!(
                    "allowlist refresh failed, keeping {} cached rules: {err}",
                    self.rules_tx.borrow().len()
                );
                false
            }
        }
    }

    /// Stop both loops and the producers. When a session is active, publish
    /// the idle state and ask the backend to stop it (best effort).
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                log_error!("synchronizer task failed to join: {err}");
            }
        }

        {
            let mut phase = self.phase.lock().await;
            if *phase == SyncPhase::Active {
                let current = self.state_tx.borrow().clone();
                self.end_session(&mut phase, &current).await;
                match self.bounded(self.api.stop_session()).await {
                    Ok(()) => log_info!("requested backend session stop"),
                    Err(err) => log_warn!("backend session stop failed: {err}"),
                }
            }
        }

        if let Err(err) = self
            .sensing
            .lock()
            .await
            .stop_producers(self.settings.producer_grace)
            .await
        {
            log_error!("failed to stop capture producers: {err:#}");
        }
    }

    async fn apply(&self, phase: &mut SyncPhase, current: &SessionState, transition: Transition) {
        match transition {
            Transition::Unchanged => {}
            Transition::Start {
                session_id,
                capture_interval,
            } => {
                self.begin_session(phase, session_id, capture_interval).await;
            }
            Transition::Restart {
                session_id,
                capture_interval,
            } => {
                self.end_session(phase, current).await;
                self.begin_session(phase, session_id, capture_interval).await;
            }
            Transition::UpdateInterval(capture_interval) => {
                let mut next = current.clone();
                next.capture_interval = capture_interval;
                self.state_tx.send_replace(next);
                log_info!("capture interval changed to {capture_interval:?}");
            }
            Transition::Stop => {
                self.end_session(phase, current).await;
            }
        }
    }

    async fn begin_session(
        &self,
        phase: &mut SyncPhase,
        session_id: String,
        capture_interval: Duration,
    ) {
        self.state_tx
            .send_replace(SessionState::active(session_id.clone(), capture_interval));
        *phase = SyncPhase::Active;

        let ctx = self.producer_context();
        if let Err(err) = self.sensing.lock().await.start_producers(
            ctx,
            self.settings.activity_interval,
            &self.shutdown_token,
        ) {
            log_error!("failed to start capture producers: {err:#}");
        }
        log_info!("session {session_id} active, capturing every {capture_interval:?}");
    }

    async fn end_session(&self, phase: &mut SyncPhase, current: &SessionState) {
        self.state_tx
            .send_replace(SessionState::idle(current.capture_interval));
        *phase = SyncPhase::Idle;
        self.sensing.lock().await.request_stop();
        log_info!(
            "session {} ended, capture stopped",
            current.session_id.as_deref().unwrap_or("<none>")
        );
    }

    fn producer_context(&self) -> ProducerContext {
        ProducerContext {
            observer: self.sources.observer.clone(),
            capturer: self.sources.capturer.clone(),
            sink: self.sources.sink.clone(),
            matcher: self.matcher.clone(),
            state: self.state_tx.subscribe(),
            rules: self.rules_tx.subscribe(),
            unknown_context: self.unknown_context.clone(),
        }
    }

    /// Run `call`; on 401 re-authenticate once and retry once.
    async fn with_reauth<T, F, Fut>(&self, what: &str, call: F) -> Result<T, ApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        match self.bounded(call()).await {
            Err(ApiError::AuthExpired) => {
                log_warn!("{what} unauthorized, re-authenticating");
                self.bounded(self.api.reauthenticate()).await?;
                log_debug!("re-authenticated, retrying {what}");
                self.bounded(call()).await
            }
            other => other,
        }
    }

    async fn bounded<T, Fut>(&self, fut: Fut) -> Result<T, ApiError>
    where
        Fut: Future<Output = Result<T, ApiError>>,
    {
        match time::timeout(self.settings.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout(self.settings.request_timeout)),
        }
    }
}

impl std::fmt::Debug for SessionSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSynchronizer")
            .field("settings", &self.settings)
            .field("state", &*self.state_tx.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::matching::MatchConfig;
    use crate::models::{ContextSnapshot, RemoteSession};
    use crate::sensing::fakes::{RecordingSink, ScriptedObserver, StaticCapturer};

    #[derive(Default)]
    struct FakeApi {
        sessions: StdMutex<VecDeque<Result<Option<RemoteSession>, ApiError>>>,
        rules: StdMutex<VecDeque<Result<Vec<Value>, ApiError>>>,
        reauth_fails: AtomicBool,
        sessions_hang: AtomicBool,
        reauth_calls: AtomicUsize,
        stop_calls: AtomicUsize,
    }

    impl FakeApi {
        fn push_session(&self, response: Result<Option<RemoteSession>, ApiError>) {
            self.sessions.lock().unwrap().push_back(response);
        }

        fn push_rules(&self, response: Result<Vec<Value>, ApiError>) {
            self.rules.lock().unwrap().push_back(response);
        }
    }

    #[async_trait]
    impl SessionApi for FakeApi {
        async fn current_session(&self) -> Result<Option<RemoteSession>, ApiError> {
            if self.sessions_hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.sessions.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }

        async fn active_rules(&self) -> Result<Vec<Value>, ApiError> {
            self.rules.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
        }

        async fn reauthenticate(&self) -> Result<(), ApiError> {
            self.reauth_calls.fetch_add(1, Ordering::SeqCst);
            if self.reauth_fails.load(Ordering::SeqCst) {
                Err(ApiError::Status(403))
            } else {
                Ok(())
            }
        }

        async fn stop_session(&self) -> Result<(), ApiError> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn session(id: &str, interval: Option<u64>) -> Option<RemoteSession> {
        Some(RemoteSession {
            id: id.into(),
            is_active: true,
            screenshot_interval: interval,
        })
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            poll_interval: Duration::from_secs(5),
            rule_refresh_interval: Duration::from_secs(30),
            activity_interval: Duration::from_secs(5),
            default_capture_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            producer_grace: Duration::from_secs(40),
        }
    }

    fn synchronizer(api: Arc<FakeApi>, observer: ScriptedObserver) -> (SessionSynchronizer, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let sources = CaptureSources {
            observer: Arc::new(observer),
            capturer: Arc::new(StaticCapturer::default()),
            sink: sink.clone(),
        };
        (
            SessionSynchronizer::new(api, sources, Matcher::new(MatchConfig::default()), settings()),
            sink,
        )
    }

    fn cursor_rule() -> Value {
        json!({
            "config_type": "application",
            "pattern": "Cursor",
            "folder_name": "coding",
            "is_active": true
        })
    }

    #[tokio::test(start_paused = true)]
    async fn session_lifecycle_drives_state_and_producers() {
        let api = Arc::new(FakeApi::default());
        let (sync, sink) = synchronizer(
            api.clone(),
            ScriptedObserver::fixed(ContextSnapshot::new("Cursor", "main.rs")),
        );
        api.push_rules(Ok(vec![cursor_rule()]));
        assert!(sync.refresh_rules_once().await);

        api.push_session(Ok(session("41", Some(3))));
        let transition = sync.poll_once().await;
        assert!(matches!(transition, Transition::Start { .. }));
        assert_eq!(sync.phase().await, SyncPhase::Active);
        let state = sync.state().borrow().clone();
        assert!(state.running);
        assert_eq!(state.session_id.as_deref(), Some("41"));
        assert_eq!(state.capture_interval, Duration::from_secs(3));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.screenshots(), 1);
        assert!(sink.events().iter().all(|(id, _)| id == "41"));

        api.push_session(Ok(session("41", Some(6))));
        assert_eq!(
            sync.poll_once().await,
            Transition::UpdateInterval(Duration::from_secs(6))
        );
        assert_eq!(sync.state().borrow().capture_interval, Duration::from_secs(6));

        api.push_session(Ok(None));
        assert_eq!(sync.poll_once().await, Transition::Stop);
        assert_eq!(sync.phase().await, SyncPhase::Idle);
        assert!(!sync.state().borrow().running);

        let emitted = sink.events().len();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sink.events().len(), emitted);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_auth_triggers_one_reauth_and_retry() {
        let api = Arc::new(FakeApi::default());
        let (sync, _sink) = synchronizer(api.clone(), ScriptedObserver::fixed(ContextSnapshot::unknown()));

        api.push_session(Err(ApiError::AuthExpired));
        api.push_session(Ok(session("7", None)));
        assert!(matches!(sync.poll_once().await, Transition::Start { .. }));
        assert_eq!(api.reauth_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            sync.state().borrow().capture_interval,
            Duration::from_secs(10)
        );
        sync.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reauth_skips_the_cycle() {
        let api = Arc::new(FakeApi::default());
        api.reauth_fails.store(true, Ordering::SeqCst);
        let (sync, _sink) = synchronizer(api.clone(), ScriptedObserver::fixed(ContextSnapshot::unknown()));

        api.push_session(Err(ApiError::AuthExpired));
        api.push_session(Ok(session("7", None)));
        assert_eq!(sync.poll_once().await, Transition::Unchanged);
        assert_eq!(sync.phase().await, SyncPhase::Idle);

        // The queued session is picked up on the next cycle.
        assert!(matches!(sync.poll_once().await, Transition::Start { .. }));
        sync.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_failure_does_not_stop_an_active_session() {
        let api = Arc::new(FakeApi::default());
        let (sync, _sink) = synchronizer(api.clone(), ScriptedObserver::fixed(ContextSnapshot::unknown()));

        api.push_session(Ok(session("7", None)));
        sync.poll_once().await;
        api.push_session(Err(ApiError::Status(503)));
        assert_eq!(sync.poll_once().await, Transition::Unchanged);
        assert_eq!(sync.phase().await, SyncPhase::Active);
        assert!(sync.state().borrow().running);
        sync.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rule_refresh_keeps_cached_rules() {
        let api = Arc::new(FakeApi::default());
        let (sync, _sink) = synchronizer(api.clone(), ScriptedObserver::fixed(ContextSnapshot::unknown()));

        api.push_rules(Ok(vec![cursor_rule(), json!({ "pattern": "" })]));
        assert!(sync.refresh_rules_once().await);
        assert_eq!(sync.rules().borrow().len(), 1);

        api.push_rules(Err(ApiError::Status(500)));
        assert!(!sync.refresh_rules_once().await);
        assert_eq!(sync.rules().borrow().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_an_owned_session() {
        let api = Arc::new(FakeApi::default());
        let (sync, _sink) = synchronizer(api.clone(), ScriptedObserver::fixed(ContextSnapshot::unknown()));

        api.push_session(Ok(session("7", None)));
        sync.poll_once().await;
        sync.shutdown().await;

        assert_eq!(api.stop_calls.load(Ordering::SeqCst), 1);
        assert!(!sync.state().borrow().running);
        assert_eq!(sync.phase().await, SyncPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_idle_does_not_call_stop() {
        let api = Arc::new(FakeApi::default());
        let (sync, _sink) = synchronizer(api.clone(), ScriptedObserver::fixed(ContextSnapshot::unknown()));
        sync.shutdown().await;
        assert_eq!(api.stop_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn background_loops_load_rules_and_follow_the_server() {
        let api = Arc::new(FakeApi::default());
        let (sync, _sink) = synchronizer(api.clone(), ScriptedObserver::fixed(ContextSnapshot::unknown()));
        api.push_rules(Ok(vec![cursor_rule()]));
        api.push_session(Ok(session("7", None)));

        sync.start().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sync.rules().borrow().len(), 1);
        assert_eq!(sync.phase().await, SyncPhase::Active);

        // Queue is empty now, so the next poll reports no session.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sync.phase().await, SyncPhase::Idle);

        sync.shutdown().await;
        assert_eq!(api.stop_calls.load(Ordering::SeqCst), 0);
    }

    /// Sink whose screenshot writes take longer than a request timeout.
    #[derive(Default)]
    struct SlowScreenshotSink {
        completed: AtomicUsize,
    }

    #[async_trait]
    impl EventSink for SlowScreenshotSink {
        async fn submit(&self, _session_id: &str, event: &crate::models::CapturedEvent) -> anyhow::Result<()> {
            if matches!(event, crate::models::CapturedEvent::Screenshot(_)) {
                tokio::time::sleep(Duration::from_secs(15)).await;
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_an_in_flight_screenshot_write() {
        let api = Arc::new(FakeApi::default());
        let sink = Arc::new(SlowScreenshotSink::default());
        let sources = CaptureSources {
            observer: Arc::new(ScriptedObserver::fixed(ContextSnapshot::new("Cursor", "main.rs"))),
            capturer: Arc::new(StaticCapturer::default()),
            sink: sink.clone(),
        };
        let sync = SessionSynchronizer::new(
            api.clone(),
            sources,
            Matcher::new(MatchConfig::default()),
            settings(),
        );
        api.push_rules(Ok(vec![cursor_rule()]));
        assert!(sync.refresh_rules_once().await);
        api.push_session(Ok(session("41", Some(60))));
        assert!(matches!(sync.poll_once().await, Transition::Start { .. }));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.completed.load(Ordering::SeqCst), 0);

        sync.shutdown().await;
        assert_eq!(sink.completed.load(Ordering::SeqCst), 1);
        assert_eq!(api.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn producer_grace_covers_capture_and_upload() {
        let settings = SyncSettings::from(&AgentSettings::default());
        assert_eq!(
            settings.producer_grace,
            AgentSettings::default().request_timeout() + AgentSettings::default().upload_timeout()
        );
        assert!(settings.producer_grace > settings.request_timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_session_poll_times_out_without_changing_state() {
        let api = Arc::new(FakeApi::default());
        api.sessions_hang.store(true, Ordering::SeqCst);
        let (sync, _sink) = synchronizer(api.clone(), ScriptedObserver::fixed(ContextSnapshot::unknown()));

        let started = tokio::time::Instant::now();
        assert_eq!(sync.poll_once().await, Transition::Unchanged);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(sync.phase().await, SyncPhase::Idle);

        let err = sync
            .bounded(api.current_session())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Timeout(limit) if limit == Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn rule_refresh_keeps_running_while_the_session_poll_hangs() {
        let api = Arc::new(FakeApi::default());
        api.sessions_hang.store(true, Ordering::SeqCst);
        let (sync, _sink) = synchronizer(api.clone(), ScriptedObserver::fixed(ContextSnapshot::unknown()));
        api.push_rules(Ok(vec![cursor_rule()]));
        api.push_rules(Ok(vec![
            cursor_rule(),
            json!({ "config_type": "url", "pattern": "github.com", "folder_name": "GitHub" }),
        ]));

        sync.start().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sync.rules().borrow().len(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sync.rules().borrow().len(), 2);
        assert_eq!(sync.phase().await, SyncPhase::Idle);

        sync.shutdown().await;
    }
}
