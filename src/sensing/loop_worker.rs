use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::matching::{text::url_from_title, Matcher};
use crate::models::{
    ActivityChangeEvent, ActivityKind, CapturedEvent, ContextSnapshot, RuleSet, ScreenshotEvent,
    SessionState,
};
use crate::utils::WarnOnce;

use super::{ContextObserver, EventSink, ScreenCapturer};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

/// Everything a producer needs, shared by both loops of one session.
#[derive(Clone)]
pub struct ProducerContext {
    pub observer: Arc<dyn ContextObserver>,
    pub capturer: Arc<dyn ScreenCapturer>,
    pub sink: Arc<dyn EventSink>,
    pub matcher: Matcher,
    pub state: watch::Receiver<SessionState>,
    pub rules: watch::Receiver<Arc<RuleSet>>,
    pub unknown_context: Arc<WarnOnce>,
}

impl ProducerContext {
    fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    fn rules(&self) -> Arc<RuleSet> {
        self.rules.borrow().clone()
    }

    /// The session this producer was started for is still the running one.
    fn still_current(&self, session_id: &str, cancel_token: &CancellationToken) -> bool {
        if cancel_token.is_cancelled() {
            return false;
        }
        let state = self.snapshot();
        state.running && state.session_id.as_deref() == Some(session_id)
    }

    fn observe_known(&self, snapshot: &ContextSnapshot) -> bool {
        if snapshot.is_unknown() {
            self.unknown_context.warn(
                "foreground context unavailable; grant accessibility/automation permission to the agent",
            );
            return false;
        }
        true
    }
}

/// Screenshot producer: observe, match, and only then capture.
///
/// The interval is re-read from the session state after every iteration so
/// server-side changes apply on the next sleep.
pub async fn screenshot_loop(ctx: ProducerContext, cancel_token: CancellationToken) {
    let Some(session_id) = ctx.snapshot().session_id else {
        return;
    };
    log_info!("screenshot producer started for session {session_id}");

    loop {
        if !ctx.still_current(&session_id, &cancel_token) {
            break;
        }

        if let Err(err) = capture_once(&ctx, &session_id, &cancel_token).await {
            log_error!("screenshot capture failed for session {session_id}: {err:#}");
        }

        let interval = ctx.snapshot().capture_interval;
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel_token.cancelled() => break,
        }
    }

    log_info!("screenshot producer for session {session_id} exited");
}

async fn capture_once(
    ctx: &ProducerContext,
    session_id: &str,
    cancel_token: &CancellationToken,
) -> Result<()> {
    let timestamp = Utc::now();
    let snapshot = ctx.observer.observe().await;
    if !ctx.observe_known(&snapshot) {
        return Ok(());
    }

    let rules = ctx.rules();
    let decision = ctx.matcher.evaluate(&snapshot, &rules);
    let (routing_key, label) = match (decision.should_capture, decision.routing_key, decision.label) {
        (true, Some(routing_key), Some(label)) => (routing_key, label),
        _ => {
            log_debug!("skipping capture, {} not allowlisted", snapshot.application_name);
            return Ok(());
        }
    };

    // Stop may have landed while observing; once the grab starts it completes.
    if !ctx.still_current(session_id, cancel_token) {
        return Ok(());
    }

    let image_bytes = ctx
        .capturer
        .capture()
        .await
        .context("screen capture failed")?;

    let event = CapturedEvent::Screenshot(ScreenshotEvent {
        timestamp,
        routing_key,
        label,
        image_bytes,
    });
    ctx.sink
        .submit(session_id, &event)
        .await
        .context("screenshot upload failed")?;
    log_debug!("screenshot for {} submitted", event.label().unwrap_or_default());
    Ok(())
}

/// Activity producer: reports every change of the (application, window title)
/// pair, allowlisted or not.
pub async fn activity_loop(
    ctx: ProducerContext,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let Some(session_id) = ctx.snapshot().session_id else {
        return;
    };
    log_info!("activity producer started for session {session_id}");

    let mut last_emitted: Option<(String, String)> = None;

    loop {
        if !ctx.still_current(&session_id, &cancel_token) {
            break;
        }

        if let Err(err) = track_once(&ctx, &session_id, &cancel_token, &mut last_emitted).await {
            log_error!("activity report failed for session {session_id}: {err:#}");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel_token.cancelled() => break,
        }
    }

    log_info!("activity producer for session {session_id} exited");
}

async fn track_once(
    ctx: &ProducerContext,
    session_id: &str,
    cancel_token: &CancellationToken,
    last_emitted: &mut Option<(String, String)>,
) -> Result<()> {
    let timestamp = Utc::now();
    let snapshot = ctx.observer.observe().await;
    if !ctx.observe_known(&snapshot) {
        return Ok(());
    }

    let pair = (
        snapshot.application_name.clone(),
        snapshot.window_title.clone(),
    );
    if last_emitted.as_ref() == Some(&pair) {
        return Ok(());
    }
    if !ctx.still_current(session_id, cancel_token) {
        return Ok(());
    }

    let event = activity_event(&ctx.matcher, &snapshot, &ctx.rules(), timestamp);
    // A failed delivery is not retried; the pair counts as reported.
    *last_emitted = Some(pair);
    ctx.sink
        .submit(session_id, &event)
        .await
        .context("activity upload failed")
}

fn activity_event(
    matcher: &Matcher,
    snapshot: &ContextSnapshot,
    rules: &RuleSet,
    timestamp: chrono::DateTime<Utc>,
) -> CapturedEvent {
    let in_allowlist = matcher.evaluate(snapshot, rules).should_capture;
    let (kind, url) = if matcher.is_browser(&snapshot.application_name) {
        let url = url_from_title(&snapshot.window_title);
        (ActivityKind::Website, (!url.is_empty()).then_some(url))
    } else {
        (ActivityKind::Application, None)
    };

    CapturedEvent::ActivityChange(ActivityChangeEvent {
        timestamp,
        kind,
        application_name: snapshot.application_name.clone(),
        window_title: snapshot.window_title.clone(),
        url,
        in_allowlist,
    })
}
