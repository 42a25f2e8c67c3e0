use anyhow::{bail, Result};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::loop_worker::{activity_loop, screenshot_loop, ProducerContext};

/// Owns the two producer tasks of the active session.
pub struct SensingController {
    handles: Vec<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    /// Producers of earlier sessions still finishing their last iteration.
    draining: Vec<JoinHandle<()>>,
}

impl SensingController {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
            cancel_token: None,
            draining: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel_token.is_some()
    }

    pub fn start_producers(
        &mut self,
        ctx: ProducerContext,
        activity_interval: Duration,
        parent: &CancellationToken,
    ) -> Result<()> {
        if self.cancel_token.is_some() {
            bail!("capture producers already running");
        }
        self.draining.retain(|handle| !handle.is_finished());

        let cancel_token = parent.child_token();
        self.handles.push(tokio::spawn(screenshot_loop(
            ctx.clone(),
            cancel_token.clone(),
        )));
        self.handles.push(tokio::spawn(activity_loop(
            ctx,
            activity_interval,
            cancel_token.clone(),
        )));
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Ask the producers to exit after their current iteration. Does not wait:
    /// an in-flight screenshot is allowed to finish its write.
    pub fn request_stop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
            info!("stop signal sent to capture producers");
        }
        self.draining.append(&mut self.handles);
    }

    /// Stop and wait (bounded) for every producer, current or draining.
    pub async fn stop_producers(&mut self, grace: Duration) -> Result<()> {
        self.request_stop();

        for handle in self.draining.drain(..) {
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("capture producer task failed to join: {err}"),
                Err(_) => warn!("capture producer still busy after {grace:?}; detaching"),
            }
        }
        Ok(())
    }
}

impl Default for SensingController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::watch;

    use crate::matching::{MatchConfig, Matcher};
    use crate::models::{AllowlistRule, ContextSnapshot, RuleKind, RuleSet, SessionState};
    use crate::sensing::fakes::{RecordingSink, ScriptedObserver, StaticCapturer};
    use crate::utils::WarnOnce;

    #[tokio::test(start_paused = true)]
    async fn start_then_stop_joins_both_producers() {
        let (_state_tx, state_rx) = watch::channel(SessionState::active(
            "s-9".into(),
            Duration::from_secs(10),
        ));
        let (_rules_tx, rules_rx) = watch::channel(Arc::new(RuleSet::new(
            vec![AllowlistRule::new(RuleKind::Application, "Cursor", "coding")],
            Utc::now(),
        )));
        let sink = Arc::new(RecordingSink::default());
        let ctx = ProducerContext {
            observer: Arc::new(ScriptedObserver::fixed(ContextSnapshot::new("Cursor", "lib.rs"))),
            capturer: Arc::new(StaticCapturer::default()),
            sink: sink.clone(),
            matcher: Matcher::new(MatchConfig::default()),
            state: state_rx,
            rules: rules_rx,
            unknown_context: Arc::new(WarnOnce::new()),
        };

        let parent = CancellationToken::new();
        let mut controller = SensingController::new();
        controller
            .start_producers(ctx.clone(), Duration::from_secs(5), &parent)
            .unwrap();
        assert!(controller.is_active());
        assert!(controller
            .start_producers(ctx, Duration::from_secs(5), &parent)
            .is_err());

        tokio::time::sleep(Duration::from_secs(1)).await;
        controller
            .stop_producers(Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!controller.is_active());
        assert_eq!(sink.screenshots(), 1);
        assert_eq!(sink.activity_changes(), 1);
    }
}
