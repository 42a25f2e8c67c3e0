use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::warn;

use crate::models::CapturedEvent;

/// Destination for captured events. Delivery is at-most-once: a failed submit
/// is reported to the caller and never retried.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn submit(&self, session_id: &str, event: &CapturedEvent) -> Result<()>;
}

/// Forwards every event to each target independently; succeeds when at least
/// one target accepted it.
pub struct FanoutSink {
    targets: Vec<(&'static str, Arc<dyn EventSink>)>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
        }
    }

    pub fn with_target(mut self, name: &'static str, target: Arc<dyn EventSink>) -> Self {
        self.targets.push((name, target));
        self
    }
}

impl Default for FanoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    async fn submit(&self, session_id: &str, event: &CapturedEvent) -> Result<()> {
        let mut delivered = 0usize;
        let mut last_error = None;

        for (name, target) in &self.targets {
            match target.submit(session_id, event).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!("{name} sink rejected {} event: {err:#}", event.kind_name());
                    last_error = Some(err);
                }
            }
        }

        match (delivered, last_error) {
            (0, Some(err)) => Err(err),
            (0, None) => Err(anyhow!("no event sinks configured")),
            _ => Ok(()),
        }
    }
}
