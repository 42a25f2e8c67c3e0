//! In-process stand-ins for the OS-facing traits, used by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{CapturedEvent, ContextSnapshot};

use super::{ContextObserver, EventSink, ScreenCapturer};

/// Replays a script of snapshots; the last one repeats forever.
#[derive(Default)]
pub struct ScriptedObserver {
    script: Mutex<VecDeque<ContextSnapshot>>,
    last: Mutex<Option<ContextSnapshot>>,
}

impl ScriptedObserver {
    pub fn new(script: Vec<ContextSnapshot>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
        }
    }

    pub fn fixed(snapshot: ContextSnapshot) -> Self {
        Self::new(vec![snapshot])
    }
}

#[async_trait]
impl ContextObserver for ScriptedObserver {
    async fn observe(&self) -> ContextSnapshot {
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(snapshot) = next {
            *last = Some(snapshot);
        }
        last.clone().unwrap_or_else(ContextSnapshot::unknown)
    }
}

/// Returns the same bytes on every call and counts invocations.
#[derive(Default)]
pub struct StaticCapturer {
    calls: Mutex<usize>,
    fail: bool,
}

impl StaticCapturer {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ScreenCapturer for StaticCapturer {
    async fn capture(&self) -> Result<Vec<u8>> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            bail!("display unavailable");
        }
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, CapturedEvent)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<(String, CapturedEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn screenshots(&self) -> usize {
        self.events()
            .iter()
            .filter(|(_, event)| matches!(event, CapturedEvent::Screenshot(_)))
            .count()
    }

    pub fn activity_changes(&self) -> usize {
        self.events()
            .iter()
            .filter(|(_, event)| matches!(event, CapturedEvent::ActivityChange(_)))
            .count()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn submit(&self, session_id: &str, event: &CapturedEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((session_id.to_string(), event.clone()));
        Ok(())
    }
}
