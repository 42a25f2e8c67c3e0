use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{RemoteSession, SessionState};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Active,
}

/// What the synchronizer must do after one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Start {
        session_id: String,
        capture_interval: Duration,
    },
    /// A different session replaced the one being captured between polls.
    Restart {
        session_id: String,
        capture_interval: Duration,
    },
    UpdateInterval(Duration),
    Stop,
    Unchanged,
}

/// Compare the server's view with the local one.
///
/// `remote` is `None` when the server reports no session or an inactive one.
pub fn reconcile(
    phase: SyncPhase,
    current: &SessionState,
    remote: Option<&RemoteSession>,
    fallback_interval: Duration,
) -> Transition {
    let remote = remote.filter(|session| session.is_active);

    match (phase, remote) {
        (SyncPhase::Idle, None) => Transition::Unchanged,
        (SyncPhase::Active, None) => Transition::Stop,
        (SyncPhase::Idle, Some(session)) => Transition::Start {
            session_id: session.id.clone(),
            capture_interval: session.capture_interval(fallback_interval),
        },
        (SyncPhase::Active, Some(session)) => {
            let capture_interval = session.capture_interval(fallback_interval);
            if current.session_id.as_deref() != Some(session.id.as_str()) {
                Transition::Restart {
                    session_id: session.id.clone(),
                    capture_interval,
                }
            } else if current.capture_interval != capture_interval {
                Transition::UpdateInterval(capture_interval)
            } else {
                Transition::Unchanged
            }
        }
    }
}
