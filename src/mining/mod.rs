pub mod export;
pub mod graph;
pub mod render;
pub mod summary;

use serde::Serialize;
use thiserror::Error;

use crate::db::Database;

pub use export::{event_log_csv, ProcessStatistics};
pub use graph::{build, build_from_labels, project, DirectlyFollowsGraph, FrequencyBand, LabeledEvent};
pub use render::render_dot;
pub use summary::{summarize_activity, ActivitySummary};

#[derive(Debug, Error)]
pub enum ReconstructError {
    #[error("session {0} not found in the event store")]
    SessionNotFound(String),

    #[error("event store error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Everything reconstructed for one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub events: Vec<LabeledEvent>,
    pub graph: DirectlyFollowsGraph,
    pub activity: ActivitySummary,
}

impl SessionReport {
    pub fn from_events(
        session_id: impl Into<String>,
        events: Vec<LabeledEvent>,
        activity: ActivitySummary,
    ) -> Self {
        let graph = build(&events);
        Self {
            session_id: session_id.into(),
            events,
            graph,
            activity,
        }
    }

    pub fn statistics(&self) -> ProcessStatistics {
        ProcessStatistics::from_graph(&self.graph, self.events.len())
    }

    pub fn to_dot(&self) -> String {
        render_dot(&self.graph)
    }

    pub fn event_log_csv(&self) -> String {
        event_log_csv(&self.session_id, &self.events)
    }
}

/// Pull a session from the local store and build its report. A session that
/// exists but captured nothing yields an empty graph, not an error.
pub async fn reconstruct_session(
    store: &Database,
    session_id: &str,
) -> Result<SessionReport, ReconstructError> {
    let events = store
        .labeled_events(session_id)
        .await?
        .ok_or_else(|| ReconstructError::SessionNotFound(session_id.to_string()))?;
    let changes = store
        .activity_changes(session_id)
        .await?
        .unwrap_or_default();

    Ok(SessionReport::from_events(
        session_id,
        events,
        summarize_activity(&changes),
    ))
}
