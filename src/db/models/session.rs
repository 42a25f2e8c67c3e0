use chrono::{DateTime, Utc};
use serde::Serialize;

/// A session as seen by the local store: created on its first event.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub id: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub screenshot_count: u64,
    pub activity_count: u64,
}
