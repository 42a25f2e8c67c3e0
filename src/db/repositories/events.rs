use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_datetime, parse_kind, to_i64},
};
use crate::mining::LabeledEvent;
use crate::models::{ActivityChangeEvent, CapturedEvent};
use crate::sensing::EventSink;

use super::sessions::{session_exists_in, touch_session};

fn row_to_labeled(row: &Row) -> Result<LabeledEvent> {
    let captured_at: String = row.get("captured_at")?;
    Ok(LabeledEvent {
        timestamp: parse_datetime(&captured_at, "captured_at")?,
        label: row.get("label")?,
        routing_key: row.get("routing_key")?,
    })
}

fn row_to_activity(row: &Row) -> Result<ActivityChangeEvent> {
    let observed_at: String = row.get("observed_at")?;
    let kind: String = row.get("kind")?;
    Ok(ActivityChangeEvent {
        timestamp: parse_datetime(&observed_at, "observed_at")?,
        kind: parse_kind(&kind)?,
        application_name: row.get("application_name")?,
        window_title: row.get("window_title")?,
        url: row.get("url")?,
        in_allowlist: row.get("in_allowlist")?,
    })
}

impl Database {
    /// Append one event, creating the session row on first sight.
    pub async fn insert_event(&self, session_id: &str, event: &CapturedEvent) -> Result<()> {
        let session_id = session_id.to_string();
        let record = event.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let at = format_timestamp(&record.timestamp());
            touch_session(&tx, &session_id, &at)?;

            match &record {
                CapturedEvent::Screenshot(shot) => {
                    tx.execute(
                        "INSERT INTO screenshots (id, session_id, captured_at, routing_key, label, image_png, byte_len)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            Uuid::new_v4().to_string(),
                            session_id,
                            at,
                            shot.routing_key,
                            shot.label,
                            shot.image_bytes,
                            to_i64(shot.image_bytes.len() as u64)?,
                        ],
                    )?;
                }
                CapturedEvent::ActivityChange(change) => {
                    tx.execute(
                        "INSERT INTO activities (id, session_id, observed_at, kind, application_name, window_title, url, in_allowlist)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            Uuid::new_v4().to_string(),
                            session_id,
                            at,
                            change.kind.as_str(),
                            change.application_name,
                            change.window_title,
                            change.url,
                            change.in_allowlist,
                        ],
                    )?;
                }
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Screenshot labels of a session in capture order, or `None` when the
    /// session was never recorded.
    pub async fn labeled_events(&self, session_id: &str) -> Result<Option<Vec<LabeledEvent>>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            if !session_exists_in(conn, &session_id)? {
                return Ok(None);
            }
            let mut stmt = conn.prepare(
                "SELECT captured_at, label, routing_key
                 FROM screenshots
                 WHERE session_id = ?1
                 ORDER BY captured_at ASC, rowid ASC",
            )?;
            let mut rows = stmt.query(params![session_id])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_labeled(row)?);
            }
            Ok(Some(events))
        })
        .await
    }

    pub async fn activity_changes(
        &self,
        session_id: &str,
    ) -> Result<Option<Vec<ActivityChangeEvent>>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            if !session_exists_in(conn, &session_id)? {
                return Ok(None);
            }
            let mut stmt = conn.prepare(
                "SELECT observed_at, kind, application_name, window_title, url, in_allowlist
                 FROM activities
                 WHERE session_id = ?1
                 ORDER BY observed_at ASC, rowid ASC",
            )?;
            let mut rows = stmt.query(params![session_id])?;
            let mut changes = Vec::new();
            while let Some(row) = rows.next()? {
                changes.push(row_to_activity(row)?);
            }
            Ok(Some(changes))
        })
        .await
    }
}

#[async_trait]
impl EventSink for Database {
    async fn submit(&self, session_id: &str, event: &CapturedEvent) -> Result<()> {
        self.insert_event(session_id, event).await
    }
}
