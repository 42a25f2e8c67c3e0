use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row, Transaction};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, to_u64},
    models::StoredSession,
};

const SESSION_COLUMNS: &str = "s.id, s.first_seen_at, s.last_event_at,
    (SELECT COUNT(*) FROM screenshots WHERE session_id = s.id) AS screenshot_count,
    (SELECT COUNT(*) FROM activities WHERE session_id = s.id) AS activity_count";

fn row_to_session(row: &Row) -> Result<StoredSession> {
    let first_seen_at: String = row.get("first_seen_at")?;
    let last_event_at: String = row.get("last_event_at")?;
    let screenshot_count: i64 = row.get("screenshot_count")?;
    let activity_count: i64 = row.get("activity_count")?;

    Ok(StoredSession {
        id: row.get("id")?,
        first_seen_at: parse_datetime(&first_seen_at, "first_seen_at")?,
        last_event_at: parse_datetime(&last_event_at, "last_event_at")?,
        screenshot_count: to_u64(screenshot_count, "screenshot_count")?,
        activity_count: to_u64(activity_count, "activity_count")?,
    })
}

/// Create the session row on first sight, otherwise widen its
/// `first_seen_at..last_event_at` span. Producers insert out of order.
pub(crate) fn touch_session(tx: &Transaction<'_>, session_id: &str, at: &str) -> Result<()> {
    tx.execute(
        "INSERT INTO sessions (id, first_seen_at, last_event_at)
         VALUES (?1, ?2, ?2)
         ON CONFLICT(id) DO UPDATE SET
             first_seen_at = MIN(first_seen_at, excluded.first_seen_at),
             last_event_at = MAX(last_event_at, excluded.last_event_at)",
        params![session_id, at],
    )?;
    Ok(())
}

pub(crate) fn session_exists_in(conn: &rusqlite::Connection, session_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sessions WHERE id = ?1",
            params![session_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

impl Database {
    pub async fn session_exists(&self, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        self.execute(move |conn| session_exists_in(conn, &session_id))
            .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<StoredSession>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions s WHERE s.id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![session_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Most recently active first.
    pub async fn list_sessions(&self) -> Result<Vec<StoredSession>> {
        self.execute(|conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions s ORDER BY s.last_event_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }
}
