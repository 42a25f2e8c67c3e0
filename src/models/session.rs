use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Agent-local view of the capture session.
///
/// Published as a whole value through a `watch` channel; producers clone the
/// current snapshot on every tick so `running` and `capture_interval` are
/// always read together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub running: bool,
    pub capture_interval: Duration,
    pub session_id: Option<String>,
}

impl SessionState {
    pub fn idle(capture_interval: Duration) -> Self {
        Self {
            running: false,
            capture_interval,
            session_id: None,
        }
    }

    pub fn active(session_id: String, capture_interval: Duration) -> Self {
        Self {
            running: true,
            capture_interval,
            session_id: Some(session_id),
        }
    }
}

/// Session as reported by `GET /monitoring/sessions/current`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteSession {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub screenshot_interval: Option<u64>,
}

impl RemoteSession {
    pub fn capture_interval(&self, fallback: Duration) -> Duration {
        match self.screenshot_interval {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => fallback,
        }
    }
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(value) => value.to_string(),
        RawId::Text(value) => value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_session_accepts_numeric_ids() {
        let session: RemoteSession =
            serde_json::from_value(json!({"id": 42, "is_active": true})).unwrap();
        assert_eq!(session.id, "42");
        assert!(session.is_active);
        assert_eq!(
            session.capture_interval(Duration::from_secs(10)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn remote_session_interval_overrides_fallback() {
        let session: RemoteSession = serde_json::from_value(
            json!({"id": "s-1", "is_active": true, "screenshot_interval": 30}),
        )
        .unwrap();
        assert_eq!(
            session.capture_interval(Duration::from_secs(10)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn zero_interval_falls_back() {
        let session = RemoteSession {
            id: "1".into(),
            is_active: true,
            screenshot_interval: Some(0),
        };
        assert_eq!(
            session.capture_interval(Duration::from_secs(10)),
            Duration::from_secs(10)
        );
    }
}
