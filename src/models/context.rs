use serde::{Deserialize, Serialize};

const UNKNOWN_APPLICATION: &str = "Unknown";

/// Foreground application and window as reported by the OS at one instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub application_name: String,
    pub window_title: String,
}

impl ContextSnapshot {
    pub fn new(application_name: impl Into<String>, window_title: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            window_title: window_title.into(),
        }
    }

    /// Sentinel returned when the OS query failed, was denied or timed out.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_APPLICATION, "")
    }

    pub fn is_unknown(&self) -> bool {
        self.application_name == UNKNOWN_APPLICATION && self.window_title.is_empty()
    }
}

/// Matcher verdict for a single observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CaptureDecision {
    pub should_capture: bool,
    pub routing_key: Option<String>,
    pub label: Option<String>,
}

impl CaptureDecision {
    pub fn skip() -> Self {
        Self::default()
    }

    pub fn capture(routing_key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            should_capture: true,
            routing_key: Some(routing_key.into()),
            label: Some(label.into()),
        }
    }
}
