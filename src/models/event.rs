//! Captured event data model.
//!
//! Both producers feed one conceptual stream of `CapturedEvent`s. Events are
//! append-only once emitted; the sink takes ownership of the payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Application,
    Website,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Application => "application",
            ActivityKind::Website => "website",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "application" => Some(ActivityKind::Application),
            "website" => Some(ActivityKind::Website),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreenshotEvent {
    pub timestamp: DateTime<Utc>,
    pub routing_key: String,
    pub label: String,
    #[serde(skip)]
    pub image_bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityChangeEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    pub application_name: String,
    pub window_title: String,
    pub url: Option<String>,
    pub in_allowlist: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CapturedEvent {
    Screenshot(ScreenshotEvent),
    ActivityChange(ActivityChangeEvent),
}

impl CapturedEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CapturedEvent::Screenshot(shot) => shot.timestamp,
            CapturedEvent::ActivityChange(change) => change.timestamp,
        }
    }

    /// Process-mining activity label. Only allowlisted screenshots carry one.
    pub fn label(&self) -> Option<&str> {
        match self {
            CapturedEvent::Screenshot(shot) => Some(shot.label.as_str()),
            CapturedEvent::ActivityChange(_) => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            CapturedEvent::Screenshot(_) => "screenshot",
            CapturedEvent::ActivityChange(_) => "activity",
        }
    }
}
