//! Allowlist rule data model.
//!
//! Rules are owned by the server. The agent only ever holds a read-only
//! `RuleSet` snapshot which is replaced wholesale on every refresh.

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Application,
    Url,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowlistRule {
    pub kind: RuleKind,
    pub pattern: String,
    pub routing_key: String,
    pub active: bool,
}

impl AllowlistRule {
    pub fn new(kind: RuleKind, pattern: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
            routing_key: routing_key.into(),
            active: true,
        }
    }
}

/// Rule entry as served by `GET /monitoring-config/active`.
#[derive(Debug, Deserialize)]
struct WireRule {
    config_type: RuleKind,
    pattern: String,
    folder_name: String,
    #[serde(default = "default_active")]
    is_active: bool,
}

fn default_active() -> bool {
    true
}

impl TryFrom<WireRule> for AllowlistRule {
    type Error = anyhow::Error;

    fn try_from(wire: WireRule) -> Result<Self, Self::Error> {
        let pattern = wire.pattern.trim();
        let routing_key = wire.folder_name.trim();
        if pattern.is_empty() {
            anyhow::bail!("rule has an empty pattern");
        }
        if routing_key.is_empty() {
            anyhow::bail!("rule '{pattern}' has an empty routing key");
        }

        Ok(Self {
            kind: wire.config_type,
            pattern: pattern.to_string(),
            routing_key: routing_key.to_string(),
            active: wire.is_active,
        })
    }
}

/// Immutable snapshot of the organisation's allowlist, in server order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    rules: Vec<AllowlistRule>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl RuleSet {
    pub fn new(rules: Vec<AllowlistRule>, refreshed_at: DateTime<Utc>) -> Self {
        Self {
            rules,
            refreshed_at: Some(refreshed_at),
        }
    }

    /// Decode a raw rule listing. Malformed entries are dropped with a warning
    /// and never prevent the remaining entries from loading.
    pub fn from_wire(entries: Vec<serde_json::Value>, refreshed_at: DateTime<Utc>) -> Self {
        let mut rules = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let decoded = serde_json::from_value::<WireRule>(entry)
                .map_err(anyhow::Error::from)
                .and_then(AllowlistRule::try_from);
            match decoded {
                Ok(rule) => rules.push(rule),
                Err(err) => warn!("skipping malformed allowlist rule #{index}: {err}"),
            }
        }
        Self::new(rules, refreshed_at)
    }

    pub fn rules(&self) -> &[AllowlistRule] {
        &self.rules
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_wire_keeps_server_order() {
        let rules = RuleSet::from_wire(
            vec![
                json!({"config_type": "url", "pattern": "github.com", "folder_name": "GitHub"}),
                json!({"config_type": "application", "pattern": "Cursor", "folder_name": "Cursor", "is_active": true}),
            ],
            Utc::now(),
        );

        assert_eq!(rules.len(), 2);
        assert_eq!(rules.rules()[0].kind, RuleKind::Url);
        assert_eq!(rules.rules()[1].routing_key, "Cursor");
        assert!(rules.refreshed_at().is_some());
    }

    #[test]
    fn from_wire_skips_malformed_entries() {
        let rules = RuleSet::from_wire(
            vec![
                json!({"config_type": "folder", "pattern": "x", "folder_name": "y"}),
                json!({"config_type": "application", "pattern": "   ", "folder_name": "y"}),
                json!({"config_type": "application", "pattern": "Slack"}),
                json!("not an object"),
                json!({"config_type": "application", "pattern": "Slack", "folder_name": "Chat", "is_active": false}),
            ],
            Utc::now(),
        );

        assert_eq!(rules.len(), 1);
        assert_eq!(rules.rules()[0].pattern, "Slack");
        assert!(!rules.rules()[0].active);
    }

    #[test]
    fn default_rule_set_is_empty_and_never_refreshed() {
        let rules = RuleSet::default();
        assert!(rules.is_empty());
        assert!(rules.refreshed_at().is_none());
    }
}
