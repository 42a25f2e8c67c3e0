use serde::{Deserialize, Serialize};

pub const GENERAL_ROUTING_KEY: &str = "general_activity";
pub const GENERAL_LABEL: &str = "General Activity";

/// What the matcher does when the organisation has no active rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmptyRuleSetPolicy {
    /// Nothing is captured until a manager configures at least one rule.
    #[default]
    CaptureNothing,
    /// Everything is captured into the general bucket.
    CaptureAll,
}

/// Tunables for the allowlist matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchConfig {
    pub empty_rule_set: EmptyRuleSetPolicy,

    /// Application names treated as web browsers for `Url` rules.
    pub browsers: Vec<String>,

    /// Words ignored by the word-set fallback of `Application` rules.
    pub stopwords: Vec<String>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            empty_rule_set: EmptyRuleSetPolicy::CaptureNothing,
            browsers: ["chrome", "chromium", "firefox", "safari", "edge", "opera", "brave"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
            stopwords: ["the", "a", "an", "app", "application", "and", "of"]
                .iter()
                .map(|word| word.to_string())
                .collect(),
        }
    }
}

impl MatchConfig {
    pub fn with_empty_rule_set(mut self, policy: EmptyRuleSetPolicy) -> Self {
        self.empty_rule_set = policy;
        self
    }
}
