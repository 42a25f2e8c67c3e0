use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::matching::{EmptyRuleSetPolicy, MatchConfig};

const API_URL_ENV: &str = "FLOWTRACE_API_URL";
const TOKEN_ENV: &str = "FLOWTRACE_TOKEN";

/// Agent configuration, built once at startup and passed down explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSettings {
    pub api_url: String,
    /// Bearer token used to fetch the stored agent credentials.
    pub bootstrap_token: Option<String>,
    pub session_poll_secs: u64,
    pub rule_refresh_secs: u64,
    pub activity_interval_secs: u64,
    pub default_capture_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub upload_timeout_secs: u64,
    pub observer_timeout_secs: u64,
    pub empty_rule_set_policy: EmptyRuleSetPolicy,
    /// When set, every emitted event is also kept in a local SQLite store.
    pub local_store_path: Option<PathBuf>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".into(),
            bootstrap_token: None,
            session_poll_secs: 5,
            rule_refresh_secs: 30,
            activity_interval_secs: 5,
            default_capture_interval_secs: 10,
            request_timeout_secs: 10,
            upload_timeout_secs: 30,
            observer_timeout_secs: 2,
            empty_rule_set_policy: EmptyRuleSetPolicy::CaptureNothing,
            local_store_path: None,
        }
    }
}

impl AgentSettings {
    /// Read settings from `path` (defaults when the file does not exist) and
    /// apply the environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = Self::from_file(path)?;
        settings.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(API_URL_ENV).filter(|value| !value.trim().is_empty()) {
            self.api_url = url;
        }
        if let Some(token) = lookup(TOKEN_ENV).filter(|value| !value.trim().is_empty()) {
            self.bootstrap_token = Some(token);
        }
    }

    pub fn session_poll_interval(&self) -> Duration {
        secs_at_least_one(self.session_poll_secs)
    }

    pub fn rule_refresh_interval(&self) -> Duration {
        secs_at_least_one(self.rule_refresh_secs)
    }

    pub fn activity_interval(&self) -> Duration {
        secs_at_least_one(self.activity_interval_secs)
    }

    pub fn default_capture_interval(&self) -> Duration {
        secs_at_least_one(self.default_capture_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        secs_at_least_one(self.request_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        secs_at_least_one(self.upload_timeout_secs)
    }

    pub fn observer_timeout(&self) -> Duration {
        secs_at_least_one(self.observer_timeout_secs)
    }

    pub fn match_config(&self) -> MatchConfig {
        MatchConfig::default().with_empty_rule_set(self.empty_rule_set_policy)
    }
}

fn secs_at_least_one(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}
