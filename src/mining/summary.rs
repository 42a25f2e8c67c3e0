use std::collections::HashMap;

use serde::Serialize;

use crate::models::{ActivityChangeEvent, ActivityKind};

const TOP_APPLICATIONS: usize = 10;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ApplicationUsage {
    pub name: String,
    pub count: u64,
}

/// Roll-up of a session's activity changes, allowlisted or not.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ActivitySummary {
    pub total_activities: usize,
    pub unique_applications: usize,
    pub allowlisted_activities: usize,
    pub top_applications: Vec<ApplicationUsage>,
}

fn usage_key(change: &ActivityChangeEvent) -> &str {
    match (change.kind, change.url.as_deref()) {
        (ActivityKind::Website, Some(url)) if !url.is_empty() => url,
        _ => &change.application_name,
    }
}

pub fn summarize_activity(changes: &[ActivityChangeEvent]) -> ActivitySummary {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for change in changes {
        let key = usage_key(change);
        let count = counts.entry(key).or_insert(0);
        if *count == 0 {
            order.push(key);
        }
        *count += 1;
    }

    let mut top_applications: Vec<ApplicationUsage> = order
        .iter()
        .map(|name| ApplicationUsage {
            name: name.to_string(),
            count: counts.get(name).copied().unwrap_or_default(),
        })
        .collect();
    top_applications.sort_by(|a, b| b.count.cmp(&a.count));
    top_applications.truncate(TOP_APPLICATIONS);

    ActivitySummary {
        total_activities: changes.len(),
        unique_applications: order.len(),
        allowlisted_activities: changes.iter().filter(|change| change.in_allowlist).count(),
        top_applications,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn change(kind: ActivityKind, app: &str, url: Option<&str>, allowlisted: bool) -> ActivityChangeEvent {
        ActivityChangeEvent {
            timestamp: Utc::now(),
            kind,
            application_name: app.into(),
            window_title: String::new(),
            url: url.map(str::to_string),
            in_allowlist: allowlisted,
        }
    }

    #[test]
    fn websites_are_keyed_by_url() {
        let changes = vec![
            change(ActivityKind::Application, "Cursor", None, true),
            change(ActivityKind::Website, "Google Chrome", Some("github.com/org/repo"), true),
            change(ActivityKind::Website, "Google Chrome", Some("news.ycombinator.com"), false),
            change(ActivityKind::Application, "Cursor", None, true),
            change(ActivityKind::Application, "Slack", None, false),
        ];

        let summary = summarize_activity(&changes);
        assert_eq!(summary.total_activities, 5);
        assert_eq!(summary.unique_applications, 4);
        assert_eq!(summary.allowlisted_activities, 3);
        assert_eq!(
            summary.top_applications[0],
            ApplicationUsage {
                name: "Cursor".into(),
                count: 2
            }
        );
        assert_eq!(summary.top_applications[1].name, "github.com/org/repo");
    }

    #[test]
    fn empty_input_is_an_empty_summary() {
        assert_eq!(summarize_activity(&[]), ActivitySummary::default());
    }
}
