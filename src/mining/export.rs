use std::collections::BTreeMap;

use chrono::SecondsFormat;
use serde::Serialize;

use super::graph::{DirectlyFollowsGraph, GraphEdge, LabeledEvent, TransitionStep};

const TOP_TRANSITIONS: usize = 10;

pub fn case_id(session_id: &str) -> String {
    format!("session_{session_id}")
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Event log for external process-mining tools: `CaseID,Timestamp,Activity,Folder`.
pub fn event_log_csv(session_id: &str, events: &[LabeledEvent]) -> String {
    let case = csv_field(&case_id(session_id));
    let mut out = String::from("CaseID,Timestamp,Activity,Folder\n");
    for event in events {
        out.push_str(&case);
        out.push(',');
        out.push_str(&event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true));
        out.push(',');
        out.push_str(&csv_field(&event.label));
        out.push(',');
        out.push_str(&csv_field(&event.routing_key));
        out.push('\n');
    }
    out
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessStatistics {
    pub total_activities: usize,
    pub unique_activities: usize,
    pub total_transitions: u64,
    pub activity_distribution: BTreeMap<String, u64>,
    pub top_transitions: Vec<GraphEdge>,
    pub transition_sequence: Vec<TransitionStep>,
    pub start_activity: Option<String>,
    pub end_activity: Option<String>,
}

impl ProcessStatistics {
    pub fn from_graph(graph: &DirectlyFollowsGraph, total_activities: usize) -> Self {
        let mut top_transitions = graph.edges.clone();
        // Stable: ties keep first-appearance order.
        top_transitions.sort_by(|a, b| b.count.cmp(&a.count));
        top_transitions.truncate(TOP_TRANSITIONS);

        Self {
            total_activities,
            unique_activities: graph.nodes.len(),
            total_transitions: graph.total_transitions(),
            activity_distribution: graph
                .nodes
                .iter()
                .map(|node| (node.label.clone(), node.count))
                .collect(),
            top_transitions,
            transition_sequence: graph.transition_sequence.clone(),
            start_activity: graph.start.as_ref().map(|edge| edge.to.clone()),
            end_activity: graph.end.as_ref().map(|edge| edge.from.clone()),
        }
    }
}
