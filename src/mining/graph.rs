//! Directly-follows graph over the labels of a session's screenshots.
//!
//! Consecutive equal labels collapse into one visit: they add to the node
//! count but never produce an edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::CapturedEvent;

pub const START: &str = "START";
pub const END: &str = "END";

/// A labeled (allowlisted) capture, the reconstructor's unit of input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabeledEvent {
    pub timestamp: DateTime<Utc>,
    pub label: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GraphNode {
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub count: u64,
}

/// One individual transition; `ordinal` is the 1-based position of `from`
/// in the label sequence.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TransitionStep {
    pub from: String,
    pub to: String,
    pub ordinal: usize,
}

/// Synthetic entry/exit edge, always weight 1.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BoundaryEdge {
    pub from: String,
    pub to: String,
    pub weight: u64,
}

/// Nodes and edges are kept in order of first appearance so output is stable.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DirectlyFollowsGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub transition_sequence: Vec<TransitionStep>,
    pub start: Option<BoundaryEdge>,
    pub end: Option<BoundaryEdge>,
}

impl DirectlyFollowsGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self, label: &str) -> Option<u64> {
        self.nodes
            .iter()
            .find(|node| node.label == label)
            .map(|node| node.count)
    }

    pub fn edge_count(&self, from: &str, to: &str) -> Option<u64> {
        self.edges
            .iter()
            .find(|edge| edge.from == from && edge.to == to)
            .map(|edge| edge.count)
    }

    pub fn max_node_count(&self) -> u64 {
        self.nodes.iter().map(|node| node.count).max().unwrap_or(0)
    }

    pub fn max_edge_count(&self) -> u64 {
        self.edges.iter().map(|edge| edge.count).max().unwrap_or(0)
    }

    pub fn total_transitions(&self) -> u64 {
        self.edges.iter().map(|edge| edge.count).sum()
    }
}

/// Frequency band relative to the maximum of the same category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyBand {
    High,
    Medium,
    Low,
}

impl FrequencyBand {
    pub fn classify(count: u64, max: u64) -> Self {
        if max == 0 {
            return FrequencyBand::Low;
        }
        let ratio = count as f64 / max as f64;
        if ratio >= 0.7 {
            FrequencyBand::High
        } else if ratio >= 0.3 {
            FrequencyBand::Medium
        } else {
            FrequencyBand::Low
        }
    }
}

/// Labeled screenshots of a mixed event stream, in timestamp order.
/// Activity changes carry no label and are left out.
pub fn project(events: &[CapturedEvent]) -> Vec<LabeledEvent> {
    let mut labeled: Vec<LabeledEvent> = events
        .iter()
        .filter_map(|event| match event {
            CapturedEvent::Screenshot(shot) => Some(LabeledEvent {
                timestamp: shot.timestamp,
                label: shot.label.clone(),
                routing_key: shot.routing_key.clone(),
            }),
            CapturedEvent::ActivityChange(_) => None,
        })
        .collect();
    labeled.sort_by_key(|event| event.timestamp);
    labeled
}

/// Build the graph from labeled events. Input is re-sorted by timestamp
/// (stable, so equal timestamps keep their given order).
pub fn build(events: &[LabeledEvent]) -> DirectlyFollowsGraph {
    let mut ordered: Vec<&LabeledEvent> = events.iter().collect();
    ordered.sort_by_key(|event| event.timestamp);
    build_from_labels(ordered.iter().map(|event| event.label.as_str()))
}

/// Build the graph from an already ordered label sequence.
pub fn build_from_labels<I, S>(labels: I) -> DirectlyFollowsGraph
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let sequence: Vec<String> = labels
        .into_iter()
        .map(|label| label.as_ref().to_string())
        .collect();

    let mut graph = DirectlyFollowsGraph::default();
    let (Some(first), Some(last)) = (sequence.first(), sequence.last()) else {
        return graph;
    };

    for label in &sequence {
        match graph.nodes.iter_mut().find(|node| &node.label == label) {
            Some(node) => node.count += 1,
            None => graph.nodes.push(GraphNode {
                label: label.clone(),
                count: 1,
            }),
        }
    }

    for (index, pair) in sequence.windows(2).enumerate() {
        let (from, to) = (&pair[0], &pair[1]);
        if from == to {
            continue;
        }
        match graph
            .edges
            .iter_mut()
            .find(|edge| &edge.from == from && &edge.to == to)
        {
            Some(edge) => edge.count += 1,
            None => graph.edges.push(GraphEdge {
                from: from.clone(),
                to: to.clone(),
                count: 1,
            }),
        }
        graph.transition_sequence.push(TransitionStep {
            from: from.clone(),
            to: to.clone(),
            ordinal: index + 1,
        });
    }

    graph.start = Some(BoundaryEdge {
        from: START.to_string(),
        to: first.clone(),
        weight: 1,
    });
    graph.end = Some(BoundaryEdge {
        from: last.clone(),
        to: END.to_string(),
        weight: 1,
    });
    graph
}
