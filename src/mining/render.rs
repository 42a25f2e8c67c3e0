use std::fmt::Write as _;

use super::graph::{DirectlyFollowsGraph, FrequencyBand, END, START};

const START_FILL: &str = "#4CAF50";
const END_FILL: &str = "#F44336";
const HIGH_FREQ: &str = "#2196F3";
const MEDIUM_FREQ: &str = "#64B5F6";
const LOW_FREQ: &str = "#BBDEFB";
const BOUNDARY_EDGE: &str = "#607D8B";
const EDGE_FONT: &str = "#424242";

// Internal ids so an activity literally named START cannot collide.
const START_ID: &str = "__start__";
const END_ID: &str = "__end__";

fn band_color(band: FrequencyBand) -> &'static str {
    match band {
        FrequencyBand::High => HIGH_FREQ,
        FrequencyBand::Medium => MEDIUM_FREQ,
        FrequencyBand::Low => LOW_FREQ,
    }
}

fn band_pen_width(band: FrequencyBand) -> &'static str {
    match band {
        FrequencyBand::High => "4.0",
        FrequencyBand::Medium => "2.5",
        FrequencyBand::Low => "1.5",
    }
}

fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

fn node_id(label: &str) -> String {
    quote(&format!("act:{label}"))
}

/// Render the graph as Graphviz DOT, left to right.
///
/// Node fill and edge pen width follow each item's frequency band; an empty
/// graph renders a single "No Activity Data" node.
pub fn render_dot(graph: &DirectlyFollowsGraph) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_dot(&mut out, graph);
    out
}

fn write_dot(out: &mut String, graph: &DirectlyFollowsGraph) -> std::fmt::Result {
    writeln!(out, "digraph process_map {{")?;
    writeln!(
        out,
        "  graph [rankdir=LR, splines=curved, nodesep=0.8, ranksep=1.5, bgcolor=\"#f8f9fa\", fontname=\"Arial\", pad=0.5];"
    )?;
    writeln!(out, "  node [fontname=\"Arial\", fontsize=11];")?;
    writeln!(out, "  edge [fontname=\"Arial\", fontsize=10];")?;

    if graph.is_empty() {
        writeln!(
            out,
            "  no_data [label=\"No Activity Data\", shape=box, style=\"filled,rounded\", fillcolor=\"#E0E0E0\", color=\"#9E9E9E\"];"
        )?;
        return writeln!(out, "}}");
    }

    for (id, label, fill) in [(START_ID, START, START_FILL), (END_ID, END, END_FILL)] {
        writeln!(
            out,
            "  {id} [label={}, shape=circle, style=filled, fillcolor=\"{fill}\", fontcolor=white, width=0.8, height=0.8, fixedsize=true];",
            quote(label)
        )?;
    }

    let max_node = graph.max_node_count();
    for node in &graph.nodes {
        let fill = band_color(FrequencyBand::classify(node.count, max_node));
        writeln!(
            out,
            "  {} [label={}, shape=box, style=\"filled,rounded\", fillcolor=\"{fill}\", fontcolor=white, color=\"#1976D2\", penwidth=2, margin=\"0.3,0.2\"];",
            node_id(&node.label),
            quote(&format!("{}\n({})", node.label, node.count)),
        )?;
    }

    if let Some(start) = &graph.start {
        writeln!(
            out,
            "  {START_ID} -> {} [label=\"{}\", color=\"{BOUNDARY_EDGE}\", penwidth=1.5, fontcolor=\"{EDGE_FONT}\"];",
            node_id(&start.to),
            start.weight
        )?;
    }
    if let Some(end) = &graph.end {
        writeln!(
            out,
            "  {} -> {END_ID} [label=\"{}\", color=\"{BOUNDARY_EDGE}\", penwidth=1.5, fontcolor=\"{EDGE_FONT}\"];",
            node_id(&end.from),
            end.weight
        )?;
    }

    let max_edge = graph.max_edge_count();
    for edge in &graph.edges {
        let band = FrequencyBand::classify(edge.count, max_edge);
        writeln!(
            out,
            "  {} -> {} [label=\"{}\", penwidth={}, color=\"{}\", fontcolor=\"{EDGE_FONT}\"];",
            node_id(&edge.from),
            node_id(&edge.to),
            edge.count,
            band_pen_width(band),
            band_color(band),
        )?;
    }

    writeln!(out, "}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::graph::build_from_labels;

    #[test]
    fn empty_graph_renders_placeholder() {
        let dot = render_dot(&DirectlyFollowsGraph::default());
        assert!(dot.contains("No Activity Data"));
        assert!(!dot.contains(START_ID));
    }

    #[test]
    fn nodes_and_edges_carry_counts_and_bands() {
        let dot = render_dot(&build_from_labels([
            "Cursor", "ChatGPT", "Cursor", "Slack", "Slack", "Cursor",
        ]));

        assert!(dot.starts_with("digraph process_map {"));
        assert!(dot.contains("label=\"Cursor\\n(3)\""));
        assert!(dot.contains(&format!("fillcolor=\"{HIGH_FREQ}\"")));
        // Slack: 2/3 of max falls in the medium band.
        assert!(dot.contains("label=\"Slack\\n(2)\", shape=box, style=\"filled,rounded\", fillcolor=\"#64B5F6\""));
        assert!(dot.contains("\"act:Slack\" -> \"act:Cursor\" [label=\"1\", penwidth=4.0"));
        assert!(dot.contains("__start__ -> \"act:Cursor\""));
        assert!(dot.contains("\"act:Cursor\" -> __end__"));
        assert!(!dot.contains("\"act:Slack\" -> \"act:Slack\""));
    }

    #[test]
    fn labels_are_escaped() {
        let dot = render_dot(&build_from_labels(["Say \"hi\""]));
        assert!(dot.contains(r#"Say \"hi\"\n(1)"#));
    }
}
