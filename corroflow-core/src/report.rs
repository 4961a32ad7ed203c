//! Text rendering and per-circuit summaries
//!
//! Global invariants enforced:
//! - Deterministic output ordering
//! - Byte-for-byte identical output across runs

use crate::category::Category;
use crate::graph::FlowGraph;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Count of TMLs per end category for one circuit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CircuitSummary {
    pub circuit_id: String,
    pub counts: BTreeMap<Category, u64>,
    pub total: u64,
}

/// Per-circuit category distribution of a graph, circuits ascending
pub fn circuit_summary(graph: &FlowGraph) -> Vec<CircuitSummary> {
    let mut by_circuit: BTreeMap<&str, BTreeMap<Category, u64>> = BTreeMap::new();
    for branch in &graph.branches {
        for (circuit, ids) in &branch.members {
            *by_circuit
                .entry(circuit.as_str())
                .or_default()
                .entry(branch.category)
                .or_default() += ids.len() as u64;
        }
    }

    by_circuit
        .into_iter()
        .map(|(circuit_id, counts)| CircuitSummary {
            circuit_id: circuit_id.to_string(),
            total: counts.values().sum(),
            counts,
        })
        .collect()
}

/// Render summaries as pretty JSON
pub fn summary_to_json(summaries: &[CircuitSummary]) -> Result<String> {
    serde_json::to_string_pretty(summaries).context("failed to serialize circuit summary to JSON")
}

/// Render a graph as text: root line, then one line per link
pub fn render_text(graph: &FlowGraph) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "{} [{} -> {}]\n",
        graph.root.name, graph.window.start, graph.window.end
    ));

    if graph.is_empty() {
        output.push_str("  (no TMLs in this window)\n");
        return output;
    }

    output.push_str(&format!("{:<6} {:<28} {:>6}  {}\n", "NODE", "CATEGORY", "TMLS", "CIRCUITS"));
    for branch in &graph.branches {
        let circuits = branch
            .members
            .iter()
            .map(|(circuit, ids)| format!("{}({})", circuit, ids.len()))
            .collect::<Vec<_>>()
            .join(", ");
        output.push_str(&format!(
            "{:<6} {:<28} {:>6}  {}\n",
            branch.node.index,
            truncate_or_pad(&branch.node.name, 28),
            branch.value(),
            circuits
        ));
    }
    output.push_str(&format!("{:<6} {:<28} {:>6}\n", "", "TOTAL", graph.total()));

    output
}

/// Render per-circuit summaries as a text table
pub fn render_summary_text(summaries: &[CircuitSummary]) -> String {
    let mut output = format!("{:<20}", "CIRCUIT");
    for category in Category::ALL {
        output.push_str(&format!(" {:>10}", category.label()));
    }
    output.push_str(&format!(" {:>7}\n", "TOTAL"));

    for summary in summaries {
        output.push_str(&truncate_or_pad(&summary.circuit_id, 20));
        for category in Category::ALL {
            let count = summary.counts.get(&category).copied().unwrap_or(0);
            output.push_str(&format!(" {:>10}", count));
        }
        output.push_str(&format!(" {:>7}\n", summary.total));
    }
    output
}

/// Render member TML ids of one node, grouped by circuit
pub fn render_members_text(graph: &FlowGraph, node_index: usize) -> Option<String> {
    let branch = graph.branch(node_index)?;
    let mut output = format!("{} ({} TMLs)\n", branch.node.name, branch.value());
    for (circuit, ids) in &branch.members {
        output.push_str(&format!("{}\n", circuit));
        for id in ids {
            output.push_str(&format!("  - {}\n", id));
        }
    }
    Some(output)
}

/// Truncate or pad string to fixed width
fn truncate_or_pad(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let kept: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        format!("{:<width$}", s, width = width)
    }
}
