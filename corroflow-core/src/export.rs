//! CSV flattening of a flow graph
//!
//! One row per (circuit, TML, category) triple, generated on demand from the
//! current graph. Column order is fixed: circuit, TML, risk level.

use crate::graph::FlowGraph;
use anyhow::{Context, Result};

/// Header row of every export
pub const CSV_HEADER: &str = "Circuit ID,TML ID,Risk Level";

const HEADER_FIELDS: [&str; 3] = ["Circuit ID", "TML ID", "Risk Level"];

/// (circuit, TML, risk level) triples in export order
///
/// Links in graph order, circuits ascending, TML ids in member order. The
/// risk level is the target node's name.
pub fn rows(graph: &FlowGraph) -> Vec<(String, String, String)> {
    let mut rows = Vec::new();
    for branch in &graph.branches {
        for (circuit, ids) in &branch.members {
            for tml in ids {
                rows.push((circuit.clone(), tml.clone(), branch.node.name.clone()));
            }
        }
    }
    rows
}

/// Render the graph's members as CSV (no trailing newline)
pub fn to_csv(graph: &FlowGraph) -> Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(vec![]);

    wtr.write_record(HEADER_FIELDS)
        .context("failed to write CSV header")?;
    for (circuit, tml, level) in rows(graph) {
        wtr.write_record([&circuit, &tml, &level])
            .context("failed to write CSV row")?;
    }

    wtr.flush().context("failed to flush CSV writer")?;
    let bytes = wtr.into_inner().context("failed to finish CSV output")?;
    let mut csv = String::from_utf8(bytes).context("CSV output is not valid UTF-8")?;
    if csv.ends_with('\n') {
        csv.pop();
    }
    Ok(csv)
}
