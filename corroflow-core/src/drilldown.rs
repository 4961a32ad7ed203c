//! Drill-down: re-apply the flow construction to one category's members
//! over the following period
//!
//! Global invariants enforced:
//! - Nodes are selected by their stable integer index only
//! - The narrow TML query and the full-fetch fallback yield identical records
//! - Members are identified by (circuit, TML) pairs, never by TML id alone
//! - A drill-down that finds nothing never replaces the current graph
//! - Failures are absorbed into outcomes and statuses, never propagated

use crate::category::Category;
use crate::graph::{self, FlowGraph, Focus};
use crate::record::{TmlKey, TmlRecord};
use crate::source::{FetchError, RecordSource};
use crate::window::Window;
use chrono::NaiveDate;
use std::collections::HashSet;

/// Which query produced a drill-down population
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPath {
    Narrow,
    Fallback,
}

/// Result of a drill-down attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ExpandOutcome {
    /// A focused graph over `(origin end, next boundary)`
    Expanded { graph: FlowGraph, path: FetchPath },
    /// The index is the root or names no populated category
    NotExpandable,
    /// No period follows the current window's end
    NoNextPeriod,
    /// The selected TMLs have no records in the next period
    NoData,
}

/// Outcome of loading a top-level graph
#[derive(Debug, Clone, PartialEq)]
pub enum LoadStatus {
    Ready,
    NoData,
    RetrievalFailed(String),
}

/// Category and member TMLs behind a node
pub fn resolve_members(graph: &FlowGraph, node_index: usize) -> Option<(Category, Vec<TmlKey>)> {
    graph
        .branch(node_index)
        .filter(|b| b.value() > 0)
        .map(|b| (b.category, b.tml_keys()))
}

/// Keep only records whose (circuit, TML) pair is in `tmls`, preserving order
pub fn filter_to_tmls(records: Vec<TmlRecord>, tmls: &[TmlKey]) -> Vec<TmlRecord> {
    let wanted: HashSet<(&str, &str)> = tmls
        .iter()
        .map(|k| (k.circuit_id.as_str(), k.tml_id.as_str()))
        .collect();
    records
        .into_iter()
        .filter(|r| wanted.contains(&(r.circuit_id.as_str(), r.tml_id.as_str())))
        .collect()
}

/// Fetch records for a TML subset, falling back to a full fetch when the
/// source has no narrow query
pub fn fetch_subset<S: RecordSource + ?Sized>(
    source: &S,
    start: NaiveDate,
    end: NaiveDate,
    tmls: &[TmlKey],
) -> Result<(Vec<TmlRecord>, FetchPath), FetchError> {
    match source.fetch_records_for_tmls(start, end, tmls) {
        Ok(records) => Ok((records, FetchPath::Narrow)),
        Err(FetchError::Unsupported) => {
            tracing::debug!(
                %start,
                %end,
                tmls = tmls.len(),
                "narrow query unsupported, filtering full fetch locally"
            );
            let all = source.fetch_records(start, end, None)?;
            Ok((filter_to_tmls(all, tmls), FetchPath::Fallback))
        }
        Err(e) => Err(e),
    }
}

/// Drill into the category at `node_index` for the period ending at `next`
///
/// The population is the category's members at `graph.window.end`; the
/// returned graph follows them to `next`, with no rate ceiling.
pub fn expand<S: RecordSource + ?Sized>(
    source: &S,
    graph: &FlowGraph,
    node_index: usize,
    next: Option<NaiveDate>,
) -> ExpandOutcome {
    let Some((category, tmls)) = resolve_members(graph, node_index) else {
        tracing::debug!(node_index, "node is not expandable");
        return ExpandOutcome::NotExpandable;
    };

    let Some(next) = next else {
        tracing::info!(end = %graph.window.end, "no period follows the current window");
        return ExpandOutcome::NoNextPeriod;
    };

    let origin = graph.window.end;
    let (records, path) = match fetch_subset(source, origin, next, &tmls) {
        Ok(fetched) => fetched,
        Err(e) => {
            tracing::warn!("drill-down retrieval failed: {}", e);
            return ExpandOutcome::NoData;
        }
    };

    if records.is_empty() {
        tracing::info!(%category, %origin, %next, "no drill-down data");
        return ExpandOutcome::NoData;
    }

    let window = Window::new(origin, next, None);
    let focus = Focus { category, origin };
    ExpandOutcome::Expanded {
        graph: graph::build(&records, &window, Some(&focus)),
        path,
    }
}

/// Fetch and build a top-level graph, absorbing failures into the status
///
/// A failed or empty fetch yields the empty-data graph.
pub fn load_top_level<S: RecordSource + ?Sized>(
    source: &S,
    window: &Window,
) -> (FlowGraph, LoadStatus) {
    match source.fetch_records(window.start, window.end, window.rate_ceiling) {
        Ok(records) => {
            let graph = graph::build(&records, window, None);
            let status = if graph.is_empty() {
                LoadStatus::NoData
            } else {
                LoadStatus::Ready
            };
            (graph, status)
        }
        Err(e) => {
            tracing::warn!(start = %window.start, end = %window.end, "{}", e);
            (
                graph::build(&[], window, None),
                LoadStatus::RetrievalFailed(e.to_string()),
            )
        }
    }
}

/// Rebuild the top-level view for the selected window
///
/// Back navigation always lands here, whatever the drill-down depth.
pub fn return_to_top<S: RecordSource + ?Sized>(
    source: &S,
    window: &Window,
) -> (FlowGraph, LoadStatus) {
    load_top_level(source, window)
}
