//! Explorer session: the single current graph and how it changes
//!
//! The session owns the window selector, the current graph, and the view
//! state. Every selection change rebuilds the top-level graph from scratch.
//! Drill-down replaces the current graph with a focused one; back always
//! returns to the top-level view, whatever the depth.
//!
//! Global invariants enforced:
//! - Exactly one current graph, replaced on write, no history stack
//! - Results from superseded requests never replace a newer graph
//! - Retrieval failures surface as a `Status`, never as errors

use crate::drilldown::{self, ExpandOutcome, LoadStatus};
use crate::export;
use crate::graph::FlowGraph;
use crate::source::RecordSource;
use crate::window::{WindowRequest, WindowSelector};
use anyhow::Result;
use chrono::NaiveDate;

/// Which kind of graph is on display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    TopLevel,
    Focused { depth: usize },
}

/// Outcome of the most recent action, surfaced to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Ready,
    /// The window has no TMLs under the rate ceiling
    NoData,
    /// No end period is selectable after the start period
    NoWindow,
    /// Records could not be retrieved; the empty-data graph is shown
    RetrievalFailed(String),
    /// Drill-down had no following period; graph unchanged
    NoNextPeriod,
    /// Drill-down found no records; graph unchanged
    NoDrillDownData,
    /// Drill-down target is the root or not a populated category
    NotExpandable,
}

/// Identifies one graph request; later tickets supersede earlier ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestTicket(u64);

/// Holder of the current graph with replace-on-write semantics
#[derive(Debug, Default)]
pub struct GraphSlot {
    graph: Option<FlowGraph>,
    issued: u64,
}

impl GraphSlot {
    /// Start a request, superseding every outstanding one
    pub fn issue(&mut self) -> RequestTicket {
        self.issued += 1;
        RequestTicket(self.issued)
    }

    /// Replace the graph if `ticket` is the latest issued; returns whether
    /// the graph was replaced
    pub fn commit(&mut self, ticket: RequestTicket, graph: Option<FlowGraph>) -> bool {
        if ticket.0 != self.issued {
            tracing::debug!(
                ticket = ticket.0,
                latest = self.issued,
                "discarding superseded graph"
            );
            return false;
        }
        self.graph = graph;
        true
    }

    pub fn is_current(&self, ticket: RequestTicket) -> bool {
        ticket.0 == self.issued
    }

    pub fn graph(&self) -> Option<&FlowGraph> {
        self.graph.as_ref()
    }
}

/// Interactive exploration over a record source
pub struct ExplorerSession<S: RecordSource> {
    source: S,
    selector: WindowSelector,
    slot: GraphSlot,
    view: View,
    status: Status,
}

impl<S: RecordSource> ExplorerSession<S> {
    /// Load available periods and build the initial top-level graph
    ///
    /// A failure to list periods is logged and treated as "no periods", which
    /// puts the selector on the fallback window. An invalid `rate_ceiling`
    /// is an error.
    pub fn new(source: S, rate_ceiling: f64, fallback: (NaiveDate, NaiveDate)) -> Result<Self> {
        Self::with_request(source, rate_ceiling, fallback, &WindowRequest::default())
    }

    /// Like `new`, but applies `request` to the selector before the first
    /// build, so the initial graph is built exactly once
    pub fn with_request(
        source: S,
        rate_ceiling: f64,
        fallback: (NaiveDate, NaiveDate),
        request: &WindowRequest,
    ) -> Result<Self> {
        let periods = source.list_available_periods().unwrap_or_else(|e| {
            tracing::warn!("failed to list available periods: {:#}", e);
            Vec::new()
        });
        let mut selector = WindowSelector::new(periods, rate_ceiling, fallback)?;
        request.apply(&mut selector)?;

        let mut session = ExplorerSession {
            source,
            selector,
            slot: GraphSlot::default(),
            view: View::TopLevel,
            status: Status::Ready,
        };
        session.refresh();
        Ok(session)
    }

    pub fn selector(&self) -> &WindowSelector {
        &self.selector
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn graph(&self) -> Option<&FlowGraph> {
        self.slot.graph()
    }

    /// Start a request on behalf of a caller that fetches on its own
    pub fn begin_request(&mut self) -> RequestTicket {
        self.slot.issue()
    }

    /// Install a graph produced for `ticket`; stale tickets are rejected
    pub fn complete_request(
        &mut self,
        ticket: RequestTicket,
        graph: FlowGraph,
        view: View,
        status: Status,
    ) -> bool {
        if !self.slot.commit(ticket, Some(graph)) {
            return false;
        }
        self.view = view;
        self.status = status;
        true
    }

    /// Rebuild the top-level graph for the selected window
    pub fn refresh(&mut self) -> &Status {
        let ticket = self.slot.issue();

        let Some(window) = self.selector.window() else {
            self.slot.commit(ticket, None);
            self.view = View::TopLevel;
            self.status = Status::NoWindow;
            return &self.status;
        };

        let (graph, load) = drilldown::return_to_top(&self.source, &window);
        let status = match load {
            LoadStatus::Ready => Status::Ready,
            LoadStatus::NoData => Status::NoData,
            LoadStatus::RetrievalFailed(e) => Status::RetrievalFailed(e),
        };
        tracing::info!(
            start = %window.start,
            end = %window.end,
            ceiling = window.rate_ceiling,
            total = graph.total(),
            "top-level graph rebuilt"
        );
        self.complete_request(ticket, graph, View::TopLevel, status);
        &self.status
    }

    pub fn set_start(&mut self, period: NaiveDate) -> Result<&Status> {
        self.selector.set_start(period)?;
        Ok(self.refresh())
    }

    pub fn set_end(&mut self, period: NaiveDate) -> Result<&Status> {
        self.selector.set_end(period)?;
        Ok(self.refresh())
    }

    pub fn set_rate_ceiling(&mut self, ceiling: f64) -> Result<&Status> {
        self.selector.set_rate_ceiling(ceiling)?;
        Ok(self.refresh())
    }

    /// Period a drill-down from the current graph would reach
    pub fn next_period(&self) -> Option<NaiveDate> {
        self.graph()
            .and_then(|g| self.selector.next_period_after(g.window.end))
    }

    /// Drill into the node at `node_index` of the current graph
    ///
    /// Only an expansion replaces the current graph; every other outcome
    /// leaves it untouched and is reported through the status.
    pub fn drill_down(&mut self, node_index: usize) -> &Status {
        let Some(current) = self.slot.graph() else {
            self.status = Status::NotExpandable;
            return &self.status;
        };
        let next = self.selector.next_period_after(current.window.end);
        let outcome = drilldown::expand(&self.source, current, node_index, next);

        match outcome {
            ExpandOutcome::Expanded { graph, path } => {
                let depth = match self.view {
                    View::TopLevel => 1,
                    View::Focused { depth } => depth + 1,
                };
                tracing::info!(node_index, depth, ?path, "drilled down");
                let ticket = self.slot.issue();
                self.complete_request(ticket, graph, View::Focused { depth }, Status::Ready);
            }
            ExpandOutcome::NotExpandable => self.status = Status::NotExpandable,
            ExpandOutcome::NoNextPeriod => self.status = Status::NoNextPeriod,
            ExpandOutcome::NoData => self.status = Status::NoDrillDownData,
        }
        &self.status
    }

    /// Return to the top-level view for the selected window
    pub fn back(&mut self) -> &Status {
        if self.view == View::TopLevel {
            return &self.status;
        }
        self.refresh()
    }

    /// CSV of the current graph; header only when nothing is displayed
    pub fn csv(&self) -> Result<String> {
        match self.graph() {
            Some(graph) => export::to_csv(graph),
            None => Ok(export::CSV_HEADER.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolvedConfig;
    use crate::graph::build;
    use crate::record::{TmlKey, TmlRecord};
    use crate::source::{FetchError, MemorySource};
    use crate::window::{parse_period, Window};
    use std::cell::Cell;

    fn d(s: &str) -> NaiveDate {
        parse_period(s).unwrap()
    }

    fn fallback() -> (NaiveDate, NaiveDate) {
        (d("2025-01-01"), d("2025-03-31"))
    }

    fn graph_for(end: &str) -> FlowGraph {
        let window = Window::new(d("2025-01-01"), d(end), None);
        build(&[], &window, None)
    }

    #[test]
    fn test_stale_ticket_is_rejected() {
        let mut slot = GraphSlot::default();
        let first = slot.issue();
        let second = slot.issue();
        assert!(slot.commit(second, Some(graph_for("2025-03-01"))));
        assert!(!slot.commit(first, Some(graph_for("2025-02-01"))));
        assert_eq!(slot.graph().unwrap().window.end, d("2025-03-01"));
        assert!(!slot.is_current(first));
    }

    #[test]
    fn test_session_without_data_uses_fallback_window() {
        let session = ExplorerSession::new(MemorySource::default(), 20.0, fallback()).unwrap();
        assert_eq!(session.status(), &Status::NoData);
        let graph = session.graph().unwrap();
        assert_eq!(graph.window.end, d("2025-03-31"));
        assert_eq!(graph.nodes().len(), 6);
        assert_eq!(session.csv().unwrap(), export::CSV_HEADER);
    }

    #[test]
    fn test_single_period_has_no_window() {
        let mut source = MemorySource::default();
        source.push("C1", "T1", d("2025-01-01"), 5.0);
        let session = ExplorerSession::new(source, 20.0, fallback()).unwrap();
        assert_eq!(session.status(), &Status::NoWindow);
        assert!(session.graph().is_none());
        assert_eq!(session.csv().unwrap(), export::CSV_HEADER);
    }

    fn seeded() -> MemorySource {
        let mut s = MemorySource::default();
        s.push("C1", "T1", d("2025-01-01"), 5.0)
            .push("C1", "T1", d("2025-02-01"), 22.0)
            .push("C1", "T1", d("2025-03-01"), 35.0)
            .push("C1", "T1", d("2025-04-01"), 36.0)
            .push("C1", "T2", d("2025-01-01"), 6.0)
            .push("C1", "T2", d("2025-02-01"), 24.0)
            .push("C1", "T2", d("2025-03-01"), 8.0)
            .push("C1", "T2", d("2025-04-01"), 9.0);
        s
    }

    #[test]
    fn test_drill_down_and_back_from_depth_two() {
        let mut session = ExplorerSession::new(seeded(), 20.0, fallback()).unwrap();
        assert_eq!(session.status(), &Status::Ready);
        assert_eq!(session.view(), View::TopLevel);
        assert_eq!(session.next_period(), Some(d("2025-03-01")));

        // node 1 = "20-30 mpy" {T1, T2}
        assert_eq!(session.drill_down(1), &Status::Ready);
        assert_eq!(session.view(), View::Focused { depth: 1 });
        assert_eq!(session.graph().unwrap().window.end, d("2025-03-01"));

        // node 1 = "< 10 mpy (March)" {T2}
        assert_eq!(session.drill_down(1), &Status::Ready);
        assert_eq!(session.view(), View::Focused { depth: 2 });
        let graph = session.graph().unwrap();
        assert_eq!(graph.window.end, d("2025-04-01"));
        assert_eq!(graph.total(), 1);

        // Back is one level only: depth 2 returns straight to the top level
        assert_eq!(session.back(), &Status::Ready);
        assert_eq!(session.view(), View::TopLevel);
        let graph = session.graph().unwrap();
        assert_eq!(graph.window.start, d("2025-01-01"));
        assert_eq!(graph.window.end, d("2025-02-01"));
        assert_eq!(graph.total(), 2);
    }

    #[test]
    fn test_failed_drill_down_keeps_graph() {
        let mut session = ExplorerSession::new(seeded(), 20.0, fallback()).unwrap();
        session.set_end(d("2025-04-01")).unwrap();
        let before = session.graph().cloned();

        assert_eq!(session.drill_down(1), &Status::NoNextPeriod);
        assert_eq!(session.drill_down(0), &Status::NotExpandable);
        assert_eq!(session.graph().cloned(), before);
        assert_eq!(session.view(), View::TopLevel);
    }

    #[test]
    fn test_rejected_selection_leaves_state_unchanged() {
        let mut session = ExplorerSession::new(seeded(), 20.0, fallback()).unwrap();
        let before = session.graph().cloned();
        assert!(session.set_end(d("2025-01-01")).is_err());
        assert!(session.set_start(d("2024-06-01")).is_err());
        assert!(session.set_rate_ceiling(-5.0).is_err());
        assert_eq!(session.graph().cloned(), before);
        assert_eq!(session.selector().end(), Some(d("2025-02-01")));
    }

    #[test]
    fn test_rate_ceiling_change_rebuilds() {
        let mut session = ExplorerSession::new(seeded(), 20.0, fallback()).unwrap();
        assert_eq!(session.set_rate_ceiling(5.5).unwrap(), &Status::Ready);
        assert_eq!(session.graph().unwrap().total(), 1);
        assert_eq!(session.set_rate_ceiling(1.0).unwrap(), &Status::NoData);
        assert_eq!(session.csv().unwrap(), export::CSV_HEADER);
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let mut session = ExplorerSession::new(seeded(), 20.0, fallback()).unwrap();
        let stale = session.begin_request();
        let fresh = session.begin_request();
        let g = graph_for("2025-03-01");
        assert!(!session.complete_request(stale, g.clone(), View::TopLevel, Status::NoData));
        assert_eq!(session.status(), &Status::Ready);
        assert!(session.complete_request(fresh, g, View::TopLevel, Status::NoData));
        assert_eq!(session.status(), &Status::NoData);
    }

    #[test]
    fn test_drill_down_without_graph() {
        let mut source = MemorySource::default();
        source.push("C1", "T1", d("2025-01-01"), 5.0);
        let mut session = ExplorerSession::new(source, 20.0, fallback()).unwrap();
        assert_eq!(session.drill_down(1), &Status::NotExpandable);
    }

    /// Wraps a memory source with switchable failures and a fetch counter
    #[derive(Default)]
    struct ScriptedSource {
        inner: MemorySource,
        fail_periods: bool,
        fail_records: bool,
        fail_subset: bool,
        fetches: Cell<usize>,
    }

    impl ScriptedSource {
        fn new(inner: MemorySource) -> Self {
            ScriptedSource {
                inner,
                ..ScriptedSource::default()
            }
        }
    }

    impl RecordSource for ScriptedSource {
        fn list_available_periods(&self) -> Result<Vec<NaiveDate>> {
            if self.fail_periods {
                anyhow::bail!("period listing unavailable");
            }
            self.inner.list_available_periods()
        }

        fn fetch_records(
            &self,
            start: NaiveDate,
            end: NaiveDate,
            ceiling: Option<f64>,
        ) -> Result<Vec<TmlRecord>, FetchError> {
            self.fetches.set(self.fetches.get() + 1);
            if self.fail_records {
                return Err(FetchError::Retrieval(anyhow::anyhow!("tracking query timed out")));
            }
            self.inner.fetch_records(start, end, ceiling)
        }

        fn fetch_records_for_tmls(
            &self,
            start: NaiveDate,
            end: NaiveDate,
            tmls: &[TmlKey],
        ) -> Result<Vec<TmlRecord>, FetchError> {
            if self.fail_subset {
                return Err(FetchError::Retrieval(anyhow::anyhow!("tracking query timed out")));
            }
            self.inner.fetch_records_for_tmls(start, end, tmls)
        }
    }

    #[test]
    fn test_period_listing_failure_uses_fallback_window() {
        let source = ScriptedSource {
            fail_periods: true,
            ..ScriptedSource::new(seeded())
        };
        let session = ExplorerSession::new(source, 20.0, fallback()).unwrap();
        assert!(!session.selector().has_data());
        assert_eq!(session.status(), &Status::NoData);
        let graph = session.graph().unwrap();
        assert_eq!(graph.window.start, d("2025-01-01"));
        assert_eq!(graph.window.end, d("2025-03-31"));
    }

    #[test]
    fn test_top_level_retrieval_failure() {
        let source = ScriptedSource {
            fail_records: true,
            ..ScriptedSource::new(seeded())
        };
        let session = ExplorerSession::new(source, 20.0, fallback()).unwrap();
        let Status::RetrievalFailed(message) = session.status() else {
            panic!("expected a retrieval failure, got {:?}", session.status());
        };
        assert!(message.contains("timed out"));
        assert_eq!(session.view(), View::TopLevel);
        let graph = session.graph().unwrap();
        assert!(graph.branches.is_empty());
        assert_eq!(graph.nodes().len(), 6);
        assert_eq!(session.csv().unwrap(), export::CSV_HEADER);
    }

    #[test]
    fn test_drill_down_retrieval_failure_keeps_graph() {
        let source = ScriptedSource {
            fail_subset: true,
            ..ScriptedSource::new(seeded())
        };
        let mut session = ExplorerSession::new(source, 20.0, fallback()).unwrap();
        let before = session.graph().cloned();
        assert_eq!(session.drill_down(1), &Status::NoDrillDownData);
        assert_eq!(session.graph().cloned(), before);
        assert_eq!(session.view(), View::TopLevel);
    }

    #[test]
    fn test_invalid_initial_ceiling_is_rejected() {
        assert!(ExplorerSession::new(seeded(), -5.0, fallback()).is_err());
        assert!(ExplorerSession::new(seeded(), f64::NAN, fallback()).is_err());

        let config = ResolvedConfig::defaults().unwrap();
        let request = WindowRequest {
            rate_ceiling: Some(f64::NAN),
            ..WindowRequest::default()
        };
        assert!(crate::explore(seeded(), &config, &request).is_err());
    }

    #[test]
    fn test_requested_window_builds_once() {
        let config = ResolvedConfig::defaults().unwrap();
        let request = WindowRequest {
            start: Some(d("2025-02-01")),
            end: Some(d("2025-04-01")),
            rate_ceiling: Some(30.0),
        };
        let session = crate::explore(ScriptedSource::new(seeded()), &config, &request).unwrap();
        assert_eq!(session.source.fetches.get(), 1);
        let graph = session.graph().unwrap();
        assert_eq!(
            graph.window,
            Window::new(d("2025-02-01"), d("2025-04-01"), Some(30.0))
        );
        assert_eq!(graph.total(), 2);
    }
}
