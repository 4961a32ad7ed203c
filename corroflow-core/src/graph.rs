//! Flow graph construction
//!
//! A flow graph is one hop deep: a synthetic root (index 0) with one branch
//! per populated end category. Depth comes from chaining graphs through
//! drill-down, never from deeper link structure.
//!
//! Global invariants enforced:
//! - Root is always node 0 and the source of every link
//! - Empty categories produce no node and no link
//! - sum(link.value) equals the eligible record count
//! - Graphs are rebuilt, never patched

use crate::category::Category;
use crate::joiner::{self, Members};
use crate::record::{TmlKey, TmlRecord};
use crate::window::{month_name, Window};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Index of the synthetic root node in every graph
pub const ROOT_INDEX: usize = 0;

/// Node as consumed by renderers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub index: usize,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u64>,
}

/// Link from the root to a category node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub source: usize,
    pub target: usize,
    pub value: u64,
    pub members: Members,
}

/// Where a focused (drill-down) population was drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Focus {
    pub category: Category,
    /// Period whose category membership defined the population
    pub origin: NaiveDate,
}

impl Focus {
    pub fn origin_month(&self) -> String {
        month_name(self.origin)
    }
}

/// One populated category in a graph
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub category: Category,
    pub node: Node,
    pub members: Members,
    /// Records behind this branch, in input order (used for drill-down)
    pub records: Vec<TmlRecord>,
}

impl Branch {
    pub fn value(&self) -> u64 {
        self.records.len() as u64
    }

    /// (circuit, TML) identities of the members, in record order
    pub fn tml_keys(&self) -> Vec<TmlKey> {
        self.records.iter().map(TmlRecord::key).collect()
    }

    pub fn link(&self) -> Link {
        Link {
            source: ROOT_INDEX,
            target: self.node.index,
            value: self.value(),
            members: self.members.clone(),
        }
    }
}

/// Typed one-hop flow graph
#[derive(Debug, Clone, PartialEq)]
pub struct FlowGraph {
    pub window: Window,
    pub focus: Option<Focus>,
    pub root: Node,
    pub branches: Vec<Branch>,
}

/// Flat node/link form for rendering and JSON output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GraphView {
    pub window: Window,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<Focus>,
    pub total: u64,
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
}

impl FlowGraph {
    /// True when no record entered the graph
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn is_focused(&self) -> bool {
        self.focus.is_some()
    }

    /// Sum of link values leaving the root
    pub fn total(&self) -> u64 {
        self.branches.iter().map(Branch::value).sum()
    }

    /// Nodes in index order
    ///
    /// An empty graph lists the root followed by one placeholder node per
    /// category, with no value and no links.
    pub fn nodes(&self) -> Vec<Node> {
        let mut nodes = vec![self.root.clone()];
        if self.branches.is_empty() {
            nodes.extend(Category::ALL.iter().enumerate().map(|(i, c)| Node {
                index: i + 1,
                name: c.label().to_string(),
                value: None,
            }));
        } else {
            nodes.extend(self.branches.iter().map(|b| b.node.clone()));
        }
        nodes
    }

    pub fn links(&self) -> Vec<Link> {
        self.branches.iter().map(Branch::link).collect()
    }

    /// Branch whose target node has the given index
    pub fn branch(&self, node_index: usize) -> Option<&Branch> {
        if node_index == ROOT_INDEX {
            return None;
        }
        self.branches.iter().find(|b| b.node.index == node_index)
    }

    /// Branch for a category, if that category is populated
    pub fn branch_for(&self, category: Category) -> Option<&Branch> {
        self.branches.iter().find(|b| b.category == category)
    }

    /// Only non-root nodes carrying at least one TML can be drilled into
    pub fn is_expandable(&self, node_index: usize) -> bool {
        self.branch(node_index).is_some_and(|b| b.value() > 0)
    }

    pub fn view(&self) -> GraphView {
        GraphView {
            window: self.window.clone(),
            focus: self.focus,
            total: self.total(),
            nodes: self.nodes(),
            links: self.links(),
        }
    }

    /// Serialize the node/link view to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.view()).context("failed to serialize flow graph to JSON")
    }
}

/// Root label for a graph
fn root_name(window: &Window, focus: Option<&Focus>, count: usize) -> String {
    match focus {
        Some(f) => format!(
            "{} TMLs from {} category ({})",
            count,
            f.category.label(),
            f.origin_month()
        ),
        None => match window.rate_ceiling {
            Some(ceiling) => format!(
                "TMLs with <= {} mpy corrosion rate as on {}",
                ceiling, window.start
            ),
            None => format!("All TMLs as on {}", window.start),
        },
    }
}

/// Build the flow graph for a window
///
/// With a `focus`, the root describes the originating category and month and
/// category nodes carry the window's end month.
pub fn build(records: &[TmlRecord], window: &Window, focus: Option<&Focus>) -> FlowGraph {
    let groups = joiner::join(records, window.rate_ceiling);
    let count: usize = groups.values().map(|g| g.len()).sum();

    let root = Node {
        index: ROOT_INDEX,
        name: root_name(window, focus, count),
        value: Some(count as u64),
    };

    let end_month = month_name(window.end);
    let branches: Vec<Branch> = groups
        .into_iter()
        .enumerate()
        .map(|(i, (category, group))| {
            let name = if focus.is_some() {
                format!("{} ({})", category.label(), end_month)
            } else {
                category.label().to_string()
            };
            Branch {
                category,
                node: Node {
                    index: i + 1,
                    name,
                    value: Some(group.len() as u64),
                },
                members: group.members,
                records: group.records,
            }
        })
        .collect();

    tracing::debug!(
        start = %window.start,
        end = %window.end,
        eligible = count,
        branches = branches.len(),
        focused = focus.is_some(),
        "built flow graph"
    );

    FlowGraph {
        window: window.clone(),
        focus: focus.copied(),
        root,
        branches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn window(ceiling: Option<f64>) -> Window {
        Window::new(date("2025-01-01"), date("2025-02-01"), ceiling)
    }

    #[test]
    fn test_two_record_scenario() {
        let records = vec![
            TmlRecord::new("C1", "A1", 5.0, 8.0),
            TmlRecord::new("C1", "A2", 5.0, 25.0),
        ];
        let graph = build(&records, &window(Some(50.0)), None);

        assert_eq!(graph.root.value, Some(2));
        assert_eq!(
            graph.root.name,
            "TMLs with <= 50 mpy corrosion rate as on 2025-01-01"
        );
        let links = graph.links();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].target, 1);
        assert_eq!(links[0].value, 1);
        assert_eq!(links[0].members["C1"], vec!["A1"]);
        assert_eq!(links[1].target, 2);
        assert_eq!(links[1].members["C1"], vec!["A2"]);

        let nodes = graph.nodes();
        assert_eq!(nodes[1].name, "< 10 mpy");
        assert_eq!(nodes[2].name, "20-30 mpy");
    }

    #[test]
    fn test_empty_categories_are_omitted() {
        let records = vec![
            TmlRecord::new("C1", "A1", 1.0, 1.0),
            TmlRecord::new("C1", "A2", 1.0, 15.0),
            TmlRecord::new("C1", "A3", 1.0, 60.0),
        ];
        let graph = build(&records, &window(None), None);
        assert_eq!(graph.nodes().len(), 4);
        assert!(graph.branch_for(Category::From20To30).is_none());
        assert_eq!(graph.root.name, "All TMLs as on 2025-01-01");
    }

    #[test]
    fn test_empty_graph_has_placeholders_and_no_links() {
        let records = vec![TmlRecord::new("C1", "A1", 99.0, 1.0)];
        let graph = build(&records, &window(Some(20.0)), None);
        assert!(graph.is_empty());
        assert_eq!(graph.root.value, Some(0));
        assert!(graph.links().is_empty());
        let nodes = graph.nodes();
        assert_eq!(nodes.len(), 6);
        assert!(nodes[1..].iter().all(|n| n.value.is_none()));
    }

    #[test]
    fn test_focused_labels() {
        let records = vec![TmlRecord::new("C1", "A1", 22.0, 35.0)];
        let focus = Focus {
            category: Category::From20To30,
            origin: date("2025-02-01"),
        };
        let w = Window::new(date("2025-02-01"), date("2025-03-01"), None);
        let graph = build(&records, &w, Some(&focus));
        assert!(graph.is_focused());
        assert_eq!(graph.root.name, "1 TMLs from 20-30 mpy category (February)");
        assert_eq!(graph.nodes()[1].name, "30-50 mpy (March)");
    }

    #[test]
    fn test_expandable_nodes() {
        let records = vec![TmlRecord::new("C1", "A1", 1.0, 1.0)];
        let graph = build(&records, &window(None), None);
        assert!(!graph.is_expandable(ROOT_INDEX));
        assert!(graph.is_expandable(1));
        assert!(!graph.is_expandable(2));
    }

    #[test]
    fn test_json_view() {
        let records = vec![TmlRecord::new("C1", "A1", 1.0, 1.0)];
        let graph = build(&records, &window(Some(20.0)), None);
        let json = graph.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["total"], 1);
        assert_eq!(value["links"][0]["source"], 0);
        assert_eq!(value["links"][0]["members"]["C1"][0], "A1");
    }
}
