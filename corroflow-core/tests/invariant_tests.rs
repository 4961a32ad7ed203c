//! Invariant Tests
//!
//! Flow-graph invariants that must hold for every record set, plus the
//! end-to-end scenarios the explorer is expected to reproduce.

use chrono::NaiveDate;
use corroflow_core::category::Category;
use corroflow_core::drilldown::{self, ExpandOutcome};
use corroflow_core::export;
use corroflow_core::graph::{build, ROOT_INDEX};
use corroflow_core::record::{TmlKey, TmlRecord};
use corroflow_core::session::{ExplorerSession, Status, View};
use corroflow_core::source::MemorySource;
use corroflow_core::window::Window;
use proptest::prelude::*;
use std::collections::HashSet;

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid test date")
}

fn fallback() -> (NaiveDate, NaiveDate) {
    (d("2025-01-01"), d("2025-03-31"))
}

/// Memory source with one TML per entry, measured in January and February
fn two_period_source(rows: &[(u8, f64, f64)]) -> MemorySource {
    let mut source = MemorySource::default();
    for (i, (circuit, start, end)) in rows.iter().enumerate() {
        let circuit = format!("C{}", circuit);
        let tml = format!("T{}", i);
        source
            .push(&circuit, &tml, d("2025-01-01"), *start)
            .push(&circuit, &tml, d("2025-02-01"), *end);
    }
    source
}

#[test]
fn test_two_record_scenario() {
    let records = vec![
        TmlRecord::new("C1", "A1", 5.0, 8.0),
        TmlRecord::new("C1", "A2", 5.0, 25.0),
    ];
    let window = Window::new(d("2025-01-01"), d("2025-02-01"), Some(50.0));
    let graph = build(&records, &window, None);

    let nodes = graph.nodes();
    assert_eq!(nodes[ROOT_INDEX].value, Some(2));
    assert_eq!(nodes.len(), 3);

    let links = graph.links();
    assert_eq!(links.len(), 2);
    assert_eq!(nodes[links[0].target].name, "< 10 mpy");
    assert_eq!(links[0].members["C1"], vec!["A1".to_string()]);
    assert_eq!(nodes[links[1].target].name, "20-30 mpy");
    assert_eq!(links[1].members["C1"], vec!["A2".to_string()]);
    assert!(links.iter().all(|l| l.source == ROOT_INDEX && l.value == 1));
}

#[test]
fn test_zero_eligible_records() {
    let source = two_period_source(&[(1, 60.0, 5.0), (2, 70.0, 5.0)]);
    let session = ExplorerSession::new(source, 20.0, fallback()).expect("session starts");

    assert_eq!(session.status(), &Status::NoData);
    let graph = session.graph().expect("empty graph is still displayed");
    assert!(graph.branches.is_empty());
    assert!(graph.links().is_empty());
    assert!(graph.nodes()[1..].iter().all(|n| n.value.is_none()));
    assert_eq!(session.csv().expect("csv"), "Circuit ID,TML ID,Risk Level");
}

#[test]
fn test_drill_down_without_next_period_leaves_graph() {
    let source = two_period_source(&[(1, 5.0, 8.0), (1, 6.0, 25.0)]);
    let mut session = ExplorerSession::new(source, 20.0, fallback()).expect("session starts");
    let before = session.graph().cloned();

    assert_eq!(session.drill_down(1), &Status::NoNextPeriod);
    assert_eq!(session.graph().cloned(), before);
    assert_eq!(session.view(), View::TopLevel);
}

#[test]
fn test_focused_graph_population_is_the_selected_category() {
    let mut source = two_period_source(&[(1, 5.0, 8.0), (1, 6.0, 25.0), (2, 7.0, 9.0)]);
    source
        .push("C1", "T0", d("2025-03-01"), 11.0)
        .push("C1", "T1", d("2025-03-01"), 40.0)
        .push("C2", "T2", d("2025-03-01"), 55.0);
    let window = Window::new(d("2025-01-01"), d("2025-02-01"), Some(20.0));
    let (graph, _) = drilldown::load_top_level(&source, &window);

    let ExpandOutcome::Expanded { graph: focused, .. } =
        drilldown::expand(&source, &graph, 1, Some(d("2025-03-01")))
    else {
        panic!("expected expansion of the < 10 mpy node");
    };

    let members: HashSet<TmlKey> = focused
        .branches
        .iter()
        .flat_map(|b| b.tml_keys())
        .collect();
    let expected: HashSet<TmlKey> = [TmlKey::new("C1", "T0"), TmlKey::new("C2", "T2")]
        .into_iter()
        .collect();
    assert_eq!(members, expected);
    assert_eq!(focused.root.name, "2 TMLs from < 10 mpy category (February)");
    assert!(focused.branch_for(Category::From10To20).is_some());
    assert!(focused.branch_for(Category::Above50).is_some());
    assert!(focused.branch_for(Category::From30To50).is_none());
}

#[test]
fn test_csv_rows_match_link_members() {
    let source = two_period_source(&[(2, 5.0, 8.0), (1, 6.0, 25.0), (1, 7.0, 3.0)]);
    let session = ExplorerSession::new(source, 20.0, fallback()).expect("session starts");
    let graph = session.graph().expect("graph");

    let rows = export::rows(graph);
    assert_eq!(rows.len() as u64, graph.total());
    assert_eq!(
        rows,
        vec![
            ("C1".to_string(), "T2".to_string(), "< 10 mpy".to_string()),
            ("C2".to_string(), "T0".to_string(), "< 10 mpy".to_string()),
            ("C1".to_string(), "T1".to_string(), "20-30 mpy".to_string()),
        ]
    );
}

fn rows_strategy() -> impl Strategy<Value = Vec<(u8, f64, f64)>> {
    prop::collection::vec((0u8..4, 0.0f64..80.0, 0.0f64..80.0), 0..40)
}

proptest! {
    #[test]
    fn prop_link_values_sum_to_eligible_count(rows in rows_strategy(), ceiling in 0.0f64..80.0) {
        let records: Vec<TmlRecord> = rows
            .iter()
            .enumerate()
            .map(|(i, (c, s, e))| TmlRecord::new(&format!("C{}", c), &format!("T{}", i), *s, *e))
            .collect();
        let window = Window::new(d("2025-01-01"), d("2025-02-01"), Some(ceiling));
        let graph = build(&records, &window, None);

        let eligible = rows.iter().filter(|(_, s, _)| *s <= ceiling).count() as u64;
        let links = graph.links();
        prop_assert_eq!(links.iter().map(|l| l.value).sum::<u64>(), eligible);
        prop_assert_eq!(graph.total(), eligible);

        let mut targets = HashSet::new();
        let mut seen = HashSet::new();
        for link in &links {
            prop_assert!(targets.insert(link.target));
            let count: usize = link.members.values().map(Vec::len).sum();
            prop_assert_eq!(count as u64, link.value);
            prop_assert!(link.value > 0);
            for ids in link.members.values() {
                for id in ids {
                    prop_assert!(seen.insert(id.clone()));
                }
            }
        }
    }

    #[test]
    fn prop_fallback_matches_narrow(rows in rows_strategy(), pick in prop::collection::vec(any::<bool>(), 40)) {
        let narrow = two_period_source(&rows);
        let fallback = two_period_source(&rows).without_narrow_query();
        // every other key names the wrong circuit and must match nothing
        let tmls: Vec<TmlKey> = rows
            .iter()
            .enumerate()
            .filter(|(i, _)| pick[*i])
            .map(|(i, (c, _, _))| {
                let circuit = if i % 2 == 0 { *c } else { c + 1 };
                TmlKey::new(format!("C{}", circuit), format!("T{}", i))
            })
            .collect();

        let (a, _) = drilldown::fetch_subset(&narrow, d("2025-01-01"), d("2025-02-01"), &tmls)
            .expect("narrow fetch");
        let (b, _) = drilldown::fetch_subset(&fallback, d("2025-01-01"), d("2025-02-01"), &tmls)
            .expect("fallback fetch");
        prop_assert!(a.iter().all(|r| tmls.contains(&r.key())));
        prop_assert_eq!(a, b);
    }
}
