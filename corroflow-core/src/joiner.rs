//! Temporal join: group eligible records by their end-of-window category
//!
//! Global invariants enforced:
//! - Only records with `start_rate <= ceiling` are grouped
//! - Every eligible record lands in exactly one group
//! - Records keep input order within a group
//! - Member ordering is explicit: circuits ASCII-ascending, TML ids by numeric suffix

use crate::category::Category;
use crate::record::TmlRecord;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Member TML ids keyed by circuit id
pub type Members = BTreeMap<String, Vec<String>>;

/// Eligible records that ended the window in one category
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryGroup {
    /// Records in input order
    pub records: Vec<TmlRecord>,
    pub members: Members,
}

impl CategoryGroup {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// TML ids of every member, in record order
    pub fn tml_ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.tml_id.clone()).collect()
    }
}

/// Non-empty groups keyed by category (iteration is canonical severity order)
pub type CategoryGroups = BTreeMap<Category, CategoryGroup>;

/// Group eligible records by end category
///
/// `ceiling` of `None` admits every record.
pub fn join(records: &[TmlRecord], ceiling: Option<f64>) -> CategoryGroups {
    let mut groups: CategoryGroups = BTreeMap::new();

    for record in records.iter().filter(|r| r.is_eligible(ceiling)) {
        let group = groups.entry(record.end_category()).or_default();
        group
            .members
            .entry(record.circuit_id.clone())
            .or_default()
            .push(record.tml_id.clone());
        group.records.push(record.clone());
    }

    for group in groups.values_mut() {
        for ids in group.members.values_mut() {
            ids.sort_by(|a, b| compare_tml_ids(a, b));
        }
    }

    groups
}

/// Trailing run of ASCII digits in a TML id, if it fits in a u64
fn numeric_suffix(id: &str) -> Option<u64> {
    static SUFFIX_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = SUFFIX_RE.get_or_init(|| Regex::new(r"(\d+)\D*$").unwrap());
    re.captures(id)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
}

/// Order TML ids by their numeric suffix
///
/// Tie-break rules:
/// 1. Ids with a numeric suffix sort before ids without one
/// 2. Equal suffixes, and pairs of non-numeric ids, fall back to string order
pub fn compare_tml_ids(a: &str, b: &str) -> Ordering {
    match (numeric_suffix(a), numeric_suffix(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
