//! Record sources: where tracking records come from
//!
//! The engine never talks to a transport directly. It consumes a
//! `RecordSource`, whose narrow TML-filtered query is optional: sources that
//! cannot filter by TML report `FetchError::Unsupported` and the drill-down
//! controller falls back to a full fetch plus local filtering.

use crate::category::classify;
use crate::config::CircuitFilter;
use crate::record::{TmlKey, TmlRecord};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Failure modes of a record fetch
#[derive(Debug)]
pub enum FetchError {
    /// The source does not offer this query
    Unsupported,
    /// The source offers the query but it failed
    Retrieval(anyhow::Error),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Unsupported => f.write_str("query not supported by this record source"),
            FetchError::Retrieval(e) => write!(f, "record retrieval failed: {:#}", e),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<anyhow::Error> for FetchError {
    fn from(e: anyhow::Error) -> Self {
        FetchError::Retrieval(e)
    }
}

/// Collaborator contract for tracking data
pub trait RecordSource {
    /// Measurement dates with data, chronological
    fn list_available_periods(&self) -> anyhow::Result<Vec<NaiveDate>>;

    /// Records for TMLs measured at both `start` and `end` whose starting
    /// rate is at most `ceiling` (`None` = every TML)
    fn fetch_records(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        ceiling: Option<f64>,
    ) -> Result<Vec<TmlRecord>, FetchError>;

    /// Records for the given (circuit, TML) pairs only, regardless of
    /// starting rate
    fn fetch_records_for_tmls(
        &self,
        _start: NaiveDate,
        _end: NaiveDate,
        _tmls: &[TmlKey],
    ) -> Result<Vec<TmlRecord>, FetchError> {
        Err(FetchError::Unsupported)
    }
}

/// A single dated corrosion-rate reading for a TML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Measurement {
    pub circuit_id: String,
    pub tml_id: String,
    pub date: NaiveDate,
    pub corrosion_rate: f64,
}

/// In-memory record source
///
/// Joins measurements the same way the SQLite store does: one record per
/// TML measured on both dates, in the order TMLs were first seen. A TML
/// holds at most one reading per date; a later reading replaces it.
#[derive(Debug, Clone)]
pub struct MemorySource {
    measurements: Vec<Measurement>,
    narrow_query: bool,
}

impl Default for MemorySource {
    fn default() -> Self {
        MemorySource::new(Vec::new())
    }
}

impl MemorySource {
    pub fn new(measurements: Vec<Measurement>) -> Self {
        let mut source = MemorySource {
            measurements: Vec::with_capacity(measurements.len()),
            narrow_query: true,
        };
        for m in measurements {
            source.push(&m.circuit_id, &m.tml_id, m.date, m.corrosion_rate);
        }
        source
    }

    /// Disable the TML-filtered query, forcing callers onto their fallback
    pub fn without_narrow_query(mut self) -> Self {
        self.narrow_query = false;
        self
    }

    pub fn push(
        &mut self,
        circuit_id: &str,
        tml_id: &str,
        date: NaiveDate,
        corrosion_rate: f64,
    ) -> &mut Self {
        if let Some(existing) = self
            .measurements
            .iter_mut()
            .find(|m| m.circuit_id == circuit_id && m.tml_id == tml_id && m.date == date)
        {
            existing.corrosion_rate = corrosion_rate;
            return self;
        }
        self.measurements.push(Measurement {
            circuit_id: circuit_id.to_string(),
            tml_id: tml_id.to_string(),
            date,
            corrosion_rate,
        });
        self
    }

    fn rate_at(&self, circuit_id: &str, tml_id: &str, date: NaiveDate) -> Option<f64> {
        self.measurements
            .iter()
            .find(|m| m.circuit_id == circuit_id && m.tml_id == tml_id && m.date == date)
            .map(|m| m.corrosion_rate)
    }

    fn track(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        keep: impl Fn(&Measurement) -> bool,
    ) -> Vec<TmlRecord> {
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        let mut records = Vec::new();

        for m in self.measurements.iter().filter(|m| m.date == start) {
            if !seen.insert((m.circuit_id.as_str(), m.tml_id.as_str())) || !keep(m) {
                continue;
            }
            if let Some(end_rate) = self.rate_at(&m.circuit_id, &m.tml_id, end) {
                let mut record =
                    TmlRecord::new(&m.circuit_id, &m.tml_id, m.corrosion_rate, end_rate);
                record.end_category = Some(classify(end_rate));
                records.push(record);
            }
        }
        records
    }
}

impl RecordSource for MemorySource {
    fn list_available_periods(&self) -> anyhow::Result<Vec<NaiveDate>> {
        let mut dates: Vec<NaiveDate> = self.measurements.iter().map(|m| m.date).collect();
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    fn fetch_records(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        ceiling: Option<f64>,
    ) -> Result<Vec<TmlRecord>, FetchError> {
        Ok(self.track(start, end, |m| {
            ceiling.map_or(true, |c| m.corrosion_rate <= c)
        }))
    }

    fn fetch_records_for_tmls(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        tmls: &[TmlKey],
    ) -> Result<Vec<TmlRecord>, FetchError> {
        if !self.narrow_query {
            return Err(FetchError::Unsupported);
        }
        let wanted: HashSet<(&str, &str)> = tmls
            .iter()
            .map(|k| (k.circuit_id.as_str(), k.tml_id.as_str()))
            .collect();
        Ok(self.track(start, end, |m| {
            wanted.contains(&(m.circuit_id.as_str(), m.tml_id.as_str()))
        }))
    }
}

/// Source restricted to circuits admitted by a `CircuitFilter`
pub struct FilteredSource<S> {
    inner: S,
    circuits: CircuitFilter,
}

impl<S: RecordSource> FilteredSource<S> {
    pub fn new(inner: S, circuits: CircuitFilter) -> Self {
        FilteredSource { inner, circuits }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn retain(&self, mut records: Vec<TmlRecord>) -> Vec<TmlRecord> {
        records.retain(|r| self.circuits.allows(&r.circuit_id));
        records
    }
}

impl<S: RecordSource> RecordSource for FilteredSource<S> {
    fn list_available_periods(&self) -> anyhow::Result<Vec<NaiveDate>> {
        self.inner.list_available_periods()
    }

    fn fetch_records(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        ceiling: Option<f64>,
    ) -> Result<Vec<TmlRecord>, FetchError> {
        self.inner
            .fetch_records(start, end, ceiling)
            .map(|records| self.retain(records))
    }

    fn fetch_records_for_tmls(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        tmls: &[TmlKey],
    ) -> Result<Vec<TmlRecord>, FetchError> {
        self.inner
            .fetch_records_for_tmls(start, end, tmls)
            .map(|records| self.retain(records))
    }
}
