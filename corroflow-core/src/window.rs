//! Time windows and the period selection state machine
//!
//! Global invariants enforced:
//! - Periods are ordered chronologically, never lexically
//! - A selected end period strictly follows the selected start period
//! - Available end periods are recomputed on demand, never cached

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Fallback start period when no measurement dates are available
pub const FALLBACK_START: &str = "2025-01-01";

/// Fallback end period when no measurement dates are available
pub const FALLBACK_END: &str = "2025-03-31";

/// Parse a `YYYY-MM-DD` period identifier
pub fn parse_period(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid period (expected YYYY-MM-DD): {}", s))
}

/// Full English month name for a period (e.g. `March`)
pub fn month_name(date: NaiveDate) -> String {
    date.format("%B").to_string()
}

/// Reject negative, infinite, and NaN rate ceilings
pub fn validate_rate_ceiling(ceiling: f64) -> Result<()> {
    if !ceiling.is_finite() || ceiling < 0.0 {
        anyhow::bail!("rate ceiling must be a non-negative number (got {})", ceiling);
    }
    Ok(())
}

/// (year, month) of the calendar month after `date`
fn following_month(date: NaiveDate) -> (i32, u32) {
    if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    }
}

/// A measured transition: population at `start`, categories at `end`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Inclusive ceiling on the starting rate; `None` admits every TML
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rate_ceiling: Option<f64>,
}

impl Window {
    pub fn new(start: NaiveDate, end: NaiveDate, rate_ceiling: Option<f64>) -> Self {
        Window {
            start,
            end,
            rate_ceiling,
        }
    }

    pub fn start_month(&self) -> String {
        month_name(self.start)
    }

    pub fn end_month(&self) -> String {
        month_name(self.end)
    }
}

/// Selection state over the periods that have data
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSelector {
    available: Vec<NaiveDate>,
    start: NaiveDate,
    end: Option<NaiveDate>,
    rate_ceiling: f64,
}

impl WindowSelector {
    /// Initial state: earliest period, and the earliest period after it
    ///
    /// With no available periods the selector holds `fallback` and rejects
    /// every transition, since no period can be validated.
    pub fn new(
        mut available: Vec<NaiveDate>,
        rate_ceiling: f64,
        fallback: (NaiveDate, NaiveDate),
    ) -> Result<Self> {
        validate_rate_ceiling(rate_ceiling)?;
        available.sort();
        available.dedup();

        let (start, end) = match available.first() {
            Some(&first) => (first, available.iter().copied().find(|p| *p > first)),
            None => (fallback.0, Some(fallback.1)),
        };

        Ok(WindowSelector {
            available,
            start,
            end,
            rate_ceiling,
        })
    }

    pub fn available(&self) -> &[NaiveDate] {
        &self.available
    }

    pub fn has_data(&self) -> bool {
        !self.available.is_empty()
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.end
    }

    pub fn rate_ceiling(&self) -> f64 {
        self.rate_ceiling
    }

    fn ensure_available(&self, period: NaiveDate) -> Result<()> {
        if !self.available.contains(&period) {
            anyhow::bail!("no measurements available for period {}", period);
        }
        Ok(())
    }

    /// Select a new start period
    ///
    /// If the current end no longer strictly follows `period`, the end is
    /// moved to the first available period after it, or unset if none exists.
    pub fn set_start(&mut self, period: NaiveDate) -> Result<()> {
        self.ensure_available(period)?;
        self.start = period;

        if self.end.map_or(true, |end| end <= period) {
            self.end = self.available_end_periods().first().copied();
        }
        Ok(())
    }

    /// Select a new end period; it must strictly follow the start
    pub fn set_end(&mut self, period: NaiveDate) -> Result<()> {
        self.ensure_available(period)?;
        if period <= self.start {
            anyhow::bail!(
                "end period {} must be after start period {}",
                period,
                self.start
            );
        }
        self.end = Some(period);
        Ok(())
    }

    pub fn set_rate_ceiling(&mut self, ceiling: f64) -> Result<()> {
        validate_rate_ceiling(ceiling)?;
        self.rate_ceiling = ceiling;
        Ok(())
    }

    /// All available periods strictly after the selected start
    pub fn available_end_periods(&self) -> Vec<NaiveDate> {
        self.available
            .iter()
            .copied()
            .filter(|p| *p > self.start)
            .collect()
    }

    /// First available period in the calendar month after `period`
    pub fn next_period_after(&self, period: NaiveDate) -> Option<NaiveDate> {
        let (year, month) = following_month(period);
        self.available
            .iter()
            .copied()
            .find(|p| p.year() == year && p.month() == month)
    }

    /// Drill-down boundary following the selected end period
    pub fn next_period(&self) -> Option<NaiveDate> {
        self.end.and_then(|end| self.next_period_after(end))
    }

    /// Window to build, if an end period is selected
    pub fn window(&self) -> Option<Window> {
        self.end
            .map(|end| Window::new(self.start, end, Some(self.rate_ceiling)))
    }
}

/// Selection to apply before the first graph is built
///
/// Unset fields keep the selector's defaults. The ceiling is applied first,
/// then the start, then the end, so an explicit end is checked against the
/// requested start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowRequest {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub rate_ceiling: Option<f64>,
}

impl WindowRequest {
    pub fn apply(&self, selector: &mut WindowSelector) -> Result<()> {
        if let Some(ceiling) = self.rate_ceiling {
            selector.set_rate_ceiling(ceiling)?;
        }
        if let Some(start) = self.start {
            selector
                .set_start(start)
                .with_context(|| format!("invalid start period {}", start))?;
        }
        if let Some(end) = self.end {
            selector
                .set_end(end)
                .with_context(|| format!("invalid end period {}", end))?;
        }
        Ok(())
    }
}
