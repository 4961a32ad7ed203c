//! Corrosion-rate severity classification
//!
//! Global invariants enforced:
//! - Classification is total over all f64 values
//! - Bins are closed-low/open-high, except the top bin which is unbounded
//! - Canonical order is ascending severity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity category for a corrosion rate (mils per year)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "< 10 mpy")]
    Below10, // < 10
    #[serde(rename = "10-20 mpy")]
    From10To20, // 10-20
    #[serde(rename = "20-30 mpy")]
    From20To30, // 20-30
    #[serde(rename = "30-50 mpy")]
    From30To50, // 30-50
    #[serde(rename = "> 50 mpy")]
    Above50, // >= 50
}

impl Category {
    /// All categories in canonical severity order
    pub const ALL: [Category; 5] = [
        Category::Below10,
        Category::From10To20,
        Category::From20To30,
        Category::From30To50,
        Category::Above50,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::Below10 => "< 10 mpy",
            Category::From10To20 => "10-20 mpy",
            Category::From20To30 => "20-30 mpy",
            Category::From30To50 => "30-50 mpy",
            Category::Above50 => "> 50 mpy",
        }
    }

    /// Half-open `[lo, hi)` bounds; `None` means unbounded on that side
    pub fn bounds(&self) -> (Option<f64>, Option<f64>) {
        match self {
            Category::Below10 => (None, Some(10.0)),
            Category::From10To20 => (Some(10.0), Some(20.0)),
            Category::From20To30 => (Some(20.0), Some(30.0)),
            Category::From30To50 => (Some(30.0), Some(50.0)),
            Category::Above50 => (Some(50.0), None),
        }
    }

    /// Parse a category from its label or from any node name containing
    /// the bin's distinguishing fragment (e.g. `"20-30 mpy (April)"`).
    pub fn from_label(label: &str) -> Option<Category> {
        let label = label.trim();
        if label.contains("< 10") {
            Some(Category::Below10)
        } else if label.contains("10-20") {
            Some(Category::From10To20)
        } else if label.contains("20-30") {
            Some(Category::From20To30)
        } else if label.contains("30-50") {
            Some(Category::From30To50)
        } else if label.contains("> 50") || label.contains(">= 50") {
            Some(Category::Above50)
        } else {
            None
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify a corrosion rate into its severity category
///
/// Negative rates land in the lowest bin. `NaN` fails every comparison and
/// lands in the top bin, the same way the tracking query's `ELSE` branch does.
pub fn classify(rate: f64) -> Category {
    if rate < 10.0 {
        Category::Below10
    } else if rate < 20.0 {
        Category::From10To20
    } else if rate < 30.0 {
        Category::From20To30
    } else if rate < 50.0 {
        Category::From30To50
    } else {
        Category::Above50
    }
}
