//! Per-TML tracking records
//!
//! A record joins one TML's measurement at the window start with its
//! measurement at the window end. Records are immutable once fetched.

use crate::category::{classify, Category};
use serde::{Deserialize, Serialize};

/// Identity of a TML: ids are only unique within their circuit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TmlKey {
    pub circuit_id: String,
    pub tml_id: String,
}

impl TmlKey {
    pub fn new(circuit_id: impl Into<String>, tml_id: impl Into<String>) -> Self {
        TmlKey {
            circuit_id: circuit_id.into(),
            tml_id: tml_id.into(),
        }
    }
}

/// One TML's corrosion rates at the start and end of a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TmlRecord {
    #[serde(
        default,
        alias = "tmlrecordid",
        skip_serializing_if = "Option::is_none"
    )]
    pub tml_record_id: Option<i64>,
    #[serde(alias = "circuitid")]
    pub circuit_id: String,
    #[serde(alias = "tmlid", alias = "id")]
    pub tml_id: String,
    #[serde(alias = "startrate", alias = "startCorrosionRate", alias = "startcorrosionrate")]
    pub start_rate: f64,
    #[serde(alias = "endrate", alias = "endCorrosionRate", alias = "endcorrosionrate")]
    pub end_rate: f64,
    /// Category computed by the producer, if it supplied one
    #[serde(
        default,
        alias = "endcategory",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_category: Option<Category>,
}

impl TmlRecord {
    pub fn new(
        circuit_id: impl Into<String>,
        tml_id: impl Into<String>,
        start_rate: f64,
        end_rate: f64,
    ) -> Self {
        TmlRecord {
            tml_record_id: None,
            circuit_id: circuit_id.into(),
            tml_id: tml_id.into(),
            start_rate,
            end_rate,
            end_category: None,
        }
    }

    pub fn key(&self) -> TmlKey {
        TmlKey::new(self.circuit_id.as_str(), self.tml_id.as_str())
    }

    pub fn start_category(&self) -> Category {
        classify(self.start_rate)
    }

    /// Category at the window end; a producer-supplied category wins over
    /// classifying `end_rate` locally.
    pub fn end_category(&self) -> Category {
        self.end_category
            .unwrap_or_else(|| classify(self.end_rate))
    }

    /// Whether the record enters a graph limited to `ceiling` (inclusive)
    pub fn is_eligible(&self, ceiling: Option<f64>) -> bool {
        ceiling.map_or(true, |c| self.start_rate <= c)
    }
}
