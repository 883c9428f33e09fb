//! Typed view over daily price records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::date::DateSerial;

use super::Record;

/// A single trading day as emitted by the upstream syncer.
///
/// The wire format uses single-letter keys. Anything beyond the five core
/// fields is preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    #[serde(rename = "C")]
    pub close: f64,
    #[serde(rename = "O")]
    pub open: f64,
    #[serde(rename = "H")]
    pub high: f64,
    #[serde(rename = "L")]
    pub low: f64,
    #[serde(rename = "V", default)]
    pub volume: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DailyBar {
    /// Interpret a stored record as a bar. Returns None for records missing a price field.
    pub fn from_record(record: &Record) -> Option<Self> {
        serde_json::from_value(record.clone()).ok()
    }

    /// Close minus open.
    pub fn change(&self) -> f64 {
        self.close - self.open
    }

    /// High minus low.
    pub fn spread(&self) -> f64 {
        self.high - self.low
    }

    /// Percent change from open to close, None when the open is zero.
    pub fn change_pct(&self) -> Option<f64> {
        if self.open == 0.0 {
            None
        } else {
            Some(self.change() / self.open * 100.0)
        }
    }
}

/// Convert a range result into bars, skipping records that don't look like bars.
pub fn bars_in(records: &BTreeMap<DateSerial, Record>) -> Vec<(DateSerial, DailyBar)> {
    records
        .iter()
        .filter_map(|(serial, record)| DailyBar::from_record(record).map(|bar| (*serial, bar)))
        .collect()
}
