//! Remote data provider interface.
//!
//! The upstream serves one calendar year of records per request, addressed
//! by a composite `symbol-year` key. Two call shapes exist:
//!
//! - the direct path (`YearProvider`), where a 200 body is the year itself:
//!   an array indexed by day-of-offset or the `"Pending"` sentinel
//! - the hub path (`HubUpstream`), where the body is a `{status, data}` envelope
//!
//! `HttpProvider` implements both over reqwest.

pub mod client;
pub mod error;

pub use client::HttpProvider;
pub use error::ProviderError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Record;

/// Sentinel the upstream returns while a year is still being synced.
pub const PENDING_SENTINEL: &str = "Pending";

/// Envelope status marking a usable payload.
pub const SUCCESS_STATUS: &str = "Success";

/// Cache key shared by the upstream URL and the hub cache.
pub fn composite_key(symbol: &str, year: i32) -> String {
    format!("{}-{}", symbol, year)
}

/// One year of provider data, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum YearData {
    /// Records indexed by day-of-offset; index 0 is unused.
    Records(Vec<Option<Record>>),
    /// The upstream scheduled a sync task; retry later.
    Pending,
    /// Neither an array nor the pending sentinel.
    Unrecognized(Value),
}

impl YearData {
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(s) if s == PENDING_SENTINEL => YearData::Pending,
            Value::Array(items) => YearData::Records(
                items
                    .into_iter()
                    .map(|item| if is_empty_entry(&item) { None } else { Some(item) })
                    .collect(),
            ),
            other => YearData::Unrecognized(other),
        }
    }
}

/// Entries the upstream uses to mean "no record for this day".
pub(crate) fn is_empty_entry(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Response envelope served to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamResponse {
    pub status: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        self.status == SUCCESS_STATUS
    }
}

/// Direct per-context fetch path used by `YearlyRecordStore`.
#[async_trait]
pub trait YearProvider: Send + Sync {
    async fn fetch_year(&self, symbol: &str, year: i32) -> Result<YearData, ProviderError>;
}

/// Upstream used by the connection hub.
#[async_trait]
pub trait HubUpstream: Send + Sync {
    async fn fetch_composite(&self, composite_key: &str) -> Result<UpstreamResponse, ProviderError>;
}
