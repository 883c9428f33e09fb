use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::date::{parse_date, DateSerial};
use crate::models::Record;
use crate::provider::{is_empty_entry, YearData, YearProvider};

use super::state::{YearMark, YearState};

/// User-facing notice returned while the upstream is still syncing a year.
pub const PENDING_NOTICE: &str = "Task Scheduled. Please retry later.";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// At least one year of the range is still being prepared upstream.
    #[error("{}", PENDING_NOTICE)]
    Pending { years: Vec<i32> },

    #[error("Invalid date: {0}")]
    InvalidDate(String),
}

pub type RangeResult = Result<BTreeMap<DateSerial, Record>, RangeError>;

/// Per-symbol cache of records keyed by date serial.
///
/// Whole years are fetched from the provider at most once; later range
/// queries are answered from memory. The current calendar year can be
/// refetched after it goes stale since the upstream fills it incrementally.
pub struct YearlyRecordStore {
    id: String,
    provider: Arc<dyn YearProvider>,
    records: BTreeMap<DateSerial, Record>,
    years: BTreeMap<i32, YearMark>,
    current_year_stale_minutes: Option<i64>,
}

impl YearlyRecordStore {
    pub fn new(id: impl Into<String>, provider: Arc<dyn YearProvider>) -> Self {
        Self {
            id: id.into(),
            provider,
            records: BTreeMap::new(),
            years: BTreeMap::new(),
            current_year_stale_minutes: None,
        }
    }

    /// Refetch the current calendar year once its import is older than `minutes`.
    pub fn with_current_year_staleness(mut self, minutes: Option<i64>) -> Self {
        self.current_year_stale_minutes = minutes;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &BTreeMap<DateSerial, Record> {
        &self.records
    }

    pub fn watermark(&self, year: i32) -> YearState {
        self.years
            .get(&year)
            .map(|mark| mark.state)
            .unwrap_or(YearState::NotFetched)
    }

    pub fn fetched_years(&self) -> Vec<i32> {
        self.years.keys().copied().collect()
    }

    /// Merge one year of records indexed by day-of-offset.
    ///
    /// Index 0 and empty entries are skipped. Existing dates are overwritten,
    /// other dates are kept. The year's state reflects this call only.
    pub fn import(&mut self, year: i32, records: &[Option<Record>]) {
        let mut watermark = 0;

        for (offset, entry) in records.iter().enumerate().skip(1) {
            let Some(record) = entry.as_ref().filter(|r| !is_empty_entry(r)) else {
                continue;
            };
            let Some(serial) = u32::try_from(offset)
                .ok()
                .and_then(|offset| DateSerial::from_year_offset(year, offset))
            else {
                continue;
            };
            self.records.insert(serial, record.clone());
            watermark = watermark.max(offset as u32);
        }

        let state = if watermark == 0 {
            YearState::FetchedEmpty
        } else {
            YearState::FetchedWithData { watermark }
        };
        debug!(symbol = %self.id, year, watermark, "Imported year");
        self.years.insert(year, YearMark::new(state));
    }

    fn needs_fetch(&self, year: i32, now: DateTime<Utc>) -> bool {
        match self.years.get(&year) {
            None => true,
            Some(mark) => {
                year == now.year()
                    && self
                        .current_year_stale_minutes
                        .is_some_and(|limit| mark.is_stale(now, limit))
            }
        }
    }

    /// Records with keys in `[from, to]`, in ascending date order.
    pub fn slice(&self, from: DateSerial, to: DateSerial) -> BTreeMap<DateSerial, Record> {
        if from > to {
            return BTreeMap::new();
        }
        self.records
            .range(from..=to)
            .map(|(serial, record)| (*serial, record.clone()))
            .collect()
    }

    /// Return cached records between two dates, fetching missing years first.
    ///
    /// Years are fetched one at a time in ascending order. A failed or
    /// malformed year is logged and left unfetched without stopping the
    /// others. If any year is still pending upstream the whole call returns
    /// `RangeError::Pending` instead of partial data.
    pub async fn get(&mut self, from: NaiveDate, to: NaiveDate) -> RangeResult {
        let now = Utc::now();
        let mut pending_years = Vec::new();

        for year in from.year()..=to.year() {
            if !self.needs_fetch(year, now) {
                debug!(symbol = %self.id, year, "Year already cached, skipping fetch");
                continue;
            }

            match self.provider.fetch_year(&self.id, year).await {
                Ok(YearData::Records(records)) => self.import(year, &records),
                Ok(YearData::Pending) => {
                    info!(symbol = %self.id, year, "Year pending upstream");
                    pending_years.push(year);
                }
                Ok(YearData::Unrecognized(value)) => {
                    warn!(
                        symbol = %self.id,
                        year,
                        kind = json_kind(&value),
                        "Unrecognized year data, leaving year unfetched"
                    );
                }
                Err(e) => {
                    warn!(
                        symbol = %self.id,
                        year,
                        status = ?e.status_code(),
                        error = %e,
                        "Failed to fetch year"
                    );
                }
            }
        }

        if !pending_years.is_empty() {
            return Err(RangeError::Pending {
                years: pending_years,
            });
        }

        Ok(self.slice(DateSerial::from_date(from), DateSerial::from_date(to)))
    }

    /// Same as `get`, with the bounds given as date strings.
    pub async fn get_str(&mut self, from: &str, to: &str) -> RangeResult {
        let from = parse_date(from).map_err(|e| RangeError::InvalidDate(e.0))?;
        let to = parse_date(to).map_err(|e| RangeError::InvalidDate(e.0))?;
        self.get(from, to).await
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Tests
// ============================================================================
