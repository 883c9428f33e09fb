//! Canonical integer date keys.
//!
//! A `DateSerial` encodes a calendar date as `year * 10000 + month * 100 + day`,
//! so plain integer comparison orders dates chronologically.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid date: {0}")]
pub struct InvalidDate(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateSerial(i32);

impl DateSerial {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.year() * 10_000 + date.month() as i32 * 100 + date.day() as i32)
    }

    /// Serial for the `offset`-th day of `year`'s bucket.
    ///
    /// Offset 1 is January 1st. Larger offsets roll over into later months,
    /// and past December 31st into the following year. Offset 0 has no date.
    pub fn from_year_offset(year: i32, offset: u32) -> Option<Self> {
        if offset == 0 {
            return None;
        }
        let jan1 = NaiveDate::from_ymd_opt(year, 1, 1)?;
        jan1.checked_add_days(Days::new(u64::from(offset - 1)))
            .map(Self::from_date)
    }

    /// Wrap a raw `YYYYMMDD` integer, rejecting values that are not real dates.
    pub fn from_value(value: i32) -> Option<Self> {
        let serial = Self(value);
        serial.to_date().map(|_| serial)
    }

    pub fn value(self) -> i32 {
        self.0
    }

    pub fn year(self) -> i32 {
        self.0 / 10_000
    }

    pub fn month(self) -> u32 {
        (self.0 / 100 % 100) as u32
    }

    pub fn day(self) -> u32 {
        (self.0 % 100) as u32
    }

    pub fn to_date(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year(), self.month(), self.day())
    }

    /// Day-of-offset of this date within `bucket_year` (inverse of `from_year_offset`).
    pub fn offset_in(self, bucket_year: i32) -> Option<u32> {
        let jan1 = NaiveDate::from_ymd_opt(bucket_year, 1, 1)?;
        let days = (self.to_date()? - jan1).num_days();
        u32::try_from(days + 1).ok().filter(|offset| *offset >= 1)
    }
}

impl From<NaiveDate> for DateSerial {
    fn from(date: NaiveDate) -> Self {
        Self::from_date(date)
    }
}

impl fmt::Display for DateSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

impl FromStr for DateSerial {
    type Err = InvalidDate;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_date(s).map(Self::from_date)
    }
}

/// Parse a date string into a calendar date.
///
/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, compact `YYYYMMDD` and RFC 3339 timestamps
/// (the calendar date of the timestamp is used as written).
pub fn parse_date(s: &str) -> Result<NaiveDate, InvalidDate> {
    let trimmed = s.trim();

    for format in ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Ok(date);
        }
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.date_naive());
    }

    Err(InvalidDate(s.to_string()))
}

fn is_leap_year(year: i32) -> bool {
    NaiveDate::from_ymd_opt(year, 2, 29).is_some()
}

/// Number of day offsets that stay inside `year` (365 or 366).
pub fn days_in_year(year: i32) -> u32 {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}
