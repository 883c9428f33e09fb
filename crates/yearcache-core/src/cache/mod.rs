//! In-memory, date-indexed record caching.
//!
//! This module provides the `YearlyRecordStore`, one per tracked symbol.
//! Records are fetched a calendar year at a time and each year's fetch
//! state is tracked explicitly so a year is requested from the provider
//! only once:
//!
//! - `NotFetched`: never imported, or the last attempt failed
//! - `FetchedEmpty`: imported, but the provider had no records
//! - `FetchedWithData`: imported, with the highest day-of-offset seen

pub mod state;
pub mod store;

pub use state::YearState;
pub use store::{RangeError, RangeResult, YearlyRecordStore, PENDING_NOTICE};
