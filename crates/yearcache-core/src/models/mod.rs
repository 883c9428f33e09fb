//! Data models for cached provider records.
//!
//! Records are kept as opaque JSON values by the store and the hub. The
//! `DailyBar` view gives typed access to the close/open/high/low/volume
//! fields the upstream emits for each trading day.

pub mod bar;

pub use bar::{bars_in, DailyBar};

/// One provider record, stored exactly as received.
pub type Record = serde_json::Value;
