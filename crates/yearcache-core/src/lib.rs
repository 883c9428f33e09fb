//! yearcache core library.
//!
//! Client-side caching of date-indexed provider data:
//!
//! - `cache`: per-symbol `YearlyRecordStore` fetching whole years once
//! - `hub`: a shared coordinator deduplicating fetches across UI contexts
//!   and broadcasting status to all of them
//! - `provider`: the `/dapi` HTTP client and the traits both paths fetch through
//! - `date`: `DateSerial` keys (`YYYYMMDD` integers)

pub mod cache;
pub mod config;
pub mod date;
pub mod hub;
pub mod models;
pub mod provider;

pub use cache::{RangeError, RangeResult, YearState, YearlyRecordStore};
pub use config::Config;
pub use date::DateSerial;
pub use hub::{ConnectionHub, FetchRequest, FetchResult, HubEvent, HubHandle, HubPort, HubRequest};
pub use provider::{HttpProvider, ProviderError};
