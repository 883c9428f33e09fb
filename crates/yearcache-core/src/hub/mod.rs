//! Shared connection hub.
//!
//! A single background coordinator serves every connected UI context:
//!
//! - `FETCH_DATA` requests are answered from a shared `symbol-year` cache,
//!   joined onto an outstanding upstream call for the same key, or sent
//!   upstream once. Every reply carries the caller's correlation key.
//! - `BROADCAST_STATUS` payloads are fanned out as `STATUS_UPDATE` to all
//!   registered contexts, the sender included.
//!
//! Contexts are unregistered when their port is dropped, when a delivery
//! finds the channel closed, or by the periodic liveness sweep.

pub mod connection;
pub mod coordinator;
pub mod error;
pub mod protocol;

pub use connection::{ConnectionId, HubPort};
pub use coordinator::{ConnectionHub, HubHandle, HubOptions, HubSnapshot};
pub use error::HubError;
pub use protocol::{FetchRequest, FetchResult, HubEvent, HubRequest, ERROR_STATUS};
