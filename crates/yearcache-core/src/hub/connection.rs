//! Per-context connection handles.
//!
//! Each connection has two outbound lanes. `DATA_RESULT` replies travel on
//! an unbounded lane and are never discarded, since the requesting context
//! waits on them. `STATUS_UPDATE` broadcasts travel on a bounded lane and
//! are dropped when a slow context lets it fill up.

use std::fmt;

use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use super::coordinator::Command;
use super::{FetchResult, HubError, HubEvent, HubRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outcome of pushing one event to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// Status lane full; the update was discarded.
    Dropped,
    /// The context's end is gone; the connection should be unregistered.
    Closed,
}

/// Receiving ends handed to a newly registered port.
pub(crate) struct PortChannels {
    results: mpsc::UnboundedReceiver<FetchResult>,
    status: mpsc::Receiver<Value>,
}

/// Hub-side record of a registered context.
pub(crate) struct Connection {
    pub id: ConnectionId,
    results: mpsc::UnboundedSender<FetchResult>,
    status: mpsc::Sender<Value>,
}

impl Connection {
    /// Create a connection whose status lane holds at most `status_buffer` updates.
    pub fn open(id: ConnectionId, status_buffer: usize) -> (Self, PortChannels) {
        let (results_tx, results) = mpsc::unbounded_channel();
        let (status_tx, status) = mpsc::channel(status_buffer.max(1));
        let conn = Self {
            id,
            results: results_tx,
            status: status_tx,
        };
        (conn, PortChannels { results, status })
    }

    /// Queue a `DATA_RESULT`. Only fails when the context is gone.
    pub fn reply(&self, result: FetchResult) -> Delivery {
        match self.results.send(result) {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Closed,
        }
    }

    /// Non-blocking `STATUS_UPDATE` push. The hub never waits on a slow context.
    pub fn notify(&self, payload: Value) -> Delivery {
        match self.status.try_send(payload) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => {
                warn!(connection = %self.id, "Status queue full, dropping update");
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.results.is_closed() || self.status.is_closed()
    }
}

/// A UI context's end of a hub connection.
///
/// Requests go to the shared coordinator; `DATA_RESULT` and `STATUS_UPDATE`
/// events arrive through `recv`. Dropping the port unregisters it.
pub struct HubPort {
    id: ConnectionId,
    commands: mpsc::Sender<Command>,
    results: mpsc::UnboundedReceiver<FetchResult>,
    status: mpsc::Receiver<Value>,
}

impl HubPort {
    pub(crate) fn new(id: ConnectionId, commands: mpsc::Sender<Command>, channels: PortChannels) -> Self {
        Self {
            id,
            commands,
            results: channels.results,
            status: channels.status,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn send(&self, request: HubRequest) -> Result<(), HubError> {
        self.commands
            .send(Command::Message {
                from: self.id,
                request,
            })
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Send a raw `{type, payload}` JSON envelope.
    pub async fn post_message(&self, raw: &str) -> Result<(), HubError> {
        let request: HubRequest = serde_json::from_str(raw)?;
        self.send(request).await
    }

    /// Next event for this context, or None once the hub has shut down.
    ///
    /// Pending replies are returned ahead of queued status updates.
    pub async fn recv(&mut self) -> Option<HubEvent> {
        tokio::select! {
            biased;
            Some(result) = self.results.recv() => Some(HubEvent::DataResult(result)),
            Some(payload) = self.status.recv() => Some(HubEvent::StatusUpdate(payload)),
            else => None,
        }
    }

    pub fn try_recv(&mut self) -> Option<HubEvent> {
        if let Ok(result) = self.results.try_recv() {
            return Some(HubEvent::DataResult(result));
        }
        self.status.try_recv().ok().map(HubEvent::StatusUpdate)
    }
}

impl Drop for HubPort {
    fn drop(&mut self) {
        // Best effort; the liveness sweep catches anything missed here.
        let _ = self.commands.try_send(Command::Disconnect { id: self.id });
    }
}
