//! The shared coordinator task.
//!
//! One `ConnectionHub` owns the connection registry, the shared result cache
//! and the in-flight table. Every mutation happens inside its run loop, one
//! command at a time, so none of that state needs a lock. Upstream calls run
//! in spawned tasks and report back through a completion channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::provider::{HubUpstream, UpstreamResponse};

use super::connection::{Connection, ConnectionId, Delivery, HubPort, PortChannels};
use super::{FetchRequest, FetchResult, HubError, HubRequest};

// ============================================================================
// Constants
// ============================================================================

/// Default per-connection status queue size (also used for the command queue).
pub const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 32;

/// Default period of the closed-connection sweep.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Shortest sweep period accepted.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct HubOptions {
    pub channel_buffer_size: usize,
    pub sweep_interval: Duration,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

/// Commands processed by the run loop.
pub(crate) enum Command {
    Connect {
        respond: oneshot::Sender<(ConnectionId, PortChannels)>,
    },
    Message {
        from: ConnectionId,
        request: HubRequest,
    },
    Fetch {
        request: FetchRequest,
        respond: oneshot::Sender<FetchResult>,
    },
    Broadcast {
        payload: Value,
    },
    Disconnect {
        id: ConnectionId,
    },
    Snapshot {
        respond: oneshot::Sender<HubSnapshot>,
    },
    Shutdown,
}

/// Where a fetch result goes.
enum ReplyTo {
    Port(ConnectionId),
    Direct(oneshot::Sender<FetchResult>),
}

/// A caller waiting on a composite key, with its own correlation token.
struct Waiter {
    key: String,
    reply: ReplyTo,
}

/// Upstream call finished for a composite key.
struct Completion {
    composite_key: String,
    outcome: Result<UpstreamResponse, String>,
}

/// Point-in-time view of hub state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubSnapshot {
    pub connections: Vec<ConnectionId>,
    pub cached_keys: Vec<String>,
    pub in_flight: Vec<String>,
}

/// Hub state, owned exclusively by the coordinator.
#[derive(Default)]
struct HubContext {
    connections: Vec<Connection>,
    shared_cache: HashMap<String, Value>,
    in_flight: HashMap<String, Vec<Waiter>>,
    next_id: u64,
}

pub struct ConnectionHub {
    context: HubContext,
    upstream: Arc<dyn HubUpstream>,
    options: HubOptions,
    commands: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
}

impl ConnectionHub {
    /// Build a hub and the handle used to reach it. Nothing runs until `run` is awaited.
    pub fn new(upstream: Arc<dyn HubUpstream>, options: HubOptions) -> (Self, HubHandle) {
        let (commands_tx, commands) = mpsc::channel(options.channel_buffer_size.max(1));
        let (completions_tx, completions) = mpsc::unbounded_channel();

        let hub = Self {
            context: HubContext::default(),
            upstream,
            options,
            commands,
            completions_tx,
            completions,
        };
        (hub, HubHandle { commands: commands_tx })
    }

    /// Build a hub and run it on a new Tokio task.
    pub fn spawn(upstream: Arc<dyn HubUpstream>, options: HubOptions) -> HubHandle {
        let (hub, handle) = Self::new(upstream, options);
        tokio::spawn(hub.run());
        handle
    }

    /// Process commands until shutdown or until every handle and port is dropped.
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.options.sweep_interval.max(MIN_SWEEP_INTERVAL));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Connection hub started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(completion) = self.completions.recv() => self.complete_fetch(completion),
                _ = sweep.tick() => self.sweep(),
            }
        }

        info!(
            connections = self.context.connections.len(),
            cached = self.context.shared_cache.len(),
            "Connection hub stopped"
        );
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { respond } => {
                let id = self.register();
                let (conn, channels) = Connection::open(id, self.options.channel_buffer_size);
                self.context.connections.push(conn);
                if respond.send((id, channels)).is_err() {
                    self.remove_connection(id);
                }
            }
            Command::Message { from, request } => match request {
                HubRequest::FetchData(request) => {
                    self.handle_fetch_data(request, ReplyTo::Port(from))
                }
                HubRequest::BroadcastStatus(payload) => self.broadcast(payload),
            },
            Command::Fetch { request, respond } => {
                self.handle_fetch_data(request, ReplyTo::Direct(respond))
            }
            Command::Broadcast { payload } => self.broadcast(payload),
            Command::Disconnect { id } => self.remove_connection(id),
            Command::Snapshot { respond } => {
                let _ = respond.send(self.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn register(&mut self) -> ConnectionId {
        let id = ConnectionId(self.context.next_id);
        self.context.next_id += 1;
        info!(connection = %id, total = self.context.connections.len() + 1, "Connection registered");
        id
    }

    fn remove_connection(&mut self, id: ConnectionId) {
        let before = self.context.connections.len();
        self.context.connections.retain(|conn| conn.id != id);
        if self.context.connections.len() != before {
            info!(connection = %id, total = self.context.connections.len(), "Connection removed");
        }
    }

    /// Answer from the shared cache, join an outstanding call, or start one.
    fn handle_fetch_data(&mut self, request: FetchRequest, reply: ReplyTo) {
        let composite = request.composite_key();
        let waiter = Waiter {
            key: request.key,
            reply,
        };

        if let Some(data) = self.context.shared_cache.get(&composite) {
            debug!(key = %composite, "Shared cache hit");
            let result = FetchResult::success(data.clone(), waiter.key.clone());
            self.deliver_result(waiter, result);
            return;
        }

        if let Some(waiters) = self.context.in_flight.get_mut(&composite) {
            debug!(key = %composite, waiting = waiters.len() + 1, "Joining in-flight request");
            waiters.push(waiter);
            return;
        }

        debug!(key = %composite, "Shared cache miss, requesting upstream");
        self.context.in_flight.insert(composite.clone(), vec![waiter]);

        let upstream = Arc::clone(&self.upstream);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let outcome = upstream
                .fetch_composite(&composite)
                .await
                .map_err(|e| e.to_string());
            let _ = completions.send(Completion {
                composite_key: composite,
                outcome,
            });
        });
    }

    fn complete_fetch(&mut self, completion: Completion) {
        let Completion {
            composite_key,
            outcome,
        } = completion;
        let waiters = self
            .context
            .in_flight
            .remove(&composite_key)
            .unwrap_or_default();

        match &outcome {
            Ok(response) if response.is_success() => {
                self.context
                    .shared_cache
                    .insert(composite_key.clone(), response.data.clone());
            }
            Ok(response) => {
                debug!(key = %composite_key, status = %response.status, "Upstream not ready, not caching");
            }
            Err(e) => {
                warn!(key = %composite_key, error = %e, "Upstream request failed");
            }
        }

        for waiter in waiters {
            let result = match &outcome {
                Ok(response) => FetchResult::from_upstream(response, waiter.key.clone()),
                Err(message) => FetchResult::error(message.clone(), waiter.key.clone()),
            };
            self.deliver_result(waiter, result);
        }
    }

    fn deliver_result(&mut self, waiter: Waiter, result: FetchResult) {
        match waiter.reply {
            ReplyTo::Port(id) => {
                let Some(conn) = self.context.connections.iter().find(|conn| conn.id == id) else {
                    debug!(connection = %id, "Result for unregistered connection dropped");
                    return;
                };
                if conn.reply(result) == Delivery::Closed {
                    self.remove_connection(id);
                }
            }
            ReplyTo::Direct(respond) => {
                if respond.send(result).is_err() {
                    debug!(key = %waiter.key, "Caller gone before result arrived");
                }
            }
        }
    }

    /// Send a `STATUS_UPDATE` to every registered connection in registration order.
    fn broadcast(&mut self, payload: Value) {
        let mut closed = Vec::new();
        for conn in &self.context.connections {
            if conn.notify(payload.clone()) == Delivery::Closed {
                closed.push(conn.id);
            }
        }
        debug!(recipients = self.context.connections.len() - closed.len(), "Broadcast sent");
        for id in closed {
            self.remove_connection(id);
        }
    }

    /// Drop registrations whose context end has gone away.
    fn sweep(&mut self) {
        let closed: Vec<ConnectionId> = self
            .context
            .connections
            .iter()
            .filter(|conn| conn.is_closed())
            .map(|conn| conn.id)
            .collect();
        for id in closed {
            self.remove_connection(id);
        }
    }

    fn snapshot(&self) -> HubSnapshot {
        let mut cached_keys: Vec<String> = self.context.shared_cache.keys().cloned().collect();
        cached_keys.sort();
        let mut in_flight: Vec<String> = self.context.in_flight.keys().cloned().collect();
        in_flight.sort();

        HubSnapshot {
            connections: self.context.connections.iter().map(|conn| conn.id).collect(),
            cached_keys,
            in_flight,
        }
    }
}

/// Cloneable handle to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
}

impl HubHandle {
    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }

    /// Register a new UI context.
    pub async fn connect(&self) -> Result<HubPort, HubError> {
        let (respond, rx) = oneshot::channel();
        self.send(Command::Connect { respond }).await?;
        let (id, channels) = rx.await.map_err(|_| HubError::Closed)?;
        Ok(HubPort::new(id, self.commands.clone(), channels))
    }

    /// Fetch through the shared cache without holding a port.
    pub async fn fetch_data(&self, request: FetchRequest) -> Result<FetchResult, HubError> {
        let (respond, rx) = oneshot::channel();
        self.send(Command::Fetch { request, respond }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Send a `STATUS_UPDATE` to every registered connection.
    pub async fn broadcast(&self, payload: Value) -> Result<(), HubError> {
        self.send(Command::Broadcast { payload }).await
    }

    pub async fn snapshot(&self) -> Result<HubSnapshot, HubError> {
        let (respond, rx) = oneshot::channel();
        self.send(Command::Snapshot { respond }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> Result<usize, HubError> {
        Ok(self.snapshot().await?.connections.len())
    }

    /// Composite keys held in the shared cache, sorted.
    pub async fn cached_keys(&self) -> Result<Vec<String>, HubError> {
        Ok(self.snapshot().await?.cached_keys)
    }

    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.send(Command::Shutdown).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    use crate::hub::HubEvent;
    use crate::provider::ProviderError;

    const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    /// Upstream that records calls and can hold them open until released.
    struct FakeUpstream {
        calls: Mutex<Vec<String>>,
        gate: Option<Semaphore>,
        response: Option<UpstreamResponse>,
    }

    impl FakeUpstream {
        fn replying(status: &str, data: Value) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                gate: None,
                response: Some(UpstreamResponse {
                    status: status.to_string(),
                    data,
                    message: None,
                }),
            }
        }

        fn failing() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                gate: None,
                response: None,
            }
        }

        fn gated(mut self) -> Self {
            self.gate = Some(Semaphore::new(0));
            self
        }

        fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.add_permits(100);
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HubUpstream for FakeUpstream {
        async fn fetch_composite(&self, composite_key: &str) -> Result<UpstreamResponse, ProviderError> {
            self.calls.lock().unwrap().push(composite_key.to_string());
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await;
            }
            self.response
                .clone()
                .ok_or_else(|| ProviderError::Malformed("expected value".to_string()))
        }
    }

    fn start(upstream: &Arc<FakeUpstream>) -> HubHandle {
        start_with(upstream, HubOptions::default())
    }

    fn start_with(upstream: &Arc<FakeUpstream>, options: HubOptions) -> HubHandle {
        let upstream: Arc<dyn HubUpstream> = upstream.clone();
        ConnectionHub::spawn(upstream, options)
    }

    async fn next_event(port: &mut HubPort) -> HubEvent {
        timeout(RECV_TIMEOUT, port.recv())
            .await
            .expect("timed out waiting for event")
            .expect("hub closed")
    }

    async fn next_result(port: &mut HubPort) -> FetchResult {
        match next_event(port).await {
            HubEvent::DataResult(result) => result,
            other => panic!("expected DATA_RESULT, got {:?}", other),
        }
    }

    fn fetch(symbol: &str, year: i32, key: &str) -> HubRequest {
        HubRequest::FetchData(FetchRequest::new(symbol, year, key))
    }

    #[tokio::test]
    async fn test_cache_hit_skips_upstream() {
        let upstream = Arc::new(FakeUpstream::replying("Success", json!([null, {"C": 1}])));
        let hub = start(&upstream);

        let first = hub.fetch_data(FetchRequest::new("2330_TW", 2024, "a")).await.unwrap();
        assert!(first.is_success());
        assert_eq!(first.key, "a");

        let mut p1 = hub.connect().await.unwrap();
        let mut p2 = hub.connect().await.unwrap();
        p1.send(fetch("2330_TW", 2024, "b")).await.unwrap();
        p2.send(fetch("2330_TW", 2024, "c")).await.unwrap();

        let r1 = next_result(&mut p1).await;
        let r2 = next_result(&mut p2).await;
        assert_eq!(r1.key, "b");
        assert_eq!(r2.key, "c");
        assert_eq!(r1.data, first.data);
        assert_eq!(r2.status, "Success");

        assert_eq!(upstream.calls(), vec!["2330_TW-2024".to_string()]);
        assert_eq!(hub.snapshot().await.unwrap().cached_keys, vec!["2330_TW-2024".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_requests_join_one_upstream_call() {
        let upstream = Arc::new(FakeUpstream::replying("Success", json!([null, "R1"])).gated());
        let hub = start(&upstream);

        let mut ports = Vec::new();
        for _ in 0..3 {
            ports.push(hub.connect().await.unwrap());
        }
        let sends = ports
            .iter()
            .enumerate()
            .map(|(i, port)| port.send(fetch("AAPL", 2023, &format!("k{}", i))));
        for sent in futures::future::join_all(sends).await {
            sent.unwrap();
        }

        let snapshot = hub.snapshot().await.unwrap();
        assert_eq!(snapshot.in_flight, vec!["AAPL-2023".to_string()]);
        assert!(snapshot.cached_keys.is_empty());

        upstream.release();

        for (i, port) in ports.iter_mut().enumerate() {
            let result = next_result(port).await;
            assert_eq!(result.key, format!("k{}", i));
            assert_eq!(result.data, Some(json!([null, "R1"])));
        }
        assert_eq!(upstream.calls().len(), 1);

        let snapshot = hub.snapshot().await.unwrap();
        assert!(snapshot.in_flight.is_empty());
        assert_eq!(snapshot.cached_keys, vec!["AAPL-2023".to_string()]);
    }

    #[tokio::test]
    async fn test_different_keys_fetch_separately() {
        let upstream = Arc::new(FakeUpstream::replying("Success", json!([])));
        let hub = start(&upstream);

        hub.fetch_data(FetchRequest::new("AAPL", 2022, "x")).await.unwrap();
        hub.fetch_data(FetchRequest::new("AAPL", 2023, "y")).await.unwrap();
        hub.fetch_data(FetchRequest::new("MSFT", 2023, "z")).await.unwrap();

        assert_eq!(upstream.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_upstream_failure_not_cached() {
        let upstream = Arc::new(FakeUpstream::failing());
        let hub = start(&upstream);

        let result = hub.fetch_data(FetchRequest::new("AAPL", 2023, "k")).await.unwrap();
        assert_eq!(result.status, "Error");
        assert_eq!(result.key, "k");
        assert_eq!(result.message.as_deref(), Some("Malformed /dapi body: expected value"));
        assert!(result.data.is_none());

        hub.fetch_data(FetchRequest::new("AAPL", 2023, "k2")).await.unwrap();
        assert_eq!(upstream.calls().len(), 2);
        assert!(hub.snapshot().await.unwrap().cached_keys.is_empty());
    }

    #[tokio::test]
    async fn test_non_success_status_passed_through_uncached() {
        let upstream = Arc::new(FakeUpstream::replying("Pending", json!("Pending")));
        let hub = start(&upstream);

        let result = hub.fetch_data(FetchRequest::new("AAPL", 2026, "k")).await.unwrap();
        assert_eq!(result.status, "Pending");
        assert_eq!(result.key, "k");

        hub.fetch_data(FetchRequest::new("AAPL", 2026, "k")).await.unwrap();
        assert_eq!(upstream.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection_once() {
        let upstream = Arc::new(FakeUpstream::failing());
        let hub = start(&upstream);

        let mut a = hub.connect().await.unwrap();
        let mut b = hub.connect().await.unwrap();
        let mut c = hub.connect().await.unwrap();

        a.send(HubRequest::BroadcastStatus(json!({"syncing": "AAPL"})))
            .await
            .unwrap();

        for port in [&mut a, &mut b, &mut c] {
            assert_eq!(
                next_event(port).await,
                HubEvent::StatusUpdate(json!({"syncing": "AAPL"}))
            );
        }

        // Round-trip through the hub so any extra delivery would already be queued
        hub.snapshot().await.unwrap();
        for port in [&mut a, &mut b, &mut c] {
            assert!(port.try_recv().is_none());
        }
        assert!(upstream.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reply_arrives_behind_full_status_queue() {
        let upstream = Arc::new(FakeUpstream::replying("Success", json!([null, "R1"])));
        let options = HubOptions {
            channel_buffer_size: 2,
            ..HubOptions::default()
        };
        let hub = start_with(&upstream, options);

        hub.fetch_data(FetchRequest::new("AAPL", 2023, "warm")).await.unwrap();

        let mut slow = hub.connect().await.unwrap();
        let other = hub.connect().await.unwrap();
        other.send(HubRequest::BroadcastStatus(json!("one"))).await.unwrap();
        other.send(HubRequest::BroadcastStatus(json!("two"))).await.unwrap();
        other.send(HubRequest::BroadcastStatus(json!("three"))).await.unwrap();
        slow.send(fetch("AAPL", 2023, "mine")).await.unwrap();
        hub.snapshot().await.unwrap();

        let result = next_result(&mut slow).await;
        assert_eq!(result.key, "mine");
        assert_eq!(result.data, Some(json!([null, "R1"])));

        assert_eq!(next_event(&mut slow).await, HubEvent::StatusUpdate(json!("one")));
        assert_eq!(next_event(&mut slow).await, HubEvent::StatusUpdate(json!("two")));
        assert!(slow.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_handle_introspection() {
        let upstream = Arc::new(FakeUpstream::replying("Success", json!([])));
        let hub = start(&upstream);
        assert_eq!(hub.connection_count().await.unwrap(), 0);
        assert!(hub.cached_keys().await.unwrap().is_empty());

        let a = hub.connect().await.unwrap();
        let _b = hub.connect().await.unwrap();
        hub.fetch_data(FetchRequest::new("MSFT", 2023, "x")).await.unwrap();
        hub.fetch_data(FetchRequest::new("AAPL", 2024, "y")).await.unwrap();

        assert_eq!(hub.connection_count().await.unwrap(), 2);
        assert_eq!(
            hub.cached_keys().await.unwrap(),
            vec!["AAPL-2024".to_string(), "MSFT-2023".to_string()]
        );

        drop(a);
        assert_eq!(hub.connection_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dropped_port_is_unregistered() {
        let upstream = Arc::new(FakeUpstream::failing());
        let hub = start(&upstream);

        let mut a = hub.connect().await.unwrap();
        let b = hub.connect().await.unwrap();
        assert_eq!(hub.snapshot().await.unwrap().connections.len(), 2);

        drop(b);
        hub.broadcast(json!("ping")).await.unwrap();

        assert_eq!(next_event(&mut a).await, HubEvent::StatusUpdate(json!("ping")));
        assert_eq!(hub.snapshot().await.unwrap().connections, vec![a.id()]);
    }

    #[tokio::test]
    async fn test_sweep_removes_closed_connections() {
        let upstream: Arc<dyn HubUpstream> = Arc::new(FakeUpstream::failing());
        let (mut hub, _handle) = ConnectionHub::new(upstream, HubOptions::default());

        let (live, _live_channels) = Connection::open(ConnectionId(0), 1);
        let (dead, dead_channels) = Connection::open(ConnectionId(1), 1);
        hub.context.connections.push(live);
        hub.context.connections.push(dead);
        drop(dead_channels);

        hub.sweep();
        assert_eq!(hub.snapshot().connections, vec![ConnectionId(0)]);
    }

    #[tokio::test]
    async fn test_post_message_parses_envelope() {
        let upstream = Arc::new(FakeUpstream::replying("Success", json!([])));
        let hub = start(&upstream);
        let mut port = hub.connect().await.unwrap();

        port.post_message(r#"{"type":"FETCH_DATA","payload":{"symbol":"2330_TW","year":2025,"key":"q"}}"#)
            .await
            .unwrap();
        assert_eq!(next_result(&mut port).await.key, "q");

        let err = port.post_message(r#"{"type":"NOPE"}"#).await.unwrap_err();
        assert!(matches!(err, HubError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let upstream = Arc::new(FakeUpstream::failing());
        let hub = start(&upstream);
        let mut port = hub.connect().await.unwrap();

        hub.shutdown().await.unwrap();

        assert!(timeout(RECV_TIMEOUT, port.recv()).await.unwrap().is_none());
        assert!(matches!(
            hub.fetch_data(FetchRequest::new("AAPL", 2023, "k")).await,
            Err(HubError::Closed)
        ));
    }
}
