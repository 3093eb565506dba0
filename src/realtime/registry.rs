//! Connection registry.
//!
//! Owns the connection table and the [`ChannelBroker`] behind one mutex so a
//! connection's subscription set and the per-channel subscriber sets always
//! change together. Sends happen under the same lock through non-blocking
//! [`Transport`]s, which keeps per-channel delivery order equal to broadcast
//! order.
//!
//! A background liveness sweep runs while at least one connection exists.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use metrics::{counter, gauge};
use serde::Serialize;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::broker::ChannelBroker;
use super::channel::{WELL_KNOWN_CHANNELS, user_channel, validate_subscription};
use super::config::RealtimeConfig;
use super::message::{
    InboundMessage, MessageError, MessageType, NotificationMessage, parse_inbound,
};
use super::transport::{DeliveryError, Transport};
use crate::util::lock::mutex_lock;

const SOURCE: &str = "realtime::registry";
const METRIC_CONNECTIONS: &str = "hemicycle_realtime_connections";
const METRIC_BROADCAST: &str = "hemicycle_realtime_broadcast_total";
const METRIC_DELIVERY_FAILURE: &str = "hemicycle_realtime_delivery_failure_total";

/// Identifier of one client connection. Client-supplied or a generated UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    pub fn generate() -> Self {
        Self::from(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handshake details supplied when a client connects.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    pub metadata: Map<String, Value>,
}

struct Connection {
    transport: Arc<dyn Transport>,
    subscriptions: HashSet<String>,
    connected_at: Instant,
    last_seen: Instant,
    user_id: Option<String>,
    metadata: Map<String, Value>,
}

/// Read-only view of one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub subscriptions: Vec<String>,
    pub user_id: Option<String>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionsByAge {
    pub under_1min: usize,
    pub under_5min: usize,
    pub over_5min: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeStats {
    pub total_connections: usize,
    pub total_channels: usize,
    /// Subscriber count per active channel.
    pub channels_info: HashMap<String, usize>,
    pub connections_by_age: ConnectionsByAge,
    pub message_history_size: usize,
}

struct RegistryState {
    connections: HashMap<ConnectionId, Connection>,
    broker: ChannelBroker,
}

impl RegistryState {
    fn send_to(
        &self,
        id: &ConnectionId,
        message: &Arc<NotificationMessage>,
    ) -> Result<(), DeliveryError> {
        let connection = self.connections.get(id).ok_or(DeliveryError::Closed)?;
        connection.transport.send(Arc::clone(message))
    }

    fn subscribe(&mut self, id: &ConnectionId, channel: &str) -> bool {
        let Some(connection) = self.connections.get_mut(id) else {
            return false;
        };
        connection.subscriptions.insert(channel.to_string());
        self.broker.add_subscriber(channel, id);
        true
    }

    fn unsubscribe(&mut self, id: &ConnectionId, channel: &str) -> bool {
        let Some(connection) = self.connections.get_mut(id) else {
            return false;
        };
        let removed = connection.subscriptions.remove(channel);
        self.broker.remove_subscriber(channel, id);
        removed
    }

    fn remove(&mut self, id: &ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(id)?;
        for channel in &connection.subscriptions {
            self.broker.remove_subscriber(channel, id);
        }
        Some(connection)
    }
}

struct Inner {
    config: RealtimeConfig,
    state: Mutex<RegistryState>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Shared handle to the live connection table.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    pub fn new(config: RealtimeConfig) -> Self {
        let broker = ChannelBroker::new(config.history_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(RegistryState {
                    connections: HashMap::new(),
                    broker,
                }),
                sweeper: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Register a connection with a generated identifier.
    pub fn register(&self, transport: Arc<dyn Transport>) -> Result<ConnectionId, DeliveryError> {
        self.register_with(transport, ConnectOptions::default())
    }

    /// Register a connection and send it the `connected` welcome.
    ///
    /// A client reusing a live identifier replaces the older connection. If the
    /// welcome cannot be delivered nothing is registered.
    pub fn register_with(
        &self,
        transport: Arc<dyn Transport>,
        options: ConnectOptions,
    ) -> Result<ConnectionId, DeliveryError> {
        let id = options
            .client_id
            .filter(|client_id| !client_id.is_empty())
            .map(ConnectionId::from)
            .unwrap_or_else(ConnectionId::generate);

        let server_time = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let mut data = Map::new();
        data.insert("client_id".to_string(), json!(id.as_str()));
        data.insert("server_time".to_string(), json!(server_time));
        data.insert("available_channels".to_string(), json!(WELL_KNOWN_CHANNELS));
        let welcome = NotificationMessage::new(MessageType::Connected).with_data(data);
        transport.send(Arc::new(welcome))?;

        let now = Instant::now();
        let replaced = {
            let mut state = self.lock_state("register");
            let replaced = state.remove(&id).is_some();
            state.connections.insert(
                id.clone(),
                Connection {
                    transport,
                    subscriptions: HashSet::new(),
                    connected_at: now,
                    last_seen: now,
                    user_id: options.user_id,
                    metadata: options.metadata,
                },
            );
            replaced
        };

        if replaced {
            warn!(component = SOURCE, connection_id = %id, "client id reused, previous connection replaced");
        }
        info!(component = SOURCE, connection_id = %id, "connection registered");
        self.population_changed();
        Ok(id)
    }

    /// Drop a connection and all of its subscriptions.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.lock_state("unregister").remove(id).is_some();
        if removed {
            info!(component = SOURCE, connection_id = %id, "connection unregistered");
            self.population_changed();
        }
        removed
    }

    /// Unregister `id` only if it is still served by `transport`.
    ///
    /// Socket tasks call this on close so that a connection replaced by a
    /// reconnect under the same client id survives the old socket going away.
    pub fn release(&self, id: &ConnectionId, transport: &Arc<dyn Transport>) -> bool {
        let removed = {
            let mut state = self.lock_state("release");
            let owned = state
                .connections
                .get(id)
                .is_some_and(|connection| same_transport(&connection.transport, transport));
            owned && state.remove(id).is_some()
        };
        if removed {
            info!(component = SOURCE, connection_id = %id, "connection closed");
            self.population_changed();
        }
        removed
    }

    /// Add `channel` to the connection's subscriptions without validation or replay.
    pub fn subscribe(&self, id: &ConnectionId, channel: &str) -> bool {
        self.lock_state("subscribe").subscribe(id, channel)
    }

    pub fn unsubscribe(&self, id: &ConnectionId, channel: &str) -> bool {
        self.lock_state("unsubscribe").unsubscribe(id, channel)
    }

    /// Handle one inbound text frame from `id`.
    ///
    /// Protocol problems are answered with an `error` message. A connection
    /// whose replies cannot be delivered is dropped.
    pub fn dispatch_inbound(&self, id: &ConnectionId, raw: &str) {
        let parsed = parse_inbound(raw);

        let mut state = self.lock_state("dispatch_inbound");
        if !state.connections.contains_key(id) {
            warn!(component = SOURCE, connection_id = %id, "message from unknown connection");
            return;
        }

        let outcome = match parsed {
            Err(err) => {
                debug!(component = SOURCE, connection_id = %id, error = %err, "rejected client frame");
                state.send_to(id, &Arc::new(NotificationMessage::error(err.to_string())))
            }
            Ok(InboundMessage::Ping) => {
                if let Some(connection) = state.connections.get_mut(id) {
                    connection.last_seen = Instant::now();
                }
                state.send_to(id, &Arc::new(NotificationMessage::new(MessageType::Pong)))
            }
            Ok(InboundMessage::Subscribe { channel }) => self.subscribe_locked(&mut state, id, &channel),
            Ok(InboundMessage::Unsubscribe { channel }) => {
                state.unsubscribe(id, &channel);
                let reply = NotificationMessage::new(MessageType::Unsubscribed)
                    .with_channel(channel.as_str())
                    .with_data(single("unsubscribed_from", &channel));
                state.send_to(id, &Arc::new(reply))
            }
            Ok(InboundMessage::Unsupported(kind)) => {
                let err = MessageError::Unsupported(kind);
                state.send_to(id, &Arc::new(NotificationMessage::error(err.to_string())))
            }
        };

        if let Err(err) = outcome {
            counter!(METRIC_DELIVERY_FAILURE).increment(1);
            warn!(component = SOURCE, connection_id = %id, error = %err, "reply undeliverable, dropping connection");
            state.remove(id);
            drop(state);
            self.population_changed();
        }
    }

    fn subscribe_locked(
        &self,
        state: &mut MutexGuard<'_, RegistryState>,
        id: &ConnectionId,
        channel: &str,
    ) -> Result<(), DeliveryError> {
        let user_id = state
            .connections
            .get(id)
            .and_then(|connection| connection.user_id.as_deref());
        if let Err(err) = validate_subscription(channel, user_id) {
            debug!(component = SOURCE, connection_id = %id, channel, "subscription rejected");
            return state.send_to(id, &Arc::new(NotificationMessage::error(err.to_string())));
        }

        state.subscribe(id, channel);
        let reply = NotificationMessage::new(MessageType::Subscribed)
            .with_channel(channel)
            .with_data(single("subscribed_to", channel));
        state.send_to(id, &Arc::new(reply))?;

        for message in state.broker.recent(channel, self.inner.config.replay_limit) {
            state.send_to(id, &message)?;
        }
        debug!(component = SOURCE, connection_id = %id, channel, "subscribed");
        Ok(())
    }

    /// Record that `id` is alive (protocol-level ping or pong).
    pub fn touch(&self, id: &ConnectionId) {
        if let Some(connection) = self.lock_state("touch").connections.get_mut(id) {
            connection.last_seen = Instant::now();
        }
    }

    /// Send an `error` message to one connection.
    pub fn report_error(&self, id: &ConnectionId, reason: &str) {
        let message = Arc::new(NotificationMessage::error(reason));
        let result = self.lock_state("report_error").send_to(id, &message);
        if let Err(err) = result {
            warn!(component = SOURCE, connection_id = %id, error = %err, "error reply undeliverable");
            self.unregister(id);
        }
    }

    /// Publish `message` on `channel` and return how many connections got it.
    ///
    /// Channels without subscribers are skipped entirely, history included.
    /// Subscribers whose transport fails are unregistered; delivery to the
    /// rest continues.
    pub fn broadcast(&self, channel: &str, message: impl Into<Arc<NotificationMessage>>) -> usize {
        let message = message.into();

        let mut delivered = 0;
        let mut dropped = 0;
        {
            let mut state = self.lock_state("broadcast");
            if !state.broker.has_subscribers(channel) {
                debug!(component = SOURCE, channel, "no subscribers, broadcast skipped");
                return 0;
            }

            state.broker.record(channel, Arc::clone(&message));
            let mut failed = Vec::new();
            for id in state.broker.subscribers(channel) {
                match state.send_to(&id, &message) {
                    Ok(()) => delivered += 1,
                    Err(err) => {
                        counter!(METRIC_DELIVERY_FAILURE).increment(1);
                        warn!(component = SOURCE, connection_id = %id, channel, error = %err, "delivery failed");
                        failed.push(id);
                    }
                }
            }
            for id in failed {
                if state.remove(&id).is_some() {
                    dropped += 1;
                }
            }
        }

        counter!(METRIC_BROADCAST).increment(1);
        debug!(component = SOURCE, channel, delivered, dropped, kind = message.kind().as_str(), "broadcast");
        if dropped > 0 {
            self.population_changed();
        }
        delivered
    }

    /// Broadcast on the private channel of `user_id`.
    pub fn send_to_user(&self, user_id: &str, message: impl Into<Arc<NotificationMessage>>) -> usize {
        self.broadcast(&user_channel(user_id), message)
    }

    /// Unregister every connection silent for longer than the idle timeout.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.inner.config.idle_timeout;

        let evicted: Vec<ConnectionId> = {
            let mut state = self.lock_state("evict_idle");
            let stale: Vec<ConnectionId> = state
                .connections
                .iter()
                .filter(|(_, connection)| now.duration_since(connection.last_seen) > idle_timeout)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &stale {
                state.remove(id);
            }
            stale
        };

        for id in &evicted {
            info!(component = SOURCE, connection_id = %id, "idle connection evicted");
        }
        if !evicted.is_empty() {
            self.population_changed();
        }
        evicted.len()
    }

    pub fn connection_count(&self) -> usize {
        self.lock_state("connection_count").connections.len()
    }

    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.lock_state("is_connected").connections.contains_key(id)
    }

    pub fn connection_info(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        let state = self.lock_state("connection_info");
        let connection = state.connections.get(id)?;
        let mut subscriptions: Vec<String> = connection.subscriptions.iter().cloned().collect();
        subscriptions.sort();
        Some(ConnectionInfo {
            subscriptions,
            user_id: connection.user_id.clone(),
            metadata: connection.metadata.clone(),
        })
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock_state("subscriber_count").broker.subscribers(channel).len()
    }

    pub fn stats(&self) -> RealtimeStats {
        let now = Instant::now();
        let state = self.lock_state("stats");

        let mut by_age = ConnectionsByAge::default();
        for connection in state.connections.values() {
            let age = now.duration_since(connection.connected_at).as_secs();
            match age {
                0..60 => by_age.under_1min += 1,
                60..300 => by_age.under_5min += 1,
                _ => by_age.over_5min += 1,
            }
        }

        RealtimeStats {
            total_connections: state.connections.len(),
            total_channels: state.broker.channel_count(),
            channels_info: state.broker.subscriber_counts(),
            connections_by_age: by_age,
            message_history_size: state.broker.history_size(),
        }
    }

    /// Stop the sweep and drop every connection. Dropping a queue transport
    /// ends its socket writer.
    pub fn shutdown(&self) {
        if let Some(handle) = mutex_lock(&self.inner.sweeper, SOURCE, "shutdown").take() {
            handle.abort();
        }
        let dropped = {
            let mut state = self.lock_state("shutdown");
            let count = state.connections.len();
            state.connections.clear();
            state.broker.clear();
            count
        };
        gauge!(METRIC_CONNECTIONS).set(0.0);
        info!(component = SOURCE, dropped, "connection registry shut down");
    }

    /// Whether the liveness sweep task is currently running.
    pub fn sweep_active(&self) -> bool {
        mutex_lock(&self.inner.sweeper, SOURCE, "sweep_active")
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn lock_state(&self, op: &'static str) -> MutexGuard<'_, RegistryState> {
        mutex_lock(&self.inner.state, SOURCE, op)
    }

    /// Start the sweep on 0 -> n and stop it on n -> 0.
    ///
    /// Lock order: sweeper, then state.
    fn population_changed(&self) {
        let mut sweeper = mutex_lock(&self.inner.sweeper, SOURCE, "population_changed");
        let population = self.lock_state("population_changed").connections.len();
        gauge!(METRIC_CONNECTIONS).set(population as f64);

        if population == 0 {
            if let Some(handle) = sweeper.take() {
                handle.abort();
                debug!(component = SOURCE, "liveness sweep stopped");
            }
            return;
        }

        let running = sweeper.as_ref().is_some_and(|handle| !handle.is_finished());
        if running {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let period = self.inner.config.sweep_interval;
                *sweeper = Some(runtime.spawn(sweep(Arc::downgrade(&self.inner), period)));
                debug!(component = SOURCE, period_secs = period.as_secs(), "liveness sweep started");
            }
            Err(_) => {
                warn!(component = SOURCE, "no async runtime, liveness sweep not started");
            }
        }
    }
}

async fn sweep(inner: Weak<Inner>, period: std::time::Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let evicted = ConnectionRegistry { inner }.evict_idle();
        if evicted > 0 {
            debug!(component = SOURCE, evicted, "liveness sweep pass");
        }
    }
}

fn same_transport(a: &Arc<dyn Transport>, b: &Arc<dyn Transport>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn single(name: &str, value: &str) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert(name.to_string(), Value::String(value.to_string()));
    data
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::realtime::transport::QueueTransport;

    type Inbox = mpsc::Receiver<Arc<NotificationMessage>>;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(RealtimeConfig::default())
    }

    fn connect(registry: &ConnectionRegistry, client_id: &str) -> (ConnectionId, Inbox) {
        connect_as(registry, client_id, None)
    }

    fn connect_as(
        registry: &ConnectionRegistry,
        client_id: &str,
        user_id: Option<&str>,
    ) -> (ConnectionId, Inbox) {
        let (transport, mut inbox) = QueueTransport::channel(64);
        let id = registry
            .register_with(
                Arc::new(transport),
                ConnectOptions {
                    client_id: Some(client_id.to_string()),
                    user_id: user_id.map(str::to_string),
                    metadata: Map::new(),
                },
            )
            .expect("register");
        let welcome = inbox.try_recv().expect("welcome");
        assert_eq!(welcome.kind(), MessageType::Connected);
        (id, inbox)
    }

    fn drain(inbox: &mut Inbox) -> Vec<Arc<NotificationMessage>> {
        let mut out = Vec::new();
        while let Ok(message) = inbox.try_recv() {
            out.push(message);
        }
        out
    }

    #[tokio::test]
    async fn welcome_lists_channels_and_id() {
        let registry = registry();
        let (transport, mut inbox) = QueueTransport::channel(8);
        let id = registry.register(Arc::new(transport)).expect("register");

        let welcome = inbox.try_recv().expect("welcome");
        assert_eq!(welcome.field("client_id"), Some(&json!(id.as_str())));
        assert_eq!(
            welcome.field("available_channels"),
            Some(&json!(["debates", "extractions", "system"]))
        );
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[tokio::test]
    async fn sweep_follows_population() {
        let registry = registry();
        assert!(!registry.sweep_active());

        let (a, _inbox_a) = connect(&registry, "a");
        let (b, _inbox_b) = connect(&registry, "b");
        assert!(registry.sweep_active());

        registry.unregister(&a);
        assert!(registry.sweep_active());
        registry.unregister(&b);
        assert!(!registry.sweep_active());

        let (_c, _inbox_c) = connect(&registry, "c");
        assert!(registry.sweep_active());
    }

    #[tokio::test]
    async fn subscriptions_are_mirrored() {
        let registry = registry();
        let (id, _inbox) = connect(&registry, "a");

        registry.dispatch_inbound(&id, r#"{"type":"subscribe","channel":"debates"}"#);
        registry.dispatch_inbound(&id, r#"{"type":"subscribe","channel":"debate:9"}"#);
        assert_eq!(
            registry.connection_info(&id).unwrap().subscriptions,
            vec!["debate:9".to_string(), "debates".to_string()]
        );
        assert_eq!(registry.subscriber_count("debates"), 1);

        registry.unregister(&id);
        assert_eq!(registry.subscriber_count("debates"), 0);
        assert_eq!(registry.stats().total_channels, 0);
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let registry = registry();
        let (id, mut inbox) = connect(&registry, "a");

        registry.dispatch_inbound(&id, r#"{"type":"ping"}"#);

        let replies = drain(&mut inbox);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind(), MessageType::Pong);
    }

    #[tokio::test]
    async fn bad_frames_get_error_replies() {
        let registry = registry();
        let (id, mut inbox) = connect(&registry, "a");

        registry.dispatch_inbound(&id, "{{{");
        registry.dispatch_inbound(&id, r#"{"type":"dance"}"#);
        registry.dispatch_inbound(&id, r#"{"type":"subscribe"}"#);
        registry.dispatch_inbound(&id, r#"{"type":"subscribe","channel":"admin"}"#);
        registry.dispatch_inbound(&id, r#"{"type":"connect"}"#);

        let replies = drain(&mut inbox);
        assert_eq!(replies.len(), 5);
        assert!(replies.iter().all(|m| m.kind() == MessageType::Error));
        assert_eq!(replies[3].field("error"), Some(&json!("Invalid channel: admin")));
        assert!(registry.is_connected(&id));
        assert!(registry.connection_info(&id).unwrap().subscriptions.is_empty());
    }

    #[tokio::test]
    async fn user_channel_requires_matching_user() {
        let registry = registry();
        let (own, mut own_inbox) = connect_as(&registry, "a", Some("42"));
        let (other, mut other_inbox) = connect_as(&registry, "b", Some("7"));

        registry.dispatch_inbound(&own, r#"{"type":"subscribe","channel":"user:42"}"#);
        registry.dispatch_inbound(&other, r#"{"type":"subscribe","channel":"user:42"}"#);
        drain(&mut own_inbox);
        drain(&mut other_inbox);

        let delivered = registry.send_to_user("42", NotificationMessage::new(MessageType::SystemStatus));

        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut own_inbox).len(), 1);
        assert!(drain(&mut other_inbox).is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let registry = registry();
        let (id, mut inbox) = connect(&registry, "a");

        registry.dispatch_inbound(&id, r#"{"type":"subscribe","channel":"system"}"#);
        registry.dispatch_inbound(&id, r#"{"type":"unsubscribe","channel":"system"}"#);
        let replies = drain(&mut inbox);
        assert_eq!(replies[0].kind(), MessageType::Subscribed);
        assert_eq!(replies[0].field("subscribed_to"), Some(&json!("system")));
        assert_eq!(replies[1].kind(), MessageType::Unsubscribed);
        assert_eq!(replies[1].channel(), Some("system"));

        let delivered = registry.broadcast("system", NotificationMessage::new(MessageType::SystemStatus));
        assert_eq!(delivered, 0);
        assert!(drain(&mut inbox).is_empty());
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_keeps_no_history() {
        let registry = registry();
        let (id, mut inbox) = connect(&registry, "a");

        registry.broadcast("extractions", NotificationMessage::new(MessageType::ExtractionStarted));
        registry.dispatch_inbound(&id, r#"{"type":"subscribe","channel":"extractions"}"#);

        let replies = drain(&mut inbox);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind(), MessageType::Subscribed);
    }

    #[tokio::test]
    async fn replay_is_capped() {
        let registry = registry();
        let (watcher, _watcher_inbox) = connect(&registry, "watcher");
        registry.subscribe(&watcher, "system");

        let sent: Vec<Arc<NotificationMessage>> = (0..15)
            .map(|_| Arc::new(NotificationMessage::new(MessageType::SystemStatus)))
            .collect();
        for message in &sent {
            registry.broadcast("system", Arc::clone(message));
        }

        let (late, mut inbox) = connect(&registry, "late");
        registry.dispatch_inbound(&late, r#"{"type":"subscribe","channel":"system"}"#);

        let replies = drain(&mut inbox);
        assert_eq!(replies.len(), 11);
        let replayed: Vec<Uuid> = replies[1..].iter().map(|m| m.message_id()).collect();
        let expected: Vec<Uuid> = sent[5..].iter().map(|m| m.message_id()).collect();
        assert_eq!(replayed, expected);
    }

    #[tokio::test]
    async fn reused_client_id_replaces_connection() {
        let registry = registry();
        let (id, mut first) = connect(&registry, "same");
        registry.subscribe(&id, "debates");

        let (again, mut second) = connect(&registry, "same");
        assert_eq!(id, again);
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.subscriber_count("debates"), 0);

        registry.subscribe(&again, "debates");
        registry.broadcast("debates", NotificationMessage::new(MessageType::DebateStarted));
        assert!(drain(&mut first).is_empty());
        assert_eq!(drain(&mut second).len(), 1);
    }

    #[tokio::test]
    async fn release_ignores_replaced_connection() {
        let registry = registry();
        let (old_transport, _old_inbox) = QueueTransport::channel(8);
        let old_transport: Arc<dyn Transport> = Arc::new(old_transport);
        let options = ConnectOptions {
            client_id: Some("phone".to_string()),
            ..ConnectOptions::default()
        };
        let id = registry
            .register_with(Arc::clone(&old_transport), options.clone())
            .expect("register");

        let (new_transport, _new_inbox) = QueueTransport::channel(8);
        let new_transport: Arc<dyn Transport> = Arc::new(new_transport);
        registry
            .register_with(Arc::clone(&new_transport), options)
            .expect("re-register");

        assert!(!registry.release(&id, &old_transport));
        assert!(registry.is_connected(&id));
        assert!(registry.release(&id, &new_transport));
        assert!(!registry.is_connected(&id));
    }

    #[tokio::test]
    async fn backpressure_drops_slow_connection() {
        let registry = registry();
        let (transport, _inbox) = QueueTransport::channel(2);
        let slow = registry.register(Arc::new(transport)).expect("register");
        registry.subscribe(&slow, "system");

        registry.broadcast("system", NotificationMessage::new(MessageType::SystemStatus));
        assert!(registry.is_connected(&slow));

        registry.broadcast("system", NotificationMessage::new(MessageType::SystemStatus));
        assert!(!registry.is_connected(&slow));
        assert_eq!(registry.stats().total_channels, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_bucket_connections_by_age() {
        let registry = registry();
        let (_old, _a) = connect(&registry, "old");
        tokio::time::advance(Duration::from_secs(120)).await;
        let (mid, _b) = connect(&registry, "mid");
        registry.touch(&mid);
        let (_new, _c) = connect(&registry, "new");

        let stats = registry.stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(
            stats.connections_by_age,
            ConnectionsByAge {
                under_1min: 2,
                under_5min: 1,
                over_5min: 0
            }
        );
    }

    #[tokio::test]
    async fn shutdown_drops_everything() {
        let registry = registry();
        let (id, mut inbox) = connect(&registry, "a");
        registry.subscribe(&id, "debates");

        registry.shutdown();

        assert_eq!(registry.connection_count(), 0);
        assert!(!registry.sweep_active());
        assert!(inbox.recv().await.is_none());
    }
}
