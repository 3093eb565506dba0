//! Remote key/value tier.
//!
//! [`RemoteStore`] is the seam the cache service talks to; [`RedisStore`] is
//! the production implementation. Tests substitute their own stores.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use tokio::sync::Mutex;

use super::error::RemoteError;

const SCAN_BATCH: usize = 100;

/// Server-side counters reported by the remote store, when it exposes them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteMetrics {
    pub used_memory_human: Option<String>,
    pub connected_clients: Option<u64>,
    pub keyspace_hits: Option<u64>,
    pub keyspace_misses: Option<u64>,
}

/// Operations the cache service needs from a remote key/value store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn ping(&self) -> Result<(), RemoteError>;

    async fn set_ex(&self, key: &str, payload: &[u8], ttl: Duration) -> Result<(), RemoteError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError>;

    /// Returns whether a value was removed.
    async fn delete(&self, key: &str) -> Result<bool, RemoteError>;

    /// Removes every key starting with `prefix` and returns how many went.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, RemoteError>;

    async fn metrics(&self) -> Result<RemoteMetrics, RemoteError>;

    /// Drop any held connection. The next call reconnects.
    async fn close(&self) {}
}

/// Redis-backed [`RemoteStore`].
///
/// The connection manager is created on first use, so building the store never
/// touches the network.
pub struct RedisStore {
    client: redis::Client,
    connection: Mutex<Option<ConnectionManager>>,
}

impl RedisStore {
    /// Parse `url` into a client. Fails only on a malformed URL.
    pub fn open(url: &str) -> Result<Self, RemoteError> {
        let client = redis::Client::open(url)
            .map_err(|err| RemoteError::unavailable(format!("invalid redis url: {err}")))?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, RemoteError> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }

        let connection = self.client.get_connection_manager().await?;
        *slot = Some(connection.clone());
        Ok(connection)
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn ping(&self) -> Result<(), RemoteError> {
        let mut conn = self.connection().await?;
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply.eq_ignore_ascii_case("pong") {
            Ok(())
        } else {
            Err(RemoteError::Protocol(format!("unexpected PING reply `{reply}`")))
        }
    }

    async fn set_ex(&self, key: &str, payload: &[u8], ttl: Duration) -> Result<(), RemoteError> {
        let mut conn = self.connection().await?;
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, payload, seconds).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool, RemoteError> {
        let mut conn = self.connection().await?;
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, RemoteError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", escape_glob(prefix));

        let mut cursor: u64 = 0;
        let mut removed = 0usize;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: usize = conn.del(&keys).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }

    async fn metrics(&self) -> Result<RemoteMetrics, RemoteError> {
        let mut conn = self.connection().await?;
        let info: String = redis::cmd("INFO").query_async(&mut conn).await?;
        Ok(parse_info(&info))
    }

    async fn close(&self) {
        self.connection.lock().await.take();
    }
}

/// Escape glob metacharacters so `prefix` matches literally in `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn parse_info(info: &str) -> RemoteMetrics {
    let mut metrics = RemoteMetrics::default();
    for line in info.lines() {
        let Some((field, value)) = line.trim().split_once(':') else {
            continue;
        };
        match field {
            "used_memory_human" => metrics.used_memory_human = Some(value.to_string()),
            "connected_clients" => metrics.connected_clients = value.parse().ok(),
            "keyspace_hits" => metrics.keyspace_hits = value.parse().ok(),
            "keyspace_misses" => metrics.keyspace_misses = value.parse().ok(),
            _ => {}
        }
    }
    metrics
}
