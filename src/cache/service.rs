//! Dual-tier cache service.
//!
//! Reads and writes go to the remote store while it is marked connected and
//! degrade to the in-process [`MemoryStore`] otherwise. A failed remote call
//! flips the connected flag; only [`CacheService::reconnect`] flips it back.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::codec;
use super::config::CacheConfig;
use super::error::{CacheError, RemoteError};
use super::keys::{CacheKey, CacheParams, namespace_prefix};
use super::memory::MemoryStore;
use super::namespace::Namespace;
use super::remote::{RemoteMetrics, RemoteStore};

const SOURCE: &str = "cache::service";
const METRIC_REMOTE_HIT: &str = "hemicycle_cache_remote_hit_total";
const METRIC_MEMORY_HIT: &str = "hemicycle_cache_memory_hit_total";
const METRIC_MISS: &str = "hemicycle_cache_miss_total";
const METRIC_FALLBACK: &str = "hemicycle_cache_fallback_total";

/// Snapshot of cache health for the stats endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub remote_connected: bool,
    pub in_process_size: usize,
    pub in_process_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_metrics: Option<RemoteMetrics>,
}

pub struct CacheService {
    config: CacheConfig,
    remote: Option<Arc<dyn RemoteStore>>,
    remote_connected: AtomicBool,
    memory: MemoryStore,
}

impl CacheService {
    /// Build the service. The remote store starts out disconnected until
    /// [`connect`](Self::connect) succeeds.
    pub fn new(config: CacheConfig, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        let memory = MemoryStore::new(config.memory_capacity_non_zero());
        Self {
            config,
            remote,
            remote_connected: AtomicBool::new(false),
            memory,
        }
    }

    pub fn memory_only(config: CacheConfig) -> Self {
        Self::new(config, None)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_remote_connected(&self) -> bool {
        self.remote_connected.load(Ordering::Acquire)
    }

    /// Ping the remote store and mark it connected on success.
    pub async fn connect(&self) -> bool {
        let Some(remote) = self.remote.as_ref() else {
            info!(component = SOURCE, "no remote cache configured, using in-process store");
            return false;
        };

        match self.timed("ping", remote.ping()).await {
            Ok(()) => {
                self.remote_connected.store(true, Ordering::Release);
                info!(component = SOURCE, "remote cache connected");
                true
            }
            Err(err) => {
                self.remote_connected.store(false, Ordering::Release);
                warn!(
                    component = SOURCE,
                    error = %err,
                    "remote cache unreachable, using in-process store"
                );
                false
            }
        }
    }

    /// Drop the current remote connection and try again.
    pub async fn reconnect(&self) -> bool {
        if let Some(remote) = self.remote.as_ref() {
            remote.close().await;
        }
        self.connect().await
    }

    pub async fn disconnect(&self) {
        self.remote_connected.store(false, Ordering::Release);
        if let Some(remote) = self.remote.as_ref() {
            remote.close().await;
            info!(component = SOURCE, "remote cache disconnected");
        }
    }

    /// Store `value` under the composite key.
    ///
    /// `ttl` defaults to the configured default TTL. Remote failures fall back
    /// to the in-process store, so the value is always persisted somewhere and
    /// the result is `Ok(true)`; only serialization failures are errors.
    pub async fn set<T>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        params: Option<&CacheParams>,
    ) -> Result<bool, CacheError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let payload = codec::encode(value)?;
        let cache_key = CacheKey::compose(namespace, key, params);
        let ttl = ttl.unwrap_or(self.config.default_ttl);

        if let Some(remote) = self.active_remote() {
            match self
                .timed("set", remote.set_ex(cache_key.as_str(), &payload, ttl))
                .await
            {
                Ok(()) => return Ok(true),
                Err(err) => self.remote_failed("set", &cache_key, &err),
            }
        }

        self.memory.insert(cache_key.as_str(), payload, ttl);
        Ok(true)
    }

    /// Fetch the value stored under the composite key.
    ///
    /// Values that no longer decode as `T` are reported absent.
    pub async fn get<T>(
        &self,
        namespace: &str,
        key: &str,
        params: Option<&CacheParams>,
    ) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let cache_key = CacheKey::compose(namespace, key, params);

        if let Some(remote) = self.active_remote() {
            match self.timed("get", remote.get(cache_key.as_str())).await {
                Ok(Some(payload)) => {
                    counter!(METRIC_REMOTE_HIT).increment(1);
                    return decode_or_log(&cache_key, &payload);
                }
                Ok(None) => {}
                Err(err) => self.remote_failed("get", &cache_key, &err),
            }
        }

        match self.memory.get(cache_key.as_str()) {
            Some(payload) => {
                counter!(METRIC_MEMORY_HIT).increment(1);
                let value = decode_or_log(&cache_key, &payload);
                if value.is_none() {
                    self.memory.remove(cache_key.as_str());
                }
                value
            }
            None => {
                counter!(METRIC_MISS).increment(1);
                None
            }
        }
    }

    /// Remove the composite key from both tiers.
    pub async fn delete(&self, namespace: &str, key: &str, params: Option<&CacheParams>) -> bool {
        let cache_key = CacheKey::compose(namespace, key, params);

        let mut removed = false;
        if let Some(remote) = self.active_remote() {
            match self.timed("delete", remote.delete(cache_key.as_str())).await {
                Ok(hit) => removed |= hit,
                Err(err) => self.remote_failed("delete", &cache_key, &err),
            }
        }

        removed |= self.memory.remove(cache_key.as_str());
        removed
    }

    /// Remove every entry under `namespace:` from both tiers.
    pub async fn clear_namespace(&self, namespace: &str) -> usize {
        let prefix = namespace_prefix(namespace);

        let mut removed = 0;
        if let Some(remote) = self.active_remote() {
            match self
                .timed("clear_namespace", remote.delete_prefix(&prefix))
                .await
            {
                Ok(count) => removed += count,
                Err(err) => {
                    let key = CacheKey::compose(namespace, "*", None);
                    self.remote_failed("clear_namespace", &key, &err);
                }
            }
        }

        removed += self.memory.remove_prefix(&prefix);
        info!(component = SOURCE, namespace, removed, "cache namespace cleared");
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        let remote_metrics = match self.active_remote() {
            Some(remote) => match self.timed("metrics", remote.metrics()).await {
                Ok(metrics) => Some(metrics),
                Err(err) => {
                    warn!(component = SOURCE, error = %err, "remote cache metrics unavailable");
                    None
                }
            },
            None => None,
        };

        CacheStats {
            remote_connected: self.is_remote_connected(),
            in_process_size: self.memory.len(),
            in_process_capacity: self.memory.capacity(),
            remote_metrics,
        }
    }

    /// [`set`](Self::set) with the namespace's default TTL.
    pub async fn set_in<T>(
        &self,
        namespace: Namespace,
        key: &str,
        value: &T,
        params: Option<&CacheParams>,
    ) -> Result<bool, CacheError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let ttl = self.config.ttl_for(namespace);
        self.set(namespace.as_str(), key, value, Some(ttl), params)
            .await
    }

    pub async fn get_in<T>(
        &self,
        namespace: Namespace,
        key: &str,
        params: Option<&CacheParams>,
    ) -> Option<T>
    where
        T: DeserializeOwned,
    {
        self.get(namespace.as_str(), key, params).await
    }

    /// Read-through: return the cached value or run `load` and cache its result.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        namespace: Namespace,
        key: &str,
        params: Option<&CacheParams>,
        load: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Sync,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get_in(namespace, key, params).await {
            return Ok(hit);
        }

        let value = load().await?;
        self.set_in(namespace, key, &value, params).await?;
        Ok(value)
    }

    fn active_remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        if self.is_remote_connected() {
            self.remote.as_ref()
        } else {
            None
        }
    }

    async fn timed<T, F>(&self, op: &'static str, call: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        let timeout = self.config.remote_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout { op, timeout }),
        }
    }

    fn remote_failed(&self, op: &'static str, key: &CacheKey, err: &RemoteError) {
        counter!(METRIC_FALLBACK).increment(1);
        if err.is_connectivity() {
            let was_connected = self.remote_connected.swap(false, Ordering::AcqRel);
            warn!(
                component = SOURCE,
                op,
                cache_key = %key,
                error = %err,
                was_connected,
                "remote cache failed, falling back to in-process store"
            );
        } else {
            warn!(
                component = SOURCE,
                op,
                cache_key = %key,
                error = %err,
                "remote cache call failed"
            );
        }
    }
}

fn decode_or_log<T: DeserializeOwned>(key: &CacheKey, payload: &[u8]) -> Option<T> {
    match codec::decode(payload) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(
                component = SOURCE,
                cache_key = %key,
                error = %err,
                "cached payload did not decode"
            );
            None
        }
    }
}
