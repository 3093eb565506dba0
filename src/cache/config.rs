//! Cache configuration.
//!
//! Controls the in-process fallback store, per-namespace TTLs and the remote
//! operation timeout via `hemicycle.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use super::namespace::Namespace;

const DEFAULT_MEMORY_CAPACITY: usize = 1000;
const DEFAULT_TTL_SECS: u64 = 300;
const DEFAULT_DEBATES_TTL_SECS: u64 = 300;
const DEFAULT_STREAMING_TTL_SECS: u64 = 3600;
const DEFAULT_METADATA_TTL_SECS: u64 = 86_400;
const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 5000;

/// Resolved cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum entries held by the in-process fallback store.
    pub memory_capacity: usize,
    /// TTL applied when a write names no TTL and no namespace.
    pub default_ttl: Duration,
    pub debates_ttl: Duration,
    pub streaming_ttl: Duration,
    pub metadata_ttl: Duration,
    /// Upper bound for a single remote call before it counts as an outage.
    pub remote_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            debates_ttl: Duration::from_secs(DEFAULT_DEBATES_TTL_SECS),
            streaming_ttl: Duration::from_secs(DEFAULT_STREAMING_TTL_SECS),
            metadata_ttl: Duration::from_secs(DEFAULT_METADATA_TTL_SECS),
            remote_timeout: Duration::from_millis(DEFAULT_REMOTE_TIMEOUT_MS),
        }
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            memory_capacity: settings.cache.memory_capacity.get(),
            default_ttl: settings.cache.default_ttl,
            debates_ttl: settings.cache.debates_ttl,
            streaming_ttl: settings.cache.streaming_ttl,
            metadata_ttl: settings.cache.metadata_ttl,
            remote_timeout: settings.redis.operation_timeout,
        }
    }
}

impl CacheConfig {
    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Default TTL for writes into `namespace`.
    pub fn ttl_for(&self, namespace: Namespace) -> Duration {
        match namespace {
            Namespace::Debates => self.debates_ttl,
            Namespace::Streaming => self.streaming_ttl,
            Namespace::Metadata => self.metadata_ttl,
        }
    }
}
