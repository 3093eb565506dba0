use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to cache callers.
///
/// Remote outages never appear here; they degrade to the in-process store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache value could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single remote-store call. Internal to the cache service.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote cache unavailable: {0}")]
    Unavailable(String),
    #[error("remote cache call `{op}` timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },
    #[error("remote cache replied unexpectedly: {0}")]
    Protocol(String),
}

impl RemoteError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Whether the failure means the store is unreachable, as opposed to a
    /// reply the store produced but we could not use.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }
}

impl From<redis::RedisError> for RemoteError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::Unavailable(err.to_string())
        } else if err.is_timeout() {
            Self::Unavailable(format!("timeout: {err}"))
        } else {
            Self::Protocol(err.to_string())
        }
    }
}
