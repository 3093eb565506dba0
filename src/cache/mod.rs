//! Hemicycle cache.
//!
//! Namespaced, TTL-bound key/value storage in two tiers:
//!
//! - **Remote**: a Redis instance shared by every API process.
//! - **In-process**: a bounded map used whenever the remote tier is
//!   unreachable or not configured.
//!
//! ## Configuration
//!
//! ```toml
//! [redis]
//! url = "redis://127.0.0.1:6379/0"
//! operation_timeout_ms = 5000
//!
//! [cache]
//! memory_capacity = 1000
//! default_ttl_secs = 300
//! debates_ttl_secs = 300
//! streaming_ttl_secs = 3600
//! metadata_ttl_secs = 86400
//! ```

mod codec;
mod config;
mod error;
mod keys;
mod memory;
mod namespace;
mod remote;
mod service;

pub use config::CacheConfig;
pub use error::{CacheError, RemoteError};
pub use keys::{CacheKey, CacheParams, MAX_KEY_CHARS};
pub use memory::MemoryStore;
pub use namespace::Namespace;
pub use remote::{RedisStore, RemoteMetrics, RemoteStore};
pub use service::{CacheService, CacheStats};
