//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CacheArgs, CacheClearArgs, CacheCommand, CliArgs, Command, RedisOverride, ServeArgs,
    ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "hemicycle";
const ENV_PREFIX: &str = "HEMICYCLE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";
const DEFAULT_REDIS_OPERATION_TIMEOUT_MS: u64 = 5000;
const DEFAULT_CACHE_MEMORY_CAPACITY: u64 = 1000;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_DEBATES_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_STREAMING_TTL_SECS: u64 = 3600;
const DEFAULT_CACHE_METADATA_TTL_SECS: u64 = 86_400;
const DEFAULT_REALTIME_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_REALTIME_IDLE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_REALTIME_HISTORY_CAPACITY: u64 = 100;
const DEFAULT_REALTIME_REPLAY_LIMIT: u64 = 10;
const DEFAULT_REALTIME_OUTBOUND_BUFFER: u64 = 256;
const DEFAULT_RATE_LIMIT_PER_MINUTE: u64 = 100;
const DEFAULT_RATE_LIMIT_BURST: u64 = 200;
const DEFAULT_RATE_LIMIT_BURST_WINDOW_SECS: u64 = 10;
const DEFAULT_RATE_LIMIT_BAN_SECS: u64 = 600;
const DEFAULT_RATE_LIMIT_VIOLATION_THRESHOLD: u32 = 5;
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub redis: RedisSettings,
    pub cache: CacheSettings,
    pub realtime: RealtimeSettings,
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    /// Serve `/api/cache/stats`. Off in production.
    pub expose_debug_stats: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// `None` runs the cache on the in-process store only.
    pub url: Option<String>,
    pub operation_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub memory_capacity: NonZeroUsize,
    pub default_ttl: Duration,
    pub debates_ttl: Duration,
    pub streaming_ttl: Duration,
    pub metadata_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub sweep_interval: Duration,
    pub idle_timeout: Duration,
    pub history_capacity: NonZeroUsize,
    pub replay_limit: usize,
    pub outbound_buffer: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub window: Duration,
    pub per_minute: NonZeroU32,
    pub burst_window: Duration,
    pub burst: NonZeroU32,
    pub ban: Duration,
    pub violation_threshold: u32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Cache(args)) => match &args.command {
            CacheCommand::Clear(clear) => raw.apply_redis_override(&clear.redis),
        },
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    redis: RawRedisSettings,
    cache: RawCacheSettings,
    realtime: RawRealtimeSettings,
    rate_limit: RawRateLimitSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_redis_override(&overrides.redis);

        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(expose) = overrides.expose_debug_stats {
            self.server.expose_debug_stats = Some(expose);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(timeout) = overrides.redis_operation_timeout_ms {
            self.redis.operation_timeout_ms = Some(timeout);
        }
        if let Some(capacity) = overrides.cache_memory_capacity {
            self.cache.memory_capacity = Some(capacity);
        }
        if let Some(seconds) = overrides.realtime_idle_timeout_seconds {
            self.realtime.idle_timeout_secs = Some(seconds);
        }
        if let Some(enabled) = overrides.rate_limit_enabled {
            self.rate_limit.enabled = Some(enabled);
        }
        if let Some(per_minute) = overrides.rate_limit_per_minute {
            self.rate_limit.per_minute = Some(per_minute);
        }
    }

    fn apply_redis_override(&mut self, overrides: &RedisOverride) {
        if let Some(url) = overrides.redis_url.as_ref() {
            self.redis.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            redis,
            cache,
            realtime,
            rate_limit,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            redis: build_redis_settings(redis)?,
            cache: build_cache_settings(cache)?,
            realtime: build_realtime_settings(realtime)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_shutdown = non_zero_secs(
        server
            .graceful_shutdown_seconds
            .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS),
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
        expose_debug_stats: server.expose_debug_stats.unwrap_or(false),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_redis_settings(redis: RawRedisSettings) -> Result<RedisSettings, LoadError> {
    let url = match redis.url {
        Some(value) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        None => Some(DEFAULT_REDIS_URL.to_string()),
    };
    if let Some(url) = url.as_deref()
        && !(url.starts_with("redis://")
            || url.starts_with("rediss://")
            || url.starts_with("redis+unix://")
            || url.starts_with("unix://"))
    {
        return Err(LoadError::invalid(
            "redis.url",
            format!("unsupported scheme in `{url}`"),
        ));
    }

    let timeout_ms = redis
        .operation_timeout_ms
        .unwrap_or(DEFAULT_REDIS_OPERATION_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "redis.operation_timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(RedisSettings {
        url,
        operation_timeout: Duration::from_millis(timeout_ms),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let memory_capacity = non_zero_usize(
        cache
            .memory_capacity
            .unwrap_or(DEFAULT_CACHE_MEMORY_CAPACITY),
        "cache.memory_capacity",
    )?;

    Ok(CacheSettings {
        memory_capacity,
        default_ttl: non_zero_secs(
            cache.default_ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS),
            "cache.default_ttl_secs",
        )?,
        debates_ttl: non_zero_secs(
            cache
                .debates_ttl_secs
                .unwrap_or(DEFAULT_CACHE_DEBATES_TTL_SECS),
            "cache.debates_ttl_secs",
        )?,
        streaming_ttl: non_zero_secs(
            cache
                .streaming_ttl_secs
                .unwrap_or(DEFAULT_CACHE_STREAMING_TTL_SECS),
            "cache.streaming_ttl_secs",
        )?,
        metadata_ttl: non_zero_secs(
            cache
                .metadata_ttl_secs
                .unwrap_or(DEFAULT_CACHE_METADATA_TTL_SECS),
            "cache.metadata_ttl_secs",
        )?,
    })
}

fn build_realtime_settings(
    realtime: RawRealtimeSettings,
) -> Result<RealtimeSettings, LoadError> {
    let sweep_interval = non_zero_secs(
        realtime
            .sweep_interval_secs
            .unwrap_or(DEFAULT_REALTIME_SWEEP_INTERVAL_SECS),
        "realtime.sweep_interval_secs",
    )?;
    let idle_timeout = non_zero_secs(
        realtime
            .idle_timeout_secs
            .unwrap_or(DEFAULT_REALTIME_IDLE_TIMEOUT_SECS),
        "realtime.idle_timeout_secs",
    )?;
    if idle_timeout < sweep_interval {
        return Err(LoadError::invalid(
            "realtime.idle_timeout_secs",
            "must not be shorter than realtime.sweep_interval_secs",
        ));
    }

    let history_capacity = non_zero_usize(
        realtime
            .history_capacity
            .unwrap_or(DEFAULT_REALTIME_HISTORY_CAPACITY),
        "realtime.history_capacity",
    )?;
    let replay_limit = realtime
        .replay_limit
        .unwrap_or(DEFAULT_REALTIME_REPLAY_LIMIT);
    let replay_limit = usize::try_from(replay_limit)
        .map_err(|_| LoadError::invalid("realtime.replay_limit", "value out of range"))?;
    if replay_limit > history_capacity.get() {
        return Err(LoadError::invalid(
            "realtime.replay_limit",
            "must not exceed realtime.history_capacity",
        ));
    }

    let outbound_buffer = non_zero_usize(
        realtime
            .outbound_buffer
            .unwrap_or(DEFAULT_REALTIME_OUTBOUND_BUFFER),
        "realtime.outbound_buffer",
    )?;

    Ok(RealtimeSettings {
        sweep_interval,
        idle_timeout,
        history_capacity,
        replay_limit,
        outbound_buffer,
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let per_minute = non_zero_u32(
        rate_limit
            .per_minute
            .unwrap_or(DEFAULT_RATE_LIMIT_PER_MINUTE),
        "rate_limit.per_minute",
    )?;
    let burst = non_zero_u32(
        rate_limit.burst.unwrap_or(DEFAULT_RATE_LIMIT_BURST),
        "rate_limit.burst",
    )?;
    let burst_window = non_zero_secs(
        rate_limit
            .burst_window_secs
            .unwrap_or(DEFAULT_RATE_LIMIT_BURST_WINDOW_SECS),
        "rate_limit.burst_window_secs",
    )?;
    let window = Duration::from_secs(RATE_LIMIT_WINDOW_SECS);
    if burst_window > window {
        return Err(LoadError::invalid(
            "rate_limit.burst_window_secs",
            "must not exceed the 60 second window",
        ));
    }
    let ban = non_zero_secs(
        rate_limit.ban_secs.unwrap_or(DEFAULT_RATE_LIMIT_BAN_SECS),
        "rate_limit.ban_secs",
    )?;

    Ok(RateLimitSettings {
        enabled: rate_limit.enabled.unwrap_or(true),
        window,
        per_minute,
        burst_window,
        burst,
        ban,
        violation_threshold: rate_limit
            .violation_threshold
            .unwrap_or(DEFAULT_RATE_LIMIT_VIOLATION_THRESHOLD),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    expose_debug_stats: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
    operation_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    memory_capacity: Option<u64>,
    default_ttl_secs: Option<u64>,
    debates_ttl_secs: Option<u64>,
    streaming_ttl_secs: Option<u64>,
    metadata_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRealtimeSettings {
    sweep_interval_secs: Option<u64>,
    idle_timeout_secs: Option<u64>,
    history_capacity: Option<u64>,
    replay_limit: Option<u64>,
    outbound_buffer: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    enabled: Option<bool>,
    per_minute: Option<u64>,
    burst: Option<u64>,
    burst_window_secs: Option<u64>,
    ban_secs: Option<u64>,
    violation_threshold: Option<u32>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value_usize: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value_usize).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}
