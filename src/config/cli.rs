use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Hemicycle binary.
#[derive(Debug, Parser)]
#[command(name = "hemicycle", version, about = "Hemicycle debate API server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "HEMICYCLE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP and WebSocket server.
    Serve(Box<ServeArgs>),
    /// Cache maintenance.
    Cache(CacheArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RedisOverride {
    /// Override the Redis connection URL. An empty value disables Redis.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub redis: RedisOverride,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Expose `/api/cache/stats`.
    #[arg(
        long = "expose-debug-stats",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub expose_debug_stats: Option<bool>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the per-call Redis timeout.
    #[arg(long = "redis-operation-timeout-ms", value_name = "MILLIS")]
    pub redis_operation_timeout_ms: Option<u64>,

    /// Override the in-process cache capacity.
    #[arg(long = "cache-memory-capacity", value_name = "COUNT")]
    pub cache_memory_capacity: Option<u64>,

    /// Override the WebSocket idle timeout.
    #[arg(long = "realtime-idle-timeout-seconds", value_name = "SECONDS")]
    pub realtime_idle_timeout_seconds: Option<u64>,

    /// Toggle HTTP rate limiting.
    #[arg(
        long = "rate-limit-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub rate_limit_enabled: Option<bool>,

    /// Override the default per-minute request ceiling.
    #[arg(long = "rate-limit-per-minute", value_name = "COUNT")]
    pub rate_limit_per_minute: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CacheCommand {
    /// Remove every entry in one namespace from Redis.
    Clear(CacheClearArgs),
}

#[derive(Debug, Args, Clone)]
pub struct CacheClearArgs {
    #[command(flatten)]
    pub redis: RedisOverride,

    /// Namespace to clear.
    #[arg(value_name = "NAMESPACE", value_parser = ["debates", "streaming", "metadata"])]
    pub namespace: String,
}
