use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(InfraError::Telemetry)
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "hemicycle_cache_remote_hit_total",
            Unit::Count,
            "Total number of cache reads served by Redis."
        );
        describe_counter!(
            "hemicycle_cache_memory_hit_total",
            Unit::Count,
            "Total number of cache reads served by the in-process store."
        );
        describe_counter!(
            "hemicycle_cache_miss_total",
            Unit::Count,
            "Total number of cache reads that found nothing."
        );
        describe_counter!(
            "hemicycle_cache_fallback_total",
            Unit::Count,
            "Total number of failed Redis calls that fell back to the in-process store."
        );
        describe_counter!(
            "hemicycle_cache_memory_evict_total",
            Unit::Count,
            "Total number of in-process entries evicted due to capacity."
        );
        describe_gauge!(
            "hemicycle_realtime_connections",
            Unit::Count,
            "Current number of registered WebSocket connections."
        );
        describe_counter!(
            "hemicycle_realtime_broadcast_total",
            Unit::Count,
            "Total number of broadcasts to channels with subscribers."
        );
        describe_counter!(
            "hemicycle_realtime_delivery_failure_total",
            Unit::Count,
            "Total number of messages that could not be queued for a connection."
        );
        describe_counter!(
            "hemicycle_http_rate_limited_total",
            Unit::Count,
            "Total number of HTTP requests rejected by the rate limiter."
        );
    });
}
