use std::time::Duration;

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_HISTORY_CAPACITY: usize = 100;
const DEFAULT_REPLAY_LIMIT: usize = 10;
const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Tuning for the connection registry.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Period of the liveness sweep.
    pub sweep_interval: Duration,
    /// Connections silent for longer than this are evicted by the sweep.
    pub idle_timeout: Duration,
    /// Messages retained per active channel.
    pub history_capacity: usize,
    /// Messages replayed to a new subscriber.
    pub replay_limit: usize,
    /// Queue depth between the registry and each socket writer.
    pub outbound_buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            replay_limit: DEFAULT_REPLAY_LIMIT,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl From<&crate::config::Settings> for RealtimeConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        let realtime = &settings.realtime;
        Self {
            sweep_interval: realtime.sweep_interval,
            idle_timeout: realtime.idle_timeout,
            history_capacity: realtime.history_capacity.get(),
            replay_limit: realtime.replay_limit,
            outbound_buffer: realtime.outbound_buffer.get(),
        }
    }
}
