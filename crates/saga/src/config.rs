//! Engine tuning.

use std::time::Duration;

/// Runtime settings shared by the orchestrator and background workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How many times a transition is re-run after a persist conflict.
    pub max_conflict_retries: u32,

    /// How many times a compensating command is re-issued on timeout before
    /// the saga escalates to `Failed`.
    pub compensation_retry_limit: u32,

    /// Pause between outbox relay passes.
    pub relay_interval: Duration,

    /// Maximum outbox messages relayed per pass.
    pub relay_batch_size: usize,

    /// How long relayed outbox messages are kept before the relay deletes
    /// them.
    pub outbox_retention: Duration,

    /// Pause between timeout poller passes.
    pub timeout_poll_interval: Duration,

    /// Maximum due timeouts delivered per pass.
    pub timeout_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            compensation_retry_limit: 3,
            relay_interval: Duration::from_millis(500),
            relay_batch_size: 100,
            outbox_retention: Duration::from_secs(3600),
            timeout_poll_interval: Duration::from_secs(1),
            timeout_batch_size: 100,
        }
    }
}

impl EngineConfig {
    /// Loads settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_conflict_retries: env_or("SAGA_MAX_CONFLICT_RETRIES", defaults.max_conflict_retries),
            compensation_retry_limit: env_or(
                "SAGA_COMPENSATION_RETRY_LIMIT",
                defaults.compensation_retry_limit,
            ),
            relay_interval: Duration::from_millis(env_or(
                "SAGA_RELAY_INTERVAL_MS",
                defaults.relay_interval.as_millis() as u64,
            )),
            relay_batch_size: env_or("SAGA_RELAY_BATCH_SIZE", defaults.relay_batch_size),
            outbox_retention: Duration::from_secs(env_or(
                "SAGA_OUTBOX_RETENTION_SECS",
                defaults.outbox_retention.as_secs(),
            )),
            timeout_poll_interval: Duration::from_millis(env_or(
                "SAGA_TIMEOUT_POLL_INTERVAL_MS",
                defaults.timeout_poll_interval.as_millis() as u64,
            )),
            timeout_batch_size: env_or("SAGA_TIMEOUT_BATCH_SIZE", defaults.timeout_batch_size),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_conflict_retries, 5);
        assert_eq!(config.compensation_retry_limit, 3);
        assert_eq!(config.relay_interval, Duration::from_millis(500));
        assert_eq!(config.outbox_retention, Duration::from_secs(3600));
        assert_eq!(config.timeout_batch_size, 100);
    }

    #[test]
    fn unparsable_values_fall_back() {
        assert_eq!(env_or("SAGA_TEST_UNSET_VARIABLE", 7u32), 7);
    }
}
