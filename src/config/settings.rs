use serde::Deserialize;
use std::time::Duration;

use crate::utils::error::ConfigurationError;

/// Top-level configuration for the message center.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub store: StoreSettings,
    pub broker: BrokerSettings,
}

/// Connection parameters for the backing store.
///
/// The shipped durable backend is an embedded sled database, so the
/// connection reduces to a filesystem path. `path` is required and must be
/// non-empty; a missing path is a fatal configuration error, raised when
/// the settings are loaded rather than on first use.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    pub path: String,
    pub max_messages_per_topic: Option<usize>,
}

/// Operational parameters for the broker.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Number of worker tasks in the shared dispatch pool.
    pub worker_pool_size: usize,
    /// TTL applied by `MessageCenter::publish`; `None` publishes permanent
    /// messages by default.
    pub default_ttl_secs: Option<u64>,
    /// Upper bound on a single blocking read, which is also the worst-case
    /// latency for a loop to observe a stop signal.
    pub poll_timeout_ms: u64,
    /// How long `start()` keeps pinging an unreachable store before giving
    /// up for good.
    pub startup_timeout_ms: u64,
    /// Consecutive failed reads a topic loop tolerates before it stops.
    pub max_read_retries: u32,
    /// Initial retry backoff; doubles on every consecutive failure.
    pub retry_backoff_ms: u64,
    /// Ceiling the exponential backoff saturates at.
    pub retry_backoff_ceiling_ms: u64,
    /// Grace period the demo binary passes to `shutdown`.
    pub shutdown_grace_ms: u64,
}

impl BrokerSettings {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn retry_backoff_ceiling(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ceiling_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            default_ttl_secs: None,
            poll_timeout_ms: 1000,
            startup_timeout_ms: 5000,
            max_read_retries: 5,
            retry_backoff_ms: 100,
            retry_backoff_ceiling_ms: 5000,
            shutdown_grace_ms: 5000,
        }
    }
}

/// Partial configuration as read from files or the environment. Broker
/// fields fall back to defaults; required store fields do not.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub store: Option<PartialStoreSettings>,
    pub broker: Option<PartialBrokerSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialStoreSettings {
    pub path: Option<String>,
    pub max_messages_per_topic: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub worker_pool_size: Option<usize>,
    pub default_ttl_secs: Option<u64>,
    pub poll_timeout_ms: Option<u64>,
    pub startup_timeout_ms: Option<u64>,
    pub max_read_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub retry_backoff_ceiling_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
}

impl Settings {
    /// Fail-fast validation of the resolved configuration. A broker built
    /// from settings that did not pass this check must never start.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.store.path.trim().is_empty() {
            return Err(ConfigurationError::MissingField("store.path"));
        }
        if self.broker.worker_pool_size == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "broker.worker_pool_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.broker.poll_timeout_ms == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "broker.poll_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.broker.max_read_retries == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "broker.max_read_retries",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
