//! Configuration loading and validation.
//!
//! Settings come from an optional `config/default.*` file overlaid with
//! `COURIER_`-prefixed environment variables (nested keys separated by
//! `__`, e.g. `COURIER_STORE__PATH`). Broker knobs have defaults; the
//! required store fields do not, and resolving a configuration without
//! them fails here rather than on first use.

mod settings;

pub use settings::{BrokerSettings, Settings, StoreSettings};

use config::{Config, Environment, File};

use crate::utils::error::ConfigurationError;
use settings::PartialSettings;

/// Loads, merges, and validates the configuration.
pub fn load_config() -> Result<Settings, ConfigurationError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("COURIER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let resolved = builder.build()?;
    let partial: PartialSettings = resolved.try_deserialize()?;
    let broker_defaults = BrokerSettings::default();

    let settings = Settings {
        store: StoreSettings {
            path: partial
                .store
                .as_ref()
                .and_then(|store| store.path.clone())
                .unwrap_or_default(),
            max_messages_per_topic: partial
                .store
                .as_ref()
                .and_then(|store| store.max_messages_per_topic),
        },
        broker: BrokerSettings {
            worker_pool_size: partial
                .broker
                .as_ref()
                .and_then(|broker| broker.worker_pool_size)
                .unwrap_or(broker_defaults.worker_pool_size),
            default_ttl_secs: partial
                .broker
                .as_ref()
                .and_then(|broker| broker.default_ttl_secs)
                .or(broker_defaults.default_ttl_secs),
            poll_timeout_ms: partial
                .broker
                .as_ref()
                .and_then(|broker| broker.poll_timeout_ms)
                .unwrap_or(broker_defaults.poll_timeout_ms),
            startup_timeout_ms: partial
                .broker
                .as_ref()
                .and_then(|broker| broker.startup_timeout_ms)
                .unwrap_or(broker_defaults.startup_timeout_ms),
            max_read_retries: partial
                .broker
                .as_ref()
                .and_then(|broker| broker.max_read_retries)
                .unwrap_or(broker_defaults.max_read_retries),
            retry_backoff_ms: partial
                .broker
                .as_ref()
                .and_then(|broker| broker.retry_backoff_ms)
                .unwrap_or(broker_defaults.retry_backoff_ms),
            retry_backoff_ceiling_ms: partial
                .broker
                .as_ref()
                .and_then(|broker| broker.retry_backoff_ceiling_ms)
                .unwrap_or(broker_defaults.retry_backoff_ceiling_ms),
            shutdown_grace_ms: partial
                .broker
                .as_ref()
                .and_then(|broker| broker.shutdown_grace_ms)
                .unwrap_or(broker_defaults.shutdown_grace_ms),
        },
    };

    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests;
