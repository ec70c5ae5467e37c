use serial_test::serial;

use super::{BrokerSettings, Settings, StoreSettings, load_config};
use crate::utils::error::ConfigurationError;

fn settings_with(path: &str, worker_pool_size: usize) -> Settings {
    Settings {
        store: StoreSettings {
            path: path.to_string(),
            max_messages_per_topic: None,
        },
        broker: BrokerSettings {
            worker_pool_size,
            ..BrokerSettings::default()
        },
    }
}

#[test]
fn broker_defaults() {
    let defaults = BrokerSettings::default();
    assert_eq!(defaults.worker_pool_size, 4);
    assert_eq!(defaults.poll_timeout_ms, 1000);
    assert_eq!(defaults.startup_timeout_ms, 5000);
    assert_eq!(defaults.max_read_retries, 5);
    assert_eq!(defaults.retry_backoff_ms, 100);
    assert_eq!(defaults.retry_backoff_ceiling_ms, 5000);
    assert!(defaults.default_ttl().is_none());
}

#[test]
fn validation_accepts_a_complete_configuration() {
    assert!(settings_with("courier_db", 4).validate().is_ok());
}

#[test]
fn validation_rejects_an_empty_store_path() {
    let result = settings_with("  ", 4).validate();
    assert!(matches!(
        result,
        Err(ConfigurationError::MissingField("store.path"))
    ));
}

#[test]
fn validation_rejects_a_zero_sized_worker_pool() {
    let result = settings_with("courier_db", 0).validate();
    assert!(matches!(
        result,
        Err(ConfigurationError::InvalidValue {
            field: "broker.worker_pool_size",
            ..
        })
    ));
}

#[test]
#[serial]
fn missing_store_path_fails_at_load_time() {
    temp_env::with_vars_unset(["COURIER_STORE__PATH"], || {
        let result = load_config();
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingField("store.path"))
        ));
    });
}

#[test]
#[serial]
fn empty_store_path_fails_at_load_time() {
    temp_env::with_vars([("COURIER_STORE__PATH", Some(""))], || {
        let result = load_config();
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingField("store.path"))
        ));
    });
}

#[test]
#[serial]
fn environment_overrides_reach_the_settings() {
    temp_env::with_vars(
        [
            ("COURIER_STORE__PATH", Some("/tmp/courier-test-db")),
            ("COURIER_BROKER__WORKER_POOL_SIZE", Some("8")),
            ("COURIER_BROKER__DEFAULT_TTL_SECS", Some("120")),
        ],
        || {
            let settings = load_config().expect("configuration should resolve");
            assert_eq!(settings.store.path, "/tmp/courier-test-db");
            assert_eq!(settings.broker.worker_pool_size, 8);
            assert_eq!(settings.broker.default_ttl_secs, Some(120));
            // Untouched knobs fall back to defaults.
            assert_eq!(settings.broker.poll_timeout_ms, 1000);
            assert_eq!(settings.broker.max_read_retries, 5);
        },
    );
}
