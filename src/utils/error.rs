//! Error taxonomy for the message center.
//!
//! Configuration problems are fatal and surface at construction time.
//! Store trouble is transient: publishers hand it straight back to the
//! caller, consumer loops retry with bounded backoff and report a
//! [`TopicLoopFailed`] event when they give up. Per-handler failures never
//! leave the dispatch path; they are logged and counted instead.

use thiserror::Error;

use crate::store::StoreError;

/// Fatal configuration problem. Raised while loading or validating
/// settings; the process must not start with a broken configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing required config field: {0}")]
    MissingField(&'static str),

    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },

    #[error("failed to read configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Returned by the publish family. There is no transparent retry; the
/// caller decides whether and how to retry a failed publish.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("failed to serialize message envelope: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lifecycle errors from the message center itself.
#[derive(Debug, Error)]
pub enum CenterError {
    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("message center has been shut down")]
    ShutDown,

    #[error("store did not become reachable within {waited_ms} ms")]
    StartupTimeout { waited_ms: u64 },
}

/// Event emitted when a topic's consumer loop exhausts its retries and
/// stops consuming. Delivered to the center-level error callback; the
/// topic stays silent until it is subscribed again or the center is
/// restarted.
#[derive(Debug, Clone)]
pub struct TopicLoopFailed {
    pub topic: String,
    pub attempts: u32,
    pub reason: String,
}
