//! The `store` module abstracts the durable backend the broker is built on.
//!
//! The broker only needs three primitives from a backend: append a payload
//! onto a topic, block for the next unread payload on a topic, and a
//! liveness check. Everything else (connection handling, eviction, on-disk
//! layout) stays behind the [`MessageStore`] trait so broker logic is
//! independent of any concrete store.
//!
//! Two backends ship with the crate: [`MemoryStore`] for tests and
//! single-process embedding, and [`SledStore`] for durable storage.

pub mod memory;
pub mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failure surfaced by store operations. Transient by design: producers
/// report it to their caller, consumer loops retry with backoff.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StoreError {
    pub(crate) fn unavailable(err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable {
            reason: err.to_string(),
        }
    }
}

/// Minimal primitives the broker needs from a shared backend.
///
/// Stored messages have queue semantics: each payload is handed to exactly
/// one successful `read_blocking` call, after which it is gone from the
/// store. Independent consumer loops may call `read_blocking` concurrently
/// for different topics without interfering with each other.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Appends a payload onto the topic's ordered collection and returns the
    /// backend key it was stored under. If `ttl` is given the entry is
    /// scheduled for backend-side expiry at `now + ttl`.
    async fn write(
        &self,
        topic: &str,
        payload: &[u8],
        ttl: Option<Duration>,
    ) -> Result<String, StoreError>;

    /// Blocks for up to `timeout` waiting for the next unread payload on
    /// `topic`. A timeout is `Ok(None)`, not an error.
    async fn read_blocking(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, StoreError>;

    /// Lightweight liveness check used by startup and reconnection logic.
    async fn ping(&self) -> bool;
}
