use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::store::{MessageStore, StoreError};
use crate::utils::error::TopicLoopFailed;
use super::dispatch::DispatchJob;
use super::message::Message;
use super::metrics::CenterMetrics;
use super::topic::SharedHandlers;

/// Lifecycle of one topic's consumer loop.
///
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`. The loop enters
/// `Running` once store connectivity is confirmed, and leaves it either
/// through a shutdown/unsubscribe signal or by exhausting its retries
/// against an unreachable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Observable state cell shared between a consumer loop and the center.
#[derive(Debug)]
pub(crate) struct StateCell(Mutex<LoopState>);

impl StateCell {
    pub fn new() -> Self {
        Self(Mutex::new(LoopState::Stopped))
    }

    pub fn set(&self, state: LoopState) {
        *self.0.lock().unwrap() = state;
    }

    pub fn get(&self) -> LoopState {
        *self.0.lock().unwrap()
    }
}

pub(crate) type ErrorCallback = Arc<dyn Fn(TopicLoopFailed) + Send + Sync>;
pub(crate) type SharedErrorCallback = Arc<Mutex<Option<ErrorCallback>>>;

/// Retry and pacing knobs the loop takes from the broker settings.
#[derive(Debug, Clone)]
pub(crate) struct ConsumerSettings {
    pub poll_timeout: Duration,
    pub max_read_retries: u32,
    pub retry_backoff: Duration,
    pub retry_backoff_ceiling: Duration,
}

/// The per-topic read loop.
///
/// Repeatedly blocks on the store for the next message, enforces expiry,
/// drops poison, and submits live messages to the shared worker pool. The
/// loop itself only ever suspends inside `read_blocking` and on pool
/// submission; handler execution happens on the pool workers.
pub(crate) struct TopicConsumer {
    pub topic: String,
    pub store: Arc<dyn MessageStore>,
    pub handlers: SharedHandlers,
    pub pool_tx: mpsc::Sender<DispatchJob>,
    pub stop_rx: watch::Receiver<bool>,
    pub state: Arc<StateCell>,
    pub metrics: Arc<CenterMetrics>,
    pub error_cb: SharedErrorCallback,
    pub settings: ConsumerSettings,
}

impl TopicConsumer {
    pub async fn run(mut self) {
        self.state.set(LoopState::Starting);
        info!(topic = %self.topic, "topic loop starting");

        let mut attempts: u32 = 0;
        let mut backoff = self.settings.retry_backoff;

        // Confirm connectivity before entering the poll loop. An
        // unreachable store here follows the same bounded backoff as a
        // failing read.
        while !self.store.ping().await {
            attempts += 1;
            error!(topic = %self.topic, attempt = attempts, "store unreachable, backing off");
            if attempts >= self.settings.max_read_retries {
                self.fail(attempts, "store unreachable".to_string());
                return;
            }
            if self.wait_backoff(&mut backoff).await {
                self.finish();
                return;
            }
        }

        attempts = 0;
        backoff = self.settings.retry_backoff;
        self.state.set(LoopState::Running);
        info!(topic = %self.topic, "topic loop running");

        loop {
            if *self.stop_rx.borrow() {
                break;
            }
            let read = tokio::select! {
                _ = self.stop_rx.changed() => break,
                read = self
                    .store
                    .read_blocking(&self.topic, self.settings.poll_timeout) => read,
            };
            match read {
                Ok(Some(raw)) => {
                    attempts = 0;
                    backoff = self.settings.retry_backoff;
                    self.dispatch(raw).await;
                }
                Ok(None) => {
                    attempts = 0;
                    backoff = self.settings.retry_backoff;
                }
                Err(StoreError::Unavailable { reason }) => {
                    attempts += 1;
                    error!(
                        topic = %self.topic,
                        attempt = attempts,
                        "read from store failed: {}",
                        reason
                    );
                    if attempts >= self.settings.max_read_retries {
                        self.fail(attempts, reason);
                        return;
                    }
                    if self.wait_backoff(&mut backoff).await {
                        break;
                    }
                }
            }
        }

        self.finish();
    }

    /// Decodes one raw payload and hands it to the worker pool, enforcing
    /// expiry and poison handling on the way.
    async fn dispatch(&self, raw: Vec<u8>) {
        let message = match Message::from_bytes(&raw) {
            Ok(message) => message,
            Err(err) => {
                self.metrics.poison_dropped.fetch_add(1, Ordering::Relaxed);
                error!(topic = %self.topic, "dropping undecodable message: {}", err);
                return;
            }
        };

        if message.is_expired(Utc::now()) {
            self.metrics.expired_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                topic = %self.topic,
                message_id = %message.id,
                "dropping expired message"
            );
            return;
        }

        let handlers = self.handlers.read().unwrap().clone();
        if handlers.is_empty() {
            return;
        }

        let job = DispatchJob { message, handlers };
        if self.pool_tx.send(job).await.is_err() {
            warn!(topic = %self.topic, "dispatch pool closed, dropping message");
        }
    }

    /// Sleeps the current backoff (doubling it, capped at the ceiling).
    /// Returns true if a stop signal arrived during the sleep.
    async fn wait_backoff(&mut self, backoff: &mut Duration) -> bool {
        let stopped = tokio::select! {
            _ = self.stop_rx.changed() => true,
            _ = tokio::time::sleep(*backoff) => false,
        };
        *backoff = (*backoff * 2).min(self.settings.retry_backoff_ceiling);
        stopped
    }

    /// Retry budget exhausted: record the failure, stop, and surface the
    /// event through the center-level error callback.
    fn fail(&self, attempts: u32, reason: String) {
        self.state.set(LoopState::Stopping);
        self.metrics.loop_failures.fetch_add(1, Ordering::Relaxed);
        error!(
            topic = %self.topic,
            attempts,
            "giving up on topic after repeated store failures"
        );
        self.state.set(LoopState::Stopped);
        info!(topic = %self.topic, "topic loop stopped");
        let callback = self.error_cb.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(TopicLoopFailed {
                topic: self.topic.clone(),
                attempts,
                reason,
            });
        }
    }

    fn finish(&self) {
        self.state.set(LoopState::Stopping);
        self.state.set(LoopState::Stopped);
        info!(topic = %self.topic, "topic loop stopped");
    }
}
