use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BrokerSettings;
use crate::store::MessageStore;
use crate::utils::error::{CenterError, PublishError, TopicLoopFailed};
use super::consumer::{
    ConsumerSettings, ErrorCallback, LoopState, SharedErrorCallback, TopicConsumer,
};
use super::dispatch::{DispatchJob, MessageHandler, WorkerPool};
use super::metrics::{CenterMetrics, MetricsSnapshot};
use super::producer::MessageProducer;
use super::topic::{SubscriptionHandle, TopicEntry};

// Pacing for the startup connectivity loop.
const STARTUP_PING_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Started,
    ShutDown,
}

struct Inner {
    phase: Phase,
    topics: HashMap<String, TopicEntry>,
    pool: Option<WorkerPool>,
}

/// Coordinator for the whole message center: owns the store handle, the
/// producer, the topic registry, and the shared dispatch pool.
///
/// The center is constructed by the application's composition root and
/// shared by reference (typically `Arc<MessageCenter>`); there is no
/// process-wide instance. Lifecycle:
///
/// - `subscribe` may be called before or after `start`. Loops for topics
///   subscribed before `start` are spawned by `start`; subscribing
///   afterwards spawns the loop immediately.
/// - `start` confirms store connectivity and fails fatally if the store
///   stays unreachable for the whole startup timeout.
/// - `shutdown` stops every loop, drains in-flight dispatches up to the
///   grace period, and is an idempotent no-op on repeated calls.
pub struct MessageCenter {
    settings: BrokerSettings,
    store: Arc<dyn MessageStore>,
    producer: MessageProducer,
    metrics: Arc<CenterMetrics>,
    error_cb: SharedErrorCallback,
    inner: Mutex<Inner>,
}

impl MessageCenter {
    pub fn new(settings: BrokerSettings, store: Arc<dyn MessageStore>) -> Self {
        let producer = MessageProducer::new(Arc::clone(&store));
        Self {
            settings,
            store,
            producer,
            metrics: Arc::new(CenterMetrics::default()),
            error_cb: Arc::new(Mutex::new(None)),
            inner: Mutex::new(Inner {
                phase: Phase::Created,
                topics: HashMap::new(),
                pool: None,
            }),
        }
    }

    /// Establishes store connectivity and spawns consumer loops for every
    /// topic subscribed so far. Keeps pinging an unreachable store until
    /// the startup timeout elapses, then fails; a center that failed to
    /// start must not be used.
    pub async fn start(&self) -> Result<(), CenterError> {
        {
            let inner = self.inner.lock().unwrap();
            match inner.phase {
                Phase::Started => return Ok(()),
                Phase::ShutDown => return Err(CenterError::ShutDown),
                Phase::Created => {}
            }
        }

        let deadline = tokio::time::Instant::now() + self.settings.startup_timeout();
        while !self.store.ping().await {
            if tokio::time::Instant::now() >= deadline {
                return Err(CenterError::StartupTimeout {
                    waited_ms: self.settings.startup_timeout_ms,
                });
            }
            warn!("store not reachable yet, retrying");
            tokio::time::sleep(STARTUP_PING_INTERVAL).await;
        }

        let mut inner = self.inner.lock().unwrap();
        match inner.phase {
            Phase::Started => return Ok(()),
            Phase::ShutDown => return Err(CenterError::ShutDown),
            Phase::Created => {}
        }
        inner.phase = Phase::Started;

        let pool = WorkerPool::start(self.settings.worker_pool_size, Arc::clone(&self.metrics));
        let pool_tx = pool.sender();
        inner.pool = Some(pool);

        let inner = &mut *inner;
        for (topic, entry) in inner.topics.iter_mut() {
            self.spawn_loop(topic, entry, pool_tx.clone());
        }

        info!("message center started");
        Ok(())
    }

    /// Registers `handler` for `topic` and returns a handle identifying
    /// the registration. The first handler on a topic creates its consumer
    /// loop; later ones join the existing loop. Registering the same
    /// handler twice is not deduplicated: it will run twice per message.
    ///
    /// Subscribing to a topic whose loop previously failed restarts the
    /// loop.
    pub fn subscribe(
        &self,
        topic: &str,
        handler: impl MessageHandler + 'static,
    ) -> Result<SubscriptionHandle, CenterError> {
        if topic.is_empty() {
            return Err(CenterError::EmptyTopic);
        }
        let handler: Arc<dyn MessageHandler> = Arc::new(handler);
        let handler_id = Uuid::new_v4();

        let mut inner = self.inner.lock().unwrap();
        if inner.phase == Phase::ShutDown {
            return Err(CenterError::ShutDown);
        }
        let started = inner.phase == Phase::Started;
        let pool_tx = inner.pool.as_ref().map(|pool| pool.sender());

        let entry = inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(TopicEntry::new);
        entry.handlers.write().unwrap().push((handler_id, handler));

        if started && entry.needs_spawn() {
            entry.reset_stop_channel();
            if let Some(pool_tx) = pool_tx {
                self.spawn_loop(topic, entry, pool_tx);
            }
        }

        Ok(SubscriptionHandle {
            topic: topic.to_string(),
            handler_id,
        })
    }

    /// Removes the handler registration behind `handle`. Removing the last
    /// handler of a topic tears its consumer loop down (the loop observes
    /// the stop signal within one poll timeout); a later subscribe starts
    /// a fresh loop.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.topics.get_mut(&handle.topic) else {
            return;
        };
        let now_empty = {
            let mut handlers = entry.handlers.write().unwrap();
            handlers.retain(|(id, _)| *id != handle.handler_id);
            handlers.is_empty()
        };
        if now_empty {
            if let Some(entry) = inner.topics.remove(&handle.topic) {
                let _ = entry.stop_tx.send(true);
                info!(topic = %handle.topic, "last handler removed, stopping topic loop");
            }
        }
    }

    /// Publishes with the configured default TTL (`None` in the default
    /// configuration, i.e. permanent).
    pub async fn publish(
        &self,
        topic: &str,
        content: impl Into<Vec<u8>>,
    ) -> Result<Uuid, PublishError> {
        self.producer
            .publish(topic, content, self.settings.default_ttl())
            .await
    }

    /// Publishes with an explicit TTL; the message expires at `now + ttl`.
    pub async fn publish_with_ttl(
        &self,
        topic: &str,
        content: impl Into<Vec<u8>>,
        ttl: Duration,
    ) -> Result<Uuid, PublishError> {
        self.producer.publish(topic, content, Some(ttl)).await
    }

    /// Publishes a message that never expires.
    pub async fn publish_permanent(
        &self,
        topic: &str,
        content: impl Into<Vec<u8>>,
    ) -> Result<Uuid, PublishError> {
        self.producer.publish_permanent(topic, content).await
    }

    /// Registers the callback invoked when a topic loop exhausts its
    /// retries and stops consuming. Replaces any previous callback and
    /// also applies to loops that are already running.
    pub fn on_topic_error(&self, callback: impl Fn(TopicLoopFailed) + Send + Sync + 'static) {
        let callback: ErrorCallback = Arc::new(callback);
        *self.error_cb.lock().unwrap() = Some(callback);
    }

    /// Current state of a topic's consumer loop, if the topic is
    /// registered.
    pub fn topic_state(&self, topic: &str) -> Option<LoopState> {
        self.inner
            .lock()
            .unwrap()
            .topics
            .get(topic)
            .map(|entry| entry.state.get())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stops every consumer loop, waits up to `grace` for loops and
    /// in-flight dispatches to finish, then abandons whatever is left and
    /// releases the registry. Safe to call any number of times; calls
    /// after the first are no-ops.
    pub async fn shutdown(&self, grace: Duration) {
        let (entries, pool) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.phase == Phase::ShutDown {
                return;
            }
            inner.phase = Phase::ShutDown;
            let entries: Vec<TopicEntry> =
                inner.topics.drain().map(|(_, entry)| entry).collect();
            (entries, inner.pool.take())
        };

        for entry in &entries {
            let _ = entry.stop_tx.send(true);
        }

        let deadline = tokio::time::Instant::now() + grace;
        let tasks: Vec<_> = entries
            .into_iter()
            .filter_map(|mut entry| entry.task.take())
            .collect();
        if !tasks.is_empty() {
            let joined = futures::future::join_all(tasks);
            if tokio::time::timeout_at(deadline, joined).await.is_err() {
                warn!("topic loops still running at shutdown deadline, abandoning them");
            }
        }

        if let Some(pool) = pool {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            pool.close(remaining).await;
        }

        info!("message center shut down");
    }

    fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            poll_timeout: self.settings.poll_timeout(),
            max_read_retries: self.settings.max_read_retries,
            retry_backoff: self.settings.retry_backoff(),
            retry_backoff_ceiling: self.settings.retry_backoff_ceiling(),
        }
    }

    fn spawn_loop(&self, topic: &str, entry: &mut TopicEntry, pool_tx: mpsc::Sender<DispatchJob>) {
        // Mark the loop alive before the task ever polls, so a concurrent
        // subscribe cannot spawn a second loop for the same topic.
        entry.state.set(LoopState::Starting);
        let consumer = TopicConsumer {
            topic: topic.to_string(),
            store: Arc::clone(&self.store),
            handlers: Arc::clone(&entry.handlers),
            pool_tx,
            stop_rx: entry.stop_tx.subscribe(),
            state: Arc::clone(&entry.state),
            metrics: Arc::clone(&self.metrics),
            error_cb: Arc::clone(&self.error_cb),
            settings: self.consumer_settings(),
        };
        entry.task = Some(tokio::spawn(consumer.run()));
    }
}
