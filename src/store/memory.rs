use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use uuid::Uuid;

use super::{MessageStore, StoreError};

struct Entry {
    payload: Vec<u8>,
    // Backend-side expiry deadline; entries past it are swept at read time.
    evict_at: Option<Instant>,
}

/// In-process store backend.
///
/// Keeps one FIFO queue per topic behind a mutex and wakes blocked readers
/// through a [`Notify`] whenever something is written. Used by the test
/// suite and for single-process deployments that do not need durability.
#[derive(Default)]
pub struct MemoryStore {
    topics: Mutex<HashMap<String, VecDeque<Entry>>>,
    wakeup: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn pop_live(&self, topic: &str) -> Option<Vec<u8>> {
        let mut topics = self.topics.lock().unwrap();
        let queue = topics.get_mut(topic)?;
        let now = Instant::now();
        while let Some(entry) = queue.pop_front() {
            match entry.evict_at {
                Some(evict_at) if evict_at <= now => continue,
                _ => return Some(entry.payload),
            }
        }
        None
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn write(
        &self,
        topic: &str,
        payload: &[u8],
        ttl: Option<Duration>,
    ) -> Result<String, StoreError> {
        let key = Uuid::new_v4().to_string();
        {
            let mut topics = self.topics.lock().unwrap();
            topics.entry(topic.to_string()).or_default().push_back(Entry {
                payload: payload.to_vec(),
                evict_at: ttl.map(|ttl| Instant::now() + ttl),
            });
        }
        self.wakeup.notify_waiters();
        Ok(key)
    }

    async fn read_blocking(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut notified = std::pin::pin!(self.wakeup.notified());
            // Register for the next notification before checking the queue
            // so a write racing with the check cannot be missed.
            notified.as_mut().enable();
            if let Some(payload) = self.pop_live(topic) {
                return Ok(Some(payload));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(self.pop_live(topic));
            }
        }
    }

    async fn ping(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.topics.lock().unwrap();
        f.debug_struct("MemoryStore")
            .field("topics", &topics.len())
            .finish()
    }
}
