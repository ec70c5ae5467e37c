use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

use super::{MessageStore, StoreError};

// Each stored value is an 8-byte big-endian expiry timestamp in epoch
// milliseconds (0 = permanent) followed by the payload bytes.
const EXPIRY_PREFIX_LEN: usize = 8;

/// Durable store backend on top of `sled`.
///
/// Every topic gets its own tree. Keys are
/// `{timestamp_millis:020}_{sequence:020}_{uuid}`: the timestamp keeps
/// iteration in publish order, the per-process sequence breaks ties within
/// a millisecond, and the uuid keeps concurrent writer processes from
/// colliding. Reads pop the oldest live entry; entries whose backend
/// expiry has passed are swept during the pop.
///
/// Blocking reads are a bounded poll: the tree is checked every
/// `poll_interval` until the caller's timeout elapses.
pub struct SledStore {
    db: sled::Db,
    max_messages_per_topic: Option<usize>,
    poll_interval: Duration,
    sequence: AtomicU64,
}

impl SledStore {
    /// Open or create the database at `path`. When
    /// `max_messages_per_topic` is set, writes beyond the cap evict the
    /// oldest entries of that topic.
    pub fn open(path: &str, max_messages_per_topic: Option<usize>) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(StoreError::unavailable)?;
        Ok(Self {
            db,
            max_messages_per_topic,
            poll_interval: Duration::from_millis(25),
            sequence: AtomicU64::new(0),
        })
    }

    fn tree(&self, topic: &str) -> Result<sled::Tree, StoreError> {
        self.db.open_tree(topic).map_err(StoreError::unavailable)
    }

    /// Removes and returns the oldest live payload, sweeping expired and
    /// malformed entries along the way.
    fn pop_live(&self, tree: &sled::Tree) -> Result<Option<Vec<u8>>, StoreError> {
        let now_millis = Utc::now().timestamp_millis();
        loop {
            let Some(first) = tree.iter().next() else {
                return Ok(None);
            };
            let (key, value) = first.map_err(StoreError::unavailable)?;
            tree.remove(&key).map_err(StoreError::unavailable)?;
            if value.len() < EXPIRY_PREFIX_LEN {
                continue;
            }
            let mut prefix = [0u8; EXPIRY_PREFIX_LEN];
            prefix.copy_from_slice(&value[..EXPIRY_PREFIX_LEN]);
            let evict_at = i64::from_be_bytes(prefix);
            if evict_at != 0 && evict_at <= now_millis {
                continue;
            }
            return Ok(Some(value[EXPIRY_PREFIX_LEN..].to_vec()));
        }
    }
}

#[async_trait]
impl MessageStore for SledStore {
    async fn write(
        &self,
        topic: &str,
        payload: &[u8],
        ttl: Option<Duration>,
    ) -> Result<String, StoreError> {
        let tree = self.tree(topic)?;
        let now_millis = Utc::now().timestamp_millis();
        let evict_at = match ttl {
            Some(ttl) => now_millis.saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64),
            None => 0,
        };

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let key = format!("{:020}_{:020}_{}", now_millis, sequence, Uuid::new_v4());
        let mut value = Vec::with_capacity(EXPIRY_PREFIX_LEN + payload.len());
        value.extend_from_slice(&evict_at.to_be_bytes());
        value.extend_from_slice(payload);
        tree.insert(key.as_bytes(), value)
            .map_err(StoreError::unavailable)?;

        if let Some(max) = self.max_messages_per_topic {
            let total = tree.len();
            if total > max {
                let excess = total - max;
                let oldest: Vec<_> = tree
                    .iter()
                    .take(excess)
                    .filter_map(|entry| entry.ok().map(|(key, _)| key))
                    .collect();
                for key in oldest {
                    let _ = tree.remove(key);
                }
            }
        }

        Ok(key)
    }

    async fn read_blocking(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let tree = self.tree(topic)?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(payload) = self.pop_live(&tree)? {
                return Ok(Some(payload));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ping(&self) -> bool {
        self.db.size_on_disk().is_ok()
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("max_messages_per_topic", &self.max_messages_per_topic)
            .finish()
    }
}
