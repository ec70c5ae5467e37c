use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A published message as it travels through the store.
///
/// The envelope carries the topic, the caller's opaque payload, the time of
/// publication, and an optional expiry deadline. `expires_at` of `None`
/// means the message is permanent and is never expired by the broker or the
/// backend.
///
/// The envelope is serialized as a JSON document; any consumer process on
/// the same library version can decode messages written by any producer
/// process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Builds a new envelope around `content`, stamped with the current time.
    ///
    /// A `ttl` of zero produces `expires_at == created_at`, i.e. a message
    /// that is born expired and will be dropped instead of dispatched. The
    /// caller is responsible for rejecting an empty topic before building
    /// the envelope.
    pub(crate) fn new(topic: &str, content: Vec<u8>, ttl: Option<Duration>) -> Self {
        let created_at = Utc::now();
        let expires_at = ttl.map(|ttl| {
            let millis = ttl.as_millis().min(i64::MAX as u128) as i64;
            created_at
                .checked_add_signed(chrono::Duration::milliseconds(millis))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        });
        Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            content,
            created_at,
            expires_at,
        }
    }

    /// True once the expiry deadline has been reached. Permanent messages
    /// never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub(crate) fn from_bytes(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}
