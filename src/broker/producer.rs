use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::store::MessageStore;
use crate::utils::error::PublishError;
use super::message::Message;

/// Publishes messages to topics through the store adapter.
///
/// The producer is deliberately retry-free: a store failure comes back to
/// the caller as a [`PublishError`] and the caller decides whether to try
/// again.
pub struct MessageProducer {
    store: Arc<dyn MessageStore>,
}

impl MessageProducer {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Wraps `content` in an envelope stamped `created_at = now` and writes
    /// it to the store. With a `ttl` the envelope expires at `now + ttl`
    /// and the backend entry is scheduled for eviction at the same moment;
    /// without one the message is permanent.
    ///
    /// Returns the generated message id.
    pub async fn publish(
        &self,
        topic: &str,
        content: impl Into<Vec<u8>>,
        ttl: Option<Duration>,
    ) -> Result<Uuid, PublishError> {
        if topic.is_empty() {
            return Err(PublishError::EmptyTopic);
        }
        let message = Message::new(topic, content.into(), ttl);
        let raw = message.to_bytes()?;
        self.store.write(topic, &raw, ttl).await?;
        debug!(topic, message_id = %message.id, "published message");
        Ok(message.id)
    }

    /// Publishes a message that never expires. Permanent messages are never
    /// evicted by the backend; cleaning them up is an operator concern.
    pub async fn publish_permanent(
        &self,
        topic: &str,
        content: impl Into<Vec<u8>>,
    ) -> Result<Uuid, PublishError> {
        self.publish(topic, content, None).await
    }
}
