//! The `broker` module is the message center itself: the message envelope,
//! the producer, the per-topic consumer loops, the shared dispatch pool,
//! and the [`MessageCenter`] coordinator that ties them together.

pub mod center;
pub mod consumer;
pub mod dispatch;
pub mod message;
pub mod metrics;
pub mod producer;
pub mod topic;

pub use center::MessageCenter;
pub use consumer::LoopState;
pub use dispatch::{FnHandler, HandlerError, MessageHandler, handler_fn};
pub use message::Message;
pub use metrics::MetricsSnapshot;
pub use producer::MessageProducer;
pub use topic::SubscriptionHandle;

#[cfg(test)]
mod tests;
