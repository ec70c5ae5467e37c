//! # Courier
//!
//! `courier` is a topic-based publish/subscribe message center. Producers
//! wrap payloads in a small envelope and write them into a shared store;
//! one consumer loop per subscribed topic pulls them back out and fans
//! each message out to the registered handlers through a bounded worker
//! pool. Messages may carry a TTL, expired messages are dropped instead of
//! dispatched, and a failing handler never takes down its topic.
//!
//! ## Core modules
//!
//! - `broker`: the message envelope, producer, consumer loops, dispatch
//!   pool, and the [`MessageCenter`](broker::MessageCenter) coordinator.
//! - `store`: the [`MessageStore`](store::MessageStore) backend trait with
//!   in-memory and sled implementations.
//! - `config`: settings loading (file + environment) and fail-fast
//!   validation.
//! - `utils`: the error taxonomy and tracing setup.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use courier::broker::{MessageCenter, handler_fn};
//! use courier::config::BrokerSettings;
//! use courier::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let center = Arc::new(MessageCenter::new(
//!         BrokerSettings::default(),
//!         Arc::new(MemoryStore::new()),
//!     ));
//!     center.start().await?;
//!
//!     center.subscribe(
//!         "orders",
//!         handler_fn(|message| async move {
//!             println!("{} bytes on {}", message.content.len(), message.topic);
//!             Ok(())
//!         }),
//!     )?;
//!
//!     center.publish_with_ttl("orders", "order-123", Duration::from_secs(60)).await?;
//!
//!     center.shutdown(Duration::from_secs(1)).await;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod store;
pub mod utils;
