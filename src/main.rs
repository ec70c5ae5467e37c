//! Demo binary: wires a sled-backed message center together the way an
//! application's composition root would, subscribes a logging handler, and
//! runs until ctrl-c.

use std::sync::Arc;
use tracing::{error, info};

use courier::broker::{MessageCenter, handler_fn};
use courier::config::load_config;
use courier::store::SledStore;
use courier::utils::logging;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    logging::init("info");

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(err) => {
            error!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let store = match SledStore::open(&settings.store.path, settings.store.max_messages_per_topic)
    {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!("failed to open store at {}: {err}", settings.store.path);
            std::process::exit(1);
        }
    };

    let center = Arc::new(MessageCenter::new(settings.broker.clone(), store));
    if let Err(err) = center.start().await {
        error!("failed to start message center: {err}");
        std::process::exit(1);
    }

    center.on_topic_error(|event| {
        error!(
            "topic '{}' stopped consuming after {} attempts: {}",
            event.topic, event.attempts, event.reason
        );
    });

    let subscription = center
        .subscribe(
            "events",
            handler_fn(|message| async move {
                info!(
                    topic = %message.topic,
                    message_id = %message.id,
                    "received {} bytes",
                    message.content.len()
                );
                Ok(())
            }),
        )
        .expect("subscribe on a freshly started center");

    if let Err(err) = center.publish("events", "courier is up").await {
        error!("publish failed: {err}");
    }

    info!("running; press ctrl-c to stop");
    let _ = tokio::signal::ctrl_c().await;

    center.unsubscribe(&subscription);
    center.shutdown(settings.broker.shutdown_grace()).await;
}
