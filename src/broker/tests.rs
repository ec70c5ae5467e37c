use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use crate::broker::center::MessageCenter;
use crate::broker::consumer::LoopState;
use crate::broker::dispatch::{HandlerError, MessageHandler, handler_fn};
use crate::broker::message::Message;
use crate::config::BrokerSettings;
use crate::store::{MemoryStore, MessageStore, StoreError};
use crate::utils::error::{CenterError, PublishError, TopicLoopFailed};

#[derive(Clone)]
struct CountingHandler {
    seen: Arc<Mutex<Vec<Message>>>,
}

impl CountingHandler {
    fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn messages(&self) -> Vec<Message> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for CountingHandler {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(message);
        Ok(())
    }
}

struct FailingHandler;

#[async_trait]
impl MessageHandler for FailingHandler {
    async fn handle(&self, _message: Message) -> Result<(), HandlerError> {
        Err("boom".into())
    }
}

struct PanickingHandler;

#[async_trait]
impl MessageHandler for PanickingHandler {
    async fn handle(&self, _message: Message) -> Result<(), HandlerError> {
        panic!("handler blew up");
    }
}

/// Store stub whose reads always fail; used to drive the retry path.
struct FailingStore;

#[async_trait]
impl MessageStore for FailingStore {
    async fn write(
        &self,
        _topic: &str,
        _payload: &[u8],
        _ttl: Option<Duration>,
    ) -> Result<String, StoreError> {
        Err(StoreError::unavailable("injected failure"))
    }

    async fn read_blocking(
        &self,
        _topic: &str,
        _timeout: Duration,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::unavailable("injected failure"))
    }

    async fn ping(&self) -> bool {
        true
    }
}

/// Store stub that never becomes reachable; used to drive startup failure.
struct DeadStore;

#[async_trait]
impl MessageStore for DeadStore {
    async fn write(
        &self,
        _topic: &str,
        _payload: &[u8],
        _ttl: Option<Duration>,
    ) -> Result<String, StoreError> {
        Err(StoreError::unavailable("store is down"))
    }

    async fn read_blocking(
        &self,
        _topic: &str,
        _timeout: Duration,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::unavailable("store is down"))
    }

    async fn ping(&self) -> bool {
        false
    }
}

fn test_settings(worker_pool_size: usize) -> BrokerSettings {
    BrokerSettings {
        worker_pool_size,
        default_ttl_secs: None,
        poll_timeout_ms: 50,
        startup_timeout_ms: 1000,
        max_read_retries: 3,
        retry_backoff_ms: 10,
        retry_backoff_ceiling_ms: 40,
        shutdown_grace_ms: 1000,
    }
}

async fn started_center() -> (Arc<MessageCenter>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let center = Arc::new(MessageCenter::new(test_settings(2), store.clone()));
    center.start().await.expect("center should start");
    (center, store)
}

async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[test]
fn message_with_ttl_expires_after_deadline() {
    let message = Message::new("orders", b"order-123".to_vec(), Some(Duration::from_secs(60)));
    let expires_at = message.expires_at.expect("ttl sets a deadline");
    assert_eq!((expires_at - message.created_at).num_seconds(), 60);
    assert!(!message.is_expired(message.created_at));
    assert!(message.is_expired(expires_at));
}

#[test]
fn message_with_zero_ttl_is_born_expired() {
    let message = Message::new("orders", b"late".to_vec(), Some(Duration::ZERO));
    assert!(message.is_expired(Utc::now()));
}

#[test]
fn permanent_message_never_expires() {
    let message = Message::new("audit", b"entry".to_vec(), None);
    assert!(message.is_permanent());
    assert!(!message.is_expired(chrono::DateTime::<Utc>::MAX_UTC));
}

#[test]
fn envelope_survives_the_wire() {
    let message = Message::new("orders", b"order-123".to_vec(), Some(Duration::from_secs(5)));
    let raw = message.to_bytes().unwrap();
    let decoded = Message::from_bytes(&raw).unwrap();
    assert_eq!(decoded, message);
}

#[test]
fn garbage_does_not_decode() {
    assert!(Message::from_bytes(b"not an envelope").is_err());
}

#[tokio::test]
async fn scenario_orders_delivery() {
    let (center, _store) = started_center().await;
    let handler = CountingHandler::new();
    center.subscribe("orders", handler.clone()).unwrap();

    center
        .publish_with_ttl("orders", "order-123", Duration::from_secs(60))
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || handler.count() == 1).await);
    let received = handler.messages().remove(0);
    assert_eq!(received.content, b"order-123");
    let expires_at = received.expires_at.expect("ttl publish sets a deadline");
    assert_eq!((expires_at - received.created_at).num_seconds(), 60);

    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn every_registered_handler_sees_each_message() {
    let (center, _store) = started_center().await;
    let first = CountingHandler::new();
    let second = CountingHandler::new();
    center.subscribe("orders", first.clone()).unwrap();
    center.subscribe("orders", second.clone()).unwrap();

    center.publish_permanent("orders", "m1").await.unwrap();
    center.publish_permanent("orders", "m2").await.unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || {
            first.count() == 2 && second.count() == 2
        })
        .await
    );

    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn duplicate_registration_is_invoked_twice() {
    let (center, _store) = started_center().await;
    let handler = CountingHandler::new();
    center.subscribe("orders", handler.clone()).unwrap();
    center.subscribe("orders", handler.clone()).unwrap();

    center.publish_permanent("orders", "m1").await.unwrap();

    assert!(wait_until(Duration::from_secs(2), || handler.count() == 2).await);

    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn zero_ttl_message_is_never_delivered() {
    let (center, _store) = started_center().await;
    let handler = CountingHandler::new();
    center.subscribe("orders", handler.clone()).unwrap();

    center
        .publish_with_ttl("orders", "too late", Duration::ZERO)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(handler.count(), 0);

    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn expired_message_is_counted_as_dropped() {
    let (center, store) = started_center().await;
    let handler = CountingHandler::new();
    center.subscribe("orders", handler.clone()).unwrap();

    // Write a born-expired envelope straight into the store so the backend
    // cannot evict it first; the loop must enforce expiry itself.
    let expired = Message::new("orders", b"late".to_vec(), Some(Duration::ZERO));
    store
        .write("orders", &expired.to_bytes().unwrap(), None)
        .await
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || {
            center.metrics().expired_dropped == 1
        })
        .await
    );
    assert_eq!(handler.count(), 0);

    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn poison_message_is_dropped_not_requeued() {
    let (center, store) = started_center().await;
    let handler = CountingHandler::new();
    center.subscribe("orders", handler.clone()).unwrap();

    store.write("orders", b"not json", None).await.unwrap();
    center.publish_permanent("orders", "good").await.unwrap();

    assert!(wait_until(Duration::from_secs(2), || handler.count() == 1).await);
    assert_eq!(center.metrics().poison_dropped, 1);

    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn failing_handler_does_not_starve_the_healthy_one() {
    let (center, _store) = started_center().await;
    let healthy = CountingHandler::new();
    center.subscribe("orders", FailingHandler).unwrap();
    center.subscribe("orders", healthy.clone()).unwrap();

    for i in 0..3 {
        center
            .publish_permanent("orders", format!("m{i}"))
            .await
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || healthy.count() == 3).await);
    assert_eq!(center.metrics().handler_failures, 3);
    assert_eq!(center.topic_state("orders"), Some(LoopState::Running));

    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn panicking_handler_is_contained() {
    let (center, _store) = started_center().await;
    let healthy = CountingHandler::new();
    center.subscribe("orders", PanickingHandler).unwrap();
    center.subscribe("orders", healthy.clone()).unwrap();

    center.publish_permanent("orders", "m1").await.unwrap();
    center.publish_permanent("orders", "m2").await.unwrap();

    assert!(wait_until(Duration::from_secs(2), || healthy.count() == 2).await);
    assert_eq!(center.metrics().handler_failures, 2);

    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn same_topic_single_handler_is_fifo() {
    // Pool of one worker so dispatch order is observable end to end.
    let store = Arc::new(MemoryStore::new());
    let center = Arc::new(MessageCenter::new(test_settings(1), store));
    center.start().await.unwrap();

    let handler = CountingHandler::new();
    center.subscribe("orders", handler.clone()).unwrap();

    for i in 0..5 {
        center
            .publish_permanent("orders", format!("m{i}"))
            .await
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || handler.count() == 5).await);
    let contents: Vec<Vec<u8>> = handler
        .messages()
        .into_iter()
        .map(|message| message.content)
        .collect();
    let expected: Vec<Vec<u8>> = (0..5).map(|i| format!("m{i}").into_bytes()).collect();
    assert_eq!(contents, expected);

    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn backlog_is_delivered_to_first_subscriber() {
    // Queue semantics: a message published while nobody is subscribed
    // stays in the store and reaches the first loop that starts.
    let (center, _store) = started_center().await;
    center.publish_permanent("audit", "early entry").await.unwrap();

    let handler = CountingHandler::new();
    center.subscribe("audit", handler.clone()).unwrap();

    assert!(wait_until(Duration::from_secs(2), || handler.count() == 1).await);
    assert_eq!(handler.messages()[0].content, b"early entry");

    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn subscription_before_start_begins_consuming_on_start() {
    let store = Arc::new(MemoryStore::new());
    let center = Arc::new(MessageCenter::new(test_settings(2), store));
    let handler = CountingHandler::new();
    center.subscribe("orders", handler.clone()).unwrap();
    assert_eq!(center.topic_state("orders"), Some(LoopState::Stopped));

    center.start().await.unwrap();
    center.publish_permanent("orders", "m1").await.unwrap();

    assert!(wait_until(Duration::from_secs(2), || handler.count() == 1).await);

    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn unsubscribing_last_handler_tears_the_loop_down() {
    let (center, store) = started_center().await;
    let handler = CountingHandler::new();
    let handle = center.subscribe("orders", handler.clone()).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            center.topic_state("orders") == Some(LoopState::Running)
        })
        .await
    );

    center.unsubscribe(&handle);
    assert_eq!(center.topic_state("orders"), None);

    // Give the loop ample time to observe the stop signal, then verify a
    // new message is left in the store untouched.
    tokio::time::sleep(Duration::from_millis(250)).await;
    center.publish_permanent("orders", "m1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(handler.count(), 0);
    let leftover = store
        .read_blocking("orders", Duration::from_millis(100))
        .await
        .unwrap();
    assert!(leftover.is_some(), "no loop should have consumed the message");

    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let (center, _store) = started_center().await;
    let handler = CountingHandler::new();
    center.subscribe("orders", handler).unwrap();

    center.shutdown(Duration::from_secs(1)).await;
    center.shutdown(Duration::from_secs(1)).await;

    assert!(matches!(
        center.subscribe("orders", CountingHandler::new()),
        Err(CenterError::ShutDown)
    ));
}

#[tokio::test]
async fn shutdown_drains_in_flight_dispatches() {
    let (center, _store) = started_center().await;
    let done = Arc::new(Mutex::new(0u32));
    let done_in_handler = Arc::clone(&done);
    center
        .subscribe(
            "orders",
            handler_fn(move |_message| {
                let done = Arc::clone(&done_in_handler);
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    *done.lock().unwrap() += 1;
                    Ok(())
                }
            }),
        )
        .unwrap();

    center.publish_permanent("orders", "slow").await.unwrap();
    // Let the loop hand the job to the pool before shutting down.
    tokio::time::sleep(Duration::from_millis(60)).await;

    center.shutdown(Duration::from_secs(2)).await;
    assert_eq!(*done.lock().unwrap(), 1);
}

#[tokio::test]
async fn exhausted_retries_surface_topic_loop_failed() {
    let center = Arc::new(MessageCenter::new(test_settings(2), Arc::new(FailingStore)));
    let events: Arc<Mutex<Vec<TopicLoopFailed>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    center.on_topic_error(move |event| sink.lock().unwrap().push(event));

    center.start().await.unwrap();
    let began = Instant::now();
    center.subscribe("orders", CountingHandler::new()).unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || !events.lock().unwrap().is_empty()).await
    );
    let elapsed = began.elapsed();
    // 3 attempts with 10ms/20ms backoffs: well under a second even on a
    // loaded machine.
    assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");

    let event = events.lock().unwrap()[0].clone();
    assert_eq!(event.topic, "orders");
    assert!(event.attempts <= 3);
    assert_eq!(center.metrics().loop_failures, 1);
    assert_eq!(center.topic_state("orders"), Some(LoopState::Stopped));

    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn resubscribing_a_failed_topic_restarts_its_loop() {
    let center = Arc::new(MessageCenter::new(test_settings(2), Arc::new(FailingStore)));
    let events: Arc<Mutex<Vec<TopicLoopFailed>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    center.on_topic_error(move |event| sink.lock().unwrap().push(event));

    center.start().await.unwrap();
    center.subscribe("orders", CountingHandler::new()).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || events.lock().unwrap().len() == 1).await
    );

    // A fresh subscribe respawns the loop, which fails again against the
    // same broken store: the second event proves the restart happened.
    center.subscribe("orders", CountingHandler::new()).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || events.lock().unwrap().len() == 2).await
    );

    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn start_fails_fatally_when_store_stays_unreachable() {
    let mut settings = test_settings(2);
    settings.startup_timeout_ms = 200;
    let center = MessageCenter::new(settings, Arc::new(DeadStore));

    match center.start().await {
        Err(CenterError::StartupTimeout { waited_ms }) => assert_eq!(waited_ms, 200),
        other => panic!("expected startup timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn publish_rejects_empty_topic() {
    let (center, _store) = started_center().await;
    assert!(matches!(
        center.publish_permanent("", "payload").await,
        Err(PublishError::EmptyTopic)
    ));
    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn subscribe_rejects_empty_topic() {
    let (center, _store) = started_center().await;
    assert!(matches!(
        center.subscribe("", CountingHandler::new()),
        Err(CenterError::EmptyTopic)
    ));
    center.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn default_ttl_from_settings_is_applied_by_publish() {
    let store = Arc::new(MemoryStore::new());
    let mut settings = test_settings(2);
    settings.default_ttl_secs = Some(60);
    let center = Arc::new(MessageCenter::new(settings, store.clone()));
    center.start().await.unwrap();

    let handler = CountingHandler::new();
    center.subscribe("orders", handler.clone()).unwrap();
    center.publish("orders", "m1").await.unwrap();

    assert!(wait_until(Duration::from_secs(2), || handler.count() == 1).await);
    let received = handler.messages().remove(0);
    let expires_at = received.expires_at.expect("default ttl applies");
    assert_eq!((expires_at - received.created_at).num_seconds(), 60);

    center.shutdown(Duration::from_secs(1)).await;
}
