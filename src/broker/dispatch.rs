use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::message::Message;
use super::metrics::CenterMetrics;
use super::topic::HandlerId;

/// Error type handlers may return. The value is only ever logged; it is
/// never propagated back into the consumer loop.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A subscriber callback for one topic.
///
/// Handlers receive the deserialized message and their outcome is
/// fire-and-forget: an `Err` (or a panic) is caught, logged with the topic
/// and message id, and counted. It does not requeue the message, does not
/// stop the other handlers registered for the topic, and does not stop the
/// consumer loop.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

/// Adapts a closure returning a future into a [`MessageHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        (self.0)(message).await
    }
}

/// Wraps an async closure so it can be registered with
/// [`MessageCenter::subscribe`](super::MessageCenter::subscribe).
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler(f)
}

/// One message together with the handlers registered for its topic at the
/// moment it was read.
pub(crate) struct DispatchJob {
    pub message: Message,
    pub handlers: Vec<(HandlerId, Arc<dyn MessageHandler>)>,
}

/// Bounded shared worker pool.
///
/// Topic loops submit [`DispatchJob`]s onto a bounded queue; a fixed number
/// of worker tasks take jobs off it and run the handlers. A slow handler
/// occupies one worker, never the reader that produced the job. When the
/// queue is full, submission suspends, which is the broker's backpressure
/// point.
pub(crate) struct WorkerPool {
    tx: mpsc::Sender<DispatchJob>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(size: usize, metrics: Arc<CenterMetrics>) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<DispatchJob>(size * 2);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..size)
            .map(|_| {
                let rx = Arc::clone(&rx);
                let metrics = Arc::clone(&metrics);
                tokio::spawn(async move {
                    loop {
                        // The receiver lock is only held while waiting for
                        // the next job, never while running handlers.
                        let job = { rx.lock().await.recv().await };
                        match job {
                            Some(job) => run_job(job, &metrics).await,
                            None => break,
                        }
                    }
                })
            })
            .collect();

        Self { tx, workers }
    }

    pub fn sender(&self) -> mpsc::Sender<DispatchJob> {
        self.tx.clone()
    }

    /// Closes the queue and waits up to `grace` for the workers to drain
    /// it. Workers still busy after the deadline are abandoned, not
    /// force-killed.
    pub async fn close(self, grace: Duration) {
        drop(self.tx);
        let drained = futures::future::join_all(self.workers);
        if tokio::time::timeout(grace, drained).await.is_err() {
            warn!("dispatch workers still busy after grace period, abandoning them");
        }
    }
}

/// Runs every handler registered for the job's topic, in registration
/// order, each within its own isolated call frame.
async fn run_job(job: DispatchJob, metrics: &CenterMetrics) {
    for (handler_id, handler) in &job.handlers {
        let outcome = AssertUnwindSafe(handler.handle(job.message.clone()))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                metrics.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    topic = %job.message.topic,
                    message_id = %job.message.id,
                    handler_id = %handler_id,
                    "handler failed: {}",
                    err
                );
            }
            Err(_) => {
                metrics.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    topic = %job.message.topic,
                    message_id = %job.message.id,
                    handler_id = %handler_id,
                    "handler panicked"
                );
            }
        }
    }
    metrics.dispatched.fetch_add(1, Ordering::Relaxed);
}
