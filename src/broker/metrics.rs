use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the consumer loops and the dispatch pool.
#[derive(Debug, Default)]
pub(crate) struct CenterMetrics {
    pub dispatched: AtomicU64,
    pub expired_dropped: AtomicU64,
    pub poison_dropped: AtomicU64,
    pub handler_failures: AtomicU64,
    pub loop_failures: AtomicU64,
}

impl CenterMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            expired_dropped: self.expired_dropped.load(Ordering::Relaxed),
            poison_dropped: self.poison_dropped.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            loop_failures: self.loop_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the center's counters.
///
/// - `dispatched`: messages handed to the worker pool and run through their
///   handlers.
/// - `expired_dropped`: messages dropped because their expiry deadline had
///   passed by the time they were read.
/// - `poison_dropped`: messages dropped because their envelope could not be
///   decoded.
/// - `handler_failures`: individual handler invocations that returned an
///   error or panicked.
/// - `loop_failures`: topic loops that gave up after exhausting their
///   retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub dispatched: u64,
    pub expired_dropped: u64,
    pub poison_dropped: u64,
    pub handler_failures: u64,
    pub loop_failures: u64,
}
