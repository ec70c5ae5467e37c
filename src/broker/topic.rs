use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::consumer::{LoopState, StateCell};
use super::dispatch::MessageHandler;

pub type HandlerId = Uuid;

/// Handler list for one topic. Insertion order is invocation order, and
/// registering the same handler twice means it runs twice per message.
pub(crate) type SharedHandlers = Arc<RwLock<Vec<(HandlerId, Arc<dyn MessageHandler>)>>>;

/// Identifies a single handler registration on a topic. Returned by
/// [`MessageCenter::subscribe`](super::MessageCenter::subscribe) and
/// consumed by `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub topic: String,
    pub(crate) handler_id: HandlerId,
}

/// Registry entry for one subscribed topic: its handlers, the stop signal
/// and observable state for its consumer loop, and the loop task itself.
pub(crate) struct TopicEntry {
    pub handlers: SharedHandlers,
    pub stop_tx: watch::Sender<bool>,
    pub state: Arc<StateCell>,
    pub task: Option<JoinHandle<()>>,
}

impl TopicEntry {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
            stop_tx,
            state: Arc::new(StateCell::new()),
            task: None,
        }
    }

    /// Whether the topic needs a (re)spawned consumer loop: either none was
    /// ever started, or the previous one has exited (e.g. after exhausting
    /// its retries). The state cell is set to `Starting` synchronously when
    /// a loop is spawned, so this cannot double-spawn.
    pub fn needs_spawn(&self) -> bool {
        self.state.get() == LoopState::Stopped
    }

    /// Replaces the stop channel ahead of a respawn so the fresh loop does
    /// not observe a stop signal meant for its predecessor.
    pub fn reset_stop_channel(&mut self) {
        let (stop_tx, _) = watch::channel(false);
        self.stop_tx = stop_tx;
    }
}
