//! Queue store interface and in-memory implementation
//!
//! The queue store is an ordered set per queue key (members scored by skill,
//! read back in ascending score order) plus a publish/subscribe channel used
//! purely as a wake-up signal for the scheduler.

use crate::error::{MatchmakingError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Stream of notification payloads from a subscribed channel
pub type Notifications = mpsc::UnboundedReceiver<String>;

/// Payload a store injects after re-establishing a lost subscription
pub const RESUBSCRIBED_EVENT: &str = "resubscribed";

/// Trait for the ordered queue store consumed by the scheduler
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert `member` into `queue` with `score`; re-inserting a member updates its score
    async fn insert(&self, queue: &str, member: &str, score: f64) -> Result<()>;

    /// Read every member of `queue` in ascending score order
    async fn range_all(&self, queue: &str) -> Result<Vec<String>>;

    /// Remove the member equal to `member`; returns whether it was present
    async fn remove(&self, queue: &str, member: &str) -> Result<bool>;

    /// Delete a whole queue
    async fn clear(&self, queue: &str) -> Result<()>;

    /// Publish a wake-up event on `channel`
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to `channel`
    async fn subscribe(&self, channel: &str) -> Result<Notifications>;
}

/// In-process queue store for tests and single-node local runs
///
/// Members with equal scores are ordered by their bytes, matching sorted-set
/// semantics of the production store.
#[derive(Debug)]
pub struct InMemoryQueueStore {
    queues: Mutex<HashMap<String, Vec<(f64, String)>>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
    available: AtomicBool,
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going down (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Simulate losing the pub/sub connection: every open subscription ends
    pub fn drop_subscribers(&self) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.clear();
        }
    }

    /// Number of members currently in `queue`
    pub fn len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .map(|queues| queues.get(queue).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MatchmakingError::queue_unavailable("in-memory store is offline").into())
        }
    }

    fn lock_queues(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<(f64, String)>>>> {
        self.queues.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire queues lock".to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert(&self, queue: &str, member: &str, score: f64) -> Result<()> {
        self.ensure_available()?;
        let mut queues = self.lock_queues()?;
        let entries = queues.entry(queue.to_string()).or_default();

        entries.retain(|(_, existing)| existing != member);
        let position = entries.partition_point(|(existing_score, existing)| {
            existing_score
                .total_cmp(&score)
                .then_with(|| existing.as_str().cmp(member))
                .is_lt()
        });
        entries.insert(position, (score, member.to_string()));
        Ok(())
    }

    async fn range_all(&self, queue: &str) -> Result<Vec<String>> {
        self.ensure_available()?;
        let queues = self.lock_queues()?;
        Ok(queues
            .get(queue)
            .map(|entries| entries.iter().map(|(_, member)| member.clone()).collect())
            .unwrap_or_default())
    }

    async fn remove(&self, queue: &str, member: &str) -> Result<bool> {
        self.ensure_available()?;
        let mut queues = self.lock_queues()?;
        let Some(entries) = queues.get_mut(queue) else {
            return Ok(false);
        };

        let before = entries.len();
        entries.retain(|(_, existing)| existing != member);
        let removed = entries.len() != before;
        if entries.is_empty() {
            queues.remove(queue);
        }
        Ok(removed)
    }

    async fn clear(&self, queue: &str) -> Result<()> {
        self.ensure_available()?;
        self.lock_queues()?.remove(queue);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.ensure_available()?;
        let mut subscribers =
            self.subscribers
                .lock()
                .map_err(|_| MatchmakingError::InternalError {
                    message: "Failed to acquire subscribers lock".to_string(),
                })?;

        if let Some(senders) = subscribers.get_mut(channel) {
            senders.retain(|sender| sender.send(payload.to_string()).is_ok());
            debug!(
                "Published '{}' on {} to {} subscribers",
                payload,
                channel,
                senders.len()
            );
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Notifications> {
        self.ensure_available()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire subscribers lock".to_string(),
            })?
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
