//! Persistence queue contract.
//!
//! One shared trait over two backends: the ordered-log queue (default) and
//! the synchronous-kv queue. Both persist [`RetryEntry`] records, replay
//! them under a notify throttle, and latch themselves disabled on the
//! first engine failure.

use crate::store::RetryEntry;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod kv_queue;
pub mod log_queue;
pub(crate) mod throttle;

/// Per-notify replay parameters, supplied by the beacon that observed the
/// successful delivery.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Response codes that keep a replayed entry alive for another round.
    pub allowed_persist_retry_status_codes: Vec<u16>,
}

/// Handle returned by [`PersistQueue::on_clear`] for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback invoked synchronously at the start of every `clear_queue`.
pub type ClearListener = Box<dyn Fn() + Send + Sync>;

/// The shared queue contract (spec'd operation set).
#[async_trait]
pub trait PersistQueue: Send + Sync {
    /// Enqueue an entry. Swallows engine failures (latching the queue
    /// disabled) and resets the notify throttle on success.
    async fn push_to_queue(&self, entry: RetryEntry);

    /// Signal that replay may proceed. Throttled to one burst per window;
    /// a successful push re-opens the window.
    async fn notify_queue(&self, config: NotifyConfig);

    /// Invoke every clear listener synchronously, then delete all entries.
    async fn clear_queue(&self);

    /// Read-only view of the oldest `count` entries.
    async fn peek_queue(&self, count: usize) -> Vec<RetryEntry>;

    /// Read-only view of the newest `count` entries, newest first.
    async fn peek_back_queue(&self, count: usize) -> Vec<RetryEntry>;

    /// Register a clear listener.
    fn on_clear(&self, listener: ClearListener) -> ListenerId;

    /// Remove a previously registered clear listener.
    fn remove_on_clear(&self, id: ListenerId);
}

/// Unordered set of clear listeners, mutated only from the owning queue's
/// task context. Listeners only flip flags; they must not re-enter the
/// registry.
pub(crate) struct ClearListeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, ClearListener)>>,
}

impl ClearListeners {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), entries: Mutex::new(Vec::new()) }
    }

    pub fn add(&self, listener: ClearListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((id, listener));
        }
        id
    }

    pub fn remove(&self, id: ListenerId) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|(entry_id, _)| *entry_id != id);
        }
    }

    /// Call every listener, exactly once each.
    pub fn invoke_all(&self) {
        if let Ok(entries) = self.entries.lock() {
            for (_, listener) in entries.iter() {
                listener();
            }
        }
    }
}
