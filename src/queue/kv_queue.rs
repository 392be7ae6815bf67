//! Synchronous-kv queue backend.
//!
//! The whole queue is one JSON array in a single [`StringStore`] slot.
//! Read-modify-write cycles are serialized through the advisory
//! [`KeyedMutex`] on the storage key, because concurrent contexts sharing
//! the store would otherwise lose updates.
//!
//! Policy divergence from the ordered-log backend, kept on purpose:
//! exceeding `max_number` wipes the whole slot instead of trimming the
//! oldest batch. Callers choosing this backend trade finer eviction for a
//! store with no ordered cursor.

use crate::configs::PersistenceRetryConfig;
use crate::core::error::StoreError;
use crate::queue::throttle::NotifyThrottle;
use crate::queue::{ClearListener, ClearListeners, ListenerId, NotifyConfig, PersistQueue};
use crate::store::memory::KeyedMutex;
use crate::store::{RetryEntry, StringStore};
use crate::transport::headers::build_send_headers;
use crate::transport::{Transport, TransportResult};
use crate::loggers::Logger;
use crate::{debug, error, warn};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const IDLE_FALLBACK_MS: u64 = 10;

pub struct KvQueue {
    inner: Arc<KvQueueInner>,
}

struct KvQueueInner {
    store: Arc<dyn StringStore>,
    locks: Arc<KeyedMutex>,
    key: String,
    transport: Transport,
    logger: Logger,
    max_number: usize,
    attempt_limit: u32,
    header_name: Option<String>,
    use_idle: bool,
    throttle: NotifyThrottle,
    draining: AtomicBool,
    disabled: AtomicBool,
    clearing: AtomicBool,
    listeners: ClearListeners,
}

impl KvQueue {
    /// As with the log backend, `config.header_name` must already be
    /// resolved against the in-memory fallback.
    pub fn new(
        store: Arc<dyn StringStore>,
        locks: Arc<KeyedMutex>,
        config: &PersistenceRetryConfig,
        transport: Transport,
        logger: Logger,
    ) -> Self {
        Self {
            inner: Arc::new(KvQueueInner {
                store,
                locks,
                key: config.store_name.clone(),
                transport,
                logger,
                max_number: config.max_number,
                attempt_limit: config.attempt_limit,
                header_name: config.header_name.clone(),
                use_idle: config.use_idle,
                throttle: NotifyThrottle::new(Duration::from_millis(config.throttle_wait_ms)),
                draining: AtomicBool::new(false),
                disabled: AtomicBool::new(false),
                clearing: AtomicBool::new(false),
                listeners: ClearListeners::new(),
            }),
        }
    }
}

#[async_trait]
impl PersistQueue for KvQueue {
    async fn push_to_queue(&self, entry: RetryEntry) {
        let inner = &self.inner;
        if inner.disabled.load(Ordering::SeqCst) {
            return;
        }

        let _guard = inner.locks.lock(&inner.key).await;
        let mut entries = match inner.read_slot() {
            Ok(entries) => entries,
            Err(e) => {
                inner.latch_disabled(&e);
                return;
            }
        };

        entries.push(entry);
        let result = if entries.len() > inner.max_number {
            // Overflow wipes the slot outright.
            warn!(
                inner.logger,
                "Kv slot overflow, clearing persisted entries",
                "key" => &inner.key,
                "maxNumber" => inner.max_number
            );
            inner.store.remove_item(&inner.key)
        } else {
            inner.write_slot(&entries)
        };

        match result {
            Ok(()) => inner.throttle.reset(),
            Err(e) => inner.latch_disabled(&e),
        }
    }

    async fn notify_queue(&self, config: NotifyConfig) {
        let inner = self.inner.clone();
        if inner.disabled.load(Ordering::SeqCst) {
            return;
        }
        if !inner.throttle.try_acquire() {
            return;
        }
        if inner.draining.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            inner.throttle.reset();
            return;
        }

        tokio::spawn(async move {
            inner.drain(config).await;
            inner.draining.store(false, Ordering::SeqCst);
        });
    }

    async fn clear_queue(&self) {
        let inner = &self.inner;
        if inner.disabled.load(Ordering::SeqCst) {
            return;
        }

        inner.listeners.invoke_all();
        inner.clearing.store(true, Ordering::SeqCst);
        let _guard = inner.locks.lock(&inner.key).await;
        if let Err(e) = inner.store.remove_item(&inner.key) {
            inner.latch_disabled(&e);
        }
        inner.clearing.store(false, Ordering::SeqCst);
    }

    async fn peek_queue(&self, count: usize) -> Vec<RetryEntry> {
        let inner = &self.inner;
        if inner.disabled.load(Ordering::SeqCst) {
            return Vec::new();
        }
        let _guard = inner.locks.lock(&inner.key).await;
        match inner.read_slot() {
            Ok(mut entries) => {
                entries.truncate(count);
                entries
            }
            Err(e) => {
                inner.latch_disabled(&e);
                Vec::new()
            }
        }
    }

    async fn peek_back_queue(&self, count: usize) -> Vec<RetryEntry> {
        let inner = &self.inner;
        if inner.disabled.load(Ordering::SeqCst) {
            return Vec::new();
        }
        let _guard = inner.locks.lock(&inner.key).await;
        match inner.read_slot() {
            Ok(entries) => entries.into_iter().rev().take(count).collect(),
            Err(e) => {
                inner.latch_disabled(&e);
                Vec::new()
            }
        }
    }

    fn on_clear(&self, listener: ClearListener) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    fn remove_on_clear(&self, id: ListenerId) {
        self.inner.listeners.remove(id);
    }
}

impl KvQueueInner {
    fn latch_disabled(&self, err: &StoreError) {
        if !self.disabled.swap(true, Ordering::SeqCst) {
            error!(
                self.logger,
                "String store failed, persistence disabled for process lifetime",
                "error" => err.to_string()
            );
        }
    }

    /// Caller must hold the key guard.
    fn read_slot(&self) -> Result<Vec<RetryEntry>, StoreError> {
        let Some(raw) = self.store.get_item(&self.key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                // A corrupt slot is unrecoverable data, not a dead store.
                warn!(self.logger, "Discarding corrupt kv slot", "key" => &self.key, "error" => e.to_string());
                self.store.remove_item(&self.key)?;
                Ok(Vec::new())
            }
        }
    }

    /// Caller must hold the key guard.
    fn write_slot(&self, entries: &[RetryEntry]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(entries).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.set_item(&self.key, &raw)
    }

    async fn pause(&self) {
        if self.use_idle {
            tokio::time::sleep(Duration::from_millis(IDLE_FALLBACK_MS)).await;
        } else {
            tokio::task::yield_now().await;
        }
    }

    /// One replay burst over the whole popped array.
    ///
    /// Failed-but-retryable entries (bumped) and the unprocessed tail are
    /// prepended back in front of anything pushed concurrently while the
    /// burst ran.
    async fn drain(&self, config: NotifyConfig) {
        self.pause().await;

        let popped = {
            let _guard = self.locks.lock(&self.key).await;
            let entries = match self.read_slot() {
                Ok(entries) => entries,
                Err(e) => {
                    self.latch_disabled(&e);
                    return;
                }
            };
            if entries.is_empty() {
                return;
            }
            if let Err(e) = self.store.remove_item(&self.key) {
                self.latch_disabled(&e);
                return;
            }
            entries
        };

        let mut retained: Vec<RetryEntry> = Vec::new();
        let mut index = 0;
        while index < popped.len() {
            if index > 0 {
                self.pause().await;
            }
            let entry = &popped[index];

            let headers = build_send_headers(
                entry.headers.as_ref(),
                self.header_name.as_deref(),
                entry.attempt_count,
                entry.status_code,
            );
            let outcome = self.transport.post(&entry.url, &entry.body, headers).await;

            let replayable = match outcome {
                TransportResult::Success { .. } | TransportResult::Unknown => {
                    index += 1;
                    continue;
                }
                TransportResult::Response { status_code, .. } => {
                    config.allowed_persist_retry_status_codes.contains(&status_code)
                }
                TransportResult::Network { .. } => true,
            };

            if replayable && entry.attempt_count + 1 <= self.attempt_limit {
                retained.push(RetryEntry { attempt_count: entry.attempt_count + 1, ..entry.clone() });
            } else {
                debug!(
                    self.logger,
                    "Dropping replayed entry",
                    "url" => &entry.url,
                    "attemptCount" => entry.attempt_count
                );
            }

            // First failure stops the burst; the unprocessed tail goes
            // back with it.
            index += 1;
            retained.extend(popped[index..].iter().cloned());
            break;
        }

        if retained.is_empty() || self.clearing.load(Ordering::SeqCst) {
            return;
        }

        let _guard = self.locks.lock(&self.key).await;
        if self.clearing.load(Ordering::SeqCst) {
            return;
        }
        let concurrent = match self.read_slot() {
            Ok(entries) => entries,
            Err(e) => {
                self.latch_disabled(&e);
                return;
            }
        };
        retained.extend(concurrent);
        if let Err(e) = self.write_slot(&retained) {
            self.latch_disabled(&e);
        }
    }
}
