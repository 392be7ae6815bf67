//! Ordered-log queue backend (default).
//!
//! Entries live in an async [`RetryLog`] engine keyed on timestamp and
//! drain in that order. A replay burst pops one entry at a time, resending
//! it with a synthesized retry-context header; successes keep the burst
//! draining, the first failure reconciles (drop or re-enqueue) and stops.

use crate::configs::PersistenceRetryConfig;
use crate::core::error::StoreError;
use crate::queue::throttle::NotifyThrottle;
use crate::queue::{ClearListener, ClearListeners, ListenerId, NotifyConfig, PersistQueue};
use crate::store::{RetryEntry, RetryLog};
use crate::transport::headers::build_send_headers;
use crate::transport::{Transport, TransportResult};
use crate::loggers::Logger;
use crate::{debug, error};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Substitute for an idle-callback host primitive: a short pause before
/// each drain step.
const IDLE_FALLBACK_MS: u64 = 10;

pub struct LogQueue {
    inner: Arc<LogQueueInner>,
}

struct LogQueueInner {
    store: Arc<dyn RetryLog>,
    transport: Transport,
    logger: Logger,
    attempt_limit: u32,
    header_name: Option<String>,
    use_idle: bool,
    throttle: NotifyThrottle,
    draining: AtomicBool,
    disabled: AtomicBool,
    listeners: ClearListeners,
}

impl LogQueue {
    /// `config.header_name` must already carry the inherited in-memory
    /// name when persistence did not set its own; the factory resolves
    /// that before construction.
    pub fn new(
        store: Arc<dyn RetryLog>,
        config: &PersistenceRetryConfig,
        transport: Transport,
        logger: Logger,
    ) -> Self {
        Self {
            inner: Arc::new(LogQueueInner {
                store,
                transport,
                logger,
                attempt_limit: config.attempt_limit,
                header_name: config.header_name.clone(),
                use_idle: config.use_idle,
                throttle: NotifyThrottle::new(Duration::from_millis(config.throttle_wait_ms)),
                draining: AtomicBool::new(false),
                disabled: AtomicBool::new(false),
                listeners: ClearListeners::new(),
            }),
        }
    }
}

#[async_trait]
impl PersistQueue for LogQueue {
    async fn push_to_queue(&self, entry: RetryEntry) {
        let inner = &self.inner;
        if inner.disabled.load(Ordering::SeqCst) {
            return;
        }

        debug!(
            inner.logger,
            "Persisting entry",
            "url" => &entry.url,
            "attemptCount" => entry.attempt_count,
            "statusCode" => entry.status_code
        );

        match inner.store.append(entry).await {
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
            // A burst is already running; give the window back so the next
            // notify is not spuriously throttled.
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
        if let Err(e) = inner.store.clear().await {
            inner.latch_disabled(&e);
        }
    }

    async fn peek_queue(&self, count: usize) -> Vec<RetryEntry> {
        let inner = &self.inner;
        if inner.disabled.load(Ordering::SeqCst) {
            return Vec::new();
        }
        match inner.store.peek(count).await {
            Ok(entries) => entries,
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
        match inner.store.peek_back(count).await {
            Ok(entries) => entries,
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

impl LogQueueInner {
    fn latch_disabled(&self, err: &StoreError) {
        if !self.disabled.swap(true, Ordering::SeqCst) {
            error!(
                self.logger,
                "Durable store failed, persistence disabled for process lifetime",
                "error" => err.to_string()
            );
        }
    }

    async fn pause(&self) {
        if self.use_idle {
            tokio::time::sleep(Duration::from_millis(IDLE_FALLBACK_MS)).await;
        } else {
            tokio::task::yield_now().await;
        }
    }

    /// One replay burst: pop-send-reconcile until the store runs dry or a
    /// failure stops the loop.
    async fn drain(&self, config: NotifyConfig) {
        loop {
            self.pause().await;

            let entry = match self.store.shift().await {
                Ok(Some(entry)) => entry,
                Ok(None) => return,
                Err(e) => {
                    self.latch_disabled(&e);
                    return;
                }
            };

            let headers = build_send_headers(
                entry.headers.as_ref(),
                self.header_name.as_deref(),
                entry.attempt_count,
                entry.status_code,
            );
            let outcome = self.transport.post(&entry.url, &entry.body, headers).await;

            let replayable = match outcome {
                TransportResult::Success { status_code } => {
                    debug!(
                        self.logger,
                        "Replayed entry delivered",
                        "url" => &entry.url,
                        "statusCode" => status_code
                    );
                    continue;
                }
                TransportResult::Unknown => {
                    debug!(self.logger, "Replayed entry handed off", "url" => &entry.url);
                    continue;
                }
                TransportResult::Response { status_code, .. } => {
                    config.allowed_persist_retry_status_codes.contains(&status_code)
                }
                TransportResult::Network { .. } => true,
            };

            // Entry is already popped; dropping means simply not putting
            // it back.
            if entry.attempt_count + 1 > self.attempt_limit {
                debug!(
                    self.logger,
                    "Replay attempts exhausted, dropping entry",
                    "url" => &entry.url,
                    "attemptCount" => entry.attempt_count
                );
                return;
            }

            if !replayable {
                debug!(
                    self.logger,
                    "Replay failure not re-enqueueable, dropping entry",
                    "url" => &entry.url,
                    "statusCode" => entry.status_code
                );
                return;
            }

            let url = entry.url.clone();
            let bumped = RetryEntry { attempt_count: entry.attempt_count + 1, ..entry };
            match self.store.append_unless_clearing(bumped).await {
                Ok(true) => self.throttle.reset(),
                Ok(false) => {
                    debug!(self.logger, "Re-enqueue skipped, clear in progress", "url" => &url);
                }
                Err(e) => self.latch_disabled(&e),
            }
            return;
        }
    }
}
