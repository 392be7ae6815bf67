//! Per-call send state machine.
//!
//! A [`Beacon`] owns one payload for the duration of one `beacon` call:
//! it runs the attempt loop, decides drop vs. in-memory retry vs.
//! persistence, and on any successful delivery nudges the queue to replay.

use crate::configs::{InMemoryRetryConfig, RetryDelayFn};
use crate::core::result::{ResultKind, SendResult};
use crate::loggers::Logger;
use crate::queue::{NotifyConfig, PersistQueue};
use crate::store::RetryEntry;
use crate::transport::headers::build_send_headers;
use crate::transport::{Transport, TransportResult};
use crate::{debug, info};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub mod factory;

/// Shared per-transporter state handed to every beacon call.
pub(crate) struct BeaconContext {
    pub transport: Transport,
    pub queue: Arc<dyn PersistQueue>,
    pub persistence_disabled: bool,
    pub persist_status_codes: Vec<u16>,
    pub in_memory: InMemoryRetryConfig,
    pub delay: RetryDelayFn,
    pub online: Arc<AtomicBool>,
    pub logger: Logger,
}

pub(crate) struct Beacon {
    ctx: Arc<BeaconContext>,
    url: String,
    body: String,
    /// Millisecond epoch captured at construction; becomes the durable
    /// ordering key if this payload is ever persisted.
    timestamp: i64,
}

impl Beacon {
    pub fn new(ctx: Arc<BeaconContext>, url: &str, body: &str) -> Self {
        Self {
            ctx,
            url: url.to_string(),
            body: body.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub async fn send(&self, caller_headers: Option<HashMap<String, String>>) -> SendResult {
        // A clear that begins anywhere during this call must suppress both
        // persistence and the post-success notify, or cleared data could be
        // resurrected by an in-flight attempt.
        let clear_pending = Arc::new(AtomicBool::new(false));
        let listener_id = self.ctx.queue.on_clear(Box::new({
            let flag = clear_pending.clone();
            move || flag.store(true, Ordering::SeqCst)
        }));

        let result = self.run_attempts(&caller_headers, &clear_pending).await;

        self.ctx.queue.remove_on_clear(listener_id);
        result
    }

    async fn run_attempts(
        &self,
        caller_headers: &Option<HashMap<String, String>>,
        clear_pending: &AtomicBool,
    ) -> SendResult {
        let ctx = &self.ctx;
        let attempt_limit = ctx.in_memory.attempt_limit;
        let mut retry_count_left = attempt_limit;
        let mut last_error_code: Option<u16> = None;

        loop {
            let attempt = attempt_limit - retry_count_left + 1;
            if attempt > 1 {
                info!(ctx.logger, "Retry attempt", "url" => &self.url, "attempt" => attempt);
            }

            let headers = build_send_headers(
                caller_headers.as_ref(),
                ctx.in_memory.header_name.as_deref(),
                attempt - 1,
                last_error_code,
            );
            let outcome = ctx.transport.post(&self.url, &self.body, headers).await;

            let suppressed = clear_pending.load(Ordering::SeqCst) || ctx.persistence_disabled;
            match outcome {
                TransportResult::Success { status_code } => {
                    if !suppressed {
                        ctx.queue
                            .notify_queue(NotifyConfig {
                                allowed_persist_retry_status_codes: ctx.persist_status_codes.clone(),
                            })
                            .await;
                    }
                    return SendResult { kind: ResultKind::Success { status_code }, dropped: false };
                }

                TransportResult::Unknown => {
                    if !suppressed {
                        ctx.queue
                            .notify_queue(NotifyConfig {
                                allowed_persist_retry_status_codes: ctx.persist_status_codes.clone(),
                            })
                            .await;
                    }
                    return SendResult { kind: ResultKind::Unknown, dropped: false };
                }

                TransportResult::Response { status_code, raw_error } => {
                    let offline = !ctx.online.load(Ordering::SeqCst);
                    if !suppressed && (offline || ctx.persist_status_codes.contains(&status_code)) {
                        self.persist(caller_headers, Some(status_code), attempt).await;
                        return SendResult {
                            kind: ResultKind::Persisted { status_code: Some(status_code) },
                            dropped: false,
                        };
                    }

                    if retry_count_left > 0 && ctx.in_memory.status_codes.contains(&status_code) {
                        tokio::time::sleep((ctx.delay)(attempt, retry_count_left)).await;
                        retry_count_left -= 1;
                        last_error_code = Some(status_code);
                        continue;
                    }

                    return SendResult {
                        kind: ResultKind::Response { status_code, raw_error },
                        dropped: true,
                    };
                }

                TransportResult::Network { raw_error } => {
                    let offline = !ctx.online.load(Ordering::SeqCst);
                    // Terminal network failures persist: an aborted teardown
                    // looks identical to a transient failure from here.
                    if !suppressed && (offline || retry_count_left == 0) {
                        self.persist(caller_headers, None, attempt).await;
                        return SendResult { kind: ResultKind::Persisted { status_code: None }, dropped: false };
                    }

                    if retry_count_left > 0 {
                        tokio::time::sleep((ctx.delay)(attempt, retry_count_left)).await;
                        retry_count_left -= 1;
                        last_error_code = None;
                        continue;
                    }

                    return SendResult { kind: ResultKind::Network { raw_error }, dropped: true };
                }
            }
        }
    }

    async fn persist(
        &self,
        caller_headers: &Option<HashMap<String, String>>,
        status_code: Option<u16>,
        attempt: u32,
    ) {
        debug!(
            self.ctx.logger,
            "Handing payload to persistence queue",
            "url" => &self.url,
            "statusCode" => status_code,
            "attemptCount" => attempt
        );
        self.ctx
            .queue
            .push_to_queue(RetryEntry {
                url: self.url.clone(),
                body: self.body.clone(),
                headers: caller_headers.clone(),
                status_code,
                timestamp: self.timestamp,
                attempt_count: attempt,
            })
            .await;
    }
}
