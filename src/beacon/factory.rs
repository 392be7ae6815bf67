//! Factory: assembles defaults and wires one shared queue into every
//! beacon call.

use crate::beacon::{Beacon, BeaconContext};
use crate::configs::{MeasureHook, RetryDelayFn, TransporterConfig, linear_delay};
use crate::core::error::BeaconError;
use crate::core::result::{ResultKind, SendResult};
use crate::loggers::{Logger, LoggerBuilder};
use crate::queue::log_queue::LogQueue;
use crate::queue::PersistQueue;
use crate::store::memory::MemoryLog;
use crate::transport::{HostCapabilities, Transport, post_once};
use crate::debug;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

/// Everything `Transporter::new` consumes. `Default` gives the spec'd
/// defaults: no in-memory retries, persistence on 429/503, shared
/// "beacon-transporter" store, all host capabilities available.
#[derive(Default)]
pub struct TransporterInit {
    pub config: TransporterConfig,

    pub capabilities: HostCapabilities,

    /// Override of the in-memory delay policy. None means
    /// [`linear_delay`].
    pub calculate_retry_delay: Option<RetryDelayFn>,

    /// Caller-supplied queue; replaces the default ordered-log queue.
    pub queue: Option<Arc<dyn PersistQueue>>,

    /// Connectivity flag shared with the embedder. None means always
    /// online.
    pub online: Option<Arc<AtomicBool>>,

    /// Instrumentation hook around the durable store open.
    pub measure: Option<MeasureHook>,

    /// Pre-built logger; None builds a default one.
    pub logger: Option<Logger>,
}

/// The public entry point: one shared persistence queue, a `beacon`
/// method producing one [`Beacon`] per call.
pub struct Transporter {
    ctx: Arc<BeaconContext>,
    queue: Arc<dyn PersistQueue>,
    capabilities: HostCapabilities,
    online: Arc<AtomicBool>,
}

impl Transporter {
    /// Must run inside a tokio runtime (the logger worker and replay
    /// bursts are spawned tasks).
    pub fn new(init: TransporterInit) -> Result<Self, BeaconError> {
        let logger = match init.logger {
            Some(logger) => logger,
            None => LoggerBuilder::new("beacon-transporter").build()?,
        };

        let mut config = init.config;
        if config.persistence_retry.header_name.is_none() {
            config.persistence_retry.header_name = config.in_memory_retry.header_name.clone();
        }

        let transport = Transport::new(init.capabilities.clone(), config.compress, logger.clone());
        let online = init.online.unwrap_or_else(|| Arc::new(AtomicBool::new(true)));

        let queue: Arc<dyn PersistQueue> = match init.queue {
            Some(queue) => queue,
            None => {
                let opened = Instant::now();
                let store = MemoryLog::shared(
                    &config.persistence_retry.store_name,
                    config.persistence_retry.max_number,
                    config.persistence_retry.batch_eviction_number,
                );
                if let Some(measure) = &init.measure {
                    measure("store-open", opened.elapsed());
                }
                Arc::new(LogQueue::new(store, &config.persistence_retry, transport.clone(), logger.clone()))
            }
        };

        let ctx = Arc::new(BeaconContext {
            transport,
            queue: queue.clone(),
            persistence_disabled: config.disable_persistence_retry,
            persist_status_codes: config.persistence_retry.status_codes.clone(),
            in_memory: config.in_memory_retry.clone(),
            delay: init.calculate_retry_delay.unwrap_or_else(linear_delay),
            online: online.clone(),
            logger,
        });

        Ok(Self { ctx, queue, capabilities: init.capabilities, online })
    }

    /// Deliver one payload. Always resolves; inspect the result kind and
    /// `dropped` flag.
    pub async fn beacon(&self, url: &str, body: &str, headers: Option<HashMap<String, String>>) -> SendResult {
        if !self.capabilities.fetch {
            // Last resort: a detached one-shot POST whose outcome nobody
            // will ever observe.
            debug!(self.ctx.logger, "No fetch capability, degrading to one-shot post", "url" => url);
            let url = url.to_string();
            let body = body.to_string();
            tokio::spawn(async move {
                let _ = post_once(&url, &body, headers).await;
            });
            return SendResult { kind: ResultKind::Unknown, dropped: true };
        }

        Beacon::new(self.ctx.clone(), url, body).send(headers).await
    }

    /// The shared persistence queue.
    pub fn database(&self) -> Arc<dyn PersistQueue> {
        self.queue.clone()
    }

    /// Connectivity flag consulted by the persist decision. Embedders
    /// flip it from their own network monitoring.
    pub fn connectivity(&self) -> Arc<AtomicBool> {
        self.online.clone()
    }
}
