use crate::loggers::core::{LogLevel, LogRecord};
use crate::loggers::worker::LogWorker;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct LoggerConfig {
    pub level: LogLevel,
    pub component: String,
}

/// Cheap handle cloned into every subsystem. Records are pushed onto a
/// bounded channel; a full channel drops the record rather than blocking
/// the delivery path.
#[derive(Clone)]
pub struct Logger {
    pub sender: mpsc::Sender<LogRecord>,
    pub config: Arc<ArcSwap<LoggerConfig>>,
}

pub struct LoggerBuilder {
    component: String,
    level: LogLevel,
    buffer_size: usize,
    enrich_sys: bool,
}

impl LoggerBuilder {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            level: LogLevel::Info,
            buffer_size: 1024,
            enrich_sys: true,
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Skip the sysinfo enrichment pass in the worker.
    pub fn without_sys_stats(mut self) -> Self {
        self.enrich_sys = false;
        self
    }

    /// Must run inside a tokio runtime: the worker task is spawned here.
    pub fn build(self) -> Result<Logger, crate::core::error::BeaconError> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let config = Arc::new(ArcSwap::from_pointee(LoggerConfig {
            level: self.level,
            component: self.component,
        }));

        let worker = LogWorker::new(rx, self.enrich_sys);
        tokio::spawn(async move {
            worker.run().await;
        });

        Ok(Logger { sender: tx, config })
    }
}
