//! Reliable fire-and-forget POST delivery.
//!
//! A beacon transporter for instrumentation payloads: picks a transport,
//! retries transient failures in memory, and persists what it cannot
//! deliver into a durable queue that drains (throttled) on future
//! successful sends.

pub mod beacon;
pub mod configs;
pub mod core;
pub mod loggers;
pub mod queue;
pub mod store;
pub mod transport;

pub use beacon::factory::{Transporter, TransporterInit};
pub use configs::{
    InMemoryRetryConfig, MeasureHook, PersistenceRetryConfig, RetryDelayFn, TransporterConfig,
    exponential_delay_with_jitter, linear_delay,
};
pub use crate::core::error::{BeaconError, StoreError};
pub use crate::core::result::{ResultKind, SendResult};
pub use queue::{ClearListener, ListenerId, NotifyConfig, PersistQueue};
pub use store::RetryEntry;
pub use transport::{HostCapabilities, KEEPALIVE_BODY_LIMIT, post_once};
