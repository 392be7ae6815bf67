//! Configuration for the transporter.
//!
//! The plain-data half lives in serde structs with spec'd defaults and can
//! be merged from a JSON file plus `BEACON_`-prefixed environment variables.
//! The programmatic half (retry-delay policies, measure hook) is closures.

use crate::core::error::BeaconError;
use figment::{Figment, providers::{Env, Format, Json}};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Computes the sleep before the next in-memory attempt.
/// Arguments: 1-based attempt number just completed, retries still left.
pub type RetryDelayFn = Arc<dyn Fn(u32, u32) -> Duration + Send + Sync>;

/// Optional instrumentation hook invoked with a label and elapsed time
/// (durable store open is the only measured operation).
pub type MeasureHook = Arc<dyn Fn(&str, Duration) + Send + Sync>;

/// In-memory retry: bounded, page-lifetime retry over a single payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InMemoryRetryConfig {
    /// Number of retries after the first attempt. 0 disables the loop.
    pub attempt_limit: u32,

    /// Response codes eligible for the cheap in-memory retry.
    pub status_codes: Vec<u16>,

    /// Name of the retry-context header. None suppresses the header.
    pub header_name: Option<String>,
}

impl Default for InMemoryRetryConfig {
    fn default() -> Self {
        Self {
            attempt_limit: 0,
            status_codes: vec![502, 504],
            header_name: None,
        }
    }
}

/// Persistence retry: the durable replay queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceRetryConfig {
    /// Store name; two queues sharing a name share one engine.
    pub store_name: String,

    /// Total attempts allowed per entry, in-memory ones included.
    pub attempt_limit: u32,

    /// Response codes eligible for the costlier persistence path.
    pub status_codes: Vec<u16>,

    /// Entry cap of the durable store.
    pub max_number: usize,

    /// How many oldest entries the ordered-log engine trims past the cap.
    pub batch_eviction_number: usize,

    /// Minimum spacing between replay bursts, in milliseconds.
    pub throttle_wait_ms: u64,

    /// Retry-context header for replays. Inherits the in-memory name when
    /// unset.
    pub header_name: Option<String>,

    /// Pause briefly before each drain step instead of running on the next
    /// task tick.
    pub use_idle: bool,
}

impl Default for PersistenceRetryConfig {
    fn default() -> Self {
        Self {
            store_name: "beacon-transporter".to_string(),
            attempt_limit: 3,
            status_codes: vec![429, 503],
            max_number: 1000,
            batch_eviction_number: 300,
            throttle_wait_ms: 5 * 60 * 1000,
            header_name: None,
            use_idle: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransporterConfig {
    /// Gzip request bodies and mark them `content-encoding: gzip`.
    pub compress: bool,

    /// Skip the durable queue entirely; in-memory retry still applies.
    pub disable_persistence_retry: bool,

    pub in_memory_retry: InMemoryRetryConfig,

    pub persistence_retry: PersistenceRetryConfig,
}

impl TransporterConfig {
    /// Merges file + BEACON_ env vars. Fails if file missing.
    pub fn from_file(path: &str) -> Result<Self, BeaconError> {
        if !std::path::Path::new(path).exists() {
            return Err(BeaconError::ConfigError(format!("Config file not found: {}", path)));
        }

        Figment::new()
            .merge(Json::file(path))
            .merge(Env::prefixed("BEACON_").split("__"))
            .extract()
            .map_err(|e| BeaconError::ConfigError(e.to_string()))
    }

    /// Defaults overridden by BEACON_ env vars only.
    pub fn from_env() -> Result<Self, BeaconError> {
        Figment::new()
            .merge(Env::prefixed("BEACON_").split("__"))
            .extract()
            .map_err(|e| BeaconError::ConfigError(e.to_string()))
    }
}

/// Default delay policy: `attempt * 2000 ms`.
pub fn linear_delay() -> RetryDelayFn {
    Arc::new(|attempt, _count_left| Duration::from_millis(attempt as u64 * 2000))
}

/// Exponential backoff with proportional jitter, capped by `backoff_limit`.
/// Opt-in alternative to [`linear_delay`] for callers whose endpoints
/// punish synchronized retries.
pub fn exponential_delay_with_jitter(base: Duration, backoff_limit: Option<Duration>) -> RetryDelayFn {
    Arc::new(move |attempt, _count_left| {
        let pow = 2u64.saturating_pow(attempt.saturating_sub(1));
        let mut base_ms = (base.as_millis() as u64).saturating_mul(pow);
        if let Some(limit) = backoff_limit {
            base_ms = base_ms.min(limit.as_millis() as u64);
        }

        let jitter_max = (base_ms / 10).max(1);
        let jitter_ms = SmallRng::from_entropy().gen_range(0..=jitter_max);

        let mut candidate = base_ms.saturating_add(jitter_ms);
        if let Some(limit) = backoff_limit {
            candidate = candidate.min(limit.as_millis() as u64);
        }

        Duration::from_millis(candidate)
    })
}
