//! Durable store seams.
//!
//! The queue backends consume two engine traits and nothing else: an
//! async ordered log keyed on entry timestamps, and a synchronous
//! whole-string store. Any engine error latches the consuming queue into
//! its disabled state, so implementations are free to fail loudly.

use crate::core::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod memory;

/// The unit of persistence: one failed payload awaiting replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryEntry {
    /// Absolute request URL.
    pub url: String,

    /// Opaque payload string.
    pub body: String,

    /// Caller headers, excluding the retry-context header (synthesized
    /// again at send time).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,

    /// Last observed HTTP status that caused persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// Millisecond epoch of the original attempt. Never changes across
    /// re-enqueues; the durable ordering key.
    pub timestamp: i64,

    /// Total attempts already made, in-memory ones included.
    pub attempt_count: u32,
}

/// Ordered durable log of [`RetryEntry`] records.
///
/// Entries are ordered by `timestamp`; the engine disambiguates duplicate
/// timestamps by monotone insertion order and owns the eviction policy.
#[async_trait]
pub trait RetryLog: Send + Sync {
    /// Append an entry, evicting from the oldest end when past capacity.
    async fn append(&self, entry: RetryEntry) -> Result<(), StoreError>;

    /// Conditional append that no-ops (returning false) while a clear is
    /// in progress.
    async fn append_unless_clearing(&self, entry: RetryEntry) -> Result<bool, StoreError>;

    /// Pop the oldest entry.
    async fn shift(&self) -> Result<Option<RetryEntry>, StoreError>;

    /// Delete every entry.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Read the oldest `count` entries without consuming them.
    async fn peek(&self, count: usize) -> Result<Vec<RetryEntry>, StoreError>;

    /// Read the newest `count` entries (newest first) without consuming
    /// them.
    async fn peek_back(&self, count: usize) -> Result<Vec<RetryEntry>, StoreError>;
}

/// Synchronous whole-value string store.
///
/// Read-modify-write is not atomic here; callers serialize writers through
/// an advisory [`memory::KeyedMutex`] on the storage key.
pub trait StringStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove_item(&self, key: &str) -> Result<(), StoreError>;
}
