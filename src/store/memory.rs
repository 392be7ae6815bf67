//! Bundled in-process engines.
//!
//! Both engines are shared process-wide through named registries, so two
//! transporters created with the same store name observe one store — the
//! same-origin semantics the durable engines have in a browser host.

use crate::core::error::StoreError;
use crate::store::{RetryEntry, RetryLog, StringStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::OwnedMutexGuard;

struct LogState {
    entries: BTreeMap<(i64, u64), RetryEntry>,
    seq: u64,
}

/// In-memory ordered log keyed on `(timestamp, insertion seq)`.
///
/// Operations are linearized behind an async mutex. Eviction trims the
/// oldest `batch_eviction_number` entries whenever an append pushes the
/// size past `max_number`.
pub struct MemoryLog {
    state: AsyncMutex<LogState>,
    clearing: AtomicBool,
    max_number: usize,
    batch_eviction_number: usize,
}

static LOG_REGISTRY: OnceLock<Mutex<HashMap<String, Arc<MemoryLog>>>> = OnceLock::new();

impl MemoryLog {
    pub fn new(max_number: usize, batch_eviction_number: usize) -> Self {
        Self {
            state: AsyncMutex::new(LogState { entries: BTreeMap::new(), seq: 0 }),
            clearing: AtomicBool::new(false),
            max_number: max_number.max(1),
            batch_eviction_number: batch_eviction_number.max(1),
        }
    }

    /// Fetch or create the process-wide log registered under `name`.
    /// Capacity arguments only apply on first creation.
    pub fn shared(name: &str, max_number: usize, batch_eviction_number: usize) -> Arc<MemoryLog> {
        let registry = LOG_REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
        let mut map = registry.lock().expect("log registry poisoned");
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryLog::new(max_number, batch_eviction_number)))
            .clone()
    }

    fn insert(&self, state: &mut LogState, entry: RetryEntry) {
        let key = (entry.timestamp, state.seq);
        state.seq += 1;
        state.entries.insert(key, entry);
        if state.entries.len() > self.max_number {
            let oldest: Vec<(i64, u64)> = state
                .entries
                .keys()
                .take(self.batch_eviction_number)
                .copied()
                .collect();
            for key in oldest {
                state.entries.remove(&key);
            }
        }
    }
}

#[async_trait]
impl RetryLog for MemoryLog {
    async fn append(&self, entry: RetryEntry) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        self.insert(&mut state, entry);
        Ok(())
    }

    async fn append_unless_clearing(&self, entry: RetryEntry) -> Result<bool, StoreError> {
        if self.clearing.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let mut state = self.state.lock().await;
        self.insert(&mut state, entry);
        Ok(true)
    }

    async fn shift(&self) -> Result<Option<RetryEntry>, StoreError> {
        let mut state = self.state.lock().await;
        let key = state.entries.keys().next().copied();
        Ok(key.and_then(|k| state.entries.remove(&k)))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.clearing.store(true, Ordering::SeqCst);
        // Suspension point: real engines clear inside an async transaction,
        // and conditional appends must observe the in-progress clear.
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.entries.clear();
        self.clearing.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn peek(&self, count: usize) -> Result<Vec<RetryEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.entries.values().take(count).cloned().collect())
    }

    async fn peek_back(&self, count: usize) -> Result<Vec<RetryEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.entries.values().rev().take(count).cloned().collect())
    }
}

/// In-memory synchronous string store.
pub struct MemoryStringStore {
    slots: Mutex<HashMap<String, String>>,
}

static STRING_REGISTRY: OnceLock<Mutex<HashMap<String, Arc<MemoryStringStore>>>> = OnceLock::new();

impl MemoryStringStore {
    pub fn new() -> Self {
        Self { slots: Mutex::new(HashMap::new()) }
    }

    /// Fetch or create the process-wide store registered under `name`.
    pub fn shared(name: &str) -> Arc<MemoryStringStore> {
        let registry = STRING_REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
        let mut map = registry.lock().expect("string registry poisoned");
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStringStore::new()))
            .clone()
    }
}

impl Default for MemoryStringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StringStore for MemoryStringStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let slots = self.slots.lock().map_err(|_| StoreError::Unavailable("string store poisoned".into()))?;
        Ok(slots.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut slots = self.slots.lock().map_err(|_| StoreError::Unavailable("string store poisoned".into()))?;
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let mut slots = self.slots.lock().map_err(|_| StoreError::Unavailable("string store poisoned".into()))?;
        slots.remove(key);
        Ok(())
    }
}

/// Advisory per-key async mutex.
///
/// The string store cannot make read-modify-write atomic, so every writer
/// of a given storage key must hold that key's guard across the cycle.
pub struct KeyedMutex {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

static GLOBAL_KEYED_MUTEX: OnceLock<Arc<KeyedMutex>> = OnceLock::new();

impl KeyedMutex {
    pub fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    /// The process-wide registry shared by all kv queues.
    pub fn global() -> Arc<KeyedMutex> {
        GLOBAL_KEYED_MUTEX.get_or_init(|| Arc::new(KeyedMutex::new())).clone()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().expect("keyed mutex registry poisoned");
            locks.entry(key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
        };
        slot.lock_owned().await
    }
}

impl Default for KeyedMutex {
    fn default() -> Self {
        Self::new()
    }
}
