//! In-memory store implementation
//!
//! Provides a thread-safe, process-local key-value store with the same
//! observable semantics as the Redis driver:
//! - Hashes and lists live under string keys; using a key as the other kind
//!   fails with [`StoreError::WrongType`]
//! - Per-key TTLs measured against the injected [`Clock`]; an expired key is
//!   dropped when it is next touched, and the whole map is swept of expired
//!   keys at most once per [`SWEEP_INTERVAL_SECONDS`]
//! - Emptying a list or hash never leaves an empty key behind

use super::{ttl_seconds, KeyValueStore, StoreError};
use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Minimum time between two full sweeps of expired keys
pub const SWEEP_INTERVAL_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
enum StoredValue {
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory key-value store
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    /// Unix seconds of the last full sweep
    last_sweep: AtomicI64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Create a new memory store on wall-clock time
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    /// Create a new memory store whose TTLs follow `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let last_sweep = AtomicI64::new(clock.now().timestamp());
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            last_sweep,
        }
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    /// Whether the store holds no live keys
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether `key` exists and has not expired
    pub async fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries.get(key).is_some_and(|e| !e.is_expired(now))
    }

    /// Remaining TTL of `key`, if it exists and has one
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        let entry = entries.get(key).filter(|e| !e.is_expired(now))?;
        entry.expires_at.and_then(|at| (at - now).to_std().ok())
    }

    /// Store a raw string list value, for seeding corrupt data in tests
    /// or migrating records from another store
    pub async fn insert_list(&self, key: &str, values: Vec<String>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: StoredValue::List(values.into()),
                expires_at: None,
            },
        );
    }

    /// Drop `key` if its TTL has elapsed, and sweep the whole map when due
    fn purge_expired(&self, entries: &mut HashMap<String, Entry>, key: &str, now: DateTime<Utc>) {
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }

        let last = self.last_sweep.load(Ordering::Relaxed);
        if now.timestamp().saturating_sub(last) >= SWEEP_INTERVAL_SECONDS {
            self.last_sweep.store(now.timestamp(), Ordering::Relaxed);
            let before = entries.len();
            entries.retain(|_, e| !e.is_expired(now));
            if entries.len() < before {
                tracing::debug!("Swept {} expired keys from memory store", before - entries.len());
            }
        }
    }

    fn wrong_type(key: &str) -> StoreError {
        StoreError::WrongType { key: key.to_string() }
    }

    /// Mutable hash at `key`, created empty when absent
    fn hash_mut<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> Result<&'a mut HashMap<String, String>, StoreError> {
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: StoredValue::Hash(HashMap::new()),
            expires_at: None,
        });

        match &mut entry.value {
            StoredValue::Hash(hash) => Ok(hash),
            StoredValue::List(_) => Err(Self::wrong_type(key)),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        self.purge_expired(&mut entries, key, now);

        match entries.get(key).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(StoredValue::Hash(hash)) => Ok(hash.clone()),
            Some(StoredValue::List(_)) => Err(Self::wrong_type(key)),
        }
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        self.purge_expired(&mut entries, key, now);

        match entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(StoredValue::Hash(hash)) => Ok(hash.get(field).cloned()),
            Some(StoredValue::List(_)) => Err(Self::wrong_type(key)),
        }
    }

    async fn hash_set(&self, key: &str, fields: &HashMap<String, String>) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }

        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        self.purge_expired(&mut entries, key, now);

        let hash = Self::hash_mut(&mut entries, key)?;
        hash.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn hash_set_field(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        self.purge_expired(&mut entries, key, now);

        let hash = Self::hash_mut(&mut entries, key)?;
        hash.insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        self.purge_expired(&mut entries, key, now);

        Ok(entries.remove(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        self.purge_expired(&mut entries, key, now);

        // Like EXPIRE, only whole seconds count and a zero TTL deletes the key
        let seconds = ttl_seconds(ttl)?;
        if seconds == 0 {
            return Ok(entries.remove(key).is_some());
        }

        match entries.get_mut(key) {
            Some(entry) => {
                let expires_at = chrono::Duration::try_seconds(seconds)
                    .and_then(|d| now.checked_add_signed(d))
                    .ok_or(StoreError::InvalidTtl { ttl })?;
                entry.expires_at = Some(expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_push_front(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        self.purge_expired(&mut entries, key, now);

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: StoredValue::List(VecDeque::new()),
            expires_at: None,
        });

        match &mut entry.value {
            StoredValue::List(list) => {
                list.push_front(value.to_string());
                Ok(())
            }
            StoredValue::Hash(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        self.purge_expired(&mut entries, key, now);

        match entries.get(key).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(StoredValue::List(list)) => Ok(list.iter().cloned().collect()),
            Some(StoredValue::Hash(_)) => Err(Self::wrong_type(key)),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
