//! Key-value store layer
//!
//! Sessions and two-factor requests live in a key-value backend that offers
//! hashes, lists and per-key TTLs. Two drivers are provided:
//! - In-memory store - default, for tests and single-instance deployment
//! - Redis store - optional (`redis-store` feature), for distributed deployment
//!
//! The driver is selected based on configuration.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sessionward::store::create_store;
//! use sessionward::config::StoreConfig;
//!
//! let config = StoreConfig::default();
//! let store = create_store(&config, SystemClock::shared()).await?;
//! store.hash_set_field("dev_session_abc", "expiration", "1700000000").await?;
//! ```

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod connection;
#[cfg(feature = "redis-store")]
pub mod redis;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::{StoreConfig, StoreDriver};

pub use memory::MemoryStore;
#[cfg(feature = "redis-store")]
pub use self::redis::RedisStore;
#[cfg(feature = "redis-store")]
pub use connection::RedisConnectionManager;

/// Boxed error carried as the cause of a store failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for key-value store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached; callers may retry with backoff
    #[error("Key-value backend unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: BoxError,
    },

    /// The value at `key` does not have the expected shape
    #[error("Operation against a key holding the wrong kind of value: '{key}'")]
    WrongType { key: String },

    /// A TTL that the backend cannot represent
    #[error("TTL out of range: {ttl:?}")]
    InvalidTtl { ttl: Duration },

    /// Any other backend failure
    #[error("Key-value command failed: {0}")]
    Command(String),
}

/// Whole-second TTL as sent to EXPIRE
///
/// Fractions of a second round up, so only an exact zero removes the key.
pub(crate) fn ttl_seconds(ttl: Duration) -> Result<i64, StoreError> {
    ttl.as_secs()
        .checked_add(u64::from(ttl.subsec_nanos() > 0))
        .and_then(|secs| i64::try_from(secs).ok())
        .filter(|secs| chrono::Duration::try_seconds(*secs).is_some())
        .ok_or(StoreError::InvalidTtl { ttl })
}

impl StoreError {
    /// Wrap a connection failure
    pub fn unavailable(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Whether the failure is the backend being unreachable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Key-value store trait
///
/// The primitives the session store and the two-factor ledger are built on.
/// Every method is a single backend round trip; nothing here is transactional
/// across calls.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// All fields of the hash at `key`; empty when the key does not exist
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// A single hash field
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Set several hash fields, creating the hash if needed
    async fn hash_set(&self, key: &str, fields: &HashMap<String, String>) -> Result<(), StoreError>;

    /// Set one hash field, creating the hash if needed
    async fn hash_set_field(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// Delete a key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Set or replace the TTL of a key; returns whether the key existed
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Push a value onto the head of the list at `key`
    async fn list_push_front(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Whole list at `key`, head first; empty when the key does not exist
    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Round trip to the backend
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Shared store handle used by every service
pub type DynKeyValueStore = Arc<dyn KeyValueStore>;

/// Create a store instance based on configuration
///
/// - `StoreDriver::Memory` - in-process store driven by `clock`
/// - `StoreDriver::Redis` - Redis store (requires the `redis-store` feature)
///
/// # Errors
/// - Redis is configured but no URL is set, or the feature is disabled
/// - The Redis URL cannot be parsed
pub async fn create_store(config: &StoreConfig, clock: Arc<dyn Clock>) -> anyhow::Result<DynKeyValueStore> {
    match config.driver {
        StoreDriver::Memory => Ok(Arc::new(MemoryStore::with_clock(clock))),
        StoreDriver::Redis => {
            #[cfg(feature = "redis-store")]
            {
                let redis_url = config.redis_url.as_ref().ok_or_else(|| {
                    anyhow::anyhow!(
                        "Redis URL is required when using the Redis store driver. \
                         Set 'redis_url' in store configuration or use SESSIONWARD_STORE_REDIS_URL environment variable."
                    )
                })?;

                let store = RedisStore::new(redis_url, Duration::from_secs(config.connect_timeout_seconds))?;
                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "redis-store"))]
            {
                anyhow::bail!(
                    "Redis store driver is configured but the 'redis-store' feature is not enabled. \
                     Either enable the feature with `--features redis-store` or use the 'memory' driver."
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[tokio::test]
    async fn test_create_memory_store() {
        let config = StoreConfig::default();
        let store = create_store(&config, SystemClock::shared()).await.unwrap();

        store.hash_set_field("test_key", "field", "value").await.unwrap();
        let result = store.hash_get("test_key", "field").await.unwrap();
        assert_eq!(result, Some("value".to_string()));
    }

    #[cfg(not(feature = "redis-store"))]
    #[tokio::test]
    async fn test_create_redis_store_without_feature() {
        let config = StoreConfig {
            driver: StoreDriver::Redis,
            redis_url: Some("redis://localhost:6379".to_string()),
            ..StoreConfig::default()
        };

        let err = create_store(&config, SystemClock::shared()).await.err().unwrap().to_string();
        assert!(err.contains("redis-store") && err.contains("feature"));
    }

    #[cfg(feature = "redis-store")]
    #[tokio::test]
    async fn test_create_redis_store_without_url() {
        let config = StoreConfig {
            driver: StoreDriver::Redis,
            redis_url: None,
            ..StoreConfig::default()
        };

        let err = create_store(&config, SystemClock::shared()).await.err().unwrap().to_string();
        assert!(err.contains("Redis URL"));
    }

    #[cfg(feature = "redis-store")]
    #[tokio::test]
    async fn test_create_redis_store_is_lazy() {
        // Nothing listens on port 1; construction must still succeed because
        // the connection is only opened on first use.
        let config = StoreConfig {
            driver: StoreDriver::Redis,
            redis_url: Some("redis://127.0.0.1:1".to_string()),
            connect_timeout_seconds: 1,
        };

        let store = create_store(&config, SystemClock::shared()).await.unwrap();
        let err = store.ping().await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_ttl_seconds_rounds_fractions_up() {
        assert_eq!(ttl_seconds(Duration::ZERO).unwrap(), 0);
        assert_eq!(ttl_seconds(Duration::from_millis(1)).unwrap(), 1);
        assert_eq!(ttl_seconds(Duration::from_millis(500)).unwrap(), 1);
        assert_eq!(ttl_seconds(Duration::from_secs(60)).unwrap(), 60);
        assert_eq!(ttl_seconds(Duration::from_millis(60_001)).unwrap(), 61);
    }

    #[test]
    fn test_ttl_seconds_rejects_unrepresentable() {
        assert!(matches!(ttl_seconds(Duration::MAX), Err(StoreError::InvalidTtl { .. })));
        assert!(matches!(
            ttl_seconds(Duration::from_secs(u64::MAX)),
            Err(StoreError::InvalidTtl { .. })
        ));
        assert!(matches!(
            ttl_seconds(Duration::from_secs(10_000_000_000_000_000)),
            Err(StoreError::InvalidTtl { .. })
        ));
    }

    #[test]
    fn test_unavailable_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = StoreError::unavailable("Failed to connect", io);

        assert!(err.is_unavailable());
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("Failed to connect"));
    }
}
