//! Redis store implementation
//!
//! Maps the [`KeyValueStore`] primitives onto Redis commands:
//! HGETALL, HGET, HSET, DEL, EXPIRE, LPUSH and LRANGE.
//!
//! Connection handling is delegated to [`RedisConnectionManager`]. When a
//! command fails because the connection dropped, the cached connection is
//! invalidated so that the next call reconnects.

use super::{ttl_seconds, KeyValueStore, RedisConnectionManager, StoreError};
use async_trait::async_trait;
use redis::{AsyncCommands, RedisError, RedisResult};
use std::collections::HashMap;
use std::time::Duration;

/// Redis-backed key-value store
#[derive(Debug)]
pub struct RedisStore {
    connections: RedisConnectionManager,
}

impl RedisStore {
    /// Create a new Redis store for the given connection URL
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `connect_timeout` - Upper bound for establishing a connection
    ///
    /// # Errors
    /// Returns an error if the URL is invalid. The connection itself is
    /// opened on first use.
    pub fn new(redis_url: &str, connect_timeout: Duration) -> Result<Self, StoreError> {
        Ok(Self {
            connections: RedisConnectionManager::new(redis_url, connect_timeout)?,
        })
    }

    /// Access the connection manager
    pub fn connections(&self) -> &RedisConnectionManager {
        &self.connections
    }

    /// Translate a command failure, dropping the connection when it is dead
    async fn map_error(&self, key: &str, context: &str, err: RedisError) -> StoreError {
        if err.code() == Some("WRONGTYPE") {
            tracing::error!("Redis key '{}' holds the wrong kind of value: {}", key, err);
            return StoreError::WrongType { key: key.to_string() };
        }

        if err.is_connection_dropped() || err.is_io_error() || err.is_connection_refusal() || err.is_timeout() {
            self.connections.invalidate().await;
            return StoreError::unavailable(format!("{} for key '{}'", context, key), err);
        }

        StoreError::Command(format!("{} for key '{}': {}", context, key, err))
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.connections.get_connection().await?;

        let result: RedisResult<HashMap<String, String>> = conn.hgetall(key).await;
        match result {
            Ok(fields) => Ok(fields),
            Err(e) => Err(self.map_error(key, "Failed to read hash", e).await),
        }
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connections.get_connection().await?;

        let result: RedisResult<Option<String>> = conn.hget(key, field).await;
        match result {
            Ok(value) => Ok(value),
            Err(e) => Err(self.map_error(key, "Failed to read hash field", e).await),
        }
    }

    async fn hash_set(&self, key: &str, fields: &HashMap<String, String>) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut conn = self.connections.get_connection().await?;
        let pairs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let result: RedisResult<()> = conn.hset_multiple(key, pairs.as_slice()).await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.map_error(key, "Failed to write hash", e).await),
        }
    }

    async fn hash_set_field(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connections.get_connection().await?;

        let result: RedisResult<()> = conn.hset(key, field, value).await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.map_error(key, "Failed to write hash field", e).await),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connections.get_connection().await?;

        let result: RedisResult<i64> = conn.del(key).await;
        match result {
            Ok(removed) => Ok(removed > 0),
            Err(e) => Err(self.map_error(key, "Failed to delete key", e).await),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        // EXPIRE works in whole seconds; a zero TTL deletes the key
        let seconds = ttl_seconds(ttl)?;
        let mut conn = self.connections.get_connection().await?;

        let result: RedisResult<bool> = conn.expire(key, seconds).await;
        match result {
            Ok(applied) => Ok(applied),
            Err(e) => Err(self.map_error(key, "Failed to set expiration", e).await),
        }
    }

    async fn list_push_front(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connections.get_connection().await?;

        let result: RedisResult<()> = conn.lpush(key, value).await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.map_error(key, "Failed to push list value", e).await),
        }
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connections.get_connection().await?;

        let result: RedisResult<Vec<String>> = conn.lrange(key, 0, -1).await;
        match result {
            Ok(values) => Ok(values),
            Err(e) => Err(self.map_error(key, "Failed to read list", e).await),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connections.get_connection().await?;

        let result: RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.map_error("", "Failed to ping Redis", e).await),
        }
    }
}
