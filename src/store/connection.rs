//! Redis connection management
//!
//! Holds one multiplexed connection that every store call clones. The
//! connection is opened on first use and reopened after the store reports it
//! dropped. Failures to connect are surfaced as [`StoreError::Unavailable`]
//! and never retried here; retry policy belongs to the caller.
//!
//! A multiplexed connection only learns that the server went away when a
//! command fails on it. The first command after a drop therefore fails with
//! `Unavailable`; it also invalidates the cached connection, so the next
//! command reconnects.

use super::StoreError;
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::time::Duration;
use tokio::sync::Mutex;

/// Lazily connecting, self-healing Redis connection holder
pub struct RedisConnectionManager {
    client: Client,
    connect_timeout: Duration,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl std::fmt::Debug for RedisConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnectionManager")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisConnectionManager {
    /// Create a manager for the given connection URL
    ///
    /// Only the URL is validated here; no connection is opened.
    ///
    /// # Errors
    /// Returns `Unavailable` if the URL cannot be parsed.
    pub fn new(redis_url: &str, connect_timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::unavailable("Failed to create Redis client", e))?;

        Ok(Self {
            client,
            connect_timeout,
            connection: Mutex::new(None),
        })
    }

    /// Get a live connection, establishing one if necessary
    ///
    /// Safe to call repeatedly and concurrently: callers share the same
    /// underlying connection until it is invalidated.
    pub async fn get_connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut slot = self.connection.lock().await;

        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }

        tracing::debug!("Establishing Redis connection");
        let connection = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            StoreError::unavailable(
                format!("Timed out after {:?} connecting to Redis", self.connect_timeout),
                std::io::Error::from(std::io::ErrorKind::TimedOut),
            )
        })?
        .map_err(|e| StoreError::unavailable("Failed to connect to Redis", e))?;

        tracing::info!("Redis connection established");
        *slot = Some(connection.clone());
        Ok(connection)
    }

    /// Forget the cached connection so the next call reconnects
    pub async fn invalidate(&self) {
        let mut slot = self.connection.lock().await;
        if slot.take().is_some() {
            tracing::warn!("Redis connection dropped; will reconnect on next use");
        }
    }

    /// Whether a connection is currently cached
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    #[test]
    fn test_invalid_url_is_unavailable() {
        let err = RedisConnectionManager::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let manager = RedisConnectionManager::new("redis://127.0.0.1:1", Duration::from_secs(1)).unwrap();

        let err = manager.get_connection().await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_connection_is_reused_and_reopened() {
        let manager = RedisConnectionManager::new(&get_redis_url(), Duration::from_secs(5)).unwrap();

        manager.get_connection().await.unwrap();
        assert!(manager.is_connected().await);

        manager.invalidate().await;
        assert!(!manager.is_connected().await);

        manager.get_connection().await.unwrap();
        assert!(manager.is_connected().await);
    }
}
