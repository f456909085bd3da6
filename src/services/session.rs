//! Sliding-expiration session store
//!
//! Sessions are hashes at `{environment}_{prefix}_{id}` holding the record's
//! fields plus a reserved expiration field (Unix seconds). Every successful
//! login or check pushes that deadline `sliding_expiration` into the future;
//! an optional backend TTL set at creation caps the session's total life.
//!
//! Expiry is evaluated lazily when a session is read. Entries whose deadline
//! is missing, unparsable or in the past are deleted on sight, and entries
//! whose fields no longer decode are treated as absent and removed.
//!
//! None of the read-then-write sequences here are atomic against the
//! backend: two concurrent logins for the same id may both see no entry and
//! both write it.

use crate::clock::Clock;
use crate::config::Config;
use crate::models::{RecordError, SessionRecord};
use crate::store::{DynKeyValueStore, StoreError};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Error types for session store operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Backend failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The session supplied by the caller could not be flattened
    #[error("Failed to serialize session '{id}': {source}")]
    Serialize {
        id: String,
        #[source]
        source: RecordError,
    },
}

/// Result of a login attempt
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome<T> {
    /// No usable session existed; the supplied one was stored
    Created(T),
    /// The same session was already stored; its deadline was renewed
    Renewed(T),
    /// A different session holds this id; nothing was changed
    Rejected,
}

impl<T> LoginOutcome<T> {
    /// The active session, unless the login was rejected
    pub fn session(&self) -> Option<&T> {
        match self {
            LoginOutcome::Created(s) | LoginOutcome::Renewed(s) => Some(s),
            LoginOutcome::Rejected => None,
        }
    }

    /// Take the active session, unless the login was rejected
    pub fn into_session(self) -> Option<T> {
        match self {
            LoginOutcome::Created(s) | LoginOutcome::Renewed(s) => Some(s),
            LoginOutcome::Rejected => None,
        }
    }

    /// Whether the login was rejected
    pub fn is_rejected(&self) -> bool {
        matches!(self, LoginOutcome::Rejected)
    }
}

/// Key layout and timing for a session store
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// First key segment
    pub environment: String,
    /// Second key segment
    pub prefix: String,
    /// Window renewed on every access
    pub sliding_expiration: Duration,
    /// Backend TTL applied once at creation
    pub absolute_expiration: Option<Duration>,
    /// Reserved hash field holding the deadline
    pub expiration_field: String,
}

impl SessionSettings {
    /// Settings from the session section of `config`
    pub fn from_config(config: &Config) -> Self {
        Self {
            environment: config.environment.clone(),
            prefix: config.session.prefix.clone(),
            sliding_expiration: config.session.sliding_expiration(),
            absolute_expiration: config.session.absolute_expiration(),
            expiration_field: config.session.expiration_field.clone(),
        }
    }
}

/// Sliding-expiration session store for records of type `T`
pub struct SlidingSessionStore<T> {
    store: DynKeyValueStore,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    _record: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for SlidingSessionStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingSessionStore")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<T: SessionRecord> SlidingSessionStore<T> {
    /// Create a session store with explicit settings
    pub fn new(store: DynKeyValueStore, clock: Arc<dyn Clock>, settings: SessionSettings) -> Self {
        Self {
            store,
            clock,
            settings,
            _record: PhantomData,
        }
    }

    /// Create a session store configured from `config`
    pub fn from_config(store: DynKeyValueStore, clock: Arc<dyn Clock>, config: &Config) -> Self {
        Self::new(store, clock, SessionSettings::from_config(config))
    }

    /// Settings in use
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Backend key for session `id`
    pub fn key_for(&self, id: &str) -> String {
        format!("{}_{}_{}", self.settings.environment, self.settings.prefix, id)
    }

    /// Deadline for a session touched now, in Unix seconds
    ///
    /// Saturates at `i64::MAX` for windows beyond any real clock.
    fn next_expiration(&self) -> i64 {
        let window = i64::try_from(self.settings.sliding_expiration.as_secs()).unwrap_or(i64::MAX);
        self.clock.now().timestamp().saturating_add(window)
    }

    /// Push the deadline of `key` forward without touching other fields
    async fn bump_expiration(&self, key: &str) -> Result<(), StoreError> {
        let expiration = self.next_expiration();
        tracing::debug!("Bumping expiration for '{}' to {}", key, expiration);

        self.store
            .hash_set_field(key, &self.settings.expiration_field, &expiration.to_string())
            .await
    }

    /// Write a fresh entry for `session`
    async fn create(&self, key: &str, session: T) -> Result<T, SessionError> {
        let mut fields = session.to_fields().map_err(|source| SessionError::Serialize {
            id: session.session_id(),
            source,
        })?;
        fields.insert(
            self.settings.expiration_field.clone(),
            self.next_expiration().to_string(),
        );

        self.store.hash_set(key, &fields).await?;

        if let Some(absolute) = self.settings.absolute_expiration {
            tracing::debug!("Setting absolute expiration of {:?} on '{}'", absolute, key);
            self.store.expire(key, absolute).await?;
        }

        Ok(session)
    }

    /// Log in with `session`
    ///
    /// - No entry under the session's id: the session is stored and returned
    ///   as `Created`.
    /// - An entry that cannot be decoded: it is deleted and replaced, also
    ///   `Created`.
    /// - An entry for the same session: only its deadline is renewed and the
    ///   stored session is returned as `Renewed`.
    /// - An entry for a different session: `Rejected`, the store is untouched.
    ///
    /// # Errors
    /// Backend failures, including `StoreError::WrongType` when the key holds
    /// something other than a hash, and `SessionError::Serialize` when the
    /// supplied session cannot be flattened.
    pub async fn login(&self, session: T) -> Result<LoginOutcome<T>, SessionError> {
        let key = self.key_for(&session.session_id());
        tracing::debug!("Fetching session '{}' as hash", key);

        let stored = self.store.hash_get_all(&key).await?;
        if stored.is_empty() {
            tracing::debug!("Session does not exist, creating hash at '{}'", key);
            return self.create(&key, session).await.map(LoginOutcome::Created);
        }

        match T::from_fields(&stored) {
            Err(e) => {
                tracing::warn!("Session at '{}' is corrupt ({}); recreating it", key, e);
                self.store.delete(&key).await?;
                self.create(&key, session).await.map(LoginOutcome::Created)
            }
            Ok(existing) if session.is_same_session(&existing) => {
                tracing::debug!("Existing session at '{}' is still valid, reusing", key);
                self.bump_expiration(&key).await?;
                Ok(LoginOutcome::Renewed(existing))
            }
            Ok(_) => {
                tracing::debug!("Session at '{}' belongs to someone else; rejecting login", key);
                Ok(LoginOutcome::Rejected)
            }
        }
    }

    /// Look up session `id`, renewing it when it is still valid
    ///
    /// Returns `None` (and deletes the entry) when the deadline is missing,
    /// unparsable or past, or when the stored fields no longer decode.
    pub async fn check(&self, id: &str) -> Result<Option<T>, StoreError> {
        let key = self.key_for(id);
        tracing::debug!("Checking expiration of session '{}'", key);

        let raw = self.store.hash_get(&key, &self.settings.expiration_field).await?;
        let expiration = match raw.as_deref().map(str::parse::<i64>) {
            Some(Ok(expiration)) => expiration,
            Some(Err(_)) => {
                tracing::warn!(
                    "Session '{}' has invalid expiration {:?}; invalidating it",
                    key,
                    raw
                );
                self.discard(&key).await;
                return Ok(None);
            }
            None => {
                tracing::debug!("Session '{}' does not exist or has no expiration", key);
                self.discard(&key).await;
                return Ok(None);
            }
        };

        if expiration < self.clock.now().timestamp() {
            tracing::debug!("Session '{}' expired at {}; removing it", key, expiration);
            self.store.delete(&key).await?;
            return Ok(None);
        }

        self.bump_expiration(&key).await?;
        let fields = self.store.hash_get_all(&key).await?;

        match T::from_fields(&fields) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!("Session at '{}' is corrupt ({}); removing it", key, e);
                self.store.delete(&key).await?;
                Ok(None)
            }
        }
    }

    /// Delete session `id`; deleting a missing session is not an error
    pub async fn logout(&self, id: &str) -> Result<(), StoreError> {
        let key = self.key_for(id);
        tracing::debug!("Logging out session '{}'", key);

        self.store.delete(&key).await?;
        Ok(())
    }

    /// Set or replace the hard cutoff of session `id`
    ///
    /// Returns whether the session existed.
    pub async fn set_absolute_expiration(&self, id: &str, expiration: Duration) -> Result<bool, StoreError> {
        let key = self.key_for(id);
        tracing::debug!("Setting absolute expiration of {:?} on '{}'", expiration, key);

        self.store.expire(&key, expiration).await
    }

    /// Best-effort removal of an unusable entry
    async fn discard(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            tracing::warn!("Failed to remove invalid session '{}': {}", key, e);
        }
    }
}
