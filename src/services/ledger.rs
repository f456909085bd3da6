//! Pending two-factor request ledger
//!
//! Each (user, channel) pair owns a list at
//! `{environment}_{prefix}_{user}_{channel}`, most recent request first.
//! Reads fail open: a backend error or an undecodable entry is logged and the
//! pair is treated as having no pending requests.

use crate::config::Config;
use crate::models::{TwoFactorRequest, VerificationChannel};
use crate::store::{DynKeyValueStore, StoreError};

/// Channels whose lists are cleared by [`TwoFactorLedger::delete_all`]
const CLEARED_CHANNELS: [VerificationChannel; 2] =
    [VerificationChannel::Call, VerificationChannel::Text];

/// Error types for ledger writes
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Backend failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The request could not be encoded
    #[error("Failed to encode two-factor request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Ordered store of pending verification requests
#[derive(Clone)]
pub struct TwoFactorLedger {
    store: DynKeyValueStore,
    environment: String,
    prefix: String,
}

impl std::fmt::Debug for TwoFactorLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoFactorLedger")
            .field("environment", &self.environment)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl TwoFactorLedger {
    pub fn new(store: DynKeyValueStore, environment: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            environment: environment.into(),
            prefix: prefix.into(),
        }
    }

    /// Create a ledger keyed by the environment and two-factor prefix of `config`
    pub fn from_config(store: DynKeyValueStore, config: &Config) -> Self {
        Self::new(store, config.environment.clone(), config.two_factor.prefix.clone())
    }

    /// Backend key for the (user, channel) list
    pub fn key_for(&self, user_key: &str, channel: VerificationChannel) -> String {
        format!(
            "{}_{}_{}_{}",
            self.environment,
            self.prefix,
            user_key,
            channel.key_segment()
        )
    }

    /// Record `request` as the most recent one for its channel
    pub async fn append(&self, user_key: &str, request: &TwoFactorRequest) -> Result<(), LedgerError> {
        let key = self.key_for(user_key, request.channel);
        let payload = serde_json::to_string(request)?;

        tracing::debug!("Pushing two-factor request {} to '{}'", request.token, key);
        self.store.list_push_front(&key, &payload).await?;
        Ok(())
    }

    /// All pending requests for the pair, most recent first
    ///
    /// Never fails: errors are logged and reported as an empty list.
    pub async fn fetch_all(&self, user_key: &str, channel: VerificationChannel) -> Vec<TwoFactorRequest> {
        let key = self.key_for(user_key, channel);
        tracing::debug!("Fetching two-factor requests from '{}'", key);

        let raw = match self.store.list_range(&key).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("Failed to read two-factor requests at '{}': {}", key, e);
                return Vec::new();
            }
        };

        let decoded: Result<Vec<TwoFactorRequest>, _> =
            raw.iter().map(|entry| serde_json::from_str(entry)).collect();

        match decoded {
            Ok(requests) => requests,
            Err(e) => {
                tracing::error!("Failed to decode two-factor requests at '{}': {}", key, e);
                Vec::new()
            }
        }
    }

    /// Most recent pending request for the pair
    pub async fn fetch_most_recent(
        &self,
        user_key: &str,
        channel: VerificationChannel,
    ) -> Option<TwoFactorRequest> {
        self.fetch_all(user_key, channel).await.into_iter().next()
    }

    /// Drop every pending call and text request of `user_key`
    pub async fn delete_all(&self, user_key: &str) -> Result<(), StoreError> {
        for channel in CLEARED_CHANNELS {
            let key = self.key_for(user_key, channel);
            tracing::debug!("Deleting two-factor requests at '{}'", key);
            self.store.delete(&key).await?;
        }
        Ok(())
    }
}
