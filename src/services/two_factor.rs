//! Two-factor verification service
//!
//! Issues verification codes per (user, channel), enforcing a cooldown
//! between two codes on the same channel, and validates a code together with
//! the correlator token handed out when it was registered.
//!
//! Throttling reads the ledger and then appends to it; concurrent
//! registrations for the same pair can both pass the check.

use super::code::generate_verification_code;
use super::ledger::{LedgerError, TwoFactorLedger};
use crate::clock::Clock;
use crate::config::Config;
use crate::models::{TwoFactorRequest, VerificationChannel};
use crate::store::{DynKeyValueStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Produces the code for a new request given the configured digit count
pub type CodeGenerator = Arc<dyn Fn(u32) -> Result<u32, TwoFactorError> + Send + Sync>;

/// Error types for two-factor operations
#[derive(Debug, thiserror::Error)]
pub enum TwoFactorError {
    /// Backend failure while recording or clearing requests
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A request could not be encoded for the ledger
    #[error("Failed to encode two-factor request: {0}")]
    Serialize(#[from] serde_json::Error),

    /// No code could be generated
    #[error("Failed to generate verification code: {0}")]
    CodeGeneration(String),
}

impl From<LedgerError> for TwoFactorError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Store(e) => TwoFactorError::Store(e),
            LedgerError::Encode(e) => TwoFactorError::Serialize(e),
        }
    }
}

/// Input for [`TwoFactorService::register_request`]
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    /// Whom the code is for
    pub user_key: String,
    pub channel: VerificationChannel,
    /// Value being verified, e.g. a phone number
    pub identifier: String,
    pub code: u32,
    /// Cooldown between two codes on this channel
    pub throttle_seconds: u64,
}

/// Result of a registration
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    /// The request was stored; hand its token to the caller
    Registered(TwoFactorRequest),
    /// A code was issued too recently on this channel
    Throttled { seconds_remaining: i64 },
}

/// Input for [`TwoFactorService::verify_code`]
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub user_key: String,
    /// Code entered by the user
    pub code: u32,
    /// Channel hint; `Unknown` searches text then call
    pub channel: VerificationChannel,
    /// Correlator returned at registration
    pub token: Uuid,
}

/// Result of a verification
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    /// Code and token match; all pending requests of the user were cleared
    Verified(TwoFactorRequest),
    /// No pending request carries this code
    NotVerified,
    /// The code matches but was registered under another token
    InvalidCorrelator,
}

/// Cooldown window for `seconds`, saturating at the largest representable span
fn throttle_window(seconds: u64) -> chrono::Duration {
    i64::try_from(seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

/// Seconds left in the cooldown started by a request created at `created_at`
///
/// `None` once strictly more than `window` has elapsed.
fn throttle_remaining(created_at: DateTime<Utc>, now: DateTime<Utc>, window: chrono::Duration) -> Option<i64> {
    let elapsed = now - created_at;
    if elapsed > window {
        None
    } else {
        Some(window.num_seconds().saturating_sub(elapsed.num_seconds()))
    }
}

/// Two-factor code issuance and verification
#[derive(Clone)]
pub struct TwoFactorService {
    ledger: TwoFactorLedger,
    clock: Arc<dyn Clock>,
    throttle_seconds: u64,
    code_digits: u32,
    code_generator: Option<CodeGenerator>,
}

impl std::fmt::Debug for TwoFactorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoFactorService")
            .field("ledger", &self.ledger)
            .field("throttle_seconds", &self.throttle_seconds)
            .field("code_digits", &self.code_digits)
            .finish_non_exhaustive()
    }
}

impl TwoFactorService {
    /// Create a service over `ledger`
    pub fn new(ledger: TwoFactorLedger, clock: Arc<dyn Clock>, throttle_seconds: u64, code_digits: u32) -> Self {
        Self {
            ledger,
            clock,
            throttle_seconds,
            code_digits,
            code_generator: None,
        }
    }

    /// Create a service configured from the two-factor section of `config`
    pub fn from_config(store: DynKeyValueStore, clock: Arc<dyn Clock>, config: &Config) -> Self {
        Self::new(
            TwoFactorLedger::from_config(store, config),
            clock,
            config.two_factor.throttle_seconds,
            config.two_factor.code_digits,
        )
    }

    /// Replace the OS-random code generator used by [`issue`](Self::issue)
    pub fn with_code_generator(mut self, generator: CodeGenerator) -> Self {
        self.code_generator = Some(generator);
        self
    }

    pub fn ledger(&self) -> &TwoFactorLedger {
        &self.ledger
    }

    /// Register a code the caller generated and delivers itself
    ///
    /// Call and text registrations are refused while the most recent request
    /// on the same channel is no older than `throttle_seconds`.
    pub async fn register_request(&self, request: RegisterRequest) -> Result<RegisterOutcome, TwoFactorError> {
        let now = self.clock.now();

        if request.channel.is_throttled() {
            if let Some(previous) = self
                .ledger
                .fetch_most_recent(&request.user_key, request.channel)
                .await
            {
                let window = throttle_window(request.throttle_seconds);
                if let Some(seconds_remaining) = throttle_remaining(previous.created_at, now, window) {
                    tracing::info!(
                        "Two-factor request for '{}' on {} throttled, {}s remaining",
                        request.user_key,
                        request.channel,
                        seconds_remaining
                    );
                    return Ok(RegisterOutcome::Throttled { seconds_remaining });
                }
            }
        }

        let created = TwoFactorRequest::new(request.identifier, request.code, request.channel, now);
        self.ledger.append(&request.user_key, &created).await?;

        tracing::debug!(
            "Registered two-factor request {} for '{}' on {}",
            created.token,
            request.user_key,
            request.channel
        );
        Ok(RegisterOutcome::Registered(created))
    }

    /// Generate a code and register it with the configured cooldown
    pub async fn issue(
        &self,
        user_key: &str,
        channel: VerificationChannel,
        identifier: &str,
    ) -> Result<RegisterOutcome, TwoFactorError> {
        let code = match &self.code_generator {
            Some(generator) => generator(self.code_digits)?,
            None => generate_verification_code(self.code_digits)
                .map_err(|e| TwoFactorError::CodeGeneration(e.to_string()))?,
        };

        self.register_request(RegisterRequest {
            user_key: user_key.to_string(),
            channel,
            identifier: identifier.to_string(),
            code,
            throttle_seconds: self.throttle_seconds,
        })
        .await
    }

    /// Most recent pending request whose code equals `code`
    ///
    /// Text is searched unless the channel is `Call`; call is searched unless
    /// the channel is `Text` and nothing matched yet. Only the most recent
    /// request of each channel is considered.
    pub async fn find_request(
        &self,
        user_key: &str,
        code: u32,
        channel: VerificationChannel,
    ) -> Option<TwoFactorRequest> {
        if channel != VerificationChannel::Call {
            if let Some(found) = self
                .ledger
                .fetch_most_recent(user_key, VerificationChannel::Text)
                .await
                .filter(|r| r.code == code)
            {
                return Some(found);
            }
        }

        if channel != VerificationChannel::Text {
            return self
                .ledger
                .fetch_most_recent(user_key, VerificationChannel::Call)
                .await
                .filter(|r| r.code == code);
        }

        None
    }

    /// Check a code and its correlator token
    ///
    /// A successful verification consumes every pending call and text request
    /// of the user. Failed attempts change nothing.
    pub async fn verify_code(&self, request: VerifyRequest) -> Result<VerifyOutcome, TwoFactorError> {
        let Some(found) = self
            .find_request(&request.user_key, request.code, request.channel)
            .await
        else {
            tracing::debug!("No pending two-factor request for '{}' matches", request.user_key);
            return Ok(VerifyOutcome::NotVerified);
        };

        if found.token != request.token {
            tracing::warn!(
                "Two-factor code for '{}' presented with a foreign token",
                request.user_key
            );
            return Ok(VerifyOutcome::InvalidCorrelator);
        }

        self.ledger.delete_all(&request.user_key).await?;
        tracing::info!("Verified two-factor request {} for '{}'", found.token, request.user_key);
        Ok(VerifyOutcome::Verified(found))
    }

    /// Drop every pending request of `user_key`
    pub async fn delete_requests(&self, user_key: &str) -> Result<(), TwoFactorError> {
        self.ledger.delete_all(user_key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    const START: i64 = 1_700_000_000;

    fn service() -> (Arc<ManualClock>, TwoFactorService) {
        let clock = Arc::new(ManualClock::at_timestamp(START));
        let memory = Arc::new(MemoryStore::with_clock(clock.clone()));
        let ledger = TwoFactorLedger::new(memory, "test", "2fa");
        (clock.clone(), TwoFactorService::new(ledger, clock, 60, 6))
    }

    fn register(user: &str, channel: VerificationChannel, code: u32) -> RegisterRequest {
        RegisterRequest {
            user_key: user.to_string(),
            channel,
            identifier: "+15550100".to_string(),
            code,
            throttle_seconds: 60,
        }
    }

    fn registered(outcome: RegisterOutcome) -> TwoFactorRequest {
        match outcome {
            RegisterOutcome::Registered(request) => request,
            other => panic!("expected Registered, got {:?}", other),
        }
    }

    #[test]
    fn test_throttle_remaining() {
        let t0 = DateTime::from_timestamp(START, 0).unwrap();
        let window = chrono::Duration::seconds(60);

        assert_eq!(throttle_remaining(t0, t0, window), Some(60));
        assert_eq!(throttle_remaining(t0, t0 + chrono::Duration::seconds(59), window), Some(1));
        assert_eq!(throttle_remaining(t0, t0 + chrono::Duration::seconds(60), window), Some(0));
        assert_eq!(throttle_remaining(t0, t0 + chrono::Duration::seconds(61), window), None);
        assert_eq!(
            throttle_remaining(t0, t0 + chrono::Duration::milliseconds(60_500), window),
            None
        );
    }

    #[test]
    fn test_throttle_window_saturates() {
        assert_eq!(throttle_window(60), chrono::Duration::seconds(60));
        assert_eq!(throttle_window(10_000_000_000_000_000), chrono::Duration::MAX);
        assert_eq!(throttle_window(u64::MAX), chrono::Duration::MAX);
    }

    #[tokio::test]
    async fn test_huge_throttle_windows_still_throttle() {
        let (clock, svc) = service();
        registered(svc.register_request(register("42", VerificationChannel::Text, 1)).await.unwrap());
        clock.advance(chrono::Duration::days(3650));

        for throttle_seconds in [10_000_000_000_000_000, u64::MAX] {
            let outcome = svc
                .register_request(RegisterRequest {
                    throttle_seconds,
                    ..register("42", VerificationChannel::Text, 2)
                })
                .await
                .unwrap();
            assert!(matches!(outcome, RegisterOutcome::Throttled { seconds_remaining } if seconds_remaining > 0));
        }
    }

    #[tokio::test]
    async fn test_register_then_throttle() {
        let (clock, svc) = service();

        registered(svc.register_request(register("42", VerificationChannel::Text, 111111)).await.unwrap());

        clock.advance(chrono::Duration::seconds(10));
        let outcome = svc.register_request(register("42", VerificationChannel::Text, 222222)).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Throttled { seconds_remaining: 50 });
    }

    #[tokio::test]
    async fn test_throttle_is_per_channel_and_user() {
        let (_, svc) = service();

        registered(svc.register_request(register("42", VerificationChannel::Text, 1)).await.unwrap());
        registered(svc.register_request(register("42", VerificationChannel::Call, 2)).await.unwrap());
        registered(svc.register_request(register("43", VerificationChannel::Text, 3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_channel_is_never_throttled() {
        let (_, svc) = service();

        registered(svc.register_request(register("42", VerificationChannel::Unknown, 1)).await.unwrap());
        registered(svc.register_request(register("42", VerificationChannel::Unknown, 2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_with_right_token() {
        let (_, svc) = service();
        let request = registered(svc.register_request(register("42", VerificationChannel::Call, 123456)).await.unwrap());

        let outcome = svc
            .verify_code(VerifyRequest {
                user_key: "42".to_string(),
                code: 123456,
                channel: VerificationChannel::Call,
                token: request.token,
            })
            .await
            .unwrap();

        assert_eq!(outcome, VerifyOutcome::Verified(request));
        assert_eq!(svc.ledger().fetch_most_recent("42", VerificationChannel::Call).await, None);
    }

    #[tokio::test]
    async fn test_verify_with_wrong_token_or_code() {
        let (_, svc) = service();
        let request = registered(svc.register_request(register("42", VerificationChannel::Text, 123456)).await.unwrap());

        let wrong_token = svc
            .verify_code(VerifyRequest {
                user_key: "42".to_string(),
                code: 123456,
                channel: VerificationChannel::Text,
                token: Uuid::new_v4(),
            })
            .await
            .unwrap();
        assert_eq!(wrong_token, VerifyOutcome::InvalidCorrelator);

        let wrong_code = svc
            .verify_code(VerifyRequest {
                user_key: "42".to_string(),
                code: 654321,
                channel: VerificationChannel::Text,
                token: request.token,
            })
            .await
            .unwrap();
        assert_eq!(wrong_code, VerifyOutcome::NotVerified);

        // Failed attempts leave the request pending
        assert_eq!(
            svc.ledger().fetch_most_recent("42", VerificationChannel::Text).await,
            Some(request)
        );
    }

    #[tokio::test]
    async fn test_find_request_channel_search_order() {
        let (_, svc) = service();
        let text = registered(svc.register_request(register("42", VerificationChannel::Text, 1111)).await.unwrap());
        let call = registered(svc.register_request(register("42", VerificationChannel::Call, 2222)).await.unwrap());

        assert_eq!(svc.find_request("42", 1111, VerificationChannel::Unknown).await, Some(text.clone()));
        assert_eq!(svc.find_request("42", 2222, VerificationChannel::Unknown).await, Some(call.clone()));
        assert_eq!(svc.find_request("42", 2222, VerificationChannel::Text).await, None);
        assert_eq!(svc.find_request("42", 1111, VerificationChannel::Call).await, None);
        assert_eq!(svc.find_request("42", 1111, VerificationChannel::Text).await, Some(text));
        assert_eq!(svc.find_request("42", 2222, VerificationChannel::Call).await, Some(call));
    }

    #[tokio::test]
    async fn test_only_most_recent_request_is_considered() {
        let (clock, svc) = service();
        registered(svc.register_request(register("42", VerificationChannel::Text, 1111)).await.unwrap());
        clock.advance(chrono::Duration::seconds(61));
        registered(svc.register_request(register("42", VerificationChannel::Text, 2222)).await.unwrap());

        assert_eq!(svc.find_request("42", 1111, VerificationChannel::Text).await, None);
    }

    #[tokio::test]
    async fn test_issue_uses_configured_generator() {
        let (_, svc) = service();
        let svc = svc.with_code_generator(Arc::new(|digits: u32| -> Result<u32, TwoFactorError> {
            assert_eq!(digits, 6);
            Ok(424242)
        }));

        let request = registered(svc.issue("42", VerificationChannel::Text, "+15550100").await.unwrap());
        assert_eq!(request.code, 424242);
        assert_eq!(request.identifier, "+15550100");

        // The configured cooldown applies
        let again = svc.issue("42", VerificationChannel::Text, "+15550100").await.unwrap();
        assert_eq!(again, RegisterOutcome::Throttled { seconds_remaining: 60 });
    }

    #[tokio::test]
    async fn test_issue_with_os_random_code() {
        let (_, svc) = service();
        let request = registered(svc.issue("42", VerificationChannel::Call, "+15550100").await.unwrap());
        assert!(request.code < 1_000_000);
    }

    #[tokio::test]
    async fn test_failing_generator_is_reported() {
        let (_, svc) = service();
        let svc = svc.with_code_generator(Arc::new(|_: u32| -> Result<u32, TwoFactorError> {
            Err(TwoFactorError::CodeGeneration("entropy exhausted".to_string()))
        }));

        let err = svc.issue("42", VerificationChannel::Text, "x").await.unwrap_err();
        assert!(matches!(err, TwoFactorError::CodeGeneration(_)));
    }
}
