//! Authentication facade
//!
//! `AuthService` forwards session operations to a pluggable
//! [`AuthStrategy`]. The sliding-expiration store is the stock strategy; hosts
//! can supply their own without touching call sites.

use super::session::{LoginOutcome, SessionError, SlidingSessionStore};
use crate::models::SessionRecord;
use async_trait::async_trait;
use std::sync::Arc;

/// Session handling policy used by [`AuthService`]
#[async_trait]
pub trait AuthStrategy<T: SessionRecord>: Send + Sync {
    /// Establish or renew `session`
    async fn login(&self, session: T) -> Result<LoginOutcome<T>, SessionError>;

    /// Current session for `id`, if still valid
    async fn get_session(&self, id: &str) -> Result<Option<T>, SessionError>;

    /// End session `id`
    async fn logout(&self, id: &str) -> Result<(), SessionError>;
}

#[async_trait]
impl<T: SessionRecord> AuthStrategy<T> for SlidingSessionStore<T> {
    async fn login(&self, session: T) -> Result<LoginOutcome<T>, SessionError> {
        SlidingSessionStore::login(self, session).await
    }

    async fn get_session(&self, id: &str) -> Result<Option<T>, SessionError> {
        Ok(self.check(id).await?)
    }

    async fn logout(&self, id: &str) -> Result<(), SessionError> {
        Ok(SlidingSessionStore::logout(self, id).await?)
    }
}

/// Authentication service over a session strategy
pub struct AuthService<T: SessionRecord> {
    strategy: Arc<dyn AuthStrategy<T>>,
}

impl<T: SessionRecord> Clone for AuthService<T> {
    fn clone(&self) -> Self {
        Self {
            strategy: self.strategy.clone(),
        }
    }
}

impl<T: SessionRecord> AuthService<T> {
    /// Create a service using the sliding-expiration store
    pub fn sliding(store: SlidingSessionStore<T>) -> Self {
        Self::with_strategy(Arc::new(store))
    }

    /// Create a service using a custom strategy
    pub fn with_strategy(strategy: Arc<dyn AuthStrategy<T>>) -> Self {
        Self { strategy }
    }

    /// Log in with `session`
    pub async fn login(&self, session: T) -> Result<LoginOutcome<T>, SessionError> {
        self.strategy.login(session).await
    }

    /// Validate `id`, returning the session while it is active
    pub async fn get_session(&self, id: &str) -> Result<Option<T>, SessionError> {
        self.strategy.get_session(id).await
    }

    /// Whether `id` names an active session
    pub async fn is_logged_in(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.get_session(id).await?.is_some())
    }

    pub async fn logout(&self, id: &str) -> Result<(), SessionError> {
        self.strategy.logout(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::LoginSession;
    use crate::services::session::SessionSettings;
    use crate::store::MemoryStore;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn session(id: &str, user_id: i64) -> LoginSession {
        LoginSession {
            session_id: id.to_string(),
            user_id,
            username: format!("user{}", user_id),
            created_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    /// Strategy keeping sessions forever; first login wins
    #[derive(Default)]
    struct PinnedStrategy {
        sessions: Mutex<HashMap<String, LoginSession>>,
    }

    #[async_trait]
    impl AuthStrategy<LoginSession> for PinnedStrategy {
        async fn login(&self, session: LoginSession) -> Result<LoginOutcome<LoginSession>, SessionError> {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&session.session_id) {
                Some(existing) if existing.is_same_session(&session) => Ok(LoginOutcome::Renewed(existing.clone())),
                Some(_) => Ok(LoginOutcome::Rejected),
                None => {
                    sessions.insert(session.session_id.clone(), session.clone());
                    Ok(LoginOutcome::Created(session))
                }
            }
        }

        async fn get_session(&self, id: &str) -> Result<Option<LoginSession>, SessionError> {
            Ok(self.sessions.lock().await.get(id).cloned())
        }

        async fn logout(&self, id: &str) -> Result<(), SessionError> {
            self.sessions.lock().await.remove(id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sliding_strategy_through_facade() {
        let clock = Arc::new(ManualClock::at_timestamp(1_700_000_000));
        let memory = Arc::new(MemoryStore::with_clock(clock.clone()));
        let settings = SessionSettings {
            environment: "test".to_string(),
            prefix: "session".to_string(),
            sliding_expiration: Duration::from_secs(60),
            absolute_expiration: None,
            expiration_field: "expiration".to_string(),
        };
        let auth = AuthService::sliding(SlidingSessionStore::new(memory, clock.clone(), settings));

        assert!(matches!(auth.login(session("s1", 1)).await.unwrap(), LoginOutcome::Created(_)));
        assert!(auth.is_logged_in("s1").await.unwrap());

        clock.advance(chrono::Duration::seconds(61));
        assert!(!auth.is_logged_in("s1").await.unwrap());

        auth.login(session("s2", 2)).await.unwrap();
        auth.logout("s2").await.unwrap();
        assert_eq!(auth.get_session("s2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_custom_strategy() {
        let auth = AuthService::with_strategy(Arc::new(PinnedStrategy::default()));
        let other = auth.clone();

        auth.login(session("s1", 1)).await.unwrap();
        assert!(other.login(session("s1", 2)).await.unwrap().is_rejected());
        assert_eq!(other.get_session("s1").await.unwrap(), Some(session("s1", 1)));

        other.logout("s1").await.unwrap();
        assert!(!auth.is_logged_in("s1").await.unwrap());
    }
}
