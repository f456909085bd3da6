//! Session model

use super::fields::{from_field_map, to_field_map, FieldMap};
use super::RecordError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record that can be kept in the sliding-expiration session store
///
/// The store never looks inside a record: it asks the record for its id, for
/// the fields to persist, and whether another record is the same session.
pub trait SessionRecord: Sized + Send + Sync + 'static {
    /// Stable identity used to build the storage key
    fn session_id(&self) -> String;

    /// Whether `other` is the same logical session as `self`
    ///
    /// A login presenting a record that is not the same session as the one
    /// already stored under its id is rejected.
    fn is_same_session(&self, other: &Self) -> bool;

    /// Fields written to the backend hash
    fn to_fields(&self) -> Result<FieldMap, RecordError>;

    /// Rebuild a record from the backend hash
    ///
    /// The map also carries the store's reserved expiration field, which
    /// implementations should ignore.
    fn from_fields(fields: &FieldMap) -> Result<Self, RecordError>;
}

/// Session entity for user authentication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginSession {
    /// Session ID (token)
    pub session_id: String,
    /// Associated user ID
    pub user_id: i64,
    /// Username at login time
    pub username: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl LoginSession {
    /// Create a session for `user_id` with a fresh random token
    pub fn new(user_id: i64, username: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id,
            username: username.into(),
            created_at,
        }
    }
}

impl SessionRecord for LoginSession {
    fn session_id(&self) -> String {
        self.session_id.clone()
    }

    fn is_same_session(&self, other: &Self) -> bool {
        self.session_id == other.session_id && self.user_id == other.user_id
    }

    fn to_fields(&self) -> Result<FieldMap, RecordError> {
        to_field_map(self)
    }

    fn from_fields(fields: &FieldMap) -> Result<Self, RecordError> {
        from_field_map(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> LoginSession {
        LoginSession::new(7, "alice", DateTime::from_timestamp(1_700_000_000, 0).unwrap())
    }

    #[test]
    fn test_same_session_requires_id_and_user() {
        let a = session();
        let mut b = a.clone();
        b.username = "renamed".to_string();
        assert!(a.is_same_session(&b));

        b.user_id = 8;
        assert!(!a.is_same_session(&b));
    }

    #[test]
    fn test_fields_ignore_expiration() {
        let original = session();
        let mut fields = original.to_fields().unwrap();
        fields.insert("expiration".to_string(), "1700001800".to_string());

        assert_eq!(LoginSession::from_fields(&fields).unwrap(), original);
    }

    #[test]
    fn test_expiration_only_hash_is_corrupt() {
        let mut fields = FieldMap::new();
        fields.insert("expiration".to_string(), "1700001800".to_string());

        assert!(LoginSession::from_fields(&fields).is_err());
    }

    #[test]
    fn test_new_sessions_get_distinct_tokens() {
        assert_ne!(session().session_id, session().session_id);
    }
}
