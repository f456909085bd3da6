//! Data models
//!
//! This module contains the records sessionward keeps in the key-value store:
//! - Session records (the `SessionRecord` capability and `LoginSession`)
//! - Two-factor requests and their delivery channel
//! - Helpers flattening serde types into backend hashes

pub mod fields;
mod session;
mod two_factor;

pub use fields::{from_field_map, to_field_map, FieldMap};
pub use session::{LoginSession, SessionRecord};
pub use two_factor::{TwoFactorRequest, VerificationChannel};

/// Error raised when a stored record cannot be decoded or encoded
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// A required field is absent
    #[error("Missing field '{0}'")]
    MissingField(String),

    /// A field is present but unusable
    #[error("Invalid value for field '{field}': {message}")]
    InvalidField { field: String, message: String },

    /// The value does not flatten to a field map
    #[error("Record does not serialize to an object")]
    NotAnObject,

    /// JSON encoding or decoding failed
    #[error("Failed to decode record: {0}")]
    Decode(#[from] serde_json::Error),
}
