//! Two-factor request model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Delivery channel a verification code was requested on
///
/// Serialized by name (`"Call"`, `"Text"`, ...) so stored requests stay
/// readable if variants are added later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VerificationChannel {
    /// Unrecognized channel; never throttled
    #[default]
    Unknown,
    /// Voice call
    Call,
    /// Text message
    Text,
}

impl VerificationChannel {
    /// Lower-case segment used in ledger keys
    pub fn key_segment(&self) -> &'static str {
        match self {
            VerificationChannel::Unknown => "unknown",
            VerificationChannel::Call => "call",
            VerificationChannel::Text => "text",
        }
    }

    /// Whether issuing codes on this channel is subject to the cooldown
    pub fn is_throttled(&self) -> bool {
        matches!(self, VerificationChannel::Call | VerificationChannel::Text)
    }
}

impl fmt::Display for VerificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VerificationChannel::Unknown => "Unknown",
            VerificationChannel::Call => "Call",
            VerificationChannel::Text => "Text",
        };
        f.write_str(name)
    }
}

impl FromStr for VerificationChannel {
    type Err = std::convert::Infallible;

    /// Parse a channel name case-insensitively; anything unrecognized is `Unknown`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "call" | "voice" => VerificationChannel::Call,
            "text" | "sms" => VerificationChannel::Text,
            _ => VerificationChannel::Unknown,
        })
    }
}

/// A pending verification request
///
/// Requests are immutable once stored; a new registration pushes a new
/// request instead of updating the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorRequest {
    /// Value being verified, e.g. a phone number
    pub identifier: String,
    /// Code sent to the user
    pub code: u32,
    /// When the request was registered
    pub created_at: DateTime<Utc>,
    /// Correlator handed back to the caller instead of the code
    pub token: Uuid,
    /// Channel the code was requested on
    pub channel: VerificationChannel,
}

impl TwoFactorRequest {
    /// Create a request with a fresh correlator token
    pub fn new(
        identifier: impl Into<String>,
        code: u32,
        channel: VerificationChannel,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            code,
            created_at,
            token: Uuid::new_v4(),
            channel,
        }
    }
}
