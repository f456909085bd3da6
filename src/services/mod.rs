//! Services layer
//!
//! This module holds the policies sessionward enforces on top of the
//! key-value store:
//! - Sliding-expiration sessions and the authentication facade over them
//! - The pending two-factor request ledger
//! - Throttled issuance and verification of two-factor codes

pub mod auth;
pub mod code;
pub mod ledger;
pub mod session;
pub mod two_factor;


pub use auth::{AuthService, AuthStrategy};
pub use code::{generate_verification_code, DEFAULT_CODE_DIGITS};
pub use ledger::{LedgerError, TwoFactorLedger};
pub use session::{LoginOutcome, SessionError, SessionSettings, SlidingSessionStore};
pub use two_factor::{
    CodeGenerator, RegisterOutcome, RegisterRequest, TwoFactorError, TwoFactorService, VerifyOutcome,
    VerifyRequest,
};
