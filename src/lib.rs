//! Sessionward - sliding sessions and throttled two-factor codes
//!
//! This library keeps two kinds of short-lived authentication state in a
//! key-value store (Redis in production, an in-process store otherwise):
//! sessions whose lifetime slides forward on every access, and pending
//! two-factor verification requests with a per-channel cooldown.

pub mod clock;
pub mod config;
pub mod models;
pub mod services;
pub mod store;
