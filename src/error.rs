//! Crate error types.

use chrono::{DateTime, Utc};

use crate::cache::CacheError;
use crate::store::StoreError;

/// Errors surfaced by the session and abuse-protection components.
///
/// Validation-style checks return structured results instead of errors;
/// these variants cover the conditions callers must be able to tell apart
/// (a locked account, a hard block, a dead dependency).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad credentials or unknown identifier. The two cases are deliberately
    /// indistinguishable so responses cannot be used to probe for accounts.
    #[error("Invalid credentials")]
    AuthenticationFailure,

    /// Malformed, expired, blacklisted, or wrong-type token.
    #[error("Invalid token: {0}")]
    TokenInvalid(String),

    /// The account is locked out; carries the unlock time.
    #[error("Account locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    /// Device fingerprint did not match the one bound to the token family.
    #[error("Device fingerprint mismatch")]
    DeviceMismatch,

    /// Admission denied by the rate limiter or an active hard block.
    #[error("Rate limited")]
    RateLimited,

    /// The cache is unreachable on a path that must fail closed.
    #[error("Cache unavailable: {0}")]
    Cache(#[from] CacheError),

    /// The credential store is unreachable.
    #[error("Credential store unavailable: {0}")]
    Store(#[from] StoreError),

    /// Rejected startup configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
