//! Session security and abuse protection for identity services.
//!
//! The crate coordinates token issuance/validation/revocation with session
//! tracking, a progressive failed-login lockout state machine, a
//! sliding-window rate limiter, and a security audit trail. Shared state
//! lives behind the [`cache::Cache`] abstraction; expiry is handled
//! exclusively through cache TTLs, so no component needs a background
//! sweeper. Credential records are owned by an external
//! [`store::CredentialStore`]; only the attempt-count, lock-until, and
//! status fields are touched here.
//!
//! [`SecurityService`] wires everything together for collaborators:
//!
//! ```no_run
//! use std::sync::Arc;
//! use gardi::{
//!     MemoryCache, MemoryCredentialStore, NoopNotifier, SecurityConfig, SecurityService,
//! };
//! use secrecy::SecretString;
//!
//! # fn main() -> gardi::Result<()> {
//! let config = SecurityConfig::new(
//!     "https://issuer.example".to_string(),
//!     "my-api".to_string(),
//!     SecretString::from(std::env::var("GARDI_SIGNING_KEY").unwrap_or_default()),
//! );
//! let service = SecurityService::new(
//!     config,
//!     Arc::new(MemoryCache::new()),
//!     Arc::new(MemoryCredentialStore::new()),
//!     Arc::new(NoopNotifier),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod guard;
pub mod ratelimit;
pub mod service;
pub mod session;
pub mod store;
pub mod token;

#[cfg(test)]
pub(crate) mod testutil;

pub use audit::{AuditEvent, AuditLogger, EventType, Severity};
pub use cache::{Cache, CacheError, MemoryCache};
pub use config::{SecurityConfig, TokenTtl};
pub use error::{Error, Result};
pub use guard::{FailedLoginGuard, NoopNotifier, Notifier, ProtectionResult};
pub use ratelimit::{RateCategory, RateLimitStatus, RateLimiter, RateQuota};
pub use service::SecurityService;
pub use session::{Session, SessionRegistry};
pub use store::{
    AccountStatus, CredentialRecord, CredentialStore, MemoryCredentialStore, Principal,
    PrincipalClass, StoreError, normalize_identifier,
};
pub use token::{Claims, SecurityContext, TokenIssuer, TokenPair, TokenType, fingerprint_digest};
