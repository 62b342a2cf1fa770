//! Facade wiring the subsystem together for collaborators such as
//! request-authentication middleware and login endpoint handlers.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::audit::AuditLogger;
use crate::cache::Cache;
use crate::config::SecurityConfig;
use crate::error::{Error, Result};
use crate::guard::{FailedLoginGuard, Notifier, ProtectionResult};
use crate::ratelimit::{RateCategory, RateLimitStatus, RateLimiter};
use crate::session::SessionRegistry;
use crate::store::{CredentialStore, Principal};
use crate::token::{SecurityContext, TokenIssuer, TokenPair};

pub struct SecurityService {
    sessions: Arc<SessionRegistry>,
    tokens: TokenIssuer,
    guard: FailedLoginGuard,
    limiter: Arc<RateLimiter>,
    audit: Arc<AuditLogger>,
}

impl SecurityService {
    /// Wires every component against the shared cache, store, and audit
    /// sinks.
    ///
    /// # Errors
    /// Returns `Error::Config` when the token signing key is missing.
    pub fn new(
        config: SecurityConfig,
        cache: Arc<dyn Cache>,
        store: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let audit = Arc::new(AuditLogger::new(cache.clone()));
        let sessions = Arc::new(SessionRegistry::new(
            cache.clone(),
            config.clone(),
            audit.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(cache.clone(), config.clone(), audit.clone()));
        let tokens = TokenIssuer::new(cache.clone(), config.clone(), sessions.clone(), audit.clone())?;
        let guard = FailedLoginGuard::new(
            store,
            cache,
            limiter.clone(),
            audit.clone(),
            notifier,
            config,
        );

        Ok(Self {
            sessions,
            tokens,
            guard,
            limiter,
            audit,
        })
    }

    pub async fn issue_token_pair(
        &self,
        principal: &Principal,
        fingerprint: &str,
        ip: &str,
    ) -> Result<TokenPair> {
        self.tokens.issue(principal, fingerprint, ip).await
    }

    pub async fn refresh_token_pair(
        &self,
        refresh_token: &str,
        fingerprint: &str,
        ip: &str,
    ) -> Result<TokenPair> {
        self.tokens.refresh(refresh_token, fingerprint, ip).await
    }

    pub async fn validate_token(&self, token: &str, fingerprint: &str, ip: &str) -> bool {
        self.tokens.validate(token, fingerprint, ip).await
    }

    pub async fn security_context(&self, token: &str) -> Result<SecurityContext> {
        self.tokens.security_context(token).await
    }

    pub async fn revoke_token(&self, token: &str, reason: &str) -> Result<()> {
        self.tokens.revoke(token, reason).await
    }

    /// Runs before any credential comparison: an active hard block on the
    /// source or a locked account short-circuits the attempt.
    pub async fn preauth_check(&self, identifier: &str, ip: &str) -> Result<()> {
        if self.limiter.is_blocked(ip).await {
            return Err(Error::RateLimited);
        }
        self.guard.check(identifier).await
    }

    pub async fn record_failed_login(
        &self,
        identifier: &str,
        ip: &str,
        fingerprint: &str,
    ) -> Result<ProtectionResult> {
        self.guard.record_failure(identifier, ip, fingerprint).await
    }

    pub async fn record_successful_login(&self, identifier: &str) -> Result<()> {
        self.guard.record_success(identifier).await
    }

    pub async fn admit_request(&self, key: &str, category: RateCategory) -> bool {
        self.limiter.admit(key, category, 1).await
    }

    pub async fn rate_limit_status(&self, key: &str, category: RateCategory) -> RateLimitStatus {
        self.limiter.status(key, category).await
    }

    pub async fn block(&self, identifier: &str, duration: Duration, reason: &str) {
        self.limiter.block(identifier, duration, reason).await;
    }

    pub async fn invalidate_session(&self, session_id: Uuid, reason: &str) -> Result<()> {
        self.sessions.invalidate(session_id, reason).await
    }

    pub async fn invalidate_all_sessions(&self, principal_id: Uuid, reason: &str) -> Result<()> {
        self.sessions.invalidate_all(principal_id, reason).await
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }
}
