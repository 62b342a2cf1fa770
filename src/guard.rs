//! Failed-login guard.
//!
//! Per-principal lockout state machine: NORMAL → WARNED → CAPTCHA_REQUIRED
//! → LOCKED → NORMAL. The persisted attempt counter on the credential
//! record is the lockout authority; the progressive-delay counter lives
//! only in the cache and pages out on its own TTL. Unknown identifiers are
//! tracked against the per-IP and pattern counters so responses never
//! reveal whether an account exists, but they can never lock anything.
//!
//! Two concurrent failures may both observe `count == max - 1` and both
//! apply the lock; the lock write is an idempotent timestamp overwrite, so
//! this is harmless.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::audit::{AuditEvent, AuditLogger, EventType, Severity};
use crate::cache::Cache;
use crate::config::SecurityConfig;
use crate::error::{Error, Result};
use crate::ratelimit::RateLimiter;
use crate::store::{AccountStatus, CredentialStore, normalize_identifier};
use crate::token::fingerprint_digest;

const GENERIC_FAILURE_MESSAGE: &str = "Invalid credentials";

/// Outcome of recording one failed login attempt.
#[derive(Clone, Debug)]
pub struct ProtectionResult {
    pub locked: bool,
    pub lock_until: Option<DateTime<Utc>>,
    pub delay_seconds: u64,
    pub requires_captcha: bool,
    pub remaining_attempts: u32,
    pub message: String,
}

/// Outbound notification seam for lockout events.
pub trait Notifier: Send + Sync {
    fn account_locked(&self, identifier: &str, until: DateTime<Utc>);
}

#[derive(Clone, Debug)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn account_locked(&self, _identifier: &str, _until: DateTime<Utc>) {}
}

fn delay_key(identifier: &str) -> String {
    format!("login_delay:{identifier}")
}

fn ip_key(ip: &str) -> String {
    format!("login_fail_ip:{ip}")
}

fn device_key(identifier: &str) -> String {
    format!("login_fail_devices:{identifier}")
}

fn pattern_key(identifier: &str) -> String {
    format!("login_fail_pattern:{identifier}")
}

pub struct FailedLoginGuard {
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn Cache>,
    limiter: Arc<RateLimiter>,
    audit: Arc<AuditLogger>,
    notifier: Arc<dyn Notifier>,
    config: Arc<SecurityConfig>,
}

impl FailedLoginGuard {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn Cache>,
        limiter: Arc<RateLimiter>,
        audit: Arc<AuditLogger>,
        notifier: Arc<dyn Notifier>,
        config: Arc<SecurityConfig>,
    ) -> Self {
        Self {
            store,
            cache,
            limiter,
            audit,
            notifier,
            config,
        }
    }

    /// Pre-credential check a login handler runs first: locked accounts are
    /// rejected before any credential comparison happens. Unknown
    /// identifiers pass so the response cannot be used to probe accounts;
    /// an expired lock reports clear and is reset on the next success.
    pub async fn check(&self, identifier: &str) -> Result<()> {
        let normalized = normalize_identifier(identifier);
        let Some(record) = self.store.find_by_identifier(&normalized).await? else {
            return Ok(());
        };

        match record.status {
            AccountStatus::Locked => {
                if let Some(until) = record.locked_until {
                    if until > Utc::now() {
                        return Err(Error::AccountLocked { until });
                    }
                }
                Ok(())
            }
            AccountStatus::Suspended => Err(Error::AuthenticationFailure),
            AccountStatus::Active | AccountStatus::PendingVerification => Ok(()),
        }
    }

    /// Records a failed attempt and advances the state machine.
    pub async fn record_failure(
        &self,
        identifier: &str,
        ip: &str,
        fingerprint: &str,
    ) -> Result<ProtectionResult> {
        let normalized = normalize_identifier(identifier);
        self.track_secondary_counters(&normalized, ip, fingerprint).await;

        let Some(mut record) = self.store.find_by_identifier(&normalized).await? else {
            // No account to lock; keep the response shape identical.
            let count = self.bump_delay_counter(&normalized).await;
            self.audit
                .emit(
                    AuditEvent::new(
                        EventType::LoginFailed,
                        Severity::Warning,
                        "failed login for unknown identifier",
                    )
                    .principal(normalized.clone())
                    .fingerprint(fingerprint_digest(fingerprint))
                    .ip(ip),
                )
                .await;
            return Ok(self.throttled_result(count));
        };

        record.attempt_count += 1;

        if record.attempt_count >= self.config.max_attempts() {
            let until = Utc::now()
                + chrono::Duration::from_std(self.config.lock_duration()).unwrap_or_default();
            record.locked_until = Some(until);
            record.status = AccountStatus::Locked;
            self.store.save(&record).await?;

            self.audit
                .emit(
                    AuditEvent::new(
                        EventType::AccountLocked,
                        Severity::Critical,
                        "account locked after repeated failures",
                    )
                    .principal(record.principal_id.to_string())
                    .fingerprint(fingerprint_digest(fingerprint))
                    .ip(ip)
                    .data(serde_json::json!({
                        "attempts": record.attempt_count,
                        "locked_until": until,
                    })),
                )
                .await;
            self.notifier.account_locked(&normalized, until);

            return Ok(ProtectionResult {
                locked: true,
                lock_until: Some(until),
                delay_seconds: 0,
                requires_captcha: false,
                remaining_attempts: 0,
                message: format!("Account locked until {until}"),
            });
        }

        self.store.save(&record).await?;
        let delay_count = self.bump_delay_counter(&normalized).await;
        let delay_seconds = self.config.progressive_delay_seconds(delay_count);
        let requires_captcha = record.attempt_count >= self.config.captcha_threshold();

        self.audit
            .emit(
                AuditEvent::new(EventType::LoginFailed, Severity::Warning, "failed login")
                    .principal(record.principal_id.to_string())
                    .fingerprint(fingerprint_digest(fingerprint))
                    .ip(ip)
                    .data(serde_json::json!({ "attempts": record.attempt_count })),
            )
            .await;

        Ok(ProtectionResult {
            locked: false,
            lock_until: None,
            delay_seconds,
            requires_captcha,
            remaining_attempts: self.config.max_attempts() - record.attempt_count,
            message: GENERIC_FAILURE_MESSAGE.to_string(),
        })
    }

    /// Resets the state machine after a successful authentication: the
    /// persisted counter goes back to zero and the transient cache keys are
    /// dropped. A lock is cleared only when this guard applied it (the
    /// marker is `locked_until`); suspensions stay untouched.
    pub async fn record_success(&self, identifier: &str) -> Result<()> {
        let normalized = normalize_identifier(identifier);

        for key in [delay_key(&normalized), pattern_key(&normalized)] {
            if let Err(err) = self.cache.delete(&key).await {
                warn!("Failed to clear login counter {key}: {err}");
            }
        }

        if let Some(mut record) = self.store.find_by_identifier(&normalized).await? {
            record.attempt_count = 0;
            if record.status == AccountStatus::Locked && record.locked_until.is_some() {
                record.status = AccountStatus::Active;
                record.locked_until = None;
            }
            self.store.save(&record).await?;

            self.audit
                .emit(
                    AuditEvent::new(EventType::LoginSucceeded, Severity::Info, "successful login")
                        .principal(record.principal_id.to_string()),
                )
                .await;
        }

        Ok(())
    }

    /// Cache-only counters with independent TTLs. These never require
    /// cleanup and never block the primary path: errors are logged and the
    /// attempt proceeds.
    async fn track_secondary_counters(&self, identifier: &str, ip: &str, fingerprint: &str) {
        let ip_key = ip_key(ip);
        match self.cache.increment(&ip_key, 1).await {
            Ok(count) => {
                if count == 1 {
                    if let Err(err) = self
                        .cache
                        .expire(&ip_key, self.config.ip_failure_window())
                        .await
                    {
                        warn!("Failed to set TTL on {ip_key}: {err}");
                    }
                }
                if count == self.config.ip_failure_threshold() {
                    self.limiter
                        .block(ip, self.config.ip_block_duration(), "excessive failed logins")
                        .await;
                }
            }
            Err(err) => warn!("Failed to track failures for ip {ip}: {err}"),
        }

        let device_key = device_key(identifier);
        let digest = fingerprint_digest(fingerprint);
        match self.cache.set_add(&device_key, &digest).await {
            Ok(_) => match self.cache.set_members(&device_key).await {
                Ok(members) => {
                    if members.len() == 1 {
                        if let Err(err) = self
                            .cache
                            .expire(&device_key, self.config.device_change_window())
                            .await
                        {
                            warn!("Failed to set TTL on {device_key}: {err}");
                        }
                    }
                    if members.len() >= self.config.device_change_threshold() {
                        self.flag_suspicious(identifier, ip, "failures from multiple devices")
                            .await;
                    }
                }
                Err(err) => warn!("Failed to read device set for {identifier}: {err}"),
            },
            Err(err) => warn!("Failed to track device variety for {identifier}: {err}"),
        }

        let pattern_key = pattern_key(identifier);
        match self.cache.increment(&pattern_key, 1).await {
            Ok(count) => {
                if count == 1 {
                    if let Err(err) = self
                        .cache
                        .expire(&pattern_key, self.config.pattern_window())
                        .await
                    {
                        warn!("Failed to set TTL on {pattern_key}: {err}");
                    }
                }
                if count >= self.config.pattern_threshold() {
                    self.flag_suspicious(identifier, ip, "high-velocity failure pattern")
                        .await;
                }
            }
            Err(err) => warn!("Failed to track failure pattern for {identifier}: {err}"),
        }
    }

    async fn flag_suspicious(&self, identifier: &str, ip: &str, description: &str) {
        self.audit
            .emit(
                AuditEvent::new(EventType::SuspiciousActivity, Severity::Warning, description)
                    .principal(identifier)
                    .ip(ip),
            )
            .await;
    }

    /// Advances the cache-only delay counter. Falls back to a single step
    /// when the cache is unavailable so failures are still slowed down.
    async fn bump_delay_counter(&self, identifier: &str) -> u32 {
        let key = delay_key(identifier);
        match self.cache.increment(&key, 1).await {
            Ok(count) => {
                if count == 1 {
                    if let Err(err) = self.cache.expire(&key, self.config.delay_counter_ttl()).await
                    {
                        warn!("Failed to set TTL on {key}: {err}");
                    }
                }
                u32::try_from(count).unwrap_or(u32::MAX)
            }
            Err(err) => {
                warn!("Failed to advance delay counter for {identifier}: {err}");
                1
            }
        }
    }

    fn throttled_result(&self, count: u32) -> ProtectionResult {
        ProtectionResult {
            locked: false,
            lock_until: None,
            delay_seconds: self.config.progressive_delay_seconds(count),
            requires_captcha: count >= self.config.captcha_threshold(),
            remaining_attempts: self.config.max_attempts().saturating_sub(count),
            message: GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}
