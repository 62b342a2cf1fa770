//! Subsystem configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::SecretString;

use crate::ratelimit::{RateCategory, RateQuota};
use crate::store::PrincipalClass;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(15 * 60);
const DEFAULT_CAPTCHA_THRESHOLD: u32 = 2;
const DEFAULT_BASE_DELAY_SECONDS: u64 = 5;
const DEFAULT_MAX_DELAY_SECONDS: u64 = 60;
const DEFAULT_DELAY_COUNTER_TTL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_SESSION_CAP: usize = 5;
const DEFAULT_IP_FAILURE_THRESHOLD: i64 = 10;
const DEFAULT_IP_FAILURE_WINDOW: Duration = Duration::from_secs(60 * 60);
const DEFAULT_IP_BLOCK_DURATION: Duration = Duration::from_secs(60 * 60);
const DEFAULT_DEVICE_CHANGE_THRESHOLD: usize = 3;
const DEFAULT_DEVICE_CHANGE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_PATTERN_THRESHOLD: i64 = 5;
const DEFAULT_PATTERN_WINDOW: Duration = Duration::from_secs(15 * 60);
const DEFAULT_WINDOW_TTL_BUFFER: Duration = Duration::from_secs(60);

/// Access/refresh token lifetimes for one principal class.
#[derive(Clone, Copy, Debug)]
pub struct TokenTtl {
    pub access: Duration,
    pub refresh: Duration,
}

/// Configuration for every component in the crate.
///
/// Built once at startup and shared. Durations and thresholds default to
/// the values above; the rate-limit quota and token-lifetime tables are
/// closed lookup tables keyed by category and principal class.
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    issuer: String,
    audience: String,
    signing_key: SecretString,
    max_attempts: u32,
    lock_duration: Duration,
    captcha_threshold: u32,
    base_delay_seconds: u64,
    max_delay_seconds: u64,
    delay_counter_ttl: Duration,
    session_cap: usize,
    ip_failure_threshold: i64,
    ip_failure_window: Duration,
    ip_block_duration: Duration,
    device_change_threshold: usize,
    device_change_window: Duration,
    pattern_threshold: i64,
    pattern_window: Duration,
    window_ttl_buffer: Duration,
    quotas: BTreeMap<RateCategory, RateQuota>,
    token_ttls: BTreeMap<PrincipalClass, TokenTtl>,
}

impl SecurityConfig {
    #[must_use]
    pub fn new(issuer: String, audience: String, signing_key: SecretString) -> Self {
        Self {
            issuer,
            audience,
            signing_key,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lock_duration: DEFAULT_LOCK_DURATION,
            captcha_threshold: DEFAULT_CAPTCHA_THRESHOLD,
            base_delay_seconds: DEFAULT_BASE_DELAY_SECONDS,
            max_delay_seconds: DEFAULT_MAX_DELAY_SECONDS,
            delay_counter_ttl: DEFAULT_DELAY_COUNTER_TTL,
            session_cap: DEFAULT_SESSION_CAP,
            ip_failure_threshold: DEFAULT_IP_FAILURE_THRESHOLD,
            ip_failure_window: DEFAULT_IP_FAILURE_WINDOW,
            ip_block_duration: DEFAULT_IP_BLOCK_DURATION,
            device_change_threshold: DEFAULT_DEVICE_CHANGE_THRESHOLD,
            device_change_window: DEFAULT_DEVICE_CHANGE_WINDOW,
            pattern_threshold: DEFAULT_PATTERN_THRESHOLD,
            pattern_window: DEFAULT_PATTERN_WINDOW,
            window_ttl_buffer: DEFAULT_WINDOW_TTL_BUFFER,
            quotas: default_quotas(),
            token_ttls: default_token_ttls(),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = duration;
        self
    }

    #[must_use]
    pub fn with_captcha_threshold(mut self, threshold: u32) -> Self {
        self.captcha_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_session_cap(mut self, cap: usize) -> Self {
        self.session_cap = cap;
        self
    }

    #[must_use]
    pub fn with_quota(mut self, category: RateCategory, quota: RateQuota) -> Self {
        self.quotas.insert(category, quota);
        self
    }

    #[must_use]
    pub fn with_token_ttl(mut self, class: PrincipalClass, ttl: TokenTtl) -> Self {
        self.token_ttls.insert(class, ttl);
        self
    }

    #[must_use]
    pub fn with_ip_failure_threshold(mut self, threshold: i64) -> Self {
        self.ip_failure_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_ip_block_duration(mut self, duration: Duration) -> Self {
        self.ip_block_duration = duration;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    #[must_use]
    pub fn signing_key(&self) -> &SecretString {
        &self.signing_key
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn lock_duration(&self) -> Duration {
        self.lock_duration
    }

    #[must_use]
    pub fn captcha_threshold(&self) -> u32 {
        self.captcha_threshold
    }

    #[must_use]
    pub fn session_cap(&self) -> usize {
        self.session_cap
    }

    /// Progressive delay after `failures` consecutive failures, capped.
    #[must_use]
    pub fn progressive_delay_seconds(&self, failures: u32) -> u64 {
        if failures == 0 {
            return 0;
        }
        let doubled = self
            .base_delay_seconds
            .saturating_mul(1_u64 << (failures - 1).min(32));
        doubled.min(self.max_delay_seconds)
    }

    #[must_use]
    pub fn delay_counter_ttl(&self) -> Duration {
        self.delay_counter_ttl
    }

    #[must_use]
    pub fn ip_failure_threshold(&self) -> i64 {
        self.ip_failure_threshold
    }

    #[must_use]
    pub fn ip_failure_window(&self) -> Duration {
        self.ip_failure_window
    }

    #[must_use]
    pub fn ip_block_duration(&self) -> Duration {
        self.ip_block_duration
    }

    #[must_use]
    pub fn device_change_threshold(&self) -> usize {
        self.device_change_threshold
    }

    #[must_use]
    pub fn device_change_window(&self) -> Duration {
        self.device_change_window
    }

    #[must_use]
    pub fn pattern_threshold(&self) -> i64 {
        self.pattern_threshold
    }

    #[must_use]
    pub fn pattern_window(&self) -> Duration {
        self.pattern_window
    }

    /// Grace added to a window key's TTL so a full window is always covered.
    #[must_use]
    pub fn window_ttl_buffer(&self) -> Duration {
        self.window_ttl_buffer
    }

    #[must_use]
    pub fn quota(&self, category: RateCategory) -> RateQuota {
        self.quotas
            .get(&category)
            .copied()
            .unwrap_or_else(|| fallback_quota(category))
    }

    #[must_use]
    pub fn token_ttl(&self, class: PrincipalClass) -> TokenTtl {
        self.token_ttls
            .get(&class)
            .copied()
            .unwrap_or_else(|| fallback_token_ttl(class))
    }
}

fn default_quotas() -> BTreeMap<RateCategory, RateQuota> {
    RateCategory::ALL
        .iter()
        .map(|category| (*category, fallback_quota(*category)))
        .collect()
}

fn fallback_quota(category: RateCategory) -> RateQuota {
    match category {
        RateCategory::Api => RateQuota {
            limit: 100,
            window: Duration::from_secs(60),
        },
        RateCategory::Login => RateQuota {
            limit: 10,
            window: Duration::from_secs(60 * 60),
        },
        RateCategory::HighValue => RateQuota {
            limit: 10,
            window: Duration::from_secs(60),
        },
        RateCategory::PasswordReset => RateQuota {
            limit: 3,
            window: Duration::from_secs(60 * 60),
        },
        RateCategory::Mfa => RateQuota {
            limit: 5,
            window: Duration::from_secs(15 * 60),
        },
    }
}

fn default_token_ttls() -> BTreeMap<PrincipalClass, TokenTtl> {
    [
        PrincipalClass::Standard,
        PrincipalClass::Service,
        PrincipalClass::Administrative,
    ]
    .iter()
    .map(|class| (*class, fallback_token_ttl(*class)))
    .collect()
}

fn fallback_token_ttl(class: PrincipalClass) -> TokenTtl {
    match class {
        PrincipalClass::Standard => TokenTtl {
            access: Duration::from_secs(15 * 60),
            refresh: Duration::from_secs(7 * 24 * 60 * 60),
        },
        PrincipalClass::Service => TokenTtl {
            access: Duration::from_secs(60 * 60),
            refresh: Duration::from_secs(30 * 24 * 60 * 60),
        },
        PrincipalClass::Administrative => TokenTtl {
            access: Duration::from_secs(10 * 60),
            refresh: Duration::from_secs(12 * 60 * 60),
        },
    }
}
