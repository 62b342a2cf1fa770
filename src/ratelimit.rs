//! Sliding-window admission control.
//!
//! Windows are per-key score-ordered sets of event timestamps; pruning
//! happens inline on every admission check, and the key's TTL covers one
//! full window plus a buffer, so the cache is the only cleanup mechanism.
//! Admission fails open on cache errors: availability wins over strict
//! enforcement here. The explicit hard-block layer sits above the window
//! and is used once abuse thresholds are crossed elsewhere.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::audit::{AuditEvent, AuditLogger, EventType, Severity};
use crate::cache::{Cache, CacheResult};
use crate::config::SecurityConfig;

/// Closed set of admission categories. Quotas live in the
/// [`SecurityConfig`] lookup table, keyed by this tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateCategory {
    Api,
    Login,
    HighValue,
    PasswordReset,
    Mfa,
}

impl RateCategory {
    pub const ALL: &'static [Self] = &[
        Self::Api,
        Self::Login,
        Self::HighValue,
        Self::PasswordReset,
        Self::Mfa,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Login => "login",
            Self::HighValue => "high_value",
            Self::PasswordReset => "password_reset",
            Self::Mfa => "mfa",
        }
    }
}

/// Limit and window length for one category.
#[derive(Clone, Copy, Debug)]
pub struct RateQuota {
    pub limit: u32,
    pub window: Duration,
}

/// Read-only snapshot of a window, as exposed to callers.
#[derive(Clone, Debug)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
    pub blocked: bool,
}

fn window_key(category: RateCategory, key: &str) -> String {
    format!("ratelimit:{}:{key}", category.as_str())
}

fn block_key(identifier: &str) -> String {
    format!("blocked:{identifier}")
}

/// Unique member for one admitted event: timestamp plus random suffix so
/// concurrent events at the same millisecond never collide.
fn window_member(now_ms: i64) -> String {
    let mut suffix = [0u8; 6];
    if OsRng.try_fill_bytes(&mut suffix).is_err() {
        return format!("{now_ms}-{}", uuid::Uuid::new_v4());
    }
    format!("{now_ms}-{}", URL_SAFE_NO_PAD.encode(suffix))
}

pub struct RateLimiter {
    cache: Arc<dyn Cache>,
    config: Arc<SecurityConfig>,
    audit: Arc<AuditLogger>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>, config: Arc<SecurityConfig>, audit: Arc<AuditLogger>) -> Self {
        Self { cache, config, audit }
    }

    /// Admission check: prunes events older than the window, admits when
    /// `count + cost` fits the quota, then records `cost` events. Cache
    /// errors fail open.
    pub async fn admit(&self, key: &str, category: RateCategory, cost: u32) -> bool {
        match self.try_admit(key, category, cost).await {
            Ok(admitted) => admitted,
            Err(err) => {
                error!("Rate limit check failed, allowing request: {err}");
                true
            }
        }
    }

    async fn try_admit(&self, key: &str, category: RateCategory, cost: u32) -> CacheResult<bool> {
        if self.is_blocked(key).await {
            return Ok(false);
        }

        let quota = self.config.quota(category);
        let window_ms = quota.window.as_millis() as i64;
        let now_ms = Utc::now().timestamp_millis();
        let window_key = window_key(category, key);

        self.cache
            .sorted_remove_range(&window_key, f64::MIN, (now_ms - window_ms) as f64)
            .await?;
        let current = self
            .cache
            .sorted_count(&window_key, f64::MIN, f64::MAX)
            .await?;

        if current + u64::from(cost) > u64::from(quota.limit) {
            debug!(
                key,
                category = category.as_str(),
                current,
                limit = quota.limit,
                "rate limit exceeded"
            );
            return Ok(false);
        }

        for _ in 0..cost {
            self.cache
                .sorted_add(&window_key, &window_member(now_ms), now_ms as f64)
                .await?;
        }
        self.cache
            .expire(&window_key, quota.window + self.config.window_ttl_buffer())
            .await?;

        Ok(true)
    }

    /// Pure read of the window state; mutates nothing.
    pub async fn status(&self, key: &str, category: RateCategory) -> RateLimitStatus {
        let quota = self.config.quota(category);
        let window_ms = quota.window.as_millis() as i64;
        let now_ms = Utc::now().timestamp_millis();
        let window_start = (now_ms - window_ms) as f64;
        let window_key = window_key(category, key);

        let blocked = self.is_blocked(key).await;
        let (current, oldest) = match self.read_window(&window_key, window_start).await {
            Ok(read) => read,
            Err(err) => {
                error!("Rate limit status read failed: {err}");
                (0, None)
            }
        };

        let reset_ms = oldest.map_or(now_ms, |score| score as i64 + window_ms);
        RateLimitStatus {
            limit: quota.limit,
            remaining: quota.limit.saturating_sub(current.min(u64::from(u32::MAX)) as u32),
            reset_time: Utc
                .timestamp_millis_opt(reset_ms)
                .single()
                .unwrap_or_else(Utc::now),
            blocked,
        }
    }

    async fn read_window(
        &self,
        window_key: &str,
        window_start: f64,
    ) -> CacheResult<(u64, Option<f64>)> {
        let current = self
            .cache
            .sorted_count(window_key, window_start, f64::MAX)
            .await?;
        let oldest = self
            .cache
            .sorted_min_score(window_key, window_start, f64::MAX)
            .await?;
        Ok((current, oldest))
    }

    /// Hard block, independent of any sliding window.
    pub async fn block(&self, identifier: &str, duration: Duration, reason: &str) {
        if let Err(err) = self
            .cache
            .set(&block_key(identifier), reason, Some(duration))
            .await
        {
            error!("Failed to store hard block for {identifier}: {err}");
            return;
        }

        self.audit
            .emit(
                AuditEvent::new(
                    EventType::IpBlocked,
                    Severity::Critical,
                    format!("hard block applied: {reason}"),
                )
                .ip(identifier)
                .data(serde_json::json!({
                    "duration_seconds": duration.as_secs(),
                    "reason": reason,
                })),
            )
            .await;
    }

    /// Whether an explicit hard block is active. Fails open.
    pub async fn is_blocked(&self, identifier: &str) -> bool {
        match self.cache.has_key(&block_key(identifier)).await {
            Ok(blocked) => blocked,
            Err(err) => {
                warn!("Hard block check failed, allowing {identifier}: {err}");
                false
            }
        }
    }
}
