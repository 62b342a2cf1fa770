//! Security audit trail.
//!
//! Every state transition in the subsystem is recorded through
//! [`AuditLogger::emit`]: a structured log line at a severity-appropriate
//! level, a keyed cache entry for point lookup, and an append-only
//! per-day-per-type list for time-series queries. Emitting never fails from
//! the caller's point of view; sink errors are logged and swallowed so
//! auditing can never break the business path.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use ulid::Ulid;
use uuid::Uuid;

use crate::cache::Cache;

const EVENT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const SERIES_RETENTION: Duration = Duration::from_secs(90 * 24 * 60 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TokenIssued,
    TokenRefreshed,
    TokenRevoked,
    TokenRejected,
    DeviceMismatch,
    LoginFailed,
    LoginSucceeded,
    AccountLocked,
    IpBlocked,
    SuspiciousActivity,
    SessionCreated,
    SessionEvicted,
    SessionInvalidated,
}

impl EventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenIssued => "token_issued",
            Self::TokenRefreshed => "token_refreshed",
            Self::TokenRevoked => "token_revoked",
            Self::TokenRejected => "token_rejected",
            Self::DeviceMismatch => "device_mismatch",
            Self::LoginFailed => "login_failed",
            Self::LoginSucceeded => "login_succeeded",
            Self::AccountLocked => "account_locked",
            Self::IpBlocked => "ip_blocked",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::SessionCreated => "session_created",
            Self::SessionEvicted => "session_evicted",
            Self::SessionInvalidated => "session_invalidated",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub event_type: EventType,
    pub severity: Severity,
    pub principal: Option<String>,
    pub session_id: Option<Uuid>,
    pub fingerprint: Option<String>,
    pub ip: Option<String>,
    pub description: String,
    pub data: Value,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(event_type: EventType, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            event_type,
            severity,
            principal: None,
            session_id: None,
            fingerprint: None,
            ip: None,
            description: description.into(),
            data: Value::Null,
            at: Utc::now(),
        }
    }

    #[must_use]
    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    #[must_use]
    pub fn session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    #[must_use]
    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    #[must_use]
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

fn event_key(id: &str) -> String {
    format!("audit:event:{id}")
}

fn series_key(at: DateTime<Utc>, event_type: EventType) -> String {
    format!("audit:log:{}:{}", at.format("%Y-%m-%d"), event_type.as_str())
}

pub struct AuditLogger {
    cache: Arc<dyn Cache>,
}

impl AuditLogger {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Records an event in all three sinks. Never returns an error.
    pub async fn emit(&self, event: AuditEvent) {
        match event.severity {
            Severity::Info => info!(
                event = event.event_type.as_str(),
                principal = event.principal.as_deref().unwrap_or("-"),
                ip = event.ip.as_deref().unwrap_or("-"),
                "{}",
                event.description
            ),
            Severity::Warning => warn!(
                event = event.event_type.as_str(),
                principal = event.principal.as_deref().unwrap_or("-"),
                ip = event.ip.as_deref().unwrap_or("-"),
                "{}",
                event.description
            ),
            Severity::Critical => error!(
                event = event.event_type.as_str(),
                principal = event.principal.as_deref().unwrap_or("-"),
                ip = event.ip.as_deref().unwrap_or("-"),
                "{}",
                event.description
            ),
        }

        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Failed to serialize audit event: {err}");
                return;
            }
        };

        if let Err(err) = self
            .cache
            .set(&event_key(&event.id), &payload, Some(EVENT_RETENTION))
            .await
        {
            warn!("Failed to persist audit event: {err}");
        }

        let series = series_key(event.at, event.event_type);
        match self.cache.list_push(&series, &payload).await {
            Ok(_) => {
                if let Err(err) = self.cache.expire(&series, SERIES_RETENTION).await {
                    warn!("Failed to set audit series retention: {err}");
                }
            }
            Err(err) => warn!("Failed to append audit series entry: {err}"),
        }
    }

    /// Point lookup of a previously emitted event within its retention.
    /// Returns `None` for unknown ids and on sink errors.
    pub async fn lookup(&self, id: &str) -> Option<AuditEvent> {
        match self.cache.get(&event_key(id)).await {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!("Failed to decode audit event {id}: {err}");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!("Failed to look up audit event {id}: {err}");
                None
            }
        }
    }
}
