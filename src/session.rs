//! Per-principal session registry.
//!
//! Each principal owns a bounded set of session descriptors in the cache:
//! a set of session ids plus one JSON descriptor per session, TTL'd to the
//! session expiry. Expired descriptors are pruned lazily on read; there is
//! no background sweep. Inserting past the cap evicts the single
//! oldest-by-creation-time session and cascades to its refresh-family
//! entry, so a later refresh against that family fails closed on the miss.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLogger, EventType, Severity};
use crate::cache::Cache;
use crate::config::SecurityConfig;
use crate::error::Result;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub family: Uuid,
    pub fingerprint: String,
    pub ip: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    fn remaining_ttl(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.expires_at - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

fn principal_key(principal_id: Uuid) -> String {
    format!("sessions:{principal_id}")
}

fn session_key(session_id: Uuid) -> String {
    format!("session:{session_id}")
}

pub(crate) fn family_key(family: Uuid) -> String {
    format!("refresh_family:{family}")
}

pub struct SessionRegistry {
    cache: Arc<dyn Cache>,
    config: Arc<SecurityConfig>,
    audit: Arc<AuditLogger>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>, config: Arc<SecurityConfig>, audit: Arc<AuditLogger>) -> Self {
        Self { cache, config, audit }
    }

    /// Inserts a session and enforces the per-principal cap, evicting the
    /// oldest session (and its refresh family) on overflow.
    pub async fn create(&self, session: Session) -> Result<()> {
        let now = Utc::now();
        let payload = serde_json::to_string(&session)
            .map_err(|err| crate::Error::TokenInvalid(format!("session encoding: {err}")))?;
        self.cache
            .set(
                &session_key(session.id),
                &payload,
                Some(session.remaining_ttl(now)),
            )
            .await?;
        let set_key = principal_key(session.principal_id);
        self.cache
            .set_add(&set_key, &session.id.to_string())
            .await?;
        // The newest session always has the furthest expiry, so its TTL
        // covers the whole set.
        self.cache
            .expire(&set_key, session.remaining_ttl(now))
            .await?;

        self.audit
            .emit(
                AuditEvent::new(EventType::SessionCreated, Severity::Info, "session created")
                    .principal(session.principal_id.to_string())
                    .session(session.id)
                    .fingerprint(session.fingerprint.clone())
                    .ip(session.ip.clone()),
            )
            .await;

        // Snapshot of the live set; an insert racing this pass is picked up
        // by the re-evaluation on the next create.
        let active = self.get_active(session.principal_id).await?;
        if active.len() > self.config.session_cap() {
            if let Some(oldest) = active.iter().min_by_key(|session| session.created_at) {
                self.remove(oldest, EventType::SessionEvicted, "session cap exceeded")
                    .await?;
            }
        }

        Ok(())
    }

    /// Live sessions for a principal. Dangling ids and expired descriptors
    /// are dropped from the set as they are discovered.
    pub async fn get_active(&self, principal_id: Uuid) -> Result<Vec<Session>> {
        let now = Utc::now();
        let members = self.cache.set_members(&principal_key(principal_id)).await?;

        let mut sessions = Vec::with_capacity(members.len());
        for member in members {
            match self.cache.get(&session_key_for(&member)).await? {
                Some(payload) => match serde_json::from_str::<Session>(&payload) {
                    Ok(session) if !session.is_expired(now) => sessions.push(session),
                    Ok(session) => {
                        self.cache.delete(&session_key(session.id)).await?;
                        self.cache
                            .set_remove(&principal_key(principal_id), &member)
                            .await?;
                    }
                    Err(err) => {
                        warn!("Dropping undecodable session descriptor {member}: {err}");
                        self.cache
                            .set_remove(&principal_key(principal_id), &member)
                            .await?;
                    }
                },
                None => {
                    // Descriptor TTL'd away; prune the dangling id.
                    self.cache
                        .set_remove(&principal_key(principal_id), &member)
                        .await?;
                }
            }
        }
        Ok(sessions)
    }

    pub async fn get(&self, session_id: Uuid) -> Result<Option<Session>> {
        match self.cache.get(&session_key(session_id)).await? {
            Some(payload) => match serde_json::from_str::<Session>(&payload) {
                Ok(session) if !session.is_expired(Utc::now()) => Ok(Some(session)),
                Ok(_) => Ok(None),
                Err(err) => {
                    warn!("Failed to decode session {session_id}: {err}");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Removes a session and deletes its refresh-family entry. A refresh
    /// racing this call observes the family miss and fails closed.
    pub async fn invalidate(&self, session_id: Uuid, reason: &str) -> Result<()> {
        let Some(session) = self.get(session_id).await? else {
            debug!("Session {session_id} already gone");
            return Ok(());
        };
        self.remove(&session, EventType::SessionInvalidated, reason).await
    }

    /// Removes every active session for a principal (password change,
    /// compromise response).
    pub async fn invalidate_all(&self, principal_id: Uuid, reason: &str) -> Result<()> {
        for session in self.get_active(principal_id).await? {
            self.remove(&session, EventType::SessionInvalidated, reason)
                .await?;
        }
        Ok(())
    }

    /// Rewrites a session descriptor after rotation or activity, keeping
    /// the set membership as-is.
    pub(crate) async fn store(&self, session: &Session) -> Result<()> {
        let payload = serde_json::to_string(session)
            .map_err(|err| crate::Error::TokenInvalid(format!("session encoding: {err}")))?;
        self.cache
            .set(
                &session_key(session.id),
                &payload,
                Some(session.remaining_ttl(Utc::now())),
            )
            .await?;
        Ok(())
    }

    /// Best-effort `last_activity` bump; failures are logged, not raised.
    pub async fn touch(&self, session_id: Uuid) {
        let result = async {
            if let Some(mut session) = self.get(session_id).await? {
                session.last_activity = Utc::now();
                self.store(&session).await?;
            }
            Ok::<(), crate::Error>(())
        }
        .await;

        if let Err(err) = result {
            debug!("Failed to touch session {session_id}: {err}");
        }
    }

    async fn remove(&self, session: &Session, event: EventType, reason: &str) -> Result<()> {
        self.cache.delete(&session_key(session.id)).await?;
        self.cache
            .set_remove(&principal_key(session.principal_id), &session.id.to_string())
            .await?;
        self.cache.delete(&family_key(session.family)).await?;

        self.audit
            .emit(
                AuditEvent::new(event, Severity::Info, reason)
                    .principal(session.principal_id.to_string())
                    .session(session.id)
                    .ip(session.ip.clone()),
            )
            .await;
        Ok(())
    }
}

fn session_key_for(member: &str) -> String {
    format!("session:{member}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use anyhow::Result;
    use secrecy::SecretString;
    use std::time::Duration;

    struct Fixture {
        registry: SessionRegistry,
        cache: Arc<MemoryCache>,
    }

    fn fixture(cap: usize) -> Fixture {
        let cache = Arc::new(MemoryCache::new());
        let config = Arc::new(
            SecurityConfig::new(
                "https://issuer.test".to_string(),
                "gardi".to_string(),
                SecretString::from("key".to_string()),
            )
            .with_session_cap(cap),
        );
        let audit = Arc::new(AuditLogger::new(cache.clone()));
        Fixture {
            registry: SessionRegistry::new(cache.clone(), config, audit),
            cache,
        }
    }

    fn session(principal_id: Uuid, created_offset_secs: i64) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            principal_id,
            family: Uuid::new_v4(),
            fingerprint: "fp-1".to_string(),
            ip: "203.0.113.10".to_string(),
            created_at: now + chrono::Duration::seconds(created_offset_secs),
            last_activity: now,
            expires_at: now + chrono::Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn create_and_read_back() -> Result<()> {
        let fixture = fixture(5);
        let principal = Uuid::new_v4();
        let session = session(principal, 0);
        let id = session.id;

        fixture.registry.create(session).await?;

        let active = fixture.registry.get_active(principal).await?;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id);
        Ok(())
    }

    #[tokio::test]
    async fn cap_overflow_evicts_exactly_the_oldest() -> Result<()> {
        let fixture = fixture(3);
        let principal = Uuid::new_v4();

        let oldest = session(principal, -300);
        let oldest_id = oldest.id;
        let oldest_family = oldest.family;
        fixture
            .cache
            .set(&family_key(oldest_family), "refresh-jti", None)
            .await?;
        fixture.registry.create(oldest).await?;

        let mut kept = Vec::new();
        for offset in [-200, -100, 0] {
            let session = session(principal, offset);
            kept.push(session.id);
            fixture.registry.create(session).await?;
        }

        let active = fixture.registry.get_active(principal).await?;
        assert_eq!(active.len(), 3);
        assert!(active.iter().all(|session| session.id != oldest_id));
        for id in kept {
            assert!(active.iter().any(|session| session.id == id));
        }

        // Cascade: the evicted session's refresh family is gone too.
        assert!(!fixture.cache.has_key(&family_key(oldest_family)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn get_active_prunes_expired_sessions_lazily() -> Result<()> {
        let fixture = fixture(5);
        let principal = Uuid::new_v4();

        let mut short = session(principal, 0);
        short.expires_at = Utc::now() + chrono::Duration::milliseconds(30);
        fixture.registry.create(short).await?;
        fixture.registry.create(session(principal, 1)).await?;

        tokio::time::sleep(Duration::from_millis(60)).await;

        let active = fixture.registry.get_active(principal).await?;
        assert_eq!(active.len(), 1);

        // The dangling id was removed from the principal set as well.
        let members = fixture
            .cache
            .set_members(&principal_key(principal))
            .await?;
        assert_eq!(members.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn invalidate_removes_session_and_family() -> Result<()> {
        let fixture = fixture(5);
        let principal = Uuid::new_v4();
        let session = session(principal, 0);
        let id = session.id;
        let family = session.family;
        fixture
            .cache
            .set(&family_key(family), "refresh-jti", None)
            .await?;

        fixture.registry.create(session).await?;
        fixture.registry.invalidate(id, "logout").await?;

        assert!(fixture.registry.get_active(principal).await?.is_empty());
        assert!(!fixture.cache.has_key(&family_key(family)).await?);

        // Idempotent on a session that is already gone.
        fixture.registry.invalidate(id, "logout").await?;
        Ok(())
    }

    #[tokio::test]
    async fn invalidate_all_clears_every_session() -> Result<()> {
        let fixture = fixture(5);
        let principal = Uuid::new_v4();
        for offset in [-2, -1, 0] {
            fixture.registry.create(session(principal, offset)).await?;
        }

        fixture
            .registry
            .invalidate_all(principal, "password change")
            .await?;
        assert!(fixture.registry.get_active(principal).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn touch_updates_last_activity() -> Result<()> {
        let fixture = fixture(5);
        let principal = Uuid::new_v4();
        let session = session(principal, 0);
        let id = session.id;
        let before = session.last_activity;
        fixture.registry.create(session).await?;

        tokio::time::sleep(Duration::from_millis(20)).await;
        fixture.registry.touch(id).await;

        let found = fixture
            .registry
            .get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("session should exist"))?;
        assert!(found.last_activity > before);
        Ok(())
    }
}
