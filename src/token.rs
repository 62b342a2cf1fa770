//! Token issuance, validation, rotation, and revocation.
//!
//! Tokens are compact HS256-signed JWTs carrying a flat claim set. Each
//! access/refresh pair shares a family id; the cache holds the single
//! currently-valid refresh `jti` per family, which makes rotation
//! single-use: presenting an already-rotated refresh token misses or
//! mismatches the stored entry and is rejected. Revocation blacklists a
//! token id for exactly its remaining natural lifetime, so the TTL is the
//! only cleanup the blacklist ever needs.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLogger, EventType, Severity};
use crate::config::SecurityConfig;
use crate::error::{Error, Result};
use crate::cache::Cache;
use crate::session::{Session, SessionRegistry, family_key};
use crate::store::{Principal, PrincipalClass};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Flat claim set shared by both token types.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    /// Session id.
    pub sid: Uuid,
    /// Token family id, stable across rotations.
    pub fam: Uuid,
    /// Device fingerprint digest the pair was issued to.
    pub dfp: String,
    /// Issuing client IP.
    pub ip: String,
    pub typ: TokenType,
    pub roles: Vec<String>,
    pub cls: PrincipalClass,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    /// Unique token id; blacklist key on revocation.
    pub jti: Uuid,
}

#[derive(Clone, Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: Uuid,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

/// Verified request context extracted from a valid access token.
#[derive(Clone, Debug)]
pub struct SecurityContext {
    pub subject: String,
    pub roles: Vec<String>,
    pub session_id: Uuid,
    pub class: PrincipalClass,
    pub expires_at: DateTime<Utc>,
}

/// Digest of a client-presented device fingerprint. A weak continuity
/// signal, not a security boundary; hashed so raw client characteristics
/// never land in claims or cache keys.
#[must_use]
pub fn fingerprint_digest(fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn blacklist_key(jti: Uuid) -> String {
    format!("blacklist:{jti}")
}

pub struct TokenIssuer {
    cache: Arc<dyn Cache>,
    config: Arc<SecurityConfig>,
    sessions: Arc<SessionRegistry>,
    audit: Arc<AuditLogger>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenIssuer {
    /// Builds the issuer from the configured signing key.
    ///
    /// # Errors
    /// Returns `Error::Config` when no signing key is configured. A missing
    /// key is a rejected startup configuration, never substituted with an
    /// ephemeral one: that would break verification across instances.
    pub fn new(
        cache: Arc<dyn Cache>,
        config: Arc<SecurityConfig>,
        sessions: Arc<SessionRegistry>,
        audit: Arc<AuditLogger>,
    ) -> Result<Self> {
        let secret = config.signing_key().expose_secret();
        if secret.trim().is_empty() {
            return Err(Error::Config(
                "token signing key must be configured".to_string(),
            ));
        }
        let encoding_key = EncodingKey::from_secret(secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(secret.as_bytes());
        Ok(Self {
            cache,
            config,
            sessions,
            audit,
            encoding_key,
            decoding_key,
        })
    }

    /// Mints a new token pair in a fresh family, registers the session, and
    /// stores the family's current refresh id.
    pub async fn issue(
        &self,
        principal: &Principal,
        fingerprint: &str,
        ip: &str,
    ) -> Result<TokenPair> {
        let now = Utc::now();
        let ttl = self.config.token_ttl(principal.class);
        let session_id = Uuid::new_v4();
        let family = Uuid::new_v4();
        let dfp = fingerprint_digest(fingerprint);

        let pair = self.encode_pair(
            &principal.id.to_string(),
            &principal.roles,
            principal.class,
            session_id,
            family,
            &dfp,
            ip,
            now,
            ttl.access,
            ttl.refresh,
        )?;

        let session = Session {
            id: session_id,
            principal_id: principal.id,
            family,
            fingerprint: dfp,
            ip: ip.to_string(),
            created_at: now,
            last_activity: now,
            expires_at: now + chrono::Duration::from_std(ttl.refresh).unwrap_or_default(),
        };
        self.sessions.create(session).await?;
        self.cache
            .set(&family_key(family), &pair.refresh_jti.to_string(), Some(ttl.refresh))
            .await?;

        self.audit
            .emit(
                AuditEvent::new(EventType::TokenIssued, Severity::Info, "token pair issued")
                    .principal(principal.id.to_string())
                    .session(session_id)
                    .ip(ip),
            )
            .await;

        Ok(TokenPair {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            session_id,
            expires_in: ttl.access.as_secs(),
        })
    }

    /// Rotates a refresh token into a new pair within the same family.
    ///
    /// Single-use per family: the presented token must match the stored
    /// family entry exactly, and unlike validation the device fingerprint
    /// must match the original. Both checks fail closed, including on cache
    /// errors; replay safety wins over availability on this path.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        fingerprint: &str,
        ip: &str,
    ) -> Result<TokenPair> {
        let claims = self.decode_claims(refresh_token, true)?;
        if claims.typ != TokenType::Refresh {
            self.reject(&claims, ip, "non-refresh token presented for rotation")
                .await;
            return Err(Error::TokenInvalid("not a refresh token".to_string()));
        }

        if claims.dfp != fingerprint_digest(fingerprint) {
            self.audit
                .emit(
                    AuditEvent::new(
                        EventType::DeviceMismatch,
                        Severity::Critical,
                        "device fingerprint mismatch during refresh",
                    )
                    .principal(claims.sub.clone())
                    .session(claims.sid)
                    .ip(ip),
                )
                .await;
            return Err(Error::DeviceMismatch);
        }

        match self.cache.get(&family_key(claims.fam)).await? {
            Some(stored) if stored == claims.jti.to_string() => {}
            Some(_) => {
                self.reject(&claims, ip, "refresh token reuse detected").await;
                return Err(Error::TokenInvalid(
                    "refresh token already rotated".to_string(),
                ));
            }
            None => {
                self.reject(&claims, ip, "refresh token family no longer active")
                    .await;
                return Err(Error::TokenInvalid(
                    "refresh token no longer valid".to_string(),
                ));
            }
        }

        let Some(mut session) = self.sessions.get(claims.sid).await? else {
            self.reject(&claims, ip, "session missing during refresh").await;
            return Err(Error::TokenInvalid("session no longer active".to_string()));
        };

        let now = Utc::now();
        let ttl = self.config.token_ttl(claims.cls);
        let pair = self.encode_pair(
            &claims.sub,
            &claims.roles,
            claims.cls,
            claims.sid,
            claims.fam,
            &claims.dfp,
            ip,
            now,
            ttl.access,
            ttl.refresh,
        )?;

        self.cache.delete(&family_key(claims.fam)).await?;
        self.cache
            .set(
                &family_key(claims.fam),
                &pair.refresh_jti.to_string(),
                Some(ttl.refresh),
            )
            .await?;

        session.last_activity = now;
        session.expires_at = now + chrono::Duration::from_std(ttl.refresh).unwrap_or_default();
        session.ip = ip.to_string();
        self.sessions.store(&session).await?;

        self.audit
            .emit(
                AuditEvent::new(EventType::TokenRefreshed, Severity::Info, "token pair rotated")
                    .principal(claims.sub.clone())
                    .session(claims.sid)
                    .ip(ip),
            )
            .await;

        Ok(TokenPair {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            session_id: claims.sid,
            expires_in: ttl.access.as_secs(),
        })
    }

    /// Validates an access token: signature, expiry, not-before, type, and
    /// blacklist. A fingerprint mismatch is audited but tolerated so
    /// roaming clients keep working; the blacklist check fails open.
    pub async fn validate(&self, token: &str, fingerprint: &str, ip: &str) -> bool {
        let claims = match self.decode_claims(token, true) {
            Ok(claims) => claims,
            Err(err) => {
                debug!("Token validation failed: {err}");
                return false;
            }
        };

        if claims.typ != TokenType::Access {
            debug!("Non-access token presented as bearer");
            return false;
        }

        if claims.iat > Utc::now().timestamp() {
            self.reject(&claims, ip, "token issued-at is in the future").await;
            return false;
        }

        match self.cache.has_key(&blacklist_key(claims.jti)).await {
            Ok(true) => {
                debug!("Rejected blacklisted token {}", claims.jti);
                return false;
            }
            Ok(false) => {}
            Err(err) => {
                warn!("Blacklist check failed, allowing token: {err}");
            }
        }

        if claims.dfp != fingerprint_digest(fingerprint) {
            self.audit
                .emit(
                    AuditEvent::new(
                        EventType::DeviceMismatch,
                        Severity::Warning,
                        "device fingerprint changed since issuance",
                    )
                    .principal(claims.sub.clone())
                    .session(claims.sid)
                    .ip(ip),
                )
                .await;
        }

        self.sessions.touch(claims.sid).await;
        true
    }

    /// Extracts the verified context from a valid access token.
    pub async fn security_context(&self, token: &str) -> Result<SecurityContext> {
        let claims = self.decode_claims(token, true)?;
        if claims.typ != TokenType::Access {
            return Err(Error::TokenInvalid("not an access token".to_string()));
        }

        match self.cache.has_key(&blacklist_key(claims.jti)).await {
            Ok(true) => return Err(Error::TokenInvalid("token revoked".to_string())),
            Ok(false) => {}
            Err(err) => warn!("Blacklist check failed, allowing token: {err}"),
        }

        Ok(SecurityContext {
            subject: claims.sub,
            roles: claims.roles,
            session_id: claims.sid,
            class: claims.cls,
            expires_at: Utc
                .timestamp_opt(claims.exp, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }

    /// Blacklists a token for exactly its remaining lifetime. Revoking an
    /// already-expired token is a no-op: it can never validate again, so it
    /// is never stored.
    pub async fn revoke(&self, token: &str, reason: &str) -> Result<()> {
        let claims = self.decode_claims(token, false)?;
        let remaining = claims.exp - Utc::now().timestamp();
        if remaining <= 0 {
            debug!("Skipping revocation of expired token {}", claims.jti);
            return Ok(());
        }

        self.cache
            .set(
                &blacklist_key(claims.jti),
                reason,
                Some(Duration::from_secs(remaining as u64)),
            )
            .await?;

        self.audit
            .emit(
                AuditEvent::new(EventType::TokenRevoked, Severity::Warning, reason)
                    .principal(claims.sub.clone())
                    .session(claims.sid)
                    .data(serde_json::json!({ "jti": claims.jti })),
            )
            .await;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_pair(
        &self,
        subject: &str,
        roles: &[String],
        class: PrincipalClass,
        session_id: Uuid,
        family: Uuid,
        dfp: &str,
        ip: &str,
        now: DateTime<Utc>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<EncodedPair> {
        let refresh_jti = Uuid::new_v4();
        let base = Claims {
            iss: self.config.issuer().to_string(),
            aud: self.config.audience().to_string(),
            sub: subject.to_string(),
            sid: session_id,
            fam: family,
            dfp: dfp.to_string(),
            ip: ip.to_string(),
            typ: TokenType::Access,
            roles: roles.to_vec(),
            cls: class,
            exp: now.timestamp() + access_ttl.as_secs() as i64,
            nbf: now.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4(),
        };
        let access_token = self.encode(&base)?;

        let refresh = Claims {
            typ: TokenType::Refresh,
            exp: now.timestamp() + refresh_ttl.as_secs() as i64,
            jti: refresh_jti,
            ..base
        };
        let refresh_token = self.encode(&refresh)?;

        Ok(EncodedPair {
            access_token,
            refresh_token,
            refresh_jti,
        })
    }

    fn encode(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|err| Error::TokenInvalid(format!("token encoding: {err}")))
    }

    fn decode_claims(&self, token: &str, validate_lifetime: bool) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.issuer()]);
        validation.set_audience(&[self.config.audience()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = 0;
        validation.validate_exp = validate_lifetime;
        validation.validate_nbf = validate_lifetime;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    Error::TokenInvalid("token expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::ImmatureSignature => {
                    Error::TokenInvalid("token not yet valid".to_string())
                }
                _ => Error::TokenInvalid(err.to_string()),
            })
    }

    async fn reject(&self, claims: &Claims, ip: &str, description: &str) {
        self.audit
            .emit(
                AuditEvent::new(EventType::TokenRejected, Severity::Critical, description)
                    .principal(claims.sub.clone())
                    .session(claims.sid)
                    .ip(ip),
            )
            .await;
    }
}

struct EncodedPair {
    access_token: String,
    refresh_token: String,
    refresh_jti: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use anyhow::Result;
    use secrecy::SecretString;

    const SIGNING_KEY: &str = "test-signing-key-with-enough-entropy";

    struct Fixture {
        issuer: TokenIssuer,
        sessions: Arc<SessionRegistry>,
        cache: Arc<MemoryCache>,
        config: Arc<SecurityConfig>,
    }

    fn fixture() -> Result<Fixture> {
        let cache = Arc::new(MemoryCache::new());
        let config = Arc::new(SecurityConfig::new(
            "https://issuer.test".to_string(),
            "gardi".to_string(),
            SecretString::from(SIGNING_KEY.to_string()),
        ));
        let audit = Arc::new(AuditLogger::new(cache.clone()));
        let sessions = Arc::new(SessionRegistry::new(
            cache.clone(),
            config.clone(),
            audit.clone(),
        ));
        let issuer = TokenIssuer::new(cache.clone(), config.clone(), sessions.clone(), audit)?;
        Ok(Fixture {
            issuer,
            sessions,
            cache,
            config,
        })
    }

    fn principal() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            roles: vec!["user".to_string()],
            class: PrincipalClass::Standard,
        }
    }

    /// Encodes arbitrary claims with the fixture's signing key, for tokens
    /// the issuer would refuse to mint (expired, future-dated).
    fn encode_raw(claims: &Claims) -> Result<String> {
        let key = EncodingKey::from_secret(SIGNING_KEY.as_bytes());
        Ok(encode(&Header::new(Algorithm::HS256), claims, &key)?)
    }

    fn claims(typ: TokenType, iat: i64, exp: i64) -> Claims {
        Claims {
            iss: "https://issuer.test".to_string(),
            aud: "gardi".to_string(),
            sub: Uuid::new_v4().to_string(),
            sid: Uuid::new_v4(),
            fam: Uuid::new_v4(),
            dfp: fingerprint_digest("fp-1"),
            ip: "203.0.113.10".to_string(),
            typ,
            roles: vec!["user".to_string()],
            cls: PrincipalClass::Standard,
            exp,
            nbf: iat,
            iat,
            jti: Uuid::new_v4(),
        }
    }

    #[test]
    fn missing_signing_key_is_rejected_at_startup() {
        let cache = Arc::new(MemoryCache::new());
        let config = Arc::new(SecurityConfig::new(
            "https://issuer.test".to_string(),
            "gardi".to_string(),
            SecretString::from("  ".to_string()),
        ));
        let audit = Arc::new(AuditLogger::new(cache.clone()));
        let sessions = Arc::new(SessionRegistry::new(
            cache.clone(),
            config.clone(),
            audit.clone(),
        ));
        let result = TokenIssuer::new(cache, config, sessions, audit);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn issue_registers_session_and_family_state() -> Result<()> {
        let fixture = fixture()?;
        let principal = principal();

        let pair = fixture.issuer.issue(&principal, "fp-1", "203.0.113.10").await?;
        assert_eq!(
            pair.expires_in,
            fixture.config.token_ttl(PrincipalClass::Standard).access.as_secs()
        );

        let active = fixture.sessions.get_active(principal.id).await?;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, pair.session_id);
        assert!(fixture.cache.has_key(&family_key(active[0].family)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn validate_accepts_fresh_access_token() -> Result<()> {
        let fixture = fixture()?;
        let pair = fixture
            .issuer
            .issue(&principal(), "fp-1", "203.0.113.10")
            .await?;
        assert!(
            fixture
                .issuer
                .validate(&pair.access_token, "fp-1", "203.0.113.10")
                .await
        );
        Ok(())
    }

    #[tokio::test]
    async fn validate_rejects_refresh_token_as_bearer() -> Result<()> {
        let fixture = fixture()?;
        let pair = fixture
            .issuer
            .issue(&principal(), "fp-1", "203.0.113.10")
            .await?;
        assert!(
            !fixture
                .issuer
                .validate(&pair.refresh_token, "fp-1", "203.0.113.10")
                .await
        );
        Ok(())
    }

    #[tokio::test]
    async fn validate_tolerates_fingerprint_mismatch() -> Result<()> {
        let fixture = fixture()?;
        let pair = fixture
            .issuer
            .issue(&principal(), "fp-1", "203.0.113.10")
            .await?;
        assert!(
            fixture
                .issuer
                .validate(&pair.access_token, "fp-other", "198.51.100.5")
                .await
        );
        Ok(())
    }

    #[tokio::test]
    async fn validate_rejects_expired_token() -> Result<()> {
        let fixture = fixture()?;
        let now = Utc::now().timestamp();
        let token = encode_raw(&claims(TokenType::Access, now - 600, now - 60))?;
        assert!(!fixture.issuer.validate(&token, "fp-1", "203.0.113.10").await);
        Ok(())
    }

    #[tokio::test]
    async fn validate_rejects_future_issued_at() -> Result<()> {
        let fixture = fixture()?;
        let now = Utc::now().timestamp();
        // Signed but claims issuance in the future: clock-tamper signal.
        let mut tampered = claims(TokenType::Access, now + 600, now + 1200);
        tampered.nbf = now - 60;
        let token = encode_raw(&tampered)?;
        assert!(!fixture.issuer.validate(&token, "fp-1", "203.0.113.10").await);
        Ok(())
    }

    #[tokio::test]
    async fn validate_rejects_garbage_and_wrong_key() -> Result<()> {
        let fixture = fixture()?;
        assert!(!fixture.issuer.validate("not-a-token", "fp-1", "ip").await);

        let foreign_key = EncodingKey::from_secret(b"some-other-signing-key");
        let now = Utc::now().timestamp();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims(TokenType::Access, now, now + 600),
            &foreign_key,
        )?;
        assert!(!fixture.issuer.validate(&token, "fp-1", "ip").await);
        Ok(())
    }

    #[tokio::test]
    async fn revoke_blacklists_for_remaining_lifetime() -> Result<()> {
        let fixture = fixture()?;
        let pair = fixture
            .issuer
            .issue(&principal(), "fp-1", "203.0.113.10")
            .await?;

        assert!(
            fixture
                .issuer
                .validate(&pair.access_token, "fp-1", "203.0.113.10")
                .await
        );
        fixture.issuer.revoke(&pair.access_token, "logout").await?;
        assert!(
            !fixture
                .issuer
                .validate(&pair.access_token, "fp-1", "203.0.113.10")
                .await
        );
        Ok(())
    }

    #[tokio::test]
    async fn revoking_expired_token_is_a_no_op() -> Result<()> {
        let fixture = fixture()?;
        let now = Utc::now().timestamp();
        let expired = claims(TokenType::Access, now - 600, now - 60);
        let jti = expired.jti;
        let token = encode_raw(&expired)?;

        fixture.issuer.revoke(&token, "logout").await?;
        assert!(!fixture.cache.has_key(&blacklist_key(jti)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rotates_within_the_same_family() -> Result<()> {
        let fixture = fixture()?;
        let principal = principal();
        let first = fixture.issuer.issue(&principal, "fp-1", "203.0.113.10").await?;

        let second = fixture
            .issuer
            .refresh(&first.refresh_token, "fp-1", "203.0.113.10")
            .await?;
        assert_eq!(second.session_id, first.session_id);
        assert!(
            fixture
                .issuer
                .validate(&second.access_token, "fp-1", "203.0.113.10")
                .await
        );
        Ok(())
    }

    #[tokio::test]
    async fn rotated_refresh_token_is_single_use() -> Result<()> {
        let fixture = fixture()?;
        let first = fixture
            .issuer
            .issue(&principal(), "fp-1", "203.0.113.10")
            .await?;

        let _second = fixture
            .issuer
            .refresh(&first.refresh_token, "fp-1", "203.0.113.10")
            .await?;

        let replay = fixture
            .issuer
            .refresh(&first.refresh_token, "fp-1", "203.0.113.10")
            .await;
        assert!(matches!(replay, Err(Error::TokenInvalid(_))));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_hard_fails_on_device_mismatch() -> Result<()> {
        let fixture = fixture()?;
        let pair = fixture
            .issuer
            .issue(&principal(), "fp-1", "203.0.113.10")
            .await?;

        let result = fixture
            .issuer
            .refresh(&pair.refresh_token, "fp-other", "203.0.113.10")
            .await;
        assert!(matches!(result, Err(Error::DeviceMismatch)));

        // The mismatch did not consume the family entry.
        let rotated = fixture
            .issuer
            .refresh(&pair.refresh_token, "fp-1", "203.0.113.10")
            .await;
        assert!(rotated.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_fails_closed_after_session_invalidation() -> Result<()> {
        let fixture = fixture()?;
        let pair = fixture
            .issuer
            .issue(&principal(), "fp-1", "203.0.113.10")
            .await?;

        fixture.sessions.invalidate(pair.session_id, "logout").await?;

        let result = fixture
            .issuer
            .refresh(&pair.refresh_token, "fp-1", "203.0.113.10")
            .await;
        assert!(matches!(result, Err(Error::TokenInvalid(_))));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_requires_a_refresh_token() -> Result<()> {
        let fixture = fixture()?;
        let pair = fixture
            .issuer
            .issue(&principal(), "fp-1", "203.0.113.10")
            .await?;

        let result = fixture
            .issuer
            .refresh(&pair.access_token, "fp-1", "203.0.113.10")
            .await;
        assert!(matches!(result, Err(Error::TokenInvalid(_))));
        Ok(())
    }

    #[tokio::test]
    async fn security_context_exposes_verified_claims() -> Result<()> {
        let fixture = fixture()?;
        let principal = principal();
        let pair = fixture.issuer.issue(&principal, "fp-1", "203.0.113.10").await?;

        let context = fixture.issuer.security_context(&pair.access_token).await?;
        assert_eq!(context.subject, principal.id.to_string());
        assert_eq!(context.roles, vec!["user".to_string()]);
        assert_eq!(context.session_id, pair.session_id);
        assert!(context.expires_at > Utc::now());
        Ok(())
    }

    #[tokio::test]
    async fn blacklist_check_fails_open_when_cache_is_down() -> Result<()> {
        let cache: Arc<dyn Cache> = Arc::new(crate::testutil::FailingCache);
        let config = Arc::new(SecurityConfig::new(
            "https://issuer.test".to_string(),
            "gardi".to_string(),
            SecretString::from(SIGNING_KEY.to_string()),
        ));
        let audit = Arc::new(AuditLogger::new(cache.clone()));
        let sessions = Arc::new(SessionRegistry::new(
            cache.clone(),
            config.clone(),
            audit.clone(),
        ));
        let issuer = TokenIssuer::new(cache, config, sessions, audit)?;

        let now = Utc::now().timestamp();
        let token = encode_raw(&claims(TokenType::Access, now - 1, now + 600))?;
        assert!(issuer.validate(&token, "fp-1", "203.0.113.10").await);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_fails_closed_when_cache_is_down() -> Result<()> {
        let cache: Arc<dyn Cache> = Arc::new(crate::testutil::FailingCache);
        let config = Arc::new(SecurityConfig::new(
            "https://issuer.test".to_string(),
            "gardi".to_string(),
            SecretString::from(SIGNING_KEY.to_string()),
        ));
        let audit = Arc::new(AuditLogger::new(cache.clone()));
        let sessions = Arc::new(SessionRegistry::new(
            cache.clone(),
            config.clone(),
            audit.clone(),
        ));
        let issuer = TokenIssuer::new(cache, config, sessions, audit)?;

        let now = Utc::now().timestamp();
        let token = encode_raw(&claims(TokenType::Refresh, now - 1, now + 600))?;
        let result = issuer.refresh(&token, "fp-1", "203.0.113.10").await;
        assert!(matches!(result, Err(Error::Cache(_))));
        Ok(())
    }
}
