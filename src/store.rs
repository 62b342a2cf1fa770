//! Credential store abstraction and principal types.
//!
//! The store is an external collaborator; the only contract this crate
//! relies on is lookup by any alternate identifier and persistence of the
//! attempt-count / lock-until / status fields the failed-login guard
//! mutates.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Token/session lifetime class of a principal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrincipalClass {
    Standard,
    Service,
    Administrative,
}

/// Authenticated identity handed to the token issuer after the credential
/// check has already happened elsewhere.
#[derive(Clone, Debug)]
pub struct Principal {
    pub id: Uuid,
    pub roles: Vec<String>,
    pub class: PrincipalClass,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    /// Locked by the failed-login guard; always paired with `locked_until`.
    Locked,
    /// Administratively disabled. Never cleared by this crate.
    Suspended,
    PendingVerification,
}

/// Fields of a credential record this subsystem reads and mutates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub principal_id: Uuid,
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub attempt_count: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub status: AccountStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Lookup and persistence of credential records.
///
/// `find_by_identifier` must resolve the same record through any of the
/// alternate keys (username, email, phone), applying the normalization in
/// [`normalize_identifier`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_identifier(&self, identifier: &str) -> StoreResult<Option<CredentialRecord>>;

    async fn save(&self, record: &CredentialRecord) -> StoreResult<()>;
}

/// Normalize an identifier for lookup: emails are lowercased, phone numbers
/// reduced to digits (with an optional leading `+`), usernames trimmed.
#[must_use]
pub fn normalize_identifier(identifier: &str) -> String {
    let trimmed = identifier.trim();
    if looks_like_email(trimmed) {
        return trimmed.to_lowercase();
    }
    if looks_like_phone(trimmed) {
        let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
        if trimmed.starts_with('+') {
            return format!("+{digits}");
        }
        return digits;
    }
    trimmed.to_string()
}

fn looks_like_email(identifier: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(identifier))
}

fn looks_like_phone(identifier: &str) -> bool {
    Regex::new(r"^\+?[0-9][0-9 ().-]{5,}$").is_ok_and(|regex| regex.is_match(identifier))
}

/// In-memory [`CredentialStore`] for tests and single-instance setups.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: Mutex<HashMap<Uuid, CredentialRecord>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: CredentialRecord) {
        let mut records = self.records.lock().await;
        records.insert(record.principal_id, record);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_identifier(&self, identifier: &str) -> StoreResult<Option<CredentialRecord>> {
        let normalized = normalize_identifier(identifier);
        let records = self.records.lock().await;
        Ok(records
            .values()
            .find(|record| {
                record.username == normalized
                    || record.email == normalized
                    || record.phone.as_deref() == Some(normalized.as_str())
            })
            .cloned())
    }

    async fn save(&self, record: &CredentialRecord) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        records.insert(record.principal_id, record.clone());
        Ok(())
    }
}
