//! Key-value cache abstraction.
//!
//! Every piece of shared mutable state in this crate (counters, blacklist
//! entries, session sets, rate-limit windows) lives behind the [`Cache`]
//! trait. Expiry is handled exclusively through key TTLs; no component runs
//! a background sweep.

use std::time::Duration;

use async_trait::async_trait;

mod memory;

pub use memory::MemoryCache;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("value at {key} has the wrong type")]
    WrongType { key: String },

    #[error("value at {key} is not an integer")]
    NotAnInteger { key: String },
}

pub type CacheResult<T> = Result<T, CacheError>;

/// String-keyed cache with atomic counters, sets, and score-ordered sets.
///
/// The trait mirrors what the components actually consume: plain get/set
/// with TTL, an atomic increment, set membership, sorted-set range
/// operations for sliding windows, and list append for time-series audit
/// sinks. Implementations must be safe for concurrent use.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Stores a value, replacing any previous entry and its TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Removes a key. Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Atomically adds `by` to an integer value, creating it at zero first.
    /// Returns the new value.
    async fn increment(&self, key: &str, by: i64) -> CacheResult<i64>;

    /// Sets the TTL of an existing key. Returns `false` if the key is gone.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    async fn has_key(&self, key: &str) -> CacheResult<bool>;

    /// Adds a member to a set. Returns `true` if it was not already present.
    async fn set_add(&self, key: &str, member: &str) -> CacheResult<bool>;

    /// Removes a member from a set. Returns `true` if it was present.
    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<bool>;

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>>;

    /// Adds a member with a score to a score-ordered set, overwriting the
    /// score of an existing member.
    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> CacheResult<()>;

    /// Counts members with a score in `[min, max]`.
    async fn sorted_count(&self, key: &str, min: f64, max: f64) -> CacheResult<u64>;

    /// Removes members with a score in `[min, max]`. Returns how many were
    /// removed.
    async fn sorted_remove_range(&self, key: &str, min: f64, max: f64) -> CacheResult<u64>;

    /// Smallest score among members scored within `[min, max]`, if any.
    async fn sorted_min_score(&self, key: &str, min: f64, max: f64) -> CacheResult<Option<f64>>;

    /// Appends a value to a list, creating it if absent. Returns the new
    /// list length.
    async fn list_push(&self, key: &str, value: &str) -> CacheResult<u64>;
}
