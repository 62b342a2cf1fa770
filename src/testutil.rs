//! Shared test doubles.

use std::time::Duration;

use async_trait::async_trait;

use crate::cache::{Cache, CacheError, CacheResult};

fn down<T>() -> CacheResult<T> {
    Err(CacheError::Unavailable("cache down".to_string()))
}

/// A cache whose every operation fails, for exercising the fail-open and
/// fail-closed dependency policies.
pub(crate) struct FailingCache;

#[async_trait]
impl Cache for FailingCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        down()
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> CacheResult<()> {
        down()
    }

    async fn delete(&self, _key: &str) -> CacheResult<bool> {
        down()
    }

    async fn increment(&self, _key: &str, _by: i64) -> CacheResult<i64> {
        down()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> CacheResult<bool> {
        down()
    }

    async fn has_key(&self, _key: &str) -> CacheResult<bool> {
        down()
    }

    async fn set_add(&self, _key: &str, _member: &str) -> CacheResult<bool> {
        down()
    }

    async fn set_remove(&self, _key: &str, _member: &str) -> CacheResult<bool> {
        down()
    }

    async fn set_members(&self, _key: &str) -> CacheResult<Vec<String>> {
        down()
    }

    async fn sorted_add(&self, _key: &str, _member: &str, _score: f64) -> CacheResult<()> {
        down()
    }

    async fn sorted_count(&self, _key: &str, _min: f64, _max: f64) -> CacheResult<u64> {
        down()
    }

    async fn sorted_remove_range(&self, _key: &str, _min: f64, _max: f64) -> CacheResult<u64> {
        down()
    }

    async fn sorted_min_score(&self, _key: &str, _min: f64, _max: f64) -> CacheResult<Option<f64>> {
        down()
    }

    async fn list_push(&self, _key: &str, _value: &str) -> CacheResult<u64> {
        down()
    }
}
