//! In-memory [`Cache`] implementation.
//!
//! Reference backend for tests and single-instance deployments. Expired
//! entries are pruned lazily on access; the TTL is the only cleanup
//! mechanism, matching the contract of the trait.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Cache, CacheError, CacheResult};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(HashSet<String>),
    Sorted(BTreeMap<String, f64>),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Drops the entry if its TTL has elapsed and returns the live remainder.
fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|entry| entry.expired(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn in_range(score: f64, min: f64, max: f64) -> bool {
    score >= min && score <= max
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) => match &entry.value {
                Value::Text(text) => Ok(Some(text.clone())),
                _ => Err(CacheError::WrongType { key: key.to_string() }),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut entries = self.entries.lock().await;
        let existed = live(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn increment(&self, key: &str, by: i64) -> CacheResult<i64> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) => match &mut entry.value {
                Value::Text(text) => {
                    let current: i64 = text
                        .parse()
                        .map_err(|_| CacheError::NotAnInteger { key: key.to_string() })?;
                    let next = current + by;
                    *text = next.to_string();
                    Ok(next)
                }
                _ => Err(CacheError::WrongType { key: key.to_string() }),
            },
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Text(by.to_string()),
                        expires_at: None,
                    },
                );
                Ok(by)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn has_key(&self, key: &str) -> CacheResult<bool> {
        let mut entries = self.entries.lock().await;
        Ok(live(&mut entries, key).is_some())
    }

    async fn set_add(&self, key: &str, member: &str) -> CacheResult<bool> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) => match &mut entry.value {
                Value::Set(set) => Ok(set.insert(member.to_string())),
                _ => Err(CacheError::WrongType { key: key.to_string() }),
            },
            None => {
                let mut set = HashSet::new();
                set.insert(member.to_string());
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Set(set),
                        expires_at: None,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<bool> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) => match &mut entry.value {
                Value::Set(set) => Ok(set.remove(member)),
                _ => Err(CacheError::WrongType { key: key.to_string() }),
            },
            None => Ok(false),
        }
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.iter().cloned().collect()),
                _ => Err(CacheError::WrongType { key: key.to_string() }),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> CacheResult<()> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) => match &mut entry.value {
                Value::Sorted(members) => {
                    members.insert(member.to_string(), score);
                    Ok(())
                }
                _ => Err(CacheError::WrongType { key: key.to_string() }),
            },
            None => {
                let mut members = BTreeMap::new();
                members.insert(member.to_string(), score);
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Sorted(members),
                        expires_at: None,
                    },
                );
                Ok(())
            }
        }
    }

    async fn sorted_count(&self, key: &str, min: f64, max: f64) -> CacheResult<u64> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) => match &entry.value {
                Value::Sorted(members) => {
                    Ok(members.values().filter(|score| in_range(**score, min, max)).count() as u64)
                }
                _ => Err(CacheError::WrongType { key: key.to_string() }),
            },
            None => Ok(0),
        }
    }

    async fn sorted_remove_range(&self, key: &str, min: f64, max: f64) -> CacheResult<u64> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) => match &mut entry.value {
                Value::Sorted(members) => {
                    let before = members.len();
                    members.retain(|_, score| !in_range(*score, min, max));
                    Ok((before - members.len()) as u64)
                }
                _ => Err(CacheError::WrongType { key: key.to_string() }),
            },
            None => Ok(0),
        }
    }

    async fn sorted_min_score(&self, key: &str, min: f64, max: f64) -> CacheResult<Option<f64>> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) => match &entry.value {
                Value::Sorted(members) => Ok(members
                    .values()
                    .filter(|score| in_range(**score, min, max))
                    .copied()
                    .fold(None, |acc: Option<f64>, score| {
                        Some(acc.map_or(score, |current| current.min(score)))
                    })),
                _ => Err(CacheError::WrongType { key: key.to_string() }),
            },
            None => Ok(None),
        }
    }

    async fn list_push(&self, key: &str, value: &str) -> CacheResult<u64> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) => match &mut entry.value {
                Value::List(list) => {
                    list.push(value.to_string());
                    Ok(list.len() as u64)
                }
                _ => Err(CacheError::WrongType { key: key.to_string() }),
            },
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::List(vec![value.to_string()]),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }
}
