use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::backend::{BackendStats, CacheBackend, CacheError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    /// `None` when `ttl` reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: String, now: Instant, ttl: Duration) -> Self {
        Self { value, expires_at: now.checked_add(ttl) }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process backend used when no cache URL is configured.
///
/// Expired entries are dropped lazily on access and by [`purge_expired`](Self::purge_expired).
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, Entry>,
}

/// Glob match supporting `*` anywhere in the pattern.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return key.is_empty();
    };
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };

    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let value = self.entries.get(key).and_then(|e| e.is_live(now).then(|| e.value.clone()));
        if value.is_none() {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), Entry::new(value.to_string(), Instant::now(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        Ok(self.entries.remove(key).is_some_and(|(_, e)| e.is_live(now)))
    }

    async fn delete_by_prefix(&self, pattern: &str) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut removed = 0u64;
        self.entries.retain(|key, entry| {
            if glob_match(pattern, key) {
                if entry.is_live(now) {
                    removed += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        Ok(self.entries.get(key).is_some_and(|e| e.is_live(now)))
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, CacheError> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new("0".to_string(), now, ttl));
        if !entry.is_live(now) {
            *entry = Entry::new("0".to_string(), now, ttl);
        }

        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| CacheError::Serialization(format!("{key} is not an integer")))?;
        let next = current.saturating_add(1);
        entry.value = next.to_string();
        Ok(next)
    }

    async fn stats(&self) -> Result<BackendStats, CacheError> {
        let now = Instant::now();
        let mut keys = 0u64;
        let mut bytes = 0u64;
        for entry in &self.entries {
            if entry.is_live(now) {
                keys += 1;
                bytes += (entry.key().len() + entry.value.len()) as u64;
            }
        }
        Ok(BackendStats { keys, memory_bytes: Some(bytes), clients: None })
    }
}
