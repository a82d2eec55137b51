use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single cache operation.
///
/// Never escapes [`CachedAccess`](super::CachedAccess); every caller sees a miss or `false`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache value could not be (de)serialized: {0}")]
    Serialization(String),
}

/// Aggregate backend statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub keys: u64,
    pub memory_bytes: Option<u64>,
    pub clients: Option<u64>,
}

/// Backend figures plus process-local counters, as reported by
/// [`CachedAccess::stats`](super::CachedAccess::stats).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub backend: &'static str,
    pub available: bool,
    pub keys: u64,
    pub memory_bytes: Option<u64>,
    pub clients: Option<u64>,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

/// Key/value store with per-entry TTL and glob-style prefix deletion.
///
/// Patterns follow the networked store's `MATCH` syntax, but only a trailing `*` is
/// guaranteed to be portable across backends.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Returns the number of keys removed.
    async fn delete_by_prefix(&self, pattern: &str) -> Result<u64, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Increments a counter, applying `ttl` when the counter is created.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, CacheError>;

    async fn stats(&self) -> Result<BackendStats, CacheError>;
}
