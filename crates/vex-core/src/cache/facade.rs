use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use super::{
    backend::{CacheBackend, CacheError, CacheStats},
    keys::{self, CacheCategory, CacheTtls},
};
use crate::{
    metrics::MetricsCollector,
    rpc::{BlockVerbosity, NodeClient, RpcError},
    types::{AddressBalance, AddressUtxo, Block, CacheStatus, ChainSummary, IdentityInfo, Transaction},
};

/// A value together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub status: CacheStatus,
}

impl<T> Fetched<T> {
    /// `true` when the node was unreachable and a last-known-good copy was served.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.status.is_stale()
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

/// Read-through access for API handlers: cache first, node on a miss.
///
/// Cache operations never fail: a down or absent backend reads as a miss and writes
/// report `false`. Values are stored as JSON. Duplicate concurrent fetches of the same
/// key are allowed; they write the same value.
#[derive(Clone)]
pub struct CachedAccess {
    backend: Option<Arc<dyn CacheBackend>>,
    counters: Arc<Counters>,
    node: Arc<dyn NodeClient>,
    ttls: CacheTtls,
    lkg_ttl: Duration,
    metrics: MetricsCollector,
}

impl CachedAccess {
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, node: Arc<dyn NodeClient>, ttls: CacheTtls) -> Self {
        Self::with_backend(Some(backend), node, ttls)
    }

    /// Every read goes to the node; nothing is stored.
    #[must_use]
    pub fn without_cache(node: Arc<dyn NodeClient>, ttls: CacheTtls) -> Self {
        Self::with_backend(None, node, ttls)
    }

    fn with_backend(
        backend: Option<Arc<dyn CacheBackend>>,
        node: Arc<dyn NodeClient>,
        ttls: CacheTtls,
    ) -> Self {
        Self {
            backend,
            counters: Arc::new(Counters::default()),
            node,
            ttls,
            lkg_ttl: Duration::from_secs(24 * 60 * 60),
            metrics: MetricsCollector::new(),
        }
    }

    #[must_use]
    pub fn with_last_known_good_ttl(mut self, ttl: Duration) -> Self {
        self.lkg_ttl = ttl;
        self
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.as_ref().map_or("disabled", |b| b.name())
    }

    /// Runs `call` against the backend. `None` when there is no backend or it failed.
    async fn attempt<T, Fut>(
        &self,
        op: &'static str,
        key: &str,
        call: impl FnOnce(Arc<dyn CacheBackend>) -> Fut,
    ) -> Option<T>
    where
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let backend = Arc::clone(self.backend.as_ref()?);
        match call(backend).await {
            Ok(value) => Some(value),
            Err(e) => {
                self.record_error(op, key, &e);
                None
            }
        }
    }

    fn record_error(&self, op: &'static str, key: &str, error: &CacheError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_cache_op(op, "error");
        tracing::debug!(backend = self.backend_name(), op, key, error = %error, "cache operation failed");
    }

    /// Returns the decoded value, or `None` on a miss, a backend failure, or a value that
    /// no longer decodes as `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.attempt("get", key, |b| async move { b.get(key).await }).await.flatten();
        let decoded = raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding undecodable cache entry");
                None
            }
        });

        let counter = if decoded.is_some() { &self.counters.hits } else { &self.counters.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        decoded
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.record_error("set", key, &CacheError::Serialization(e.to_string()));
                return false;
            }
        };
        let stored = self.attempt("set", key, |b| async move { b.set(key, &encoded, ttl).await });
        stored.await.is_some()
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.attempt("delete", key, |b| async move { b.delete(key).await }).await.unwrap_or(false)
    }

    /// Deletes every key matching `pattern`. `None` if the backend failed; zero when
    /// caching is off.
    pub async fn delete_by_prefix(&self, pattern: &str) -> Option<u64> {
        if self.backend.is_none() {
            return Some(0);
        }
        self.attempt("delete_by_prefix", pattern, |b| async move {
            b.delete_by_prefix(pattern).await
        })
        .await
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.attempt("exists", key, |b| async move { b.exists(key).await }).await.unwrap_or(false)
    }

    /// Increments a counter. `None` if the backend failed or caching is off.
    pub async fn increment(&self, key: &str, ttl: Duration) -> Option<i64> {
        self.attempt("increment", key, |b| async move { b.increment(key, ttl).await }).await
    }

    /// Backend figures plus this process's hit, miss and error counters.
    pub async fn stats(&self) -> CacheStats {
        let backend = self.attempt("stats", "", |b| async move { b.stats().await }).await;
        let mut stats = CacheStats {
            backend: self.backend_name(),
            available: backend.is_some(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            ..CacheStats::default()
        };
        if let Some(backend) = backend {
            stats.keys = backend.keys;
            stats.memory_bytes = backend.memory_bytes;
            stats.clients = backend.clients;
        }
        stats
    }

    /// Returns the cached value for `key`, or fetches, stores with `ttl`, and returns it.
    ///
    /// When `fetch` fails and a last-known-good copy of `key` exists, that copy is
    /// returned with [`CacheStatus::Stale`].
    ///
    /// # Errors
    ///
    /// The fetch error when there is neither a live entry nor a last-known-good copy.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Fetched<T>, RpcError>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, RpcError>> + Send,
    {
        let label = CacheCategory::from_key(key).map_or("other", CacheCategory::label);

        if let Some(value) = self.get::<T>(key).await {
            self.metrics.record_cache_lookup(label, true);
            return Ok(Fetched { value, status: CacheStatus::Hit });
        }
        self.metrics.record_cache_lookup(label, false);

        let lkg_key = keys::last_known_good(key);
        match fetch().await {
            Ok(value) => {
                self.set(key, &value, ttl).await;
                self.set(&lkg_key, &value, self.lkg_ttl).await;
                Ok(Fetched { value, status: CacheStatus::Miss })
            }
            Err(e) => match self.get::<T>(&lkg_key).await {
                Some(value) => {
                    tracing::warn!(key, error = %e, "node fetch failed, serving last known good value");
                    self.metrics.record_stale_served(label);
                    Ok(Fetched { value, status: CacheStatus::Stale })
                }
                None => Err(e),
            },
        }
    }

    async fn cached<T, F, Fut>(
        &self,
        key: String,
        category: CacheCategory,
        fetch: F,
    ) -> Result<Fetched<T>, RpcError>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, RpcError>> + Send,
    {
        self.get_or_fetch(&key, self.ttls.ttl_for(category), fetch).await
    }

    pub async fn chain_summary(&self) -> Result<Fetched<ChainSummary>, RpcError> {
        let node = Arc::clone(&self.node);
        self.cached(keys::chain_summary(), CacheCategory::ChainSummary, || async move {
            node.blockchain_info().await
        })
        .await
    }

    pub async fn block(&self, hash: &str) -> Result<Fetched<Block>, RpcError> {
        let node = Arc::clone(&self.node);
        let hash = hash.to_string();
        self.cached(keys::block(&hash), CacheCategory::Block, || async move {
            node.block(&hash, BlockVerbosity::Full).await
        })
        .await
    }

    pub async fn block_at_height(&self, height: u64) -> Result<Fetched<Block>, RpcError> {
        let node = Arc::clone(&self.node);
        self.cached(keys::block_at_height(height), CacheCategory::Block, || async move {
            node.block_at(height, BlockVerbosity::Full).await
        })
        .await
    }

    pub async fn transaction(&self, txid: &str) -> Result<Fetched<Transaction>, RpcError> {
        let node = Arc::clone(&self.node);
        let txid = txid.to_string();
        self.cached(keys::transaction(&txid), CacheCategory::Transaction, || async move {
            node.raw_transaction(&txid).await
        })
        .await
    }

    pub async fn address_balance(&self, address: &str) -> Result<Fetched<AddressBalance>, RpcError> {
        let node = Arc::clone(&self.node);
        let addresses = vec![address.to_string()];
        self.cached(keys::address_balance(address), CacheCategory::AddressBalance, || async move {
            node.address_balance(&addresses).await
        })
        .await
    }

    pub async fn address_utxos(
        &self,
        address: &str,
    ) -> Result<Fetched<Vec<AddressUtxo>>, RpcError> {
        let node = Arc::clone(&self.node);
        let addresses = vec![address.to_string()];
        self.cached(keys::address_utxos(address), CacheCategory::AddressUtxos, || async move {
            node.address_utxos(&addresses).await
        })
        .await
    }

    pub async fn identity(&self, address: &str) -> Result<Fetched<IdentityInfo>, RpcError> {
        let node = Arc::clone(&self.node);
        let address_owned = address.to_string();
        self.cached(keys::identity(address), CacheCategory::Identity, || async move {
            node.identity(&address_owned).await
        })
        .await
    }

    pub async fn mempool(&self) -> Result<Fetched<Vec<String>>, RpcError> {
        let node = Arc::clone(&self.node);
        self.cached(keys::mempool(), CacheCategory::Mempool, || async move {
            node.raw_mempool().await
        })
        .await
    }

    pub async fn network_info(&self) -> Result<Fetched<Value>, RpcError> {
        let node = Arc::clone(&self.node);
        self.cached(keys::network_info(), CacheCategory::NetworkInfo, || async move {
            node.network_info().await
        })
        .await
    }

    /// Drops everything a new block can change. Awaited before the next read is served.
    pub async fn on_new_block(&self, affected_addresses: &[String]) {
        let mut patterns: Vec<String> = ["chain:*", "blockchain:*", "block:*", "mempool:*"]
            .into_iter()
            .map(str::to_string)
            .collect();
        patterns.extend(affected_addresses.iter().map(|a| keys::address_pattern(a)));
        self.invalidate(&patterns).await;
    }

    /// Drops everything a reorganization can change, including transactions.
    pub async fn on_reorg(&self, from_height: u64, affected_addresses: &[String]) {
        tracing::info!(from_height, "invalidating cache after reorg");
        self.on_new_block(affected_addresses).await;
        self.invalidate(&[
            CacheCategory::Transaction.pattern().to_string(),
            CacheCategory::Identity.pattern().to_string(),
            "address:*".to_string(),
        ])
        .await;
    }

    /// Drops every live entry. Last-known-good copies survive.
    pub async fn clear_all(&self) {
        let mut patterns: Vec<String> =
            CacheCategory::ALL.iter().map(|c| c.pattern().to_string()).collect();
        patterns.push("blockchain:*".to_string());
        patterns.push("address:*".to_string());
        self.invalidate(&patterns).await;
    }

    async fn invalidate(&self, patterns: &[String]) {
        for pattern in patterns {
            if self.delete_by_prefix(pattern).await.is_none() {
                tracing::warn!(pattern, "cache invalidation skipped, backend unavailable");
            }
        }
    }
}
