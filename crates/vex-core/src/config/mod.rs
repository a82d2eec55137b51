//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: Hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML file specified by `VEX_CONFIG` env var
//! 3. **Environment variables**: `VEX__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`NodeConfig`]: full node JSON-RPC endpoint, credentials, timeout and retry policy
//! - [`FeedConfig`]: publish/subscribe feed endpoint and polling cadence
//! - [`CacheConfig`]: cache backend and per-category TTLs
//! - [`StoreConfig`]: relational index store
//! - [`ScannerConfig`]: historical scan batching
//! - [`TrackingConfig`]: which addresses and identities are indexed
//! - [`OrphanConfig`], [`MempoolConfig`], [`MetricsConfig`], [`LoggingConfig`]
//!
//! # Example
//!
//! ```toml
//! [node]
//! rpc_url = "http://127.0.0.1:27486"
//! rpc_user = "verusrpc"
//! rpc_password = "secret"
//!
//! [feed]
//! endpoint = "tcp://127.0.0.1:28332"
//!
//! [[tracking.identities]]
//! address = "iJhCezBExJHvtyH3fGhNnt2NhU4Ztkf2yq"
//! name = "alice@"
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, time::Duration};

use crate::{
    cache::CacheTtls,
    rpc::{Credentials, GatewayConfig, HttpClientConfig, RetryPolicy},
    scanner::{ScanMode, Tracking},
};

/// Full node JSON-RPC connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Daemon RPC URL. Must start with `http`. Defaults to `http://127.0.0.1:27486`.
    pub rpc_url: String,

    /// The daemon's `rpcuser`.
    pub rpc_user: Option<String>,

    /// The daemon's `rpcpassword`.
    pub rpc_password: Option<String>,

    /// Per-attempt timeout in seconds. Defaults to `30`.
    pub timeout_seconds: u64,

    /// Maximum in-flight requests. Defaults to `64`.
    pub max_concurrent_requests: usize,

    /// First retry delay in milliseconds. Defaults to `200`.
    pub retry_base_ms: u64,

    /// Largest retry delay in milliseconds. Defaults to `5000`.
    pub retry_cap_ms: u64,

    /// Attempts per call including the first. Defaults to `5`.
    pub retry_max_attempts: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:27486".to_string(),
            rpc_user: None,
            rpc_password: None,
            timeout_seconds: 30,
            max_concurrent_requests: 64,
            retry_base_ms: 200,
            retry_cap_ms: 5000,
            retry_max_attempts: 5,
        }
    }
}

impl NodeConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(self.retry_base_ms),
            cap: Duration::from_millis(self.retry_cap_ms),
            max_attempts: self.retry_max_attempts,
        }
    }

    /// Gateway settings derived from this section.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        let credentials = match (&self.rpc_user, &self.rpc_password) {
            (Some(user), Some(password)) => {
                Some(Credentials { user: user.clone(), password: password.clone() })
            }
            _ => None,
        };

        GatewayConfig {
            url: self.rpc_url.clone(),
            credentials,
            timeout: self.timeout(),
            retry: self.retry_policy(),
            http: HttpClientConfig {
                concurrent_limit: self.max_concurrent_requests,
                ..HttpClientConfig::default()
            },
        }
    }
}

/// Publish/subscribe feed and polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Subscribe to the node's feed. When `false` the pipeline only polls.
    pub enabled: bool,

    /// ZeroMQ endpoint the daemon publishes on (`-zmqpubhashblock`).
    pub endpoint: String,

    /// Height poll interval while the feed is down, in seconds. Defaults to `5`.
    pub poll_interval_seconds: u64,

    /// Height poll interval while subscribed, in seconds. Defaults to `60`.
    pub safety_poll_interval_seconds: u64,

    /// First reconnect delay in milliseconds. Defaults to `500`.
    pub reconnect_base_ms: u64,

    /// Largest reconnect delay in milliseconds. Defaults to `30000`.
    pub reconnect_cap_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "tcp://127.0.0.1:28332".to_string(),
            poll_interval_seconds: 5,
            safety_poll_interval_seconds: 60,
            reconnect_base_ms: 500,
            reconnect_cap_ms: 30_000,
        }
    }
}

impl FeedConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    #[must_use]
    pub fn safety_poll_interval(&self) -> Duration {
        Duration::from_secs(self.safety_poll_interval_seconds)
    }

    #[must_use]
    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(self.reconnect_base_ms),
            cap: Duration::from_millis(self.reconnect_cap_ms),
            max_attempts: 0,
        }
    }
}

/// Cache backend selection and TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether caching is enabled. Defaults to `true`.
    pub enabled: bool,

    /// Redis URL. When absent an in-process cache is used.
    pub url: Option<String>,

    /// Per-category TTLs.
    pub ttl: CacheTtls,

    /// TTL of last-known-good copies in seconds. Defaults to one day.
    pub last_known_good_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            ttl: CacheTtls::default(),
            last_known_good_ttl_seconds: 24 * 60 * 60,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn last_known_good_ttl(&self) -> Duration {
        Duration::from_secs(self.last_known_good_ttl_seconds)
    }
}

/// Relational index store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `SQLite` database URL. Defaults to `sqlite://./db/index.db`.
    pub database_url: String,

    /// Pool size. Defaults to `8`.
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let path = std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join("db")
            .join("index.db");

        Self { database_url: format!("sqlite://{}", path.display()), max_connections: 8 }
    }
}

/// Historical scan batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Blocks committed per transaction. Defaults to `100`.
    pub batch_size: u32,

    /// Concurrent block fetches within a batch. Defaults to `16`.
    pub parallelism: usize,

    /// Extra fetch attempts per block before the batch fails. Defaults to `3`.
    pub block_retries: u32,

    /// Scan mode used by the daemon's background scan. Defaults to `full`.
    pub mode: ScanMode,

    /// First height scanned when no checkpoint exists. Defaults to `0`.
    pub start_height: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { batch_size: 100, parallelism: 16, block_retries: 3, mode: ScanMode::Full, start_height: 0 }
    }
}

/// An identity whose staking rewards are indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedIdentity {
    /// The identity's own `i...` address.
    pub address: String,

    /// Friendly name, e.g. `alice@`.
    #[serde(default)]
    pub name: Option<String>,
}

/// Which addresses and identities are indexed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Index every address. Defaults to `false`.
    pub all: bool,

    /// Transparent addresses to index.
    pub addresses: Vec<String>,

    /// Identities to index, including their rewards.
    pub identities: Vec<TrackedIdentity>,

    /// Identity creation backfill interval in seconds. Defaults to `300`.
    pub backfill_interval_seconds: Option<u64>,
}

impl TrackingConfig {
    #[must_use]
    pub fn tracking(&self) -> Tracking {
        let mut tracking =
            if self.all { Tracking::all() } else { Tracking::addresses(self.addresses.iter().cloned()) };
        for identity in &self.identities {
            tracking.track_identity(identity.address.clone());
        }
        tracking
    }

    #[must_use]
    pub fn backfill_interval(&self) -> Duration {
        Duration::from_secs(self.backfill_interval_seconds.unwrap_or(300))
    }
}

/// Reorganization handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrphanConfig {
    /// Confirmations after which an orphan verdict is high confidence. Defaults to `10`.
    pub safety_depth: u64,

    /// Recent indexed blocks swept during reconciliation. Defaults to `20`.
    pub reconcile_depth: u32,
}

impl Default for OrphanConfig {
    fn default() -> Self {
        Self { safety_depth: 10, reconcile_depth: 20 }
    }
}

/// Mempool first-seen tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Unconfirmed entries older than this are dropped, in seconds. Defaults to `3600`.
    pub max_unconfirmed_age_seconds: u64,

    /// Eviction sweep interval in seconds. Defaults to `60`.
    pub eviction_interval_seconds: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self { max_unconfirmed_age_seconds: 3600, eviction_interval_seconds: 60 }
    }
}

impl MempoolConfig {
    #[must_use]
    pub fn max_unconfirmed_age(&self) -> Duration {
        Duration::from_secs(self.max_unconfirmed_age_seconds)
    }

    #[must_use]
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_seconds)
    }
}

/// Prometheus metrics collection and export configuration.
///
/// When enabled, metrics are exposed at `/metrics` on the configured port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled. Defaults to `true`.
    pub enabled: bool,

    /// Port to expose Prometheus metrics endpoint. Defaults to `9090`.
    pub prometheus_port: Option<u16>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true, prometheus_port: Some(9090) }
    }
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// Root application configuration containing all subsystem settings.
///
/// Loaded with the `VEX` prefix for environment overrides using `__` as a separator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub feed: FeedConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub scanner: ScannerConfig,
    pub tracking: TrackingConfig,
    pub orphan: OrphanConfig,
    pub mempool: MempoolConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Use `__` as a separator for nested fields (e.g., `VEX__NODE__RPC_URL=...`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("VEX").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml` with fallback to defaults.
    ///
    /// The config file path can be overridden using the `VEX_CONFIG` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("VEX_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Prometheus listener address, if metrics export is enabled.
    #[must_use]
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        if !self.metrics.enabled {
            return None;
        }
        self.metrics.prometheus_port.map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.node.rpc_url.is_empty() {
            return Err("Node RPC URL is empty".to_string());
        }
        if !self.node.rpc_url.starts_with("http") {
            return Err(format!("Invalid node RPC URL: {}", self.node.rpc_url));
        }
        if self.node.rpc_user.is_some() != self.node.rpc_password.is_some() {
            return Err("rpc_user and rpc_password must be set together".to_string());
        }
        if self.node.timeout_seconds == 0 {
            return Err("Node timeout must be greater than 0".to_string());
        }
        if self.node.max_concurrent_requests == 0 {
            return Err("Max concurrent requests must be greater than 0".to_string());
        }
        if self.node.retry_base_ms > self.node.retry_cap_ms {
            return Err("Retry base delay exceeds retry cap".to_string());
        }

        if self.feed.enabled && self.feed.endpoint.is_empty() {
            return Err("Feed is enabled but no endpoint is configured".to_string());
        }
        if self.feed.poll_interval_seconds == 0 || self.feed.safety_poll_interval_seconds == 0 {
            return Err("Poll intervals must be greater than 0".to_string());
        }
        if self.feed.reconnect_base_ms > self.feed.reconnect_cap_ms {
            return Err("Reconnect base delay exceeds reconnect cap".to_string());
        }

        if let Some(url) = &self.cache.url {
            if !url.starts_with("redis") {
                return Err(format!("Invalid cache URL: {url}"));
            }
        }

        if self.store.database_url.is_empty() {
            return Err("Store database URL is empty".to_string());
        }
        if self.store.max_connections == 0 {
            return Err("Store max connections must be greater than 0".to_string());
        }

        if self.scanner.batch_size == 0 {
            return Err("Scan batch size must be greater than 0".to_string());
        }
        if self.scanner.parallelism == 0 {
            return Err("Scan parallelism must be greater than 0".to_string());
        }

        if self.orphan.reconcile_depth == 0 {
            return Err("Orphan reconcile depth must be greater than 0".to_string());
        }

        if self.mempool.eviction_interval_seconds == 0 {
            return Err("Mempool eviction interval must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
