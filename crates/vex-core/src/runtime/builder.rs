//! Builder wiring every engine component from an [`AppConfig`].

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    cache::{CacheBackend, CachedAccess, MemoryBackend, RedisBackend},
    chain::ChainState,
    config::AppConfig,
    identity::IdentityBackfiller,
    ingest::{BlockFeed, IngestPipeline, IngestSettings},
    mempool::MempoolTracker,
    orphan::OrphanDetector,
    pos_index::PosBlockIndex,
    rpc::{NodeClient, RpcError, RpcGateway},
    scanner::{BlockProcessor, HistoricalScanner, ScanSettings},
    store::{IndexStore, SqliteIndexStore, StoreError},
};

use super::{lifecycle::VexRuntime, VexComponents};

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    #[error("RPC gateway initialization failed: {0}")]
    Gateway(#[from] RpcError),

    #[error("Index store initialization failed: {0}")]
    Store(#[from] StoreError),

    /// Generic initialization error
    #[error("Runtime initialization failed: {0}")]
    Initialization(String),
}

#[derive(Clone)]
struct RuntimeOptions {
    enable_ingest: bool,
    enable_identity_backfill: bool,
    enable_mempool_eviction: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { enable_ingest: true, enable_identity_backfill: true, enable_mempool_eviction: true }
    }
}

/// Builder for constructing a [`VexRuntime`].
///
/// # Examples
///
/// ```no_run
/// # use vex_core::{config::AppConfig, runtime::VexRuntimeBuilder};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AppConfig::load()?;
///
/// let runtime = VexRuntimeBuilder::new().with_config(config).build().await?;
/// runtime.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct VexRuntimeBuilder {
    config: Option<AppConfig>,
    options: RuntimeOptions,
    node: Option<Arc<dyn NodeClient>>,
    feed: Option<Box<dyn BlockFeed>>,
}

impl VexRuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { config: None, options: RuntimeOptions::default(), node: None, feed: None }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses `node` instead of an RPC gateway built from `[node]`.
    #[must_use]
    pub fn with_node(mut self, node: Arc<dyn NodeClient>) -> Self {
        self.node = Some(node);
        self
    }

    /// Uses `feed` instead of the ZeroMQ feed built from `[feed]`.
    #[must_use]
    pub fn with_feed(mut self, feed: Box<dyn BlockFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Skips the real-time pipeline, for one-off historical scans.
    #[must_use]
    pub fn disable_ingest(mut self) -> Self {
        self.options.enable_ingest = false;
        self
    }

    #[must_use]
    pub fn disable_identity_backfill(mut self) -> Self {
        self.options.enable_identity_backfill = false;
        self
    }

    #[must_use]
    pub fn disable_mempool_eviction(mut self) -> Self {
        self.options.enable_mempool_eviction = false;
        self
    }

    /// The configured backend, if any, plus the in-process one when it needs purging.
    #[allow(clippy::type_complexity)]
    fn cache_backend(
        config: &AppConfig,
    ) -> Result<(Option<Arc<dyn CacheBackend>>, Option<Arc<MemoryBackend>>), RuntimeError> {
        if !config.cache.enabled {
            debug!("Cache disabled");
            return Ok((None, None));
        }
        match &config.cache.url {
            Some(url) => {
                let backend = RedisBackend::new(url)
                    .map_err(|e| RuntimeError::Initialization(format!("Redis cache: {e}")))?;
                debug!("Redis cache backend configured");
                Ok((Some(Arc::new(backend)), None))
            }
            None => {
                debug!("In-process cache backend configured");
                let backend = Arc::new(MemoryBackend::new());
                Ok((Some(Arc::clone(&backend) as Arc<dyn CacheBackend>), Some(backend)))
            }
        }
    }

    fn feed(&mut self, config: &AppConfig) -> Option<Box<dyn BlockFeed>> {
        if let Some(feed) = self.feed.take() {
            return Some(feed);
        }
        if !config.feed.enabled {
            return None;
        }
        #[cfg(feature = "zmq-feed")]
        {
            Some(Box::new(crate::ingest::ZmqFeed::new(config.feed.endpoint.clone())))
        }
        #[cfg(not(feature = "zmq-feed"))]
        {
            tracing::warn!("feed enabled but built without zmq-feed, polling instead");
            None
        }
    }

    /// Builds every component and starts the background tasks.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the configuration is missing or invalid, or the
    /// gateway, cache, or store cannot be initialized.
    pub async fn build(mut self) -> Result<VexRuntime, RuntimeError> {
        let config = self.config.take().ok_or_else(|| {
            RuntimeError::ConfigValidation("No configuration provided".to_string())
        })?;
        config.validate().map_err(RuntimeError::ConfigValidation)?;

        info!(
            rpc_url = %config.node.rpc_url,
            feed_enabled = config.feed.enabled,
            cache_enabled = config.cache.enabled,
            ingest_enabled = self.options.enable_ingest,
            "Initializing Vex runtime"
        );

        let chain_state = Arc::new(ChainState::new());

        let node: Arc<dyn NodeClient> = match self.node.take() {
            Some(node) => node,
            None => Arc::new(RpcGateway::new(config.node.gateway_config())?),
        };
        debug!("Node client initialized");

        let (backend, memory_cache) = Self::cache_backend(&config)?;
        let facade = match backend {
            Some(backend) => CachedAccess::new(backend, Arc::clone(&node), config.cache.ttl),
            None => CachedAccess::without_cache(Arc::clone(&node), config.cache.ttl),
        }
        .with_last_known_good_ttl(config.cache.last_known_good_ttl());

        let store: Arc<dyn IndexStore> = Arc::new(
            SqliteIndexStore::connect(&config.store.database_url, config.store.max_connections)
                .await?,
        );
        debug!("Index store initialized");

        let tracking = Arc::new(config.tracking.tracking());
        let batch_size = usize::try_from(config.scanner.batch_size).unwrap_or(usize::MAX);
        let pos_index = Arc::new(
            PosBlockIndex::new(Arc::clone(&node), Arc::clone(&store))
                .with_parallelism(config.scanner.parallelism)
                .with_batch_size(batch_size)
                .with_block_retries(config.scanner.block_retries, config.node.retry_policy()),
        );
        let processor = Arc::new(
            BlockProcessor::new(
                Arc::clone(&node),
                Arc::clone(&store),
                Arc::clone(&pos_index),
                tracking,
            )
            .with_block_retries(config.scanner.block_retries, config.node.retry_policy()),
        );

        let scanner = Arc::new(
            HistoricalScanner::new(
                Arc::clone(&processor),
                ScanSettings {
                    mode: config.scanner.mode,
                    batch_size: config.scanner.batch_size,
                    parallelism: config.scanner.parallelism,
                    start_height: config.scanner.start_height,
                },
            )
            .with_cache(facade.clone()),
        );

        let orphans = Arc::new(OrphanDetector::new(
            Arc::clone(&node),
            Arc::clone(&store),
            Arc::clone(&pos_index),
            Arc::clone(&chain_state),
            config.orphan.safety_depth,
        ));

        let mempool = Arc::new(MempoolTracker::new(config.mempool.max_unconfirmed_age()));

        let ingest = Arc::new(
            IngestPipeline::new(
                Arc::clone(&processor),
                Arc::clone(&orphans),
                Arc::clone(&chain_state),
                Arc::clone(&mempool),
                IngestSettings {
                    mode: config.scanner.mode,
                    poll_interval: config.feed.poll_interval(),
                    safety_poll_interval: config.feed.safety_poll_interval(),
                    reconnect: config.feed.reconnect_policy(),
                    processing_timeout: config.node.timeout(),
                    processing_retry: config.node.retry_policy(),
                    reconcile_depth: config.orphan.reconcile_depth,
                },
            )
            .with_cache(facade.clone()),
        );

        let backfiller = Arc::new(IdentityBackfiller::new(Arc::clone(&node), Arc::clone(&store)));
        backfiller.register_tracked(&config.tracking.identities).await?;

        let feed = if self.options.enable_ingest { self.feed(&config) } else { None };

        let components = VexComponents {
            chain_state,
            node,
            facade,
            store,
            pos_index,
            processor,
            scanner,
            orphans,
            mempool,
            ingest,
            backfiller,
            memory_cache,
        };

        let runtime = VexRuntime::start(
            components,
            config,
            feed,
            self.options.enable_ingest,
            self.options.enable_identity_backfill,
            self.options.enable_mempool_eviction,
        );
        info!("Vex runtime initialization complete");
        Ok(runtime)
    }
}

impl Default for VexRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
