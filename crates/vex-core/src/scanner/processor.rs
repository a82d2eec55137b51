use std::sync::Arc;

use super::{extract_block_effects, ScanError, ScanMode, Tracking};
use crate::{
    metrics::MetricsCollector,
    pos_index::{classify, Classification, PosBlockIndex},
    rpc::{retry_transient, BlockVerbosity, NodeClient, RetryPolicy},
    store::{ApplyOutcome, BlockEffects, CheckpointUpdate, IndexStore},
    types::{Block, BlockRef},
};

/// Result of persisting a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: ApplyOutcome,
    /// Addresses whose cached balances are now stale.
    pub affected_addresses: Vec<String>,
    /// Highest block in the batch.
    pub tip: Option<BlockRef>,
}

/// Block to persisted rows, shared by the historical scanner and the ingest pipeline.
pub struct BlockProcessor {
    node: Arc<dyn NodeClient>,
    store: Arc<dyn IndexStore>,
    pos_index: Arc<PosBlockIndex>,
    tracking: Arc<Tracking>,
    block_retries: u32,
    retry: RetryPolicy,
    metrics: MetricsCollector,
}

impl BlockProcessor {
    #[must_use]
    pub fn new(
        node: Arc<dyn NodeClient>,
        store: Arc<dyn IndexStore>,
        pos_index: Arc<PosBlockIndex>,
        tracking: Arc<Tracking>,
    ) -> Self {
        Self {
            node,
            store,
            pos_index,
            tracking,
            block_retries: 3,
            retry: RetryPolicy {
                base: std::time::Duration::from_millis(100),
                cap: std::time::Duration::from_secs(2),
                max_attempts: 4,
            },
            metrics: MetricsCollector::new(),
        }
    }

    /// Extra attempts per block fetch and the delay between them.
    #[must_use]
    pub fn with_block_retries(mut self, retries: u32, retry: RetryPolicy) -> Self {
        self.block_retries = retries;
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn node(&self) -> &Arc<dyn NodeClient> {
        &self.node
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    #[must_use]
    pub fn pos_index(&self) -> &Arc<PosBlockIndex> {
        &self.pos_index
    }

    #[must_use]
    pub fn tracking(&self) -> &Tracking {
        &self.tracking
    }

    /// Fetches the block at `height` with full transactions.
    ///
    /// Transient failures are retried up to the configured bound; node errors fail at
    /// once.
    ///
    /// # Errors
    ///
    /// [`ScanError::BlockFetch`] carrying `height` once retries are exhausted.
    pub async fn fetch_block(&self, height: u64, scanner: &str) -> Result<Block, ScanError> {
        retry_transient(
            &self.retry,
            self.block_retries,
            || self.node.block_at(height, BlockVerbosity::Full),
            |attempt, delay, e| {
                tracing::warn!(
                    height,
                    attempt,
                    scanner,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "block fetch failed, retrying"
                );
                self.metrics.record_block_retry(scanner);
            },
        )
        .await
        .map_err(|source| {
            tracing::error!(height, scanner, error = %source, "block fetch failed");
            ScanError::BlockFetch { height, source }
        })
    }

    /// Fetches the block with `hash` with full transactions. No retries beyond the
    /// gateway's own.
    ///
    /// # Errors
    ///
    /// [`ScanError::BlockFetchByHash`] if the node call fails.
    pub async fn fetch_block_by_hash(&self, hash: &str) -> Result<Block, ScanError> {
        self.node
            .block(hash, BlockVerbosity::Full)
            .await
            .map_err(|source| ScanError::BlockFetchByHash { hash: hash.to_string(), source })
    }

    /// Extracts and persists `blocks`, with `checkpoint` in the same transaction.
    ///
    /// Blocks the PoS index has not seen are classified from their transactions and
    /// recorded. Heights already indexed keep their stored classification.
    ///
    /// # Errors
    ///
    /// Returns an error if a block lacks transaction detail or the store write fails.
    /// Nothing from the batch is persisted in that case.
    pub async fn process(
        &self,
        blocks: &[Block],
        mode: ScanMode,
        checkpoint: Option<CheckpointUpdate>,
    ) -> Result<BatchOutcome, ScanError> {
        let mut effects: Vec<BlockEffects> = Vec::with_capacity(blocks.len());
        let mut classified: Vec<(&Block, Classification)> = Vec::new();

        for block in blocks {
            if !block.has_full_transactions() {
                return Err(ScanError::MissingTransactions { height: block.height });
            }
            let classification = match self.pos_index.lookup(block.height).await? {
                Some(entry) if entry.hash == block.hash => Some(Classification::from(&entry)),
                _ => {
                    let fresh = classify(block);
                    if let Some(c) = fresh {
                        classified.push((block, c));
                    }
                    fresh
                }
            };
            effects.push(extract_block_effects(block, &self.tracking, mode, classification));
        }

        if !classified.is_empty() {
            self.pos_index.record(&classified).await?;
        }

        let applied = self.store.apply_blocks(&effects, checkpoint.as_ref()).await?;

        let mut affected_addresses: Vec<String> =
            effects.iter().flat_map(BlockEffects::affected_addresses).collect();
        affected_addresses.sort_unstable();
        affected_addresses.dedup();

        let tip = blocks.iter().max_by_key(|b| b.height).map(Block::block_ref);
        Ok(BatchOutcome { applied, affected_addresses, tip })
    }
}
