//! Persisted height to stake/work classification.
//!
//! The node reports a block's type in `validationtype`. When a node does not, the block
//! is inspected for a coinstake-shaped transaction and the entry is tagged
//! [`Classifier::Heuristic`] so it can be re-validated later. Entries are append-only
//! per height and only a reorg removes them.

use futures::{stream, StreamExt, TryStreamExt};
use std::{collections::HashSet, ops::RangeInclusive, sync::Arc};

use crate::{
    rpc::{retry_transient, BlockVerbosity, NodeClient, RetryPolicy},
    scanner::ScanError,
    store::{IndexStore, StoreError},
    types::{Block, Classifier, PosIndexEntry},
};

const DEFAULT_BATCH_SIZE: usize = 500;

/// Stake or work, and how that was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub is_stake: bool,
    pub classifier: Classifier,
}

impl From<&PosIndexEntry> for Classification {
    fn from(entry: &PosIndexEntry) -> Self {
        Self { is_stake: entry.is_stake, classifier: entry.classifier }
    }
}

/// Classifies a block from the node's `validationtype`, falling back to transaction
/// inspection.
///
/// Returns `None` when the node gave no type and the block carries no transaction
/// detail to inspect.
#[must_use]
pub fn classify(block: &Block) -> Option<Classification> {
    match block.validationtype.as_deref() {
        Some("stake") => {
            return Some(Classification { is_stake: true, classifier: Classifier::NodeField })
        }
        Some("work") => {
            return Some(Classification { is_stake: false, classifier: Classifier::NodeField })
        }
        _ => {}
    }

    if !block.has_full_transactions() {
        return None;
    }
    let is_stake = block.transactions().any(|tx| tx.is_coinstake_shaped());
    Some(Classification { is_stake, classifier: Classifier::Heuristic })
}

/// Counts from one [`PosBlockIndex::build`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub already_indexed: u64,
    pub classified: u64,
    pub stake_blocks: u64,
    pub heuristic: u64,
}

pub struct PosBlockIndex {
    node: Arc<dyn NodeClient>,
    store: Arc<dyn IndexStore>,
    parallelism: usize,
    batch_size: usize,
    block_retries: u32,
    retry: RetryPolicy,
}

impl PosBlockIndex {
    #[must_use]
    pub fn new(node: Arc<dyn NodeClient>, store: Arc<dyn IndexStore>) -> Self {
        Self {
            node,
            store,
            parallelism: 16,
            batch_size: DEFAULT_BATCH_SIZE,
            block_retries: 3,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Heights classified and persisted together by [`build`](Self::build).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Extra attempts per block fetch and the delay between them.
    #[must_use]
    pub fn with_block_retries(mut self, retries: u32, retry: RetryPolicy) -> Self {
        self.block_retries = retries;
        self.retry = retry;
        self
    }

    /// Classifies every height in `range` that is not indexed yet.
    ///
    /// Missing heights are handled in batches: each batch is fetched with bounded
    /// parallelism and persisted before the next starts. Full transactions are fetched
    /// only for blocks the node did not type.
    ///
    /// # Errors
    ///
    /// Returns the first fetch or store failure once per-block retries are exhausted.
    /// Batches persisted before the failure stay, so a rerun resumes after them.
    pub async fn build(&self, range: RangeInclusive<u64>) -> Result<BuildReport, ScanError> {
        let (from, to) = (*range.start(), *range.end());
        if from > to {
            return Err(ScanError::InvalidRange { from, to });
        }

        let indexed: HashSet<u64> =
            self.store.pos_entries(from, to).await?.into_iter().map(|e| e.height).collect();
        let missing: Vec<u64> = range.filter(|h| !indexed.contains(h)).collect();

        let mut report =
            BuildReport { already_indexed: indexed.len() as u64, ..BuildReport::default() };
        if missing.is_empty() {
            return Ok(report);
        }

        tracing::info!(from, to, missing = missing.len(), "building pos block index");

        for batch in missing.chunks(self.batch_size) {
            let mut entries: Vec<PosIndexEntry> = stream::iter(batch.iter().copied())
                .map(|height| self.classify_height(height))
                .buffer_unordered(self.parallelism)
                .try_collect()
                .await?;
            entries.sort_by_key(|e| e.height);
            self.store.insert_pos_entries(&entries).await?;

            for entry in &entries {
                report.classified += 1;
                report.stake_blocks += u64::from(entry.is_stake);
                report.heuristic += u64::from(entry.classifier == Classifier::Heuristic);
            }
            tracing::debug!(
                from,
                to,
                through = entries.last().map(|e| e.height),
                classified = report.classified,
                "pos index batch persisted"
            );
        }

        if report.heuristic > 0 {
            tracing::warn!(
                from,
                to,
                heuristic = report.heuristic,
                "node did not report block types, classified by inspection"
            );
        }
        tracing::info!(from, to, classified = report.classified, stake = report.stake_blocks, "pos block index built");
        Ok(report)
    }

    async fn classify_height(&self, height: u64) -> Result<PosIndexEntry, ScanError> {
        let fetch = |verbosity| async move {
            retry_transient(
                &self.retry,
                self.block_retries,
                || self.node.block_at(height, verbosity),
                |attempt, delay, e| {
                    tracing::warn!(
                        height,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "pos index fetch failed, retrying"
                    );
                },
            )
            .await
            .map_err(|source| ScanError::BlockFetch { height, source })
        };

        let header = fetch(BlockVerbosity::Header).await?;
        let (block, classification) = match classify(&header) {
            Some(classification) => (header, classification),
            None => {
                let full = fetch(BlockVerbosity::Full).await?;
                let classification =
                    classify(&full).ok_or(ScanError::MissingTransactions { height })?;
                (full, classification)
            }
        };

        Ok(PosIndexEntry {
            height,
            hash: block.hash,
            is_stake: classification.is_stake,
            classifier: classification.classifier,
        })
    }

    /// Heights in `range` indexed as stake blocks, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn stake_heights(&self, range: RangeInclusive<u64>) -> Result<Vec<u64>, StoreError> {
        Ok(self
            .store
            .pos_entries(*range.start(), *range.end())
            .await?
            .into_iter()
            .filter(|e| e.is_stake)
            .map(|e| e.height)
            .collect())
    }

    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn lookup(&self, height: u64) -> Result<Option<PosIndexEntry>, StoreError> {
        Ok(self.store.pos_entries(height, height).await?.into_iter().next())
    }

    /// Records classifications of blocks already fetched with full detail.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn record(&self, blocks: &[(&Block, Classification)]) -> Result<u64, StoreError> {
        let entries: Vec<PosIndexEntry> = blocks
            .iter()
            .map(|(block, c)| PosIndexEntry {
                height: block.height,
                hash: block.hash.clone(),
                is_stake: c.is_stake,
                classifier: c.classifier,
            })
            .collect();
        self.store.insert_pos_entries(&entries).await
    }

    /// Drops entries at and above `height`; the chain there changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn invalidate_from(&self, height: u64) -> Result<u64, StoreError> {
        let removed = self.store.invalidate_pos_from(height).await?;
        tracing::info!(height, removed, "pos block index invalidated");
        Ok(removed)
    }
}
