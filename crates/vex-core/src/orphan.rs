//! Orphaned block detection and compensation.
//!
//! A block is orphaned when the node's canonical block at its height has a different
//! hash. Rows derived from an orphaned block must not survive: the index has to look
//! as if a fresh scan never saw that block.
//!
//! ```text
//! Indexed:    100 ─── 101 ─── 102 ─── 103
//!              A       B       C       D
//! Node:       100 ─── 101 ─── 102' ── 103' ── 104'
//!              A       B       E       F       G
//!
//! reconcile(depth = 4)
//!   ├─> 102 and 103 orphaned, lowest = 102
//!   ├─> revert D, then C (rewards deleted, spent UTXOs unspent, created UTXOs deleted)
//!   ├─> checkpoints rewound to 101, PoS entries from 102 dropped
//!   ├─> indexed tip rewound to (101, B)
//!   └─> resume_from = 102 (caller re-applies E, F, G)
//! ```
//!
//! Verdict confidence is high only when the canonical block at the height is at least
//! `safety_depth` deep and the index itself holds `safety_depth` blocks from that height
//! up. A comparison against either chain near its tip can still flip.

use std::sync::Arc;
use thiserror::Error;

use crate::{
    chain::ChainState,
    metrics::MetricsCollector,
    pos_index::PosBlockIndex,
    rpc::{BlockVerbosity, NodeClient, RpcError},
    store::{IndexStore, RevertOutcome, StoreError},
    types::BlockRef,
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OrphanError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Low,
}

/// Verdict for one block hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanCheck {
    pub height: u64,
    pub is_orphan: bool,
    /// The node's block at the same height; `None` when the node is below that height.
    pub canonical_hash: Option<String>,
    pub confidence: Confidence,
}

/// Outcome of [`OrphanDetector::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    /// Reverted blocks, highest first.
    pub reverted: Vec<BlockRef>,
    pub rows: RevertOutcome,
    /// Lowest orphaned height; canonical blocks from here must be re-applied.
    pub resume_from: Option<u64>,
}

impl ReconcileReport {
    #[must_use]
    pub fn found_orphans(&self) -> bool {
        self.resume_from.is_some()
    }
}

pub struct OrphanDetector {
    node: Arc<dyn NodeClient>,
    store: Arc<dyn IndexStore>,
    pos_index: Arc<PosBlockIndex>,
    chain: Arc<ChainState>,
    safety_depth: u64,
    metrics: MetricsCollector,
}

impl OrphanDetector {
    #[must_use]
    pub fn new(
        node: Arc<dyn NodeClient>,
        store: Arc<dyn IndexStore>,
        pos_index: Arc<PosBlockIndex>,
        chain: Arc<ChainState>,
        safety_depth: u64,
    ) -> Self {
        Self { node, store, pos_index, chain, safety_depth, metrics: MetricsCollector::new() }
    }

    /// Whether the block with `hash` is still on the node's best chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not know `hash`, or the node or the store
    /// cannot be reached.
    pub async fn is_orphan(&self, hash: &str) -> Result<OrphanCheck, OrphanError> {
        let candidate = self.node.block(hash, BlockVerbosity::Header).await?;
        self.check_at(candidate.height, hash).await
    }

    /// Compares `hash` against the node's canonical block at `height`.
    ///
    /// Confidence is [`Confidence::High`] when both hold:
    /// - the node's block at `height` has at least `safety_depth` confirmations;
    /// - the highest indexed block is at least `safety_depth - 1` above `height`.
    ///
    /// A height the node no longer reaches is an orphan with low confidence.
    ///
    /// # Errors
    ///
    /// Returns an error if the node or the store cannot be reached.
    pub async fn check_at(&self, height: u64, hash: &str) -> Result<OrphanCheck, OrphanError> {
        let indexed_top = self.store.recent_blocks(1).await?.first().map(|b| b.height);
        Ok(self.verdict(height, hash, indexed_top).await?)
    }

    async fn verdict(
        &self,
        height: u64,
        hash: &str,
        indexed_top: Option<u64>,
    ) -> Result<OrphanCheck, RpcError> {
        let canonical = match self.node.block_at(height, BlockVerbosity::Header).await {
            Ok(block) => block,
            // The node's chain is now shorter than this height.
            Err(e) if e.is_not_found() => {
                return Ok(OrphanCheck {
                    height,
                    is_orphan: true,
                    canonical_hash: None,
                    confidence: Confidence::Low,
                })
            }
            Err(e) => return Err(e),
        };

        let canonical_deep = u64::try_from(canonical.confirmations)
            .is_ok_and(|confirmations| confirmations >= self.safety_depth);
        let indexed_deep = indexed_top
            .and_then(|top| top.checked_sub(height))
            .is_some_and(|above| above + 1 >= self.safety_depth);

        Ok(OrphanCheck {
            height,
            is_orphan: canonical.hash != hash,
            canonical_hash: Some(canonical.hash),
            confidence: if canonical_deep && indexed_deep { Confidence::High } else { Confidence::Low },
        })
    }

    /// Checks the `depth` most recently indexed blocks and compensates for orphans.
    ///
    /// Every indexed block at or above the lowest orphaned height is reverted, scan
    /// checkpoints are rewound below it, PoS entries from it are dropped, and the
    /// indexed tip is moved to the block beneath it.
    ///
    /// # Errors
    ///
    /// Returns the first node or store failure. Compensation already applied stays
    /// applied; rerunning converges.
    pub async fn reconcile(&self, depth: u32) -> Result<ReconcileReport, OrphanError> {
        let mut recent = self.store.recent_blocks(depth).await?;
        recent.sort_by_key(|b| b.height);

        let mut report = ReconcileReport { checked: recent.len(), ..ReconcileReport::default() };
        let indexed_top = recent.last().map(|b| b.height);
        let mut lowest: Option<u64> = None;
        for block in &recent {
            let check = self.verdict(block.height, &block.hash, indexed_top).await?;
            if check.is_orphan {
                tracing::warn!(
                    height = block.height,
                    hash = %block.hash,
                    canonical = ?check.canonical_hash,
                    confidence = ?check.confidence,
                    "orphaned block detected"
                );
                lowest = Some(block.height);
                break;
            }
        }

        let Some(lowest) = lowest else {
            tracing::debug!(checked = report.checked, "no orphaned blocks");
            return Ok(report);
        };

        for block in recent.iter().rev().filter(|b| b.height >= lowest) {
            let rows = self.store.revert_block(&block.hash).await?;
            tracing::info!(
                height = block.height,
                hash = %block.hash,
                utxos_removed = rows.utxos_removed,
                spends_reverted = rows.spends_reverted,
                rewards_removed = rows.rewards_removed,
                "reverted orphaned block"
            );
            report.rows.utxos_removed += rows.utxos_removed;
            report.rows.spends_reverted += rows.spends_reverted;
            report.rows.rewards_removed += rows.rewards_removed;
            report.reverted.push(block.clone());
        }

        let below = lowest.saturating_sub(1);
        self.store.rewind_checkpoints(below).await?;
        self.pos_index.invalidate_from(lowest).await?;

        let below_hash = match self.store.indexed_block_at(below).await? {
            Some(block) => Some(block.hash),
            None => self.node.block_hash(below).await.ok(),
        };
        if let Some(hash) = below_hash {
            self.chain.rewind_indexed_tip(below, &hash).await;
        }

        let reorg_depth = recent.last().map_or(0, |b| b.height + 1 - lowest);
        self.metrics.record_reorg(reorg_depth, lowest);
        self.metrics.record_orphaned_blocks(report.reverted.len());

        tracing::warn!(
            from_height = lowest,
            reverted = report.reverted.len(),
            "orphan compensation complete"
        );
        report.resume_from = Some(lowest);
        Ok(report)
    }
}
