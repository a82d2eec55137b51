//! Relational store for the derived index.
//!
//! The store owns canonical historical truth: UTXOs, staking rewards, identities, the
//! PoS block index, and scanner checkpoints. Every write is conflict tolerant on a
//! natural key, so the historical scanner and the real-time pipeline can race over the
//! same heights and still converge.

mod schema;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{
    BlockRef, IdentityRecord, PosIndexEntry, ScanCheckpoint, Spend, StakingReward, Utxo,
};

pub use sqlite::SqliteIndexStore;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid stored value: {0}")]
    Decode(String),
}

/// An identity output seen in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySighting {
    pub address: String,
    pub name: Option<String>,
    pub height: u64,
}

/// Everything one block contributes to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEffects {
    pub block: BlockRef,
    pub created: Vec<Utxo>,
    pub spends: Vec<Spend>,
    pub rewards: Vec<StakingReward>,
    pub identities: Vec<IdentitySighting>,
}

impl BlockEffects {
    #[must_use]
    pub fn empty(block: BlockRef) -> Self {
        Self {
            block,
            created: Vec::new(),
            spends: Vec::new(),
            rewards: Vec::new(),
            identities: Vec::new(),
        }
    }

    /// Addresses whose balance this block changes, deduplicated.
    #[must_use]
    pub fn affected_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .created
            .iter()
            .map(|u| u.address.clone())
            .chain(self.rewards.iter().map(|r| r.identity_address.clone()))
            .collect();
        addresses.sort_unstable();
        addresses.dedup();
        addresses
    }
}

/// Checkpoint to persist in the same transaction as a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointUpdate {
    pub scanner_id: String,
    pub height: u64,
}

/// Rows changed by [`IndexStore::apply_blocks`]. Zero on a rescan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub blocks: u64,
    pub utxos_inserted: u64,
    pub spends_applied: u64,
    pub rewards_inserted: u64,
}

impl std::ops::AddAssign for ApplyOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.blocks += rhs.blocks;
        self.utxos_inserted += rhs.utxos_inserted;
        self.spends_applied += rhs.spends_applied;
        self.rewards_inserted += rhs.rewards_inserted;
    }
}

/// Rows changed by [`IndexStore::revert_block`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevertOutcome {
    pub utxos_removed: u64,
    pub spends_reverted: u64,
    pub rewards_removed: u64,
}

/// Persistence operations for the derived index.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Applies block effects in height order, then the checkpoint, in one transaction.
    ///
    /// Within a block, creations are applied before spends. A spend of an outpoint the
    /// store has not seen yet is remembered and applied when the outpoint appears.
    async fn apply_blocks(
        &self,
        blocks: &[BlockEffects],
        checkpoint: Option<&CheckpointUpdate>,
    ) -> Result<ApplyOutcome, StoreError>;

    /// Undoes everything a block contributed: its rewards and created UTXOs are
    /// deleted and the UTXOs it spent become unspent again.
    async fn revert_block(&self, hash: &str) -> Result<RevertOutcome, StoreError>;

    async fn checkpoint(&self, scanner_id: &str) -> Result<Option<ScanCheckpoint>, StoreError>;

    /// Lowers every checkpoint above `height` to `height`.
    async fn rewind_checkpoints(&self, height: u64) -> Result<u64, StoreError>;

    /// Most recently applied blocks, highest first.
    async fn recent_blocks(&self, limit: u32) -> Result<Vec<BlockRef>, StoreError>;

    async fn indexed_block_at(&self, height: u64) -> Result<Option<BlockRef>, StoreError>;

    async fn utxo(&self, txid: &str, vout: u32) -> Result<Option<Utxo>, StoreError>;

    async fn utxos_for_address(
        &self,
        address: &str,
        include_spent: bool,
    ) -> Result<Vec<Utxo>, StoreError>;

    async fn rewards_for_identity(&self, address: &str) -> Result<Vec<StakingReward>, StoreError>;

    async fn pos_entries(&self, from: u64, to: u64) -> Result<Vec<PosIndexEntry>, StoreError>;

    /// Inserts entries whose height is not yet indexed. Existing heights are kept.
    async fn insert_pos_entries(&self, entries: &[PosIndexEntry]) -> Result<u64, StoreError>;

    async fn invalidate_pos_from(&self, height: u64) -> Result<u64, StoreError>;

    /// Records an identity if unknown, keeping any existing name.
    async fn register_identity(&self, address: &str, name: Option<&str>) -> Result<(), StoreError>;

    async fn identity(&self, address: &str) -> Result<Option<IdentityRecord>, StoreError>;

    async fn identities_missing_creation(
        &self,
        limit: u32,
    ) -> Result<Vec<IdentityRecord>, StoreError>;

    async fn set_identity_creation(
        &self,
        address: &str,
        height: u64,
        txid: &str,
    ) -> Result<(), StoreError>;
}
