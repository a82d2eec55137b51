//! Block extraction and the historical scanner.
//!
//! Both ingestion paths share [`BlockProcessor`]: the historical scanner feeds it
//! checkpointed batches over a height range, the real-time pipeline feeds it one
//! notified block at a time. Extraction is a pure function of the block and the
//! tracking scope, so rescanning a range converges to the same rows.

pub mod extract;
pub mod historical;
pub mod processor;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{rpc::RpcError, store::StoreError};

pub use extract::{extract_block_effects, reward_payout, staking_source, Tracking};
pub use historical::{HistoricalScanner, ScanReport, ScanSettings};
pub use processor::{BatchOutcome, BlockProcessor};

/// What a scan extracts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Every block: UTXO creations, spends, identities, and rewards.
    #[default]
    Full,
    /// Stake blocks only, staking rewards only.
    Rewards,
}

impl ScanMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Rewards => "rewards",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "rewards" => Ok(Self::Rewards),
            other => Err(format!("unknown scan mode '{other}', expected 'full' or 'rewards'")),
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ScanError {
    #[error("invalid range: {from} > {to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("failed to fetch block {height}: {source}")]
    BlockFetch {
        height: u64,
        #[source]
        source: RpcError,
    },

    #[error("failed to fetch block {hash}: {source}")]
    BlockFetchByHash {
        hash: String,
        #[source]
        source: RpcError,
    },

    #[error("block {height} was returned without transaction detail")]
    MissingTransactions { height: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ScanError {
    /// Height at which the scan stopped, when the failure is tied to one.
    #[must_use]
    pub fn height(&self) -> Option<u64> {
        match self {
            Self::BlockFetch { height, .. } | Self::MissingTransactions { height } => Some(*height),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::BlockFetch { source, .. } | Self::BlockFetchByHash { source, .. } => {
                source.is_transient()
            }
            _ => false,
        }
    }
}
