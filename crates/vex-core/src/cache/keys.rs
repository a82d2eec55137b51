//! Cache key scheme and per-category TTLs.
//!
//! | Category | Key | Default TTL |
//! |---|---|---|
//! | chain summary | `chain:summary` | 30 s |
//! | block | `block:<hash>`, `block:height:<n>` | 300 s |
//! | transaction | `tx:<txid>` | 120 s |
//! | address balance | `address:<addr>:balance` | 60 s |
//! | address utxos | `address:<addr>:utxos` | 60 s |
//! | mempool | `mempool:snapshot` | 10 s |
//! | identity | `identity:<addr>` | 300 s |
//! | network info | `network:info` | 30 s |

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix of long-lived shadow copies used for stale fallback.
pub const LKG_PREFIX: &str = "lkg:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    ChainSummary,
    Block,
    Transaction,
    AddressBalance,
    AddressUtxos,
    Mempool,
    Identity,
    NetworkInfo,
}

impl CacheCategory {
    pub const ALL: [Self; 8] = [
        Self::ChainSummary,
        Self::Block,
        Self::Transaction,
        Self::AddressBalance,
        Self::AddressUtxos,
        Self::Mempool,
        Self::Identity,
        Self::NetworkInfo,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::ChainSummary => "chain_summary",
            Self::Block => "block",
            Self::Transaction => "transaction",
            Self::AddressBalance => "address_balance",
            Self::AddressUtxos => "address_utxos",
            Self::Mempool => "mempool",
            Self::Identity => "identity",
            Self::NetworkInfo => "network_info",
        }
    }

    /// Pattern matching every key of this category.
    #[must_use]
    pub fn pattern(self) -> &'static str {
        match self {
            Self::ChainSummary => "chain:*",
            Self::Block => "block:*",
            Self::Transaction => "tx:*",
            Self::AddressBalance => "address:*:balance",
            Self::AddressUtxos => "address:*:utxos",
            Self::Mempool => "mempool:*",
            Self::Identity => "identity:*",
            Self::NetworkInfo => "network:*",
        }
    }

    /// Infers the category of a key built by this module.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.strip_prefix(LKG_PREFIX).unwrap_or(key);
        let (head, tail) = key.split_once(':')?;
        match head {
            "chain" => Some(Self::ChainSummary),
            "block" => Some(Self::Block),
            "tx" => Some(Self::Transaction),
            "mempool" => Some(Self::Mempool),
            "identity" => Some(Self::Identity),
            "network" => Some(Self::NetworkInfo),
            "address" if tail.ends_with(":balance") => Some(Self::AddressBalance),
            "address" if tail.ends_with(":utxos") => Some(Self::AddressUtxos),
            _ => None,
        }
    }
}

/// TTL per category, in seconds. Tunable through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
    pub chain_summary_secs: u64,
    pub block_secs: u64,
    pub transaction_secs: u64,
    pub address_balance_secs: u64,
    pub mempool_secs: u64,
    pub identity_secs: u64,
    pub network_info_secs: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            chain_summary_secs: 30,
            block_secs: 300,
            transaction_secs: 120,
            address_balance_secs: 60,
            mempool_secs: 10,
            identity_secs: 300,
            network_info_secs: 30,
        }
    }
}

impl CacheTtls {
    #[must_use]
    pub fn ttl_for(&self, category: CacheCategory) -> Duration {
        let secs = match category {
            CacheCategory::ChainSummary => self.chain_summary_secs,
            CacheCategory::Block => self.block_secs,
            CacheCategory::Transaction => self.transaction_secs,
            CacheCategory::AddressBalance | CacheCategory::AddressUtxos => {
                self.address_balance_secs
            }
            CacheCategory::Mempool => self.mempool_secs,
            CacheCategory::Identity => self.identity_secs,
            CacheCategory::NetworkInfo => self.network_info_secs,
        };
        Duration::from_secs(secs)
    }
}

#[must_use]
pub fn chain_summary() -> String {
    "chain:summary".to_string()
}

#[must_use]
pub fn block(hash: &str) -> String {
    format!("block:{hash}")
}

#[must_use]
pub fn block_at_height(height: u64) -> String {
    format!("block:height:{height}")
}

#[must_use]
pub fn transaction(txid: &str) -> String {
    format!("tx:{txid}")
}

#[must_use]
pub fn address_balance(address: &str) -> String {
    format!("address:{address}:balance")
}

#[must_use]
pub fn address_utxos(address: &str) -> String {
    format!("address:{address}:utxos")
}

/// Every key belonging to one address.
#[must_use]
pub fn address_pattern(address: &str) -> String {
    format!("address:{address}:*")
}

#[must_use]
pub fn identity(address: &str) -> String {
    format!("identity:{address}")
}

#[must_use]
pub fn mempool() -> String {
    "mempool:snapshot".to_string()
}

#[must_use]
pub fn network_info() -> String {
    "network:info".to_string()
}

#[must_use]
pub fn last_known_good(key: &str) -> String {
    format!("{LKG_PREFIX}{key}")
}
