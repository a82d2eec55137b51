//! Core type definitions for node responses, indexed entities, and cache status.
//!
//! # Type Categories
//!
//! ## Node Protocol Types
//! - [`JsonRpcError`]: Error object of a JSON-RPC 1.0 envelope
//! - [`Block`], [`Transaction`], [`TxInput`], [`TxOutput`]: Decoded `getblock` verbosity 2
//! - [`ChainSummary`], [`AddressBalance`], [`AddressUtxo`], [`IdentityInfo`]: Typed read calls
//!
//! ## Indexed Entities
//! - [`BlockRef`], [`Utxo`], [`Spend`], [`StakingReward`], [`IdentityRecord`],
//!   [`PosIndexEntry`], [`ScanCheckpoint`]
//!
//! # Monetary Values
//!
//! All amounts are integer satoshis. The node reports decimals in `value` and, with the
//! address index enabled, integers in `valueSat`; the integer field wins when present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Satoshis per whole coin.
pub const SATS_PER_COIN: i64 = 100_000_000;

/// Converts a decimal coin amount to satoshis, rounding to the nearest unit.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn coins_to_sats(value: f64) -> i64 {
    (value * SATS_PER_COIN as f64).round() as i64
}

/// Error object returned inside a JSON-RPC envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

/// Whether a value came from the cache, from the node, or from a last-known-good copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum CacheStatus {
    /// Served from a live cache entry.
    Hit,
    /// Fetched from the node and written back.
    Miss,
    /// The node fetch failed and a last-known-good copy was served instead.
    ///
    /// Callers must surface this as approximate data.
    Stale,
}

impl CacheStatus {
    #[must_use]
    pub fn is_stale(self) -> bool {
        matches!(self, Self::Stale)
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit => write!(f, "HIT"),
            Self::Miss => write!(f, "MISS"),
            Self::Stale => write!(f, "STALE"),
        }
    }
}

/// Output of `getblockchaininfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSummary {
    pub chain: String,
    pub blocks: u64,
    #[serde(default)]
    pub headers: u64,
    pub bestblockhash: String,
    #[serde(default)]
    pub difficulty: f64,
    #[serde(default)]
    pub verificationprogress: f64,
    #[serde(default)]
    pub chainwork: Option<String>,
}

/// Output of `getaddressbalance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBalance {
    pub balance: i64,
    pub received: i64,
}

/// One element of `getaddressutxos`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressUtxo {
    pub address: String,
    pub txid: String,
    pub output_index: u32,
    pub satoshis: i64,
    pub height: u64,
}

/// Identity definition as returned by `getidentity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityDefinition {
    pub name: String,
    pub identityaddress: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub primaryaddresses: Vec<String>,
}

/// Output of `getidentity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub identity: IdentityDefinition,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub blockheight: Option<u64>,
    #[serde(default)]
    pub txid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityOutputRef {
    pub txid: String,
    pub voutnum: u32,
}

/// One revision in `getidentityhistory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRevision {
    pub height: u64,
    pub blockhash: String,
    pub output: IdentityOutputRef,
}

/// Output of `getidentityhistory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityHistory {
    #[serde(default)]
    pub fullyqualifiedname: Option<String>,
    #[serde(default)]
    pub history: Vec<IdentityRevision>,
}

impl IdentityHistory {
    /// The earliest revision, which is the registration.
    #[must_use]
    pub fn creation(&self) -> Option<&IdentityRevision> {
        self.history.iter().min_by_key(|rev| rev.height)
    }
}

/// Identity primary output embedded in a script by registrations and updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPrimary {
    pub name: String,
    pub identityaddress: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptPubKey {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub identityprimary: Option<IdentityPrimary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutput {
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub value_sat: Option<i64>,
    pub n: u32,
    #[serde(default)]
    pub script_pub_key: ScriptPubKey,
}

impl TxOutput {
    #[must_use]
    pub fn amount_sats(&self) -> i64 {
        self.value_sat.unwrap_or_else(|| coins_to_sats(self.value))
    }

    #[must_use]
    pub fn addresses(&self) -> &[String] {
        &self.script_pub_key.addresses
    }

    /// The single address this output pays, if it pays exactly one.
    #[must_use]
    pub fn sole_address(&self) -> Option<&str> {
        match self.script_pub_key.addresses.as_slice() {
            [address] => Some(address.as_str()),
            _ => None,
        }
    }

    /// Zero value and no destination, the marker output of a coinstake.
    #[must_use]
    pub fn is_empty_marker(&self) -> bool {
        self.amount_sats() == 0 && self.script_pub_key.addresses.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInput {
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub value_sat: Option<i64>,
    #[serde(default)]
    pub address: Option<String>,
}

impl TxInput {
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.coinbase.is_some()
    }

    /// The outpoint this input spends.
    #[must_use]
    pub fn outpoint(&self) -> Option<(&str, u32)> {
        match (&self.txid, self.vout) {
            (Some(txid), Some(vout)) => Some((txid.as_str(), vout)),
            _ => None,
        }
    }

    /// Value of the spent output when the node embedded it.
    #[must_use]
    pub fn embedded_amount_sats(&self) -> Option<i64> {
        self.value_sat.or_else(|| self.value.map(coins_to_sats))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<TxInput>,
    #[serde(default)]
    pub vout: Vec<TxOutput>,
    #[serde(default)]
    pub blockhash: Option<String>,
    #[serde(default)]
    pub height: Option<u64>,
    #[serde(default)]
    pub confirmations: Option<i64>,
    #[serde(default)]
    pub time: Option<i64>,
}

impl Transaction {
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.vin.first().is_some_and(TxInput::is_coinbase)
    }

    /// Has real inputs and opens with an empty marker output.
    #[must_use]
    pub fn is_coinstake_shaped(&self) -> bool {
        !self.is_coinbase() &&
            !self.vin.is_empty() &&
            self.vout.len() > 1 &&
            self.vout.first().is_some_and(TxOutput::is_empty_marker)
    }

    #[must_use]
    pub fn total_output_sats(&self) -> i64 {
        self.vout.iter().map(TxOutput::amount_sats).sum()
    }

    /// Fee from the values the node embedded in the inputs.
    ///
    /// `None` for coinbase transactions, when any input value is unknown, and when the
    /// outputs exceed the inputs (stake rewards mint value). Never negative.
    #[must_use]
    pub fn fee(&self) -> Option<i64> {
        self.fee_with(|_, _| None)
    }

    /// Fee using `resolve` for inputs whose value the node did not embed.
    #[must_use]
    pub fn fee_with<F>(&self, mut resolve: F) -> Option<i64>
    where
        F: FnMut(&str, u32) -> Option<i64>,
    {
        if self.vin.is_empty() || self.is_coinbase() {
            return None;
        }

        let mut inputs = 0i64;
        for input in &self.vin {
            let value = match input.embedded_amount_sats() {
                Some(value) => value,
                None => {
                    let (txid, vout) = input.outpoint()?;
                    resolve(txid, vout)?
                }
            };
            inputs = inputs.checked_add(value)?;
        }

        let fee = inputs.checked_sub(self.total_output_sats())?;
        (fee >= 0).then_some(fee)
    }
}

/// A transaction list entry: ids at verbosity 1, full objects at verbosity 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockTx {
    Id(String),
    Full(Box<Transaction>),
}

impl BlockTx {
    #[must_use]
    pub fn txid(&self) -> &str {
        match self {
            Self::Id(txid) => txid,
            Self::Full(tx) => &tx.txid,
        }
    }
}

/// Output of `getblock`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    pub height: u64,
    #[serde(default)]
    pub confirmations: i64,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub previousblockhash: Option<String>,
    #[serde(default)]
    pub nextblockhash: Option<String>,
    /// `stake` or `work` on nodes that report it.
    #[serde(default)]
    pub validationtype: Option<String>,
    #[serde(default)]
    pub tx: Vec<BlockTx>,
}

impl Block {
    /// Full transactions. Empty when the block was fetched at verbosity 1.
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.tx.iter().filter_map(|entry| match entry {
            BlockTx::Full(tx) => Some(tx.as_ref()),
            BlockTx::Id(_) => None,
        })
    }

    pub fn txids(&self) -> impl Iterator<Item = &str> {
        self.tx.iter().map(BlockTx::txid)
    }

    #[must_use]
    pub fn has_full_transactions(&self) -> bool {
        self.tx.iter().all(|entry| matches!(entry, BlockTx::Full(_))) && !self.tx.is_empty()
    }

    #[must_use]
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            height: self.height,
            hash: self.hash.clone(),
            previous_hash: self.previousblockhash.clone(),
            time: self.time,
        }
    }
}

/// Height, hash, and parent of an applied block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub height: u64,
    pub hash: String,
    pub previous_hash: Option<String>,
    pub time: i64,
}

/// An output paying a tracked address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub address: String,
    pub value_sats: i64,
    pub height: u64,
    pub block_hash: String,
    pub spent: bool,
    pub spent_txid: Option<String>,
    pub spent_height: Option<u64>,
}

/// An input consuming `(txid, vout)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spend {
    pub txid: String,
    pub vout: u32,
    pub spending_txid: String,
    pub height: u64,
    pub block_hash: String,
}

/// How a block was classified as stake or work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classifier {
    /// The node reported the block type directly.
    NodeField,
    /// Inferred from the block's transactions; not authoritative.
    Heuristic,
}

impl Classifier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NodeField => "node_field",
            Self::Heuristic => "heuristic",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "node_field" => Some(Self::NodeField),
            "heuristic" => Some(Self::Heuristic),
            _ => None,
        }
    }
}

/// A stake reward paid to an identity's own address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingReward {
    pub identity_address: String,
    pub height: u64,
    pub block_hash: String,
    pub block_time: i64,
    pub txid: String,
    pub vout: u32,
    pub amount_sats: i64,
    pub classifier: Classifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub address: String,
    pub name: Option<String>,
    pub first_seen_height: Option<u64>,
    pub creation_height: Option<u64>,
    pub creation_txid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosIndexEntry {
    pub height: u64,
    pub hash: String,
    pub is_stake: bool,
    pub classifier: Classifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    pub scanner_id: String,
    pub height: u64,
    pub updated_at: DateTime<Utc>,
}
