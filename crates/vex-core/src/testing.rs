//! In-memory node and chain fixtures for tests.
//!
//! [`MockNode`] implements [`NodeClient`] over a chain held in memory. Blocks replaced
//! by [`MockNode::reorg`] stay fetchable by hash with `confirmations == -1`, the way
//! the daemon reports stale blocks.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use crate::{
    rpc::{
        errors::{RPC_INVALID_ADDRESS_OR_KEY, RPC_INVALID_PARAMETER},
        BlockVerbosity, NodeClient, RpcError,
    },
    types::{
        AddressBalance, AddressUtxo, Block, BlockTx, ChainSummary, IdentityDefinition,
        IdentityHistory, IdentityInfo, IdentityOutputRef, IdentityPrimary, IdentityRevision,
        ScriptPubKey, Transaction, TxInput, TxOutput, SATS_PER_COIN,
    },
};

#[derive(Default)]
struct MockChain {
    canonical: BTreeMap<u64, String>,
    blocks: HashMap<String, Block>,
    mempool: Vec<String>,
    identities: HashMap<String, IdentityInfo>,
    histories: HashMap<String, IdentityHistory>,
    balances: HashMap<String, AddressBalance>,
    failing_heights: HashMap<u64, u32>,
    calls: HashMap<&'static str, usize>,
}

impl MockChain {
    fn tip(&self) -> Option<u64> {
        self.canonical.keys().next_back().copied()
    }

    fn is_canonical(&self, block: &Block) -> bool {
        self.canonical.get(&block.height) == Some(&block.hash)
    }

    fn render(&self, hash: &str, verbosity: BlockVerbosity) -> Option<Block> {
        let mut block = self.blocks.get(hash)?.clone();
        let tip = self.tip().unwrap_or(0);

        if self.is_canonical(&block) {
            block.confirmations = i64::try_from(tip - block.height + 1).unwrap_or(i64::MAX);
            block.nextblockhash = self.canonical.get(&(block.height + 1)).cloned();
        } else {
            block.confirmations = -1;
            block.nextblockhash = None;
        }

        if verbosity == BlockVerbosity::Header {
            block.tx = block.tx.iter().map(|entry| BlockTx::Id(entry.txid().to_string())).collect();
        }
        Some(block)
    }
}

/// In-memory [`NodeClient`] with failure injection.
#[derive(Default)]
pub struct MockNode {
    chain: Mutex<MockChain>,
    offline: AtomicBool,
    failures_remaining: AtomicU32,
}

impl MockNode {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        let node = Self::new();
        for block in blocks {
            node.push_block(block);
        }
        node
    }

    /// Makes `block` canonical at its height.
    pub fn push_block(&self, block: Block) {
        let mut chain = self.chain.lock();
        chain.canonical.insert(block.height, block.hash.clone());
        chain.blocks.insert(block.hash.clone(), block);
    }

    /// Replaces the canonical chain from the first replacement's height upward.
    pub fn reorg(&self, replacement: impl IntoIterator<Item = Block>) {
        let replacement: Vec<Block> = replacement.into_iter().collect();
        let Some(from) = replacement.iter().map(|b| b.height).min() else {
            return;
        };

        let mut chain = self.chain.lock();
        chain.canonical.retain(|height, _| *height < from);
        for block in replacement {
            chain.canonical.insert(block.height, block.hash.clone());
            chain.blocks.insert(block.hash.clone(), block);
        }
    }

    /// Extends the chain with `count` work blocks paying `miner`.
    pub fn mine(&self, count: u64, miner: &str) -> Vec<Block> {
        let mut mined = Vec::new();
        for _ in 0..count {
            let (height, parent) = {
                let chain = self.chain.lock();
                match chain.tip() {
                    Some(tip) => (tip + 1, chain.canonical.get(&tip).cloned()),
                    None => (0, None),
                }
            };
            let hash = block_hash(height, "main");
            let coinbase = coinbase(&format!("cb-{hash}"), &[(miner, 3 * SATS_PER_COIN)]);
            let block = block(height, &hash, parent.as_deref(), Some("work"), vec![coinbase]);
            self.push_block(block.clone());
            mined.push(block);
        }
        mined
    }

    pub fn set_mempool(&self, txids: Vec<String>) {
        self.chain.lock().mempool = txids;
    }

    pub fn set_identity(&self, info: IdentityInfo) {
        self.chain.lock().identities.insert(info.identity.identityaddress.clone(), info);
    }

    pub fn set_identity_history(&self, address: &str, history: IdentityHistory) {
        self.chain.lock().histories.insert(address.to_string(), history);
    }

    pub fn set_balance(&self, address: &str, balance: AddressBalance) {
        self.chain.lock().balances.insert(address.to_string(), balance);
    }

    /// Every call fails with `Unavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// The next `count` calls fail with `Unavailable`.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// The next `times` block fetches at `height` fail with `Unavailable`.
    pub fn fail_block_at(&self, height: u64, times: u32) {
        self.chain.lock().failing_heights.insert(height, times);
    }

    #[must_use]
    pub fn calls(&self, method: &str) -> usize {
        self.chain.lock().calls.get(method).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn tip(&self) -> Option<u64> {
        self.chain.lock().tip()
    }

    #[must_use]
    pub fn canonical_hash(&self, height: u64) -> Option<String> {
        self.chain.lock().canonical.get(&height).cloned()
    }

    fn enter(&self, method: &'static str) -> Result<(), RpcError> {
        *self.chain.lock().calls.entry(method).or_insert(0) += 1;

        if self.offline.load(Ordering::SeqCst) {
            return Err(RpcError::Unavailable("mock node offline".to_string()));
        }
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RpcError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn check_height(&self, height: u64) -> Result<(), RpcError> {
        let mut chain = self.chain.lock();
        if let Some(remaining) = chain.failing_heights.get_mut(&height) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RpcError::Unavailable(format!("injected failure at {height}")));
            }
        }
        Ok(())
    }
}

fn not_found(what: &str) -> RpcError {
    RpcError::NodeError { code: RPC_INVALID_ADDRESS_OR_KEY, message: format!("{what} not found") }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn blockchain_info(&self) -> Result<ChainSummary, RpcError> {
        self.enter("getblockchaininfo")?;
        let chain = self.chain.lock();
        let tip = chain.tip().unwrap_or(0);
        Ok(ChainSummary {
            chain: "VRSC".to_string(),
            blocks: tip,
            headers: tip,
            bestblockhash: chain.canonical.get(&tip).cloned().unwrap_or_default(),
            difficulty: 1.0,
            verificationprogress: 1.0,
            chainwork: None,
        })
    }

    async fn block_count(&self) -> Result<u64, RpcError> {
        self.enter("getblockcount")?;
        Ok(self.chain.lock().tip().unwrap_or(0))
    }

    async fn block_hash(&self, height: u64) -> Result<String, RpcError> {
        self.enter("getblockhash")?;
        self.chain.lock().canonical.get(&height).cloned().ok_or_else(|| RpcError::NodeError {
            code: RPC_INVALID_PARAMETER,
            message: "Block height out of range".to_string(),
        })
    }

    async fn block(&self, hash: &str, verbosity: BlockVerbosity) -> Result<Block, RpcError> {
        self.enter("getblock")?;
        let height = self.chain.lock().blocks.get(hash).map(|b| b.height);
        if let Some(height) = height {
            self.check_height(height)?;
        }
        self.chain.lock().render(hash, verbosity).ok_or_else(|| not_found("Block"))
    }

    async fn block_at(&self, height: u64, verbosity: BlockVerbosity) -> Result<Block, RpcError> {
        self.enter("getblock")?;
        self.check_height(height)?;
        let chain = self.chain.lock();
        let hash = chain.canonical.get(&height).ok_or_else(|| RpcError::NodeError {
            code: RPC_INVALID_PARAMETER,
            message: "Block height out of range".to_string(),
        })?;
        chain.render(hash, verbosity).ok_or_else(|| not_found("Block"))
    }

    async fn raw_transaction(&self, txid: &str) -> Result<Transaction, RpcError> {
        self.enter("getrawtransaction")?;
        let chain = self.chain.lock();
        let tip = chain.tip().unwrap_or(0);
        for (height, hash) in &chain.canonical {
            let Some(block) = chain.blocks.get(hash) else { continue };
            if let Some(tx) = block.transactions().find(|tx| tx.txid == txid) {
                let mut tx = tx.clone();
                tx.blockhash = Some(hash.clone());
                tx.height = Some(*height);
                tx.confirmations = i64::try_from(tip - height + 1).ok();
                tx.time = Some(block.time);
                return Ok(tx);
            }
        }
        Err(not_found("Transaction"))
    }

    async fn raw_mempool(&self) -> Result<Vec<String>, RpcError> {
        self.enter("getrawmempool")?;
        Ok(self.chain.lock().mempool.clone())
    }

    async fn address_balance(&self, addresses: &[String]) -> Result<AddressBalance, RpcError> {
        self.enter("getaddressbalance")?;
        let chain = self.chain.lock();
        Ok(addresses.iter().filter_map(|a| chain.balances.get(a)).fold(
            AddressBalance { balance: 0, received: 0 },
            |acc, b| AddressBalance {
                balance: acc.balance + b.balance,
                received: acc.received + b.received,
            },
        ))
    }

    async fn address_utxos(&self, addresses: &[String]) -> Result<Vec<AddressUtxo>, RpcError> {
        self.enter("getaddressutxos")?;
        let chain = self.chain.lock();
        let mut utxos = Vec::new();
        for (height, hash) in &chain.canonical {
            let Some(block) = chain.blocks.get(hash) else { continue };
            for tx in block.transactions() {
                for output in &tx.vout {
                    if let Some(address) = output.sole_address() {
                        if addresses.iter().any(|a| a == address) {
                            utxos.push(AddressUtxo {
                                address: address.to_string(),
                                txid: tx.txid.clone(),
                                output_index: output.n,
                                satoshis: output.amount_sats(),
                                height: *height,
                            });
                        }
                    }
                }
            }
        }
        Ok(utxos)
    }

    async fn identity(&self, name_or_address: &str) -> Result<IdentityInfo, RpcError> {
        self.enter("getidentity")?;
        let chain = self.chain.lock();
        chain
            .identities
            .get(name_or_address)
            .or_else(|| chain.identities.values().find(|i| i.identity.name == name_or_address))
            .cloned()
            .ok_or_else(|| not_found("Identity"))
    }

    async fn identity_history(&self, name_or_address: &str) -> Result<IdentityHistory, RpcError> {
        self.enter("getidentityhistory")?;
        self.chain.lock().histories.get(name_or_address).cloned().ok_or_else(|| not_found("Identity"))
    }

    async fn node_info(&self) -> Result<Value, RpcError> {
        self.enter("getinfo")?;
        let blocks = self.tip().unwrap_or(0);
        Ok(json!({ "version": 1_000_000, "blocks": blocks, "connections": 8 }))
    }

    async fn network_info(&self) -> Result<Value, RpcError> {
        self.enter("getnetworkinfo")?;
        Ok(json!({ "version": 1_000_000, "subversion": "/MockNode/", "connections": 8 }))
    }

    async fn peer_info(&self) -> Result<Vec<Value>, RpcError> {
        self.enter("getpeerinfo")?;
        Ok(vec![json!({ "id": 0, "addr": "127.0.0.1:27485" })])
    }
}

/// Deterministic 64-hex-digit hash for a height on a named branch.
#[must_use]
pub fn block_hash(height: u64, branch: &str) -> String {
    let salt = branch.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
    format!("{salt:032x}{height:032x}")
}

#[must_use]
pub fn block(
    height: u64,
    hash: &str,
    previous: Option<&str>,
    validationtype: Option<&str>,
    txs: Vec<Transaction>,
) -> Block {
    Block {
        hash: hash.to_string(),
        height,
        confirmations: 1,
        time: 1_700_000_000 + i64::try_from(height).unwrap_or(0) * 60,
        previousblockhash: previous.map(str::to_string),
        nextblockhash: None,
        validationtype: validationtype.map(str::to_string),
        tx: txs.into_iter().map(|tx| BlockTx::Full(Box::new(tx))).collect(),
    }
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn output(n: u32, address: Option<&str>, sats: i64) -> TxOutput {
    TxOutput {
        value: sats as f64 / SATS_PER_COIN as f64,
        value_sat: Some(sats),
        n,
        script_pub_key: ScriptPubKey {
            kind: Some(if address.is_some() { "pubkeyhash" } else { "nonstandard" }.to_string()),
            addresses: address.map(|a| vec![a.to_string()]).unwrap_or_default(),
            identityprimary: None,
        },
    }
}

fn outputs(pays: &[(&str, i64)]) -> Vec<TxOutput> {
    pays.iter()
        .zip(0u32..)
        .map(|((address, sats), n)| output(n, Some(address), *sats))
        .collect()
}

#[must_use]
pub fn coinbase(txid: &str, pays: &[(&str, i64)]) -> Transaction {
    Transaction {
        txid: txid.to_string(),
        vin: vec![TxInput { coinbase: Some("03".to_string()), ..TxInput::default() }],
        vout: outputs(pays),
        blockhash: None,
        height: None,
        confirmations: None,
        time: None,
    }
}

/// Input spending `(txid, vout)`, optionally carrying the spent value and address.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn input(txid: &str, vout: u32, value: Option<i64>, address: Option<&str>) -> TxInput {
    TxInput {
        coinbase: None,
        txid: Some(txid.to_string()),
        vout: Some(vout),
        value: value.map(|v| v as f64 / SATS_PER_COIN as f64),
        value_sat: value,
        address: address.map(str::to_string),
    }
}

#[must_use]
pub fn transfer(txid: &str, inputs: Vec<TxInput>, pays: &[(&str, i64)]) -> Transaction {
    Transaction {
        txid: txid.to_string(),
        vin: inputs,
        vout: outputs(pays),
        blockhash: None,
        height: None,
        confirmations: None,
        time: None,
    }
}

/// Coinstake shape: spends the stake, opens with an empty marker, returns to `staker`.
#[must_use]
pub fn coinstake(txid: &str, stake: TxInput, staker: &str, sats: i64) -> Transaction {
    Transaction {
        txid: txid.to_string(),
        vin: vec![stake],
        vout: vec![output(0, None, 0), output(1, Some(staker), sats)],
        blockhash: None,
        height: None,
        confirmations: None,
        time: None,
    }
}

/// An identity registration output paying `address`.
#[must_use]
pub fn identity_output(n: u32, address: &str, name: &str) -> TxOutput {
    let mut out = output(n, Some(address), 0);
    out.script_pub_key.kind = Some("cryptocondition".to_string());
    out.script_pub_key.identityprimary =
        Some(IdentityPrimary { name: name.to_string(), identityaddress: address.to_string() });
    out
}

#[must_use]
pub fn identity_info(address: &str, name: &str) -> IdentityInfo {
    IdentityInfo {
        identity: IdentityDefinition {
            name: name.to_string(),
            identityaddress: address.to_string(),
            parent: None,
            primaryaddresses: Vec::new(),
        },
        status: Some("active".to_string()),
        blockheight: None,
        txid: None,
    }
}

/// History whose earliest revision is the registration at `(height, txid)`.
#[must_use]
pub fn identity_history(revisions: &[(u64, &str)]) -> IdentityHistory {
    IdentityHistory {
        fullyqualifiedname: None,
        history: revisions
            .iter()
            .map(|(height, txid)| IdentityRevision {
                height: *height,
                blockhash: block_hash(*height, "main"),
                output: IdentityOutputRef { txid: (*txid).to_string(), voutnum: 0 },
            })
            .collect(),
    }
}
