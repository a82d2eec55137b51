use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    rpc::{RpcError, RpcGateway},
    types::{
        AddressBalance, AddressUtxo, Block, ChainSummary, IdentityHistory, IdentityInfo,
        Transaction,
    },
};

/// `getblock` verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockVerbosity {
    /// Header fields and transaction ids.
    Header = 1,
    /// Header fields and decoded transactions.
    Full = 2,
}

/// Typed read-only calls against the full node.
///
/// The scanner, ingest pipeline, PoS index, and orphan detector depend on this trait
/// rather than on [`RpcGateway`] so they can run against an in-memory chain.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn blockchain_info(&self) -> Result<ChainSummary, RpcError>;

    async fn block_count(&self) -> Result<u64, RpcError>;

    async fn block_hash(&self, height: u64) -> Result<String, RpcError>;

    async fn block(&self, hash: &str, verbosity: BlockVerbosity) -> Result<Block, RpcError>;

    async fn block_at(&self, height: u64, verbosity: BlockVerbosity) -> Result<Block, RpcError> {
        let hash = self.block_hash(height).await?;
        self.block(&hash, verbosity).await
    }

    async fn raw_transaction(&self, txid: &str) -> Result<Transaction, RpcError>;

    async fn raw_mempool(&self) -> Result<Vec<String>, RpcError>;

    async fn address_balance(&self, addresses: &[String]) -> Result<AddressBalance, RpcError>;

    async fn address_utxos(&self, addresses: &[String]) -> Result<Vec<AddressUtxo>, RpcError>;

    async fn identity(&self, name_or_address: &str) -> Result<IdentityInfo, RpcError>;

    async fn identity_history(&self, name_or_address: &str) -> Result<IdentityHistory, RpcError>;

    /// Legacy `getinfo` summary (version, blocks, connections, difficulty).
    async fn node_info(&self) -> Result<Value, RpcError>;

    async fn network_info(&self) -> Result<Value, RpcError>;

    async fn peer_info(&self) -> Result<Vec<Value>, RpcError>;
}

#[async_trait]
impl NodeClient for RpcGateway {
    async fn blockchain_info(&self) -> Result<ChainSummary, RpcError> {
        self.call_typed("getblockchaininfo", json!([])).await
    }

    async fn block_count(&self) -> Result<u64, RpcError> {
        self.call_typed("getblockcount", json!([])).await
    }

    async fn block_hash(&self, height: u64) -> Result<String, RpcError> {
        self.call_typed("getblockhash", json!([height])).await
    }

    async fn block(&self, hash: &str, verbosity: BlockVerbosity) -> Result<Block, RpcError> {
        self.call_typed("getblock", json!([hash, verbosity as u8])).await
    }

    async fn block_at(&self, height: u64, verbosity: BlockVerbosity) -> Result<Block, RpcError> {
        // The daemon accepts a height in place of the hash, saving a round trip.
        self.call_typed("getblock", json!([height.to_string(), verbosity as u8])).await
    }

    async fn raw_transaction(&self, txid: &str) -> Result<Transaction, RpcError> {
        self.call_typed("getrawtransaction", json!([txid, 1])).await
    }

    async fn raw_mempool(&self) -> Result<Vec<String>, RpcError> {
        self.call_typed("getrawmempool", json!([])).await
    }

    async fn address_balance(&self, addresses: &[String]) -> Result<AddressBalance, RpcError> {
        self.call_typed("getaddressbalance", json!([{ "addresses": addresses }])).await
    }

    async fn address_utxos(&self, addresses: &[String]) -> Result<Vec<AddressUtxo>, RpcError> {
        self.call_typed("getaddressutxos", json!([{ "addresses": addresses }])).await
    }

    async fn identity(&self, name_or_address: &str) -> Result<IdentityInfo, RpcError> {
        self.call_typed("getidentity", json!([name_or_address])).await
    }

    async fn identity_history(&self, name_or_address: &str) -> Result<IdentityHistory, RpcError> {
        self.call_typed("getidentityhistory", json!([name_or_address])).await
    }

    async fn node_info(&self) -> Result<Value, RpcError> {
        self.call("getinfo", json!([])).await
    }

    async fn network_info(&self) -> Result<Value, RpcError> {
        self.call("getnetworkinfo", json!([])).await
    }

    async fn peer_info(&self) -> Result<Vec<Value>, RpcError> {
        self.call_typed("getpeerinfo", json!([])).await
    }
}
