use async_trait::async_trait;
use bytes::Bytes;

use super::IngestError;

/// One notification from the node's publish feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Hash of a block that became the new tip, hex in display order.
    BlockHash(String),
    /// Serialized block. Treated as a hint to sync to the node's tip.
    RawBlock(Bytes),
    /// Id of a transaction that entered the mempool.
    TxHash(String),
    /// Serialized transaction. Ignored; `TxHash` carries what is tracked.
    RawTx(Bytes),
}

/// Source of [`FeedEvent`]s.
#[async_trait]
pub trait BlockFeed: Send {
    /// Opens or reopens the subscription.
    async fn connect(&mut self) -> Result<(), IngestError>;

    /// Waits for the next event. An error means the subscription is lost.
    async fn next_event(&mut self) -> Result<FeedEvent, IngestError>;

    fn endpoint(&self) -> &str;
}
