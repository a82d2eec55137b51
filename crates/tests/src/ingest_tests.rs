//! Real-time ingestion driven through a channel-backed feed.
//!
//! Verified contracts:
//! - Notifications apply blocks in height order, filling gaps
//! - A notified block on a new branch reconciles the old one first
//! - A fork seen only by the poll is reconciled before its blocks apply
//! - A feed that refuses connections degrades to polling and keeps retrying
//! - A restarted pipeline resumes from the ingest checkpoint

use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use vex_core::{
    chain::ChainState,
    ingest::{FeedEvent, IngestPipeline, IngestSettings, IngestState},
    mempool::MempoolTracker,
    scanner::Tracking,
    testing::{block, block_hash, coinbase, MockNode},
    types::Block,
};

use crate::mock_infrastructure::{
    fast_ingest_settings, wait_until, ChannelFeed, FeedHandle, Harness, MINER,
};

const WAIT: Duration = Duration::from_secs(5);

struct Running {
    node: Arc<MockNode>,
    harness: Harness,
    pipeline: Arc<IngestPipeline>,
    mempool: Arc<MempoolTracker>,
    feed: FeedHandle,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl Running {
    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(WAIT, self.task).await.expect("pipeline stops").unwrap();
    }
}

/// Notifications drive ingestion; the safety poll is effectively off.
fn notification_settings() -> IngestSettings {
    IngestSettings { safety_poll_interval: Duration::from_secs(3600), ..fast_ingest_settings() }
}

async fn start(node: Arc<MockNode>, settings: IngestSettings) -> Running {
    let harness = Harness::new(node.clone(), Tracking::all()).await;
    let mempool = Arc::new(MempoolTracker::new(Duration::from_secs(3600)));
    let pipeline = Arc::new(harness.pipeline(Arc::clone(&mempool), settings));
    let (feed, handle) = ChannelFeed::channel();
    let cancel = CancellationToken::new();

    let task = {
        let pipeline = Arc::clone(&pipeline);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            pipeline.run(Some(Box::new(feed)), cancel).await.unwrap();
        })
    };

    Running { node, harness, pipeline, mempool, feed: handle, cancel, task }
}

fn fork_branch(parent: &str, heights: std::ops::RangeInclusive<u64>) -> Vec<Block> {
    let mut previous = parent.to_string();
    heights
        .map(|height| {
            let hash = block_hash(height, "fork");
            let b = block(
                height,
                &hash,
                Some(&previous),
                Some("work"),
                vec![coinbase(&format!("cb-fork-{height}"), &[(MINER, 1)])],
            );
            previous = hash;
            b
        })
        .collect()
}

#[tokio::test]
async fn test_notifications_advance_the_indexed_tip() {
    let node = Arc::new(MockNode::new());
    node.mine(3, MINER);
    let r = start(node, notification_settings()).await;

    // Connecting syncs to the node tip.
    let chain = Arc::clone(&r.harness.chain);
    wait_until(WAIT, || chain.indexed_height() == Some(2)).await;
    wait_until(WAIT, || r.pipeline.state() == IngestState::Subscribed).await;

    let mined = r.node.mine(1, MINER);
    r.feed.send(FeedEvent::BlockHash(mined[0].hash.clone()));
    wait_until(WAIT, || chain.indexed_height() == Some(3)).await;

    // A missed notification is filled in by the next one.
    let mined = r.node.mine(2, MINER);
    r.feed.send(FeedEvent::BlockHash(mined[1].hash.clone()));
    wait_until(WAIT, || chain.indexed_height() == Some(5)).await;
    let filled = r.harness.store.indexed_block_at(4).await.unwrap().unwrap();
    assert_eq!(filled.hash, mined[0].hash);

    r.stop().await;
}

#[tokio::test]
async fn test_notified_fork_is_reconciled() {
    let node = Arc::new(MockNode::new());
    let mined = node.mine(4, MINER);
    let r = start(node, notification_settings()).await;
    let chain = Arc::clone(&r.harness.chain);
    wait_until(WAIT, || chain.indexed_height() == Some(3)).await;

    // Heights 3 and 4 are indexed; the fork replaces both.
    let extra = r.node.mine(1, MINER);
    r.feed.send(FeedEvent::BlockHash(extra[0].hash.clone()));
    wait_until(WAIT, || chain.indexed_height() == Some(4)).await;

    let branch = fork_branch(&mined[2].hash, 3..=5);
    r.node.reorg(branch.clone());
    r.feed.send(FeedEvent::BlockHash(branch[2].hash.clone()));

    let tip = branch[2].hash.clone();
    wait_until(WAIT, || chain.indexed_tip().is_some_and(|t| t.height == 5 && t.hash == tip)).await;

    let store = &r.harness.store;
    assert_eq!(store.indexed_block_at(3).await.unwrap().unwrap().hash, branch[0].hash);
    assert_eq!(store.indexed_block_at(4).await.unwrap().unwrap().hash, branch[1].hash);
    // Nothing from the orphaned blocks survives.
    assert!(store.utxo(&format!("cb-{}", mined[3].hash), 0).await.unwrap().is_none());
    assert!(store.utxo(&format!("cb-{}", extra[0].hash), 0).await.unwrap().is_none());

    r.stop().await;
}

#[tokio::test]
async fn test_safety_poll_reconciles_silent_fork() {
    let node = Arc::new(MockNode::new());
    let mined = node.mine(4, MINER);
    let r = start(node, fast_ingest_settings()).await;
    let chain = Arc::clone(&r.harness.chain);
    wait_until(WAIT, || chain.indexed_height() == Some(3)).await;
    let extra = r.node.mine(1, MINER);
    wait_until(WAIT, || chain.indexed_height() == Some(4)).await;

    // No notification: the fork from height 2 is only visible to the poll, and it
    // outgrows the indexed tip by two blocks.
    let branch = fork_branch(&mined[1].hash, 2..=6);
    r.node.reorg(branch.clone());

    let tip = branch[4].hash.clone();
    wait_until(WAIT, || chain.indexed_tip().is_some_and(|t| t.height == 6 && t.hash == tip)).await;

    let store = &r.harness.store;
    // The first sync started at the node tip, so height 2 was never indexed.
    assert!(store.indexed_block_at(2).await.unwrap().is_none());
    for b in &branch[1..] {
        assert_eq!(store.indexed_block_at(b.height).await.unwrap().unwrap().hash, b.hash);
    }
    assert!(store.utxo(&format!("cb-{}", mined[3].hash), 0).await.unwrap().is_none());
    assert!(store.utxo(&format!("cb-{}", extra[0].hash), 0).await.unwrap().is_none());
    assert!(store.utxo("cb-fork-6", 0).await.unwrap().is_some());

    r.stop().await;
}

#[tokio::test]
async fn test_tx_notifications_are_tracked_until_confirmed() {
    let node = Arc::new(MockNode::new());
    node.mine(1, MINER);
    let r = start(node, notification_settings()).await;
    wait_until(WAIT, || r.pipeline.state() == IngestState::Subscribed).await;

    r.feed.send(FeedEvent::TxHash("pending-tx".to_string()));
    r.feed.send(FeedEvent::RawTx(bytes_of("ignored")));
    let mempool = Arc::clone(&r.mempool);
    wait_until(WAIT, || mempool.first_seen("pending-tx").is_some()).await;
    assert_eq!(mempool.len(), 1);

    r.stop().await;
}

#[tokio::test]
async fn test_refused_feed_falls_back_to_polling() {
    let node = Arc::new(MockNode::new());
    node.mine(2, MINER);
    let harness = Harness::new(node.clone(), Tracking::all()).await;
    let mempool = Arc::new(MempoolTracker::new(Duration::from_secs(3600)));
    let pipeline = Arc::new(harness.pipeline(mempool, notification_settings()));
    let (feed, handle) = ChannelFeed::channel();
    handle.refuse_connections(true);
    let cancel = CancellationToken::new();

    let task = {
        let pipeline = Arc::clone(&pipeline);
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run(Some(Box::new(feed)), cancel).await.unwrap() })
    };

    // Polling between reconnect attempts keeps the index moving.
    let chain = Arc::clone(&harness.chain);
    wait_until(WAIT, || chain.indexed_height() == Some(1)).await;
    node.mine(1, MINER);
    wait_until(WAIT, || chain.indexed_height() == Some(2)).await;
    wait_until(WAIT, || handle.connects() >= 3).await;
    assert_ne!(pipeline.state(), IngestState::Subscribed);

    handle.refuse_connections(false);
    wait_until(WAIT, || pipeline.state() == IngestState::Subscribed).await;

    cancel.cancel();
    tokio::time::timeout(WAIT, task).await.expect("pipeline stops").unwrap();
    assert_eq!(pipeline.state(), IngestState::Disconnected);
}

#[tokio::test]
async fn test_restart_resumes_from_checkpoint() {
    let node = Arc::new(MockNode::new());
    node.mine(3, MINER);
    let harness = Harness::new(node.clone(), Tracking::all()).await;
    let first = harness.pipeline(
        Arc::new(MempoolTracker::new(Duration::from_secs(60))),
        fast_ingest_settings(),
    );
    assert_eq!(first.sync_to_tip().await.unwrap(), 1);

    // Same store, fresh in-memory state.
    let restarted = IngestPipeline::new(
        Arc::clone(&harness.processor),
        harness.orphans(6),
        Arc::new(ChainState::new()),
        Arc::new(MempoolTracker::new(Duration::from_secs(60))),
        fast_ingest_settings(),
    );
    assert_eq!(restarted.restore_tip().await.unwrap(), Some(2));

    node.mine(2, MINER);
    assert_eq!(restarted.sync_to_tip().await.unwrap(), 2);
    assert_eq!(restarted.sync_to_tip().await.unwrap(), 0);
}

fn bytes_of(s: &str) -> bytes::Bytes {
    bytes::Bytes::copy_from_slice(s.as_bytes())
}
