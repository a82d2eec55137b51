//! Orphan detection and compensation.
//!
//! The central contract: after a reorg is reconciled and the new branch applied, the
//! index holds exactly what a fresh scan of the new canonical chain produces.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vex_core::{
    orphan::Confidence,
    scanner::ScanMode,
    testing::{block, block_hash, coinbase, coinstake, input, transfer, MockNode},
    types::{Block, SATS_PER_COIN},
};

use crate::mock_infrastructure::{spend_scenario_chain, Harness, MINER, STAKER, WALLET};

/// The spend scenario, with height 3 also a stake block rewarding [`STAKER`].
fn original_chain() -> Vec<Block> {
    let mut blocks = spend_scenario_chain();
    let two = blocks[2].hash.clone();
    let payout = coinbase("cb-3-stake", &[(STAKER, 5 * SATS_PER_COIN)]);
    let t2 = transfer(
        "T2",
        vec![input("T1", 0, Some(10 * SATS_PER_COIN), Some(WALLET))],
        &[(MINER, 9 * SATS_PER_COIN + 90_000_000)],
    );
    let stake = coinstake(
        "cs-3",
        input("earlier-stake", 0, Some(50 * SATS_PER_COIN), Some(STAKER)),
        STAKER,
        50 * SATS_PER_COIN,
    );
    blocks[3] = block(3, &block_hash(3, "main"), Some(&two), Some("stake"), vec![payout, t2, stake]);
    blocks
}

/// Heights 3 and 4 on a branch that never includes T2 or the stake.
fn replacement(parent: &str) -> Vec<Block> {
    let three = block(
        3,
        &block_hash(3, "fork"),
        Some(parent),
        Some("work"),
        vec![coinbase("cb-fork-3", &[(MINER, SATS_PER_COIN)])],
    );
    let four = block(
        4,
        &block_hash(4, "fork"),
        Some(&three.hash),
        Some("work"),
        vec![coinbase("cb-fork-4", &[(WALLET, 2 * SATS_PER_COIN)])],
    );
    vec![three, four]
}

async fn scanned_original() -> (Arc<MockNode>, Harness) {
    let node = Arc::new(MockNode::with_blocks(original_chain()));
    let h = Harness::tracking_scenario(node.clone()).await;
    h.scanner(ScanMode::Full, 2).scan(0..=3, &CancellationToken::new()).await.unwrap();
    (node, h)
}

#[tokio::test]
async fn test_compensated_state_matches_fresh_scan() {
    let (node, h) = scanned_original().await;
    assert_eq!(h.store.rewards_for_identity(STAKER).await.unwrap().len(), 1);
    assert!(h.store.utxo("T1", 0).await.unwrap().unwrap().spent);

    let parent = node.canonical_hash(2).unwrap();
    node.reorg(replacement(&parent));

    let report = h.orphans(10).reconcile(20).await.unwrap();
    assert!(report.found_orphans());
    assert_eq!(report.resume_from, Some(3));
    assert_eq!(report.reverted.len(), 1);
    assert_eq!(report.rows.rewards_removed, 1);
    assert_eq!(report.rows.spends_reverted, 1);

    let cancel = CancellationToken::new();
    let resumed = h.scanner(ScanMode::Full, 2).scan_from_checkpoint(4, &cancel).await.unwrap();
    assert_eq!(resumed.from, 3);

    let fresh = Harness::tracking_scenario(node.clone()).await;
    fresh.scanner(ScanMode::Full, 2).scan(0..=4, &cancel).await.unwrap();

    assert_eq!(h.utxos(WALLET).await, fresh.utxos(WALLET).await);
    assert_eq!(h.utxos(STAKER).await, fresh.utxos(STAKER).await);
    assert_eq!(
        h.store.rewards_for_identity(STAKER).await.unwrap(),
        fresh.store.rewards_for_identity(STAKER).await.unwrap()
    );
    assert!(h.store.rewards_for_identity(STAKER).await.unwrap().is_empty());

    let t1 = h.store.utxo("T1", 0).await.unwrap().unwrap();
    assert!(!t1.spent);
    assert_eq!(t1.spent_txid, None);
    assert_eq!(t1.spent_height, None);

    let tip = h.store.indexed_block_at(3).await.unwrap().unwrap();
    assert_eq!(tip.hash, block_hash(3, "fork"));
}

#[tokio::test]
async fn test_reorg_drops_stale_pos_classification() {
    let (node, h) = scanned_original().await;
    assert!(h.pos_index.lookup(3).await.unwrap().unwrap().is_stake);

    let parent = node.canonical_hash(2).unwrap();
    node.reorg(replacement(&parent));
    h.orphans(10).reconcile(20).await.unwrap();

    assert!(h.pos_index.lookup(3).await.unwrap().is_none());
    assert!(h.pos_index.lookup(2).await.unwrap().is_some());

    h.scanner(ScanMode::Full, 2).scan(3..=4, &CancellationToken::new()).await.unwrap();
    let entry = h.pos_index.lookup(3).await.unwrap().unwrap();
    assert!(!entry.is_stake);
    assert_eq!(entry.hash, block_hash(3, "fork"));
}

#[tokio::test]
async fn test_orphan_confidence_needs_depth_on_both_chains() {
    let (node, h) = scanned_original().await;
    let stale = block_hash(3, "main");
    let parent = node.canonical_hash(2).unwrap();
    node.reorg(replacement(&parent));

    // The replacement at height 3 has two confirmations.
    let shallow = h.orphans(10).is_orphan(&stale).await.unwrap();
    assert!(shallow.is_orphan);
    assert_eq!(shallow.canonical_hash, Some(block_hash(3, "fork")));
    assert_eq!(shallow.confidence, Confidence::Low);

    // Deep enough on the node, but the index only ever held it as its tip.
    let tip_only = h.orphans(2).is_orphan(&stale).await.unwrap();
    assert_eq!(tip_only.confidence, Confidence::Low);
    assert_eq!(h.orphans(1).is_orphan(&stale).await.unwrap().confidence, Confidence::High);

    let canonical = h.orphans(10).check_at(2, &parent).await.unwrap();
    assert!(!canonical.is_orphan);
    let foreign = h.orphans(2).check_at(2, "unknown-block").await.unwrap();
    assert!(foreign.is_orphan);
    assert_eq!(foreign.confidence, Confidence::High);
}

#[tokio::test]
async fn test_reconcile_without_reorg_changes_nothing() {
    let (_node, h) = scanned_original().await;
    let before = h.utxos(WALLET).await;

    let report = h.orphans(10).reconcile(20).await.unwrap();

    assert!(!report.found_orphans());
    assert_eq!(report.checked, 4);
    assert_eq!(report.resume_from, None);
    assert_eq!(h.utxos(WALLET).await, before);
}

#[tokio::test]
async fn test_checkpoint_rewound_below_orphan() {
    let (node, h) = scanned_original().await;
    let parent = node.canonical_hash(2).unwrap();
    node.reorg(replacement(&parent));

    h.orphans(10).reconcile(20).await.unwrap();

    let checkpoint = h.store.checkpoint("historical-full").await.unwrap().unwrap();
    assert_eq!(checkpoint.height, 2);
    assert_eq!(h.chain.indexed_height(), Some(2));
}
