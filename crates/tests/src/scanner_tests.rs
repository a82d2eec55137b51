//! Historical scan scenarios over in-memory chains.
//!
//! Verified contracts:
//! - Only stake blocks whose payout reaches a tracked identity's own address yield
//!   reward rows
//! - Spends mark the created UTXO regardless of which block was scanned first
//! - Rescanning a range changes nothing
//! - Scans resume from the persisted checkpoint
//! - Fees balance inputs against outputs and are absent when any input is unknown

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vex_core::{
    rpc::NodeClient,
    scanner::ScanMode,
    testing::MockNode,
    types::{Classifier, SATS_PER_COIN},
};

use crate::mock_infrastructure::{
    reward_scenario_chain, spend_scenario_chain, Harness, STAKER, WALLET,
};

async fn reward_harness() -> Harness {
    let node = Arc::new(MockNode::with_blocks(reward_scenario_chain()));
    Harness::tracking_scenario(node).await
}

async fn spend_harness() -> Harness {
    let node = Arc::new(MockNode::with_blocks(spend_scenario_chain()));
    Harness::tracking_scenario(node).await
}

#[tokio::test]
async fn test_single_stake_block_yields_single_reward() {
    let h = reward_harness().await;
    let cancel = CancellationToken::new();

    let report = h.scanner(ScanMode::Full, 2).scan(800_200..=800_205, &cancel).await.unwrap();

    assert_eq!(report.blocks_scanned, 6);
    assert_eq!(report.applied.rewards_inserted, 1);
    assert_eq!(report.checkpoint, Some(800_205));

    let rewards = h.store.rewards_for_identity(STAKER).await.unwrap();
    assert_eq!(rewards.len(), 1);
    let reward = &rewards[0];
    assert_eq!(reward.height, 800_203);
    assert_eq!(reward.amount_sats, 5 * SATS_PER_COIN);
    assert_eq!(reward.txid, "cb-800203");
    assert_eq!(reward.classifier, Classifier::NodeField);
}

#[tokio::test]
async fn test_rewards_mode_fetches_only_stake_blocks() {
    let h = reward_harness().await;
    let cancel = CancellationToken::new();

    let report = h.scanner(ScanMode::Rewards, 10).scan(800_200..=800_205, &cancel).await.unwrap();

    assert_eq!(report.scanner_id, "historical-rewards");
    assert_eq!(report.blocks_scanned, 1);
    assert_eq!(h.pos_index.stake_heights(800_200..=800_205).await.unwrap(), vec![800_203]);

    let rewards = h.store.rewards_for_identity(STAKER).await.unwrap();
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0].height, 800_203);

    // Rewards mode records no UTXO movement.
    assert!(h.utxos(STAKER).await.is_empty());
}

#[tokio::test]
async fn test_rescan_is_idempotent() {
    let h = reward_harness().await;
    let cancel = CancellationToken::new();
    let scanner = h.scanner(ScanMode::Full, 4);

    scanner.scan(800_200..=800_205, &cancel).await.unwrap();
    let utxos_before = h.utxos(STAKER).await;
    let rewards_before = h.store.rewards_for_identity(STAKER).await.unwrap();

    let again = scanner.scan(800_200..=800_205, &cancel).await.unwrap();

    assert_eq!(again.blocks_scanned, 6);
    assert_eq!(again.applied.utxos_inserted, 0);
    assert_eq!(again.applied.rewards_inserted, 0);
    assert_eq!(h.utxos(STAKER).await, utxos_before);
    assert_eq!(h.store.rewards_for_identity(STAKER).await.unwrap(), rewards_before);
}

#[tokio::test]
async fn test_resume_from_checkpoint() {
    let h = reward_harness().await;
    let cancel = CancellationToken::new();
    let scanner = h.scanner(ScanMode::Full, 10);

    scanner.scan(800_200..=800_202, &cancel).await.unwrap();
    let resumed = scanner.scan_from_checkpoint(800_205, &cancel).await.unwrap();

    assert_eq!(resumed.from, 800_203);
    assert_eq!(resumed.blocks_scanned, 3);
    assert_eq!(resumed.checkpoint, Some(800_205));
    assert_eq!(h.store.rewards_for_identity(STAKER).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_spent_output_records_spending_transaction() {
    let h = spend_harness().await;
    let cancel = CancellationToken::new();

    h.scanner(ScanMode::Full, 1).scan(0..=3, &cancel).await.unwrap();

    let utxo = h.store.utxo("T1", 0).await.unwrap().expect("T1:0 indexed");
    assert_eq!(utxo.address, WALLET);
    assert_eq!(utxo.value_sats, 10 * SATS_PER_COIN);
    assert!(utxo.spent);
    assert_eq!(utxo.spent_txid.as_deref(), Some("T2"));
    assert_eq!(utxo.spent_height, Some(3));

    let unspent = h.store.utxos_for_address(WALLET, false).await.unwrap();
    assert!(unspent.is_empty());
}

#[tokio::test]
async fn test_spend_scanned_before_creation_converges() {
    let h = spend_harness().await;
    let cancel = CancellationToken::new();
    let scanner = h.scanner(ScanMode::Full, 10);

    scanner.scan(2..=3, &cancel).await.unwrap();
    assert!(h.store.utxo("T1", 0).await.unwrap().is_none());

    scanner.scan(0..=1, &cancel).await.unwrap();

    let utxo = h.store.utxo("T1", 0).await.unwrap().expect("T1:0 indexed");
    assert!(utxo.spent);
    assert_eq!(utxo.spent_txid.as_deref(), Some("T2"));
}

#[tokio::test]
async fn test_fee_balances_inputs_and_outputs() {
    let h = spend_harness().await;
    let cancel = CancellationToken::new();
    h.scanner(ScanMode::Full, 10).scan(0..=3, &cancel).await.unwrap();

    let t2 = h.node.raw_transaction("T2").await.unwrap();
    let inputs: i64 = t2.vin.iter().filter_map(|i| i.embedded_amount_sats()).sum();
    assert_eq!(t2.fee(), Some(inputs - t2.total_output_sats()));
    assert_eq!(t2.fee(), Some(10_000_000));

    // Same fee when input values come from the index instead of the node.
    let mut stripped = t2.clone();
    for input in &mut stripped.vin {
        input.value = None;
        input.value_sat = None;
    }
    assert_eq!(stripped.fee(), None);

    let mut resolved = Vec::new();
    for input in &stripped.vin {
        let (txid, vout) = input.outpoint().unwrap();
        let utxo = h.store.utxo(txid, vout).await.unwrap();
        resolved.push(((txid.to_string(), vout), utxo.map(|u| u.value_sats)));
    }
    let fee = stripped.fee_with(|txid, vout| {
        resolved.iter().find(|((t, v), _)| t == txid && *v == vout).and_then(|(_, value)| *value)
    });
    assert_eq!(fee, Some(10_000_000));
}

#[tokio::test]
async fn test_fee_absent_for_coinbase_and_minting_transactions() {
    let h = reward_harness().await;

    let payout = h.node.raw_transaction("cb-800203").await.unwrap();
    assert_eq!(payout.fee(), None);

    // The coinstake returns exactly its stake, so its fee is zero rather than absent.
    let stake = h.node.raw_transaction("cs-800203").await.unwrap();
    assert_eq!(stake.fee(), Some(0));

    let mut minting = stake.clone();
    minting.vout[1].value_sat = Some(101 * SATS_PER_COIN);
    assert_eq!(minting.fee(), None);
}
