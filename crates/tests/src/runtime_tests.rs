//! The assembled runtime: builder wiring, background tasks and shutdown.

use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use vex_core::{
    config::{AppConfig, TrackedIdentity},
    ingest::{FeedEvent, IngestState},
    runtime::{RuntimeError, VexRuntime},
    scanner::ScanMode,
    testing::{identity_history, MockNode},
};

use crate::mock_infrastructure::{
    reward_scenario_chain, wait_until, ChannelFeed, MINER, STAKER, WALLET,
};

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.store.database_url = "sqlite::memory:".to_string();
    config.cache.url = None;
    config.feed.enabled = false;
    config.feed.poll_interval_seconds = 1;
    config.feed.reconnect_base_ms = 1;
    config.feed.reconnect_cap_ms = 5;
    config.metrics.enabled = false;
    config.tracking.all = true;
    config
}

#[tokio::test]
async fn test_runtime_follows_feed_notifications() {
    let node = Arc::new(MockNode::new());
    node.mine(3, MINER);
    let (feed, handle) = ChannelFeed::channel();

    let runtime = VexRuntime::builder()
        .with_config(test_config())
        .with_node(node.clone())
        .with_feed(Box::new(feed))
        .disable_identity_backfill()
        .build()
        .await
        .expect("runtime builds");

    let components = runtime.components().clone();
    let chain = Arc::clone(components.chain_state());
    wait_until(WAIT, || components.ingest().state() == IngestState::Subscribed).await;
    wait_until(WAIT, || chain.indexed_height() == Some(2)).await;
    assert_eq!(handle.connects(), 1);

    let mined = node.mine(1, MINER);
    handle.send(FeedEvent::BlockHash(mined[0].hash.clone()));
    wait_until(WAIT, || chain.indexed_height() == Some(3)).await;

    let summary = components.facade().chain_summary().await.unwrap();
    assert_eq!(summary.value.blocks, 3);

    let token = runtime.cancellation_token();
    runtime.shutdown().await;
    assert!(token.is_cancelled());
    assert_eq!(components.ingest().state(), IngestState::Disconnected);
}

#[tokio::test]
async fn test_scan_only_runtime_leaves_the_tip_alone() {
    let node = Arc::new(MockNode::with_blocks(reward_scenario_chain()));
    let mut config = test_config();
    config.tracking.all = false;
    config.tracking.identities =
        vec![TrackedIdentity { address: STAKER.to_string(), name: Some("staker@".to_string()) }];

    let runtime = VexRuntime::builder()
        .with_config(config)
        .with_node(node)
        .disable_ingest()
        .disable_identity_backfill()
        .disable_mempool_eviction()
        .build()
        .await
        .expect("runtime builds");

    let components = runtime.components();
    let report =
        components.scanner().scan(800_200..=800_205, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.scanner_id, format!("historical-{}", ScanMode::Full.as_str()));
    assert_eq!(report.applied.rewards_inserted, 1);
    assert_eq!(components.store().rewards_for_identity(STAKER).await.unwrap().len(), 1);
    // Nothing tracks the miner, so its coinbases leave no UTXOs behind.
    assert!(components.store().utxos_for_address(MINER, true).await.unwrap().is_empty());
    assert_eq!(components.chain_state().indexed_height(), None);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_backfill_resolves_configured_identities() {
    let node = Arc::new(MockNode::new());
    node.mine(1, MINER);
    node.set_identity_history(STAKER, identity_history(&[(120, "reg-tx"), (300, "update-tx")]));

    let mut config = test_config();
    config.tracking.identities = vec![TrackedIdentity { address: STAKER.to_string(), name: None }];
    config.tracking.backfill_interval_seconds = Some(1);

    let runtime = VexRuntime::builder()
        .with_config(config)
        .with_node(node)
        .disable_ingest()
        .build()
        .await
        .expect("runtime builds");

    let store = Arc::clone(runtime.components().store());
    let mut resolved = None;
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        let record = store.identity(STAKER).await.unwrap().expect("registered at build");
        if record.creation_height.is_some() {
            resolved = Some(record);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let record = resolved.expect("creation resolved");
    assert_eq!(record.creation_height, Some(120));
    assert_eq!(record.creation_txid.as_deref(), Some("reg-tx"));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_maintenance_evicts_stale_mempool_entries() {
    let node = Arc::new(MockNode::new());
    node.mine(1, MINER);
    let mut config = test_config();
    config.mempool.max_unconfirmed_age_seconds = 60;
    config.mempool.eviction_interval_seconds = 1;

    let runtime = VexRuntime::builder()
        .with_config(config)
        .with_node(node)
        .disable_ingest()
        .disable_identity_backfill()
        .build()
        .await
        .expect("runtime builds");

    let mempool = Arc::clone(runtime.components().mempool());
    mempool.observe_at("abandoned", Utc::now() - chrono::Duration::hours(2));
    mempool.observe("recent");

    wait_until(WAIT, || mempool.first_seen("abandoned").is_none()).await;
    assert!(mempool.first_seen("recent").is_some());

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() {
    let mut config = test_config();
    config.node.rpc_user = Some(WALLET.to_string());

    let result = VexRuntime::builder()
        .with_config(config)
        .with_node(Arc::new(MockNode::new()))
        .build()
        .await;

    assert!(matches!(result, Err(RuntimeError::ConfigValidation(_))));
}
