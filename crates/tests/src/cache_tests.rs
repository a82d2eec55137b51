//! Cache degradation and freshness through the read-through facade.
//!
//! Redis tests point at a closed port so the backend is guaranteed unreachable;
//! they run serially to keep connect timeouts from stacking under parallel load.

use serial_test::serial;
use std::{sync::Arc, time::Duration};
use vex_core::{
    cache::{CacheTtls, CachedAccess, MemoryBackend, RedisBackend},
    mempool::MempoolTracker,
    testing::{identity_info, MockNode},
    types::{AddressBalance, CacheStatus},
};

use crate::mock_infrastructure::{fast_ingest_settings, Harness, MINER, STAKER, WALLET};

fn unreachable_redis(node: Arc<MockNode>) -> CachedAccess {
    let backend = RedisBackend::new("redis://127.0.0.1:1/").unwrap().with_timeouts(
        Duration::from_millis(200),
        Duration::from_millis(200),
        Duration::from_secs(30),
    );
    CachedAccess::new(Arc::new(backend), node, CacheTtls::default())
}

fn memory_facade(node: Arc<MockNode>, ttls: CacheTtls) -> CachedAccess {
    CachedAccess::new(Arc::new(MemoryBackend::new()), node, ttls)
}

#[tokio::test]
#[serial]
async fn test_reads_pass_through_when_redis_is_down() {
    let node = Arc::new(MockNode::new());
    node.mine(3, MINER);
    let facade = unreachable_redis(node.clone());

    let first = facade.block_at_height(2).await.unwrap();
    let second = facade.block_at_height(2).await.unwrap();

    assert_eq!(first.status, CacheStatus::Miss);
    assert_eq!(second.status, CacheStatus::Miss);
    assert_eq!(first.value, second.value);
    assert_eq!(node.calls("getblock"), 2);
}

#[tokio::test]
#[serial]
async fn test_redis_down_reports_unavailable_stats() {
    let cache = unreachable_redis(Arc::new(MockNode::new()));

    assert!(!cache.set("chain:summary", &1u64, Duration::from_secs(5)).await);
    assert_eq!(cache.get::<u64>("chain:summary").await, None);

    let stats = cache.stats().await;
    assert!(!stats.available);
    assert_eq!(stats.backend, "redis");
    assert!(stats.errors >= 2);
}

#[tokio::test]
#[serial]
async fn test_node_and_redis_down_is_an_error() {
    let node = Arc::new(MockNode::new());
    node.set_offline(true);
    let facade = unreachable_redis(node);

    let err = facade.chain_summary().await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_hit_after_miss() {
    let node = Arc::new(MockNode::new());
    node.mine(2, MINER);
    let facade = memory_facade(node.clone(), CacheTtls::default());

    assert_eq!(facade.chain_summary().await.unwrap().status, CacheStatus::Miss);
    let hit = facade.chain_summary().await.unwrap();
    assert_eq!(hit.status, CacheStatus::Hit);
    assert_eq!(hit.value.blocks, 1);
    assert_eq!(node.calls("getblockchaininfo"), 1);
}

#[tokio::test]
async fn test_stale_copy_served_while_node_is_down() {
    let node = Arc::new(MockNode::new());
    node.mine(2, MINER);
    let ttls = CacheTtls { chain_summary_secs: 1, ..CacheTtls::default() };
    let facade = memory_facade(node.clone(), ttls);

    facade.chain_summary().await.unwrap();
    node.set_offline(true);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let stale = facade.chain_summary().await.unwrap();
    assert!(stale.is_stale());
    assert_eq!(stale.value.blocks, 1);

    node.set_offline(false);
    let fresh = facade.chain_summary().await.unwrap();
    assert_eq!(fresh.status, CacheStatus::Miss);
}

#[tokio::test]
async fn test_ingested_block_invalidates_chain_summary() {
    let node = Arc::new(MockNode::new());
    node.mine(3, MINER);
    let facade = memory_facade(node.clone(), CacheTtls::default());
    let h = Harness::new(node.clone(), vex_core::scanner::Tracking::all()).await;
    let pipeline = h
        .pipeline(Arc::new(MempoolTracker::new(Duration::from_secs(60))), fast_ingest_settings())
        .with_cache(facade.clone());

    pipeline.sync_to_tip().await.unwrap();
    assert_eq!(facade.chain_summary().await.unwrap().value.blocks, 2);
    assert_eq!(facade.chain_summary().await.unwrap().status, CacheStatus::Hit);

    node.mine(1, MINER);
    pipeline.sync_to_tip().await.unwrap();

    let after = facade.chain_summary().await.unwrap();
    assert_eq!(after.status, CacheStatus::Miss);
    assert_eq!(after.value.blocks, 3);
}

#[tokio::test]
async fn test_clear_all_forces_refetch() {
    let node = Arc::new(MockNode::new());
    node.mine(2, MINER);
    let facade = memory_facade(node.clone(), CacheTtls::default());

    facade.block_at_height(1).await.unwrap();
    facade.mempool().await.unwrap();
    facade.clear_all().await;

    assert_eq!(facade.block_at_height(1).await.unwrap().status, CacheStatus::Miss);
    assert_eq!(facade.mempool().await.unwrap().status, CacheStatus::Miss);
}

#[tokio::test]
async fn test_new_block_refreshes_only_affected_addresses() {
    let node = Arc::new(MockNode::new());
    node.set_identity(identity_info(STAKER, "staker"));
    node.set_balance(WALLET, AddressBalance { balance: 5, received: 9 });
    let facade = memory_facade(node.clone(), CacheTtls::default());

    let identity = facade.identity(STAKER).await.unwrap();
    assert_eq!(identity.status, CacheStatus::Miss);
    assert_eq!(identity.value.identity.name, "staker");
    assert_eq!(facade.address_balance(WALLET).await.unwrap().value.balance, 5);

    node.set_balance(WALLET, AddressBalance { balance: 7, received: 11 });
    assert_eq!(facade.address_balance(WALLET).await.unwrap().value.balance, 5);
    facade.on_new_block(&[WALLET.to_string()]).await;

    let refreshed = facade.address_balance(WALLET).await.unwrap();
    assert_eq!(refreshed.status, CacheStatus::Miss);
    assert_eq!(refreshed.value.balance, 7);
    assert_eq!(facade.identity(STAKER).await.unwrap().status, CacheStatus::Hit);
    assert_eq!(node.calls("getidentity"), 1);
}
