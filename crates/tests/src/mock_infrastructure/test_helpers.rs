//! Fixtures shared by the integration tests.

use async_trait::async_trait;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use vex_core::{
    chain::ChainState,
    ingest::{BlockFeed, FeedEvent, IngestError, IngestPipeline, IngestSettings},
    mempool::MempoolTracker,
    orphan::OrphanDetector,
    pos_index::PosBlockIndex,
    rpc::RetryPolicy,
    scanner::{BlockProcessor, HistoricalScanner, ScanMode, ScanSettings, Tracking},
    store::{IndexStore, SqliteIndexStore},
    testing::{block, block_hash, coinbase, coinstake, input, transfer, MockNode},
    types::{Block, Utxo, SATS_PER_COIN},
};

/// Identity whose rewards the scenarios track.
pub const STAKER: &str = "iABCstakerIdentityAddress0000000";
/// Transparent address the spend scenario tracks.
pub const WALLET: &str = "RWalletTrackedAddress000000000000";
pub const MINER: &str = "RMinerUntracked0000000000000000000";

/// Store, PoS index, and processor over a [`MockNode`].
pub struct Harness {
    pub node: Arc<MockNode>,
    pub store: Arc<dyn IndexStore>,
    pub pos_index: Arc<PosBlockIndex>,
    pub processor: Arc<BlockProcessor>,
    pub chain: Arc<ChainState>,
}

impl Harness {
    pub async fn new(node: Arc<MockNode>, tracking: Tracking) -> Self {
        let store: Arc<dyn IndexStore> =
            Arc::new(SqliteIndexStore::in_memory().await.expect("in-memory store"));
        let pos_index = Arc::new(PosBlockIndex::new(node.clone(), Arc::clone(&store)));
        let processor = Arc::new(
            BlockProcessor::new(
                node.clone(),
                Arc::clone(&store),
                Arc::clone(&pos_index),
                Arc::new(tracking),
            )
            .with_block_retries(2, fast_retry()),
        );
        Self { node, store, pos_index, processor, chain: Arc::new(ChainState::new()) }
    }

    /// Tracks [`STAKER`] and [`WALLET`].
    pub async fn tracking_scenario(node: Arc<MockNode>) -> Self {
        let mut tracking = Tracking::addresses([WALLET.to_string()]);
        tracking.track_identity(STAKER.to_string());
        Self::new(node, tracking).await
    }

    #[must_use]
    pub fn scanner(&self, mode: ScanMode, batch_size: u32) -> HistoricalScanner {
        HistoricalScanner::new(
            Arc::clone(&self.processor),
            ScanSettings { mode, batch_size, parallelism: 4, start_height: 0 },
        )
    }

    #[must_use]
    pub fn orphans(&self, safety_depth: u64) -> Arc<OrphanDetector> {
        Arc::new(OrphanDetector::new(
            self.node.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.pos_index),
            Arc::clone(&self.chain),
            safety_depth,
        ))
    }

    #[must_use]
    pub fn pipeline(
        &self,
        mempool: Arc<MempoolTracker>,
        settings: IngestSettings,
    ) -> IngestPipeline {
        IngestPipeline::new(
            Arc::clone(&self.processor),
            self.orphans(6),
            Arc::clone(&self.chain),
            mempool,
            settings,
        )
    }

    /// Every UTXO for `address`, spent or not, ordered by outpoint.
    pub async fn utxos(&self, address: &str) -> Vec<Utxo> {
        let mut utxos = self.store.utxos_for_address(address, true).await.expect("utxo query");
        utxos.sort_by(|a, b| (&a.txid, a.vout).cmp(&(&b.txid, b.vout)));
        utxos
    }
}

#[must_use]
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy { base: Duration::from_millis(1), cap: Duration::from_millis(5), max_attempts: 3 }
}

/// Ingest settings with millisecond intervals and retries.
#[must_use]
pub fn fast_ingest_settings() -> IngestSettings {
    IngestSettings {
        poll_interval: Duration::from_millis(20),
        safety_poll_interval: Duration::from_millis(50),
        reconnect: fast_retry(),
        processing_timeout: Duration::from_secs(2),
        processing_retry: fast_retry(),
        ..IngestSettings::default()
    }
}

/// Work blocks 800200..=800205 except 800203, a stake block whose coinstake pays
/// [`STAKER`] 5.0 from its own stake.
#[must_use]
pub fn reward_scenario_chain() -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut previous: Option<String> = None;
    for height in 800_200..=800_205u64 {
        let hash = block_hash(height, "main");
        let reward = coinbase(&format!("cb-{height}"), &[(MINER, 3 * SATS_PER_COIN)]);
        let block = if height == 800_203 {
            let payout = coinbase(&format!("cb-{height}"), &[(STAKER, 5 * SATS_PER_COIN)]);
            let stake = coinstake(
                &format!("cs-{height}"),
                input("earlier-stake", 0, Some(100 * SATS_PER_COIN), Some(STAKER)),
                STAKER,
                100 * SATS_PER_COIN,
            );
            block(height, &hash, previous.as_deref(), Some("stake"), vec![payout, stake])
        } else {
            block(height, &hash, previous.as_deref(), Some("work"), vec![reward])
        };
        previous = Some(hash);
        blocks.push(block);
    }
    blocks
}

/// Heights 0..=3: [`WALLET`] receives 10.0 in T1 at height 1, T2 spends it at height 3
/// paying 9.9 to an untracked address.
#[must_use]
pub fn spend_scenario_chain() -> Vec<Block> {
    let genesis = block(
        0,
        &block_hash(0, "main"),
        None,
        Some("work"),
        vec![coinbase("cb-0", &[(MINER, 20 * SATS_PER_COIN)])],
    );
    let t1 = transfer(
        "T1",
        vec![input("cb-0", 0, Some(20 * SATS_PER_COIN), Some(MINER))],
        &[(WALLET, 10 * SATS_PER_COIN), (MINER, 9 * SATS_PER_COIN)],
    );
    let one = block(
        1,
        &block_hash(1, "main"),
        Some(&genesis.hash),
        Some("work"),
        vec![coinbase("cb-1", &[(MINER, SATS_PER_COIN)]), t1],
    );
    let two = block(
        2,
        &block_hash(2, "main"),
        Some(&one.hash),
        Some("work"),
        vec![coinbase("cb-2", &[(MINER, SATS_PER_COIN)])],
    );
    let t2 = transfer(
        "T2",
        vec![input("T1", 0, Some(10 * SATS_PER_COIN), Some(WALLET))],
        &[(MINER, 9 * SATS_PER_COIN + 90_000_000)],
    );
    let three = block(
        3,
        &block_hash(3, "main"),
        Some(&two.hash),
        Some("work"),
        vec![coinbase("cb-3", &[(MINER, SATS_PER_COIN)]), t2],
    );
    vec![genesis, one, two, three]
}

/// [`BlockFeed`] fed by the test through an mpsc channel.
///
/// Dropping the sender makes `next_event` fail as a lost subscription; `connect`
/// fails while `refuse_connections` is set.
pub struct ChannelFeed {
    events: mpsc::UnboundedReceiver<FeedEvent>,
    refuse: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
}

/// Test side of a [`ChannelFeed`].
#[derive(Clone)]
pub struct FeedHandle {
    pub events: mpsc::UnboundedSender<FeedEvent>,
    refuse: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
}

impl FeedHandle {
    pub fn send(&self, event: FeedEvent) {
        self.events.send(event).expect("feed receiver alive");
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    #[must_use]
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl ChannelFeed {
    #[must_use]
    pub fn channel() -> (Self, FeedHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let refuse = Arc::new(AtomicBool::new(false));
        let connects = Arc::new(AtomicUsize::new(0));
        (
            Self { events: rx, refuse: Arc::clone(&refuse), connects: Arc::clone(&connects) },
            FeedHandle { events: tx, refuse, connects },
        )
    }
}

#[async_trait]
impl BlockFeed for ChannelFeed {
    async fn connect(&mut self) -> Result<(), IngestError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(IngestError::Feed("connection refused".to_string()));
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Result<FeedEvent, IngestError> {
        self.events.recv().await.ok_or(IngestError::FeedClosed)
    }

    fn endpoint(&self) -> &str {
        "channel://test"
    }
}

/// Polls `condition` every 10ms until it holds, failing the test after `limit`.
pub async fn wait_until<F>(limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
