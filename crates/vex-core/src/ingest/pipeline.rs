use chrono::Utc;
use parking_lot::RwLock;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use super::{BlockFeed, FeedEvent, IngestError, IngestState};
use crate::{
    cache::CachedAccess,
    chain::ChainState,
    mempool::MempoolTracker,
    metrics::MetricsCollector,
    orphan::OrphanDetector,
    rpc::RetryPolicy,
    scanner::{BlockProcessor, ScanMode},
    store::CheckpointUpdate,
    types::Block,
};

/// Checkpoint key of the real-time pipeline.
pub const INGEST_CHECKPOINT: &str = "ingest";

/// Connect failures in a row after which they are logged as errors.
const ESCALATE_AFTER_FAILURES: u32 = 5;

/// Reconciliations one apply pass may run before giving up until the next tick.
const MAX_RECONCILES_PER_PASS: u32 = 3;

enum Link {
    /// The same block is already indexed at its height.
    Indexed,
    /// Its parent is the indexed block below it, or nothing is indexed there.
    Extends,
    /// A different block is indexed at its height, or its parent is not the indexed one.
    Diverges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSettings {
    pub mode: ScanMode,
    /// Tick of poll-only mode.
    pub poll_interval: Duration,
    /// Tick of the catch-up poll while subscribed.
    pub safety_poll_interval: Duration,
    /// Feed reconnect backoff.
    pub reconnect: RetryPolicy,
    /// Bound on handling one notification; matches the RPC timeout.
    pub processing_timeout: Duration,
    /// Retries of a notification that failed transiently.
    pub processing_retry: RetryPolicy,
    /// Indexed blocks re-checked when a reorg is suspected.
    pub reconcile_depth: u32,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            mode: ScanMode::Full,
            poll_interval: Duration::from_secs(5),
            safety_poll_interval: Duration::from_secs(60),
            reconnect: RetryPolicy {
                base: Duration::from_millis(500),
                cap: Duration::from_secs(30),
                max_attempts: u32::MAX,
            },
            processing_timeout: Duration::from_secs(30),
            processing_retry: RetryPolicy::default(),
            reconcile_depth: 20,
        }
    }
}

/// Applies new blocks as the node announces them.
///
/// Every block goes through the same [`BlockProcessor`] as the historical scanner.
/// Before a block is applied, missing heights below it are filled in and its parent
/// is checked against the index; a mismatch runs orphan reconciliation first.
pub struct IngestPipeline {
    processor: Arc<BlockProcessor>,
    orphans: Arc<OrphanDetector>,
    chain: Arc<ChainState>,
    mempool: Arc<MempoolTracker>,
    facade: Option<CachedAccess>,
    settings: IngestSettings,
    state: RwLock<IngestState>,
    metrics: MetricsCollector,
}

impl IngestPipeline {
    #[must_use]
    pub fn new(
        processor: Arc<BlockProcessor>,
        orphans: Arc<OrphanDetector>,
        chain: Arc<ChainState>,
        mempool: Arc<MempoolTracker>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            processor,
            orphans,
            chain,
            mempool,
            facade: None,
            settings,
            state: RwLock::new(IngestState::Disconnected),
            metrics: MetricsCollector::new(),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, facade: CachedAccess) -> Self {
        self.facade = Some(facade);
        self
    }

    #[must_use]
    pub fn state(&self) -> IngestState {
        *self.state.read()
    }

    fn set_state(&self, next: IngestState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "ingest state changed");
            self.metrics.record_ingest_state(next);
        }
    }

    /// Runs until `cancel` fires.
    ///
    /// With a feed, notifications drive ingestion and a slow safety poll catches
    /// anything dropped; connection loss falls back to polling while reconnecting.
    /// Without a feed, polls on `poll_interval`.
    ///
    /// # Errors
    ///
    /// Only a store failure while restoring the indexed tip at startup is returned.
    /// Everything later is logged and retried.
    pub async fn run(
        &self,
        feed: Option<Box<dyn BlockFeed>>,
        cancel: CancellationToken,
    ) -> Result<(), IngestError> {
        self.restore_tip().await?;
        match feed {
            Some(feed) => self.run_with_feed(feed, &cancel).await,
            None => self.run_polling(&cancel).await,
        }
        self.set_state(IngestState::Disconnected);
        tracing::info!("ingest pipeline stopped");
        Ok(())
    }

    /// Seeds the indexed tip from the ingest checkpoint when nothing was applied yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn restore_tip(&self) -> Result<Option<u64>, IngestError> {
        if let Some(height) = self.chain.indexed_height() {
            return Ok(Some(height));
        }
        let store = self.processor.store();
        let Some(checkpoint) = store.checkpoint(INGEST_CHECKPOINT).await? else {
            return Ok(None);
        };
        let Some(block) = store.indexed_block_at(checkpoint.height).await? else {
            return Ok(None);
        };
        self.chain.advance_indexed_tip(block.height, &block.hash).await;
        tracing::info!(height = block.height, hash = %block.hash, "ingest resuming from checkpoint");
        Ok(Some(block.height))
    }

    async fn run_polling(&self, cancel: &CancellationToken) {
        tracing::info!(
            interval_secs = self.settings.poll_interval.as_secs(),
            "ingest polling without feed"
        );
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => self.poll_tick(true).await,
            }
        }
    }

    async fn run_with_feed(&self, mut feed: Box<dyn BlockFeed>, cancel: &CancellationToken) {
        // Reconnection never gives up; the backoff attempt counts failures in a row.
        let mut backoff = self.settings.reconnect.backoff();

        'reconnect: loop {
            if cancel.is_cancelled() {
                return;
            }

            self.set_state(IngestState::Connecting);
            if let Err(e) = feed.connect().await {
                self.set_state(IngestState::Disconnected);
                self.metrics.record_ingest_failure(e.kind());
                let delay = backoff.next_delay();
                let failures = backoff.attempt();
                if failures >= ESCALATE_AFTER_FAILURES {
                    tracing::error!(
                        endpoint = feed.endpoint(),
                        failures,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "feed connect failed"
                    );
                } else {
                    tracing::warn!(
                        endpoint = feed.endpoint(),
                        failures,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "feed connect failed"
                    );
                }

                self.poll_tick(true).await;
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => continue 'reconnect,
                }
            }

            backoff.reset();
            self.set_state(IngestState::Subscribed);
            // Blocks announced while the subscription was down.
            self.poll_tick(false).await;

            let mut safety = tokio::time::interval(self.settings.safety_poll_interval);
            safety.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            safety.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = safety.tick() => self.poll_tick(false).await,
                    event = feed.next_event() => match event {
                        Ok(event) => {
                            self.set_state(IngestState::Processing);
                            self.handle_event(event).await;
                            self.set_state(IngestState::Subscribed);
                        }
                        Err(e) => {
                            self.set_state(IngestState::Disconnected);
                            self.metrics.record_ingest_failure(e.kind());
                            let delay = backoff.next_delay();
                            tracing::warn!(
                                endpoint = feed.endpoint(),
                                delay_ms = delay.as_millis(),
                                error = %e,
                                "feed lost, reconnecting"
                            );
                            tokio::select! {
                                () = cancel.cancelled() => return,
                                () = tokio::time::sleep(delay) => continue 'reconnect,
                            }
                        }
                    },
                }
            }
        }
    }

    /// Handles one feed notification. Failures are logged, never returned.
    pub async fn handle_event(&self, event: FeedEvent) {
        match event {
            FeedEvent::BlockHash(hash) => {
                if let Err(e) = self.process_notified(&hash).await {
                    self.metrics.record_ingest_failure(e.kind());
                    tracing::error!(hash = %hash, error = %e, "failed to ingest notified block");
                }
            }
            FeedEvent::TxHash(txid) => {
                self.mempool.observe(&txid);
            }
            FeedEvent::RawBlock(_) => {
                if let Err(e) = self.sync_to_tip().await {
                    self.metrics.record_ingest_failure(e.kind());
                    tracing::warn!(error = %e, "sync after raw block notification failed");
                }
            }
            FeedEvent::RawTx(_) => {}
        }
    }

    /// Applies the block with `hash`, retrying transient failures and timeouts.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted, or the first
    /// non-transient one.
    pub async fn process_notified(&self, hash: &str) -> Result<(), IngestError> {
        let policy = self.settings.processing_retry;
        let mut attempt = 0;
        loop {
            let result =
                match tokio::time::timeout(self.settings.processing_timeout, self.apply_hash(hash))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(IngestError::Timeout(self.settings.processing_timeout)),
                };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt + 1 < policy.attempts() => {
                    let delay = policy.delay_for(attempt);
                    attempt += 1;
                    tracing::warn!(
                        hash,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "block processing failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn apply_hash(&self, hash: &str) -> Result<(), IngestError> {
        let block = self.processor.fetch_block_by_hash(hash).await?;
        if block.confirmations < 0 {
            tracing::debug!(height = block.height, hash, "notified block already stale");
            return Ok(());
        }
        self.apply_canonical(block).await
    }

    /// Polls the node tip and applies everything above the indexed tip.
    ///
    /// # Errors
    ///
    /// Returns the first node, store, or reconcile failure.
    pub async fn sync_to_tip(&self) -> Result<u64, IngestError> {
        let node_height = self.processor.node().block_count().await?;
        self.chain.observe_node_height(node_height);

        let mut applied = 0;
        match self.chain.indexed_tip() {
            Some(tip) if tip.height >= node_height => {
                // No new height; the tip itself may have been replaced.
                let replaced = match self.processor.node().block_hash(tip.height).await {
                    Ok(canonical) => canonical != tip.hash,
                    Err(e) if e.is_not_found() => true,
                    Err(e) => return Err(e.into()),
                };
                if replaced {
                    if let Some(resume) = self.reconcile().await? {
                        applied += self.apply_range(resume, node_height).await?;
                    }
                }
            }
            Some(tip) => {
                applied += self.apply_range(tip.height + 1, node_height).await?;
            }
            None => {
                applied += self.apply_range(node_height, node_height).await?;
            }
        }
        Ok(applied)
    }

    async fn poll_tick(&self, sample_mempool: bool) {
        if let Err(e) = self.sync_to_tip().await {
            self.metrics.record_ingest_failure(e.kind());
            tracing::warn!(error = %e, "ingest poll failed");
        }
        if sample_mempool {
            match self.processor.node().raw_mempool().await {
                Ok(txids) => {
                    let new = self.mempool.observe_all(txids.iter().map(String::as_str));
                    tracing::trace!(sampled = txids.len(), new, "mempool sampled");
                }
                Err(e) => tracing::debug!(error = %e, "mempool sample failed"),
            }
        }
    }

    async fn fetch_at(&self, height: u64) -> Result<Block, IngestError> {
        Ok(self.processor.fetch_block(height, INGEST_CHECKPOINT).await?)
    }

    /// Applies canonical blocks `from..=to` in height order.
    async fn apply_range(&self, from: u64, to: u64) -> Result<u64, IngestError> {
        self.apply_linked(from, to, None).await
    }

    /// Applies `from..=to` one block at a time, each checked against the indexed block
    /// beneath it. A block that does not extend the index triggers reconciliation and
    /// the walk restarts from the height it reports. `known` stands in for the block at
    /// its own height instead of a fetch.
    async fn apply_linked(
        &self,
        from: u64,
        to: u64,
        known: Option<&Block>,
    ) -> Result<u64, IngestError> {
        let mut applied = 0;
        let mut reconciles = 0;
        let mut height = from;
        while height <= to {
            let block = match known {
                Some(known) if known.height == height => known.clone(),
                _ => self.fetch_at(height).await?,
            };

            match self.link(&block).await? {
                Link::Indexed => {
                    tracing::trace!(height, "block already indexed");
                    height += 1;
                }
                Link::Extends => {
                    self.apply_one(&block).await?;
                    applied += 1;
                    height += 1;
                }
                Link::Diverges => {
                    reconciles += 1;
                    let resume = match self.reconcile().await? {
                        Some(resume) if reconciles <= MAX_RECONCILES_PER_PASS => resume,
                        _ => return Err(IngestError::UnresolvedFork { height }),
                    };
                    tracing::info!(height, resume, "index diverged from node, re-applying");
                    height = resume;
                }
            }
        }
        Ok(applied)
    }

    /// How `block` relates to what is indexed at and just below its height.
    async fn link(&self, block: &Block) -> Result<Link, IngestError> {
        let store = self.processor.store();

        if let Some(stored) = store.indexed_block_at(block.height).await? {
            return Ok(if stored.hash == block.hash { Link::Indexed } else { Link::Diverges });
        }

        let Some(parent_height) = block.height.checked_sub(1) else {
            return Ok(Link::Extends);
        };
        match store.indexed_block_at(parent_height).await? {
            Some(parent) if block.previousblockhash.as_deref() != Some(parent.hash.as_str()) => {
                tracing::warn!(
                    height = block.height,
                    expected_parent = %parent.hash,
                    parent = ?block.previousblockhash,
                    "parent mismatch"
                );
                Ok(Link::Diverges)
            }
            _ => Ok(Link::Extends),
        }
    }

    /// Runs orphan reconciliation and returns the height to re-apply from, if any
    /// indexed block was orphaned.
    async fn reconcile(&self) -> Result<Option<u64>, IngestError> {
        let report = self.orphans.reconcile(self.settings.reconcile_depth).await?;
        if let (Some(resume), Some(facade)) = (report.resume_from, &self.facade) {
            facade.on_reorg(resume, &[]).await;
        }
        Ok(report.resume_from)
    }

    /// Applies `block`, first filling any heights missing between the indexed tip and
    /// it. Every block on the way goes through the parent check.
    async fn apply_canonical(&self, block: Block) -> Result<(), IngestError> {
        let from = match self.chain.indexed_height() {
            Some(last) if last + 1 < block.height => {
                tracing::info!(from = last + 1, to = block.height - 1, "filling ingest gap");
                last + 1
            }
            _ => block.height,
        };
        self.apply_linked(from, block.height, Some(&block)).await?;
        Ok(())
    }

    async fn apply_one(&self, block: &Block) -> Result<(), IngestError> {
        let checkpoint =
            CheckpointUpdate { scanner_id: INGEST_CHECKPOINT.to_string(), height: block.height };
        let outcome = self
            .processor
            .process(std::slice::from_ref(block), self.settings.mode, Some(checkpoint))
            .await?;

        let txids = block.transactions().map(|tx| tx.txid.as_str());
        let summary = self.mempool.confirm_block(block.height, txids, Utc::now());

        if let Some(facade) = &self.facade {
            facade.on_new_block(&outcome.affected_addresses).await;
        }

        // A rewind may have left the tip above this height; rewinding to it is exact.
        if !self.chain.advance_indexed_tip(block.height, &block.hash).await {
            self.chain.rewind_indexed_tip(block.height, &block.hash).await;
        }
        self.metrics.record_indexed_tip(block.height);

        tracing::info!(
            height = block.height,
            hash = %block.hash,
            txs = summary.confirmed,
            utxos = outcome.applied.utxos_inserted,
            spends = outcome.applied.spends_applied,
            rewards = outcome.applied.rewards_inserted,
            latency_known = summary.known,
            "block ingested"
        );
        Ok(())
    }
}
