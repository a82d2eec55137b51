use futures::{stream, StreamExt};
use std::{ops::RangeInclusive, sync::Arc};
use tokio_util::sync::CancellationToken;

use super::{BlockProcessor, ScanError, ScanMode};
use crate::{
    cache::CachedAccess,
    metrics::MetricsCollector,
    store::{ApplyOutcome, CheckpointUpdate},
    types::Block,
};

/// Batching knobs for a historical scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    pub mode: ScanMode,
    /// Blocks committed per store transaction.
    pub batch_size: u32,
    /// Concurrent block fetches within a batch.
    pub parallelism: usize,
    /// Height scanned first when there is no checkpoint.
    pub start_height: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self { mode: ScanMode::Full, batch_size: 100, parallelism: 16, start_height: 0 }
    }
}

/// Summary of a finished or cancelled scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub scanner_id: String,
    pub from: u64,
    pub to: u64,
    pub blocks_scanned: u64,
    pub applied: ApplyOutcome,
    /// Last durably completed height.
    pub checkpoint: Option<u64>,
    pub cancelled: bool,
}

/// Walks a height range in checkpointed batches.
///
/// The checkpoint is written in the same transaction as a batch's rows, so after a
/// crash the scan resumes at the first height whose data is not durable.
/// Cancellation is checked between batches only.
pub struct HistoricalScanner {
    processor: Arc<BlockProcessor>,
    settings: ScanSettings,
    facade: Option<CachedAccess>,
    metrics: MetricsCollector,
}

impl HistoricalScanner {
    #[must_use]
    pub fn new(processor: Arc<BlockProcessor>, settings: ScanSettings) -> Self {
        Self { processor, settings, facade: None, metrics: MetricsCollector::new() }
    }

    /// Invalidates cached balances for addresses touched by each committed batch.
    #[must_use]
    pub fn with_cache(mut self, facade: CachedAccess) -> Self {
        self.facade = Some(facade);
        self
    }

    /// Checkpoint key; one checkpoint per scan mode.
    #[must_use]
    pub fn scanner_id(&self) -> String {
        format!("historical-{}", self.settings.mode)
    }

    /// Scans from the height after the stored checkpoint through `end`.
    ///
    /// # Errors
    ///
    /// See [`HistoricalScanner::scan`].
    pub async fn scan_from_checkpoint(
        &self,
        end: u64,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let scanner_id = self.scanner_id();
        let start = match self.processor.store().checkpoint(&scanner_id).await? {
            Some(checkpoint) => checkpoint.height + 1,
            None => self.settings.start_height,
        };

        if start > end {
            tracing::info!(scanner = %scanner_id, start, end, "scan already complete");
            return Ok(ScanReport {
                scanner_id,
                from: start,
                to: end,
                checkpoint: start.checked_sub(1),
                ..ScanReport::default()
            });
        }
        self.scan(start..=end, cancel).await
    }

    /// Extracts and persists everything in `range`.
    ///
    /// In [`ScanMode::Rewards`] the PoS index is built for the range first and only
    /// stake blocks are fetched.
    ///
    /// # Errors
    ///
    /// [`ScanError::InvalidRange`] for an inverted range, a fetch error carrying the
    /// failing height once per-block retries are exhausted, or a store error. The
    /// checkpoint never moves past a failed batch.
    pub async fn scan(
        &self,
        range: RangeInclusive<u64>,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let (from, to) = (*range.start(), *range.end());
        if from > to {
            return Err(ScanError::InvalidRange { from, to });
        }

        let scanner_id = self.scanner_id();
        let candidates: Vec<u64> = match self.settings.mode {
            ScanMode::Full => range.collect(),
            ScanMode::Rewards => {
                self.processor.pos_index().build(from..=to).await?;
                self.processor.pos_index().stake_heights(from..=to).await?
            }
        };

        tracing::info!(
            scanner = %scanner_id,
            from,
            to,
            candidates = candidates.len(),
            batch_size = self.settings.batch_size,
            "historical scan started"
        );

        let mut report = ScanReport { scanner_id: scanner_id.clone(), from, to, ..ScanReport::default() };
        let batch_size = usize::try_from(self.settings.batch_size.max(1)).unwrap_or(usize::MAX);
        let batches: Vec<&[u64]> = candidates.chunks(batch_size).collect();
        let total = batches.len();

        if batches.is_empty() {
            self.commit(&[], to, &mut report).await?;
        }

        for (index, heights) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(scanner = %scanner_id, checkpoint = ?report.checkpoint, "historical scan cancelled");
                report.cancelled = true;
                return Ok(report);
            }

            let blocks = self.fetch_batch(heights, &scanner_id).await?;
            // The last batch also covers trailing heights with no candidates.
            let covered = if index + 1 == total { to } else { heights.last().copied().unwrap_or(to) };
            self.commit(&blocks, covered, &mut report).await?;
        }

        tracing::info!(
            scanner = %scanner_id,
            from,
            to,
            blocks = report.blocks_scanned,
            utxos = report.applied.utxos_inserted,
            spends = report.applied.spends_applied,
            rewards = report.applied.rewards_inserted,
            "historical scan finished"
        );
        Ok(report)
    }

    async fn fetch_batch(&self, heights: &[u64], scanner_id: &str) -> Result<Vec<Block>, ScanError> {
        let results: Vec<Result<Block, ScanError>> = stream::iter(heights.iter().copied())
            .map(|height| self.processor.fetch_block(height, scanner_id))
            .buffer_unordered(self.settings.parallelism.max(1))
            .collect()
            .await;

        let mut blocks = Vec::with_capacity(results.len());
        let mut first_failure: Option<ScanError> = None;
        for result in results {
            match result {
                Ok(block) => blocks.push(block),
                Err(e) => {
                    // Report the lowest failing height; that is where a resume restarts.
                    let lower = match (&first_failure, e.height()) {
                        (Some(current), Some(h)) => current.height().is_some_and(|c| h < c),
                        (None, _) => true,
                        _ => false,
                    };
                    if lower {
                        first_failure = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_failure {
            return Err(e);
        }

        blocks.sort_by_key(|b| b.height);
        Ok(blocks)
    }

    async fn commit(
        &self,
        blocks: &[Block],
        covered: u64,
        report: &mut ScanReport,
    ) -> Result<(), ScanError> {
        let checkpoint = CheckpointUpdate { scanner_id: report.scanner_id.clone(), height: covered };
        let outcome = self.processor.process(blocks, self.settings.mode, Some(checkpoint)).await?;

        report.blocks_scanned += blocks.len() as u64;
        report.applied += outcome.applied;
        report.checkpoint = Some(covered);

        if let Some(facade) = &self.facade {
            if !outcome.affected_addresses.is_empty() {
                facade.on_new_block(&outcome.affected_addresses).await;
            }
        }

        self.metrics.record_scan_progress(&report.scanner_id, covered, blocks.len());
        tracing::info!(
            scanner = %report.scanner_id,
            checkpoint = covered,
            blocks = blocks.len(),
            "scan batch committed"
        );
        Ok(())
    }
}
