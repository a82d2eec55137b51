//! First-seen timestamps for unconfirmed transactions.
//!
//! The ingest pipeline records each transaction id the first time it shows up
//! unconfirmed (a `hashtx` notification or a `getrawmempool` sample). When a block
//! containing it is applied, the latency is the application time minus the first-seen
//! time. Both timestamps come from the local clock. Transactions never seen
//! unconfirmed have unknown latency.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

use crate::metrics::MetricsCollector;

/// Latency figures for the transactions one block confirmed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfirmationSummary {
    pub block_height: u64,
    pub confirmed: usize,
    pub known: usize,
    pub unknown: usize,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
    pub mean: Option<Duration>,
}

impl ConfirmationSummary {
    /// Latencies in observation order.
    fn from_latencies(block_height: u64, confirmed: usize, latencies: &[Duration]) -> Self {
        let known = latencies.len();
        let total: Duration = latencies.iter().sum();
        Self {
            block_height,
            confirmed,
            known,
            unknown: confirmed - known,
            min: latencies.iter().min().copied(),
            max: latencies.iter().max().copied(),
            mean: u32::try_from(known).ok().filter(|n| *n > 0).map(|n| total / n),
        }
    }
}

pub struct MempoolTracker {
    first_seen: DashMap<String, DateTime<Utc>>,
    max_unconfirmed_age: Duration,
    metrics: MetricsCollector,
}

impl MempoolTracker {
    #[must_use]
    pub fn new(max_unconfirmed_age: Duration) -> Self {
        Self { first_seen: DashMap::new(), max_unconfirmed_age, metrics: MetricsCollector::new() }
    }

    /// Records `txid` as seen now, unless already tracked.
    pub fn observe(&self, txid: &str) -> bool {
        self.observe_at(txid, Utc::now())
    }

    /// Records `txid` as seen at `at`, unless already tracked.
    pub fn observe_at(&self, txid: &str, at: DateTime<Utc>) -> bool {
        if self.first_seen.contains_key(txid) {
            return false;
        }
        self.first_seen.entry(txid.to_string()).or_insert(at);
        self.metrics.record_mempool_size(self.first_seen.len());
        true
    }

    /// Records every id from a mempool sample; returns how many were new.
    pub fn observe_all<'a>(&self, txids: impl IntoIterator<Item = &'a str>) -> usize {
        let now = Utc::now();
        txids.into_iter().filter(|txid| self.observe_at(txid, now)).count()
    }

    /// Latency from first sight to `confirmed_at`, removing the entry.
    ///
    /// `None` when the transaction was never seen unconfirmed.
    pub fn confirm(&self, txid: &str, confirmed_at: DateTime<Utc>) -> Option<Duration> {
        let (_, seen) = self.first_seen.remove(txid)?;
        Some((confirmed_at - seen).to_std().unwrap_or(Duration::ZERO))
    }

    /// Confirms every transaction of a block applied at `confirmed_at`.
    pub fn confirm_block<'a>(
        &self,
        block_height: u64,
        txids: impl IntoIterator<Item = &'a str>,
        confirmed_at: DateTime<Utc>,
    ) -> ConfirmationSummary {
        let mut confirmed = 0;
        let mut latencies = Vec::new();
        for txid in txids {
            confirmed += 1;
            if let Some(latency) = self.confirm(txid, confirmed_at) {
                self.metrics.record_propagation_latency(latency);
                latencies.push(latency);
            }
        }
        self.metrics.record_mempool_size(self.first_seen.len());

        let summary = ConfirmationSummary::from_latencies(block_height, confirmed, &latencies);
        tracing::debug!(
            height = block_height,
            confirmed = summary.confirmed,
            known = summary.known,
            unknown = summary.unknown,
            mean_ms = summary.mean.map(|d| d.as_millis()),
            "block confirmations"
        );
        summary
    }

    /// Drops entries first seen longer than the configured age before `now`.
    pub fn evict_older_than_max_age(&self, now: DateTime<Utc>) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(self.max_unconfirmed_age) else {
            return 0;
        };
        let cutoff = now - max_age;
        let before = self.first_seen.len();
        self.first_seen.retain(|_, seen| *seen >= cutoff);
        let evicted = before.saturating_sub(self.first_seen.len());
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.first_seen.len(), "evicted stale mempool entries");
            self.metrics.record_mempool_size(self.first_seen.len());
        }
        evicted
    }

    #[must_use]
    pub fn first_seen(&self, txid: &str) -> Option<DateTime<Utc>> {
        self.first_seen.get(txid).map(|entry| *entry)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }
}
