//! Prometheus metrics for the indexing engine.
//!
//! Recording goes through the `metrics` facade, so it is a no-op until a recorder is
//! installed. The daemon installs the Prometheus exporter with
//! [`install_prometheus_exporter`]; tests never do.

use crate::{ingest::IngestState, rpc::RpcError};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{net::SocketAddr, time::Duration};

/// Installs the global Prometheus recorder with an HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or a recorder is already installed.
pub fn install_prometheus_exporter(
    addr: SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}

/// Handle used by components to record metrics.
///
/// Stateless; clones are free.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    pub fn record_rpc_call(&self, method: &str, result: Result<(), &RpcError>, elapsed: Duration) {
        let outcome = match result {
            Ok(()) => "ok",
            Err(e) => e.as_str(),
        };
        counter!("vex_rpc_requests_total", "method" => method.to_string(), "outcome" => outcome)
            .increment(1);
        histogram!("vex_rpc_duration_seconds", "method" => method.to_string())
            .record(elapsed.as_secs_f64());
    }

    pub fn record_rpc_retry(&self, method: &str, attempt: u32) {
        counter!("vex_rpc_retries_total", "method" => method.to_string()).increment(1);
        gauge!("vex_rpc_last_retry_attempt", "method" => method.to_string())
            .set(f64::from(attempt));
    }

    pub fn record_cache_op(&self, op: &'static str, result: &'static str) {
        counter!("vex_cache_operations_total", "op" => op, "result" => result).increment(1);
    }

    pub fn record_cache_lookup(&self, category: &'static str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        counter!("vex_cache_lookups_total", "category" => category, "result" => result)
            .increment(1);
    }

    pub fn record_stale_served(&self, category: &'static str) {
        counter!("vex_cache_stale_served_total", "category" => category).increment(1);
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_scan_progress(&self, scanner: &str, height: u64, blocks: usize) {
        gauge!("vex_scan_height", "scanner" => scanner.to_string()).set(height as f64);
        counter!("vex_scan_blocks_total", "scanner" => scanner.to_string())
            .increment(blocks as u64);
    }

    pub fn record_block_retry(&self, scanner: &str) {
        counter!("vex_scan_block_retries_total", "scanner" => scanner.to_string()).increment(1);
    }

    pub fn record_ingest_state(&self, state: IngestState) {
        gauge!("vex_ingest_state").set(f64::from(state as u8));
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_indexed_tip(&self, height: u64) {
        gauge!("vex_indexed_tip_height").set(height as f64);
    }

    pub fn record_ingest_failure(&self, kind: &'static str) {
        counter!("vex_ingest_failures_total", "kind" => kind).increment(1);
    }

    pub fn record_propagation_latency(&self, latency: Duration) {
        histogram!("vex_propagation_latency_seconds").record(latency.as_secs_f64());
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_mempool_size(&self, size: usize) {
        gauge!("vex_mempool_tracked").set(size as f64);
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_reorg(&self, depth: u64, from_height: u64) {
        counter!("vex_reorgs_total").increment(1);
        histogram!("vex_reorg_depth").record(depth as f64);
        tracing::debug!(depth, from_height, "reorg recorded");
    }

    pub fn record_orphaned_blocks(&self, count: usize) {
        counter!("vex_orphaned_blocks_total").increment(count as u64);
    }
}
