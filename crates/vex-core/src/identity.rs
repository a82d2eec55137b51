//! Lazy discovery of identity creation metadata.
//!
//! Identities are recorded when first observed, either from configuration or from an
//! identity output in a scanned block. Their registration height and txid come from
//! the node's identity history, looked up in the background.

use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    config::TrackedIdentity,
    rpc::{NodeClient, RpcError},
    store::{IndexStore, StoreError},
};

/// Counts from one [`IdentityBackfiller::backfill_once`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub examined: usize,
    pub resolved: usize,
    /// The node had no history for the identity.
    pub unknown: usize,
    pub failed: usize,
}

pub struct IdentityBackfiller {
    node: Arc<dyn NodeClient>,
    store: Arc<dyn IndexStore>,
    batch_size: u32,
}

impl IdentityBackfiller {
    #[must_use]
    pub fn new(node: Arc<dyn NodeClient>, store: Arc<dyn IndexStore>) -> Self {
        Self { node, store, batch_size: 50 }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Records configured identities so they are backfilled even before any block
    /// mentions them.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn register_tracked(&self, identities: &[TrackedIdentity]) -> Result<(), StoreError> {
        for identity in identities {
            self.store.register_identity(&identity.address, identity.name.as_deref()).await?;
        }
        if !identities.is_empty() {
            tracing::info!(count = identities.len(), "tracked identities registered");
        }
        Ok(())
    }

    /// Resolves creation metadata for one batch of identities that lack it.
    ///
    /// Per-identity node failures are logged and counted; the identity is retried on
    /// the next pass.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be read or written.
    pub async fn backfill_once(&self) -> Result<BackfillReport, StoreError> {
        let pending = self.store.identities_missing_creation(self.batch_size).await?;
        let mut report = BackfillReport { examined: pending.len(), ..BackfillReport::default() };

        for identity in pending {
            match self.node.identity_history(&identity.address).await {
                Ok(history) => match history.creation() {
                    Some(revision) => {
                        self.store
                            .set_identity_creation(
                                &identity.address,
                                revision.height,
                                &revision.output.txid,
                            )
                            .await?;
                        tracing::debug!(
                            address = %identity.address,
                            height = revision.height,
                            txid = %revision.output.txid,
                            "identity creation resolved"
                        );
                        report.resolved += 1;
                    }
                    None => report.unknown += 1,
                },
                Err(e) if e.is_not_found() => {
                    tracing::debug!(address = %identity.address, "identity unknown to node");
                    report.unknown += 1;
                }
                Err(e) => {
                    log_failure(&identity.address, &e);
                    report.failed += 1;
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                resolved = report.resolved,
                unknown = report.unknown,
                failed = report.failed,
                "identity backfill pass"
            );
        }
        Ok(report)
    }

    /// Runs a pass every `interval` until cancelled.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.backfill_once().await {
                        tracing::warn!(error = %e, "identity backfill failed");
                    }
                }
            }
        }
        tracing::debug!("identity backfiller stopped");
    }
}

fn log_failure(address: &str, error: &RpcError) {
    if error.is_transient() {
        tracing::debug!(address, error = %error, "identity history unavailable");
    } else {
        tracing::warn!(address, error = %error, "identity history lookup failed");
    }
}
