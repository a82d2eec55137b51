//! Background tasks and graceful shutdown.

use chrono::Utc;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{builder::VexRuntimeBuilder, VexComponents};
use crate::{config::AppConfig, ingest::BlockFeed};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Owns the components and the long-lived tasks driving them.
///
/// All tasks hang off one root [`CancellationToken`]. [`VexRuntime::shutdown`] cancels
/// it and waits for each task, aborting any that outlive the grace period.
pub struct VexRuntime {
    components: VexComponents,
    config: AppConfig,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl VexRuntime {
    #[must_use]
    pub fn builder() -> VexRuntimeBuilder {
        VexRuntimeBuilder::new()
    }

    /// Spawns the enabled background tasks.
    ///
    /// Called by [`VexRuntimeBuilder`] once every component exists.
    pub(super) fn start(
        components: VexComponents,
        config: AppConfig,
        feed: Option<Box<dyn BlockFeed>>,
        enable_ingest: bool,
        enable_identity_backfill: bool,
        enable_mempool_eviction: bool,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        if enable_ingest {
            let ingest = Arc::clone(components.ingest());
            let token = cancel.child_token();
            tasks.push((
                "ingest",
                tokio::spawn(async move {
                    if let Err(e) = ingest.run(feed, token).await {
                        error!(error = %e, "ingest pipeline failed to start");
                    }
                }),
            ));
            debug!("Ingest task started");
        }

        if enable_identity_backfill {
            let backfiller = Arc::clone(components.backfiller());
            let token = cancel.child_token();
            let interval = config.tracking.backfill_interval();
            tasks.push((
                "identity-backfill",
                tokio::spawn(async move { backfiller.run(interval, token).await }),
            ));
            debug!("Identity backfill task started");
        }

        if enable_mempool_eviction {
            tasks.push((
                "maintenance",
                Self::spawn_maintenance(
                    components.clone(),
                    config.mempool.eviction_interval(),
                    cancel.child_token(),
                ),
            ));
            debug!("Maintenance task started");
        }

        Self {
            components,
            config,
            cancel,
            tasks,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Evicts stale mempool entries and purges the in-process cache.
    fn spawn_maintenance(
        components: VexComponents,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = components.mempool().evict_older_than_max_age(Utc::now());
                        let purged =
                            components.memory_cache().map_or(0, |cache| cache.purge_expired());
                        if evicted > 0 || purged > 0 {
                            debug!(evicted, purged, "maintenance pass");
                        }
                    }
                }
            }
        })
    }

    #[must_use]
    pub fn components(&self) -> &VexComponents {
        &self.components
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Token cancelled at shutdown, for work the caller runs itself.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Cancels every task and waits for them to finish.
    pub async fn shutdown(self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!(tasks = self.tasks.len(), "Initiating Vex runtime shutdown");
        self.cancel.cancel();

        for (name, mut handle) in self.tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!(task = name, "task completed"),
                Ok(Err(e)) if e.is_cancelled() => debug!(task = name, "task cancelled"),
                Ok(Err(e)) => error!(task = name, error = %e, "task failed"),
                Err(_) => {
                    warn!(task = name, "task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        info!("Vex runtime shutdown complete");
    }
}

const _: () = {
    const fn assert_send<T: Send>() {}
    let _ = assert_send::<VexRuntime>;
};
