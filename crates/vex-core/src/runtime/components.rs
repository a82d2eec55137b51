//! Core component container for the Vex runtime.

use std::sync::Arc;

use crate::{
    cache::{CachedAccess, MemoryBackend},
    chain::ChainState,
    identity::IdentityBackfiller,
    ingest::IngestPipeline,
    mempool::MempoolTracker,
    orphan::OrphanDetector,
    pos_index::PosBlockIndex,
    rpc::NodeClient,
    scanner::{BlockProcessor, HistoricalScanner},
    store::IndexStore,
};

/// Container for all initialized engine components.
///
/// Everything is behind `Arc` and safe to clone into tasks and API handlers.
#[derive(Clone)]
pub struct VexComponents {
    pub(super) chain_state: Arc<ChainState>,
    pub(super) node: Arc<dyn NodeClient>,
    pub(super) facade: CachedAccess,
    pub(super) store: Arc<dyn IndexStore>,
    pub(super) pos_index: Arc<PosBlockIndex>,
    pub(super) processor: Arc<BlockProcessor>,
    pub(super) scanner: Arc<HistoricalScanner>,
    pub(super) orphans: Arc<OrphanDetector>,
    pub(super) mempool: Arc<MempoolTracker>,
    pub(super) ingest: Arc<IngestPipeline>,
    pub(super) backfiller: Arc<IdentityBackfiller>,
    pub(super) memory_cache: Option<Arc<MemoryBackend>>,
}

impl VexComponents {
    #[must_use]
    pub fn chain_state(&self) -> &Arc<ChainState> {
        &self.chain_state
    }

    /// Uncached node access for indexing paths.
    #[must_use]
    pub fn node(&self) -> &Arc<dyn NodeClient> {
        &self.node
    }

    /// The read path for API handlers.
    #[must_use]
    pub fn facade(&self) -> &CachedAccess {
        &self.facade
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    #[must_use]
    pub fn pos_index(&self) -> &Arc<PosBlockIndex> {
        &self.pos_index
    }

    #[must_use]
    pub fn processor(&self) -> &Arc<BlockProcessor> {
        &self.processor
    }

    #[must_use]
    pub fn scanner(&self) -> &Arc<HistoricalScanner> {
        &self.scanner
    }

    #[must_use]
    pub fn orphans(&self) -> &Arc<OrphanDetector> {
        &self.orphans
    }

    #[must_use]
    pub fn mempool(&self) -> &Arc<MempoolTracker> {
        &self.mempool
    }

    #[must_use]
    pub fn ingest(&self) -> &Arc<IngestPipeline> {
        &self.ingest
    }

    #[must_use]
    pub fn backfiller(&self) -> &Arc<IdentityBackfiller> {
        &self.backfiller
    }

    /// The in-process cache, when that is the configured backend.
    #[must_use]
    pub fn memory_cache(&self) -> Option<&Arc<MemoryBackend>> {
        self.memory_cache.as_ref()
    }
}
