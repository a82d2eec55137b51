use arc_swap::ArcSwapOption;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::Mutex;
use tracing::trace;

/// Height and hash of the highest block applied to the index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedTip {
    pub height: u64,
    pub hash: String,
}

/// Indexed tip plus the node's last reported height.
///
/// | Method | Use When |
/// |--------|----------|
/// | `advance_indexed_tip()` | A block was applied on top of the current tip |
/// | `rewind_indexed_tip()` | Orphaned blocks were reverted |
/// | `observe_node_height()` | The node reported its block count |
#[derive(Clone)]
pub struct ChainState {
    indexed: Arc<ArcSwapOption<IndexedTip>>,
    write_lock: Arc<Mutex<()>>,
    node_height: Arc<AtomicU64>,
}

impl ChainState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            indexed: Arc::new(ArcSwapOption::empty()),
            write_lock: Arc::new(Mutex::new(())),
            node_height: Arc::new(AtomicU64::new(0)),
        }
    }

    /// `None` until the first block is applied.
    #[inline]
    #[must_use]
    pub fn indexed_tip(&self) -> Option<IndexedTip> {
        self.indexed.load_full().map(|tip| (*tip).clone())
    }

    #[inline]
    #[must_use]
    pub fn indexed_height(&self) -> Option<u64> {
        self.indexed.load_full().map(|tip| tip.height)
    }

    #[inline]
    #[must_use]
    pub fn node_height(&self) -> u64 {
        self.node_height.load(Ordering::Acquire)
    }

    /// Blocks the index is behind the node.
    #[must_use]
    pub fn lag(&self) -> u64 {
        let indexed = self.indexed_height().unwrap_or(0);
        self.node_height().saturating_sub(indexed)
    }

    /// Sets the indexed tip if `height` is above the current one.
    ///
    /// Returns `true` if the tip moved.
    pub async fn advance_indexed_tip(&self, height: u64, hash: &str) -> bool {
        let _guard = self.write_lock.lock().await;
        if self.indexed.load_full().is_some_and(|tip| height <= tip.height) {
            return false;
        }
        self.store(height, hash);
        trace!(height, "indexed tip advanced");
        true
    }

    /// Sets the indexed tip unconditionally, for rollback after orphan compensation.
    pub async fn rewind_indexed_tip(&self, height: u64, hash: &str) {
        let _guard = self.write_lock.lock().await;
        self.store(height, hash);
        trace!(height, "indexed tip rewound");
    }

    fn store(&self, height: u64, hash: &str) {
        self.indexed.store(Some(Arc::new(IndexedTip { height, hash: hash.to_string() })));
        self.node_height.fetch_max(height, Ordering::AcqRel);
    }

    pub fn observe_node_height(&self, height: u64) {
        self.node_height.store(height, Ordering::Release);
    }

    /// Node height minus `safety_depth`: blocks at or below are unlikely to be reorganized.
    #[inline]
    #[must_use]
    pub fn safe_height(&self, safety_depth: u64) -> u64 {
        self.node_height().saturating_sub(safety_depth)
    }
}

impl Default for ChainState {
    fn default() -> Self {
        Self::new()
    }
}
