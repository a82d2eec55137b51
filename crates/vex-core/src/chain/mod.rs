//! Shared view of the chain tip.
//!
//! One [`ChainState`] is shared by the ingest pipeline (the only writer of the
//! indexed tip), the orphan detector, and anything that reports indexer lag. Reads
//! are wait-free through `ArcSwap`; writes serialize on an async lock.

pub mod state;

pub use state::{ChainState, IndexedTip};
