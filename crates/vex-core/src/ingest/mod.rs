//! Real-time ingestion of new blocks.
//!
//! ```text
//!            connect ok              event
//! Disconnected ──► Connecting ──► Subscribed ──► Processing
//!      ▲               │              ▲  │            │
//!      │  connect err  │              │  └── feed err ┤
//!      └───────────────┘              └───────────────┘
//! ```
//!
//! While disconnected the pipeline keeps polling the node on its reconnect backoff, so
//! downstream consumers see the same blocks either way. Without a feed at all it polls
//! on a fixed schedule.

pub mod feed;
pub mod pipeline;
#[cfg(feature = "zmq-feed")]
pub mod zmq;

use std::time::Duration;
use thiserror::Error;

use crate::{orphan::OrphanError, rpc::RpcError, scanner::ScanError, store::StoreError};

pub use feed::{BlockFeed, FeedEvent};
pub use pipeline::{IngestPipeline, IngestSettings, INGEST_CHECKPOINT};
#[cfg(feature = "zmq-feed")]
pub use zmq::ZmqFeed;

/// Connection state of the ingest pipeline. The discriminant is exported on the
/// `vex_ingest_state` gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum IngestState {
    #[default]
    Disconnected = 0,
    Connecting = 1,
    Subscribed = 2,
    Processing = 3,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum IngestError {
    #[error("feed error: {0}")]
    Feed(String),

    #[error("feed closed")]
    FeedClosed,

    #[error("block processing timed out after {0:?}")]
    Timeout(Duration),

    /// The block at `height` does not extend the index and reconciliation found no
    /// orphan within its sweep depth.
    #[error("block at height {height} does not extend the index")]
    UnresolvedFork { height: u64 },

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Orphan(#[from] OrphanError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Whether retrying the same unit of work can succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Feed(_) | Self::FeedClosed | Self::Timeout(_) => true,
            Self::Rpc(e) | Self::Orphan(OrphanError::Rpc(e)) => e.is_transient(),
            Self::Scan(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Label for `vex_ingest_failures_total`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Feed(_) | Self::FeedClosed => "feed",
            Self::Timeout(_) => "timeout",
            Self::UnresolvedFork { .. } => "fork",
            Self::Rpc(_) => "rpc",
            Self::Scan(_) => "scan",
            Self::Orphan(_) => "orphan",
            Self::Store(_) => "store",
        }
    }
}
