//! # Vex Core
//!
//! Chain state indexing and caching engine for Verus block explorers.
//!
//! This crate keeps a derived, queryable index of chain state (UTXOs, staking rewards,
//! identity metadata) correct and fresh while talking to a single full node over an
//! unreliable RPC boundary, and fronts read traffic with a cache:
//!
//! - **[`rpc`]**: JSON-RPC gateway with pooled connections, timeouts, and capped
//!   exponential backoff, behind the [`rpc::NodeClient`] trait.
//!
//! - **[`cache`]**: fail-soft cache layer (Redis or in-process) and the read-through
//!   [`cache::CachedAccess`] facade with last-known-good fallback.
//!
//! - **[`store`]**: relational index store with conflict-tolerant writes.
//!
//! - **[`pos_index`]**: persisted height to stake/work classification.
//!
//! - **[`scanner`]**: shared block extraction and the resumable historical scanner.
//!
//! - **[`ingest`]**: real-time pipeline driven by the node's ZeroMQ feed, falling back
//!   to polling.
//!
//! - **[`mempool`]**, **[`orphan`]**, **[`identity`]**: propagation latency, reorg
//!   detection and compensation, identity creation backfill.
//!
//! - **[`runtime`]**: wiring and lifecycle for embedding the engine in a daemon.
//!
//! ## Data Flow
//!
//! ```text
//!                ┌──────────────┐        ┌──────────────┐
//!  ZeroMQ feed ─►│IngestPipeline│        │  Historical  │
//!  (or polling)  └──────┬───────┘        │   Scanner    │
//!                       │                └──────┬───────┘
//!                       ▼                       ▼
//!                ┌─────────────────────────────────────┐
//!                │ BlockProcessor (extract + persist)  │──► IndexStore
//!                └──────┬──────────────────────────────┘
//!                       │ invalidation
//!                       ▼
//!   API handler ─► CachedAccess ─► CacheBackend ─miss─► RpcGateway ─► node
//! ```
//!
//! ## Feature Flags
//!
//! - `zmq-feed` (default): ZeroMQ subscription to the node's publish feed
//! - `test-util`: in-memory [`NodeClient`](rpc::NodeClient) for integration tests

pub mod cache;
pub mod chain;
pub mod config;
pub mod identity;
pub mod ingest;
pub mod mempool;
pub mod metrics;
pub mod orphan;
pub mod pos_index;
pub mod rpc;
pub mod runtime;
pub mod scanner;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
