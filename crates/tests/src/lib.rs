//! Integration tests for the Vex indexing engine.
//!
//! - `gateway_tests`: JSON-RPC gateway against a mock HTTP node (status mapping, retry)
//! - `scanner_tests`: historical scans over in-memory chains, reward attribution,
//!   spend tracking, rescan idempotence
//! - `reorg_tests`: orphan detection and compensation against a fresh scan
//! - `cache_tests`: cache degradation with an unreachable Redis and stale fallback
//! - `ingest_tests`: real-time pipeline driven by a channel-backed feed
//! - `runtime_tests`: builder wiring and lifecycle
//! - `mock_infrastructure`: reusable mocks and fixtures
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package vex-tests
//! ```
//!
//! No external services are needed. The Redis tests point at a closed port on purpose.

#[cfg(test)]
mod gateway_tests;

#[cfg(test)]
mod scanner_tests;

#[cfg(test)]
mod reorg_tests;

#[cfg(test)]
mod cache_tests;

#[cfg(test)]
mod ingest_tests;

#[cfg(test)]
mod runtime_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
