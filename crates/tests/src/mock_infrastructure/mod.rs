//! Mock infrastructure for testing the Vex engine.
//!
//! ## Components
//!
//! - `NodeRpcMock`: wraps mockito to answer the daemon's JSON-RPC 1.0 methods
//! - `ChannelFeed`: a [`BlockFeed`](vex_core::ingest::BlockFeed) driven from the test
//! - `Harness`: store, PoS index, and processor over a `MockNode`
//! - Chain fixtures for the reward and spend scenarios
//!
//! ## Usage
//!
//! ```ignore
//! use vex_tests::mock_infrastructure::NodeRpcMock;
//!
//! let mut mock = NodeRpcMock::new().await;
//! mock.mock_result("getblockcount", &json!(800_205));
//!
//! // Point a GatewayConfig at mock.url()
//! ```

pub mod rpc_mock;
pub mod test_helpers;

pub use rpc_mock::NodeRpcMock;
pub use test_helpers::*;
