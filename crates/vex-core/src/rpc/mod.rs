//! Resilient access to the full node over JSON-RPC.
//!
//! [`RpcGateway`] owns the pooled HTTP client and the retry policy. Everything else in
//! the crate talks to the node through the [`NodeClient`] trait.

pub mod errors;
pub mod gateway;
pub mod http_client;
pub mod node;
pub mod retry;

pub use errors::RpcError;
pub use gateway::{GatewayConfig, RpcGateway};
pub use http_client::{Credentials, HttpClient, HttpClientConfig};
pub use node::{BlockVerbosity, NodeClient};
pub use retry::{retry_transient, Backoff, RetryPolicy};
