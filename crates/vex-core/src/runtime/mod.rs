//! Engine initialization and lifecycle management.
//!
//! Builds every component from an [`AppConfig`](crate::config::AppConfig), spawns the
//! long-lived tasks (real-time ingest, identity backfill, maintenance), and coordinates
//! graceful shutdown through a cancellation token.
//!
//! # Examples
//!
//! ## Indexer daemon
//!
//! ```no_run
//! use vex_core::{config::AppConfig, runtime::VexRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let runtime = VexRuntime::builder().with_config(config).build().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## One-off historical scan
//!
//! ```no_run
//! use vex_core::{config::AppConfig, runtime::VexRuntime};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! let runtime = VexRuntime::builder().with_config(config).disable_ingest().build().await?;
//!
//! let cancel = runtime.cancellation_token();
//! let report = runtime.components().scanner().scan(800_200..=800_205, &cancel).await?;
//! println!("{} blocks, checkpoint {:?}", report.blocks_scanned, report.checkpoint);
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod components;
pub mod lifecycle;

pub use builder::{RuntimeError, VexRuntimeBuilder};
pub use components::VexComponents;
pub use lifecycle::VexRuntime;
