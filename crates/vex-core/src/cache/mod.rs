//! Read-through caching in front of the node.
//!
//! ```text
//!  API handler ──► CachedAccess ──hit──► value
//!                      │ miss
//!                      ▼
//!                 NodeClient ──ok──► set(key) + set(lkg:key)
//!                      │ err
//!                      ▼
//!                 get(lkg:key) ──► value (STALE) or error
//! ```
//!
//! Cache operations never fail: a down backend reads as a miss and writes report
//! `false`, so the explorer keeps serving straight from the node. Ingestion invalidates
//! categories through [`CachedAccess::on_new_block`] and [`CachedAccess::on_reorg`].

pub mod backend;
pub mod facade;
pub mod keys;
pub mod memory;
pub mod redis;

pub use backend::{BackendStats, CacheBackend, CacheError, CacheStats};
pub use facade::{CachedAccess, Fetched};
pub use keys::{CacheCategory, CacheTtls};
pub use memory::MemoryBackend;
pub use self::redis::RedisBackend;
