//! A tiered, block-oriented object cache.
//!
//! Objects are stored under byte keys and split into fixed-size blocks. Each
//! block independently lives in memory, on disk, or both, and the cache moves
//! blocks between the tiers as memory fills up and objects are read.
//!
//! # Features
//! - **Block Tiering**: Memory blocks are flushed to disk on eviction and disk
//!   blocks are promoted back into memory on read.
//! - **Pluggable Eviction**: Policies implement a handle-based contract, so an
//!   object being read is never chosen as a victim. LRU and FIFO ship built in.
//! - **Read-Optimized Index**: Lookups go through double-buffered maps that
//!   never wait on writers.
//! - **Partial Reads**: Any byte range of an object can be read without
//!   touching the rest of it.
//! - **Pinning and TTL**: Objects can be protected from eviction or given a
//!   time-to-live.
//! - **Integrity**: Optional CRC-32C checksums on every slice written to disk.
//! - **Configuration**: Optional `serde` feature for loading `CacheOptions`.

// Public modules that form the API
pub mod block;
pub mod builder;
pub mod cache;
pub mod disk;
pub mod entry;
pub mod error;
pub mod index;
pub mod mem;
pub mod metrics;
pub mod options;
pub mod policy;

// Internal, crate-only modules
mod rng;
mod store;
mod time;

// Re-export the primary user-facing types for convenience
pub use block::{BlockKey, BlockRef, CacheId};
pub use builder::CacheBuilder;
pub use cache::TieredCache;
pub use disk::{DiskEngine, FileDiskEngine};
pub use entry::{CacheEntry, CacheState};
pub use error::{BuildError, CacheError, Result};
pub use index::ConcurrentIndexMap;
pub use metrics::MetricsSnapshot;
pub use options::{CacheOptions, DirSpace, ReadMode, ReadOptions, WriteMode, WriteOptions};
pub use policy::{EvictionPolicy, Handle, PolicyKind};
