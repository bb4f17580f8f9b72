use crate::block::CacheId;

use thiserror::Error;

/// Errors that can occur when building a cache.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The cache was configured with a block size of zero.
  #[error("block size cannot be zero")]
  ZeroBlockSize,
  /// The slice size must be non-zero and evenly divide the block size.
  #[error("slice size {slice_size} must be non-zero and divide the block size {block_size}")]
  InvalidSliceSize { block_size: u64, slice_size: u64 },
  /// The memory tier was configured without any quota.
  #[error("memory quota cannot be zero")]
  ZeroMemQuota,
  /// A shard-bit setting is outside of the supported range.
  #[error("invalid shard bits for '{field}': {bits} (expected 0..=16)")]
  InvalidShardBits { field: &'static str, bits: u32 },
  /// A disk block file cannot hold a single block.
  #[error("block file size {block_file_size} is smaller than the block size {block_size}")]
  BlockFileTooSmall { block_size: u64, block_file_size: u64 },
  /// Preparing one of the disk cache directories failed.
  #[error("failed to initialize disk cache directory: {0}")]
  DiskInit(#[from] std::io::Error),
}

/// The outcome of a failed cache operation.
#[derive(Debug, Error)]
pub enum CacheError {
  /// The object is absent, released, expired, or not fully resident.
  #[error("the target object was not found")]
  NotFound,
  /// `set` was called without `overwrite` for a key that already exists.
  #[error("the cache object already exists")]
  AlreadyExists,
  /// Too many writes are in flight.
  #[error("the cache is busy, too many concurrent writes")]
  Busy,
  /// The caller passed an unusable argument.
  #[error("invalid argument: {0}")]
  InvalidArgument(String),
  /// No space could be obtained for a block after all eviction rounds.
  #[error("allocation failed: {0}")]
  AllocationFailed(&'static str),
  /// The disk engine reported an I/O failure.
  #[error("disk I/O failed: {0}")]
  Io(#[from] std::io::Error),
  /// Data read back from disk does not match its recorded checksum.
  #[error("checksum mismatch for cache {cache_id}, slice {slice}")]
  Checksum { cache_id: CacheId, slice: usize },
}

impl CacheError {
  /// Returns true for the "object absent" outcome.
  pub fn is_not_found(&self) -> bool {
    matches!(self, CacheError::NotFound)
  }
}

/// A specialized `Result` type for cache operations.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;
