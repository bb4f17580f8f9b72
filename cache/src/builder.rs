use crate::cache::TieredCache;
use crate::disk::{DiskEngine, FileDiskEngine};
use crate::error::BuildError;
use crate::options::{CacheOptions, DirSpace};
use crate::policy::PolicyKind;

use core::fmt;
use std::sync::Arc;

// Shard bits above this would allocate absurd numbers of maps and lists.
const MAX_SHARD_BITS: u32 = 16;

/// A builder for creating [`TieredCache`] instances.
///
/// Every setter consumes and returns the builder. Nothing is checked until
/// [`build`](CacheBuilder::build), which validates the whole configuration
/// at once.
pub struct CacheBuilder {
  options: CacheOptions,
  disk_engine: Option<Arc<dyn DiskEngine>>,
}

impl fmt::Debug for CacheBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("options", &self.options)
      .field("has_disk_engine", &self.disk_engine.is_some())
      .finish()
  }
}

impl Default for CacheBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl CacheBuilder {
  pub fn new() -> Self {
    Self::from_options(CacheOptions::default())
  }

  /// Starts from a complete set of options, e.g. one deserialized from a
  /// config file.
  pub fn from_options(options: CacheOptions) -> Self {
    Self {
      options,
      disk_engine: None,
    }
  }

  /// Sets the number of bytes the memory tier may hold. Required.
  pub fn mem_quota(mut self, bytes: u64) -> Self {
    self.options.mem_quota_bytes = bytes;
    self
  }

  /// Adds a disk tier directory. Without any, the cache is memory only.
  pub fn disk_dir(mut self, dir: DirSpace) -> Self {
    self.options.disk_dir_spaces.push(dir);
    self
  }

  /// Uses a custom storage engine for the disk tier instead of block files
  /// in the configured directories.
  pub fn disk_engine(mut self, engine: Arc<dyn DiskEngine>) -> Self {
    self.disk_engine = Some(engine);
    self
  }

  pub fn block_size(mut self, bytes: u64) -> Self {
    self.options.block_size = bytes;
    self
  }

  pub fn slice_size(mut self, bytes: u64) -> Self {
    self.options.slice_size = bytes;
    self
  }

  pub fn block_file_size(mut self, bytes: u64) -> Self {
    self.options.block_file_size = bytes;
    self
  }

  pub fn pre_allocate_block_file(mut self, enabled: bool) -> Self {
    self.options.pre_allocate_block_file = enabled;
    self
  }

  pub fn disk_checksum(mut self, enabled: bool) -> Self {
    self.options.enable_disk_checksum = enabled;
    self
  }

  pub fn mem_policy(mut self, kind: PolicyKind) -> Self {
    self.options.mem_policy = kind;
    self
  }

  pub fn disk_policy(mut self, kind: PolicyKind) -> Self {
    self.options.disk_policy = kind;
    self
  }

  /// Sets how many times the requested space each eviction round frees, for
  /// the memory and disk tiers.
  pub fn evict_times(mut self, mem: u64, disk: u64) -> Self {
    self.options.mem_evict_times = mem;
    self.options.disk_evict_times = disk;
    self
  }

  pub fn max_retry_when_allocate(mut self, retries: u32) -> Self {
    self.options.max_retry_when_allocate = retries;
    self
  }

  /// Configures the admission of evicted memory blocks to disk.
  pub fn admission(mut self, max_check_size: u64, flush_probability: f64, delete_probability: f64) -> Self {
    self.options.admission_max_check_size = max_check_size;
    self.options.admission_flush_probability = flush_probability;
    self.options.admission_delete_probability = delete_probability;
    self
  }

  pub fn alloc_mem_threshold(mut self, percent: u64) -> Self {
    self.options.alloc_mem_threshold = percent;
    self
  }

  /// Configures where new blocks go and how often disk reads are promoted.
  pub fn promotion(mut self, mem_threshold: u64, probability: u32) -> Self {
    self.options.promotion_mem_threshold = mem_threshold;
    self.options.promotion_probability = probability;
    self
  }

  /// Sets the percent chance that a read refreshes the memory and disk
  /// policies.
  pub fn evict_touch_probability(mut self, mem: u32, disk: u32) -> Self {
    self.options.evict_touch_mem_probability = mem;
    self.options.evict_touch_disk_probability = disk;
    self
  }

  pub fn access_index_shard_bits(mut self, bits: u32) -> Self {
    self.options.access_index_shard_bits = bits;
    self
  }

  pub fn lru_container_shard_bits(mut self, bits: u32) -> Self {
    self.options.lru_container_shard_bits = bits;
    self
  }

  pub fn max_concurrent_writes(mut self, writes: u64) -> Self {
    self.options.max_concurrent_writes = writes;
    self
  }

  /// Checks the configuration without building anything.
  pub fn validate(&self) -> Result<(), BuildError> {
    let options = &self.options;
    if options.block_size == 0 {
      return Err(BuildError::ZeroBlockSize);
    }
    if options.slice_size == 0 || options.block_size % options.slice_size != 0 {
      return Err(BuildError::InvalidSliceSize {
        block_size: options.block_size,
        slice_size: options.slice_size,
      });
    }
    if options.mem_quota_bytes == 0 {
      return Err(BuildError::ZeroMemQuota);
    }
    for (field, bits) in [
      ("access_index_shard_bits", options.access_index_shard_bits),
      ("lru_container_shard_bits", options.lru_container_shard_bits),
    ] {
      if bits > MAX_SHARD_BITS {
        return Err(BuildError::InvalidShardBits { field, bits });
      }
    }
    if self.disk_engine.is_none()
      && !options.disk_dir_spaces.is_empty()
      && options.block_file_size < options.block_size
    {
      return Err(BuildError::BlockFileTooSmall {
        block_size: options.block_size,
        block_file_size: options.block_file_size,
      });
    }
    Ok(())
  }

  /// Validates the configuration, prepares the disk tier and builds the
  /// cache.
  pub fn build(self) -> Result<TieredCache, BuildError> {
    self.validate()?;

    let Self {
      options,
      disk_engine,
    } = self;

    let engine: Option<Arc<dyn DiskEngine>> = match disk_engine {
      Some(engine) => Some(engine),
      None if options.disk_dir_spaces.is_empty() => None,
      None => Some(Arc::new(FileDiskEngine::open(
        &options.disk_dir_spaces,
        options.block_size,
        options.block_file_size,
        options.pre_allocate_block_file,
      )?)),
    };

    let cache = TieredCache::new(options, engine);
    tracing::info!(
      block_size = cache.options().block_size,
      slice_size = cache.options().slice_size,
      mem_quota = cache.mem_quota_bytes(),
      disk_quota = cache.disk_quota_bytes(),
      checksum = cache.options().enable_disk_checksum,
      "tiered cache built"
    );
    Ok(cache)
  }
}
