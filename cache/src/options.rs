use crate::policy::PolicyKind;

use std::path::PathBuf;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// One directory of the disk tier and how many bytes it may use.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DirSpace {
  pub path: PathBuf,
  pub quota_bytes: u64,
}

impl DirSpace {
  pub fn new(path: impl Into<PathBuf>, quota_bytes: u64) -> Self {
    Self {
      path: path.into(),
      quota_bytes,
    }
  }
}

/// Every tunable of a [`TieredCache`](crate::TieredCache).
///
/// Percentages are whole numbers in `0..=100`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CacheOptions {
  /// Bytes the memory tier may hold.
  pub mem_quota_bytes: u64,
  /// Disk tier directories. Empty disables the disk tier.
  pub disk_dir_spaces: Vec<DirSpace>,

  /// Unit of tier placement and eviction.
  pub block_size: u64,
  /// Unit of disk reads and checksums. Must divide `block_size`.
  pub slice_size: u64,
  /// Largest size of one block file on disk.
  pub block_file_size: u64,
  /// Size block files to their full length when they are created.
  pub pre_allocate_block_file: bool,
  /// Keep a CRC-32C per slice and verify it on every disk read.
  pub enable_disk_checksum: bool,

  /// Eviction rounds free this many times the space that was asked for.
  pub mem_evict_times: u64,
  pub disk_evict_times: u64,
  /// Eviction rounds tried before an allocation gives up.
  pub max_retry_when_allocate: u32,

  /// Objects at least this large are always flushed to disk on eviction.
  pub admission_max_check_size: u64,
  pub admission_flush_probability: f64,
  pub admission_delete_probability: f64,

  /// Percent of the memory quota ordinary allocations may use.
  pub alloc_mem_threshold: u64,
  /// Percent of memory use above which new blocks go to disk and reads are
  /// no longer promoted.
  pub promotion_mem_threshold: u64,
  /// Percent chance that a block read from disk is copied into memory.
  pub promotion_probability: u32,
  /// Percent chance that a read refreshes the block in the memory policy.
  pub evict_touch_mem_probability: u32,
  /// Percent chance that a read refreshes the object in the disk policy.
  pub evict_touch_disk_probability: u32,

  /// The index is split into `2^bits` independently written maps.
  pub access_index_shard_bits: u32,
  /// Bucketed policies use `2^bits` buckets.
  pub lru_container_shard_bits: u32,
  /// Writes in flight beyond this are rejected as busy.
  pub max_concurrent_writes: u64,

  pub mem_policy: PolicyKind,
  pub disk_policy: PolicyKind,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      mem_quota_bytes: 0,
      disk_dir_spaces: Vec::new(),
      block_size: MIB,
      slice_size: 64 * KIB,
      block_file_size: 10 * GIB,
      pre_allocate_block_file: false,
      enable_disk_checksum: true,
      mem_evict_times: 2,
      disk_evict_times: 2,
      max_retry_when_allocate: 10,
      admission_max_check_size: 64 * KIB,
      admission_flush_probability: 1.0,
      admission_delete_probability: 1.0,
      alloc_mem_threshold: 90,
      promotion_mem_threshold: 80,
      promotion_probability: 30,
      evict_touch_mem_probability: 30,
      evict_touch_disk_probability: 30,
      access_index_shard_bits: 5,
      lru_container_shard_bits: 6,
      max_concurrent_writes: 1_000_000,
      mem_policy: PolicyKind::Lru,
      disk_policy: PolicyKind::Lru,
    }
  }
}

impl CacheOptions {
  /// Sum of every directory quota.
  pub fn disk_quota_bytes(&self) -> u64 {
    self.disk_dir_spaces.iter().map(|dir| dir.quota_bytes).sum()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WriteMode {
  /// Place blocks as the promotion policy decides.
  #[default]
  WriteBack,
  /// Place blocks on disk directly when there is a disk tier.
  WriteThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReadMode {
  /// Blocks read from disk may be promoted into memory.
  #[default]
  ReadBack,
  /// Never promote.
  ReadThrough,
}

/// Per-call options for [`TieredCache::set`](crate::TieredCache::set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WriteOptions {
  /// Seconds until the object expires. Zero means never.
  pub ttl_seconds: u64,
  /// Pin the object as part of the write.
  pub pinned: bool,
  /// Replace an existing object instead of failing with `AlreadyExists`.
  pub overwrite: bool,
  pub mode: WriteMode,
}

impl Default for WriteOptions {
  fn default() -> Self {
    Self {
      ttl_seconds: 0,
      pinned: false,
      overwrite: true,
      mode: WriteMode::WriteBack,
    }
  }
}

/// Per-call options for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReadOptions {
  pub mode: ReadMode,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_documented_values() {
    let options = CacheOptions::default();
    assert_eq!(options.block_size, 1024 * 1024);
    assert_eq!(options.slice_size, 64 * 1024);
    assert_eq!(options.block_size % options.slice_size, 0);
    assert_eq!(options.max_retry_when_allocate, 10);
    assert_eq!(options.alloc_mem_threshold, 90);
    assert_eq!(options.lru_container_shard_bits, 6);
    assert_eq!(options.disk_quota_bytes(), 0);
  }

  #[test]
  fn write_options_overwrite_by_default() {
    let options = WriteOptions::default();
    assert!(options.overwrite);
    assert!(!options.pinned);
    assert_eq!(options.mode, WriteMode::WriteBack);
  }

  #[test]
  fn disk_quota_sums_directories() {
    let options = CacheOptions {
      disk_dir_spaces: vec![DirSpace::new("/a", 10), DirSpace::new("/b", 32)],
      ..CacheOptions::default()
    };
    assert_eq!(options.disk_quota_bytes(), 42);
  }

  #[cfg(feature = "serde")]
  #[test]
  fn options_deserialize_with_defaults() {
    let options: CacheOptions =
      serde_json::from_str(r#"{ "mem_quota_bytes": 4096, "mem_policy": "Fifo" }"#).unwrap();
    assert_eq!(options.mem_quota_bytes, 4096);
    assert_eq!(options.mem_policy, PolicyKind::Fifo);
    assert_eq!(options.block_size, CacheOptions::default().block_size);

    let write: WriteOptions = serde_json::from_str(r#"{ "ttl_seconds": 5 }"#).unwrap();
    assert_eq!(write.ttl_seconds, 5);
    assert!(write.overwrite);
  }
}
