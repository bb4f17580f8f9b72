#![allow(dead_code)]

use fibre_tiercache::{CacheBuilder, DirSpace, TieredCache};
use std::path::Path;

// Installs a subscriber once per test binary so `RUST_LOG=debug` shows the
// cache's logs. Later calls are ignored.
pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

// A memory-only cache with tiny blocks so small values span several of them.
// Every read touches the policy and the whole quota may be used, which keeps
// eviction order deterministic.
pub fn mem_builder(mem_quota: u64) -> CacheBuilder {
  init_tracing();
  CacheBuilder::new()
    .mem_quota(mem_quota)
    .block_size(4)
    .slice_size(2)
    .alloc_mem_threshold(100)
    .lru_container_shard_bits(0)
    .evict_touch_probability(100, 100)
}

pub fn mem_cache(mem_quota: u64) -> TieredCache {
  mem_builder(mem_quota).build().unwrap()
}

// A cache with one disk directory under `dir`, 16-byte blocks and 4-byte
// slices.
pub fn disk_builder(dir: &Path, mem_quota: u64, disk_quota: u64) -> CacheBuilder {
  init_tracing();
  CacheBuilder::new()
    .mem_quota(mem_quota)
    .disk_dir(DirSpace::new(dir, disk_quota))
    .block_size(16)
    .slice_size(4)
    .block_file_size(64)
    .alloc_mem_threshold(100)
    .lru_container_shard_bits(0)
    .evict_touch_probability(100, 100)
}
