use crate::block::{cache_id_of, BlockKey, BlockLayout, BlockState, CacheId, MemBlock};
use crate::disk::{DiskCache, DiskEngine, DiskLease};
use crate::entry::{CacheEntry, CacheState};
use crate::error::{CacheError, Result};
use crate::mem::{MemCache, Priority};
use crate::metrics::{Metrics, MetricsSnapshot, TierUsage};
use crate::options::{CacheOptions, ReadMode, ReadOptions, WriteMode, WriteOptions};
use crate::policy::admission::{BlockAdmission, SizeBasedAdmission};
use crate::policy::promotion::{BlockLocation, CapacityBasedPromotion};
use crate::policy::EvictionPolicy;
use crate::store::AccessIndex;
use crate::time;

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A tiered, block-oriented object cache.
///
/// Objects are split into blocks of `block_size` bytes. Each block lives in
/// memory, on disk, or both, and moves between the tiers independently as
/// the eviction policies pick victims. All methods take `&self` and may be
/// called from any number of threads.
pub struct TieredCache {
  options: CacheOptions,
  layout: BlockLayout,
  index: AccessIndex,
  mem: MemCache,
  disk: DiskCache,
  admission: SizeBasedAdmission,
  promotion: CapacityBasedPromotion,
  concurrent_writes: AtomicU64,
  metrics: Metrics,
}

impl fmt::Debug for TieredCache {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TieredCache")
      .field("layout", &self.layout)
      .field("objects", &self.index.len())
      .field("mem", &self.mem)
      .field("disk", &self.disk)
      .finish_non_exhaustive()
  }
}

// Decrements the in-flight write counter when the write ends, however it ends.
struct WriteGuard<'a>(&'a AtomicU64);

impl Drop for WriteGuard<'_> {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::AcqRel);
  }
}

// Number of policy entries to evict to make room for `size` bytes.
fn evict_count(size: u64, block_size: u64, evict_times: u64) -> usize {
  let blocks = size.div_ceil(block_size);
  (blocks.saturating_mul(evict_times) as usize).max(1)
}

impl TieredCache {
  pub(crate) fn new(options: CacheOptions, engine: Option<Arc<dyn DiskEngine>>) -> Self {
    let layout = BlockLayout::new(options.block_size, options.slice_size);
    Self {
      index: AccessIndex::new(options.access_index_shard_bits),
      mem: MemCache::new(
        options.mem_quota_bytes,
        options.alloc_mem_threshold,
        options.mem_policy,
        options.lru_container_shard_bits,
        options.evict_touch_mem_probability,
      ),
      disk: DiskCache::new(
        engine,
        layout,
        options.enable_disk_checksum,
        options.disk_policy,
        options.lru_container_shard_bits,
        options.evict_touch_disk_probability,
      ),
      admission: SizeBasedAdmission::new(
        options.admission_max_check_size,
        options.admission_flush_probability,
        options.admission_delete_probability,
      ),
      promotion: CapacityBasedPromotion::new(
        options.promotion_mem_threshold,
        options.promotion_probability,
      ),
      concurrent_writes: AtomicU64::new(0),
      metrics: Metrics::new(),
      layout,
      options,
    }
  }

  // --- Public API ---

  /// Stores `buf` under `key`.
  ///
  /// The object is visible to readers only after every block is written.
  /// With `overwrite` (the default) an existing object is replaced;
  /// otherwise the call fails with [`CacheError::AlreadyExists`].
  pub fn set(&self, key: impl AsRef<[u8]>, buf: &[u8], opts: Option<&WriteOptions>) -> Result<()> {
    let key = key.as_ref();
    let opts = opts.copied().unwrap_or_default();
    let result = self.set_inner(key, buf, &opts);
    tracing::debug!(
      key_len = key.len(),
      size = buf.len(),
      pinned = opts.pinned,
      ok = result.is_ok(),
      "set"
    );
    result
  }

  /// Returns a copy of the whole object.
  pub fn get(&self, key: impl AsRef<[u8]>, opts: Option<&ReadOptions>) -> Result<Vec<u8>> {
    let key = key.as_ref();
    let opts = opts.copied().unwrap_or_default();
    let result = self
      .find_live(key)
      .and_then(|(cache_id, entry)| self.read_entry(cache_id, &entry, 0, entry.size(), &opts));
    self.record_lookup(&result);
    tracing::debug!(key_len = key.len(), ok = result.is_ok(), "get");
    result
  }

  /// Returns up to `size` bytes of the object starting at `offset`.
  ///
  /// The range is clamped to the object; a range starting at or past the end
  /// yields an empty buffer.
  pub fn read(
    &self,
    key: impl AsRef<[u8]>,
    offset: u64,
    size: u64,
    opts: Option<&ReadOptions>,
  ) -> Result<Vec<u8>> {
    let key = key.as_ref();
    let opts = opts.copied().unwrap_or_default();
    let result = self
      .find_live(key)
      .and_then(|(cache_id, entry)| self.read_entry(cache_id, &entry, offset, size, &opts));
    self.record_lookup(&result);
    tracing::debug!(key_len = key.len(), offset, size, ok = result.is_ok(), "read");
    result
  }

  /// Removes the object. Removing an object that another thread is already
  /// tearing down succeeds.
  pub fn remove(&self, key: impl AsRef<[u8]>) -> Result<()> {
    let key = key.as_ref();
    let cache_id = cache_id_of(key);
    let result = match self.index.find(cache_id) {
      Some(entry) if entry.key() == key => {
        self.remove_entry(cache_id, &entry);
        Ok(())
      }
      _ => Err(CacheError::NotFound),
    };
    tracing::debug!(key_len = key.len(), ok = result.is_ok(), "remove");
    result
  }

  /// Protects the object from eviction until [`unpin`](Self::unpin).
  pub fn pin(&self, key: impl AsRef<[u8]>) -> Result<()> {
    let key = key.as_ref();
    let (cache_id, entry) = self.find_live(key)?;
    if !entry.set_pinned(true) {
      return Ok(());
    }

    if self.disk.is_enabled() {
      // Memory blocks of pinned objects are still flushed, never deleted.
      self.disk.evict_untrack(&cache_id);
    } else {
      for index in 0..entry.block_count() {
        self.mem.evict_untrack(&BlockKey::new(cache_id, index as u32));
      }
    }
    tracing::debug!(key_len = key.len(), "pin");
    Ok(())
  }

  /// Makes a pinned object evictable again.
  pub fn unpin(&self, key: impl AsRef<[u8]>) -> Result<()> {
    let key = key.as_ref();
    let (cache_id, entry) = self.find_live(key)?;
    if !entry.set_pinned(false) {
      return Ok(());
    }

    if self.disk.is_enabled() {
      if entry.residency().1 {
        self.disk.evict_track(cache_id, entry.size());
      }
    } else {
      for index in 0..entry.block_count() {
        if let Some(block) = entry.mem_block(index) {
          self
            .mem
            .evict_track(BlockKey::new(cache_id, index as u32), block.len() as u64);
        }
      }
    }
    tracing::debug!(key_len = key.len(), "unpin");
    Ok(())
  }

  /// Returns true if a live, unexpired object is stored under `key`.
  pub fn contains(&self, key: impl AsRef<[u8]>) -> bool {
    self.find_live(key.as_ref()).is_ok()
  }

  /// Runs one memory eviction round over up to `count` blocks. Returns the
  /// number of blocks the policy gave up.
  pub fn evict_mem(&self, count: usize) -> usize {
    let mut evicted = Vec::new();
    self.mem.evict(count, &mut evicted);
    self.process_evicted_mem_blocks(&evicted);
    evicted.len()
  }

  /// Runs one disk eviction round over up to `count` objects. Returns the
  /// number of objects the policy gave up.
  pub fn evict_disk(&self, count: usize) -> usize {
    let mut evicted = Vec::new();
    self.disk.evict(count, &mut evicted);
    self.process_evicted_disk_items(&evicted);
    evicted.len()
  }

  /// Drops every object, pinned or not.
  pub fn clear(&self) {
    let entries = self.index.drain();
    let count = entries.len();
    for entry in entries {
      if entry.release() {
        for index in 0..entry.block_count() {
          entry.clear_block(index);
        }
      }
    }
    self.mem.policy().clear();
    self.disk.policy().clear();
    tracing::debug!(count, "clear");
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.metrics.snapshot(TierUsage {
      mem_used_bytes: self.mem_used_bytes(),
      mem_quota_bytes: self.mem_quota_bytes(),
      disk_used_bytes: self.disk_used_bytes(),
      disk_quota_bytes: self.disk_quota_bytes(),
    })
  }

  pub fn options(&self) -> &CacheOptions {
    &self.options
  }

  /// The number of objects currently published.
  pub fn len(&self) -> usize {
    self.index.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn mem_used_bytes(&self) -> u64 {
    self.mem.used_bytes()
  }

  pub fn mem_quota_bytes(&self) -> u64 {
    self.mem.quota_bytes()
  }

  pub fn disk_used_bytes(&self) -> u64 {
    self.disk.used_bytes()
  }

  pub fn disk_quota_bytes(&self) -> u64 {
    self.disk.quota_bytes()
  }

  // --- Write path ---

  fn begin_write(&self) -> Result<WriteGuard<'_>> {
    let in_flight = self.concurrent_writes.fetch_add(1, Ordering::AcqRel) + 1;
    let guard = WriteGuard(&self.concurrent_writes);
    if in_flight > self.options.max_concurrent_writes {
      tracing::warn!(in_flight, "too many concurrent writes");
      return Err(CacheError::Busy);
    }
    Ok(guard)
  }

  fn set_inner(&self, key: &[u8], buf: &[u8], opts: &WriteOptions) -> Result<()> {
    if buf.is_empty() {
      return Err(CacheError::InvalidArgument("cannot cache an empty value".into()));
    }
    let _guard = self.begin_write()?;

    let cache_id = cache_id_of(key);
    if let Some(existing) = self.index.find(cache_id) {
      // The slot belongs to whatever object holds this id, even one whose key
      // merely collides with ours.
      let live = !existing.is_released() && !existing.is_expired();
      if live && !opts.overwrite {
        return Err(CacheError::AlreadyExists);
      }
      self.remove_entry(cache_id, &existing);
    }

    let entry = Arc::new(CacheEntry::new(
      key.to_vec(),
      buf.len() as u64,
      self.layout.block_size,
      time::expire_at(opts.ttl_seconds),
    ));
    if opts.pinned {
      entry.set_pinned(true);
    }

    let block_count = self.layout.block_count(buf.len() as u64);
    let mut placements = Vec::with_capacity(block_count);
    for index in 0..block_count {
      let lower = self.layout.block_lower(index as u32) as usize;
      let data = &buf[lower..lower + entry.block_size(index) as usize];
      match self.write_block(cache_id, &entry, index, data, opts.mode) {
        Ok(location) => placements.push(location),
        Err(err) => {
          // Nothing was published or tracked yet; dropping the entry frees
          // whatever was written.
          entry.release();
          for written in 0..index {
            entry.clear_block(written);
          }
          return Err(err);
        }
      }
    }

    entry.sync_tier_state();
    self.index.insert(cache_id, Arc::clone(&entry));
    self.track_written(cache_id, &entry, &placements);
    Metrics::incr(&self.metrics.writes);
    Ok(())
  }

  fn write_block(
    &self,
    cache_id: CacheId,
    entry: &CacheEntry,
    index: usize,
    data: &[u8],
    mode: WriteMode,
  ) -> Result<BlockLocation> {
    let location = if mode == WriteMode::WriteThrough && self.disk.is_enabled() {
      BlockLocation::Disk
    } else {
      self.promotion.check_write(
        self.mem.used_bytes(),
        self.mem.quota_bytes(),
        self.disk.quota_bytes(),
      )
    };

    match location {
      BlockLocation::Mem => {
        let key = BlockKey::new(cache_id, index as u32);
        let block = self.alloc_mem_block(&key, data, BlockState::Dirty, true)?;
        entry.set_mem_block(index, Some(Arc::new(block)));
      }
      BlockLocation::Disk => {
        let lease = self.alloc_disk_block(cache_id)?;
        let block = self.disk.write_block(lease, data)?;
        entry.set_disk_block(index, Some(Arc::new(block)));
      }
      BlockLocation::None => {
        Metrics::incr(&self.metrics.allocation_failures);
        return Err(CacheError::AllocationFailed("no tier accepts new blocks"));
      }
    }
    Ok(location)
  }

  // Registers freshly published blocks with the eviction policies.
  fn track_written(&self, cache_id: CacheId, entry: &CacheEntry, placements: &[BlockLocation]) {
    let pinned = entry.is_pinned();
    let disk_enabled = self.disk.is_enabled();
    let mut on_disk = false;
    for (index, location) in placements.iter().enumerate() {
      match location {
        BlockLocation::Mem if !(pinned && !disk_enabled) => {
          self
            .mem
            .evict_track(BlockKey::new(cache_id, index as u32), entry.block_size(index));
        }
        BlockLocation::Disk => on_disk = true,
        _ => {}
      }
    }
    if on_disk && !pinned {
      self.disk.evict_track(cache_id, entry.size());
    }
  }

  /// Charges memory for a block, evicting around `key` between attempts.
  ///
  /// With `retry` unset only one non-urgent attempt is made.
  fn alloc_mem_block(
    &self,
    key: &BlockKey,
    data: &[u8],
    state: BlockState,
    retry: bool,
  ) -> Result<MemBlock> {
    if !retry {
      return self
        .mem
        .new_block(data, state, Priority::Opportunistic)
        .ok_or(CacheError::AllocationFailed("memory quota exhausted"));
    }
    if let Some(block) = self.mem.new_block(data, state, Priority::Normal) {
      return Ok(block);
    }
    for _ in 0..self.options.max_retry_when_allocate {
      self.evict_mem_for(key, data.len() as u64);
      if let Some(block) = self.mem.new_block(data, state, Priority::Urgent) {
        return Ok(block);
      }
    }
    self.mem.space().cancel_need(data.len() as u64);
    Metrics::incr(&self.metrics.allocation_failures);
    tracing::error!(
      block = %key,
      size = data.len(),
      retries = self.options.max_retry_when_allocate,
      "memory allocation failed after every eviction round"
    );
    Err(CacheError::AllocationFailed("memory quota exhausted"))
  }

  fn alloc_disk_block(&self, cache_id: CacheId) -> Result<DiskLease> {
    if let Some(lease) = self.disk.new_block() {
      return Ok(lease);
    }
    for _ in 0..self.options.max_retry_when_allocate {
      self.evict_disk_for(cache_id, self.layout.block_size);
      if let Some(lease) = self.disk.new_block() {
        return Ok(lease);
      }
    }
    Metrics::incr(&self.metrics.allocation_failures);
    tracing::error!(
      cache_id,
      retries = self.options.max_retry_when_allocate,
      "disk allocation failed after every eviction round"
    );
    Err(CacheError::AllocationFailed("disk quota exhausted"))
  }

  // --- Eviction ---

  fn evict_mem_for(&self, key: &BlockKey, size: u64) {
    let count = evict_count(size, self.layout.block_size, self.options.mem_evict_times);
    let mut evicted = Vec::new();
    self.mem.evict_for(key, count, &mut evicted);
    if evicted.is_empty() {
      // The bucket of `key` may be empty while others are not.
      self.mem.evict(count, &mut evicted);
    }
    if evicted.is_empty() {
      tracing::warn!(block = %key, count, "memory eviction found no victims");
    }
    self.process_evicted_mem_blocks(&evicted);
  }

  fn evict_disk_for(&self, cache_id: CacheId, size: u64) {
    let count = evict_count(size, self.layout.block_size, self.options.disk_evict_times);
    let mut evicted = Vec::new();
    self.disk.evict_for(&cache_id, count, &mut evicted);
    if evicted.is_empty() {
      self.disk.evict(count, &mut evicted);
    }
    if evicted.is_empty() {
      tracing::warn!(cache_id, count, "disk eviction found no victims");
    }
    self.process_evicted_disk_items(&evicted);
  }

  fn process_evicted_mem_blocks(&self, keys: &[BlockKey]) {
    for key in keys {
      Metrics::incr(&self.metrics.mem_evictions);
      let Some(entry) = self.index.find(key.cache_id) else {
        continue;
      };
      let index = key.block_index as usize;
      if index >= entry.block_count() {
        continue;
      }
      let block = entry.block(index);
      let Some(mem_block) = block.mem_block else {
        continue;
      };

      if mem_block.state() == BlockState::Dirty || block.disk_block.is_none() {
        if let Err(err) = self.flush_block(key.cache_id, &entry, index, &mem_block) {
          tracing::warn!(block = %key, error = %err, "failed to flush evicted block");
          // Keep the data and let a later round try again.
          if !entry.is_pinned() || self.disk.is_enabled() {
            self.mem.evict_track(*key, mem_block.len() as u64);
          }
        }
      } else {
        entry.update_block(index, |slot| {
          if slot
            .mem_block
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &mem_block))
          {
            slot.mem_block = None;
          }
        });
      }
      entry.sync_tier_state();
    }
  }

  fn flush_block(
    &self,
    cache_id: CacheId,
    entry: &Arc<CacheEntry>,
    index: usize,
    mem_block: &Arc<MemBlock>,
  ) -> Result<()> {
    if entry.is_released() {
      return Ok(());
    }
    let key = BlockKey::new(cache_id, index as u32);
    // Keeps the object from being picked by a disk eviction this flush
    // triggers.
    let handle = self.disk.evict_touch(&cache_id, true);

    let admission = if entry.is_pinned() {
      if self.disk.is_enabled() {
        BlockAdmission::Flush
      } else {
        BlockAdmission::Skip
      }
    } else if !self.disk.is_enabled() {
      BlockAdmission::Delete
    } else {
      self
        .admission
        .check_admission(entry.size(), self.disk.quota_bytes())
    };

    match admission {
      BlockAdmission::Flush => {
        let lease = self.alloc_disk_block(cache_id)?;
        let disk_block = Arc::new(self.disk.write_block(lease, mem_block.data())?);
        entry.update_block(index, |slot| {
          slot.disk_block = Some(disk_block);
          if slot
            .mem_block
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, mem_block))
          {
            slot.mem_block = None;
          }
        });
        Metrics::incr(&self.metrics.flushes);
        if handle.is_none() && !entry.is_pinned() {
          self.disk.evict_track(cache_id, entry.size());
        }
      }
      BlockAdmission::Skip => {
        if !entry.is_pinned() {
          self.mem.evict_track(key, mem_block.len() as u64);
        }
      }
      BlockAdmission::Delete => {
        entry.clear_block(index);
        if entry.release_if_empty() {
          self.unpublish(cache_id, entry);
          Metrics::incr(&self.metrics.removes);
        }
      }
    }
    drop(handle);
    tracing::debug!(block = %key, ?admission, "flushed evicted block");
    Ok(())
  }

  fn process_evicted_disk_items(&self, ids: &[CacheId]) {
    for &cache_id in ids {
      Metrics::incr(&self.metrics.disk_evictions);
      let Some(entry) = self.index.find(cache_id) else {
        continue;
      };
      entry.clear_disk_blocks();
      if entry.release_if_empty() {
        self.unpublish(cache_id, &entry);
        Metrics::incr(&self.metrics.removes);
      } else {
        entry.sync_tier_state();
      }
    }
  }

  // --- Read path ---

  // Resolves `key` to a live entry, removing it if its TTL has passed.
  fn find_live(&self, key: &[u8]) -> Result<(CacheId, Arc<CacheEntry>)> {
    let cache_id = cache_id_of(key);
    match self.index.find(cache_id) {
      Some(entry) if entry.key() == key && !entry.is_released() => {
        if entry.is_expired() {
          self.remove_entry(cache_id, &entry);
          return Err(CacheError::NotFound);
        }
        Ok((cache_id, entry))
      }
      _ => Err(CacheError::NotFound),
    }
  }

  fn record_lookup<T>(&self, result: &Result<T>) {
    match result {
      Ok(_) => Metrics::incr(&self.metrics.hits),
      Err(err) if err.is_not_found() => Metrics::incr(&self.metrics.misses),
      Err(_) => {}
    }
  }

  fn read_entry(
    &self,
    cache_id: CacheId,
    entry: &CacheEntry,
    offset: u64,
    size: u64,
    opts: &ReadOptions,
  ) -> Result<Vec<u8>> {
    let object_size = entry.size();
    if offset >= object_size || size == 0 {
      return Ok(Vec::new());
    }
    let size = size.min(object_size - offset);

    // Widen the range to whole slices, the unit of disk reads.
    let lower = self.layout.slice_lower(self.layout.off2slice(offset));
    let upper = self
      .layout
      .slice_upper(self.layout.off2slice(offset + size - 1))
      .min(object_size - 1);

    let mut buf = Vec::with_capacity((upper - lower + 1) as usize);
    for block_index in self.layout.off2block(lower)..=self.layout.off2block(upper) {
      let index = block_index as usize;
      let block_lower = self.layout.block_lower(block_index);
      let block_len = entry.block_size(index);
      let start = (lower.max(block_lower) - block_lower) as usize;
      let end = ((upper + 1).min(block_lower + block_len) - block_lower) as usize;

      let block = entry.block(index);
      if let Some(mem_block) = block.mem_block {
        drop(
          self
            .mem
            .evict_touch(&BlockKey::new(cache_id, block_index), false),
        );
        buf.extend_from_slice(&mem_block.data()[start..end]);
      } else if let Some(disk_block) = block.disk_block {
        let promote = opts.mode == ReadMode::ReadBack
          && self
            .promotion
            .check_promote(self.mem.used_bytes(), self.mem.quota_bytes());
        if promote {
          let data = self.disk.read_block(cache_id, &disk_block, 0, block_len as usize)?;
          buf.extend_from_slice(&data[start..end]);
          self.promote_block(cache_id, entry, index, &data);
        } else {
          let data = self.disk.read_block(cache_id, &disk_block, start as u64, end - start)?;
          buf.extend_from_slice(&data);
        }
      } else {
        return Err(CacheError::NotFound);
      }
    }

    let skip = (offset - lower) as usize;
    buf.drain(..skip);
    buf.truncate(size as usize);
    Ok(buf)
  }

  // Copies a block read from disk back into memory as a clean block.
  fn promote_block(&self, cache_id: CacheId, entry: &CacheEntry, index: usize, data: &[u8]) {
    let key = BlockKey::new(cache_id, index as u32);
    let handle = self.mem.evict_touch(&key, true);
    let Ok(block) = self.alloc_mem_block(&key, data, BlockState::Clean, false) else {
      return;
    };
    let block = Arc::new(block);
    let installed = entry.update_block(index, |slot| {
      if slot.mem_block.is_none() && slot.disk_block.is_some() {
        slot.mem_block = Some(block);
        true
      } else {
        false
      }
    });
    if !installed {
      return;
    }

    Metrics::incr(&self.metrics.promotions);
    entry.set_state(CacheState::InMem);
    if handle.is_none() {
      self.mem.evict_track(key, data.len() as u64);
    }
  }

  // --- Teardown ---

  // Releases `entry` and tears it down. A no-op if someone else released it
  // first.
  fn remove_entry(&self, cache_id: CacheId, entry: &Arc<CacheEntry>) {
    if !entry.release() {
      return;
    }
    self.unpublish(cache_id, entry);
    for index in 0..entry.block_count() {
      entry.clear_block(index);
    }
    Metrics::incr(&self.metrics.removes);
  }

  // Drops a released entry from the index and the policies. Policy ids are
  // shared with any newer object stored under the same id, so they are only
  // untracked when the index still pointed at this entry.
  fn unpublish(&self, cache_id: CacheId, entry: &Arc<CacheEntry>) {
    if !self.index.remove(cache_id, entry) {
      return;
    }
    for index in 0..entry.block_count() {
      self.mem.evict_untrack(&BlockKey::new(cache_id, index as u32));
    }
    self.disk.evict_untrack(&cache_id);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::builder::CacheBuilder;

  fn small_cache(mem_quota: u64) -> TieredCache {
    CacheBuilder::new()
      .mem_quota(mem_quota)
      .block_size(4)
      .slice_size(2)
      .alloc_mem_threshold(100)
      .lru_container_shard_bits(0)
      .evict_touch_probability(100, 100)
      .build()
      .unwrap()
  }

  #[test]
  fn evict_count_rounds_up() {
    assert_eq!(evict_count(0, 4, 2), 1);
    assert_eq!(evict_count(4, 4, 2), 2);
    assert_eq!(evict_count(5, 4, 2), 4);
    assert_eq!(evict_count(5, 4, 0), 1);
  }

  #[test]
  fn blocks_are_tracked_after_publication() {
    let cache = small_cache(1024);
    cache.set("k", b"0123456789", None).unwrap();
    assert_eq!(cache.mem.policy().len(), 3);
    assert_eq!(cache.mem_used_bytes(), 10);

    let (cache_id, entry) = cache.find_live(b"k").unwrap();
    assert!(entry.is_in_mem());
    assert!(!entry.is_in_disk());
    assert_eq!(entry.block(2).mem_block.unwrap().data(), b"89");
    assert!(cache.mem.policy().remove(&BlockKey::new(cache_id, 2)));
  }

  #[test]
  fn slice_aligned_reads_are_trimmed() {
    let cache = small_cache(1024);
    cache.set("k", b"0123456789", None).unwrap();
    assert_eq!(cache.read("k", 3, 4, None).unwrap(), b"3456");
    assert_eq!(cache.read("k", 9, 100, None).unwrap(), b"9");
    assert!(cache.read("k", 10, 1, None).unwrap().is_empty());
    assert!(cache.read("k", 2, 0, None).unwrap().is_empty());
  }

  #[test]
  fn memory_only_eviction_deletes_objects() {
    let cache = small_cache(1024);
    cache.set("k", b"abcd", None).unwrap();
    assert_eq!(cache.evict_mem(10), 1);
    assert!(matches!(cache.get("k", None), Err(CacheError::NotFound)));
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.mem_used_bytes(), 0);
  }

  #[test]
  fn failed_write_leaves_nothing_behind() {
    let cache = small_cache(8);
    cache.pin("absent").unwrap_err();
    cache
      .set("pinned", b"abcdefg", Some(&WriteOptions { pinned: true, ..WriteOptions::default() }))
      .unwrap();
    // Pinned blocks without a disk tier are untracked, so nothing can make
    // room for another object.
    let err = cache.set("other", b"xyz", None).unwrap_err();
    assert!(matches!(err, CacheError::AllocationFailed(_)));
    assert!(!cache.contains("other"));
    assert_eq!(cache.mem_used_bytes(), 7);
    assert_eq!(cache.metrics().allocation_failures, 1);
  }

  #[test]
  fn colliding_key_is_not_replaced_without_overwrite() {
    let cache = small_cache(1024);
    let cache_id = cache_id_of(b"k");
    let other = Arc::new(CacheEntry::new(b"other".to_vec(), 4, 4, 0));
    cache.index.insert(cache_id, other.clone());

    let keep = WriteOptions {
      overwrite: false,
      ..WriteOptions::default()
    };
    assert!(matches!(cache.set("k", b"abcd", Some(&keep)), Err(CacheError::AlreadyExists)));
    assert!(!other.is_released());
    assert_eq!(cache.len(), 1);

    let replace = WriteOptions {
      overwrite: true,
      ..WriteOptions::default()
    };
    cache.set("k", b"abcd", Some(&replace)).unwrap();
    assert!(other.is_released());
    assert_eq!(cache.get("k", None).unwrap(), b"abcd");
  }

  #[test]
  fn busy_when_writes_exceed_the_limit() {
    let cache = CacheBuilder::new()
      .mem_quota(1024)
      .block_size(4)
      .slice_size(4)
      .max_concurrent_writes(0)
      .build()
      .unwrap();
    assert!(matches!(cache.set("k", b"v", None), Err(CacheError::Busy)));
    assert_eq!(cache.concurrent_writes.load(Ordering::Relaxed), 0);
  }
}
