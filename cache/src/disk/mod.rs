//! The disk tier: the storage engine boundary and the policy tracking which
//! objects have blocks on disk.

pub mod file;

pub use file::FileDiskEngine;

use crate::block::{BlockId, BlockLayout, CacheId, DiskBlock};
use crate::error::{CacheError, Result};
use crate::policy::{EvictionPolicy, Handle, Policy, PolicyKind};
use crate::rng::FastRng;

use std::fmt;
use std::io;
use std::sync::Arc;

/// The physical block store behind the disk tier.
///
/// Blocks are fixed-size slots addressed by [`BlockId`]. The engine only
/// allocates slots and moves bytes; it knows nothing about cache objects.
pub trait DiskEngine: Send + Sync + fmt::Debug {
  /// Total capacity in bytes. Zero means the disk tier is disabled.
  fn quota_bytes(&self) -> u64;

  /// Bytes currently held by allocated blocks.
  fn used_bytes(&self) -> u64;

  /// Reserves a free block slot, or `None` if every slot is taken.
  fn alloc_block(&self) -> Option<BlockId>;

  /// Returns a slot to the free pool.
  fn free_block(&self, id: BlockId);

  /// Writes `data` at `offset` bytes into the block.
  fn write_block(&self, id: BlockId, offset: u64, data: &[u8]) -> io::Result<()>;

  /// Fills `buf` from `offset` bytes into the block.
  fn read_block(&self, id: BlockId, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

/// An allocated engine slot, freed when dropped.
pub struct DiskLease {
  engine: Arc<dyn DiskEngine>,
  id: BlockId,
}

impl DiskLease {
  #[inline]
  pub fn id(&self) -> BlockId {
    self.id
  }
}

impl fmt::Debug for DiskLease {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DiskLease").field("id", &self.id).finish()
  }
}

impl Drop for DiskLease {
  fn drop(&mut self) {
    self.engine.free_block(self.id);
  }
}

/// The disk tier: an optional engine, per-slice checksums and the eviction
/// policy over cache ids.
#[derive(Debug)]
pub struct DiskCache {
  engine: Option<Arc<dyn DiskEngine>>,
  policy: Policy<CacheId>,
  layout: BlockLayout,
  checksum: bool,
  touch_probability: u32,
  rng: FastRng,
}

impl DiskCache {
  pub fn new(
    engine: Option<Arc<dyn DiskEngine>>,
    layout: BlockLayout,
    checksum: bool,
    policy: PolicyKind,
    shard_bits: u32,
    touch_probability: u32,
  ) -> Self {
    Self {
      engine,
      policy: Policy::new(policy, shard_bits),
      layout,
      checksum,
      touch_probability,
      rng: FastRng::from_entropy(),
    }
  }

  pub fn quota_bytes(&self) -> u64 {
    self.engine.as_ref().map_or(0, |engine| engine.quota_bytes())
  }

  pub fn used_bytes(&self) -> u64 {
    self.engine.as_ref().map_or(0, |engine| engine.used_bytes())
  }

  /// True if blocks can be placed on disk at all.
  pub fn is_enabled(&self) -> bool {
    self.quota_bytes() > 0
  }

  pub fn policy(&self) -> &Policy<CacheId> {
    &self.policy
  }

  /// Reserves a block slot, or `None` if the disk is full or disabled.
  pub fn new_block(&self) -> Option<DiskLease> {
    let engine = self.engine.as_ref()?;
    let id = engine.alloc_block()?;
    Some(DiskLease {
      engine: Arc::clone(engine),
      id,
    })
  }

  /// Writes a whole block into `lease` and returns its descriptor.
  pub fn write_block(&self, lease: DiskLease, data: &[u8]) -> Result<DiskBlock> {
    let engine = self.engine.as_ref().ok_or(CacheError::NotFound)?;
    let checksums: Box<[u32]> = if self.checksum {
      data
        .chunks(self.layout.slice_size as usize)
        .map(crc32c::crc32c)
        .collect()
    } else {
      Box::new([])
    };
    engine.write_block(lease.id(), 0, data)?;
    Ok(DiskBlock::new(lease, data.len() as u64, checksums))
  }

  /// Reads `len` bytes at a slice-aligned `offset` of a block, verifying the
  /// checksum of every slice touched. A read ending inside a slice still reads
  /// and verifies that whole slice.
  pub fn read_block(
    &self,
    cache_id: CacheId,
    block: &DiskBlock,
    offset: u64,
    len: usize,
  ) -> Result<Vec<u8>> {
    let engine = self.engine.as_ref().ok_or(CacheError::NotFound)?;
    drop(self.evict_touch(&cache_id, false));

    if offset % self.layout.slice_size != 0 {
      return Err(CacheError::InvalidArgument(format!(
        "disk read offset {} is not aligned to the slice size {}",
        offset, self.layout.slice_size
      )));
    }
    let end = offset + len as u64;
    if end > block.len() {
      return Err(CacheError::InvalidArgument(format!(
        "disk read [{}, {}) is past the end of a {} byte block",
        offset,
        end,
        block.len()
      )));
    }

    let read_end = self.layout.slice_end(end, block.len()).max(offset);
    let mut buf = vec![0u8; (read_end - offset) as usize];
    engine.read_block(block.id(), offset, &mut buf)?;

    let first_slice = self.layout.off2slice(offset);
    for (i, slice) in buf.chunks(self.layout.slice_size as usize).enumerate() {
      let index = first_slice + i;
      if let Some(expected) = block.checksum(index) {
        if expected != crc32c::crc32c(slice) {
          tracing::error!(
            cache_id,
            slice = index,
            block = %block.id(),
            "disk block checksum mismatch"
          );
          return Err(CacheError::Checksum {
            cache_id,
            slice: index,
          });
        }
      }
    }
    buf.truncate(len);
    Ok(buf)
  }

  pub fn evict_track(&self, cache_id: CacheId, size: u64) -> bool {
    self.policy.add(cache_id, size)
  }

  pub fn evict_untrack(&self, cache_id: &CacheId) -> bool {
    self.policy.remove(cache_id)
  }

  /// Touches `cache_id` in the policy, always if `force` is set and
  /// otherwise with the configured probability.
  pub fn evict_touch(
    &self,
    cache_id: &CacheId,
    force: bool,
  ) -> Option<Handle<'_, CacheId, Policy<CacheId>>> {
    if force || self.rng.percent(self.touch_probability) {
      self.policy.touch(cache_id)
    } else {
      None
    }
  }

  pub fn evict(&self, count: usize, evicted: &mut Vec<CacheId>) {
    self.policy.evict(count, evicted);
  }

  pub fn evict_for(&self, cache_id: &CacheId, count: usize, evicted: &mut Vec<CacheId>) {
    self.policy.evict_for(cache_id, count, evicted);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use parking_lot::Mutex;

  // An in-memory engine with a fixed number of slots.
  #[derive(Debug)]
  struct VecEngine {
    block_size: u64,
    slots: Mutex<Vec<Option<Vec<u8>>>>,
  }

  impl VecEngine {
    fn new(block_size: u64, blocks: usize) -> Self {
      Self {
        block_size,
        slots: Mutex::new(vec![None; blocks]),
      }
    }

    fn corrupt(&self, id: BlockId, at: usize) {
      let mut slots = self.slots.lock();
      if let Some(data) = slots[id.block_index as usize].as_mut() {
        data[at] ^= 0xFF;
      }
    }
  }

  impl DiskEngine for VecEngine {
    fn quota_bytes(&self) -> u64 {
      self.slots.lock().len() as u64 * self.block_size
    }

    fn used_bytes(&self) -> u64 {
      self.slots.lock().iter().filter(|s| s.is_some()).count() as u64 * self.block_size
    }

    fn alloc_block(&self) -> Option<BlockId> {
      let mut slots = self.slots.lock();
      let index = slots.iter().position(|s| s.is_none())?;
      slots[index] = Some(vec![0; self.block_size as usize]);
      Some(BlockId {
        dir_index: 0,
        block_index: index as u32,
      })
    }

    fn free_block(&self, id: BlockId) {
      self.slots.lock()[id.block_index as usize] = None;
    }

    fn write_block(&self, id: BlockId, offset: u64, data: &[u8]) -> io::Result<()> {
      let mut slots = self.slots.lock();
      let slot = slots[id.block_index as usize]
        .as_mut()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "free slot"))?;
      let start = offset as usize;
      slot[start..start + data.len()].copy_from_slice(data);
      Ok(())
    }

    fn read_block(&self, id: BlockId, offset: u64, buf: &mut [u8]) -> io::Result<()> {
      let slots = self.slots.lock();
      let slot = slots[id.block_index as usize]
        .as_ref()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "free slot"))?;
      let start = offset as usize;
      buf.copy_from_slice(&slot[start..start + buf.len()]);
      Ok(())
    }
  }

  fn disk_cache(engine: Arc<VecEngine>, checksum: bool) -> DiskCache {
    DiskCache::new(
      Some(engine),
      BlockLayout::new(16, 4),
      checksum,
      PolicyKind::Lru,
      1,
      30,
    )
  }

  #[test]
  fn write_then_read_slices() {
    let engine = Arc::new(VecEngine::new(16, 2));
    let cache = disk_cache(engine.clone(), true);
    let data: Vec<u8> = (0..16).collect();

    let lease = cache.new_block().unwrap();
    let block = cache.write_block(lease, &data).unwrap();
    assert_eq!(cache.used_bytes(), 16);

    assert_eq!(cache.read_block(1, &block, 0, 16).unwrap(), data);
    assert_eq!(cache.read_block(1, &block, 8, 6).unwrap(), &data[8..14]);
    assert_eq!(cache.read_block(1, &block, 12, 1).unwrap(), &data[12..13]);

    // The last block of an object is short; its final slice is partial too.
    let short = cache.write_block(cache.new_block().unwrap(), &data[..10]).unwrap();
    assert_eq!(short.len(), 10);
    assert!(!short.is_empty());
    assert_eq!(cache.read_block(2, &short, 4, 5).unwrap(), &data[4..9]);
    assert_eq!(cache.read_block(2, &short, 8, 2).unwrap(), &data[8..10]);
    assert!(matches!(
      cache.read_block(2, &short, 8, 4),
      Err(CacheError::InvalidArgument(_))
    ));
  }

  #[test]
  fn dropping_the_descriptor_frees_the_slot() {
    let engine = Arc::new(VecEngine::new(16, 1));
    let cache = disk_cache(engine, false);
    let block = cache.write_block(cache.new_block().unwrap(), &[1; 16]).unwrap();
    assert!(cache.new_block().is_none(), "the only slot is taken");
    drop(block);
    assert_eq!(cache.used_bytes(), 0);
    assert!(cache.new_block().is_some());
  }

  #[test]
  fn corrupted_slice_is_reported() {
    let engine = Arc::new(VecEngine::new(16, 1));
    let cache = disk_cache(engine.clone(), true);
    let block = cache.write_block(cache.new_block().unwrap(), &[9; 16]).unwrap();
    engine.corrupt(block.id(), 9);

    assert!(cache.read_block(5, &block, 0, 8).is_ok());
    match cache.read_block(5, &block, 0, 16) {
      Err(CacheError::Checksum { cache_id, slice }) => {
        assert_eq!(cache_id, 5);
        assert_eq!(slice, 2);
      }
      other => panic!("expected a checksum error, got {:?}", other.map(|v| v.len())),
    }
  }

  #[test]
  fn unaligned_reads_are_rejected() {
    let engine = Arc::new(VecEngine::new(16, 1));
    let cache = disk_cache(engine, true);
    let block = cache.write_block(cache.new_block().unwrap(), &[0; 16]).unwrap();
    assert!(matches!(
      cache.read_block(1, &block, 3, 4),
      Err(CacheError::InvalidArgument(_))
    ));
  }

  #[test]
  fn disabled_tier_has_no_quota() {
    let cache = DiskCache::new(None, BlockLayout::new(16, 4), true, PolicyKind::Fifo, 0, 30);
    assert!(!cache.is_enabled());
    assert!(cache.new_block().is_none());
    assert!(cache.evict_track(1, 16));
    assert!(cache.evict_untrack(&1));
  }
}
