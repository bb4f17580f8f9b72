//! Block identities, tier payloads and the offset arithmetic shared by the
//! memory and disk tiers.
//!
//! An object of `size` bytes is split into `ceil(size / block_size)` blocks.
//! Each block is further divided into slices of `slice_size` bytes, which is
//! the granularity of disk reads and checksums.

use crate::disk::DiskLease;
use crate::mem::MemReservation;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// The internal identifier of a cache object, derived from its key.
pub type CacheId = u64;

/// The opaque byte string callers store objects under.
pub type CacheKey = Vec<u8>;

// Fixed seeds so that a key maps to the same id for the whole process.
static KEY_HASHER: Lazy<ahash::RandomState> = Lazy::new(|| {
  ahash::RandomState::with_seeds(
    0x243F_6A88_85A3_08D3,
    0x1319_8A2E_0370_7344,
    0xA409_3822_299F_31D0,
    0x082E_FA98_EC4E_6C89,
  )
});

/// Maps a cache key to its internal id.
///
/// Distinct keys may collide; callers compare the stored key before trusting
/// an entry found by id.
#[inline]
pub fn cache_id_of(key: &[u8]) -> CacheId {
  KEY_HASHER.hash_one(key)
}

/// Identifies one block of one cache object. This is the id tracked by the
/// memory tier's eviction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
  pub cache_id: CacheId,
  pub block_index: u32,
}

impl BlockKey {
  pub fn new(cache_id: CacheId, block_index: u32) -> Self {
    Self {
      cache_id,
      block_index,
    }
  }
}

impl fmt::Display for BlockKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}_{}", self.cache_id, self.block_index)
  }
}

/// Block and slice geometry, fixed for the lifetime of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
  pub block_size: u64,
  pub slice_size: u64,
}

impl BlockLayout {
  pub fn new(block_size: u64, slice_size: u64) -> Self {
    debug_assert!(block_size > 0 && slice_size > 0 && block_size % slice_size == 0);
    Self {
      block_size,
      slice_size,
    }
  }

  /// Number of blocks needed for an object of `size` bytes.
  #[inline]
  pub fn block_count(&self, size: u64) -> usize {
    if size == 0 {
      return 0;
    }
    ((size - 1) / self.block_size + 1) as usize
  }

  #[inline]
  pub fn off2block(&self, offset: u64) -> u32 {
    (offset / self.block_size) as u32
  }

  #[inline]
  pub fn block_lower(&self, block_index: u32) -> u64 {
    block_index as u64 * self.block_size
  }

  #[inline]
  pub fn off2slice(&self, offset: u64) -> usize {
    (offset / self.slice_size) as usize
  }

  #[inline]
  pub fn slice_lower(&self, slice_index: usize) -> u64 {
    slice_index as u64 * self.slice_size
  }

  #[inline]
  pub fn slice_upper(&self, slice_index: usize) -> u64 {
    (slice_index as u64 + 1) * self.slice_size - 1
  }

  /// Rounds the exclusive end offset `end` up to a slice boundary, capped at
  /// `limit`.
  #[inline]
  pub fn slice_end(&self, end: u64, limit: u64) -> u64 {
    if end == 0 {
      return 0;
    }
    (self.slice_upper(self.off2slice(end - 1)) + 1).min(limit)
  }
}

/// Whether a memory block still has to be written to disk before it can be
/// dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockState {
  /// The same bytes also exist on disk (e.g. after a promotion).
  Clean = 0,
  /// Only memory holds these bytes.
  Dirty = 1,
}

/// The in-memory payload of one block.
#[derive(Debug)]
pub struct MemBlock {
  data: Box<[u8]>,
  state: AtomicU8,
  // Returns the charged bytes to the memory space when the block is dropped.
  _reservation: Option<MemReservation>,
}

impl MemBlock {
  pub(crate) fn new(data: Box<[u8]>, state: BlockState, reservation: MemReservation) -> Self {
    Self {
      data,
      state: AtomicU8::new(state as u8),
      _reservation: Some(reservation),
    }
  }

  /// Creates a block that is not charged against any memory quota.
  #[cfg(test)]
  pub(crate) fn unaccounted(data: impl Into<Box<[u8]>>, state: BlockState) -> Self {
    Self {
      data: data.into(),
      state: AtomicU8::new(state as u8),
      _reservation: None,
    }
  }

  #[inline]
  pub fn data(&self) -> &[u8] {
    &self.data
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.data.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn state(&self) -> BlockState {
    match self.state.load(Ordering::Acquire) {
      0 => BlockState::Clean,
      _ => BlockState::Dirty,
    }
  }
}

/// The location of a block inside the disk engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
  pub dir_index: u8,
  pub block_index: u32,
}

impl fmt::Display for BlockId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.dir_index, self.block_index)
  }
}

/// The on-disk descriptor of one block: where it lives plus one checksum per
/// slice. Dropping the last reference frees the disk slot.
#[derive(Debug)]
pub struct DiskBlock {
  id: BlockId,
  // Bytes written, at most one block. The last block of an object is short.
  len: u64,
  checksums: Box<[u32]>,
  // Frees the disk slot when the descriptor is dropped.
  _lease: Option<DiskLease>,
}

impl DiskBlock {
  pub(crate) fn new(lease: DiskLease, len: u64, checksums: Box<[u32]>) -> Self {
    Self {
      id: lease.id(),
      len,
      checksums,
      _lease: Some(lease),
    }
  }

  /// Creates a descriptor that does not own its disk slot.
  #[cfg(test)]
  pub(crate) fn detached(id: BlockId, len: u64) -> Self {
    Self {
      id,
      len,
      checksums: Box::new([]),
      _lease: None,
    }
  }

  #[inline]
  pub fn id(&self) -> BlockId {
    self.id
  }

  /// The number of bytes stored in the block.
  #[inline]
  pub fn len(&self) -> u64 {
    self.len
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// The recorded checksum of a slice, if checksums were enabled when the
  /// block was written.
  #[inline]
  pub fn checksum(&self, slice_index: usize) -> Option<u32> {
    self.checksums.get(slice_index).copied()
  }
}

/// The per-tier references of one block of a cache entry.
///
/// A block may be present in memory, on disk, both (while being demoted or
/// promoted) or neither. A block with both references absent is empty.
#[derive(Debug, Clone, Default)]
pub struct BlockRef {
  pub mem_block: Option<Arc<MemBlock>>,
  pub disk_block: Option<Arc<DiskBlock>>,
}

impl BlockRef {
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.mem_block.is_none() && self.disk_block.is_none()
  }

  /// Drops both tier references.
  #[inline]
  pub fn clear(&mut self) {
    self.mem_block = None;
    self.disk_block = None;
  }
}
