use crate::block::{BlockRef, CacheKey, DiskBlock, MemBlock};
use crate::time;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// One bit of the entry state set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CacheState {
  /// At least one block is resident in memory (advisory).
  InMem = 0,
  /// At least one block is resident on disk (advisory).
  InDisk = 1,
  /// The entry was logically destroyed. Terminal.
  Released = 2,
}

impl CacheState {
  #[inline]
  pub const fn bit(self) -> u8 {
    1 << self as u8
  }
}

/// The per-key metadata and block-tier map of one cached object.
///
/// The index holds the long-lived `Arc<CacheEntry>`; readers and the eviction
/// path hold short-lived clones of it for the duration of an operation.
///
/// Locking: the state byte is guarded by its own reader/writer lock, and every
/// block slot by a lock of its own. Code that needs both always takes the state
/// lock first, so the two never deadlock.
pub struct CacheEntry {
  key: CacheKey,
  size: u64,
  block_size: u64,
  expire_time: AtomicU64,
  pinned: AtomicBool,
  blocks: Box<[RwLock<BlockRef>]>,
  state: RwLock<u8>,
}

impl fmt::Debug for CacheEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEntry")
      .field("key_len", &self.key.len())
      .field("size", &self.size)
      .field("block_count", &self.blocks.len())
      .field("expire_time", &self.expire_time())
      .field("state", &self.state())
      .finish_non_exhaustive()
  }
}

impl CacheEntry {
  /// Creates an entry for an object of `size` bytes, split into blocks of
  /// `block_size` bytes. All blocks start out empty.
  pub fn new(key: CacheKey, size: u64, block_size: u64, expire_time: u64) -> Self {
    assert!(block_size > 0, "block size must be positive");
    let count = if size == 0 {
      0
    } else {
      ((size - 1) / block_size + 1) as usize
    };
    let blocks = (0..count)
      .map(|_| RwLock::new(BlockRef::default()))
      .collect::<Vec<_>>()
      .into_boxed_slice();

    Self {
      key,
      size,
      block_size,
      expire_time: AtomicU64::new(expire_time),
      pinned: AtomicBool::new(false),
      blocks,
      state: RwLock::new(0),
    }
  }

  #[inline]
  pub fn key(&self) -> &[u8] {
    &self.key
  }

  #[inline]
  pub fn size(&self) -> u64 {
    self.size
  }

  /// `ceil(size / block_size)`, zero for an empty object.
  #[inline]
  pub fn block_count(&self) -> usize {
    self.blocks.len()
  }

  /// The byte length of block `index`: the block size for every block but
  /// the last, which holds the remainder.
  ///
  /// # Panics
  ///
  /// Panics if `index >= block_count()`. That is a caller bug, not a data
  /// problem.
  pub fn block_size(&self, index: usize) -> u64 {
    assert!(
      index < self.block_count(),
      "block index {} out of range for {} blocks",
      index,
      self.block_count()
    );
    let tail = self.size - index as u64 * self.block_size;
    tail.min(self.block_size)
  }

  // --- Expiry ---

  /// Absolute expiry in cache-epoch seconds; `0` means no TTL.
  #[inline]
  pub fn expire_time(&self) -> u64 {
    self.expire_time.load(Ordering::Relaxed)
  }

  #[inline]
  pub fn is_expired(&self) -> bool {
    let expire_time = self.expire_time();
    expire_time > 0 && time::now_secs() >= expire_time
  }

  // --- Pinning ---

  #[inline]
  pub fn is_pinned(&self) -> bool {
    self.pinned.load(Ordering::Acquire)
  }

  /// Sets the pinned flag. Returns false if it already had that value.
  pub fn set_pinned(&self, pinned: bool) -> bool {
    self.pinned.swap(pinned, Ordering::AcqRel) != pinned
  }

  // --- State bits ---

  /// Sets one state bit. A no-op once the entry is released.
  pub fn set_state(&self, state: CacheState) {
    let mut bits = self.state.write();
    if *bits & CacheState::Released.bit() == 0 {
      *bits |= state.bit();
    }
  }

  /// Clears one state bit. A no-op once the entry is released.
  pub fn reset_state(&self, state: CacheState) {
    let mut bits = self.state.write();
    if *bits & CacheState::Released.bit() == 0 {
      *bits &= !state.bit();
    }
  }

  /// The whole state byte, read atomically.
  pub fn state(&self) -> u8 {
    *self.state.read()
  }

  pub fn is_in_mem(&self) -> bool {
    *self.state.read() & CacheState::InMem.bit() != 0
  }

  pub fn is_in_disk(&self) -> bool {
    *self.state.read() & CacheState::InDisk.bit() != 0
  }

  pub fn is_released(&self) -> bool {
    *self.state.read() & CacheState::Released.bit() != 0
  }

  /// Marks the entry released.
  ///
  /// Returns true for exactly one caller; every later call returns false, which
  /// tells the caller someone else already owns tearing down the entry.
  pub fn release(&self) -> bool {
    let mut bits = self.state.write();
    if *bits & CacheState::Released.bit() != 0 {
      return false;
    }
    *bits |= CacheState::Released.bit();
    true
  }

  /// Releases the entry only if every block is empty in both tiers.
  ///
  /// The check and the release happen under the exclusive state lock. Returns
  /// false without side effects if the entry was already released or any
  /// block still holds a tier reference.
  pub fn release_if_empty(&self) -> bool {
    let mut bits = self.state.write();
    if *bits & CacheState::Released.bit() != 0 {
      return false;
    }
    if self.blocks.iter().any(|block| !block.read().is_empty()) {
      return false;
    }
    *bits |= CacheState::Released.bit();
    true
  }

  // --- Blocks ---

  /// A snapshot of the tier references of block `index`.
  pub fn block(&self, index: usize) -> BlockRef {
    self.blocks[index].read().clone()
  }

  pub fn mem_block(&self, index: usize) -> Option<Arc<MemBlock>> {
    self.blocks[index].read().mem_block.clone()
  }

  pub fn disk_block(&self, index: usize) -> Option<Arc<DiskBlock>> {
    self.blocks[index].read().disk_block.clone()
  }

  /// Installs or clears the memory reference of block `index` and returns
  /// the previous one.
  pub fn set_mem_block(&self, index: usize, block: Option<Arc<MemBlock>>) -> Option<Arc<MemBlock>> {
    std::mem::replace(&mut self.blocks[index].write().mem_block, block)
  }

  /// Installs or clears the disk reference of block `index` and returns the
  /// previous one.
  pub fn set_disk_block(
    &self,
    index: usize,
    block: Option<Arc<DiskBlock>>,
  ) -> Option<Arc<DiskBlock>> {
    std::mem::replace(&mut self.blocks[index].write().disk_block, block)
  }

  /// Runs `f` with exclusive access to block `index`, for check-then-set
  /// sequences that must not interleave with other tier writers.
  pub fn update_block<R>(&self, index: usize, f: impl FnOnce(&mut BlockRef) -> R) -> R {
    f(&mut self.blocks[index].write())
  }

  /// Drops both tier references of block `index`.
  pub fn clear_block(&self, index: usize) {
    self.blocks[index].write().clear();
  }

  /// Drops the memory reference of every block.
  ///
  /// Holds the shared state lock so the scan cannot interleave with
  /// `release_if_empty`; each slot is cleared under its own exclusive lock.
  pub fn clear_mem_blocks(&self) {
    let _state = self.state.read();
    for block in self.blocks.iter() {
      block.write().mem_block = None;
    }
  }

  /// Drops the disk reference of every block.
  pub fn clear_disk_blocks(&self) {
    let _state = self.state.read();
    for block in self.blocks.iter() {
      block.write().disk_block = None;
    }
  }

  /// Returns `(any block in memory, any block on disk)`.
  pub fn residency(&self) -> (bool, bool) {
    self.blocks.iter().fold((false, false), |(mem, disk), block| {
      let block = block.read();
      (
        mem || block.mem_block.is_some(),
        disk || block.disk_block.is_some(),
      )
    })
  }

  /// Recomputes the advisory `InMem`/`InDisk` bits from the blocks.
  pub(crate) fn sync_tier_state(&self) {
    let (mem, disk) = self.residency();
    let mut bits = self.state.write();
    if *bits & CacheState::Released.bit() != 0 {
      return;
    }
    for (resident, state) in [(mem, CacheState::InMem), (disk, CacheState::InDisk)] {
      if resident {
        *bits |= state.bit();
      } else {
        *bits &= !state.bit();
      }
    }
  }
}
