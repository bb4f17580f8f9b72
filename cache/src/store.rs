use crate::block::CacheId;
use crate::entry::CacheEntry;
use crate::index::ConcurrentIndexMap;

use core::fmt;
use std::sync::Arc;

use crossbeam_utils::CachePadded;

type Shard = ConcurrentIndexMap<CacheId, Arc<CacheEntry>>;

/// The cache id to entry index, split into independently written shards.
///
/// Each shard is a double-buffered map, so lookups never wait on writers and
/// writers to different shards never wait on each other. Cache ids are
/// already hashes, so the shard is taken from their low bits.
pub(crate) struct AccessIndex {
  shards: Box<[CachePadded<Shard>]>,
  mask: u64,
}

impl fmt::Debug for AccessIndex {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AccessIndex")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl AccessIndex {
  pub(crate) fn new(shard_bits: u32) -> Self {
    let num_shards = 1usize << shard_bits;
    let shards = (0..num_shards)
      .map(|_| CachePadded::new(Shard::new()))
      .collect::<Vec<_>>()
      .into_boxed_slice();
    Self {
      shards,
      mask: num_shards as u64 - 1,
    }
  }

  #[inline]
  fn shard(&self, cache_id: CacheId) -> &Shard {
    &self.shards[(cache_id & self.mask) as usize]
  }

  pub(crate) fn find(&self, cache_id: CacheId) -> Option<Arc<CacheEntry>> {
    self.shard(cache_id).get(&cache_id)
  }

  pub(crate) fn insert(&self, cache_id: CacheId, entry: Arc<CacheEntry>) {
    self.shard(cache_id).update(cache_id, entry);
  }

  /// Unpublishes `cache_id` only while it still maps to `entry`, so a
  /// delayed teardown cannot remove a newer object stored under the same id.
  pub(crate) fn remove(&self, cache_id: CacheId, entry: &Arc<CacheEntry>) -> bool {
    self
      .shard(cache_id)
      .remove_if(&cache_id, |current| Arc::ptr_eq(current, entry))
  }

  pub(crate) fn len(&self) -> usize {
    self.shards.iter().map(|shard| shard.len()).sum()
  }

  /// Empties every shard and returns the entries that were published.
  pub(crate) fn drain(&self) -> Vec<Arc<CacheEntry>> {
    self.shards.iter().flat_map(|shard| shard.drain()).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(key: &[u8]) -> Arc<CacheEntry> {
    Arc::new(CacheEntry::new(key.to_vec(), 8, 4, 0))
  }

  #[test]
  fn remove_checks_identity() {
    let index = AccessIndex::new(2);
    let old = entry(b"a");
    let new = entry(b"a");

    index.insert(9, old.clone());
    index.insert(9, new.clone());
    assert!(!index.remove(9, &old), "a stale entry must not unpublish the new one");
    assert!(Arc::ptr_eq(&index.find(9).unwrap(), &new));
    assert!(index.remove(9, &new));
    assert!(index.find(9).is_none());
  }

  #[test]
  fn ids_spread_over_shards() {
    let index = AccessIndex::new(3);
    for id in 0..64u64 {
      index.insert(id, entry(&id.to_le_bytes()));
    }
    assert_eq!(index.len(), 64);
    assert!(index.shards.iter().all(|shard| shard.len() == 8));
    assert_eq!(index.drain().len(), 64);
    assert_eq!(index.len(), 0);
  }
}
