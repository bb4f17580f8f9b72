use super::lru_list::LruList;
use super::EvictionPolicy;

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use generational_arena::Index;
use parking_lot::Mutex;

/// A pin on one node of one LRU bucket.
#[derive(Debug)]
pub struct LruToken {
  shard: usize,
  index: Index,
}

/// An eviction policy that evicts the least recently used ids.
///
/// Ids are hashed into `2^shard_bits` buckets, each an independently locked
/// recency list, so accesses to different buckets never contend. `evict`
/// takes victims from all buckets in turn; `evict_for` only from the bucket of
/// the id that needs the space.
pub struct LruPolicy<Id: Eq + Hash + Clone> {
  shards: Box<[CachePadded<Mutex<LruList<Id>>>]>,
  hasher: ahash::RandomState,
  // The bucket the next global eviction starts from.
  cursor: AtomicUsize,
}

impl<Id: Eq + Hash + Clone> fmt::Debug for LruPolicy<Id> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LruPolicy")
      .field("num_shards", &self.shards.len())
      .finish_non_exhaustive()
  }
}

impl<Id: Eq + Hash + Clone> LruPolicy<Id> {
  pub fn new(shard_bits: u32) -> Self {
    let shards = (0..1usize << shard_bits)
      .map(|_| CachePadded::new(Mutex::new(LruList::new())))
      .collect::<Vec<_>>()
      .into_boxed_slice();
    Self {
      shards,
      hasher: ahash::RandomState::new(),
      cursor: AtomicUsize::new(0),
    }
  }

  #[inline]
  pub(crate) fn shard_of(&self, id: &Id) -> usize {
    self.hasher.hash_one(id) as usize & (self.shards.len() - 1)
  }

  pub fn num_shards(&self) -> usize {
    self.shards.len()
  }

  /// The summed size cost of every tracked id.
  pub fn total_charge(&self) -> u64 {
    self.shards.iter().map(|shard| shard.lock().total_charge()).sum()
  }
}

impl<Id> EvictionPolicy<Id> for LruPolicy<Id>
where
  Id: Eq + Hash + Clone + Send + Sync,
{
  type Token = LruToken;

  fn add(&self, id: Id, size: u64) -> bool {
    let shard = self.shard_of(&id);
    self.shards[shard].lock().push_front(id, size)
  }

  fn acquire(&self, id: &Id) -> Option<LruToken> {
    let shard = self.shard_of(id);
    let index = self.shards[shard].lock().acquire(id, true)?;
    Some(LruToken { shard, index })
  }

  fn release(&self, token: LruToken) {
    self.shards[token.shard].lock().release(token.index);
  }

  fn evict(&self, count: usize, evicted: &mut Vec<Id>) {
    let num_shards = self.shards.len();
    let start = self.cursor.fetch_add(1, Ordering::Relaxed);
    let mut remaining = count;

    // One victim per bucket per round until enough were found or a whole
    // round came back empty.
    while remaining > 0 {
      let mut found = false;
      for offset in 0..num_shards {
        if remaining == 0 {
          break;
        }
        let shard = start.wrapping_add(offset) % num_shards;
        if let Some((id, _)) = self.shards[shard].lock().pop_back_unpinned() {
          evicted.push(id);
          remaining -= 1;
          found = true;
        }
      }
      if !found {
        break;
      }
    }
  }

  fn evict_for(&self, id: &Id, count: usize, evicted: &mut Vec<Id>) {
    let mut shard = self.shards[self.shard_of(id)].lock();
    for _ in 0..count {
      match shard.pop_back_unpinned() {
        Some((victim, _)) => evicted.push(victim),
        None => break,
      }
    }
  }

  fn remove(&self, id: &Id) -> bool {
    let shard = self.shard_of(id);
    self.shards[shard].lock().remove(id).is_some()
  }

  fn clear(&self) {
    for shard in self.shards.iter() {
      shard.lock().clear();
    }
  }

  fn len(&self) -> usize {
    self.shards.iter().map(|shard| shard.lock().len()).sum()
  }
}
