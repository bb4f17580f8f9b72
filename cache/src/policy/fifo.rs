use super::lru_list::LruList;
use super::EvictionPolicy;

use std::hash::Hash;

use generational_arena::Index;
use parking_lot::Mutex;

#[derive(Debug)]
pub struct FifoToken(Index);

/// An eviction policy that evicts ids in the order they were added.
///
/// Accesses pin an id but never reorder it. There is a single bucket, so
/// `evict_for` is the same as `evict`.
#[derive(Debug)]
pub struct FifoPolicy<Id: Eq + Hash + Clone> {
  list: Mutex<LruList<Id>>,
}

impl<Id: Eq + Hash + Clone> FifoPolicy<Id> {
  pub fn new() -> Self {
    Self {
      list: Mutex::new(LruList::new()),
    }
  }
}

impl<Id: Eq + Hash + Clone> Default for FifoPolicy<Id> {
  fn default() -> Self {
    Self::new()
  }
}

impl<Id> EvictionPolicy<Id> for FifoPolicy<Id>
where
  Id: Eq + Hash + Clone + Send + Sync,
{
  type Token = FifoToken;

  fn add(&self, id: Id, size: u64) -> bool {
    self.list.lock().push_front(id, size)
  }

  fn acquire(&self, id: &Id) -> Option<FifoToken> {
    self.list.lock().acquire(id, false).map(FifoToken)
  }

  fn release(&self, token: FifoToken) {
    self.list.lock().release(token.0);
  }

  fn evict(&self, count: usize, evicted: &mut Vec<Id>) {
    let mut list = self.list.lock();
    for _ in 0..count {
      match list.pop_back_unpinned() {
        Some((id, _)) => evicted.push(id),
        None => break,
      }
    }
  }

  fn evict_for(&self, _id: &Id, count: usize, evicted: &mut Vec<Id>) {
    self.evict(count, evicted);
  }

  fn remove(&self, id: &Id) -> bool {
    self.list.lock().remove(id).is_some()
  }

  fn clear(&self) {
    self.list.lock().clear();
  }

  fn len(&self) -> usize {
    self.list.lock().len()
  }
}
