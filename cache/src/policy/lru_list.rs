use std::collections::HashMap;
use std::hash::Hash;

use generational_arena::{Arena, Index};

#[derive(Debug)]
pub(super) struct Node<K> {
  pub(crate) key: K,
  pub(crate) charge: u64,
  // Outstanding handles. A node with refs > 0 is never chosen as a victim.
  pub(crate) refs: u32,
  // False once the key was removed while a handle still pointed at the node.
  pub(crate) valid: bool,
  pub(crate) next: Option<Index>,
  pub(crate) prev: Option<Index>,
}

/// An arena-backed recency list whose nodes can be pinned by handles.
///
/// Every tracked key is linked into the list. A key removed while pinned is
/// unlinked and forgotten immediately, but its node stays in the arena until
/// the last handle is released.
#[derive(Debug)]
pub(super) struct LruList<K: Eq + Hash + Clone> {
  pub(crate) nodes: Arena<Node<K>>,
  pub(crate) lookup: HashMap<K, Index, ahash::RandomState>,
  // Head is the most-recently-used item.
  pub(crate) head: Option<Index>,
  // Tail is the least-recently-used item.
  pub(crate) tail: Option<Index>,
  pub(crate) total_charge: u64,
}

impl<K: Eq + Hash + Clone> LruList<K> {
  pub fn new() -> Self {
    Self {
      nodes: Arena::new(),
      lookup: HashMap::default(),
      head: None,
      tail: None,
      total_charge: 0,
    }
  }

  fn unlink(&mut self, index: Index) {
    let node = &self.nodes[index];
    let prev = node.prev;
    let next = node.next;

    if let Some(prev) = prev {
      self.nodes[prev].next = next;
    } else {
      self.head = next;
    }

    if let Some(next) = next {
      self.nodes[next].prev = prev;
    } else {
      self.tail = prev;
    }
  }

  fn push_front_node(&mut self, index: Index) {
    let old_head = self.head;
    self.nodes[index].next = old_head;
    self.nodes[index].prev = None;
    self.head = Some(index);

    if let Some(old_head) = old_head {
      self.nodes[old_head].prev = Some(index);
    }

    if self.tail.is_none() {
      self.tail = Some(index);
    }
  }

  // Unlinks a tracked node and frees it unless a handle still holds it.
  fn detach(&mut self, index: Index) -> u64 {
    self.unlink(index);
    let node = &mut self.nodes[index];
    let charge = node.charge;
    self.total_charge = self.total_charge.saturating_sub(charge);
    if node.refs == 0 {
      self.nodes.remove(index);
    } else {
      node.valid = false;
    }
    charge
  }

  pub fn len(&self) -> usize {
    self.lookup.len()
  }

  #[cfg(test)]
  pub fn contains(&self, key: &K) -> bool {
    self.lookup.contains_key(key)
  }

  pub fn total_charge(&self) -> u64 {
    self.total_charge
  }

  /// Starts tracking `key` at the head. Returns false if already tracked.
  pub fn push_front(&mut self, key: K, charge: u64) -> bool {
    if self.lookup.contains_key(&key) {
      return false;
    }
    let index = self.nodes.insert(Node {
      key: key.clone(),
      charge,
      refs: 0,
      valid: true,
      next: None,
      prev: None,
    });
    self.lookup.insert(key, index);
    self.total_charge += charge;
    self.push_front_node(index);
    true
  }

  /// Pins the node of `key` and, if `promote` is set, moves it to the head.
  pub fn acquire(&mut self, key: &K, promote: bool) -> Option<Index> {
    let index = *self.lookup.get(key)?;
    self.nodes[index].refs += 1;
    if promote && self.head != Some(index) {
      self.unlink(index);
      self.push_front_node(index);
    }
    Some(index)
  }

  /// Drops one pin. A node that was removed while pinned is freed with its
  /// last pin.
  pub fn release(&mut self, index: Index) {
    let Some(node) = self.nodes.get_mut(index) else {
      return;
    };
    node.refs = node.refs.saturating_sub(1);
    if node.refs == 0 && !node.valid {
      self.nodes.remove(index);
    }
  }

  /// Removes and returns the least recently used key that is not pinned.
  pub fn pop_back_unpinned(&mut self) -> Option<(K, u64)> {
    let mut cursor = self.tail;
    while let Some(index) = cursor {
      let node = &self.nodes[index];
      if node.refs == 0 {
        let key = node.key.clone();
        self.lookup.remove(&key);
        let charge = self.detach(index);
        return Some((key, charge));
      }
      cursor = node.prev;
    }
    None
  }

  pub fn remove(&mut self, key: &K) -> Option<u64> {
    let index = self.lookup.remove(key)?;
    Some(self.detach(index))
  }

  /// Forgets every key. Pinned nodes linger until their handles are released.
  pub fn clear(&mut self) {
    let indices: Vec<Index> = self.lookup.drain().map(|(_, index)| index).collect();
    for index in indices {
      let node = &mut self.nodes[index];
      if node.refs == 0 {
        self.nodes.remove(index);
      } else {
        node.valid = false;
      }
    }
    self.head = None;
    self.tail = None;
    self.total_charge = 0;
  }

  #[cfg(test)]
  pub(crate) fn refs(&self, key: &K) -> Option<u32> {
    self.lookup.get(key).map(|&index| self.nodes[index].refs)
  }

  // A helper for tests, to get the order of keys from head to tail.
  #[cfg(test)]
  pub(crate) fn keys_as_vec(&self) -> Vec<K> {
    let mut keys = Vec::new();
    let mut current = self.head;
    while let Some(index) = current {
      keys.push(self.nodes[index].key.clone());
      current = self.nodes[index].next;
    }
    keys
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn list_of(keys: &[i32]) -> LruList<i32> {
    let mut list = LruList::new();
    for &key in keys {
      assert!(list.push_front(key, 1));
    }
    list
  }

  #[test]
  fn new_list_is_empty() {
    let list = LruList::<i32>::new();
    assert!(list.keys_as_vec().is_empty());
    assert_eq!(list.len(), 0);
    assert_eq!(list.total_charge(), 0);
    assert!(!list.contains(&123));
  }

  #[test]
  fn push_front_rejects_duplicates() {
    let mut list = LruList::new();
    assert!(list.push_front(10, 5));
    assert!(list.push_front(20, 2));
    assert!(!list.push_front(10, 99), "existing key must not be re-added");
    assert_eq!(list.total_charge(), 7);
    assert_eq!(list.keys_as_vec(), vec![20, 10]);
  }

  #[test]
  fn acquire_with_promote_moves_to_front() {
    let mut list = list_of(&[1, 2, 3]);
    assert_eq!(list.keys_as_vec(), vec![3, 2, 1]);

    let index = list.acquire(&1, true).unwrap();
    assert_eq!(list.keys_as_vec(), vec![1, 3, 2]);
    assert_eq!(list.refs(&1), Some(1));

    list.release(index);
    assert_eq!(list.refs(&1), Some(0));
    assert_eq!(list.keys_as_vec(), vec![1, 3, 2]);
  }

  #[test]
  fn acquire_without_promote_keeps_order() {
    let mut list = list_of(&[1, 2, 3]);
    list.acquire(&1, false).unwrap();
    assert_eq!(list.keys_as_vec(), vec![3, 2, 1]);
    assert!(list.acquire(&42, false).is_none());
  }

  #[test]
  fn pop_back_skips_pinned_nodes() {
    let mut list = list_of(&[1, 2, 3]);
    let pin = list.acquire(&1, false).unwrap();

    assert_eq!(list.pop_back_unpinned(), Some((2, 1)));
    assert_eq!(list.pop_back_unpinned(), Some((3, 1)));
    assert_eq!(list.pop_back_unpinned(), None, "only the pinned key is left");
    assert!(list.contains(&1));

    list.release(pin);
    assert_eq!(list.pop_back_unpinned(), Some((1, 1)));
    assert!(list.nodes.is_empty());
  }

  #[test]
  fn remove_while_pinned_defers_free() {
    let mut list = list_of(&[1, 2]);
    let pin = list.acquire(&1, true).unwrap();

    assert_eq!(list.remove(&1), Some(1));
    assert!(!list.contains(&1));
    assert_eq!(list.keys_as_vec(), vec![2]);
    assert_eq!(list.nodes.len(), 2, "node lives until the handle is released");

    list.release(pin);
    assert_eq!(list.nodes.len(), 1);

    // The key can be tracked again afterwards.
    assert!(list.push_front(1, 4));
    assert_eq!(list.total_charge(), 5);
  }

  #[test]
  fn remove_non_existent_item() {
    let mut list = list_of(&[1, 2]);
    assert_eq!(list.remove(&99), None);
    assert_eq!(list.total_charge(), 2);
  }

  #[test]
  fn clear_keeps_pinned_nodes_until_release() {
    let mut list = list_of(&[1, 2, 3]);
    let pin = list.acquire(&2, false).unwrap();

    list.clear();
    assert!(list.keys_as_vec().is_empty());
    assert_eq!(list.len(), 0);
    assert_eq!(list.total_charge(), 0);
    assert_eq!(list.nodes.len(), 1);

    list.release(pin);
    assert!(list.nodes.is_empty());
  }
}
