//! A read-mostly map built from two buffered generations of a `HashMap`.
//!
//! Writers serialize on a mutex, apply their mutation to the background
//! buffer, flip which buffer is the foreground and then replay the same
//! mutation on the buffer that just went into the background. Readers take a
//! shared lock on whichever buffer is the foreground when they start, so they
//! only ever see a buffer that no writer is touching.

use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

pub struct ConcurrentIndexMap<K, V, H = ahash::RandomState> {
  buffers: [RwLock<HashMap<K, V, H>>; 2],
  // Index of the buffer readers should use.
  foreground: AtomicUsize,
  writer: Mutex<()>,
}

impl<K, V, H> fmt::Debug for ConcurrentIndexMap<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ConcurrentIndexMap")
      .field("foreground", &self.foreground.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}

impl<K, V, H> Default for ConcurrentIndexMap<K, V, H>
where
  K: Eq + Hash + Clone,
  V: Clone,
  H: BuildHasher + Clone + Default,
{
  fn default() -> Self {
    Self::with_hasher(H::default())
  }
}

impl<K, V> ConcurrentIndexMap<K, V, ahash::RandomState>
where
  K: Eq + Hash + Clone,
  V: Clone,
{
  pub fn new() -> Self {
    Self::with_hasher(ahash::RandomState::new())
  }
}

impl<K, V, H> ConcurrentIndexMap<K, V, H>
where
  K: Eq + Hash + Clone,
  V: Clone,
  H: BuildHasher + Clone,
{
  /// Creates an empty map. Both generations share the same hasher state.
  pub fn with_hasher(hasher: H) -> Self {
    Self {
      buffers: [
        RwLock::new(HashMap::with_hasher(hasher.clone())),
        RwLock::new(HashMap::with_hasher(hasher)),
      ],
      foreground: AtomicUsize::new(0),
      writer: Mutex::new(()),
    }
  }

  /// Locks the current foreground generation for reading.
  ///
  /// A reader that loaded the index just before a swap may find the writer
  /// draining that buffer; it then reloads the index, which by then points
  /// at the other, already updated buffer.
  fn read_guard(&self) -> RwLockReadGuard<'_, HashMap<K, V, H>> {
    loop {
      let index = self.foreground.load(Ordering::Acquire);
      if let Some(guard) = self.buffers[index].try_read() {
        return guard;
      }
      std::hint::spin_loop();
    }
  }

  /// Applies `f` to both generations and returns the result of the first
  /// application.
  ///
  /// `f` runs twice, so it must be deterministic: given two identical maps
  /// it must leave them identical and return the same thing.
  pub fn modify<R>(&self, f: impl Fn(&mut HashMap<K, V, H>) -> R) -> R {
    let _writer = self.writer.lock();
    let foreground = self.foreground.load(Ordering::Acquire);
    let background = foreground ^ 1;

    let result = f(&mut self.buffers[background].write());
    self.foreground.store(background, Ordering::Release);
    // Waits for readers still holding the old foreground to finish.
    f(&mut self.buffers[foreground].write());
    result
  }

  /// Runs `f` against the current generation.
  pub fn read<R>(&self, f: impl FnOnce(&HashMap<K, V, H>) -> R) -> R {
    f(&self.read_guard())
  }

  /// Inserts `value` only if `key` is absent. Returns whether it inserted.
  pub fn add(&self, key: K, value: V) -> bool {
    self.modify(|map| {
      if map.contains_key(&key) {
        false
      } else {
        map.insert(key.clone(), value.clone());
        true
      }
    })
  }

  /// Inserts or replaces the value for `key`.
  pub fn update(&self, key: K, value: V) {
    self.modify(|map| {
      map.insert(key.clone(), value.clone());
    });
  }

  /// Returns a copy of the value mapped to `key`.
  pub fn get(&self, key: &K) -> Option<V> {
    self.read_guard().get(key).cloned()
  }

  pub fn contains_key(&self, key: &K) -> bool {
    self.read_guard().contains_key(key)
  }

  /// Removes `key`. Returns true if it was present.
  pub fn remove(&self, key: &K) -> bool {
    self.modify(|map| map.remove(key).is_some())
  }

  /// Removes `key` only if `predicate` holds for its current value.
  pub fn remove_if(&self, key: &K, predicate: impl Fn(&V) -> bool) -> bool {
    self.modify(|map| {
      if map.get(key).is_some_and(&predicate) {
        map.remove(key);
        true
      } else {
        false
      }
    })
  }

  /// A snapshot of all keys. Mutations that start after the snapshot is
  /// taken are not reflected.
  pub fn list(&self) -> Vec<K> {
    self.read_guard().keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.read_guard().len()
  }

  pub fn is_empty(&self) -> bool {
    self.read_guard().is_empty()
  }

  /// Removes every entry and returns the removed values.
  pub fn drain(&self) -> Vec<V> {
    let _writer = self.writer.lock();
    let foreground = self.foreground.load(Ordering::Acquire);
    let background = foreground ^ 1;

    self.buffers[background].write().clear();
    self.foreground.store(background, Ordering::Release);
    self.buffers[foreground].write().drain().map(|(_, v)| v).collect()
  }
}
