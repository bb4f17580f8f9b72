//! The memory tier: a byte quota manager and the policy tracking memory
//! blocks.

use crate::block::{BlockKey, BlockState, MemBlock};
use crate::policy::{EvictionPolicy, Handle, Policy, PolicyKind};
use crate::rng::FastRng;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct SpaceState {
  used: u64,
  // Bytes set aside for urgent allocations that already lost once.
  private_quota: u64,
  // Bytes that failed allocations asked for and did not get.
  need: u64,
}

/// How hard a memory charge tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
  /// Gives up quietly. A miss leaves no claim on later frees.
  Opportunistic,
  /// Records its shortfall so later frees set bytes aside for it.
  Normal,
  /// A retry after an eviction round. May spend the private reserve.
  Urgent,
}

/// Accounts memory usage against a fixed quota.
///
/// Ordinary allocations may fill the public part of the quota up to
/// `alloc_threshold` percent. An allocation that fails records how many bytes
/// it needed; frees then move that many bytes into a private reserve that
/// only urgent (retried) allocations may use, so a writer that already
/// triggered an eviction round is not starved by newcomers.
pub struct MemSpace {
  quota: u64,
  alloc_threshold: u64,
  state: Mutex<SpaceState>,
}

impl fmt::Debug for MemSpace {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("MemSpace")
      .field("quota", &self.quota)
      .field("used", &state.used)
      .field("private_quota", &state.private_quota)
      .field("need", &state.need)
      .finish()
  }
}

impl MemSpace {
  pub fn new(quota: u64, alloc_threshold: u64) -> Self {
    Self {
      quota,
      alloc_threshold,
      state: Mutex::new(SpaceState::default()),
    }
  }

  #[inline]
  pub fn quota_bytes(&self) -> u64 {
    self.quota
  }

  pub fn used_bytes(&self) -> u64 {
    self.state.lock().used
  }

  /// Charges `size` bytes. Returns false if the quota does not allow it; a
  /// [`Priority::Normal`] miss also remembers the shortfall.
  pub fn inc_mem(&self, size: u64, priority: Priority) -> bool {
    let mut state = self.state.lock();
    if priority == Priority::Urgent && state.private_quota >= size {
      state.private_quota -= size;
      state.used += size;
      return true;
    }

    let public_quota = self.quota.saturating_sub(state.private_quota);
    let upper_threshold = public_quota * self.alloc_threshold / 100;
    if state.used + size < upper_threshold {
      state.used += size;
      if priority == Priority::Urgent {
        // Served from the public part; the shortfall is no longer owed.
        let served = state.need.min(size);
        state.need -= served;
      }
      return true;
    }

    if priority == Priority::Normal {
      state.need += size;
    }
    false
  }

  /// Drops a recorded shortfall of `size` bytes after its allocation gave up.
  pub fn cancel_need(&self, size: u64) {
    let mut state = self.state.lock();
    let owed = state.need.min(size);
    state.need -= owed;
  }

  /// Returns `size` bytes, filling the private reserve first while earlier
  /// allocations are still waiting for space.
  pub fn dec_mem(&self, size: u64) {
    let mut state = self.state.lock();
    let to_private = state.need.min(size);
    state.private_quota += to_private;
    state.need -= to_private;
    state.used = state.used.saturating_sub(size);
  }

  /// Charges `size` bytes and returns a guard that gives them back on drop.
  pub fn try_reserve(self: &Arc<Self>, size: u64, priority: Priority) -> Option<MemReservation> {
    self.inc_mem(size, priority).then(|| MemReservation {
      space: Arc::clone(self),
      bytes: size,
    })
  }
}

/// Bytes charged against a [`MemSpace`], returned when dropped.
pub struct MemReservation {
  space: Arc<MemSpace>,
  bytes: u64,
}

impl fmt::Debug for MemReservation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MemReservation")
      .field("bytes", &self.bytes)
      .finish()
  }
}

impl Drop for MemReservation {
  fn drop(&mut self) {
    self.space.dec_mem(self.bytes);
  }
}

/// The memory tier: quota accounting plus the eviction policy over block
/// keys.
#[derive(Debug)]
pub struct MemCache {
  space: Arc<MemSpace>,
  policy: Policy<BlockKey>,
  touch_probability: u32,
  rng: FastRng,
}

impl MemCache {
  pub fn new(
    quota: u64,
    alloc_threshold: u64,
    policy: PolicyKind,
    shard_bits: u32,
    touch_probability: u32,
  ) -> Self {
    Self {
      space: Arc::new(MemSpace::new(quota, alloc_threshold)),
      policy: Policy::new(policy, shard_bits),
      touch_probability,
      rng: FastRng::from_entropy(),
    }
  }

  pub fn quota_bytes(&self) -> u64 {
    self.space.quota_bytes()
  }

  pub fn used_bytes(&self) -> u64 {
    self.space.used_bytes()
  }

  pub fn space(&self) -> &Arc<MemSpace> {
    &self.space
  }

  pub fn policy(&self) -> &Policy<BlockKey> {
    &self.policy
  }

  /// Copies `data` into a new charged block. Returns `None` if the quota
  /// refused the charge.
  pub fn new_block(&self, data: &[u8], state: BlockState, priority: Priority) -> Option<MemBlock> {
    let reservation = self.space.try_reserve(data.len() as u64, priority)?;
    Some(MemBlock::new(data.into(), state, reservation))
  }

  pub fn evict_track(&self, key: BlockKey, size: u64) -> bool {
    self.policy.add(key, size)
  }

  pub fn evict_untrack(&self, key: &BlockKey) -> bool {
    self.policy.remove(key)
  }

  /// Touches `key` in the policy. Unless `force` is set this only happens
  /// with the configured probability, to keep the policy locks cool.
  pub fn evict_touch(
    &self,
    key: &BlockKey,
    force: bool,
  ) -> Option<Handle<'_, BlockKey, Policy<BlockKey>>> {
    if force || self.rng.percent(self.touch_probability) {
      self.policy.touch(key)
    } else {
      None
    }
  }

  pub fn evict(&self, count: usize, evicted: &mut Vec<BlockKey>) {
    self.policy.evict(count, evicted);
  }

  pub fn evict_for(&self, key: &BlockKey, count: usize, evicted: &mut Vec<BlockKey>) {
    self.policy.evict_for(key, count, evicted);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn public_quota_is_capped_by_threshold() {
    let space = MemSpace::new(1000, 90);
    assert!(space.inc_mem(800, Priority::Normal));
    assert!(space.inc_mem(99, Priority::Normal));
    assert!(!space.inc_mem(1, Priority::Normal), "900 would reach the threshold");
    assert_eq!(space.used_bytes(), 899);
  }

  #[test]
  fn freed_bytes_feed_the_private_reserve() {
    let space = MemSpace::new(1000, 90);
    assert!(space.inc_mem(850, Priority::Normal));
    assert!(!space.inc_mem(100, Priority::Normal));

    // The next free covers the recorded need and parks it privately.
    space.dec_mem(200);
    assert_eq!(space.used_bytes(), 650);
    assert!(space.inc_mem(100, Priority::Urgent), "urgent allocation uses the reserve");
    assert_eq!(space.used_bytes(), 750);

    let state = space.state.lock();
    assert_eq!(state.private_quota, 0);
    assert_eq!(state.need, 0);
  }

  #[test]
  fn non_urgent_allocations_cannot_use_the_reserve() {
    let space = MemSpace::new(1000, 100);
    assert!(space.inc_mem(990, Priority::Normal));
    assert!(!space.inc_mem(50, Priority::Normal));
    space.dec_mem(50);
    // Public quota is now 950 while 940 bytes are in use.
    assert!(!space.inc_mem(20, Priority::Normal));
    assert!(space.inc_mem(50, Priority::Urgent));
  }

  #[test]
  fn opportunistic_misses_leave_the_public_quota_alone() {
    let space = MemSpace::new(64, 100);
    assert!(space.inc_mem(48, Priority::Normal));
    for _ in 0..10 {
      assert!(!space.inc_mem(16, Priority::Opportunistic));
    }
    space.dec_mem(48);
    assert_eq!(space.used_bytes(), 0);

    let state = space.state.lock();
    assert_eq!(state.private_quota, 0);
    assert_eq!(state.need, 0);
    drop(state);
    assert!(space.inc_mem(60, Priority::Opportunistic));
  }

  #[test]
  fn served_or_abandoned_shortfalls_are_forgotten() {
    let space = MemSpace::new(100, 100);
    assert!(space.inc_mem(90, Priority::Normal));
    assert!(!space.inc_mem(20, Priority::Normal));
    assert!(!space.inc_mem(20, Priority::Urgent), "urgent misses are not recorded twice");
    assert_eq!(space.state.lock().need, 20);

    space.cancel_need(20);
    assert_eq!(space.state.lock().need, 0);

    assert!(!space.inc_mem(20, Priority::Normal));
    space.state.lock().used = 50;
    // Enough public room now; the urgent retry pays off the shortfall.
    assert!(space.inc_mem(20, Priority::Urgent));
    let state = space.state.lock();
    assert_eq!(state.need, 0);
    assert_eq!(state.private_quota, 0);
    assert_eq!(state.used, 70);
  }

  #[test]
  fn reservation_returns_bytes_on_drop() {
    let space = Arc::new(MemSpace::new(1000, 100));
    let reservation = space.try_reserve(300, Priority::Normal).unwrap();
    assert_eq!(space.used_bytes(), 300);
    drop(reservation);
    assert_eq!(space.used_bytes(), 0);
    assert!(space.try_reserve(2000, Priority::Normal).is_none());
  }

  #[test]
  fn blocks_are_charged_while_alive() {
    let cache = MemCache::new(1024, 100, PolicyKind::Lru, 2, 30);
    let block = cache.new_block(&[1u8; 100], BlockState::Dirty, Priority::Normal).unwrap();
    assert_eq!(cache.used_bytes(), 100);
    assert_eq!(block.data(), &[1u8; 100][..]);
    drop(block);
    assert_eq!(cache.used_bytes(), 0);
  }

  #[test]
  fn forced_touch_pins_the_block() {
    let cache = MemCache::new(1024, 100, PolicyKind::Lru, 0, 0);
    let key = BlockKey::new(7, 0);
    assert!(cache.evict_track(key, 10));
    assert!(cache.evict_touch(&key, false).is_none(), "probability is zero");

    let handle = cache.evict_touch(&key, true).unwrap();
    let mut out = Vec::new();
    cache.evict(1, &mut out);
    assert!(out.is_empty());
    drop(handle);
    cache.evict(1, &mut out);
    assert_eq!(out, vec![key]);
  }
}
