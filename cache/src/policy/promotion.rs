use crate::rng::FastRng;

/// Where a freshly written block should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLocation {
  Mem,
  Disk,
  /// Both tiers are overloaded; the write is rejected.
  None,
}

/// Places new blocks in memory while it has headroom and on disk after
/// that, and decides whether blocks read from disk are copied back into
/// memory.
#[derive(Debug)]
pub struct CapacityBasedPromotion {
  // Percent of the memory quota above which new blocks go to disk.
  mem_threshold: u64,
  // Percent chance that an eligible disk read is promoted.
  probability: u32,
  rng: FastRng,
}

impl CapacityBasedPromotion {
  pub fn new(mem_threshold: u64, probability: u32) -> Self {
    Self {
      mem_threshold,
      probability,
      rng: FastRng::from_entropy(),
    }
  }

  /// Chooses the first location of a block from the tier usage.
  pub fn check_write(
    &self,
    mem_used_bytes: u64,
    mem_quota_bytes: u64,
    disk_quota_bytes: u64,
  ) -> BlockLocation {
    if disk_quota_bytes == 0 {
      return BlockLocation::Mem;
    }
    if self.below_threshold(mem_used_bytes, mem_quota_bytes) && !self.is_mem_overloaded() {
      return BlockLocation::Mem;
    }
    if !self.is_disk_overloaded() {
      return BlockLocation::Disk;
    }
    BlockLocation::None
  }

  /// Returns true if a block just read from disk should be copied into
  /// memory.
  pub fn check_promote(&self, mem_used_bytes: u64, mem_quota_bytes: u64) -> bool {
    if self.is_mem_overloaded() || !self.below_threshold(mem_used_bytes, mem_quota_bytes) {
      return false;
    }
    self.rng.percent(self.probability)
  }

  fn below_threshold(&self, used: u64, quota: u64) -> bool {
    if quota == 0 {
      return false;
    }
    (used as u128 * 100 / quota as u128) < self.mem_threshold as u128
  }

  // TODO: report overload from pending memory releases once those are tracked.
  fn is_mem_overloaded(&self) -> bool {
    false
  }

  // TODO: report overload from disk latency once the engine exposes it.
  fn is_disk_overloaded(&self) -> bool {
    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn memory_only_without_disk() {
    let promotion = CapacityBasedPromotion::new(80, 30);
    assert_eq!(promotion.check_write(100, 100, 0), BlockLocation::Mem);
  }

  #[test]
  fn switches_to_disk_above_threshold() {
    let promotion = CapacityBasedPromotion::new(80, 30);
    assert_eq!(promotion.check_write(79, 100, 1000), BlockLocation::Mem);
    assert_eq!(promotion.check_write(80, 100, 1000), BlockLocation::Disk);
    assert_eq!(promotion.check_write(100, 100, 1000), BlockLocation::Disk);
  }

  #[test]
  fn promotion_respects_probability_and_threshold() {
    let always = CapacityBasedPromotion::new(80, 100);
    let never = CapacityBasedPromotion::new(80, 0);
    for _ in 0..100 {
      assert!(always.check_promote(10, 100));
      assert!(!always.check_promote(90, 100));
      assert!(!never.check_promote(10, 100));
    }
  }
}
