use crate::rng::FastRng;

/// What to do with a dirty memory block chosen for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAdmission {
  /// Write the block to the disk tier, then drop the memory copy.
  Flush,
  /// Keep the block in memory and track it again.
  Skip,
  /// Drop the block without persisting it.
  Delete,
}

/// Decides whether evicted memory blocks are worth persisting, based on the
/// size of the object they belong to.
///
/// Objects at least `max_check_size` bytes large are always flushed. Smaller
/// objects are flushed or deleted with a probability proportional to their
/// size, so small objects mostly stay in memory.
#[derive(Debug)]
pub struct SizeBasedAdmission {
  max_check_size: u64,
  flush_probability: f64,
  delete_probability: f64,
  rng: FastRng,
}

impl SizeBasedAdmission {
  pub fn new(max_check_size: u64, flush_probability: f64, delete_probability: f64) -> Self {
    Self {
      max_check_size,
      flush_probability,
      delete_probability,
      rng: FastRng::from_entropy(),
    }
  }

  /// Decides the fate of a block of an object of `object_size` bytes, given
  /// the current disk quota.
  pub fn check_admission(&self, object_size: u64, disk_quota_bytes: u64) -> BlockAdmission {
    if disk_quota_bytes == 0 {
      return BlockAdmission::Delete;
    }
    if object_size >= self.max_check_size {
      return BlockAdmission::Flush;
    }

    let size_ratio = object_size as f64 / self.max_check_size as f64;
    let probability = self.rng.next_f64();
    if probability < size_ratio * self.flush_probability {
      return BlockAdmission::Flush;
    }
    if probability < size_ratio * self.delete_probability {
      return BlockAdmission::Delete;
    }
    BlockAdmission::Skip
  }
}
