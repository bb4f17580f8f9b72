use std::sync::atomic::{AtomicU64, Ordering};

const WEYL_CONSTANT: u64 = 0x9E3779B97F4A7C15;

/// A fast, lock-free and non-cryptographically secure pseudo-random number
/// generator using a Weyl sequence on an atomic integer, finished with a
/// splitmix64 mixer.
///
/// Used for the probabilistic policy touches, admission and promotion checks.
#[derive(Debug)]
pub(crate) struct FastRng {
  state: AtomicU64,
}

impl FastRng {
  /// Creates a new RNG with a given seed.
  pub fn new(seed: u64) -> Self {
    Self {
      state: AtomicU64::new(if seed == 0 { 1 } else { seed }),
    }
  }

  /// Seeds the generator from the address of a stack value and the clock.
  pub fn from_entropy() -> Self {
    let marker = 0u8;
    let addr = &marker as *const u8 as u64;
    let nanos = crate::time::now_duration().as_nanos() as u64;
    Self::new(addr ^ nanos.rotate_left(17))
  }

  /// Atomically advances the Weyl sequence and mixes the new state.
  #[inline(always)]
  pub fn next_u64(&self) -> u64 {
    // fetch_add with wrap-around semantics is exactly what we need.
    let mut z = self
      .state
      .fetch_add(WEYL_CONSTANT, Ordering::Relaxed)
      .wrapping_add(WEYL_CONSTANT);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
  }

  /// Returns a value uniformly distributed in `[0, bound)`.
  #[inline]
  pub fn less_than(&self, bound: u64) -> u64 {
    if bound == 0 {
      return 0;
    }
    self.next_u64() % bound
  }

  /// Returns true with a probability of `percent` out of 100.
  #[inline]
  pub fn percent(&self, percent: u32) -> bool {
    self.less_than(100) < percent as u64
  }

  /// Returns a float uniformly distributed in `[0, 1)`.
  #[inline]
  pub fn next_f64(&self) -> f64 {
    (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
  }
}
