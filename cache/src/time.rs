use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

// The single, static reference point for all expiry calculations in the cache.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Returns the time elapsed since the cache epoch.
#[inline]
pub(crate) fn now_duration() -> Duration {
  Instant::now().saturating_duration_since(*CACHE_EPOCH)
}

/// Returns the current monotonic time in whole seconds since the cache epoch.
///
/// Expiry timestamps stored in a `CacheEntry` use this clock.
#[inline]
pub fn now_secs() -> u64 {
  now_duration().as_secs()
}

/// Converts a relative TTL into an absolute expiry timestamp.
/// A TTL of zero means "never expires" and maps to `0`.
#[inline]
pub(crate) fn expire_at(ttl_seconds: u64) -> u64 {
  if ttl_seconds == 0 {
    return 0;
  }
  now_secs().saturating_add(ttl_seconds)
}
