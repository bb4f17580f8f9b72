use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Lookups ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,

  // --- Throughput ---
  pub(crate) writes: CachePadded<AtomicU64>,
  pub(crate) removes: CachePadded<AtomicU64>,

  // --- Tier movement ---
  pub(crate) mem_evictions: CachePadded<AtomicU64>,
  pub(crate) disk_evictions: CachePadded<AtomicU64>,
  pub(crate) flushes: CachePadded<AtomicU64>,
  pub(crate) promotions: CachePadded<AtomicU64>,

  pub(crate) allocation_failures: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      writes: CachePadded::new(AtomicU64::new(0)),
      removes: CachePadded::new(AtomicU64::new(0)),
      mem_evictions: CachePadded::new(AtomicU64::new(0)),
      disk_evictions: CachePadded::new(AtomicU64::new(0)),
      flushes: CachePadded::new(AtomicU64::new(0)),
      promotions: CachePadded::new(AtomicU64::new(0)),
      allocation_failures: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

/// Tier usage sampled at snapshot time.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TierUsage {
  pub mem_used_bytes: u64,
  pub mem_quota_bytes: u64,
  pub disk_used_bytes: u64,
  pub disk_quota_bytes: u64,
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn incr(counter: &CachePadded<AtomicU64>) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self, usage: TierUsage) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      writes: self.writes.load(Ordering::Relaxed),
      removes: self.removes.load(Ordering::Relaxed),
      mem_evictions: self.mem_evictions.load(Ordering::Relaxed),
      disk_evictions: self.disk_evictions.load(Ordering::Relaxed),
      flushes: self.flushes.load(Ordering::Relaxed),
      promotions: self.promotions.load(Ordering::Relaxed),
      allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
      mem_used_bytes: usage.mem_used_bytes,
      mem_quota_bytes: usage.mem_quota_bytes,
      disk_used_bytes: usage.disk_used_bytes,
      disk_quota_bytes: usage.disk_quota_bytes,
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// Successful `get`/`read` calls.
  pub hits: u64,
  /// `get`/`read` calls that ended in not-found.
  pub misses: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// Objects written by `set`.
  pub writes: u64,
  /// Objects removed by `remove` or TTL expiry.
  pub removes: u64,
  /// Memory blocks chosen as eviction victims.
  pub mem_evictions: u64,
  /// Objects whose disk blocks were evicted.
  pub disk_evictions: u64,
  /// Memory blocks written to disk on eviction.
  pub flushes: u64,
  /// Disk blocks copied into memory on read.
  pub promotions: u64,
  /// Allocations that failed after every eviction round.
  pub allocation_failures: u64,
  pub mem_used_bytes: u64,
  pub mem_quota_bytes: u64,
  pub disk_used_bytes: u64,
  pub disk_quota_bytes: u64,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("writes", &self.writes)
      .field("removes", &self.removes)
      .field("mem_evictions", &self.mem_evictions)
      .field("disk_evictions", &self.disk_evictions)
      .field("flushes", &self.flushes)
      .field("promotions", &self.promotions)
      .field("allocation_failures", &self.allocation_failures)
      .field("mem", &format!("{}/{}", self.mem_used_bytes, self.mem_quota_bytes))
      .field("disk", &format!("{}/{}", self.disk_used_bytes, self.disk_quota_bytes))
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
