use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Hit/Miss Ratios ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,

  // --- Loading ---
  pub(crate) loads: CachePadded<AtomicU64>,
  pub(crate) batch_loads: CachePadded<AtomicU64>,
  pub(crate) load_failures: CachePadded<AtomicU64>,
  pub(crate) refreshes_scheduled: CachePadded<AtomicU64>,
  pub(crate) recoveries: CachePadded<AtomicU64>,

  // --- Write Path ---
  pub(crate) stores: CachePadded<AtomicU64>,
  pub(crate) store_failures: CachePadded<AtomicU64>,
  pub(crate) removals: CachePadded<AtomicU64>,

  // --- Eviction Stats ---
  pub(crate) evictions: CachePadded<AtomicU64>,
  pub(crate) expirations: CachePadded<AtomicU64>,

  // --- Events ---
  pub(crate) events_dropped: CachePadded<AtomicU64>,

  created_at: Instant,
}

// Manual implementation of Default to handle the non-default `Instant`.
impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      loads: CachePadded::new(AtomicU64::new(0)),
      batch_loads: CachePadded::new(AtomicU64::new(0)),
      load_failures: CachePadded::new(AtomicU64::new(0)),
      refreshes_scheduled: CachePadded::new(AtomicU64::new(0)),
      recoveries: CachePadded::new(AtomicU64::new(0)),
      stores: CachePadded::new(AtomicU64::new(0)),
      store_failures: CachePadded::new(AtomicU64::new(0)),
      removals: CachePadded::new(AtomicU64::new(0)),
      evictions: CachePadded::new(AtomicU64::new(0)),
      expirations: CachePadded::new(AtomicU64::new(0)),
      events_dropped: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
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
      loads: self.loads.load(Ordering::Relaxed),
      batch_loads: self.batch_loads.load(Ordering::Relaxed),
      load_failures: self.load_failures.load(Ordering::Relaxed),
      refreshes_scheduled: self.refreshes_scheduled.load(Ordering::Relaxed),
      recoveries: self.recoveries.load(Ordering::Relaxed),
      stores: self.stores.load(Ordering::Relaxed),
      store_failures: self.store_failures.load(Ordering::Relaxed),
      removals: self.removals.load(Ordering::Relaxed),
      evictions: self.evictions.load(Ordering::Relaxed),
      expirations: self.expirations.load(Ordering::Relaxed),
      events_dropped: self.events_dropped.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
  /// Reads served from a loaded value without waiting on a load.
  pub hits: u64,
  /// Reads that had to load or wait for a load.
  pub misses: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// Single-key calls into the backing loader.
  pub loads: u64,
  /// Bulk calls into the backing loader.
  pub batch_loads: u64,
  /// Loader calls (single or bulk) that failed.
  pub load_failures: u64,
  /// Background reloads handed to the spawner.
  pub refreshes_scheduled: u64,
  /// Failures the error handler recovered from.
  pub recoveries: u64,
  /// Values written through `put`/`put_all`.
  pub stores: u64,
  /// Writer calls (store or delete) that failed.
  pub store_failures: u64,
  /// Entries removed through `remove`/`remove_all`.
  pub removals: u64,
  /// Entries removed by the eviction policy.
  pub evictions: u64,
  /// Entries purged by `cleanup`.
  pub expirations: u64,
  /// Events dropped because the listener could not keep up.
  pub events_dropped: u64,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("loads", &self.loads)
      .field("batch_loads", &self.batch_loads)
      .field("load_failures", &self.load_failures)
      .field("refreshes_scheduled", &self.refreshes_scheduled)
      .field("recoveries", &self.recoveries)
      .field("stores", &self.stores)
      .field("store_failures", &self.store_failures)
      .field("removals", &self.removals)
      .field("evictions", &self.evictions)
      .field("expirations", &self.expirations)
      .field("events_dropped", &self.events_dropped)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
