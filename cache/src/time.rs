use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// The single, static reference point for `SystemClock`.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// A source of time for the cache.
///
/// Every timestamp the cache records (entry creation, expiration deadlines) and
/// every freshness decision goes through the configured clock, so tests can
/// drive expiration deterministically with a [`ManualClock`].
pub trait Clock: Send + Sync + 'static {
  /// The current time as a duration since the clock's own epoch.
  fn now(&self) -> Duration;
}

/// A monotonic clock measured from a process-wide epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  #[inline]
  fn now(&self) -> Duration {
    Instant::now().saturating_duration_since(*CACHE_EPOCH)
  }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can keep one handle and
/// give another to the cache builder.
#[derive(Clone, Default)]
pub struct ManualClock {
  nanos: Arc<AtomicU64>,
}

impl ManualClock {
  /// Creates a clock reading zero.
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a clock starting at `start`.
  pub fn starting_at(start: Duration) -> Self {
    let clock = Self::new();
    clock.set(start);
    clock
  }

  /// Moves the clock to an absolute time. Times past `u64::MAX` nanoseconds
  /// pin the clock there.
  pub fn set(&self, now: Duration) {
    self.nanos.store(saturating_nanos(now), Ordering::Release);
  }

  /// Moves the clock forward by `by`, saturating at `u64::MAX` nanoseconds.
  pub fn advance(&self, by: Duration) {
    let by = saturating_nanos(by);
    let _ = self
      .nanos
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |nanos| Some(nanos.saturating_add(by)));
  }
}

#[inline]
fn saturating_nanos(duration: Duration) -> u64 {
  u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl Clock for ManualClock {
  #[inline]
  fn now(&self) -> Duration {
    Duration::from_nanos(self.nanos.load(Ordering::Acquire))
  }
}

impl fmt::Debug for ManualClock {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ManualClock").field("now", &self.now()).finish()
  }
}

/// An absolute expiration deadline on the cache clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expiration {
  /// The entry never expires and is never refreshed by the deadline checks.
  Never,
  /// The entry expires once the clock reaches this time.
  At(Duration),
}

impl Expiration {
  /// Computes the deadline for a value written at `now` with an optional TTL.
  #[inline]
  pub fn after(now: Duration, ttl: Option<Duration>) -> Self {
    match ttl {
      Some(ttl) => Expiration::At(now.saturating_add(ttl)),
      None => Expiration::Never,
    }
  }

  /// Returns the deadline, or `None` for [`Expiration::Never`].
  #[inline]
  pub fn deadline(&self) -> Option<Duration> {
    match self {
      Expiration::Never => None,
      Expiration::At(at) => Some(*at),
    }
  }
}
