//! The expiration policy: a pure decision about whether a cached value can be
//! served as-is, served while a background refresh runs, or must be reloaded.

use crate::entry::EntryView;
use crate::time::Expiration;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A user predicate over an entry and the current clock time.
pub type EntryPredicate<K, V> = Arc<dyn Fn(&EntryView<'_, K, V>, Duration) -> bool + Send + Sync>;

/// How the cache reacts to entries that are due for a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExpirationStrategy {
  /// Never block a reader that has a value to return. Expired and refresh-due
  /// entries are reloaded in the background while the old value is served.
  #[default]
  Lazy,
  /// Never serve an expired value. Reads of expired entries wait for the
  /// reload, and a reload in flight hides the previous value from readers.
  Strict,
}

/// The outcome of classifying an entry against the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
  /// The value can be served as-is.
  Fresh,
  /// The value can be served, but a background reload should start.
  NeedsRefresh,
  /// The value is past its deadline.
  Expired,
}

/// The cache-wide expiration configuration and the decision function built on it.
///
/// Constructed once by the builder and shared read-only by every entry.
pub struct ExpirationPolicy<K, V> {
  time_to_live: Option<Duration>,
  refresh_window: Option<Duration>,
  strategy: ExpirationStrategy,
  expire_if: Option<EntryPredicate<K, V>>,
  refresh_if: Option<EntryPredicate<K, V>>,
}

impl<K, V> fmt::Debug for ExpirationPolicy<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExpirationPolicy")
      .field("time_to_live", &self.time_to_live)
      .field("refresh_window", &self.refresh_window)
      .field("strategy", &self.strategy)
      .field("has_expire_if", &self.expire_if.is_some())
      .field("has_refresh_if", &self.refresh_if.is_some())
      .finish()
  }
}

impl<K, V> Default for ExpirationPolicy<K, V> {
  fn default() -> Self {
    Self::new(None, None, ExpirationStrategy::Lazy)
  }
}

impl<K, V> ExpirationPolicy<K, V> {
  /// Creates a policy without custom predicates.
  pub fn new(
    time_to_live: Option<Duration>,
    refresh_window: Option<Duration>,
    strategy: ExpirationStrategy,
  ) -> Self {
    Self {
      time_to_live,
      refresh_window,
      strategy,
      expire_if: None,
      refresh_if: None,
    }
  }

  /// Adds a predicate that forces entries to be treated as expired.
  pub fn with_expire_if(mut self, predicate: EntryPredicate<K, V>) -> Self {
    self.expire_if = Some(predicate);
    self
  }

  /// Adds a predicate that marks entries as due for refresh. It is only
  /// consulted when a refresh window is configured.
  pub fn with_refresh_if(mut self, predicate: EntryPredicate<K, V>) -> Self {
    self.refresh_if = Some(predicate);
    self
  }

  /// The TTL applied to values that do not specify their own.
  #[inline]
  pub fn time_to_live(&self) -> Option<Duration> {
    self.time_to_live
  }

  #[inline]
  pub fn refresh_window(&self) -> Option<Duration> {
    self.refresh_window
  }

  #[inline]
  pub fn strategy(&self) -> ExpirationStrategy {
    self.strategy
  }

  /// Whether a load under this policy must hide the previous value.
  #[inline]
  pub(crate) fn clears_previous(&self) -> bool {
    self.strategy == ExpirationStrategy::Strict
  }

  /// The deadline for a value loaded or written at `now` with the default TTL.
  #[inline]
  pub(crate) fn deadline_from(&self, now: Duration) -> Expiration {
    Expiration::after(now, self.time_to_live)
  }

  /// Classifies an entry at clock time `now`.
  ///
  /// The custom expiration predicate wins over everything. Otherwise entries
  /// that never expire are always fresh; the deadline check is inclusive; and
  /// the refresh window covers `[deadline - window, deadline)`.
  pub fn classify(&self, entry: &EntryView<'_, K, V>, now: Duration) -> Freshness {
    if let Some(expire_if) = &self.expire_if {
      if expire_if(entry, now) {
        return Freshness::Expired;
      }
    }

    let deadline = match entry.expires_at {
      Expiration::Never => return Freshness::Fresh,
      Expiration::At(deadline) => deadline,
    };

    if now >= deadline {
      return Freshness::Expired;
    }

    if let Some(window) = self.refresh_window {
      let forced = self.refresh_if.as_ref().is_some_and(|refresh_if| refresh_if(entry, now));
      if forced || now >= deadline.saturating_sub(window) {
        return Freshness::NeedsRefresh;
      }
    }

    Freshness::Fresh
  }
}
