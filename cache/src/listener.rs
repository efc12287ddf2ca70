use crate::entry::EntrySnapshot;

use std::fmt;
use std::sync::Arc;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalCause {
  /// The entry was removed through `remove`, `remove_all` or `clear`.
  Invalidated,
  /// The eviction policy chose the entry to bring the cache back under capacity.
  Evicted,
  /// The entry was past its deadline when `cleanup` ran.
  Expired,
}

impl fmt::Display for RemovalCause {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RemovalCause::Invalidated => write!(f, "manually invalidated"),
      RemovalCause::Evicted => write!(f, "evicted due to capacity"),
      RemovalCause::Expired => write!(f, "expired"),
    }
  }
}

/// The kind of change a [`CacheEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  /// A read was served from a loaded value.
  Accessed,
  /// A value was installed for a key that had none.
  Added,
  /// A value replaced an earlier one.
  Changed,
  /// The entry was removed from the cache.
  Removed(RemovalCause),
}

/// A notification about one entry.
#[derive(Debug, Clone)]
pub struct CacheEvent<K, V> {
  /// Strictly increasing per cache, in delivery order.
  pub sequence: u64,
  pub kind: EventKind,
  /// The entry as it was right after the change.
  pub entry: EntrySnapshot<K, V>,
  /// For `Changed` events, the value that was replaced.
  pub previous: Option<Arc<V>>,
}

impl<K, V> CacheEvent<K, V> {
  #[inline]
  pub fn key(&self) -> &K {
    &self.entry.key
  }

  #[inline]
  pub fn value(&self) -> Option<&Arc<V>> {
    self.entry.value.as_ref()
  }
}

/// Receives cache events on a dedicated background thread.
///
/// Delivery is best-effort: the cache never waits for a listener, and events
/// are dropped (and counted in the metrics) when the listener falls behind.
pub trait EventListener<K, V>: Send + Sync {
  fn on_event(&self, event: CacheEvent<K, V>);
}

impl<K, V, F> EventListener<K, V> for F
where
  F: Fn(CacheEvent<K, V>) + Send + Sync,
{
  fn on_event(&self, event: CacheEvent<K, V>) {
    self(event)
  }
}
