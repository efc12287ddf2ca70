use crate::coordinator::Wait;
use crate::error::Result;
use crate::loader::LoadHandle;
use crate::shared::CacheShared;
use crate::time::Expiration;
use crate::MetricsSnapshot;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

/// A thread-safe loading cache.
///
/// Reads go through the configured loader on a miss; concurrent reads of the
/// same key share one load. Cloning a `Cache` is cheap and every clone
/// refers to the same entries.
pub struct Cache<K: Send, V: Send + Sync, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<K, V, H>>,
}

impl<K: Send, V: Send + Sync, H> Clone for Cache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<K: Send, V: Send + Sync, H> fmt::Debug for Cache<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Cache").field("shared", &self.shared).finish()
  }
}

impl<K, V, H> Cache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Returns the value for `key`, loading it if needed.
  ///
  /// `Ok(None)` means the loader has no value for the key. If another caller
  /// is already loading the key, this call waits for that load instead of
  /// starting its own.
  pub fn get(&self, key: &K) -> Result<Option<Arc<V>>> {
    self.shared.get(key, Wait::Indefinitely)
  }

  /// Like [`get`](Self::get), but waits at most `timeout` for a load started
  /// by someone else. Loads this call starts itself always run to completion.
  ///
  /// Returns [`CacheError::Timeout`](crate::CacheError::Timeout) if the wait
  /// elapses. The in-flight load is not affected.
  pub fn get_timeout(&self, key: &K, timeout: Duration) -> Result<Option<Arc<V>>> {
    self.shared.get(key, Wait::For(timeout))
  }

  /// Runs [`get`](Self::get) on the configured spawner.
  ///
  /// The returned handle can be awaited or blocked on.
  pub fn get_async(&self, key: K) -> LoadHandle<Option<Arc<V>>> {
    let (handle, completer) = LoadHandle::pending();
    let shared = Arc::clone(&self.shared);
    self.shared.spawner.spawn(Box::new(move || {
      completer.complete(shared.get(&key, Wait::Indefinitely));
    }));
    handle
  }

  /// Returns the values for several keys. Keys the loader has no value for
  /// are absent from the result.
  ///
  /// Keys that can be served as they are never reach the loader. All others
  /// are loaded with a single bulk call, minus any keys another caller is
  /// already loading.
  pub fn get_all<I>(&self, keys: I) -> Result<HashMap<K, Arc<V>>>
  where
    I: IntoIterator<Item = K>,
  {
    self.shared.get_all(keys)
  }

  /// Reloads `key` now, ignoring whatever is cached, and returns the result.
  pub fn load(&self, key: &K) -> Result<Option<Arc<V>>> {
    self.shared.load(key)
  }

  /// Reloads every key with a single bulk call.
  pub fn load_all<I>(&self, keys: I) -> Result<HashMap<K, Arc<V>>>
  where
    I: IntoIterator<Item = K>,
  {
    self.shared.load_all(keys)
  }

  /// Starts a background reload of `key`. The current value, if any, stays
  /// visible until the reload lands.
  ///
  /// Returns `false` if the key is already being loaded.
  pub fn refresh(&self, key: &K) -> bool {
    let entry = self.shared.entry_for(key);
    self.shared.schedule_refresh(&entry, false)
  }

  /// Writes `value` through the writer and caches it with the default
  /// time-to-live.
  pub fn put(&self, key: K, value: V) -> Result<()> {
    let expires_at = self.shared.expiry.deadline_from(self.shared.clock.now());
    self.shared.put(key, value, expires_at)
  }

  /// Like [`put`](Self::put), with a time-to-live for this value only.
  pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration) -> Result<()> {
    let expires_at = Expiration::after(self.shared.clock.now(), Some(ttl));
    self.shared.put(key, value, expires_at)
  }

  /// Writes all values through the writer in one call and caches them.
  pub fn put_all<I>(&self, entries: I) -> Result<()>
  where
    I: IntoIterator<Item = (K, V)>,
  {
    self.shared.put_all(entries.into_iter().collect())
  }

  /// Deletes `key` through the writer and drops it from the cache.
  ///
  /// Returns whether the cache held an entry for the key.
  pub fn remove(&self, key: &K) -> Result<bool> {
    self.shared.remove(key)
  }

  /// Deletes several keys through the writer in one call. Returns how many of
  /// them the cache held.
  pub fn remove_all<I>(&self, keys: I) -> Result<usize>
  where
    I: IntoIterator<Item = K>,
  {
    self.shared.remove_all(keys.into_iter().collect())
  }

  /// Returns the cached value without loading, refreshing or emitting events.
  ///
  /// Expired values are not returned.
  pub fn peek(&self, key: &K) -> Option<Arc<V>> {
    self.shared.peek(key)
  }

  /// Returns `true` if [`peek`](Self::peek) would return a value.
  pub fn contains_key(&self, key: &K) -> bool {
    self.peek(key).is_some()
  }

  /// The number of entries, including entries that are loading, expired or
  /// hold no value.
  pub fn len(&self) -> usize {
    self.shared.store.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Drops every entry. The writer is not called.
  pub fn clear(&self) {
    self.shared.clear();
  }

  /// Drops expired entries and entries whose last load failed. Returns how
  /// many were dropped.
  pub fn cleanup(&self) -> usize {
    self.shared.cleanup()
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }
}
