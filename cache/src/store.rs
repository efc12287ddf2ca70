use crate::entry::CacheEntry;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

type Shard<K, V, H> = RwLock<HashMap<K, Arc<CacheEntry<K, V>>, H>>;

/// A key → entry map partitioned into multiple, independently locked shards.
///
/// Only the "which entry belongs to this key" question is answered under a
/// shard lock. Loads happen on the entry itself, outside any shard lock, so a
/// slow load never blocks unrelated keys.
pub(crate) struct ShardedStore<K, V, H> {
  shards: Box<[CachePadded<Shard<K, V, H>>]>,
  hasher: H,
  len: CachePadded<AtomicUsize>,
}

impl<K, V, H> fmt::Debug for ShardedStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl<K, V, H> ShardedStore<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Creates a new `ShardedStore` with the specified number of shards and hasher.
  pub(crate) fn new(num_shards: usize, hasher: H) -> Self {
    let shards = (0..num_shards)
      .map(|_| CachePadded::new(RwLock::new(HashMap::with_hasher(hasher.clone()))))
      .collect::<Vec<_>>()
      .into_boxed_slice();

    Self {
      shards,
      hasher,
      len: CachePadded::new(AtomicUsize::new(0)),
    }
  }

  #[inline]
  fn shard(&self, key: &K) -> &Shard<K, V, H> {
    // The builder guarantees at least one shard.
    let index = self.hasher.hash_one(key) as usize % self.shards.len();
    &self.shards[index]
  }

  pub(crate) fn get(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
    self.shard(key).read().get(key).cloned()
  }

  /// Returns the entry for `key`, creating it with `make` if there is none.
  ///
  /// Concurrent first accesses agree on a single entry: creation happens under
  /// the shard's write lock. The flag is `true` if this call created it.
  pub(crate) fn get_or_insert_with(
    &self,
    key: &K,
    make: impl FnOnce() -> CacheEntry<K, V>,
  ) -> (Arc<CacheEntry<K, V>>, bool)
  where
    K: Clone,
  {
    let shard = self.shard(key);
    if let Some(entry) = shard.read().get(key) {
      return (Arc::clone(entry), false);
    }

    let mut guard = shard.write();
    // Another thread may have created the entry between the two locks.
    if let Some(entry) = guard.get(key) {
      return (Arc::clone(entry), false);
    }
    let entry = Arc::new(make());
    guard.insert(key.clone(), Arc::clone(&entry));
    self.len.fetch_add(1, Ordering::Relaxed);
    (entry, true)
  }

  pub(crate) fn remove(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
    let removed = self.shard(key).write().remove(key);
    if removed.is_some() {
      self.len.fetch_sub(1, Ordering::Relaxed);
    }
    removed
  }

  /// Removes `entry` only if it is still the one mapped to its key.
  pub(crate) fn remove_entry(&self, entry: &Arc<CacheEntry<K, V>>) -> bool {
    let mut guard = self.shard(entry.key()).write();
    let is_current = guard
      .get(entry.key())
      .is_some_and(|current| Arc::ptr_eq(current, entry));
    if is_current {
      guard.remove(entry.key());
      self.len.fetch_sub(1, Ordering::Relaxed);
    }
    is_current
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.len.load(Ordering::Relaxed)
  }

  /// Returns a point-in-time copy of every entry, shard by shard.
  pub(crate) fn entries(&self) -> Vec<Arc<CacheEntry<K, V>>> {
    let mut entries = Vec::new();
    for shard in self.shards.iter() {
      entries.extend(shard.read().values().cloned());
    }
    entries
  }

  /// Empties every shard and returns what was in them.
  pub(crate) fn drain(&self) -> Vec<Arc<CacheEntry<K, V>>> {
    let mut drained = Vec::new();
    for shard in self.shards.iter() {
      let mut guard = shard.write();
      self.len.fetch_sub(guard.len(), Ordering::Relaxed);
      drained.extend(guard.drain().map(|(_, entry)| entry));
    }
    drained
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Barrier;
  use std::thread;
  use std::time::Duration;

  fn store() -> ShardedStore<u32, String, ahash::RandomState> {
    ShardedStore::new(4, ahash::RandomState::new())
  }

  #[test]
  fn concurrent_first_access_creates_one_entry() {
    let store = Arc::new(store());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let store = store.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
          barrier.wait();
          store.get_or_insert_with(&1, || CacheEntry::new(1, Duration::ZERO))
        })
      })
      .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);
    assert!(results.windows(2).all(|pair| Arc::ptr_eq(&pair[0].0, &pair[1].0)));
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn remove_entry_ignores_replaced_entries() {
    let store = store();
    let (old, _) = store.get_or_insert_with(&1, || CacheEntry::new(1, Duration::ZERO));
    store.remove(&1);
    let (new, created) = store.get_or_insert_with(&1, || CacheEntry::new(1, Duration::ZERO));
    assert!(created);

    assert!(!store.remove_entry(&old));
    assert!(store.remove_entry(&new));
    assert_eq!(store.len(), 0);
  }

  #[test]
  fn drain_empties_all_shards() {
    let store = store();
    for key in 0..10 {
      store.get_or_insert_with(&key, || CacheEntry::new(key, Duration::ZERO));
    }
    assert_eq!(store.entries().len(), 10);
    assert_eq!(store.drain().len(), 10);
    assert_eq!(store.len(), 0);
  }
}
