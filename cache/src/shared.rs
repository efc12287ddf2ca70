use crate::batch::{self, BatchRequest};
use crate::boundary::ErrorBoundary;
use crate::coordinator::{self, Wait};
use crate::entry::{CacheEntry, EntryView, LoadOutcome, LoadPermit, Observation, Slot};
use crate::error::Result;
use crate::expiry::{ExpirationPolicy, ExpirationStrategy, Freshness};
use crate::listener::{EventKind, RemovalCause};
use crate::loader::CacheLoader;
use crate::metrics::Metrics;
use crate::policy::EvictionPolicy;
use crate::store::ShardedStore;
use crate::task::notifier::Notifier;
use crate::runtime::TaskSpawner;
use crate::time::{Clock, Expiration};
use crate::writer::CacheWriter;

use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ahash::{HashSet, HashSetExt};

/// The internal, thread-safe core of the cache.
pub(crate) struct CacheShared<K: Send, V: Send + Sync, H> {
  pub(crate) store: ShardedStore<K, V, H>,
  pub(crate) expiry: ExpirationPolicy<K, V>,
  pub(crate) clock: Arc<dyn Clock>,
  pub(crate) loader: Arc<dyn CacheLoader<K, V>>,
  pub(crate) writer: Option<Arc<dyn CacheWriter<K, V>>>,
  pub(crate) boundary: ErrorBoundary<K, V>,
  pub(crate) notifier: Option<Notifier<K, V>>,
  pub(crate) eviction_policy: Arc<dyn EvictionPolicy<K>>,
  pub(crate) capacity: Option<usize>,
  pub(crate) spawner: Arc<dyn TaskSpawner>,
  pub(crate) metrics: Arc<Metrics>,
}

impl<K: Send, V: Send + Sync, H> fmt::Debug for CacheShared<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("capacity", &self.capacity)
      .field("expiry", &self.expiry)
      .field("has_writer", &self.writer.is_some())
      .field("has_listener", &self.notifier.is_some())
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  // --- Entries ---

  /// Returns the entry for `key`, creating it on first reference.
  pub(crate) fn entry_for(&self, key: &K) -> Arc<CacheEntry<K, V>> {
    let (entry, created) = self
      .store
      .get_or_insert_with(key, || CacheEntry::new(key.clone(), self.clock.now()));
    if created {
      self.eviction_policy.on_insert(key);
      self.enforce_capacity();
    }
    entry
  }

  fn enforce_capacity(&self) {
    let Some(capacity) = self.capacity else {
      return;
    };
    let len = self.store.len();
    if len <= capacity {
      return;
    }
    for key in self.eviction_policy.victims(len - capacity) {
      if let Some(entry) = self.store.remove(&key) {
        self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
        self.removed(&entry, RemovalCause::Evicted);
      }
    }
  }

  fn removed(&self, entry: &Arc<CacheEntry<K, V>>, cause: RemovalCause) {
    self.eviction_policy.on_remove(entry.key());
    self.emit(EventKind::Removed(cause), entry, None);
  }

  /// Finishes a load epoch with a value and reports the change.
  pub(crate) fn install(&self, permit: LoadPermit<K, V>, value: Option<Arc<V>>, expires_at: Expiration) {
    let entry = Arc::clone(permit.entry());
    let has_value = value.is_some();
    let previous = permit.finish(LoadOutcome::Loaded { value, expires_at });
    match (previous, has_value) {
      (None, false) => {}
      (None, true) => self.emit(EventKind::Added, &entry, None),
      (previous @ Some(_), _) => self.emit(EventKind::Changed, &entry, previous),
    }
  }

  #[inline]
  fn emit(&self, kind: EventKind, entry: &CacheEntry<K, V>, previous: Option<Arc<V>>) {
    if let Some(notifier) = &self.notifier {
      notifier.emit(kind, entry.snapshot(), previous);
    }
  }

  fn classify(&self, entry: &CacheEntry<K, V>, observed: &Observation<V>, now: Duration) -> Freshness {
    let view = EntryView {
      key: entry.key(),
      value: observed.slot.value(),
      created_at: entry.created_at(),
      expires_at: observed.expires_at,
    };
    self.expiry.classify(&view, now)
  }

  // --- Read Path ---

  /// Reads `key`, loading it if the expiration policy says it is unusable.
  pub(crate) fn get(self: &Arc<Self>, key: &K, wait: Wait) -> Result<Option<Arc<V>>> {
    let entry = self.entry_for(key);
    let observed = entry.observe();
    if let Some(value) = self.try_serve(&entry, &observed) {
      self.metrics.hits.fetch_add(1, Ordering::Relaxed);
      return Ok(value);
    }

    self.metrics.misses.fetch_add(1, Ordering::Relaxed);
    coordinator::load_or_join(self, &entry, observed.epoch, wait)
  }

  /// Returns the visible value without loading, unless it has expired.
  pub(crate) fn peek(&self, key: &K) -> Option<Arc<V>> {
    let entry = self.store.get(key)?;
    let observed = entry.observe();
    let value = observed.slot.value()?;
    match self.classify(&entry, &observed, self.clock.now()) {
      Freshness::Expired => None,
      _ => Some(Arc::clone(value)),
    }
  }

  /// Decides whether what the reader observed can be returned without
  /// waiting, and starts a background refresh when the policy asks for one.
  ///
  /// Returns `None` when the caller has to load (or wait for a load).
  fn try_serve(self: &Arc<Self>, entry: &Arc<CacheEntry<K, V>>, observed: &Observation<V>) -> Option<Option<Arc<V>>> {
    if !observed.slot.is_servable() {
      return None;
    }

    match (self.classify(entry, observed, self.clock.now()), self.expiry.strategy()) {
      (Freshness::Fresh, _) => {}
      // The value being served stays visible while the refresh runs.
      (Freshness::NeedsRefresh, _) | (Freshness::Expired, ExpirationStrategy::Lazy) => {
        self.schedule_refresh(entry, false);
      }
      (Freshness::Expired, ExpirationStrategy::Strict) => return None,
    }

    self.eviction_policy.on_access(entry.key());
    self.emit(EventKind::Accessed, entry, None);
    Some(observed.slot.value().cloned())
  }

  /// Claims the entry's next load and hands it to the spawner. Does nothing
  /// if a load is already in flight.
  pub(crate) fn schedule_refresh(self: &Arc<Self>, entry: &Arc<CacheEntry<K, V>>, clear_previous: bool) -> bool {
    let Some(permit) = entry.try_begin_load(clear_previous) else {
      return false;
    };
    self.metrics.refreshes_scheduled.fetch_add(1, Ordering::Relaxed);

    let shared = Arc::clone(self);
    self.spawner.spawn(Box::new(move || {
      // Nobody is waiting on the result; the boundary has already seen any
      // failure.
      let _ = coordinator::run_load(&shared, permit);
    }));
    true
  }

  /// Reads several keys. Keys that are usable are served directly; the rest
  /// are loaded as one batch. Keys without a value are left out.
  pub(crate) fn get_all(self: &Arc<Self>, keys: impl IntoIterator<Item = K>) -> Result<HashMap<K, Arc<V>>> {
    let mut seen = HashSet::new();
    let mut found = HashMap::new();
    let mut pending = Vec::new();

    for key in keys {
      if !seen.insert(key.clone()) {
        continue;
      }
      let entry = self.entry_for(&key);
      let observed = entry.observe();
      match self.try_serve(&entry, &observed) {
        Some(value) => {
          self.metrics.hits.fetch_add(1, Ordering::Relaxed);
          if let Some(value) = value {
            found.insert(key, value);
          }
        }
        None => {
          self.metrics.misses.fetch_add(1, Ordering::Relaxed);
          pending.push(BatchRequest {
            entry,
            seen_epoch: Some(observed.epoch),
          });
        }
      }
    }

    if !pending.is_empty() {
      let loaded = batch::load_batch(self, pending)?;
      found.extend(loaded.into_iter().filter_map(|(key, value)| value.map(|value| (key, value))));
    }
    Ok(found)
  }

  /// Forces a new load epoch for `key`.
  pub(crate) fn load(&self, key: &K) -> Result<Option<Arc<V>>> {
    let entry = self.entry_for(key);
    coordinator::reload(self, &entry)
  }

  /// Forces a new load epoch for every distinct key, as one batch.
  pub(crate) fn load_all(&self, keys: impl IntoIterator<Item = K>) -> Result<HashMap<K, Arc<V>>> {
    let mut seen = HashSet::new();
    let requests = keys
      .into_iter()
      .filter(|key| seen.insert(key.clone()))
      .map(|key| BatchRequest {
        entry: self.entry_for(&key),
        seen_epoch: None,
      })
      .collect::<Vec<_>>();

    let loaded = batch::load_batch(self, requests)?;
    Ok(
      loaded
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key, value)))
        .collect(),
    )
  }

  // --- Write Path ---

  /// Waits until this caller owns the entry's next epoch.
  fn acquire(&self, entry: &Arc<CacheEntry<K, V>>) -> LoadPermit<K, V> {
    loop {
      let seen = entry.observe().epoch;
      if let Some(permit) = entry.try_begin_load(false) {
        return permit;
      }
      // The outcome of someone else's load does not matter here, only that
      // it finished.
      let _ = entry.join(seen);
    }
  }

  /// Writes a value through the writer, then installs it.
  ///
  /// The entry's load permit is held across the writer call, so loads and
  /// other writes of the same key queue behind it.
  pub(crate) fn put(&self, key: K, value: V, expires_at: Expiration) -> Result<()> {
    let entry = self.entry_for(&key);
    let permit = self.acquire(&entry);

    if let Some(writer) = &self.writer {
      if let Err(error) = writer.store(&key, &value) {
        if let Err(err) = self.boundary.store_failed(&[&key], error) {
          permit.release();
          return Err(err);
        }
      }
    }

    self.metrics.stores.fetch_add(1, Ordering::Relaxed);
    self.install(permit, Some(Arc::new(value)), expires_at);
    Ok(())
  }

  /// Writes all values through the writer in one call, then installs them.
  ///
  /// Entries are claimed one at a time after the writer call; holding several
  /// permits at once could deadlock against another batch write.
  pub(crate) fn put_all(&self, entries: Vec<(K, V)>) -> Result<()> {
    if entries.is_empty() {
      return Ok(());
    }
    if let Some(writer) = &self.writer {
      if let Err(error) = writer.store_all(&entries) {
        let keys: Vec<&K> = entries.iter().map(|(key, _)| key).collect();
        self.boundary.store_failed(&keys, error)?;
      }
    }

    let expires_at = self.expiry.deadline_from(self.clock.now());
    for (key, value) in entries {
      let entry = self.entry_for(&key);
      let permit = self.acquire(&entry);
      self.metrics.stores.fetch_add(1, Ordering::Relaxed);
      self.install(permit, Some(Arc::new(value)), expires_at);
    }
    Ok(())
  }

  /// Deletes `key` through the writer, then drops its entry.
  pub(crate) fn remove(&self, key: &K) -> Result<bool> {
    if let Some(writer) = &self.writer {
      if let Err(error) = writer.delete(key) {
        self.boundary.delete_failed(&[key], error)?;
      }
    }
    Ok(self.evict_key(key))
  }

  pub(crate) fn remove_all(&self, keys: Vec<K>) -> Result<usize> {
    if keys.is_empty() {
      return Ok(0);
    }
    if let Some(writer) = &self.writer {
      if let Err(error) = writer.delete_all(&keys) {
        let refs: Vec<&K> = keys.iter().collect();
        self.boundary.delete_failed(&refs, error)?;
      }
    }
    Ok(keys.iter().filter(|key| self.evict_key(key)).count())
  }

  fn evict_key(&self, key: &K) -> bool {
    match self.store.remove(key) {
      Some(entry) => {
        self.metrics.removals.fetch_add(1, Ordering::Relaxed);
        self.removed(&entry, RemovalCause::Invalidated);
        true
      }
      None => false,
    }
  }

  // --- Maintenance ---

  /// Drops every entry without touching the writer.
  pub(crate) fn clear(&self) {
    for entry in self.store.drain() {
      self.emit(EventKind::Removed(RemovalCause::Invalidated), &entry, None);
    }
    self.eviction_policy.clear();
  }

  /// Drops expired entries and entries whose last load failed. Entries with a
  /// load in flight are left alone. Returns the number of entries dropped.
  pub(crate) fn cleanup(&self) -> usize {
    let now = self.clock.now();
    let mut purged = 0;

    for entry in self.store.entries() {
      // Holding the entry's permit keeps readers from starting a load on it
      // between the check and the removal.
      let Some(permit) = entry.try_begin_load(false) else {
        continue;
      };
      let observed = entry.observe();
      let expired =
        observed.slot.is_servable() && self.classify(&entry, &observed, now) == Freshness::Expired;
      let failed = matches!(observed.slot, Slot::Failed(_));
      let dropped = (expired || failed) && self.store.remove_entry(&entry);
      permit.release();

      if dropped {
        purged += 1;
        if expired {
          self.metrics.expirations.fetch_add(1, Ordering::Relaxed);
          self.removed(&entry, RemovalCause::Expired);
        } else {
          self.eviction_policy.on_remove(entry.key());
        }
      }
    }
    purged
  }
}
