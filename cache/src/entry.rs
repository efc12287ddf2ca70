use crate::error::{CacheError, Result};
use crate::time::Expiration;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Where an entry stands in its load protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LoadState {
  /// No load has ever been started for this entry.
  Idle,
  /// A caller owns the load and will install its result.
  Loading,
  /// The most recent load epoch installed a value (or "no value").
  Loaded,
  /// The most recent load epoch failed.
  Failed,
}

/// The value slot of an entry.
///
/// `Loaded(None)` means the loader ran and found nothing, which is a different
/// state from `Unloaded` where nothing has been attempted yet.
pub(crate) enum Slot<V> {
  Unloaded,
  Loaded(Option<Arc<V>>),
  Failed(CacheError),
}

// Manual impl: cloning a slot only clones the `Arc`, so `V` needs no `Clone`.
impl<V> Clone for Slot<V> {
  fn clone(&self) -> Self {
    match self {
      Slot::Unloaded => Slot::Unloaded,
      Slot::Loaded(value) => Slot::Loaded(value.clone()),
      Slot::Failed(err) => Slot::Failed(err.clone()),
    }
  }
}

impl<V> Slot<V> {
  #[inline]
  pub(crate) fn value(&self) -> Option<&Arc<V>> {
    match self {
      Slot::Loaded(Some(value)) => Some(value),
      _ => None,
    }
  }

  /// `true` if the slot holds a load result a reader may be served from.
  #[inline]
  pub(crate) fn is_servable(&self) -> bool {
    matches!(self, Slot::Loaded(_))
  }

  fn to_joined(&self) -> Result<Joined<V>> {
    match self {
      Slot::Unloaded => Ok(Joined::Vacant),
      Slot::Loaded(value) => Ok(Joined::Value(value.clone())),
      Slot::Failed(err) => Err(err.clone()),
    }
  }
}

/// What a reader finds once the load it waited on is over.
pub(crate) enum Joined<V> {
  /// A load epoch published this value (or "no value").
  Value(Option<Arc<V>>),
  /// Nothing was published since the reader looked: the epoch was released,
  /// or no load was ever installed. The reader has to load for itself.
  Vacant,
}

/// The result a load owner installs when it finishes.
pub(crate) enum LoadOutcome<V> {
  Loaded {
    value: Option<Arc<V>>,
    expires_at: Expiration,
  },
  Failed(CacheError),
}

struct EntryState<V> {
  slot: Slot<V>,
  expires_at: Expiration,
  load: LoadState,
  epoch: u64,
}

/// A borrowed, read-only view of an entry handed to expiration predicates.
#[derive(Debug)]
pub struct EntryView<'a, K, V> {
  /// The entry's key.
  pub key: &'a K,
  /// The currently visible value, if any.
  pub value: Option<&'a Arc<V>>,
  /// When the entry was created, on the cache clock.
  pub created_at: Duration,
  /// The entry's current expiration deadline.
  pub expires_at: Expiration,
}

/// An owned, point-in-time copy of an entry, carried by cache events.
#[derive(Debug, Clone)]
pub struct EntrySnapshot<K, V> {
  /// The entry's key.
  pub key: K,
  /// The value at the time of the snapshot, if any.
  pub value: Option<Arc<V>>,
  /// When the entry was created, on the cache clock.
  pub created_at: Duration,
  /// The entry's expiration deadline at the time of the snapshot.
  pub expires_at: Expiration,
  /// The entry's load state at the time of the snapshot.
  pub state: LoadState,
}

/// What a reader saw when it looked at an entry without waiting.
pub(crate) struct Observation<V> {
  pub(crate) slot: Slot<V>,
  pub(crate) expires_at: Expiration,
  pub(crate) loading: bool,
  pub(crate) epoch: u64,
}

/// The unit of cached state: a key, its value slot, timestamps, and the
/// primitive that decides who loads it.
pub(crate) struct CacheEntry<K, V> {
  key: K,
  created_at: Duration,
  state: Mutex<EntryState<V>>,
  finished: Condvar,
}

impl<K, V> fmt::Debug for CacheEntry<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("CacheEntry")
      .field("created_at", &self.created_at)
      .field("expires_at", &state.expires_at)
      .field("load", &state.load)
      .field("epoch", &state.epoch)
      .finish_non_exhaustive()
  }
}

impl<K, V> CacheEntry<K, V> {
  /// Creates an empty entry that has never been loaded.
  pub(crate) fn new(key: K, created_at: Duration) -> Self {
    Self {
      key,
      created_at,
      state: Mutex::new(EntryState {
        slot: Slot::Unloaded,
        expires_at: Expiration::Never,
        load: LoadState::Idle,
        epoch: 0,
      }),
      finished: Condvar::new(),
    }
  }

  #[inline]
  pub(crate) fn key(&self) -> &K {
    &self.key
  }

  #[inline]
  pub(crate) fn created_at(&self) -> Duration {
    self.created_at
  }

  /// Looks at the entry without blocking.
  pub(crate) fn observe(&self) -> Observation<V> {
    let state = self.state.lock();
    Observation {
      slot: state.slot.clone(),
      expires_at: state.expires_at,
      loading: state.load == LoadState::Loading,
      epoch: state.epoch,
    }
  }

  #[cfg(test)]
  fn peek(&self) -> Option<Arc<V>> {
    self.state.lock().slot.value().cloned()
  }

  #[cfg(test)]
  fn is_loading(&self) -> bool {
    self.state.lock().load == LoadState::Loading
  }

  pub(crate) fn snapshot(&self) -> EntrySnapshot<K, V>
  where
    K: Clone,
  {
    let state = self.state.lock();
    EntrySnapshot {
      key: self.key.clone(),
      value: state.slot.value().cloned(),
      created_at: self.created_at,
      expires_at: state.expires_at,
      state: state.load,
    }
  }

  /// Attempts to become the owner of this entry's next load.
  ///
  /// With `clear_previous` the visible value is discarded at once, so no reader
  /// can observe it while the reload is pending.
  pub(crate) fn try_begin_load(self: &Arc<Self>, clear_previous: bool) -> Option<LoadPermit<K, V>> {
    self.begin(clear_previous, None)
  }

  /// Like [`try_begin_load`](Self::try_begin_load), but also declines when a
  /// load finished after the caller observed `epoch`. The caller should then
  /// read the fresh result instead of loading again.
  pub(crate) fn try_begin_load_since(
    self: &Arc<Self>,
    clear_previous: bool,
    epoch: u64,
  ) -> Option<LoadPermit<K, V>> {
    self.begin(clear_previous, Some(epoch))
  }

  fn begin(self: &Arc<Self>, clear_previous: bool, seen_epoch: Option<u64>) -> Option<LoadPermit<K, V>> {
    let mut state = self.state.lock();
    if state.load == LoadState::Loading {
      return None;
    }
    if seen_epoch.is_some_and(|seen| seen != state.epoch) {
      return None;
    }

    let prior = state.load;
    state.load = LoadState::Loading;
    let displaced = if clear_previous {
      Some(std::mem::replace(&mut state.slot, Slot::Unloaded))
    } else {
      None
    };

    Some(LoadPermit {
      entry: Arc::clone(self),
      prior,
      displaced,
      finished: false,
    })
  }

  /// Waits for any in-flight load to end and returns what the epochs after
  /// `seen` published.
  pub(crate) fn join(&self, seen: u64) -> Result<Joined<V>> {
    let mut state = self.state.lock();
    while Self::must_wait(&state, seen) {
      self.finished.wait(&mut state);
    }
    Self::joined(&state, seen)
  }

  /// Like [`join`](Self::join), but gives up at `deadline`.
  ///
  /// Giving up has no effect on the load owner.
  pub(crate) fn join_until(&self, seen: u64, deadline: Instant) -> Result<Joined<V>> {
    let mut state = self.state.lock();
    while Self::must_wait(&state, seen) {
      if self.finished.wait_until(&mut state, deadline).timed_out() && Self::must_wait(&state, seen) {
        return Err(CacheError::Timeout);
      }
    }
    Self::joined(&state, seen)
  }

  #[inline]
  fn joined(state: &EntryState<V>, seen: u64) -> Result<Joined<V>> {
    if state.epoch == seen {
      return Ok(Joined::Vacant);
    }
    state.slot.to_joined()
  }

  // A reader waits while a load is in flight, unless an epoch it did not see
  // has already published a servable result.
  #[inline]
  fn must_wait(state: &EntryState<V>, seen: u64) -> bool {
    state.load == LoadState::Loading && (state.epoch == seen || matches!(state.slot, Slot::Unloaded))
  }

  /// Installs a load outcome and wakes every waiter. Returns the value that was
  /// visible before the load began.
  ///
  /// # Panics
  ///
  /// Panics if the entry is not loading: finishing a load nobody owns means the
  /// coordination protocol is broken.
  fn complete(&self, outcome: LoadOutcome<V>, displaced: Option<Slot<V>>) -> Option<Arc<V>> {
    let mut state = self.state.lock();
    assert!(
      state.load == LoadState::Loading,
      "finish_load called on an entry that is not loading"
    );

    let previous = match &displaced {
      Some(slot) => slot.value().cloned(),
      None => state.slot.value().cloned(),
    };

    match outcome {
      LoadOutcome::Loaded { value, expires_at } => {
        state.slot = Slot::Loaded(value);
        state.expires_at = expires_at;
        state.load = LoadState::Loaded;
      }
      LoadOutcome::Failed(err) => {
        state.slot = Slot::Failed(err);
        state.load = LoadState::Failed;
      }
    }
    state.epoch += 1;
    drop(state);

    self.finished.notify_all();
    previous
  }

  fn restore(&self, prior: LoadState, displaced: Option<Slot<V>>) {
    let mut state = self.state.lock();
    assert!(
      state.load == LoadState::Loading,
      "release called on an entry that is not loading"
    );
    if let Some(slot) = displaced {
      state.slot = slot;
    }
    // Nothing was published, so the epoch stays and readers that observed it
    // may still claim the next load.
    state.load = prior;
    drop(state);

    self.finished.notify_all();
  }
}

/// Proof of ownership of one load epoch.
///
/// Exactly one of [`finish`](Self::finish) or [`release`](Self::release) ends
/// the epoch; both consume the permit. A permit dropped without either (the
/// owner bailed out or panicked) finishes the epoch as
/// [`CacheError::Abandoned`] so that waiters are never stranded.
pub(crate) struct LoadPermit<K, V> {
  entry: Arc<CacheEntry<K, V>>,
  prior: LoadState,
  displaced: Option<Slot<V>>,
  finished: bool,
}

impl<K, V> LoadPermit<K, V> {
  #[inline]
  pub(crate) fn entry(&self) -> &Arc<CacheEntry<K, V>> {
    &self.entry
  }

  #[inline]
  pub(crate) fn key(&self) -> &K {
    self.entry.key()
  }

  /// Installs the outcome, ends the epoch, and returns the value that was
  /// visible before the load began.
  pub(crate) fn finish(mut self, outcome: LoadOutcome<V>) -> Option<Arc<V>> {
    self.finished = true;
    let displaced = self.displaced.take();
    self.entry.complete(outcome, displaced)
  }

  /// Ends the epoch without installing anything, restoring the previous state.
  pub(crate) fn release(mut self) {
    self.finished = true;
    let displaced = self.displaced.take();
    self.entry.restore(self.prior, displaced);
  }
}

impl<K, V> Drop for LoadPermit<K, V> {
  fn drop(&mut self) {
    if !self.finished {
      let displaced = self.displaced.take();
      self.entry.complete(LoadOutcome::Failed(CacheError::Abandoned), displaced);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;

  fn entry() -> Arc<CacheEntry<&'static str, u32>> {
    Arc::new(CacheEntry::new("a", Duration::ZERO))
  }

  fn joined_value(joined: Result<Joined<u32>>) -> Option<u32> {
    match joined.unwrap() {
      Joined::Value(value) => value.map(|v| *v),
      Joined::Vacant => panic!("expected a published value"),
    }
  }

  fn loaded(value: u32) -> LoadOutcome<u32> {
    LoadOutcome::Loaded {
      value: Some(Arc::new(value)),
      expires_at: Expiration::Never,
    }
  }

  #[test]
  fn only_one_owner_per_epoch() {
    let entry = entry();
    let permit = entry.try_begin_load(false).unwrap();
    assert!(entry.try_begin_load(false).is_none());
    permit.finish(loaded(1));
    assert!(entry.try_begin_load(false).is_some());
  }

  #[test]
  fn lazy_begin_keeps_previous_value_visible() {
    let entry = entry();
    entry.try_begin_load(false).unwrap().finish(loaded(1));

    let seen = entry.observe().epoch;
    let permit = entry.try_begin_load(false).unwrap();
    assert_eq!(entry.peek().as_deref(), Some(&1));
    let previous = permit.finish(loaded(2));
    assert_eq!(previous.as_deref(), Some(&1));
    assert_eq!(joined_value(entry.join(seen)), Some(2));
  }

  #[test]
  fn strict_begin_clears_previous_value() {
    let entry = entry();
    entry.try_begin_load(false).unwrap().finish(loaded(1));

    let permit = entry.try_begin_load(true).unwrap();
    assert!(entry.peek().is_none());
    let previous = permit.finish(loaded(2));
    assert_eq!(previous.as_deref(), Some(&1));
  }

  #[test]
  fn begin_since_declines_after_a_newer_epoch() {
    let entry = entry();
    let seen = entry.observe().epoch;
    entry.try_begin_load(false).unwrap().finish(loaded(7));
    assert!(entry.try_begin_load_since(false, seen).is_none());
    let seen = entry.observe().epoch;
    assert!(entry.try_begin_load_since(false, seen).is_some());
  }

  #[test]
  fn waiter_observes_the_owner_result() {
    let entry = entry();
    let seen = entry.observe().epoch;
    let permit = entry.try_begin_load(true).unwrap();

    let reader = {
      let entry = entry.clone();
      thread::spawn(move || entry.join(seen))
    };
    thread::sleep(Duration::from_millis(50));
    permit.finish(loaded(42));

    assert_eq!(joined_value(reader.join().unwrap()), Some(42));
  }

  #[test]
  fn dropped_permit_releases_waiters_with_abandoned() {
    let entry = entry();
    let seen = entry.observe().epoch;
    let permit = entry.try_begin_load(true).unwrap();

    let reader = {
      let entry = entry.clone();
      thread::spawn(move || entry.join(seen))
    };
    thread::sleep(Duration::from_millis(50));
    drop(permit);

    assert!(matches!(reader.join().unwrap(), Err(CacheError::Abandoned)));
    assert!(!entry.is_loading());
  }

  #[test]
  fn release_restores_the_previous_state() {
    let entry = entry();
    entry.try_begin_load(false).unwrap().finish(loaded(3));
    entry.try_begin_load(false).unwrap().release();

    let observed = entry.observe();
    assert!(!observed.loading);
    assert_eq!(observed.slot.value().map(|v| **v), Some(3));
    assert_eq!(entry.snapshot().state, LoadState::Loaded);
  }

  #[test]
  fn waiter_on_a_released_epoch_is_told_nothing_was_published() {
    let entry = entry();
    let seen = entry.observe().epoch;
    let permit = entry.try_begin_load(false).unwrap();

    let reader = {
      let entry = entry.clone();
      thread::spawn(move || entry.join(seen))
    };
    thread::sleep(Duration::from_millis(50));
    permit.release();

    assert!(matches!(reader.join().unwrap(), Ok(Joined::Vacant)));
    // The released epoch can still be claimed by the reader that saw it.
    assert!(entry.try_begin_load_since(false, seen).is_some());
  }

  #[test]
  fn timed_out_wait_leaves_the_load_untouched() {
    let entry = entry();
    let seen = entry.observe().epoch;
    let permit = entry.try_begin_load(true).unwrap();

    let result = entry.join_until(seen, Instant::now() + Duration::from_millis(20));
    assert!(matches!(result, Err(CacheError::Timeout)));
    assert!(entry.is_loading());

    permit.finish(loaded(5));
    assert_eq!(joined_value(entry.join(seen)), Some(5));
  }

  #[test]
  #[should_panic(expected = "not loading")]
  fn finishing_without_ownership_panics() {
    let entry = entry();
    entry.complete(loaded(1), None);
  }
}
