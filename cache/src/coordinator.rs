//! Single-key load coordination: one caller loads, everyone else waits for
//! that caller's result.

use crate::entry::{CacheEntry, Joined, LoadOutcome, LoadPermit};
use crate::error::Result;
use crate::shared::CacheShared;

use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long a non-owning caller is willing to wait for someone else's load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
  Indefinitely,
  For(Duration),
}

/// Loads `entry` if no load finished since the caller observed `seen_epoch`
/// and nobody else is loading it; otherwise joins the load in flight (or reads
/// the result that just landed).
///
/// A joined epoch that ends without publishing anything (a rejected write, or
/// an entry dropped by maintenance) sends the caller back to claim the load
/// itself, against whatever entry the map holds for the key by then.
pub(crate) fn load_or_join<K, V, H>(
  shared: &CacheShared<K, V, H>,
  entry: &Arc<CacheEntry<K, V>>,
  seen_epoch: u64,
  wait: Wait,
) -> Result<Option<Arc<V>>>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  let deadline = match wait {
    Wait::Indefinitely => None,
    Wait::For(timeout) => Some(Instant::now() + timeout),
  };
  let clear_previous = shared.expiry.clears_previous();
  let mut entry = Arc::clone(entry);
  let mut seen = seen_epoch;

  loop {
    if let Some(permit) = entry.try_begin_load_since(clear_previous, seen) {
      return run_load(shared, permit);
    }

    let joined = match deadline {
      None => entry.join(seen)?,
      Some(deadline) => entry.join_until(seen, deadline)?,
    };
    match joined {
      Joined::Value(value) => return Ok(value),
      Joined::Vacant => {
        entry = shared.entry_for(entry.key());
        seen = entry.observe().epoch;
      }
    }
  }
}

/// Starts a new load epoch regardless of the entry's freshness, joining the
/// load in flight if there is one.
pub(crate) fn reload<K, V, H>(shared: &CacheShared<K, V, H>, entry: &Arc<CacheEntry<K, V>>) -> Result<Option<Arc<V>>>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  match entry.try_begin_load(shared.expiry.clears_previous()) {
    Some(permit) => run_load(shared, permit),
    None => load_or_join(shared, entry, entry.observe().epoch, Wait::Indefinitely),
  }
}

/// Performs the load owned by `permit` and installs its outcome.
///
/// A failure the error boundary does not recover from is installed as the
/// epoch's result, so every waiter sees it, and returned to the owner.
pub(crate) fn run_load<K, V, H>(shared: &CacheShared<K, V, H>, permit: LoadPermit<K, V>) -> Result<Option<Arc<V>>>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  shared.metrics.loads.fetch_add(1, Ordering::Relaxed);

  let loaded = match shared.loader.load(permit.key()) {
    Ok(value) => Ok(value),
    Err(error) => shared.boundary.load_failed(permit.key(), error),
  };

  match loaded {
    Ok(value) => {
      let value = value.map(Arc::new);
      let expires_at = shared.expiry.deadline_from(shared.clock.now());
      shared.install(permit, value.clone(), expires_at);
      Ok(value)
    }
    Err(err) => {
      permit.finish(LoadOutcome::Failed(err.clone()));
      Err(err)
    }
  }
}
