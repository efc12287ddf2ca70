//! Batch load coordination.
//!
//! A batch claims every requested key it can, asks the bulk loader for exactly
//! those keys, and only then joins the loads other callers already had in
//! flight for the rest.

use crate::coordinator::{self, Wait};
use crate::entry::{CacheEntry, LoadOutcome, LoadPermit};
use crate::error::Result;
use crate::shared::CacheShared;

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// One entry a batch wants loaded.
pub(crate) struct BatchRequest<K, V> {
  pub(crate) entry: Arc<CacheEntry<K, V>>,
  /// The epoch the caller saw when it decided the entry needs a load, or
  /// `None` to force a new epoch even if a load finished in the meantime.
  pub(crate) seen_epoch: Option<u64>,
}

/// Loads a batch of distinct entries. The result maps every requested key to
/// its value, `None` meaning the loader had no value for it.
pub(crate) fn load_batch<K, V, H>(
  shared: &CacheShared<K, V, H>,
  requests: Vec<BatchRequest<K, V>>,
) -> Result<HashMap<K, Option<Arc<V>>>>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  let clear_previous = shared.expiry.clears_previous();
  let mut owned: Vec<LoadPermit<K, V>> = Vec::with_capacity(requests.len());
  let mut waiting: Vec<(Arc<CacheEntry<K, V>>, u64)> = Vec::new();

  for request in requests {
    let permit = match request.seen_epoch {
      Some(epoch) => request.entry.try_begin_load_since(clear_previous, epoch),
      None => request.entry.try_begin_load(clear_previous),
    };
    match permit {
      Some(permit) => owned.push(permit),
      None => {
        let seen = match request.seen_epoch {
          Some(epoch) => epoch,
          None => request.entry.observe().epoch,
        };
        waiting.push((request.entry, seen));
      }
    }
  }

  let mut results = HashMap::with_capacity(owned.len() + waiting.len());

  if !owned.is_empty() {
    let keys: Vec<K> = owned.iter().map(|permit| permit.key().clone()).collect();
    shared.metrics.batch_loads.fetch_add(1, Ordering::Relaxed);

    let loaded = match shared.loader.load_all(&keys) {
      Ok(loaded) => Ok(loaded),
      Err(error) => shared.boundary.batch_load_failed(&keys, error),
    };

    match loaded {
      Ok(mut loaded) => {
        let expires_at = shared.expiry.deadline_from(shared.clock.now());
        // Every owned key is finished here, including the ones the loader
        // left out; their waiters would otherwise never wake.
        for (permit, key) in owned.into_iter().zip(keys) {
          let value = loaded.remove(&key).map(Arc::new);
          shared.install(permit, value.clone(), expires_at);
          results.insert(key, value);
        }
      }
      Err(err) => {
        for permit in owned {
          permit.finish(LoadOutcome::Failed(err.clone()));
        }
        return Err(err);
      }
    }
  }

  // A key whose owner ended without publishing falls back to a single-key
  // load here.
  for (entry, seen) in waiting {
    let value = coordinator::load_or_join(shared, &entry, seen, Wait::Indefinitely)?;
    results.insert(entry.key().clone(), value);
  }

  Ok(results)
}
