//! The error boundary: the one place that decides what a failed load, store or
//! delete turns into, and the one place that logs it.

use crate::error::{BoxError, CacheError, Result, SharedError};
use crate::metrics::Metrics;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

/// What an [`ErrorHandler`] wants done with a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery<T> {
  /// Carry on as if the operation had succeeded with this result.
  Recover(T),
  /// Give up; the caller receives the failure wrapped in a [`CacheError`].
  Raise,
}

/// A failure type handed to error handlers.
pub type FailureRef<'a> = &'a (dyn StdError + Send + Sync + 'static);

/// Policy consulted at every failure point in the cache.
///
/// Every method defaults to [`Recovery::Raise`]. Implementations override the
/// cases they can recover from: returning a substitute value for a load, a
/// substitute map for a batch, or `Recover(())` to suppress a write failure.
/// Handlers should not log; the cache logs every failure it routes here.
pub trait ErrorHandler<K, V>: Send + Sync {
  /// A single-key load failed.
  fn on_load_error(&self, key: &K, error: FailureRef<'_>) -> Recovery<Option<V>> {
    let _ = (key, error);
    Recovery::Raise
  }

  /// A bulk load failed as a whole. `keys` are exactly the keys that were
  /// requested from the loader.
  fn on_batch_load_error(&self, keys: &[K], error: FailureRef<'_>) -> Recovery<HashMap<K, V>> {
    let _ = (keys, error);
    Recovery::Raise
  }

  /// Storing one or more values failed.
  fn on_store_error(&self, keys: &[&K], error: FailureRef<'_>) -> Recovery<()> {
    let _ = (keys, error);
    Recovery::Raise
  }

  /// Deleting one or more keys failed.
  fn on_delete_error(&self, keys: &[&K], error: FailureRef<'_>) -> Recovery<()> {
    let _ = (keys, error);
    Recovery::Raise
  }
}

/// The default handler: every failure is raised to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct RaiseErrors;

impl<K, V> ErrorHandler<K, V> for RaiseErrors {}

/// Logs and swallows every failure. Failed loads become "no value", failed
/// writes are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuppressErrors;

impl<K, V> ErrorHandler<K, V> for SuppressErrors {
  fn on_load_error(&self, _key: &K, _error: FailureRef<'_>) -> Recovery<Option<V>> {
    Recovery::Recover(None)
  }

  fn on_batch_load_error(&self, _keys: &[K], _error: FailureRef<'_>) -> Recovery<HashMap<K, V>> {
    Recovery::Recover(HashMap::new())
  }

  fn on_store_error(&self, _keys: &[&K], _error: FailureRef<'_>) -> Recovery<()> {
    Recovery::Recover(())
  }

  fn on_delete_error(&self, _keys: &[&K], _error: FailureRef<'_>) -> Recovery<()> {
    Recovery::Recover(())
  }
}

/// Substitutes a fallback value computed from the key for failed loads.
/// Write failures are raised.
pub struct FallbackHandler<F, K, V> {
  fallback: F,
  _marker: PhantomData<fn(&K) -> V>,
}

impl<F, K, V> FallbackHandler<F, K, V>
where
  F: Fn(&K) -> Option<V> + Send + Sync,
{
  pub fn new(fallback: F) -> Self {
    Self {
      fallback,
      _marker: PhantomData,
    }
  }
}

impl<F, K, V> ErrorHandler<K, V> for FallbackHandler<F, K, V>
where
  F: Fn(&K) -> Option<V> + Send + Sync,
  K: Eq + Hash + Clone,
{
  fn on_load_error(&self, key: &K, _error: FailureRef<'_>) -> Recovery<Option<V>> {
    Recovery::Recover((self.fallback)(key))
  }

  fn on_batch_load_error(&self, keys: &[K], _error: FailureRef<'_>) -> Recovery<HashMap<K, V>> {
    let substitutes = keys
      .iter()
      .filter_map(|key| (self.fallback)(key).map(|value| (key.clone(), value)))
      .collect();
    Recovery::Recover(substitutes)
  }
}

impl<F, K, V> fmt::Debug for FallbackHandler<F, K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FallbackHandler").finish_non_exhaustive()
  }
}

/// Routes collaborator failures through the configured [`ErrorHandler`],
/// logs them, and wraps unrecovered ones in [`CacheError`].
pub(crate) struct ErrorBoundary<K, V> {
  handler: Arc<dyn ErrorHandler<K, V>>,
  metrics: Arc<Metrics>,
}

impl<K, V> fmt::Debug for ErrorBoundary<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ErrorBoundary").finish_non_exhaustive()
  }
}

impl<K, V> ErrorBoundary<K, V> {
  pub(crate) fn new(handler: Arc<dyn ErrorHandler<K, V>>, metrics: Arc<Metrics>) -> Self {
    Self { handler, metrics }
  }

  pub(crate) fn load_failed(&self, key: &K, error: BoxError) -> Result<Option<V>> {
    self.metrics.load_failures.fetch_add(1, Ordering::Relaxed);
    let source: SharedError = Arc::from(error);
    match self.handler.on_load_error(key, &*source) {
      Recovery::Recover(substitute) => {
        self.metrics.recoveries.fetch_add(1, Ordering::Relaxed);
        debug!(error = %source, substituted = substitute.is_some(), "recovered from cache load failure");
        Ok(substitute)
      }
      Recovery::Raise => {
        warn!(error = %source, "cache load failed");
        Err(CacheError::Load { source })
      }
    }
  }

  pub(crate) fn batch_load_failed(&self, keys: &[K], error: BoxError) -> Result<HashMap<K, V>> {
    self.metrics.load_failures.fetch_add(1, Ordering::Relaxed);
    let source: SharedError = Arc::from(error);
    match self.handler.on_batch_load_error(keys, &*source) {
      Recovery::Recover(substitutes) => {
        self.metrics.recoveries.fetch_add(1, Ordering::Relaxed);
        debug!(
          error = %source,
          keys = keys.len(),
          substituted = substitutes.len(),
          "recovered from cache batch load failure"
        );
        Ok(substitutes)
      }
      Recovery::Raise => {
        warn!(error = %source, keys = keys.len(), "cache batch load failed");
        Err(CacheError::BatchLoad {
          keys: keys.len(),
          source,
        })
      }
    }
  }

  pub(crate) fn store_failed(&self, keys: &[&K], error: BoxError) -> Result<()> {
    self.metrics.store_failures.fetch_add(1, Ordering::Relaxed);
    let source: SharedError = Arc::from(error);
    match self.handler.on_store_error(keys, &*source) {
      Recovery::Recover(()) => {
        self.metrics.recoveries.fetch_add(1, Ordering::Relaxed);
        debug!(error = %source, keys = keys.len(), "suppressed cache store failure");
        Ok(())
      }
      Recovery::Raise => {
        warn!(error = %source, keys = keys.len(), "cache store failed");
        Err(CacheError::Store { source })
      }
    }
  }

  pub(crate) fn delete_failed(&self, keys: &[&K], error: BoxError) -> Result<()> {
    self.metrics.store_failures.fetch_add(1, Ordering::Relaxed);
    let source: SharedError = Arc::from(error);
    match self.handler.on_delete_error(keys, &*source) {
      Recovery::Recover(()) => {
        self.metrics.recoveries.fetch_add(1, Ordering::Relaxed);
        debug!(error = %source, keys = keys.len(), "suppressed cache delete failure");
        Ok(())
      }
      Recovery::Raise => {
        warn!(error = %source, keys = keys.len(), "cache delete failed");
        Err(CacheError::Delete { source })
      }
    }
  }
}
