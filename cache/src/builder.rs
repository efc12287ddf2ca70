use crate::boundary::{ErrorBoundary, ErrorHandler, RaiseErrors};
use crate::entry::EntryView;
use crate::error::{BoxError, BuildError};
use crate::expiry::{EntryPredicate, ExpirationPolicy, ExpirationStrategy};
use crate::handles::Cache;
use crate::listener::EventListener;
use crate::loader::{CacheLoader, FnLoader};
use crate::metrics::Metrics;
use crate::policy::null::NullPolicy;
use crate::policy::EvictionPolicy;
use crate::runtime::{TaskSpawner, ThreadSpawner};
use crate::shared::CacheShared;
use crate::store::ShardedStore;
use crate::task::notifier::Notifier;
use crate::time::{Clock, SystemClock};
use crate::writer::CacheWriter;

use core::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

/// A builder for creating [`Cache`] instances.
///
/// Every setting is fixed once [`build`](Self::build) returns.
pub struct CacheBuilder<K, V, H = ahash::RandomState> {
  time_to_live: Option<Duration>,
  refresh_window: Option<Duration>,
  strategy: ExpirationStrategy,
  expire_if: Option<EntryPredicate<K, V>>,
  refresh_if: Option<EntryPredicate<K, V>>,
  clock: Option<Arc<dyn Clock>>,
  loader: Option<Arc<dyn CacheLoader<K, V>>>,
  writer: Option<Arc<dyn CacheWriter<K, V>>>,
  error_handler: Option<Arc<dyn ErrorHandler<K, V>>>,
  listener: Option<Arc<dyn EventListener<K, V>>>,
  eviction_policy: Option<Arc<dyn EvictionPolicy<K>>>,
  capacity: Option<usize>,
  shards: usize,
  hasher: H,
  spawner: Option<Arc<dyn TaskSpawner>>,
}

// Manual Debug implementation for CacheBuilder.
impl<K, V, H> fmt::Debug for CacheBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("time_to_live", &self.time_to_live)
      .field("refresh_window", &self.refresh_window)
      .field("strategy", &self.strategy)
      .field("capacity", &self.capacity)
      .field("shards", &self.shards)
      .field("has_loader", &self.loader.is_some())
      .field("has_writer", &self.writer.is_some())
      .field("has_listener", &self.listener.is_some())
      .finish_non_exhaustive()
  }
}

// --- General Configuration Methods ---
// This impl block has no restrictive bounds on K or V.
impl<K, V, H> CacheBuilder<K, V, H> {
  /// Sets the default time-to-live applied to loaded and written values.
  ///
  /// Without it, entries never expire.
  pub fn time_to_live(mut self, duration: Duration) -> Self {
    self.time_to_live = Some(duration);
    self
  }

  /// Sets how long before expiration a read starts a background reload while
  /// still returning the current value.
  pub fn refresh_window(mut self, duration: Duration) -> Self {
    self.refresh_window = Some(duration);
    self
  }

  /// Sets how reads of expired entries behave. Defaults to
  /// [`ExpirationStrategy::Lazy`].
  pub fn strategy(mut self, strategy: ExpirationStrategy) -> Self {
    self.strategy = strategy;
    self
  }

  /// Bounds the number of entries. When exceeded, the configured eviction
  /// policy picks the entries to drop.
  pub fn capacity(mut self, capacity: usize) -> Self {
    self.capacity = Some(capacity);
    self
  }

  /// Sets the number of concurrent shards to use.
  pub fn shards(mut self, shards: usize) -> Self {
    self.shards = shards;
    self
  }

  /// Sets the hasher for the cache.
  pub fn hasher(mut self, hasher: H) -> Self {
    self.hasher = hasher;
    self
  }

  /// Sets the clock every timestamp and freshness decision is taken from.
  pub fn clock(mut self, clock: impl Clock) -> Self {
    self.clock = Some(Arc::new(clock));
    self
  }

  /// Sets the executor used for background refreshes and `get_async`.
  ///
  /// Defaults to a [`ThreadSpawner`].
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }
}

// --- Default Constructor ---
impl<K, V, H: BuildHasher + Default> CacheBuilder<K, V, H> {
  /// Creates a new `CacheBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      time_to_live: None,
      refresh_window: None,
      strategy: ExpirationStrategy::default(),
      expire_if: None,
      refresh_if: None,
      clock: None,
      loader: None,
      writer: None,
      error_handler: None,
      listener: None,
      eviction_policy: None,
      capacity: None,
      shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      hasher: H::default(),
      spawner: None,
    }
  }
}

impl<K, V> Default for CacheBuilder<K, V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

// --- Collaborators and Build ---
// Collaborators are stored as trait objects, which needs `'static` keys and values.
impl<K, V, H> CacheBuilder<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Sets the backing loader. Required.
  pub fn loader(mut self, loader: impl CacheLoader<K, V> + 'static) -> Self {
    self.loader = Some(Arc::new(loader));
    self
  }

  /// Sets a closure as the backing loader. Batch reads call it once per key.
  pub fn loader_fn<F>(self, f: F) -> Self
  where
    F: Fn(&K) -> Result<Option<V>, BoxError> + Send + Sync + 'static,
  {
    self.loader(FnLoader::new(f))
  }

  /// Sets the writer that `put` and `remove` go through before touching the
  /// cache.
  pub fn writer(mut self, writer: impl CacheWriter<K, V> + 'static) -> Self {
    self.writer = Some(Arc::new(writer));
    self
  }

  /// Sets the policy deciding which loader and writer failures are recovered.
  ///
  /// By default every failure is raised to the caller.
  pub fn error_handler(mut self, handler: impl ErrorHandler<K, V> + 'static) -> Self {
    self.error_handler = Some(Arc::new(handler));
    self
  }

  /// Sets a listener that receives cache events on a background thread.
  pub fn event_listener(mut self, listener: impl EventListener<K, V> + 'static) -> Self {
    self.listener = Some(Arc::new(listener));
    self
  }

  /// Sets the eviction policy consulted when the cache is over capacity.
  ///
  /// By default nothing is evicted, so a capacity without a policy is only a
  /// nominal bound.
  pub fn eviction_policy(mut self, policy: impl EvictionPolicy<K> + 'static) -> Self {
    self.eviction_policy = Some(Arc::new(policy));
    self
  }

  /// Treats entries as expired whenever `predicate` returns `true`, regardless
  /// of their deadline.
  pub fn expire_if<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&EntryView<'_, K, V>, Duration) -> bool + Send + Sync + 'static,
  {
    self.expire_if = Some(Arc::new(predicate));
    self
  }

  /// Marks entries as due for a background reload whenever `predicate` returns
  /// `true`. Only consulted when a refresh window is set.
  pub fn refresh_if<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&EntryView<'_, K, V>, Duration) -> bool + Send + Sync + 'static,
  {
    self.refresh_if = Some(Arc::new(predicate));
    self
  }

  /// Builds the cache.
  pub fn build(self) -> Result<Cache<K, V, H>, BuildError> {
    self.validate()?;
    let loader = self.loader.ok_or(BuildError::LoaderRequired)?;

    debug!(
      shards = self.shards,
      capacity = ?self.capacity,
      time_to_live = ?self.time_to_live,
      refresh_window = ?self.refresh_window,
      strategy = ?self.strategy,
      has_writer = self.writer.is_some(),
      has_listener = self.listener.is_some(),
      "building loading cache"
    );

    let metrics = Arc::new(Metrics::new());

    let mut expiry = ExpirationPolicy::new(self.time_to_live, self.refresh_window, self.strategy);
    if let Some(predicate) = self.expire_if {
      expiry = expiry.with_expire_if(predicate);
    }
    if let Some(predicate) = self.refresh_if {
      expiry = expiry.with_refresh_if(predicate);
    }

    let handler = self.error_handler.unwrap_or_else(|| Arc::new(RaiseErrors));
    let notifier = self
      .listener
      .map(|listener| Notifier::spawn(listener, Arc::clone(&metrics)));

    let shared = CacheShared {
      store: ShardedStore::new(self.shards.next_power_of_two(), self.hasher),
      expiry,
      clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
      loader,
      writer: self.writer,
      boundary: ErrorBoundary::new(handler, Arc::clone(&metrics)),
      notifier,
      eviction_policy: self.eviction_policy.unwrap_or_else(|| Arc::new(NullPolicy)),
      capacity: self.capacity,
      spawner: self.spawner.unwrap_or_else(|| Arc::new(ThreadSpawner)),
      metrics,
    };

    Ok(Cache {
      shared: Arc::new(shared),
    })
  }

  /// Validates the builder configuration.
  fn validate(&self) -> Result<(), BuildError> {
    if self.capacity == Some(0) {
      return Err(BuildError::ZeroCapacity);
    }
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    if self.loader.is_none() {
      return Err(BuildError::LoaderRequired);
    }
    Ok(())
  }
}
