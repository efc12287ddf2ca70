pub mod null;

/// A pluggable eviction policy.
///
/// The cache reports entries coming and going and, whenever the number of
/// entries exceeds the configured capacity, asks the policy which keys to
/// evict. The cache itself has no opinion on which entries are worth keeping.
pub trait EvictionPolicy<K>: Send + Sync {
  /// A new entry was created for `key`.
  fn on_insert(&self, key: &K);

  /// A read was served for `key`.
  fn on_access(&self, key: &K);

  /// `key` left the cache, for whatever reason.
  fn on_remove(&self, key: &K);

  /// The cache holds `overflow` entries more than its capacity.
  ///
  /// Returns the keys to evict. Returning fewer keys leaves the cache over
  /// capacity until the next insertion asks again.
  fn victims(&self, overflow: usize) -> Vec<K>;

  /// Forget all tracked keys.
  fn clear(&self) {}
}
