use crate::policy::EvictionPolicy;

/// A default "no-op" eviction policy for unbounded caches.
/// It tracks nothing and never evicts anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPolicy;

impl<K> EvictionPolicy<K> for NullPolicy {
  fn on_insert(&self, _key: &K) {}

  fn on_access(&self, _key: &K) {}

  fn on_remove(&self, _key: &K) {}

  fn victims(&self, _overflow: usize) -> Vec<K> {
    Vec::new()
  }
}
