use crate::error::BoxError;

use std::sync::Arc;

/// The optional write-through half of the backing source.
///
/// When configured, every `put` and `remove` on the cache is forwarded here
/// before the cache itself changes. Failures go through the cache's error
/// boundary exactly like load failures.
pub trait CacheWriter<K, V>: Send + Sync {
  /// Persists a single value.
  fn store(&self, key: &K, value: &V) -> Result<(), BoxError>;

  /// Persists several values. Defaults to calling [`store`](Self::store) for
  /// each pair, stopping at the first failure.
  fn store_all(&self, entries: &[(K, V)]) -> Result<(), BoxError> {
    for (key, value) in entries {
      self.store(key, value)?;
    }
    Ok(())
  }

  /// Deletes the value for a single key.
  fn delete(&self, key: &K) -> Result<(), BoxError>;

  /// Deletes several keys. Defaults to calling [`delete`](Self::delete) for
  /// each key, stopping at the first failure.
  fn delete_all(&self, keys: &[K]) -> Result<(), BoxError> {
    for key in keys {
      self.delete(key)?;
    }
    Ok(())
  }
}

impl<K, V, W> CacheWriter<K, V> for Arc<W>
where
  W: CacheWriter<K, V> + ?Sized,
{
  fn store(&self, key: &K, value: &V) -> Result<(), BoxError> {
    (**self).store(key, value)
  }

  fn store_all(&self, entries: &[(K, V)]) -> Result<(), BoxError> {
    (**self).store_all(entries)
  }

  fn delete(&self, key: &K) -> Result<(), BoxError> {
    (**self).delete(key)
  }

  fn delete_all(&self, keys: &[K]) -> Result<(), BoxError> {
    (**self).delete_all(keys)
  }
}
