use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// The error type collaborators (loaders, writers) return.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A failure shared by every caller that observed the same load epoch.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// The cache was configured with a capacity of zero. Leave the capacity unset
  /// for an unbounded cache.
  #[error("bounded cache capacity cannot be zero")]
  ZeroCapacity,
  /// The cache was configured with zero shards, which is not allowed.
  #[error("shard count cannot be zero")]
  ZeroShards,
  /// No `CacheLoader` was configured.
  #[error("a loading cache requires a loader")]
  LoaderRequired,
}

/// Errors raised by cache operations once the error boundary has declined to
/// recover from a failure.
///
/// The type is cheap to clone: a single load failure is handed to the owning
/// caller and to every thread that was waiting on the same load.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
  /// The backing loader failed for a single key.
  #[error("failed to load value: {source}")]
  Load { source: SharedError },

  /// The bulk loader call failed as a whole.
  #[error("failed to load a batch of {keys} keys: {source}")]
  BatchLoad { keys: usize, source: SharedError },

  /// The writer failed to store one or more values.
  #[error("failed to store value: {source}")]
  Store { source: SharedError },

  /// The writer failed to delete one or more keys.
  #[error("failed to delete value: {source}")]
  Delete { source: SharedError },

  /// The caller owning the load gave up without installing a result.
  #[error("the in-flight load was abandoned by its owner")]
  Abandoned,

  /// A bounded wait for an in-flight load elapsed.
  #[error("timed out waiting for an in-flight load")]
  Timeout,
}

impl CacheError {
  /// Returns `true` if this error came out of a backing loader call.
  pub fn is_load_failure(&self) -> bool {
    matches!(self, CacheError::Load { .. } | CacheError::BatchLoad { .. })
  }
}

/// A specialized `Result` type for cache operations.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;
