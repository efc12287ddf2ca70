//! A concurrent loading cache that reads through to a backing source.
//!
//! # Features
//! - **Single-flight loads**: concurrent reads of the same key share one call
//!   into the loader; everyone else waits for that call's result.
//! - **Batch loads**: `get_all` sends all unusable keys to the loader in one
//!   bulk call, skipping keys another caller is already loading.
//! - **Expiration**: per-entry deadlines with `Lazy` (serve stale, refresh in
//!   the background) or `Strict` (never serve expired values) strategies, plus
//!   a refresh window that reloads entries before they expire.
//! - **Error boundary**: one pluggable `ErrorHandler` decides which loader and
//!   writer failures are recovered; failures are shared with every waiter.
//! - **Write-through**: an optional `CacheWriter` sees every `put` and `remove`.
//! - **Observability**: cache events for a listener thread, and metrics.

// Public modules that form the API
pub mod boundary;
pub mod builder;
pub mod error;
pub mod expiry;
pub mod handles;
pub mod listener;
pub mod loader;
pub mod metrics;
pub mod policy;
pub mod runtime;
pub mod time;
pub mod writer;

// Internal, crate-only modules
mod batch;
mod coordinator;
mod entry;
mod shared;
mod store;
mod task;

// Re-export the primary user-facing types for convenience
pub use boundary::{ErrorHandler, FallbackHandler, FailureRef, RaiseErrors, Recovery, SuppressErrors};
pub use builder::CacheBuilder;
pub use entry::{EntrySnapshot, EntryView, LoadState};
pub use error::{BoxError, BuildError, CacheError, Result};
pub use expiry::{EntryPredicate, ExpirationPolicy, ExpirationStrategy, Freshness};
pub use handles::Cache;
pub use listener::{CacheEvent, EventKind, EventListener, RemovalCause};
pub use loader::{CacheLoader, FnLoader, LoadHandle};
pub use metrics::MetricsSnapshot;
pub use policy::null::NullPolicy;
pub use policy::EvictionPolicy;
#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
pub use runtime::{InlineSpawner, TaskSpawner, ThreadSpawner};
pub use time::{Clock, Expiration, ManualClock, SystemClock};
pub use writer::CacheWriter;
