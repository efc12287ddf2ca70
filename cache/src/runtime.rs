use std::thread;

/// A unit of blocking work handed to a [`TaskSpawner`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// An executor for work the cache does off the caller's thread: background
/// refreshes and reads started with `get_async`.
///
/// Tasks call the backing loader, so they may block.
pub trait TaskSpawner: Send + Sync + 'static {
  /// Runs the task at some point, on some thread.
  fn spawn(&self, task: Task);
}

/// Runs every task on a fresh OS thread. This is the default spawner.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSpawner;

impl TaskSpawner for ThreadSpawner {
  fn spawn(&self, task: Task) {
    thread::spawn(task);
  }
}

/// Runs each task on the calling thread before returning.
///
/// Useful in tests, and for callers that want refreshes to happen inline.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineSpawner;

impl TaskSpawner for InlineSpawner {
  fn spawn(&self, task: Task) {
    task();
  }
}

/// Runs tasks on a Tokio runtime's blocking pool.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone)]
pub struct TokioSpawner(tokio::runtime::Handle);

#[cfg(feature = "tokio")]
impl TokioSpawner {
  /// Creates a spawner that uses the current Tokio runtime context.
  /// Panics if called outside of a Tokio runtime.
  pub fn new() -> Self {
    Self(tokio::runtime::Handle::current())
  }

  /// Creates a spawner for an explicit runtime handle.
  pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

#[cfg(feature = "tokio")]
impl TaskSpawner for TokioSpawner {
  fn spawn(&self, task: Task) {
    self.0.spawn_blocking(task);
  }
}
