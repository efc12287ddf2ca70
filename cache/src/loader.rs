use crate::error::{BoxError, CacheError, Result};

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};

use parking_lot::Mutex;

/// The backing source the cache reads through to.
///
/// `load` may return `Ok(None)` when the source has no value for the key; the
/// cache remembers that answer like any other value until it expires.
pub trait CacheLoader<K, V>: Send + Sync {
  /// Loads the value for a single key.
  fn load(&self, key: &K) -> Result<Option<V>, BoxError>;

  /// Loads the values for several keys in one call.
  ///
  /// Keys missing from the returned map are treated as having no value. An
  /// `Err` aborts the whole batch. The default implementation calls
  /// [`load`](Self::load) for each key and stops at the first failure.
  fn load_all(&self, keys: &[K]) -> Result<HashMap<K, V>, BoxError>
  where
    K: Eq + Hash + Clone,
  {
    let mut loaded = HashMap::with_capacity(keys.len());
    for key in keys {
      if let Some(value) = self.load(key)? {
        loaded.insert(key.clone(), value);
      }
    }
    Ok(loaded)
  }
}

impl<K, V, L> CacheLoader<K, V> for Arc<L>
where
  L: CacheLoader<K, V> + ?Sized,
{
  fn load(&self, key: &K) -> Result<Option<V>, BoxError> {
    (**self).load(key)
  }

  fn load_all(&self, keys: &[K]) -> Result<HashMap<K, V>, BoxError>
  where
    K: Eq + Hash + Clone,
  {
    (**self).load_all(keys)
  }
}

/// Adapts a closure into a [`CacheLoader`]. Bulk loads fall back to calling
/// the closure once per key.
pub struct FnLoader<F, K, V> {
  f: F,
  _marker: PhantomData<fn(&K) -> V>,
}

impl<F, K, V> FnLoader<F, K, V>
where
  F: Fn(&K) -> Result<Option<V>, BoxError> + Send + Sync,
{
  pub fn new(f: F) -> Self {
    Self {
      f,
      _marker: PhantomData,
    }
  }
}

impl<F, K, V> CacheLoader<K, V> for FnLoader<F, K, V>
where
  F: Fn(&K) -> Result<Option<V>, BoxError> + Send + Sync,
{
  fn load(&self, key: &K) -> Result<Option<V>, BoxError> {
    (self.f)(key)
  }
}

impl<F, K, V> fmt::Debug for FnLoader<F, K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FnLoader").finish_non_exhaustive()
  }
}

/// Represents a waiter in the queue for a `LoadHandle`.
enum Waiter {
  Sync(Thread),
  Async(Waker),
}

impl Waiter {
  fn wake(self) {
    match self {
      Waiter::Sync(thread) => thread.unpark(),
      Waiter::Async(waker) => waker.wake(),
    }
  }
}

enum State<T> {
  Pending,
  Complete(Result<T>),
  Taken,
}

struct Inner<T> {
  state: State<T>,
  waiters: VecDeque<Waiter>,
}

/// The result of a cache operation that was dispatched to a
/// [`TaskSpawner`](crate::TaskSpawner).
///
/// A handle can be `.await`ed from async code or blocked on with
/// [`wait`](Self::wait). Dropping it does not cancel the operation.
#[must_use = "a load handle does nothing unless awaited or waited on"]
pub struct LoadHandle<T> {
  inner: Arc<Mutex<Inner<T>>>,
}

/// The producing half of a [`LoadHandle`]. Completes the handle with
/// [`CacheError::Abandoned`] if dropped without a result.
pub(crate) struct HandleCompleter<T> {
  inner: Arc<Mutex<Inner<T>>>,
  done: bool,
}

impl<T> LoadHandle<T> {
  /// Creates a pending handle and the completer that will resolve it.
  pub(crate) fn pending() -> (Self, HandleCompleter<T>) {
    let inner = Arc::new(Mutex::new(Inner {
      state: State::Pending,
      waiters: VecDeque::new(),
    }));
    (
      Self {
        inner: Arc::clone(&inner),
      },
      HandleCompleter { inner, done: false },
    )
  }

  /// Returns `true` once the operation has produced its result.
  pub fn is_complete(&self) -> bool {
    !matches!(self.inner.lock().state, State::Pending)
  }

  /// Blocks the current thread until the operation completes.
  pub fn wait(self) -> Result<T> {
    let mut inner = self.inner.lock();
    loop {
      match std::mem::replace(&mut inner.state, State::Taken) {
        State::Complete(result) => return result,
        State::Taken => unreachable!("load handle polled after completion"),
        State::Pending => {
          inner.state = State::Pending;
          inner.waiters.push_back(Waiter::Sync(thread::current()));
          drop(inner); // Unlock before parking.
          thread::park();
          inner = self.inner.lock();
        }
      }
    }
  }
}

impl<T> Future for LoadHandle<T> {
  type Output = Result<T>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.inner.lock();
    match std::mem::replace(&mut inner.state, State::Taken) {
      State::Complete(result) => Poll::Ready(result),
      State::Taken => panic!("load handle polled after completion"),
      State::Pending => {
        inner.state = State::Pending;
        if !inner.waiters.iter().any(|w| matches!(w, Waiter::Async(waker) if waker.will_wake(cx.waker()))) {
          inner.waiters.push_back(Waiter::Async(cx.waker().clone()));
        }
        Poll::Pending
      }
    }
  }
}

impl<T> fmt::Debug for LoadHandle<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadHandle")
      .field("complete", &self.is_complete())
      .finish()
  }
}

impl<T> HandleCompleter<T> {
  /// Completes the handle, waking all waiters.
  pub(crate) fn complete(mut self, result: Result<T>) {
    self.done = true;
    Self::resolve(&self.inner, result);
  }

  fn resolve(inner: &Mutex<Inner<T>>, result: Result<T>) {
    let mut inner = inner.lock();
    inner.state = State::Complete(result);
    for waiter in inner.waiters.drain(..) {
      waiter.wake();
    }
  }
}

impl<T> Drop for HandleCompleter<T> {
  fn drop(&mut self) {
    if !self.done {
      Self::resolve(&self.inner, Err(CacheError::Abandoned));
    }
  }
}
