#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fibre_loading_cache::{BoxError, CacheBuilder, CacheLoader, CacheWriter, ManualClock};
use parking_lot::{Condvar, Mutex};

/// Keys at or above this value have no value in the backing source.
pub const ABSENT_FROM: u32 = 1000;

// Holds loads back until the test opens it. A gate starts out open.
#[derive(Default)]
pub struct Gate {
  closed: Mutex<bool>,
  opened: Condvar,
  entered: AtomicUsize,
}

impl Gate {
  pub fn closed() -> Arc<Self> {
    let gate = Self::default();
    *gate.closed.lock() = true;
    Arc::new(gate)
  }

  pub fn close(&self) {
    *self.closed.lock() = true;
  }

  pub fn open(&self) {
    *self.closed.lock() = false;
    self.opened.notify_all();
  }

  /// Number of loads that have reached the gate so far.
  pub fn entered(&self) -> usize {
    self.entered.load(Ordering::SeqCst)
  }

  pub fn wait_for_entries(&self, count: usize) {
    assert!(
      eventually(Duration::from_secs(5), || self.entered() >= count),
      "expected {count} loads to reach the gate, saw {}",
      self.entered()
    );
  }

  fn pass(&self) {
    self.entered.fetch_add(1, Ordering::SeqCst);
    let mut closed = self.closed.lock();
    while *closed {
      self.opened.wait(&mut closed);
    }
  }
}

// A loader producing "<key>#<n>" for the n-th single load and "<key>#batch"
// for bulk loads.
pub struct TestLoader {
  loads: AtomicUsize,
  batches: Mutex<Vec<Vec<u32>>>,
  gate: Arc<Gate>,
  failing: AtomicBool,
}

impl TestLoader {
  pub fn new() -> Arc<Self> {
    Self::gated(Arc::new(Gate::default()))
  }

  pub fn gated(gate: Arc<Gate>) -> Arc<Self> {
    Arc::new(Self {
      loads: AtomicUsize::new(0),
      batches: Mutex::new(Vec::new()),
      gate,
      failing: AtomicBool::new(false),
    })
  }

  pub fn failing() -> Arc<Self> {
    let loader = Self::new();
    loader.set_failing(true);
    loader
  }

  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Number of single-key loads so far.
  pub fn loads(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }

  /// The keys of every bulk load so far, each batch sorted.
  pub fn batches(&self) -> Vec<Vec<u32>> {
    self.batches.lock().clone()
  }

  fn check(&self) -> Result<(), BoxError> {
    if self.failing.load(Ordering::SeqCst) {
      return Err("backing store unavailable".into());
    }
    Ok(())
  }
}

impl CacheLoader<u32, String> for TestLoader {
  fn load(&self, key: &u32) -> Result<Option<String>, BoxError> {
    let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
    self.gate.pass();
    self.check()?;
    if *key >= ABSENT_FROM {
      return Ok(None);
    }
    Ok(Some(format!("{key}#{n}")))
  }

  fn load_all(&self, keys: &[u32]) -> Result<HashMap<u32, String>, BoxError> {
    let mut batch = keys.to_vec();
    batch.sort_unstable();
    self.batches.lock().push(batch);
    self.gate.pass();
    self.check()?;
    Ok(
      keys
        .iter()
        .filter(|key| **key < ABSENT_FROM)
        .map(|key| (*key, format!("{key}#batch")))
        .collect(),
    )
  }
}

#[derive(Default)]
pub struct RecordingWriter {
  pub stored: Mutex<Vec<(u32, String)>>,
  pub deleted: Mutex<Vec<u32>>,
  pub store_all_calls: AtomicUsize,
  gate: Arc<Gate>,
  failing: AtomicBool,
}

impl RecordingWriter {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// A writer whose single-key stores wait at `gate`.
  pub fn gated(gate: Arc<Gate>) -> Arc<Self> {
    Arc::new(Self {
      gate,
      ..Self::default()
    })
  }

  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  fn check(&self) -> Result<(), BoxError> {
    if self.failing.load(Ordering::SeqCst) {
      return Err("write rejected".into());
    }
    Ok(())
  }
}

impl CacheWriter<u32, String> for RecordingWriter {
  fn store(&self, key: &u32, value: &String) -> Result<(), BoxError> {
    self.gate.pass();
    self.check()?;
    self.stored.lock().push((*key, value.clone()));
    Ok(())
  }

  fn store_all(&self, entries: &[(u32, String)]) -> Result<(), BoxError> {
    self.store_all_calls.fetch_add(1, Ordering::SeqCst);
    self.check()?;
    self.stored.lock().extend(entries.iter().cloned());
    Ok(())
  }

  fn delete(&self, key: &u32) -> Result<(), BoxError> {
    self.check()?;
    self.deleted.lock().push(*key);
    Ok(())
  }
}

/// A builder wired to `loader` and a manual clock, with a small shard count.
pub fn builder(loader: &Arc<TestLoader>, clock: &ManualClock) -> CacheBuilder<u32, String> {
  CacheBuilder::default()
    .loader(Arc::clone(loader))
    .clock(clock.clone())
    .shards(4)
}

pub fn ms(n: u64) -> Duration {
  Duration::from_millis(n)
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    thread::sleep(Duration::from_millis(5));
  }
  condition()
}
