#![cfg(feature = "tokio")]

mod common;

use common::{builder, Gate, TestLoader};
use fibre_loading_cache::{CacheError, ManualClock, TokioSpawner};

use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_get_on_tokio_blocking_pool() {
  let loader = TestLoader::new();
  let cache = builder(&loader, &ManualClock::new())
    .spawner(Arc::new(TokioSpawner::new()))
    .build()
    .unwrap();

  let value = cache.get_async(1).await.unwrap().unwrap();
  assert_eq!(*value, "1#1");

  // Served from the cache this time.
  let value = cache.get_async(1).await.unwrap().unwrap();
  assert_eq!(*value, "1#1");
  assert_eq!(loader.loads(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_gets_join_one_load() {
  let gate = Gate::closed();
  let loader = TestLoader::gated(gate.clone());
  let cache = builder(&loader, &ManualClock::new())
    .spawner(Arc::new(TokioSpawner::new()))
    .build()
    .unwrap();

  let first = cache.get_async(9);
  let second = cache.get_async(9);
  let opener = {
    let gate = gate.clone();
    tokio::task::spawn_blocking(move || {
      gate.wait_for_entries(1);
      gate.open();
    })
  };

  let (first, second) = tokio::join!(first, second);
  opener.await.unwrap();

  assert_eq!(*first.unwrap().unwrap(), "9#1");
  assert_eq!(*second.unwrap().unwrap(), "9#1");
  assert_eq!(loader.loads(), 1);
}

#[test]
fn test_async_handle_can_be_waited_on() {
  let loader = TestLoader::new();
  let cache = builder(&loader, &ManualClock::new()).build().unwrap();

  let handle = cache.get_async(2);
  assert_eq!(*handle.wait().unwrap().unwrap(), "2#1");
}

#[test]
fn test_async_handle_with_futures_executor() {
  let loader = TestLoader::failing();
  let cache = builder(&loader, &ManualClock::new()).build().unwrap();

  let result = futures_executor::block_on(cache.get_async(3));
  assert!(matches!(result, Err(CacheError::Load { .. })));
}
