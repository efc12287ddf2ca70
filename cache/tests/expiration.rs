mod common;

use common::{builder, eventually, ms, Gate, TestLoader};
use fibre_loading_cache::{ExpirationStrategy, InlineSpawner, ManualClock};

use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_deadline_is_inclusive_under_strict() {
  let loader = TestLoader::new();
  let clock = ManualClock::new();
  let cache = builder(&loader, &clock)
    .time_to_live(ms(100))
    .strategy(ExpirationStrategy::Strict)
    .build()
    .unwrap();

  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#1");

  clock.set(ms(99));
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#1");
  assert_eq!(loader.loads(), 1);

  clock.set(ms(100));
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#2");
  assert_eq!(loader.loads(), 2);
}

#[test]
fn test_entries_without_ttl_never_expire() {
  let loader = TestLoader::new();
  let clock = ManualClock::new();
  let cache = builder(&loader, &clock)
    .refresh_window(ms(10))
    .strategy(ExpirationStrategy::Strict)
    .build()
    .unwrap();

  cache.get(&1).unwrap();
  clock.set(Duration::from_secs(60 * 60 * 24 * 365));
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#1");
  assert_eq!(loader.loads(), 1);
  assert_eq!(cache.metrics().refreshes_scheduled, 0);
}

#[test]
fn test_lazy_serves_stale_value_and_refreshes() {
  let loader = TestLoader::new();
  let clock = ManualClock::new();
  let cache = builder(&loader, &clock)
    .time_to_live(ms(100))
    .spawner(Arc::new(InlineSpawner))
    .build()
    .unwrap();

  cache.get(&1).unwrap();
  clock.set(ms(150));

  // The inline spawner finishes the refresh before `get` returns, but the read
  // still answers with what it observed.
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#1");
  assert_eq!(loader.loads(), 2);
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#2");
  assert_eq!(cache.metrics().refreshes_scheduled, 1);
}

#[test]
fn test_refresh_window_under_lazy() {
  let gate = Gate::closed();
  gate.open();
  let loader = TestLoader::gated(gate.clone());
  let clock = ManualClock::new();
  let cache = builder(&loader, &clock)
    .time_to_live(ms(100))
    .refresh_window(ms(20))
    .strategy(ExpirationStrategy::Lazy)
    .build()
    .unwrap();

  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#1");
  gate.close();

  // Inside the window: the old value comes back and a reload starts.
  clock.set(ms(85));
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#1");
  gate.wait_for_entries(2);
  assert_eq!(cache.metrics().refreshes_scheduled, 1);

  // At the deadline the reload is still held back, and lazy reads do not wait
  // for it.
  clock.set(ms(100));
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#1");
  assert_eq!(cache.metrics().refreshes_scheduled, 1);

  gate.open();
  assert!(eventually(Duration::from_secs(5), || {
    cache.peek(&1).is_some_and(|value| *value == "1#2")
  }));
  assert_eq!(loader.loads(), 2);
}

#[test]
fn test_strict_read_of_expired_entry_waits_for_reload() {
  let gate = Gate::closed();
  gate.open();
  let loader = TestLoader::gated(gate.clone());
  let clock = ManualClock::new();
  let cache = builder(&loader, &clock)
    .time_to_live(ms(100))
    .refresh_window(ms(20))
    .strategy(ExpirationStrategy::Strict)
    .build()
    .unwrap();

  cache.get(&1).unwrap();
  gate.close();
  clock.set(ms(100));

  let reader = {
    let cache = cache.clone();
    thread::spawn(move || cache.get(&1))
  };
  gate.wait_for_entries(2);
  thread::sleep(ms(50));
  assert!(!reader.is_finished(), "strict read returned before the reload finished");

  gate.open();
  assert_eq!(*reader.join().unwrap().unwrap().unwrap(), "1#2");
}

#[test]
fn test_strict_refresh_window_serves_current_value() {
  let gate = Gate::closed();
  gate.open();
  let loader = TestLoader::gated(gate.clone());
  let clock = ManualClock::new();
  let cache = builder(&loader, &clock)
    .time_to_live(ms(100))
    .refresh_window(ms(20))
    .strategy(ExpirationStrategy::Strict)
    .build()
    .unwrap();

  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#1");
  gate.close();

  // Not expired yet: the read answers at once while the reload is held back.
  clock.set(ms(85));
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#1");
  gate.wait_for_entries(2);
  assert_eq!(cache.metrics().refreshes_scheduled, 1);

  // The value stays visible for the rest of the window.
  assert_eq!(cache.peek(&1).as_deref().map(String::as_str), Some("1#1"));
  clock.set(ms(95));
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#1");
  assert_eq!(cache.metrics().refreshes_scheduled, 1);

  gate.open();
  assert!(eventually(Duration::from_secs(5), || {
    cache.peek(&1).is_some_and(|value| *value == "1#2")
  }));
  assert_eq!(loader.loads(), 2);
}

#[test]
fn test_strict_reload_hides_previous_value() {
  let gate = Gate::closed();
  gate.open();
  let loader = TestLoader::gated(gate.clone());
  let clock = ManualClock::new();
  let cache = builder(&loader, &clock)
    .time_to_live(ms(100))
    .strategy(ExpirationStrategy::Strict)
    .build()
    .unwrap();

  cache.get(&1).unwrap();
  gate.close();
  let reloader = {
    let cache = cache.clone();
    thread::spawn(move || cache.load(&1))
  };
  gate.wait_for_entries(2);

  assert_eq!(cache.peek(&1), None);
  assert!(!cache.refresh(&1), "a reload is already in flight");

  gate.open();
  assert_eq!(*reloader.join().unwrap().unwrap().unwrap(), "1#2");
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#2");
}

#[test]
fn test_refresh_keeps_value_visible() {
  let gate = Gate::closed();
  gate.open();
  let loader = TestLoader::gated(gate.clone());
  let clock = ManualClock::new();
  let cache = builder(&loader, &clock)
    .time_to_live(ms(100))
    .strategy(ExpirationStrategy::Strict)
    .build()
    .unwrap();

  cache.get(&1).unwrap();
  gate.close();
  assert!(cache.refresh(&1));
  gate.wait_for_entries(2);

  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#1");

  gate.open();
  assert!(eventually(Duration::from_secs(5), || {
    cache.peek(&1).is_some_and(|value| *value == "1#2")
  }));
}

#[test]
fn test_lazy_refresh_failure_drops_stale_value() {
  let loader = TestLoader::new();
  let clock = ManualClock::new();
  let cache = builder(&loader, &clock)
    .time_to_live(ms(100))
    .spawner(Arc::new(InlineSpawner))
    .build()
    .unwrap();

  cache.get(&1).unwrap();
  clock.set(ms(100));
  loader.set_failing(true);

  // The stale value is served once; the failed refresh replaces it.
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#1");
  assert!(cache.get(&1).unwrap_err().is_load_failure());

  loader.set_failing(false);
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#4");
}

#[test]
fn test_put_with_ttl_overrides_default() {
  let loader = TestLoader::new();
  let clock = ManualClock::new();
  let cache = builder(&loader, &clock)
    .strategy(ExpirationStrategy::Strict)
    .build()
    .unwrap();

  cache.put_with_ttl(1, "short".to_string(), ms(10)).unwrap();
  cache.put(2, "forever".to_string()).unwrap();
  assert!(cache.contains_key(&1));

  clock.set(ms(10));
  assert!(!cache.contains_key(&1));
  assert!(cache.contains_key(&2));
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#1");
}

#[test]
fn test_expire_if_predicate_forces_reload() {
  let loader = TestLoader::new();
  let cache = builder(&loader, &ManualClock::new())
    .strategy(ExpirationStrategy::Strict)
    .expire_if(|entry, _now| entry.value.is_some_and(|value| value.ends_with("#1")))
    .build()
    .unwrap();

  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#1");
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#2");
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#2");
  assert_eq!(loader.loads(), 2);
}

#[test]
fn test_refresh_if_predicate_needs_window() {
  let loader = TestLoader::new();
  let cache = builder(&loader, &ManualClock::new())
    .time_to_live(ms(1_000))
    .refresh_window(ms(1))
    .refresh_if(|entry, _now| *entry.key == 1)
    .spawner(Arc::new(InlineSpawner))
    .build()
    .unwrap();

  cache.get(&1).unwrap();
  cache.get(&2).unwrap();
  cache.get(&1).unwrap();
  cache.get(&2).unwrap();

  assert_eq!(cache.metrics().refreshes_scheduled, 1);
  assert_eq!(loader.loads(), 3);
}

#[test]
fn test_cleanup_purges_expired_entries() {
  let loader = TestLoader::new();
  let clock = ManualClock::new();
  let cache = builder(&loader, &clock)
    .time_to_live(ms(100))
    .build()
    .unwrap();

  cache.get(&1).unwrap();
  cache.get(&2).unwrap();
  clock.set(ms(50));
  cache.put(3, "later".to_string()).unwrap();

  clock.set(ms(120));
  assert_eq!(cache.cleanup(), 2);
  assert_eq!(cache.len(), 1);
  assert!(cache.contains_key(&3));
  assert_eq!(cache.metrics().expirations, 2);
}

#[test]
fn test_cleanup_leaves_loading_entries_alone() {
  let gate = Gate::closed();
  gate.open();
  let loader = TestLoader::gated(gate.clone());
  let cache = builder(&loader, &ManualClock::new()).build().unwrap();

  loader.set_failing(true);
  assert!(cache.get(&1).unwrap_err().is_load_failure());
  loader.set_failing(false);
  gate.close();

  // The retry owns the failed entry while cleanup runs.
  let reader = {
    let cache = cache.clone();
    thread::spawn(move || cache.get(&1))
  };
  gate.wait_for_entries(2);
  assert_eq!(cache.cleanup(), 0);
  assert_eq!(cache.len(), 1);

  gate.open();
  assert_eq!(*reader.join().unwrap().unwrap().unwrap(), "1#2");
  assert_eq!(*cache.get(&1).unwrap().unwrap(), "1#2");
  assert_eq!(cache.cleanup(), 0);
  assert_eq!(loader.loads(), 2);
}
