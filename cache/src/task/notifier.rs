use crate::entry::EntrySnapshot;
use crate::listener::{CacheEvent, EventKind, EventListener};
use crate::metrics::Metrics;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use fibre::mpsc;
use parking_lot::Mutex;

// A simple, bounded MPSC channel for notifications.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 1024;

/// Feeds cache events to a user listener running on its own thread.
pub(crate) struct Notifier<K: Send, V: Send + Sync> {
  // The sequence counter and the sender live under one lock so events enter
  // the channel in sequence order.
  sender: Mutex<(u64, mpsc::BoundedSender<CacheEvent<K, V>>)>,
  metrics: Arc<Metrics>,
}

impl<K: Send, V: Send + Sync> Notifier<K, V> {
  /// Spawns the listener thread.
  ///
  /// The thread ends on its own once the notifier (and with it the only
  /// sender) is dropped.
  pub(crate) fn spawn(listener: Arc<dyn EventListener<K, V>>, metrics: Arc<Metrics>) -> Self
  where
    K: 'static,
    V: 'static,
  {
    let (tx, rx): (
      mpsc::BoundedSender<CacheEvent<K, V>>,
      mpsc::BoundedReceiver<CacheEvent<K, V>>,
    ) = mpsc::bounded(NOTIFICATION_CHANNEL_CAPACITY);

    thread::spawn(move || {
      while let Ok(event) = rx.recv() {
        listener.on_event(event);
      }
    });

    Self {
      sender: Mutex::new((0, tx)),
      metrics,
    }
  }

  /// Queues an event without blocking. A full channel drops the event.
  pub(crate) fn emit(&self, kind: EventKind, entry: EntrySnapshot<K, V>, previous: Option<Arc<V>>) {
    let mut guard = self.sender.lock();
    let (next_sequence, sender) = &mut *guard;
    let event = CacheEvent {
      sequence: *next_sequence,
      kind,
      entry,
      previous,
    };
    match sender.try_send(event) {
      Ok(()) => *next_sequence += 1,
      Err(_) => {
        self.metrics.events_dropped.fetch_add(1, Ordering::Relaxed);
      }
    }
  }
}
