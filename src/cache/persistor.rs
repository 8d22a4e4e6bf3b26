//! Debounced disk persistence for the shared cache.
//!
//! Writes during normal operation only touch the in-memory cache; a
//! background task flushes a snapshot to the store on a fixed interval
//! whenever the cache is dirty. Shutdown is explicit: `shutdown` performs a
//! final flush and stops the task, so no timer outlives the client.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::snapshot::SnapshotStore;
use super::SharedCache;

pub struct CachePersistor {
  handle: JoinHandle<()>,
  stop: Arc<Notify>,
}

impl CachePersistor {
  /// Start the persistence task.
  pub fn spawn(
    cache: SharedCache,
    store: Arc<SnapshotStore>,
    version: String,
    interval: Duration,
  ) -> Self {
    let stop = Arc::new(Notify::new());
    let stop_signal = Arc::clone(&stop);

    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // The first tick resolves immediately; skip it so the debounce window
      // applies from the start.
      ticker.tick().await;

      loop {
        tokio::select! {
          _ = ticker.tick() => {
            flush_if_dirty(&cache, &store, &version);
          }
          _ = stop_signal.notified() => {
            flush_if_dirty(&cache, &store, &version);
            break;
          }
        }
      }
    });

    Self { handle, stop }
  }

  /// Final flush, then stop the background task.
  pub async fn shutdown(self) {
    self.stop.notify_one();
    if let Err(e) = self.handle.await {
      warn!(error = %e, "persistor task did not shut down cleanly");
    }
  }
}

fn flush_if_dirty(cache: &SharedCache, store: &SnapshotStore, version: &str) {
  if !cache.take_dirty() {
    return;
  }

  match cache
    .snapshot(version)
    .and_then(|snapshot| store.store_snapshot(&snapshot))
  {
    Ok(()) => debug!("cache snapshot persisted"),
    // Persistence failure is recoverable: the next dirty tick retries.
    Err(e) => warn!(error = %e, "failed to persist cache snapshot"),
  }
}
