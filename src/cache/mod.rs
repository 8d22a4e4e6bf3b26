//! Normalized cache with on-disk persistence.
//!
//! This module owns all server-derived and client-local UI state:
//! - an in-memory normalized object cache (`entry`)
//! - an SQLite-backed snapshot store versioned by application release
//!   (`snapshot`)
//! - a debounced background task that flushes the cache to disk
//!   (`persistor`)

mod entry;
mod persistor;
mod snapshot;

pub use entry::{CacheEntry, EntityKey, FieldValue, InMemoryCache};
pub use persistor::CachePersistor;
pub use snapshot::{CacheSnapshot, SnapshotStore};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Result, SyncError};

/// Cloneable handle to the process-wide cache.
///
/// All mutation goes through `write`, which marks the cache dirty for the
/// persistor. Read results are owned values; holding one never blocks a
/// writer.
#[derive(Clone, Default)]
pub struct SharedCache {
  inner: Arc<Mutex<InMemoryCache>>,
  dirty: Arc<AtomicBool>,
}

impl SharedCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn read<R>(&self, f: impl FnOnce(&InMemoryCache) -> R) -> Result<R> {
    let cache = self
      .inner
      .lock()
      .map_err(|e| SyncError::Storage(format!("Cache lock poisoned: {}", e)))?;
    Ok(f(&cache))
  }

  pub fn write<R>(&self, f: impl FnOnce(&mut InMemoryCache) -> R) -> Result<R> {
    let mut cache = self
      .inner
      .lock()
      .map_err(|e| SyncError::Storage(format!("Cache lock poisoned: {}", e)))?;
    let result = f(&mut cache);
    self.dirty.store(true, Ordering::Release);
    Ok(result)
  }

  /// Atomically take the dirty flag, returning whether a flush is due.
  pub fn take_dirty(&self) -> bool {
    self.dirty.swap(false, Ordering::AcqRel)
  }

  /// Serialize the current contents into a versioned snapshot.
  pub fn snapshot(&self, version: &str) -> Result<CacheSnapshot> {
    self.read(|cache| CacheSnapshot::new(version, cache.export()))
  }

  /// Load snapshot contents, replacing anything in memory. Does not mark
  /// the cache dirty: what was just read from disk needs no write-back.
  pub fn restore(&self, snapshot: CacheSnapshot) -> Result<()> {
    let mut cache = self
      .inner
      .lock()
      .map_err(|e| SyncError::Storage(format!("Cache lock poisoned: {}", e)))?;
    cache.import(snapshot.entries);
    Ok(())
  }

  pub fn clear(&self) -> Result<()> {
    self.write(|cache| cache.clear())
  }
}
