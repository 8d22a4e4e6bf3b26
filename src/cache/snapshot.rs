//! SQLite-backed cache snapshot store, versioned by application release.
//!
//! The on-disk layout is a small key-value schema: one blob row holding the
//! serialized snapshot (with a sha256 checksum) and a meta row holding the
//! cache-version marker. On startup the marker is compared against the
//! running application's version: equal restores, anything else purges the
//! whole snapshot and rewrites the marker. Partial restores are never
//! attempted.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use crate::error::{Result, SyncError};

/// A full serialized cache image plus its schema-version tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
  pub version: String,
  pub taken_at: DateTime<Utc>,
  pub entries: Vec<CacheEntry>,
}

impl CacheSnapshot {
  pub fn new(version: impl Into<String>, entries: Vec<CacheEntry>) -> Self {
    Self {
      version: version.into(),
      taken_at: Utc::now(),
      entries,
    }
  }
}

/// Schema for the snapshot database.
const SNAPSHOT_SCHEMA: &str = r#"
-- Serialized cache snapshot (single row)
CREATE TABLE IF NOT EXISTS snapshot (
    slot TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    checksum TEXT NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Small string markers (cache version)
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const SNAPSHOT_SLOT: &str = "cache";
const VERSION_KEY: &str = "cache_version";

/// Persistent store for cache snapshots.
pub struct SnapshotStore {
  conn: Mutex<Connection>,
}

impl SnapshotStore {
  /// Open the store at the given path, or at the default platform data
  /// directory when none is configured.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| SyncError::Storage(format!("Failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| SyncError::Storage(format!("Failed to open cache database at {}: {}", path.display(), e)))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Open an in-memory store. Nothing survives the process; used by tests
  /// and as a fallback when no writable data directory exists.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| SyncError::Storage(format!("Failed to open in-memory database: {}", e)))?;
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| SyncError::Storage("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("storysync").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(SNAPSHOT_SCHEMA)
      .map_err(|e| SyncError::Storage(format!("Failed to run snapshot migrations: {}", e)))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::Storage(format!("Lock poisoned: {}", e)))
  }

  /// Run the startup versioning protocol.
  ///
  /// Returns the snapshot to restore when the stored marker matches the
  /// running application version; otherwise purges everything, writes the
  /// new marker, and returns `None`.
  pub fn initialize(&self, app_version: &str) -> Result<Option<CacheSnapshot>> {
    match self.read_version()? {
      Some(stored) if stored == app_version => {
        let snapshot = self.load_snapshot()?;
        match snapshot {
          Some(snap) if snap.version == app_version => {
            debug!(version = app_version, entries = snap.entries.len(), "restoring cache snapshot");
            Ok(Some(snap))
          }
          Some(snap) => {
            // Marker and blob disagree: treat as incompatible, all-or-nothing.
            warn!(marker = app_version, blob = %snap.version, "snapshot version tag mismatch, purging");
            self.purge()?;
            self.write_version(app_version)?;
            Ok(None)
          }
          None => Ok(None),
        }
      }
      stored => {
        debug!(stored = stored.as_deref().unwrap_or("<none>"), running = app_version, "cache version changed, purging");
        self.purge()?;
        self.write_version(app_version)?;
        Ok(None)
      }
    }
  }

  pub fn read_version(&self) -> Result<Option<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT value FROM meta WHERE key = ?")
      .map_err(|e| SyncError::Storage(format!("Failed to prepare query: {}", e)))?;

    let version: Option<String> = stmt.query_row(params![VERSION_KEY], |row| row.get(0)).ok();
    Ok(version)
  }

  pub fn write_version(&self, version: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        params![VERSION_KEY, version],
      )
      .map_err(|e| SyncError::Storage(format!("Failed to write version marker: {}", e)))?;
    Ok(())
  }

  /// Persist a snapshot, replacing any previous one.
  pub fn store_snapshot(&self, snapshot: &CacheSnapshot) -> Result<()> {
    let data = serde_json::to_vec(snapshot)?;
    let checksum = checksum(&data);

    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO snapshot (slot, data, checksum, written_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![SNAPSHOT_SLOT, data, checksum],
      )
      .map_err(|e| SyncError::Storage(format!("Failed to store snapshot: {}", e)))?;

    Ok(())
  }

  /// Load the persisted snapshot.
  ///
  /// A missing, corrupt, or checksum-mismatched snapshot reads as `None`;
  /// restore failures are recovered locally by an empty cache, never
  /// surfaced to the UI.
  pub fn load_snapshot(&self) -> Result<Option<CacheSnapshot>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT data, checksum FROM snapshot WHERE slot = ?")
      .map_err(|e| SyncError::Storage(format!("Failed to prepare query: {}", e)))?;

    let row: Option<(Vec<u8>, String)> = stmt
      .query_row(params![SNAPSHOT_SLOT], |row| Ok((row.get(0)?, row.get(1)?)))
      .ok();

    let (data, stored_checksum) = match row {
      Some(row) => row,
      None => return Ok(None),
    };

    if checksum(&data) != stored_checksum {
      warn!("snapshot checksum mismatch, falling back to empty cache");
      return Ok(None);
    }

    match serde_json::from_slice::<CacheSnapshot>(&data) {
      Ok(snapshot) => Ok(Some(snapshot)),
      Err(e) => {
        warn!(error = %e, "corrupt snapshot, falling back to empty cache");
        Ok(None)
      }
    }
  }

  /// Discard the persisted snapshot. The version marker is left alone; the
  /// caller decides whether to rewrite it.
  pub fn purge(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM snapshot WHERE slot = ?", params![SNAPSHOT_SLOT])
      .map_err(|e| SyncError::Storage(format!("Failed to purge snapshot: {}", e)))?;
    Ok(())
  }
}

/// Stable hex checksum over the serialized snapshot blob.
fn checksum(data: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data);
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{EntityKey, FieldValue, InMemoryCache};
  use serde_json::json;

  fn sample_entries() -> Vec<CacheEntry> {
    let mut cache = InMemoryCache::new();
    cache.write_field(
      &EntityKey::new("Story", "s1"),
      "title",
      FieldValue::Scalar(json!("hello")),
    );
    cache.export()
  }

  #[test]
  fn matching_version_restores_snapshot() {
    let store = SnapshotStore::open_in_memory().unwrap();
    store.write_version("1.0.0").unwrap();
    store
      .store_snapshot(&CacheSnapshot::new("1.0.0", sample_entries()))
      .unwrap();

    let restored = store.initialize("1.0.0").unwrap();
    assert_eq!(restored.unwrap().entries.len(), 1);
  }

  #[test]
  fn version_mismatch_purges_and_rewrites_marker() {
    let store = SnapshotStore::open_in_memory().unwrap();
    store.write_version("0.9.0").unwrap();
    store
      .store_snapshot(&CacheSnapshot::new("0.9.0", sample_entries()))
      .unwrap();

    let restored = store.initialize("1.0.0").unwrap();
    assert!(restored.is_none());
    assert_eq!(store.read_version().unwrap().as_deref(), Some("1.0.0"));
    // The old snapshot is gone for good
    assert!(store.load_snapshot().unwrap().is_none());
  }

  #[test]
  fn first_run_writes_marker() {
    let store = SnapshotStore::open_in_memory().unwrap();
    let restored = store.initialize("1.0.0").unwrap();
    assert!(restored.is_none());
    assert_eq!(store.read_version().unwrap().as_deref(), Some("1.0.0"));
  }

  #[test]
  fn corrupt_blob_reads_as_missing() {
    let store = SnapshotStore::open_in_memory().unwrap();
    store.write_version("1.0.0").unwrap();
    {
      let conn = store.conn.lock().unwrap();
      let garbage: &[u8] = b"not json";
      conn
        .execute(
          "INSERT OR REPLACE INTO snapshot (slot, data, checksum) VALUES (?, ?, ?)",
          params![SNAPSHOT_SLOT, garbage, checksum(garbage)],
        )
        .unwrap();
    }

    // Fails silently: empty cache, no error
    assert!(store.load_snapshot().unwrap().is_none());
    assert!(store.initialize("1.0.0").unwrap().is_none());
  }

  #[test]
  fn checksum_mismatch_reads_as_missing() {
    let store = SnapshotStore::open_in_memory().unwrap();
    store
      .store_snapshot(&CacheSnapshot::new("1.0.0", sample_entries()))
      .unwrap();
    {
      let conn = store.conn.lock().unwrap();
      conn
        .execute(
          "UPDATE snapshot SET checksum = 'deadbeef' WHERE slot = ?",
          params![SNAPSHOT_SLOT],
        )
        .unwrap();
    }

    assert!(store.load_snapshot().unwrap().is_none());
  }
}
