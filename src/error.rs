//! Error taxonomy for the sync layer.

use thiserror::Error;

/// Errors surfaced by the sync layer.
///
/// Transport and protocol errors are retryable from the caller's point of
/// view (the previous cached data stays visible). Storage errors during a
/// plain cache write indicate a broken invariant and are not retried.
#[derive(Debug, Error)]
pub enum SyncError {
  /// Network-level failure: no connectivity, timeout, non-2xx status.
  #[error("transport error: {0}")]
  Transport(String),

  /// The server response violated the wire protocol (malformed batch,
  /// count mismatch, per-operation error payload).
  #[error("protocol error: {0}")]
  Protocol(String),

  /// Local persistence failure (SQLite).
  #[error("storage error: {0}")]
  Storage(String),

  /// JSON (de)serialization failure.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// Invalid or missing configuration.
  #[error("configuration error: {0}")]
  Config(String),

  /// Token retrieval failed for a signed-in identity.
  #[error("auth error: {0}")]
  Auth(String),
}

impl From<rusqlite::Error> for SyncError {
  fn from(e: rusqlite::Error) -> Self {
    SyncError::Storage(e.to_string())
  }
}

impl From<reqwest::Error> for SyncError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() || e.is_connect() {
      SyncError::Transport(e.to_string())
    } else if e.is_decode() {
      SyncError::Protocol(e.to_string())
    } else {
      SyncError::Transport(e.to_string())
    }
  }
}

pub type Result<T> = std::result::Result<T, SyncError>;
