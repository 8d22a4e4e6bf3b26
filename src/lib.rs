//! storysync: client-side data synchronization for the voice-story app.
//!
//! This crate owns the single source of truth for all server-derived and
//! client-local UI state: a normalized in-memory cache persisted to SQLite
//! and versioned by application release, a batching HTTP link that attaches
//! a fresh bearer token to every physical request, a client-only schema
//! extension (modals, search query, story draft, candidate profile), and a
//! pagination merge engine for infinite-scroll feeds.
//!
//! # Example
//!
//! ```ignore
//! let config = Config::load(None)?;
//! let client = DataClient::configure(config, Arc::new(FirebaseTokens::new())).await?;
//!
//! // Combined query: `searchQuery` is resolved locally, the feed remotely.
//! let data = client
//!   .query(Operation::new(
//!     "query { chattingFeed(cursor: $cursor) { chattings { id } cursor } searchQuery }",
//!   ))
//!   .await?;
//!
//! // On logout
//! client.reset_store().await?;
//! client.teardown().await?;
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod feed;
pub mod local;
pub mod transport;

pub use cache::{CacheEntry, CacheSnapshot, EntityKey, FieldValue, SharedCache, SnapshotStore};
pub use client::DataClient;
pub use config::Config;
pub use error::{Result, SyncError};
pub use feed::{FeedItem, FeedPage, FeedQuery, FeedSnapshot, NetworkStatus};
pub use local::{Candidate, CandidatePatch, Draft, DraftPatch, LocalExtension, Modal, ModalId};
pub use transport::{NoIdentity, Operation, OperationResult, TokenProvider, Transport};
