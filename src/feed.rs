//! Feed pagination: per-query network status and the page-merge engine.
//!
//! `FeedQuery<T>` tracks an infinite-scroll list query through its status
//! transitions (`Idle → FetchingInitial → Ready`, `Ready → FetchingMore →
//! Ready`, `Ready → Refetching → Ready`, any of which may land in `Error`)
//! and folds newly fetched pages into the cached list with `merge_page`.
//! The merge is a pure reducer: concatenate, deduplicate by identity keeping
//! the first occurrence, advance the cursor; an empty page changes nothing.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Result, SyncError};

/// State of a query, driven entirely by request/response outcomes.
/// Consumers read it; they never assign it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
  Idle,
  FetchingInitial,
  FetchingMore,
  Refetching,
  Polling,
  Ready,
  Error,
}

impl NetworkStatus {
  pub fn is_in_flight(&self) -> bool {
    matches!(
      self,
      NetworkStatus::FetchingInitial
        | NetworkStatus::FetchingMore
        | NetworkStatus::Refetching
        | NetworkStatus::Polling
    )
  }
}

/// Items with a stable identity used for cross-page deduplication.
pub trait FeedItem {
  fn identity(&self) -> String;
}

/// One fetched page: an ordered slice of the feed plus the continuation
/// cursor the server handed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPage<T> {
  pub items: Vec<T>,
  pub cursor: Option<String>,
}

/// Owned view of a feed query's current state.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot<T> {
  pub items: Vec<T>,
  pub cursor: Option<String>,
  pub status: NetworkStatus,
}

/// Merge a freshly fetched page into the cached list.
///
/// An empty page is the end-of-feed signal: list and cursor stay untouched.
/// Otherwise the page is appended, duplicates are dropped keeping the first
/// occurrence (already-rendered items never move), and the cursor advances
/// to the page's cursor.
pub fn merge_page<T: FeedItem>(items: &mut Vec<T>, cursor: &mut Option<String>, page: FeedPage<T>) {
  if page.items.is_empty() {
    return;
  }

  items.extend(page.items);
  dedup_by_identity(items);
  *cursor = page.cursor;
}

fn dedup_by_identity<T: FeedItem>(items: &mut Vec<T>) {
  let mut seen = HashSet::new();
  items.retain(|item| seen.insert(item.identity()));
}

enum FetchKind {
  Initial,
  More,
  Refetch,
}

struct FeedState<T> {
  items: Vec<T>,
  cursor: Option<String>,
  status: NetworkStatus,
}

impl<T: Clone> FeedState<T> {
  fn snapshot(&self) -> FeedSnapshot<T> {
    FeedSnapshot {
      items: self.items.clone(),
      cursor: self.cursor.clone(),
      status: self.status,
    }
  }
}

type Fetcher<T> = Arc<dyn Fn(Option<String>) -> BoxFuture<'static, Result<FeedPage<T>>> + Send + Sync>;

/// A paginated list query.
///
/// Cloneable; clones share state, so a second `fetch_more` issued while one
/// is mid-flight is a no-op rather than a duplicate request racing on the
/// same cursor.
pub struct FeedQuery<T> {
  state: Arc<Mutex<FeedState<T>>>,
  fetcher: Fetcher<T>,
}

impl<T> Clone for FeedQuery<T> {
  fn clone(&self) -> Self {
    Self {
      state: Arc::clone(&self.state),
      fetcher: Arc::clone(&self.fetcher),
    }
  }
}

impl<T: FeedItem + Clone + Send + 'static> FeedQuery<T> {
  /// Create a feed query over a fetcher. The fetcher receives the cursor to
  /// continue from (`None` for the first page) and returns one page.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<FeedPage<T>>> + Send + 'static,
  {
    Self {
      state: Arc::new(Mutex::new(FeedState {
        items: Vec::new(),
        cursor: None,
        status: NetworkStatus::Idle,
      })),
      fetcher: Arc::new(move |cursor| Box::pin(fetcher(cursor))),
    }
  }

  /// Current items, cursor, and status.
  pub fn state(&self) -> Result<FeedSnapshot<T>> {
    Ok(self.lock()?.snapshot())
  }

  /// Fetch the first page. No-op while any request is mid-flight.
  pub async fn fetch_initial(&self) -> Result<FeedSnapshot<T>> {
    {
      let mut state = self.lock()?;
      if state.status.is_in_flight() {
        return Ok(state.snapshot());
      }
      state.status = NetworkStatus::FetchingInitial;
    }
    self.run_fetch(None, FetchKind::Initial).await
  }

  /// Fetch the next page from the current cursor.
  ///
  /// Dispatches only from `Ready`: mid-flight, errored, or never-fetched
  /// queries make this a no-op returning the current state.
  pub async fn fetch_more(&self) -> Result<FeedSnapshot<T>> {
    let cursor = {
      let mut state = self.lock()?;
      if state.status != NetworkStatus::Ready {
        return Ok(state.snapshot());
      }
      state.status = NetworkStatus::FetchingMore;
      state.cursor.clone()
    };
    self.run_fetch(cursor, FetchKind::More).await
  }

  /// Refetch from the beginning, replacing the list. The only way out of
  /// the `Error` state; no-op while a request is mid-flight.
  pub async fn refetch(&self) -> Result<FeedSnapshot<T>> {
    {
      let mut state = self.lock()?;
      if state.status.is_in_flight() {
        return Ok(state.snapshot());
      }
      state.status = NetworkStatus::Refetching;
    }
    self.run_fetch(None, FetchKind::Refetch).await
  }

  async fn run_fetch(&self, cursor: Option<String>, kind: FetchKind) -> Result<FeedSnapshot<T>> {
    let result = (self.fetcher)(cursor).await;

    let mut state = self.lock()?;
    let state = &mut *state;
    match result {
      Ok(page) => {
        match kind {
          FetchKind::Initial | FetchKind::Refetch => {
            let mut items = page.items;
            dedup_by_identity(&mut items);
            state.items = items;
            state.cursor = page.cursor;
          }
          FetchKind::More => merge_page(&mut state.items, &mut state.cursor, page),
        }
        state.status = NetworkStatus::Ready;
        Ok(state.snapshot())
      }
      Err(e) => {
        // Stale-while-error: the previous good list stays visible while the
        // UI offers a retry affordance.
        state.status = NetworkStatus::Error;
        Err(e)
      }
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, FeedState<T>>> {
    self
      .state
      .lock()
      .map_err(|e| SyncError::Storage(format!("Feed state lock poisoned: {}", e)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  #[derive(Debug, Clone, PartialEq)]
  struct Chatting {
    id: u64,
  }

  impl FeedItem for Chatting {
    fn identity(&self) -> String {
      self.id.to_string()
    }
  }

  fn items(ids: &[u64]) -> Vec<Chatting> {
    ids.iter().map(|&id| Chatting { id }).collect()
  }

  #[test]
  fn merge_concatenates_dedups_and_advances_cursor() {
    let mut list = items(&[1, 2]);
    let mut cursor = Some("c1".to_string());

    merge_page(
      &mut list,
      &mut cursor,
      FeedPage {
        items: items(&[2, 3]),
        cursor: Some("c2".to_string()),
      },
    );

    assert_eq!(list, items(&[1, 2, 3]));
    assert_eq!(cursor.as_deref(), Some("c2"));
  }

  #[test]
  fn empty_page_changes_nothing() {
    let mut list = items(&[1, 2]);
    let mut cursor = Some("c1".to_string());

    merge_page(
      &mut list,
      &mut cursor,
      FeedPage {
        items: Vec::new(),
        cursor: Some("c9".to_string()),
      },
    );

    assert_eq!(list, items(&[1, 2]));
    assert_eq!(cursor.as_deref(), Some("c1"));
  }

  #[test]
  fn first_occurrence_wins_across_many_pages() {
    let mut list = Vec::new();
    let mut cursor = None;
    let pages = [vec![3, 1], vec![1, 2], vec![2, 3, 4]];

    for (i, page) in pages.iter().enumerate() {
      merge_page(
        &mut list,
        &mut cursor,
        FeedPage {
          items: items(page),
          cursor: Some(format!("c{}", i)),
        },
      );
    }

    assert_eq!(list, items(&[3, 1, 2, 4]));
    assert_eq!(cursor.as_deref(), Some("c2"));
  }

  #[tokio::test]
  async fn initial_then_more_follows_the_cursor() {
    let query = FeedQuery::new(|cursor: Option<String>| async move {
      match cursor.as_deref() {
        None => Ok(FeedPage {
          items: items(&[1, 2]),
          cursor: Some("c1".to_string()),
        }),
        Some("c1") => Ok(FeedPage {
          items: items(&[2, 3]),
          cursor: Some("c2".to_string()),
        }),
        other => panic!("unexpected cursor {:?}", other),
      }
    });

    let state = query.fetch_initial().await.unwrap();
    assert_eq!(state.status, NetworkStatus::Ready);
    assert_eq!(state.items, items(&[1, 2]));

    let state = query.fetch_more().await.unwrap();
    assert_eq!(state.items, items(&[1, 2, 3]));
    assert_eq!(state.cursor.as_deref(), Some("c2"));
  }

  #[tokio::test]
  async fn fetch_more_before_initial_is_a_noop() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let query = FeedQuery::new(move |_| {
      let counter = Arc::clone(&counter);
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(FeedPage {
          items: items(&[1]),
          cursor: None,
        })
      }
    });

    let state = query.fetch_more().await.unwrap();
    assert_eq!(state.status, NetworkStatus::Idle);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn fetch_more_while_mid_flight_is_a_noop() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let query = FeedQuery::new(move |cursor: Option<String>| {
      let counter = Arc::clone(&counter);
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        if cursor.is_some() {
          tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(FeedPage {
          items: items(&[1]),
          cursor: Some("c1".to_string()),
        })
      }
    });

    query.fetch_initial().await.unwrap();

    let slow = query.clone();
    let racing = query.clone();
    let first = tokio::spawn(async move { slow.fetch_more().await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Same query, already FetchingMore: must not dispatch again
    let state = racing.fetch_more().await.unwrap();
    assert_eq!(state.status, NetworkStatus::FetchingMore);

    first.await.unwrap().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn error_keeps_stale_items_and_only_refetch_recovers() {
    let fail = Arc::new(AtomicU32::new(0));
    let fail_flag = Arc::clone(&fail);
    let query = FeedQuery::new(move |_| {
      let fail = Arc::clone(&fail_flag);
      async move {
        if fail.load(Ordering::SeqCst) == 1 {
          Err(SyncError::Transport("offline".to_string()))
        } else {
          Ok(FeedPage {
            items: items(&[1, 2]),
            cursor: Some("c1".to_string()),
          })
        }
      }
    });

    query.fetch_initial().await.unwrap();
    fail.store(1, Ordering::SeqCst);

    // Refetch fails: stale items stay visible, status is Error
    assert!(query.refetch().await.is_err());
    let state = query.state().unwrap();
    assert_eq!(state.status, NetworkStatus::Error);
    assert_eq!(state.items, items(&[1, 2]));

    // fetch_more cannot leave the error state
    let state = query.fetch_more().await.unwrap();
    assert_eq!(state.status, NetworkStatus::Error);

    // refetch can
    fail.store(0, Ordering::SeqCst);
    let state = query.refetch().await.unwrap();
    assert_eq!(state.status, NetworkStatus::Ready);
  }

  #[tokio::test]
  async fn refetch_replaces_the_list() {
    let generation = Arc::new(AtomicU32::new(0));
    let gen_ref = Arc::clone(&generation);
    let query = FeedQuery::new(move |_| {
      let generation = Arc::clone(&gen_ref);
      async move {
        if generation.load(Ordering::SeqCst) == 0 {
          Ok(FeedPage {
            items: items(&[1, 2]),
            cursor: Some("c1".to_string()),
          })
        } else {
          Ok(FeedPage {
            items: items(&[5]),
            cursor: Some("c5".to_string()),
          })
        }
      }
    });

    query.fetch_initial().await.unwrap();
    generation.store(1, Ordering::SeqCst);

    let state = query.refetch().await.unwrap();
    assert_eq!(state.items, items(&[5]));
    assert_eq!(state.cursor.as_deref(), Some("c5"));
  }
}
