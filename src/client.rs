//! The data client: request/response/cache-read/cache-write facade consumed
//! by UI containers.
//!
//! Construct one per process with `configure`, pass clones into consumers,
//! and call `teardown` on shutdown. Clones share the cache, the batching
//! link, and the persistence task.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CachePersistor, SharedCache, SnapshotStore};
use crate::config::Config;
use crate::error::Result;
use crate::feed::{FeedItem, FeedPage, FeedQuery};
use crate::local::{remove_selections, top_level_fields, LocalExtension, ResolverTable};
use crate::transport::{BatchLink, HttpTransport, Operation, TokenProvider, Transport};

#[derive(Clone)]
pub struct DataClient {
  inner: Arc<ClientInner>,
}

struct ClientInner {
  cache: SharedCache,
  store: Arc<SnapshotStore>,
  link: BatchLink,
  local: LocalExtension,
  resolvers: ResolverTable,
  persistor: tokio::sync::Mutex<Option<CachePersistor>>,
}

impl DataClient {
  /// Configure the client over an HTTP transport with token injection.
  ///
  /// Runs the startup sequence: open the snapshot store, restore or purge
  /// by the version protocol, seed the local baseline, start the batching
  /// link and the persistence task.
  pub async fn configure(config: Config, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
    let endpoint = config.api.endpoint()?;
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(endpoint, tokens)?);
    Self::configure_with_transport(config, transport).await
  }

  /// Configure over an arbitrary transport. Used by tests and non-HTTP
  /// embeddings.
  pub async fn configure_with_transport(
    config: Config,
    transport: Arc<dyn Transport>,
  ) -> Result<Self> {
    let store = Arc::new(SnapshotStore::open(config.cache.path.as_deref())?);
    let cache = SharedCache::new();

    if let Some(snapshot) = store.initialize(&config.app_version)? {
      cache.restore(snapshot)?;
    }

    // Local entities must exist before the first UI read.
    let local = LocalExtension::new(cache.clone());
    local.seed()?;

    let link = BatchLink::spawn(
      transport,
      config.batch.interval(),
      config.batch.max_operations,
    );
    let persistor = CachePersistor::spawn(
      cache.clone(),
      Arc::clone(&store),
      config.app_version.clone(),
      config.cache.persist_interval(),
    );

    info!(version = %config.app_version, "data client configured");
    Ok(Self {
      inner: Arc::new(ClientInner {
        cache,
        store,
        link,
        local,
        resolvers: ResolverTable::with_local_defaults(),
        persistor: tokio::sync::Mutex::new(Some(persistor)),
      }),
    })
  }

  /// Run a query, merging locally resolved fields with server-resolved
  /// fields into one response shape.
  ///
  /// Top-level selections are split by the resolver table: remote fields go
  /// over the batching link (stripped of local selections) and are
  /// normalized into the cache; local fields never touch the network. A
  /// query selecting only local fields makes no physical request at all.
  pub async fn query(&self, operation: Operation) -> Result<Value> {
    let fields = top_level_fields(&operation.query);
    if fields.is_empty() {
      // Nothing recognizable to split; send as-is
      return self.mutate(operation).await;
    }

    let local_fields: Vec<String> = fields
      .iter()
      .filter(|f| self.inner.resolvers.is_local(f))
      .cloned()
      .collect();
    let remote_fields: Vec<String> = fields
      .iter()
      .filter(|f| !self.inner.resolvers.is_local(f))
      .cloned()
      .collect();

    let mut merged = Map::new();

    if !remote_fields.is_empty() {
      let wire_operation = if local_fields.is_empty() {
        operation.clone()
      } else {
        Operation {
          query: remove_selections(&operation.query, &local_fields),
          variables: operation.variables.clone(),
        }
      };

      let result = self.inner.link.request(wire_operation).await?;
      let data = result.into_data()?;

      // Single normalized write path: the response lands in the cache, the
      // returned object is read back out of it.
      if let Value::Object(object) = &data {
        self.inner.cache.write(|c| c.write_data(object))?;
      }
      for field in &remote_fields {
        let value = self.inner.cache.read(|c| c.read_root(field))?;
        merged.insert(field.clone(), value.unwrap_or(Value::Null));
      }
    }

    for field in &local_fields {
      let value = self
        .inner
        .resolvers
        .resolve(field, &self.inner.local, &operation.variables)?;
      merged.insert(field.clone(), value);
    }

    debug!(
      remote = remote_fields.len(),
      local = local_fields.len(),
      "query resolved"
    );
    Ok(Value::Object(merged))
  }

  /// Run a mutation over the wire; its response data is normalized into the
  /// cache like any query response.
  pub async fn mutate(&self, operation: Operation) -> Result<Value> {
    let result = self.inner.link.request(operation).await?;
    let data = result.into_data()?;
    if let Value::Object(object) = &data {
      self.inner.cache.write(|c| c.write_data(object))?;
    }
    Ok(data)
  }

  /// Cache-only read of a top-level field. No network.
  pub fn read_field(&self, field: &str) -> Result<Option<Value>> {
    self.inner.cache.read(|c| c.read_root(field))
  }

  /// Local-state operations (modals, search query, draft, candidate).
  pub fn local(&self) -> &LocalExtension {
    &self.inner.local
  }

  /// Build a paginated feed query over this client.
  ///
  /// The fetcher injects the continuation cursor as the `cursor` variable,
  /// sends the operation through the normal query path (so pages are
  /// normalized into the cache), and extracts a page from the response.
  pub fn feed<T, F>(&self, operation: Operation, extract: F) -> FeedQuery<T>
  where
    T: FeedItem + Clone + Send + 'static,
    F: Fn(&Value) -> Result<FeedPage<T>> + Send + Sync + 'static,
  {
    let client = self.clone();
    let operation = Arc::new(operation);
    let extract = Arc::new(extract);

    FeedQuery::new(move |cursor| {
      let client = client.clone();
      let mut operation = (*operation).clone();
      let extract = Arc::clone(&extract);
      async move {
        operation.set_variable(
          "cursor",
          cursor.map(Value::String).unwrap_or(Value::Null),
        );
        let data = client.query(operation).await?;
        extract(&data)
      }
    })
  }

  /// Clear everything on logout: in-memory cache, on-disk snapshot, then
  /// immediately re-seed the local baseline so no UI read observes missing
  /// local state.
  pub async fn reset_store(&self) -> Result<()> {
    info!("resetting store");
    self.inner.cache.clear()?;
    self.inner.store.purge()?;
    self.inner.local.reset()?;
    Ok(())
  }

  /// Stop the persistence task (with a final flush) and the batching link.
  /// Idempotent; safe to call from any clone.
  pub async fn teardown(&self) -> Result<()> {
    if let Some(persistor) = self.inner.persistor.lock().await.take() {
      persistor.shutdown().await;
    }
    self.inner.link.shutdown().await;
    Ok(())
  }
}
