//! Outbound wire protocol: batched JSON operations over HTTPS with
//! bearer-token injection.

mod batch;

pub use batch::BatchLink;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::error::{Result, SyncError};

/// One logical request item: an operation document plus variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
  pub query: String,
  #[serde(default = "empty_variables")]
  pub variables: Value,
}

fn empty_variables() -> Value {
  Value::Object(Map::new())
}

impl Operation {
  pub fn new(query: impl Into<String>) -> Self {
    Self {
      query: query.into(),
      variables: empty_variables(),
    }
  }

  pub fn with_variables(query: impl Into<String>, variables: Value) -> Self {
    Self {
      query: query.into(),
      variables,
    }
  }

  /// Set one variable, replacing any previous value.
  pub fn set_variable(&mut self, name: &str, value: Value) {
    if !self.variables.is_object() {
      self.variables = empty_variables();
    }
    if let Some(object) = self.variables.as_object_mut() {
      object.insert(name.to_string(), value);
    }
  }
}

/// One positional response item: data and/or error payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
  #[serde(default)]
  pub data: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub errors: Option<Vec<OperationError>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationError {
  pub message: String,
}

impl OperationResult {
  pub fn ok(data: Value) -> Self {
    Self {
      data: Some(data),
      errors: None,
    }
  }

  /// Extract the data payload, turning per-operation error payloads into a
  /// protocol error for this caller only.
  pub fn into_data(self) -> Result<Value> {
    if let Some(errors) = &self.errors {
      if !errors.is_empty() {
        let message = errors
          .iter()
          .map(|e| e.message.as_str())
          .collect::<Vec<_>>()
          .join("; ");
        return Err(SyncError::Protocol(message));
      }
    }
    self
      .data
      .ok_or_else(|| SyncError::Protocol("Response item carried no data".to_string()))
  }
}

/// Capability seam for the auth collaborator.
///
/// Implementations wrap whichever auth SDK the app embeds; the transport
/// only ever sees this trait.
#[async_trait]
pub trait TokenProvider: Send + Sync {
  /// Current bearer token for the signed-in identity, or `None` when
  /// signed out. May refresh the token, so retrieval can be slow.
  async fn current_token(&self) -> Result<Option<String>>;
}

/// Provider for the signed-out state: every request goes unauthenticated.
pub struct NoIdentity;

#[async_trait]
impl TokenProvider for NoIdentity {
  async fn current_token(&self) -> Result<Option<String>> {
    Ok(None)
  }
}

/// A physical request/response channel for operation batches.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Send one physical request carrying the whole batch; results are
  /// positionally aligned with the operations.
  async fn send(&self, operations: &[Operation]) -> Result<Vec<OperationResult>>;
}

/// HTTP transport that attaches a freshly obtained bearer token to every
/// outgoing request.
pub struct HttpTransport {
  http: reqwest::Client,
  endpoint: Url,
  tokens: Arc<dyn TokenProvider>,
}

impl HttpTransport {
  pub fn new(endpoint: Url, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
    let http = reqwest::Client::builder().build()?;
    Ok(Self {
      http,
      endpoint,
      tokens,
    })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, operations: &[Operation]) -> Result<Vec<OperationResult>> {
    // Each physical request awaits its own token fetch; a slow refresh here
    // never blocks unrelated concurrent requests.
    let token = self.tokens.current_token().await?;

    let mut request = self.http.post(self.endpoint.clone()).json(&operations);
    if let Some(token) = token {
      request = request.header(reqwest::header::AUTHORIZATION, token);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
      return Err(SyncError::Transport(format!(
        "Request failed with status {}",
        status
      )));
    }

    let results: Vec<OperationResult> = response
      .json()
      .await
      .map_err(|e| SyncError::Protocol(format!("Malformed batch response: {}", e)))?;

    debug!(
      operations = operations.len(),
      results = results.len(),
      "batch round trip"
    );
    Ok(results)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn result_with_errors_surfaces_protocol_error() {
    let result = OperationResult {
      data: None,
      errors: Some(vec![OperationError {
        message: "boom".to_string(),
      }]),
    };
    let err = result.into_data().unwrap_err();
    assert!(matches!(err, SyncError::Protocol(m) if m == "boom"));
  }

  #[test]
  fn result_without_data_or_errors_is_protocol_error() {
    let result = OperationResult {
      data: None,
      errors: None,
    };
    assert!(result.into_data().is_err());
  }

  #[test]
  fn operation_serializes_to_batch_item_shape() {
    let mut op = Operation::new("query { chattingFeed { cursor } }");
    op.set_variable("cursor", json!("c1"));

    let wire = serde_json::to_value(&op).unwrap();
    assert_eq!(wire["variables"]["cursor"], json!("c1"));
    assert!(wire["query"].is_string());
  }

  #[tokio::test]
  async fn no_identity_yields_no_token() {
    assert_eq!(NoIdentity.current_token().await.unwrap(), None);
  }
}
