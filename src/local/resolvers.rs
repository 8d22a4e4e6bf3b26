//! Field resolver table for combined local/remote queries.
//!
//! Each top-level field of an operation document is either proxied to the
//! network or read from local cache state. The table is consulted at read
//! time, so a container issuing one combined query cannot tell local from
//! remote fields except by the schema definition.

use serde_json::Value;
use std::collections::HashMap;

use super::{LocalExtension, ModalId};
use crate::error::{Result, SyncError};

type LocalResolverFn = fn(&LocalExtension, &Value) -> Result<Value>;

/// Maps top-level field names to local resolvers. Fields not present in the
/// table are proxied to the network result.
pub struct ResolverTable {
  local: HashMap<&'static str, LocalResolverFn>,
}

impl ResolverTable {
  /// The table with the client-only fields registered.
  pub fn with_local_defaults() -> Self {
    let mut local: HashMap<&'static str, LocalResolverFn> = HashMap::new();
    local.insert("modal", resolve_modal);
    local.insert("modals", resolve_modals);
    local.insert("searchQuery", resolve_search_query);
    local.insert("draft", resolve_draft);
    local.insert("candidate", resolve_candidate);
    Self { local }
  }

  pub fn is_local(&self, field: &str) -> bool {
    self.local.contains_key(field)
  }

  /// Resolve a local field from cache state. `variables` are the
  /// operation's variables (used by `modal` for its id argument).
  pub fn resolve(&self, field: &str, local: &LocalExtension, variables: &Value) -> Result<Value> {
    let resolver = self
      .local
      .get(field)
      .ok_or_else(|| SyncError::Protocol(format!("No local resolver for field: {}", field)))?;
    resolver(local, variables)
  }
}

fn resolve_modal(local: &LocalExtension, variables: &Value) -> Result<Value> {
  let id: ModalId = variables
    .get("id")
    .and_then(Value::as_str)
    .ok_or_else(|| SyncError::Protocol("modal query requires an id variable".to_string()))?
    .parse()?;
  Ok(serde_json::to_value(local.modal(id)?)?)
}

fn resolve_modals(local: &LocalExtension, _variables: &Value) -> Result<Value> {
  Ok(serde_json::to_value(local.modals()?)?)
}

fn resolve_search_query(local: &LocalExtension, _variables: &Value) -> Result<Value> {
  Ok(Value::String(local.search_query()?))
}

fn resolve_draft(local: &LocalExtension, _variables: &Value) -> Result<Value> {
  Ok(serde_json::to_value(local.draft()?)?)
}

fn resolve_candidate(local: &LocalExtension, _variables: &Value) -> Result<Value> {
  Ok(serde_json::to_value(local.candidate()?)?)
}

/// One top-level selection of an operation document: the field name plus
/// its byte span (identifier through arguments and nested selection set).
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
  pub name: String,
  pub start: usize,
  pub end: usize,
}

/// Extract the top-level selections of an operation document.
///
/// Scans the first brace-delimited selection set at depth 1, skipping
/// arguments in parentheses, directives, and fragment spreads. Aliases are
/// not supported; none of the app's documents use them.
pub fn top_level_selections(document: &str) -> Vec<Selection> {
  let mut starts: Vec<(String, usize)> = Vec::new();
  let mut close = document.len();
  let mut depth = 0usize;
  let mut parens = 0usize;
  let mut chars = document.char_indices().peekable();
  // Set after "..." or "@" or the fragment keyword "on"
  let mut skip_next_ident = false;

  while let Some((pos, c)) = chars.next() {
    match c {
      '{' => depth += 1,
      '}' => {
        if depth == 0 {
          break;
        }
        depth -= 1;
        if depth == 0 {
          close = pos;
          break;
        }
      }
      '(' => parens += 1,
      ')' => parens = parens.saturating_sub(1),
      '@' => skip_next_ident = true,
      '.' => {
        if matches!(chars.peek(), Some((_, '.'))) {
          skip_next_ident = true;
        }
      }
      c if c.is_ascii_alphabetic() || c == '_' => {
        let mut ident = String::new();
        ident.push(c);
        while let Some(&(_, next)) = chars.peek() {
          if next.is_ascii_alphanumeric() || next == '_' {
            ident.push(next);
            chars.next();
          } else {
            break;
          }
        }

        if skip_next_ident {
          // Inline fragments: "... on Type" skips both identifiers
          skip_next_ident = ident == "on";
        } else if depth == 1 && parens == 0 {
          starts.push((ident, pos));
        }
      }
      _ => {}
    }
  }

  let mut selections = Vec::with_capacity(starts.len());
  for i in 0..starts.len() {
    let (name, start) = starts[i].clone();
    let end = starts.get(i + 1).map(|(_, next)| *next).unwrap_or(close);
    selections.push(Selection { name, start, end });
  }
  selections
}

/// The top-level field names of an operation document, in order.
pub fn top_level_fields(document: &str) -> Vec<String> {
  top_level_selections(document)
    .into_iter()
    .map(|s| s.name)
    .collect()
}

/// Rewrite a document with the named top-level selections removed. Used to
/// strip locally resolved fields before an operation goes on the wire.
pub fn remove_selections(document: &str, names: &[String]) -> String {
  let mut result = String::with_capacity(document.len());
  let mut pos = 0;
  for selection in top_level_selections(document) {
    if names.contains(&selection.name) {
      result.push_str(&document[pos..selection.start]);
      pos = selection.end;
    }
  }
  result.push_str(&document[pos..]);
  result
}
