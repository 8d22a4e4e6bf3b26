//! Normalized in-memory object cache.
//!
//! Every entity is kept exactly once, keyed by `(typename, id)`, with
//! relationships expressed as references. Server responses are normalized on
//! write (identifiable objects extracted into their own entries) and
//! denormalized on read (references resolved back into nested objects).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Key of a normalized cache entry.
///
/// Singleton entities (Draft, Candidate, the query root) carry an empty id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
  pub typename: String,
  pub id: String,
}

impl EntityKey {
  pub fn new(typename: impl Into<String>, id: impl Into<String>) -> Self {
    Self {
      typename: typename.into(),
      id: id.into(),
    }
  }

  /// Key for a singleton entity with no server-side identity.
  pub fn singleton(typename: impl Into<String>) -> Self {
    Self {
      typename: typename.into(),
      id: String::new(),
    }
  }

  /// The query root, holder of top-level response fields.
  pub fn root() -> Self {
    Self::singleton("Query")
  }

  pub fn is_singleton(&self) -> bool {
    self.id.is_empty()
  }
}

impl fmt::Display for EntityKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.id.is_empty() {
      write!(f, "{}", self.typename)
    } else {
      write!(f, "{}:{}", self.typename, self.id)
    }
  }
}

/// A stored field: scalar data, a reference to another entry, an embedded
/// object without its own identity, or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
  Null,
  Scalar(Value),
  Ref(EntityKey),
  Object(BTreeMap<String, FieldValue>),
  List(Vec<FieldValue>),
}

/// One normalized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: EntityKey,
  pub fields: BTreeMap<String, FieldValue>,
}

impl CacheEntry {
  pub fn new(key: EntityKey) -> Self {
    Self {
      key,
      fields: BTreeMap::new(),
    }
  }
}

/// The normalized cache. Single-writer: all mutation goes through the
/// `SharedCache` handle owned by the data client.
#[derive(Debug, Default)]
pub struct InMemoryCache {
  entries: BTreeMap<EntityKey, CacheEntry>,
}

impl InMemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn entry(&self, key: &EntityKey) -> Option<&CacheEntry> {
    self.entries.get(key)
  }

  pub fn clear(&mut self) {
    self.entries.clear();
  }

  /// All entries in key order, cloned for snapshotting.
  pub fn export(&self) -> Vec<CacheEntry> {
    self.entries.values().cloned().collect()
  }

  /// Replace the cache contents wholesale (snapshot restore).
  pub fn import(&mut self, entries: Vec<CacheEntry>) {
    self.entries = entries.into_iter().map(|e| (e.key.clone(), e)).collect();
  }

  /// Write a single field on an entry, creating the entry if needed.
  pub fn write_field(&mut self, key: &EntityKey, name: &str, value: FieldValue) {
    self
      .entries
      .entry(key.clone())
      .or_insert_with(|| CacheEntry::new(key.clone()))
      .fields
      .insert(name.to_string(), value);
  }

  /// Merge an object's fields into an entry, normalizing nested values.
  pub fn write_object(&mut self, key: &EntityKey, object: &Map<String, Value>) {
    for (name, value) in object {
      let normalized = self.normalize_value(value);
      self.write_field(key, name, normalized);
    }
  }

  /// Write a top-level response object: each field lands on the query root.
  pub fn write_data(&mut self, data: &Map<String, Value>) {
    let root = EntityKey::root();
    self.write_object(&root, data);
  }

  /// Normalize a JSON value. Objects carrying both `__typename` and `id`
  /// are extracted into their own entry and replaced by a reference; other
  /// objects stay embedded but their fields are normalized in place, so
  /// identifiable objects nested anywhere in a response become entries.
  pub fn normalize_value(&mut self, value: &Value) -> FieldValue {
    match value {
      Value::Null => FieldValue::Null,
      Value::Array(items) => {
        FieldValue::List(items.iter().map(|v| self.normalize_value(v)).collect())
      }
      Value::Object(object) => match identify(object) {
        Some(key) => {
          self.write_object(&key, object);
          FieldValue::Ref(key)
        }
        None => FieldValue::Object(
          object
            .iter()
            .map(|(name, value)| (name.clone(), self.normalize_value(value)))
            .collect(),
        ),
      },
      scalar => FieldValue::Scalar(scalar.clone()),
    }
  }

  /// Read a field off an entry without resolving references.
  pub fn read_field(&self, key: &EntityKey, name: &str) -> Option<&FieldValue> {
    self.entries.get(key).and_then(|e| e.fields.get(name))
  }

  /// Read a top-level field as denormalized JSON.
  pub fn read_root(&self, name: &str) -> Option<Value> {
    let root = EntityKey::root();
    self
      .read_field(&root, name)
      .map(|v| self.denormalize_value(v, &mut Vec::new()))
  }

  /// Read a whole entry as a denormalized JSON object.
  pub fn read_entry(&self, key: &EntityKey) -> Option<Value> {
    self.entries.get(key).map(|entry| {
      let mut seen = vec![key.clone()];
      self.entry_to_value(entry, &mut seen)
    })
  }

  fn entry_to_value(&self, entry: &CacheEntry, seen: &mut Vec<EntityKey>) -> Value {
    let object: Map<String, Value> = entry
      .fields
      .iter()
      .map(|(name, value)| (name.clone(), self.denormalize_value(value, seen)))
      .collect();
    Value::Object(object)
  }

  fn denormalize_value(&self, value: &FieldValue, seen: &mut Vec<EntityKey>) -> Value {
    match value {
      FieldValue::Null => Value::Null,
      FieldValue::Scalar(v) => v.clone(),
      FieldValue::Object(fields) => Value::Object(
        fields
          .iter()
          .map(|(name, value)| (name.clone(), self.denormalize_value(value, seen)))
          .collect(),
      ),
      FieldValue::List(items) => Value::Array(
        items
          .iter()
          .map(|v| self.denormalize_value(v, seen))
          .collect(),
      ),
      FieldValue::Ref(key) => {
        // Cycle guard: a reference back into the current path reads as null.
        if seen.contains(key) {
          return Value::Null;
        }
        match self.entries.get(key) {
          Some(entry) => {
            seen.push(key.clone());
            let value = self.entry_to_value(entry, seen);
            seen.pop();
            value
          }
          // Dangling references resolve to null rather than erroring.
          None => Value::Null,
        }
      }
    }
  }

  /// References that do not resolve to an existing entry. Used by tests to
  /// check the reference invariant after writes.
  pub fn dangling_refs(&self) -> Vec<EntityKey> {
    let mut dangling = Vec::new();
    for entry in self.entries.values() {
      for value in entry.fields.values() {
        self.collect_dangling(value, &mut dangling);
      }
    }
    dangling
  }

  fn collect_dangling(&self, value: &FieldValue, out: &mut Vec<EntityKey>) {
    match value {
      FieldValue::Ref(key) if !self.entries.contains_key(key) => out.push(key.clone()),
      FieldValue::List(items) => {
        for item in items {
          self.collect_dangling(item, out);
        }
      }
      FieldValue::Object(fields) => {
        for value in fields.values() {
          self.collect_dangling(value, out);
        }
      }
      _ => {}
    }
  }
}

/// Extract the cache identity of a JSON object, if it has one.
fn identify(object: &Map<String, Value>) -> Option<EntityKey> {
  let typename = object.get("__typename")?.as_str()?;
  let id = match object.get("id")? {
    Value::String(s) => s.clone(),
    Value::Number(n) => n.to_string(),
    _ => return None,
  };
  Some(EntityKey::new(typename, id))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn normalizes_identifiable_objects_into_entries() {
    let mut cache = InMemoryCache::new();
    let data = json!({
      "chattingFeed": {
        "chattings": [
          { "__typename": "Chatting", "id": "1", "messageCount": 2 },
          { "__typename": "Chatting", "id": "2", "messageCount": 8 }
        ],
        "cursor": "c1"
      }
    });

    cache.write_data(data.as_object().unwrap());

    let key = EntityKey::new("Chatting", "1");
    assert!(cache.entry(&key).is_some());
    assert_eq!(
      cache.read_field(&key, "messageCount"),
      Some(&FieldValue::Scalar(json!(2)))
    );
    assert!(cache.dangling_refs().is_empty());
  }

  #[test]
  fn denormalizes_refs_back_into_nested_objects() {
    let mut cache = InMemoryCache::new();
    let data = json!({
      "chatting": {
        "__typename": "Chatting",
        "id": "7",
        "partner": { "__typename": "User", "id": "u1", "displayName": "partner" }
      }
    });

    cache.write_data(data.as_object().unwrap());

    let read = cache.read_root("chatting").unwrap();
    assert_eq!(read["partner"]["displayName"], json!("partner"));
    // Two entries plus the root
    assert_eq!(cache.len(), 3);
  }

  #[test]
  fn writes_merge_into_existing_entries() {
    let mut cache = InMemoryCache::new();
    let key = EntityKey::new("Story", "s1");
    cache.write_field(&key, "title", FieldValue::Scalar(json!("first")));
    cache.write_field(&key, "likes", FieldValue::Scalar(json!(3)));
    cache.write_field(&key, "title", FieldValue::Scalar(json!("second")));

    assert_eq!(
      cache.read_field(&key, "title"),
      Some(&FieldValue::Scalar(json!("second")))
    );
    assert_eq!(
      cache.read_field(&key, "likes"),
      Some(&FieldValue::Scalar(json!(3)))
    );
  }

  #[test]
  fn dangling_ref_reads_as_null() {
    let mut cache = InMemoryCache::new();
    let root = EntityKey::root();
    cache.write_field(
      &root,
      "story",
      FieldValue::Ref(EntityKey::new("Story", "missing")),
    );

    assert_eq!(cache.read_root("story"), Some(Value::Null));
    assert_eq!(cache.dangling_refs(), vec![EntityKey::new("Story", "missing")]);
  }

  #[test]
  fn export_import_round_trips() {
    let mut cache = InMemoryCache::new();
    let data = json!({
      "searchQuery": "mu",
      "story": { "__typename": "Story", "id": "s1", "title": "t" }
    });
    cache.write_data(data.as_object().unwrap());

    let mut restored = InMemoryCache::new();
    restored.import(cache.export());

    assert_eq!(restored.read_root("searchQuery"), Some(json!("mu")));
    assert_eq!(restored.read_root("story").unwrap()["title"], json!("t"));
  }
}
