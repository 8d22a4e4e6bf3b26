//! Client-only schema extension.
//!
//! Modal visibility, the search query, the in-progress story draft, and the
//! candidate profile live only in the local cache; their operations are
//! plain cache writes and never touch the network. The baseline below is
//! seeded at configure time and re-applied verbatim after every store reset,
//! so reads never observe missing local state.

mod resolvers;

pub use resolvers::{remove_selections, top_level_fields, top_level_selections, ResolverTable, Selection};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

use crate::cache::{EntityKey, FieldValue, SharedCache};
use crate::error::{Result, SyncError};

/// The fixed set of application modals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModalId {
  Auth,
  Reply,
  Cover,
  Coin,
}

impl ModalId {
  pub const ALL: [ModalId; 4] = [ModalId::Auth, ModalId::Reply, ModalId::Cover, ModalId::Coin];

  pub fn as_str(&self) -> &'static str {
    match self {
      ModalId::Auth => "Auth",
      ModalId::Reply => "Reply",
      ModalId::Cover => "Cover",
      ModalId::Coin => "Coin",
    }
  }

  fn entity_key(&self) -> EntityKey {
    EntityKey::new("Modal", self.as_str())
  }
}

impl fmt::Display for ModalId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ModalId {
  type Err = SyncError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "Auth" => Ok(ModalId::Auth),
      "Reply" => Ok(ModalId::Reply),
      "Cover" => Ok(ModalId::Cover),
      "Coin" => Ok(ModalId::Coin),
      other => Err(SyncError::Protocol(format!("Unknown modal id: {}", other))),
    }
  }
}

/// Visibility state of one modal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modal {
  pub id: ModalId,
  pub params: Option<String>,
  pub is_visible: bool,
}

impl Modal {
  fn hidden(id: ModalId) -> Self {
    Self {
      id,
      params: None,
      is_visible: false,
    }
  }
}

/// In-progress story draft. Singleton.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Draft {
  #[serde(default)]
  pub cover: String,
  #[serde(default)]
  pub tags: Vec<String>,
}

/// Sign-up candidate profile. Singleton.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
  pub name: Option<String>,
  pub gender: Option<String>,
}

/// Partial update for the draft; unset fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DraftPatch {
  pub cover: Option<String>,
  pub tags: Option<Vec<String>>,
}

/// Partial update for the candidate profile.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidatePatch {
  pub name: Option<String>,
  pub gender: Option<String>,
}

const SEARCH_QUERY_FIELD: &str = "searchQuery";
const MODALS_FIELD: &str = "modals";

fn draft_key() -> EntityKey {
  EntityKey::singleton("Draft")
}

fn candidate_key() -> EntityKey {
  EntityKey::singleton("Candidate")
}

fn modal_value(modal: &Modal) -> Value {
  json!({
    "__typename": "Modal",
    "id": modal.id.as_str(),
    "params": modal.params.as_deref(),
    "isVisible": modal.is_visible,
  })
}

/// Local-state operations over the shared cache.
#[derive(Clone)]
pub struct LocalExtension {
  cache: SharedCache,
}

impl LocalExtension {
  pub fn new(cache: SharedCache) -> Self {
    Self { cache }
  }

  /// Write the fixed initial baseline: all modals hidden, empty search
  /// query, empty draft, empty candidate.
  pub fn seed(&self) -> Result<()> {
    self.cache.write(|c| {
      let mut modal_refs = Vec::new();
      for id in ModalId::ALL {
        let key = id.entity_key();
        let value = modal_value(&Modal::hidden(id));
        if let Value::Object(object) = &value {
          c.write_object(&key, object);
        }
        modal_refs.push(FieldValue::Ref(key));
      }
      c.write_field(&EntityKey::root(), MODALS_FIELD, FieldValue::List(modal_refs));
      c.write_field(
        &EntityKey::root(),
        SEARCH_QUERY_FIELD,
        FieldValue::Scalar(json!("")),
      );
      let draft = json!({ "__typename": "Draft", "cover": "", "tags": [] });
      if let Value::Object(object) = &draft {
        c.write_object(&draft_key(), object);
      }
      let candidate = json!({ "__typename": "Candidate", "name": null, "gender": null });
      if let Value::Object(object) = &candidate {
        c.write_object(&candidate_key(), object);
      }
    })
  }

  /// Re-apply the seeded baseline. Called after every cache reset.
  pub fn reset(&self) -> Result<()> {
    self.seed()
  }

  pub fn show_modal(&self, id: ModalId, params: Option<String>) -> Result<()> {
    let value = modal_value(&Modal {
      id,
      params,
      is_visible: true,
    });
    self.write_modal(id, value)
  }

  pub fn hide_modal(&self, id: ModalId) -> Result<()> {
    let value = modal_value(&Modal::hidden(id));
    self.write_modal(id, value)
  }

  fn write_modal(&self, id: ModalId, value: Value) -> Result<()> {
    self.cache.write(|c| {
      if let Value::Object(object) = &value {
        c.write_object(&id.entity_key(), object);
      }
    })
  }

  pub fn set_search_query(&self, text: &str) -> Result<()> {
    self.cache.write(|c| {
      c.write_field(
        &EntityKey::root(),
        SEARCH_QUERY_FIELD,
        FieldValue::Scalar(json!(text)),
      )
    })
  }

  pub fn update_draft(&self, patch: DraftPatch) -> Result<()> {
    let mut draft = self.draft()?;
    if let Some(cover) = patch.cover {
      draft.cover = cover;
    }
    if let Some(tags) = patch.tags {
      draft.tags = tags;
    }

    let value = json!({
      "__typename": "Draft",
      "cover": draft.cover,
      "tags": draft.tags,
    });
    self.cache.write(|c| {
      if let Value::Object(object) = &value {
        c.write_object(&draft_key(), object);
      }
    })
  }

  pub fn update_candidate(&self, patch: CandidatePatch) -> Result<()> {
    let mut candidate = self.candidate()?;
    if let Some(name) = patch.name {
      candidate.name = Some(name);
    }
    if let Some(gender) = patch.gender {
      candidate.gender = Some(gender);
    }

    let value = json!({
      "__typename": "Candidate",
      "name": candidate.name,
      "gender": candidate.gender,
    });
    self.cache.write(|c| {
      if let Value::Object(object) = &value {
        c.write_object(&candidate_key(), object);
      }
    })
  }

  pub fn modal(&self, id: ModalId) -> Result<Modal> {
    Ok(
      self
        .read_entity(&id.entity_key())?
        .unwrap_or_else(|| Modal::hidden(id)),
    )
  }

  pub fn modals(&self) -> Result<Vec<Modal>> {
    ModalId::ALL.iter().map(|id| self.modal(*id)).collect()
  }

  pub fn search_query(&self) -> Result<String> {
    let value = self.cache.read(|c| c.read_root(SEARCH_QUERY_FIELD))?;
    Ok(
      value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default(),
    )
  }

  pub fn draft(&self) -> Result<Draft> {
    Ok(self.read_entity(&draft_key())?.unwrap_or_default())
  }

  pub fn candidate(&self) -> Result<Candidate> {
    Ok(self.read_entity(&candidate_key())?.unwrap_or_default())
  }

  fn read_entity<T: DeserializeOwned>(&self, key: &EntityKey) -> Result<Option<T>> {
    let value = self.cache.read(|c| c.read_entry(key))?;
    match value {
      Some(v) => Ok(Some(serde_json::from_value(v)?)),
      None => Ok(None),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn seeded() -> LocalExtension {
    let local = LocalExtension::new(SharedCache::new());
    local.seed().unwrap();
    local
  }

  #[test]
  fn seed_establishes_baseline() {
    let local = seeded();

    for id in ModalId::ALL {
      let modal = local.modal(id).unwrap();
      assert!(!modal.is_visible);
      assert_eq!(modal.params, None);
    }
    assert_eq!(local.search_query().unwrap(), "");
    assert_eq!(local.draft().unwrap(), Draft::default());
    assert_eq!(local.candidate().unwrap(), Candidate::default());
  }

  #[test]
  fn show_and_hide_modal() {
    let local = seeded();

    local
      .show_modal(ModalId::Reply, Some("chatting:42".to_string()))
      .unwrap();
    let modal = local.modal(ModalId::Reply).unwrap();
    assert!(modal.is_visible);
    assert_eq!(modal.params.as_deref(), Some("chatting:42"));

    // Other modals are untouched
    assert!(!local.modal(ModalId::Auth).unwrap().is_visible);

    local.hide_modal(ModalId::Reply).unwrap();
    let modal = local.modal(ModalId::Reply).unwrap();
    assert!(!modal.is_visible);
    assert_eq!(modal.params, None);
  }

  #[test]
  fn draft_patch_preserves_unset_fields() {
    let local = seeded();

    local
      .update_draft(DraftPatch {
        cover: Some("covers/1.png".to_string()),
        tags: None,
      })
      .unwrap();
    local
      .update_draft(DraftPatch {
        cover: None,
        tags: Some(vec!["daily".to_string()]),
      })
      .unwrap();

    let draft = local.draft().unwrap();
    assert_eq!(draft.cover, "covers/1.png");
    assert_eq!(draft.tags, vec!["daily".to_string()]);
  }

  #[test]
  fn reset_restores_seeded_values() {
    let local = seeded();

    local.show_modal(ModalId::Coin, None).unwrap();
    local.set_search_query("abc").unwrap();
    local
      .update_candidate(CandidatePatch {
        name: Some("Mu".to_string()),
        gender: None,
      })
      .unwrap();

    local.reset().unwrap();

    for id in ModalId::ALL {
      assert!(!local.modal(id).unwrap().is_visible);
    }
    assert_eq!(local.search_query().unwrap(), "");
    assert_eq!(local.candidate().unwrap(), Candidate::default());
  }

  #[test]
  fn reads_fall_back_to_baseline_before_seed() {
    let local = LocalExtension::new(SharedCache::new());
    // Never errors, never observes "missing"
    assert!(!local.modal(ModalId::Auth).unwrap().is_visible);
    assert_eq!(local.search_query().unwrap(), "");
  }
}
