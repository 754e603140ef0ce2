//! Record types persisted by the store.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Named collections of the persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  Credential,
  Avatar,
  ResourceCache,
  WordMirror,
  HistoryMirror,
  SyncMetadata,
}

impl Collection {
  pub const ALL: [Collection; 6] = [
    Collection::Credential,
    Collection::Avatar,
    Collection::ResourceCache,
    Collection::WordMirror,
    Collection::HistoryMirror,
    Collection::SyncMetadata,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Collection::Credential => "credential",
      Collection::Avatar => "avatar",
      Collection::ResourceCache => "resource-cache",
      Collection::WordMirror => "word-mirror",
      Collection::HistoryMirror => "history-mirror",
      Collection::SyncMetadata => "sync-metadata",
    }
  }
}

impl std::fmt::Display for Collection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Trait for anything stored in a collection.
///
/// Implementors provide the key they are addressed by and the collection they
/// live in. Records are stored as serialized JSON and overwritten whole.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned {
  fn collection() -> Collection;

  fn key(&self) -> String;
}

/// Records mirrored from a server-backed collection.
pub trait MirrorRecord: Record + 'static {
  /// Human-readable kind used in errors and logs
  const KIND: &'static str;

  fn id(&self) -> &str;

  fn assign_id(&mut self, id: String);

  /// Local ordering timestamp. `None` only before the first save.
  fn timestamp(&self) -> Option<DateTime<Utc>>;

  fn set_timestamp(&mut self, timestamp: DateTime<Utc>);

  /// Remote image this record points to, if any.
  fn image_ref(&self) -> Option<&str> {
    None
  }

  /// Give the record an id if it came without one.
  fn ensure_id(&mut self) {
    if self.id().is_empty() {
      self.assign_id(Uuid::new_v4().to_string());
    }
  }
}

// ============================================================================
// Session records
// ============================================================================

/// User profile snapshot returned by the server alongside the token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub email: String,
  #[serde(default, rename = "photoURL", alias = "photo_url")]
  pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
  pub id: String,
  pub token: String,
  pub profile: Profile,
  pub timestamp: DateTime<Utc>,
}

impl CredentialRecord {
  pub const SINGLETON: &'static str = "current";
}

impl Record for CredentialRecord {
  fn collection() -> Collection {
    Collection::Credential
  }

  fn key(&self) -> String {
    self.id.clone()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvatarRecord {
  pub id: String,
  /// Inline image (data URL)
  pub data: String,
  pub timestamp: DateTime<Utc>,
}

impl AvatarRecord {
  pub const SINGLETON: &'static str = "userAvatar";
}

impl Record for AvatarRecord {
  fn collection() -> Collection {
    Collection::Avatar
  }

  fn key(&self) -> String {
    self.id.clone()
  }
}

/// Cached binary artifact keyed by the exact source identifier (URL or spoken text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
  pub source: String,
  pub payload: String,
  pub timestamp: DateTime<Utc>,
}

impl Record for ResourceRecord {
  fn collection() -> Collection {
    Collection::ResourceCache
  }

  fn key(&self) -> String {
    self.source.clone()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
  pub id: String,
  pub last_full_sync: Option<DateTime<Utc>>,
}

impl SyncMetadata {
  pub const SINGLETON: &'static str = "sync";
}

impl Record for SyncMetadata {
  fn collection() -> Collection {
    Collection::SyncMetadata
  }

  fn key(&self) -> String {
    self.id.clone()
  }
}

// ============================================================================
// Mirrored records
// ============================================================================

/// Wordbook entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordRecord {
  pub id: String,
  pub word: String,
  /// Kana reading
  pub reading: String,
  pub meaning: String,
  pub timestamp: Option<DateTime<Utc>>,
}

impl Record for WordRecord {
  fn collection() -> Collection {
    Collection::WordMirror
  }

  fn key(&self) -> String {
    self.id.clone()
  }
}

impl MirrorRecord for WordRecord {
  const KIND: &'static str = "word";

  fn id(&self) -> &str {
    &self.id
  }

  fn assign_id(&mut self, id: String) {
    self.id = id;
  }

  fn timestamp(&self) -> Option<DateTime<Utc>> {
    self.timestamp
  }

  fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
    self.timestamp = Some(timestamp);
  }
}

/// Word detected in an analyzed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
  pub word: String,
  pub reading: String,
  pub meaning: String,
  pub position_x: f64,
  pub position_y: f64,
}

/// One analyzed image with its sentence, translation and detected words.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
  pub id: String,
  pub image_url: Option<String>,
  pub sentence: String,
  pub translated_sentence: String,
  pub word_count: u32,
  #[serde(default)]
  pub words: Vec<Annotation>,
  /// Original creation time; set once, never replaced on re-save
  pub timestamp: Option<DateTime<Utc>>,
}

impl Record for HistoryRecord {
  fn collection() -> Collection {
    Collection::HistoryMirror
  }

  fn key(&self) -> String {
    self.id.clone()
  }
}

impl MirrorRecord for HistoryRecord {
  const KIND: &'static str = "history item";

  fn id(&self) -> &str {
    &self.id
  }

  fn assign_id(&mut self, id: String) {
    self.id = id;
  }

  fn timestamp(&self) -> Option<DateTime<Utc>> {
    self.timestamp
  }

  fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
    self.timestamp = Some(timestamp);
  }

  fn image_ref(&self) -> Option<&str> {
    self.image_url.as_deref().filter(|url| !url.is_empty())
  }
}
