//! Write-through cache for immutable binary artifacts.
//!
//! Remote images and synthesized audio are stored as inline data URLs keyed by
//! their exact source identifier (URL or spoken text). Entries never expire and
//! nothing is evicted.

use base64::Engine;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, RemoteError, StorageError};
use crate::store::{AvatarRecord, ResourceRecord, Storage};

/// Raw bytes downloaded from the remote service.
#[derive(Debug, Clone)]
pub struct Fetched {
  pub bytes: Vec<u8>,
  pub content_type: String,
}

impl Fetched {
  pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
    Self {
      bytes,
      content_type: content_type.into(),
    }
  }

  pub fn to_inline(&self) -> String {
    to_inline(&self.bytes, &self.content_type)
  }
}

/// Encode bytes as a `data:` URL.
pub fn to_inline(bytes: &[u8], content_type: &str) -> String {
  let content_type = if content_type.is_empty() {
    "application/octet-stream"
  } else {
    content_type
  };
  format!(
    "data:{};base64,{}",
    content_type,
    base64::engine::general_purpose::STANDARD.encode(bytes)
  )
}

/// Whether a value is already an inline payload.
pub fn is_inline(value: &str) -> bool {
  value.starts_with("data:")
}

/// Decode an inline payload back into bytes and content type.
pub fn from_inline(value: &str) -> Option<Fetched> {
  let rest = value.strip_prefix("data:")?;
  let (content_type, data) = rest.split_once(";base64,")?;
  let bytes = base64::engine::general_purpose::STANDARD
    .decode(data)
    .ok()?;
  Some(Fetched::new(bytes, content_type))
}

pub struct ResourceCache<S: Storage> {
  storage: Arc<S>,
}

impl<S: Storage> ResourceCache<S> {
  pub fn new(storage: Arc<S>) -> Self {
    Self { storage }
  }

  /// Stored payload for a source, if any. Sources that already are inline
  /// payloads are returned as they are.
  pub fn get(&self, source: &str) -> Result<Option<String>, StorageError> {
    if is_inline(source) {
      return Ok(Some(source.to_string()));
    }
    Ok(
      self
        .storage
        .get::<ResourceRecord>(source)?
        .map(|record| record.payload),
    )
  }

  /// Store a payload. A second put for the same source overwrites the first.
  pub fn put(&self, source: &str, payload: &str) -> Result<(), StorageError> {
    if is_inline(source) {
      return Ok(());
    }
    self.storage.put(&ResourceRecord {
      source: source.to_string(),
      payload: payload.to_string(),
      timestamp: Utc::now(),
    })
  }

  /// Return the cached payload, or fetch, convert and store it on a miss.
  pub async fn get_or_fetch<F, Fut>(&self, source: &str, fetcher: F) -> Result<String, Error>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Fetched, RemoteError>>,
  {
    if let Some(payload) = self.get(source)? {
      return Ok(payload);
    }

    let payload = fetcher().await?.to_inline();
    self.put(source, &payload)?;
    debug!(source = %preview(source), "cached resource");
    Ok(payload)
  }
}

impl<S: Storage> Clone for ResourceCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

/// Single cached copy of the user's avatar.
pub struct AvatarCache<S: Storage> {
  storage: Arc<S>,
}

impl<S: Storage> AvatarCache<S> {
  pub fn new(storage: Arc<S>) -> Self {
    Self { storage }
  }

  pub fn get(&self) -> Result<Option<String>, StorageError> {
    Ok(
      self
        .storage
        .get::<AvatarRecord>(AvatarRecord::SINGLETON)?
        .map(|record| record.data),
    )
  }

  /// Replace the cached avatar.
  pub fn put(&self, inline: &str) -> Result<(), StorageError> {
    self.storage.put(&AvatarRecord {
      id: AvatarRecord::SINGLETON.to_string(),
      data: inline.to_string(),
      timestamp: Utc::now(),
    })
  }

  /// Cache the avatar behind `photo_url`, fetching only when it is not inline.
  pub async fn refresh<F, Fut>(&self, photo_url: &str, fetcher: F) -> Result<String, Error>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Fetched, RemoteError>>,
  {
    let inline = if is_inline(photo_url) {
      photo_url.to_string()
    } else {
      fetcher().await?.to_inline()
    };
    self.put(&inline)?;
    Ok(inline)
  }
}

/// Shorten long keys (spoken sentences, signed URLs) for logs.
fn preview(source: &str) -> String {
  const MAX: usize = 48;
  match source.char_indices().nth(MAX) {
    Some((idx, _)) => format!("{}…", &source[..idx]),
    None => source.to_string(),
  }
}
