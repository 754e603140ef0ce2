//! Mirrored wordbook.

use std::sync::Arc;
use tracing::debug;

use super::layer::{newest_first, MirrorLayer};
use super::outcome::{DeleteOutcome, Synced};
use crate::api::{Remote, Translation, WordDraft, WordPatch};
use crate::error::{Error, RemoteError, Result};
use crate::store::{Storage, WordRecord};

/// The user's saved words, served from the server when reachable and from the
/// local mirror otherwise.
pub struct Wordbook<S: Storage> {
  remote: Arc<dyn Remote>,
  layer: MirrorLayer<S>,
}

impl<S: Storage + 'static> Wordbook<S> {
  pub fn new(remote: Arc<dyn Remote>, layer: MirrorLayer<S>) -> Self {
    Self { remote, layer }
  }

  /// All words, newest first.
  pub async fn list(&self) -> Result<Synced<Vec<WordRecord>>> {
    let remote = Arc::clone(&self.remote);
    let result = self
      .layer
      .fetch_all(move || async move { remote.list_words().await })
      .await?;

    Ok(result.map(|mut words| {
      newest_first(&mut words);
      words
    }))
  }

  /// A single word. The server has no per-word endpoint, so the remote copy
  /// is looked up in the full list.
  pub async fn get(&self, id: &str) -> Result<Synced<WordRecord>> {
    let remote = Arc::clone(&self.remote);
    let wanted = id.to_string();
    self
      .layer
      .fetch_one(id, move || async move {
        remote
          .list_words()
          .await?
          .into_iter()
          .find(|word| word.id == wanted)
          .ok_or(RemoteError::NotFound)
      })
      .await
  }

  pub async fn add(&self, draft: WordDraft) -> Result<WordRecord> {
    self
      .layer
      .create(|| {
        let remote = Arc::clone(&self.remote);
        async move { remote.add_word(&draft).await }
      })
      .await
  }

  /// Patch a word on the server and in the mirror.
  ///
  /// Returns the updated mirror copy, if the word was mirrored.
  pub async fn update(&self, id: &str, patch: WordPatch) -> Result<Option<WordRecord>> {
    if patch.is_empty() {
      debug!(id, "empty word patch, nothing to send");
      return Ok(None);
    }

    let remote = Arc::clone(&self.remote);
    let remote_patch = patch.clone();
    let remote_id = id.to_string();
    self
      .layer
      .update(
        id,
        || async move { remote.update_word(&remote_id, &remote_patch).await },
        |word: &mut WordRecord| patch.apply(word),
      )
      .await
  }

  /// Look a word up in the server's dictionary. Online only, nothing is cached.
  pub async fn lookup(&self, word: &str) -> Result<Translation> {
    if !self.layer.is_reachable() {
      return Err(Error::Remote(RemoteError::Offline));
    }
    Ok(self.remote.translate(word).await?)
  }

  pub async fn remove(&self, id: &str) -> Result<DeleteOutcome> {
    self
      .layer
      .delete::<WordRecord, _, _>(id, || {
        let remote = Arc::clone(&self.remote);
        let id = id.to_string();
        async move { remote.delete_word(&id).await }
      })
      .await
  }
}
