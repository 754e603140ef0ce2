//! Remote collaborator: the Shiru HTTP API.
//!
//! The engine only sees the [`Remote`] trait; [`ApiClient`] is the reqwest
//! implementation that attaches the session token and reacts to `401`s.

mod client;
pub mod types;

use async_trait::async_trait;

use crate::credential::TokenValidator;
use crate::error::RemoteError;
use crate::resource::Fetched;
use crate::store::{HistoryRecord, Profile, WordRecord};

pub use client::ApiClient;
pub use types::{Translation, WordDraft, WordPatch};

#[async_trait]
pub trait Remote: TokenValidator {
  /// Cheap liveness check of the API.
  async fn ping(&self) -> Result<(), RemoteError>;

  /// Exchange an identity-provider token for a session token and profile.
  async fn exchange_id_token(&self, id_token: &str) -> Result<(String, Profile), RemoteError>;

  async fn list_words(&self) -> Result<Vec<WordRecord>, RemoteError>;

  async fn add_word(&self, draft: &WordDraft) -> Result<WordRecord, RemoteError>;

  async fn update_word(&self, id: &str, patch: &WordPatch) -> Result<(), RemoteError>;

  async fn delete_word(&self, id: &str) -> Result<(), RemoteError>;

  /// Dictionary lookup for a Japanese word, used to prefill a new entry.
  async fn translate(&self, word: &str) -> Result<Translation, RemoteError>;

  async fn list_history(&self) -> Result<Vec<HistoryRecord>, RemoteError>;

  async fn get_history(&self, id: &str) -> Result<HistoryRecord, RemoteError>;

  async fn delete_history(&self, id: &str) -> Result<(), RemoteError>;

  /// Upload an image for analysis; the server records it as a history item.
  async fn analyze_image(&self, image: Vec<u8>, filename: &str)
    -> Result<HistoryRecord, RemoteError>;

  /// Synthesize speech for `text`.
  async fn speak(&self, text: &str) -> Result<Fetched, RemoteError>;

  /// Download raw bytes from an absolute URL (stored images, avatars).
  async fn fetch_bytes(&self, url: &str) -> Result<Fetched, RemoteError>;
}
