//! In-process stand-in for the remote service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::api::{Remote, Translation, WordDraft, WordPatch};
use crate::credential::TokenValidator;
use crate::error::RemoteError;
use crate::resource::Fetched;
use crate::store::{HistoryRecord, Profile, WordRecord};

pub const SESSION_TOKEN: &str = "session-token";

type Hook = Box<dyn Fn(&'static str) + Send + Sync>;

/// Server double with per-method call counters and failure switches.
#[derive(Default)]
pub struct MockRemote {
  words: Mutex<Vec<WordRecord>>,
  history: Mutex<Vec<HistoryRecord>>,
  images: Mutex<HashMap<String, Fetched>>,
  calls: Mutex<HashMap<&'static str, usize>>,
  next_id: AtomicUsize,
  failing: AtomicBool,
  unauthorized: AtomicBool,
  hook: Mutex<Option<Hook>>,
}

pub fn profile() -> Profile {
  Profile {
    id: "u1".to_string(),
    name: "Aki".to_string(),
    email: "aki@example.com".to_string(),
    photo_url: Some("https://photos.example/aki.png".to_string()),
  }
}

impl MockRemote {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn seed_word(&self, id: &str, created: DateTime<Utc>) {
    self.words.lock().unwrap().push(WordRecord {
      id: id.to_string(),
      word: format!("word-{}", id),
      reading: "よみ".to_string(),
      meaning: "meaning".to_string(),
      timestamp: Some(created),
    });
  }

  pub fn word(&self, id: &str) -> Option<WordRecord> {
    self.words.lock().unwrap().iter().find(|w| w.id == id).cloned()
  }

  pub fn seed_history(&self, item: HistoryRecord) {
    self.history.lock().unwrap().push(item);
  }

  /// Drop an item server-side without going through the API.
  pub fn forget_history(&self, id: &str) {
    self.history.lock().unwrap().retain(|h| h.id != id);
  }

  pub fn add_image(&self, url: &str, bytes: &[u8]) {
    self
      .images
      .lock()
      .unwrap()
      .insert(url.to_string(), Fetched::new(bytes.to_vec(), "image/jpeg"));
  }

  /// Every call fails with a 503 while set.
  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Every call (token checks included) is rejected with a 401 while set.
  pub fn set_unauthorized(&self, unauthorized: bool) {
    self.unauthorized.store(unauthorized, Ordering::SeqCst);
  }

  /// Run `hook` at the start of every call, before it fails or succeeds.
  pub fn on_call<F: Fn(&'static str) + Send + Sync + 'static>(&self, hook: F) {
    *self.hook.lock().unwrap() = Some(Box::new(hook));
  }

  pub fn calls(&self, method: &str) -> usize {
    self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
  }

  pub fn total_calls(&self) -> usize {
    self.calls.lock().unwrap().values().sum()
  }

  fn enter(&self, method: &'static str) -> Result<(), RemoteError> {
    *self.calls.lock().unwrap().entry(method).or_default() += 1;
    if let Some(hook) = self.hook.lock().unwrap().as_ref() {
      hook(method);
    }

    if self.unauthorized.load(Ordering::SeqCst) {
      return Err(RemoteError::Unauthorized);
    }
    if self.failing.load(Ordering::SeqCst) {
      return Err(RemoteError::Status {
        status: 503,
        message: "service unavailable".to_string(),
      });
    }
    Ok(())
  }

  fn generate_id(&self, prefix: &str) -> String {
    format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
  }
}

#[async_trait]
impl TokenValidator for MockRemote {
  async fn verify_token(&self, token: &str) -> Result<Profile, RemoteError> {
    self.enter("verify_token")?;
    if token.is_empty() {
      return Err(RemoteError::Unauthorized);
    }
    Ok(profile())
  }
}

#[async_trait]
impl Remote for MockRemote {
  async fn ping(&self) -> Result<(), RemoteError> {
    self.enter("ping")
  }

  async fn exchange_id_token(&self, id_token: &str) -> Result<(String, Profile), RemoteError> {
    self.enter("exchange_id_token")?;
    if id_token.is_empty() {
      return Err(RemoteError::Unauthorized);
    }
    Ok((SESSION_TOKEN.to_string(), profile()))
  }

  async fn list_words(&self) -> Result<Vec<WordRecord>, RemoteError> {
    self.enter("list_words")?;
    Ok(self.words.lock().unwrap().clone())
  }

  async fn add_word(&self, draft: &WordDraft) -> Result<WordRecord, RemoteError> {
    self.enter("add_word")?;
    let word = WordRecord {
      id: self.generate_id("w"),
      word: draft.word.clone(),
      reading: draft.kana.clone(),
      meaning: draft.meaning.clone(),
      timestamp: Some(Utc::now()),
    };
    self.words.lock().unwrap().push(word.clone());
    Ok(word)
  }

  async fn update_word(&self, id: &str, patch: &WordPatch) -> Result<(), RemoteError> {
    self.enter("update_word")?;
    let mut words = self.words.lock().unwrap();
    let word = words
      .iter_mut()
      .find(|w| w.id == id)
      .ok_or(RemoteError::NotFound)?;
    patch.apply(word);
    Ok(())
  }

  async fn delete_word(&self, id: &str) -> Result<(), RemoteError> {
    self.enter("delete_word")?;
    let mut words = self.words.lock().unwrap();
    let before = words.len();
    words.retain(|w| w.id != id);
    if words.len() == before {
      return Err(RemoteError::NotFound);
    }
    Ok(())
  }

  async fn translate(&self, word: &str) -> Result<Translation, RemoteError> {
    self.enter("translate")?;
    Ok(Translation {
      word: word.to_string(),
      kana: "よみ".to_string(),
      meaning: format!("meaning of {}", word),
      example: None,
      example_meaning: None,
    })
  }

  async fn list_history(&self) -> Result<Vec<HistoryRecord>, RemoteError> {
    self.enter("list_history")?;
    Ok(self.history.lock().unwrap().clone())
  }

  async fn get_history(&self, id: &str) -> Result<HistoryRecord, RemoteError> {
    self.enter("get_history")?;
    self
      .history
      .lock()
      .unwrap()
      .iter()
      .find(|h| h.id == id)
      .cloned()
      .ok_or(RemoteError::NotFound)
  }

  async fn delete_history(&self, id: &str) -> Result<(), RemoteError> {
    self.enter("delete_history")?;
    let mut history = self.history.lock().unwrap();
    let before = history.len();
    history.retain(|h| h.id != id);
    if history.len() == before {
      return Err(RemoteError::NotFound);
    }
    Ok(())
  }

  async fn analyze_image(
    &self,
    image: Vec<u8>,
    filename: &str,
  ) -> Result<HistoryRecord, RemoteError> {
    self.enter("analyze_image")?;
    let id = self.generate_id("h");
    let item = HistoryRecord {
      image_url: Some(format!("https://storage.example/{}/{}", id, filename)),
      id,
      sentence: "猫".to_string(),
      translated_sentence: "猫".to_string(),
      word_count: image.len() as u32,
      words: Vec::new(),
      timestamp: Some(Utc::now()),
    };
    self.history.lock().unwrap().push(item.clone());
    Ok(item)
  }

  async fn speak(&self, text: &str) -> Result<Fetched, RemoteError> {
    self.enter("speak")?;
    Ok(Fetched::new(text.as_bytes().to_vec(), "audio/mpeg"))
  }

  async fn fetch_bytes(&self, url: &str) -> Result<Fetched, RemoteError> {
    self.enter("fetch_bytes")?;
    self
      .images
      .lock()
      .unwrap()
      .get(url)
      .cloned()
      .ok_or(RemoteError::NotFound)
  }
}
