//! Session credential cache.
//!
//! Lifecycle: `Absent -> Valid -> Expired -> Absent`. Expiry is evaluated on
//! access only: a read that finds a record older than [`credential_ttl`]
//! deletes it and reports absence. Reads are served from an in-memory copy that
//! is dropped whenever a [`SessionSignal::CredentialCleared`] is observed.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, OnceCell};
use tracing::{debug, info, warn};

use crate::error::{RemoteError, StorageError};
use crate::session::{SessionBus, SessionSignal};
use crate::store::{CredentialRecord, Profile, Storage};

/// Days a saved credential stays valid without a refresh.
pub const CREDENTIAL_TTL_DAYS: i64 = 7;

pub fn credential_ttl() -> Duration {
  Duration::days(CREDENTIAL_TTL_DAYS)
}

/// True once `now - saved_at` strictly exceeds the TTL.
pub fn is_expired(saved_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
  now - saved_at > credential_ttl()
}

/// Short, log-safe identifier for a token.
pub fn token_fingerprint(token: &str) -> String {
  let digest = Sha256::digest(token.as_bytes());
  hex::encode(&digest[..8])
}

/// Checks a bearer token against the server.
#[async_trait]
pub trait TokenValidator: Send + Sync {
  async fn verify_token(&self, token: &str) -> Result<Profile, RemoteError>;
}

/// The pre-keyed token storage from older client versions: a bare token with
/// no timestamp or profile.
pub trait LegacyTokenStore: Send + Sync {
  fn read(&self) -> Option<String>;

  fn remove(&self);
}

/// Legacy token kept as a plain file.
pub struct FileLegacyToken {
  path: PathBuf,
}

impl FileLegacyToken {
  pub fn new(path: PathBuf) -> Self {
    Self { path }
  }
}

impl LegacyTokenStore for FileLegacyToken {
  fn read(&self) -> Option<String> {
    let token = std::fs::read_to_string(&self.path).ok()?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
  }

  fn remove(&self) {
    if let Err(e) = std::fs::remove_file(&self.path) {
      if e.kind() != std::io::ErrorKind::NotFound {
        warn!(path = %self.path.display(), "failed to remove legacy token: {}", e);
      }
    }
  }
}

/// Result of the one-time legacy token migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
  /// No legacy token, or a keyed credential already exists
  NothingToMigrate,
  /// Token validated and stored as a credential record
  Migrated,
  /// Token failed validation and was thrown away
  Discarded,
}

#[derive(Debug, Clone)]
enum Memory {
  Unloaded,
  Absent,
  Present(CredentialRecord),
}

pub struct CredentialCache<S: Storage> {
  storage: Arc<S>,
  bus: SessionBus,
  signals: Mutex<broadcast::Receiver<SessionSignal>>,
  memory: Mutex<Memory>,
  legacy: Option<Arc<dyn LegacyTokenStore>>,
  migration: OnceCell<MigrationOutcome>,
}

impl<S: Storage> CredentialCache<S> {
  pub fn new(storage: Arc<S>, bus: SessionBus) -> Self {
    let signals = Mutex::new(bus.subscribe());
    Self {
      storage,
      bus,
      signals,
      memory: Mutex::new(Memory::Unloaded),
      legacy: None,
      migration: OnceCell::new(),
    }
  }

  /// Enable the one-time migration from the given legacy token store.
  pub fn with_legacy(mut self, legacy: Arc<dyn LegacyTokenStore>) -> Self {
    self.legacy = Some(legacy);
    self
  }

  /// Current token and profile, if a valid credential exists.
  ///
  /// Never fails: storage errors are logged and reported as absence.
  pub fn get_token(&self) -> Option<(String, Profile)> {
    self
      .current_record()
      .map(|record| (record.token, record.profile))
  }

  fn current_record(&self) -> Option<CredentialRecord> {
    self.drain_signals();
    let now = Utc::now();

    let cached = self.memory.lock().ok().map(|m| m.clone());
    let record = match cached {
      Some(Memory::Present(record)) => record,
      Some(Memory::Absent) => return None,
      Some(Memory::Unloaded) | None => {
        match self.storage.get::<CredentialRecord>(CredentialRecord::SINGLETON) {
          Ok(Some(record)) => record,
          Ok(None) => {
            self.set_memory(Memory::Absent);
            return None;
          }
          Err(e) => {
            warn!("failed to read credential: {}", e);
            return None;
          }
        }
      }
    };

    if is_expired(record.timestamp, now) {
      info!(
        token = %token_fingerprint(&record.token),
        "credential expired, sign-in required"
      );
      if let Err(e) = self
        .storage
        .delete::<CredentialRecord>(CredentialRecord::SINGLETON)
      {
        warn!("failed to delete expired credential: {}", e);
      }
      self.set_memory(Memory::Absent);
      return None;
    }

    self.set_memory(Memory::Present(record.clone()));
    Some(record)
  }

  /// Store a token, replacing any previous credential. Acts as both login and
  /// refresh: the timestamp is always reset to now.
  pub fn save_token(&self, token: &str, profile: Profile) -> Result<CredentialRecord, StorageError> {
    let record = CredentialRecord {
      id: CredentialRecord::SINGLETON.to_string(),
      token: token.to_string(),
      profile,
      timestamp: Utc::now(),
    };

    self.storage.put(&record)?;
    // Signals published before this write must not discard it
    self.drain_signals();
    self.set_memory(Memory::Present(record.clone()));
    debug!(token = %token_fingerprint(token), "credential saved");
    Ok(record)
  }

  /// Remove the credential (logout) and tell other holders of the token.
  pub fn clear(&self) -> Result<(), StorageError> {
    self.set_memory(Memory::Absent);
    let result = self
      .storage
      .delete::<CredentialRecord>(CredentialRecord::SINGLETON)
      .map(|_| ());
    self.bus.publish(SessionSignal::CredentialCleared);
    result
  }

  /// The server rejected the token: clear it and announce the invalid session.
  pub fn invalidate_session(&self) {
    if let Err(e) = self.clear() {
      warn!("failed to clear rejected credential: {}", e);
    }
    self.bus.publish(SessionSignal::SessionInvalidated);
  }

  /// Revalidate the stored token against the server.
  ///
  /// On success the timestamp and profile are refreshed. An `Unauthorized`
  /// answer clears the session; any other failure leaves the credential alone
  /// so it keeps working offline.
  pub async fn revalidate<V: TokenValidator + ?Sized>(
    &self,
    validator: &V,
  ) -> Result<Option<Profile>, RemoteError> {
    let Some((token, _)) = self.get_token() else {
      return Ok(None);
    };

    match validator.verify_token(&token).await {
      Ok(profile) => {
        if let Err(e) = self.save_token(&token, profile.clone()) {
          warn!("failed to refresh credential: {}", e);
        }
        Ok(Some(profile))
      }
      Err(RemoteError::Unauthorized) => {
        self.invalidate_session();
        Err(RemoteError::Unauthorized)
      }
      Err(e) => Err(e),
    }
  }

  /// Migrate a legacy unkeyed token, at most once per session.
  pub async fn migrate_legacy<V: TokenValidator + ?Sized>(&self, validator: &V) -> MigrationOutcome {
    *self
      .migration
      .get_or_init(|| self.run_migration(validator))
      .await
  }

  async fn run_migration<V: TokenValidator + ?Sized>(&self, validator: &V) -> MigrationOutcome {
    let Some(legacy) = &self.legacy else {
      return MigrationOutcome::NothingToMigrate;
    };

    match self.storage.get::<CredentialRecord>(CredentialRecord::SINGLETON) {
      Ok(None) => {}
      Ok(Some(_)) => return MigrationOutcome::NothingToMigrate,
      Err(e) => {
        warn!("skipping legacy token migration: {}", e);
        return MigrationOutcome::NothingToMigrate;
      }
    }

    let Some(token) = legacy.read() else {
      return MigrationOutcome::NothingToMigrate;
    };

    let outcome = match validator.verify_token(&token).await {
      Ok(profile) => match self.save_token(&token, profile) {
        Ok(_) => MigrationOutcome::Migrated,
        Err(e) => {
          warn!("failed to store migrated token: {}", e);
          MigrationOutcome::Discarded
        }
      },
      Err(e) => {
        info!("legacy token rejected: {}", e);
        MigrationOutcome::Discarded
      }
    };

    legacy.remove();
    info!(token = %token_fingerprint(&token), ?outcome, "legacy token migration finished");
    outcome
  }

  fn drain_signals(&self) {
    let Ok(mut signals) = self.signals.lock() else {
      return;
    };

    loop {
      match signals.try_recv() {
        Ok(SessionSignal::CredentialCleared) | Err(broadcast::error::TryRecvError::Lagged(_)) => {
          self.set_memory(Memory::Unloaded);
        }
        Ok(SessionSignal::SessionInvalidated) => {}
        Err(_) => break,
      }
    }
  }

  fn set_memory(&self, value: Memory) {
    if let Ok(mut memory) = self.memory.lock() {
      *memory = value;
    }
  }
}
