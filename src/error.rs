//! Error taxonomy for the offline data layer.

use thiserror::Error;

/// Failures of the local persistent store. Fatal to the calling operation.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to (de)serialize record: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage lock poisoned")]
  LockPoisoned,

  #[error("unknown collection '{0}' (schema too old?)")]
  UnknownCollection(String),

  #[error("storage io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Failures talking to the remote service.
#[derive(Debug, Error)]
pub enum RemoteError {
  /// The network monitor reports no reachability, the call was never attempted.
  #[error("network unreachable")]
  Offline,

  #[error("request failed: {0}")]
  Transport(String),

  #[error("unauthorized")]
  Unauthorized,

  #[error("not found on server")]
  NotFound,

  #[error("server returned {status}: {message}")]
  Status { status: u16, message: String },

  #[error("unexpected response: {0}")]
  Decode(String),
}

impl From<reqwest::Error> for RemoteError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_decode() {
      RemoteError::Decode(e.to_string())
    } else {
      RemoteError::Transport(e.to_string())
    }
  }
}

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error(transparent)]
  Remote(RemoteError),

  /// The session token was rejected; the credential has been cleared and the
  /// caller must re-authenticate.
  #[error("session expired, please sign in again")]
  AuthExpired,

  #[error("{0} not found")]
  NotFound(String),
}

impl From<RemoteError> for Error {
  fn from(e: RemoteError) -> Self {
    match e {
      RemoteError::Unauthorized => Error::AuthExpired,
      other => Error::Remote(other),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
