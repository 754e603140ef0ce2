//! Results of mirror operations, including where the data came from.

/// Result of a mirrored read, with metadata about its source.
#[derive(Debug, Clone)]
pub struct Synced<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: Source,
  /// Why the remote copy could not be used (fallback reads only)
  pub warning: Option<String>,
}

impl<T> Synced<T> {
  /// Fresh data from the remote service, already written through.
  pub fn remote(data: T) -> Self {
    Self {
      data,
      source: Source::Remote,
      warning: None,
    }
  }

  /// Local mirror served because the network is unreachable.
  pub fn mirror(data: T) -> Self {
    Self {
      data,
      source: Source::Mirror,
      warning: None,
    }
  }

  /// Local mirror served because the remote call failed.
  pub fn fallback(data: T, warning: impl Into<String>) -> Self {
    Self {
      data,
      source: Source::Fallback,
      warning: Some(warning.into()),
    }
  }

  /// Whether the data may be stale.
  pub fn is_local(&self) -> bool {
    self.source != Source::Remote
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Synced<U> {
    Synced {
      data: f(self.data),
      source: self.source,
      warning: self.warning,
    }
  }
}

/// Indicates where mirrored data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
  /// Remote service, reachable and answering
  Remote,
  /// Offline mode - network unavailable, serving the mirror
  Mirror,
  /// Network reported reachable but the remote call failed
  Fallback,
}

/// Outcome of a delete. Only `Unconfirmed` is a degraded result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
  /// Deleted on the server and locally
  Deleted,
  /// Network unreachable: removed from the mirror only, never sent to the server
  LocalOnly,
  /// Server delete failed; removed locally, not confirmed on the server
  Unconfirmed { reason: String },
}

impl DeleteOutcome {
  pub fn is_degraded(&self) -> bool {
    matches!(self, DeleteOutcome::Unconfirmed { .. })
  }
}

impl std::fmt::Display for DeleteOutcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      DeleteOutcome::Deleted => f.write_str("deleted"),
      DeleteOutcome::LocalOnly => f.write_str("deleted locally (offline)"),
      DeleteOutcome::Unconfirmed { reason } => {
        write!(f, "removed locally, not confirmed on server: {}", reason)
      }
    }
  }
}
