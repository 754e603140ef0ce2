//! Process-wide session signals.

use tokio::sync::broadcast;

/// Signals observed by anything holding a copy of the session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
  /// The stored credential was removed (logout, expiry or rejection).
  CredentialCleared,
  /// The server rejected the token; the user has to sign in again.
  SessionInvalidated,
}

/// Broadcast bus for [`SessionSignal`]s. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct SessionBus {
  tx: broadcast::Sender<SessionSignal>,
}

impl SessionBus {
  pub fn new() -> Self {
    let (tx, _rx) = broadcast::channel(16);
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
    self.tx.subscribe()
  }

  pub fn publish(&self, signal: SessionSignal) {
    // No receivers is fine
    let _ = self.tx.send(signal);
  }
}

impl Default for SessionBus {
  fn default() -> Self {
    Self::new()
  }
}
