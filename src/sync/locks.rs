//! Per-key async lock table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes work per key while letting different keys proceed concurrently.
///
/// Entries nobody holds or waits on are pruned on the next `lock` call.
#[derive(Default)]
pub struct KeyedLocks {
  table: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Wait for exclusive access to `key`. Released when the guard drops.
  pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
    let lock = {
      let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
      table.retain(|_, lock| Arc::strong_count(lock) > 1);
      Arc::clone(table.entry(key.to_string()).or_default())
    };
    lock.lock_owned().await
  }

  /// Keys currently held or waited on.
  #[cfg(test)]
  fn live(&self) -> usize {
    let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
    table
      .values()
      .filter(|lock| Arc::strong_count(lock) > 1)
      .count()
  }
}
