//! In-memory storage, used when persistence is disabled.

use std::collections::HashMap;
use std::sync::Mutex;

use super::records::{Collection, Record};
use super::storage::Storage;
use crate::error::StorageError;

/// Storage that keeps serialized records in a map and forgets them on drop.
#[derive(Default)]
pub struct MemoryStorage {
  records: Mutex<HashMap<(Collection, String), Vec<u8>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Storage for MemoryStorage {
  fn get<R: Record>(&self, key: &str) -> Result<Option<R>, StorageError> {
    let records = self.records.lock().map_err(|_| StorageError::LockPoisoned)?;
    match records.get(&(R::collection(), key.to_string())) {
      Some(data) => Ok(Some(serde_json::from_slice(data)?)),
      None => Ok(None),
    }
  }

  fn put<R: Record>(&self, record: &R) -> Result<(), StorageError> {
    let data = serde_json::to_vec(record)?;
    let mut records = self.records.lock().map_err(|_| StorageError::LockPoisoned)?;
    records.insert((R::collection(), record.key()), data);
    Ok(())
  }

  fn delete<R: Record>(&self, key: &str) -> Result<bool, StorageError> {
    let mut records = self.records.lock().map_err(|_| StorageError::LockPoisoned)?;
    Ok(records.remove(&(R::collection(), key.to_string())).is_some())
  }

  fn list<R: Record>(&self) -> Result<Vec<R>, StorageError> {
    let records = self.records.lock().map_err(|_| StorageError::LockPoisoned)?;
    records
      .iter()
      .filter(|((collection, _), _)| *collection == R::collection())
      .map(|(_, data)| serde_json::from_slice(data).map_err(StorageError::from))
      .collect()
  }

  fn count(&self, collection: Collection) -> Result<usize, StorageError> {
    let records = self.records.lock().map_err(|_| StorageError::LockPoisoned)?;
    Ok(records.keys().filter(|(c, _)| *c == collection).count())
  }
}
