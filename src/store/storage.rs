//! Storage trait and SQLite implementation.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::records::{Collection, Record};
use super::schema;
use crate::error::StorageError;

/// Durable CRUD over typed collections.
///
/// Every operation is atomic for a single record. `put` is a full overwrite by
/// key; `list` returns records in storage order and callers sort.
pub trait Storage: Send + Sync {
  fn get<R: Record>(&self, key: &str) -> Result<Option<R>, StorageError>;

  fn put<R: Record>(&self, record: &R) -> Result<(), StorageError>;

  /// Remove a record. Returns whether a record existed.
  fn delete<R: Record>(&self, key: &str) -> Result<bool, StorageError>;

  fn list<R: Record>(&self) -> Result<Vec<R>, StorageError>;

  /// Number of records currently in a collection.
  fn count(&self, collection: Collection) -> Result<usize, StorageError>;
}

/// SQLite-backed store.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the store at the default location.
  pub fn open() -> Result<Self, StorageError> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the store at the given path and run migrations.
  pub fn open_at(path: &Path) -> Result<Self, StorageError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    debug!(path = %path.display(), "opened offline store");
    Self::from_connection(conn)
  }

  /// Fresh in-memory store, gone when dropped.
  pub fn in_memory() -> Result<Self, StorageError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(mut conn: Connection) -> Result<Self, StorageError> {
    schema::migrate(&mut conn)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Default database path under the user's data directory.
  pub fn default_path() -> Result<PathBuf, StorageError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        StorageError::Io(std::io::Error::new(
          std::io::ErrorKind::NotFound,
          "could not determine data directory",
        ))
      })?;

    Ok(data_dir.join("shiru").join("offline.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
    self.conn.lock().map_err(|_| StorageError::LockPoisoned)
  }

  fn ensure_collection(conn: &Connection, collection: Collection) -> Result<(), StorageError> {
    let known: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM collections WHERE name = ?",
        params![collection.as_str()],
        |row| row.get(0),
      )
      .optional()?;

    match known {
      Some(_) => Ok(()),
      None => Err(StorageError::UnknownCollection(collection.to_string())),
    }
  }
}

impl Storage for SqliteStorage {
  fn get<R: Record>(&self, key: &str) -> Result<Option<R>, StorageError> {
    let conn = self.lock()?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM records WHERE collection = ? AND record_key = ?",
        params![R::collection().as_str(), key],
        |row| row.get(0),
      )
      .optional()?;

    match data {
      Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  fn put<R: Record>(&self, record: &R) -> Result<(), StorageError> {
    let conn = self.lock()?;
    let collection = R::collection();
    Self::ensure_collection(&conn, collection)?;

    let data = serde_json::to_vec(record)?;
    conn.execute(
      "INSERT OR REPLACE INTO records (collection, record_key, data, stored_at)
       VALUES (?, ?, ?, datetime('now'))",
      params![collection.as_str(), record.key(), data],
    )?;

    Ok(())
  }

  fn delete<R: Record>(&self, key: &str) -> Result<bool, StorageError> {
    let conn = self.lock()?;

    let removed = conn.execute(
      "DELETE FROM records WHERE collection = ? AND record_key = ?",
      params![R::collection().as_str(), key],
    )?;

    Ok(removed > 0)
  }

  fn list<R: Record>(&self) -> Result<Vec<R>, StorageError> {
    let conn = self.lock()?;

    let mut stmt = conn.prepare("SELECT data FROM records WHERE collection = ?")?;
    let rows = stmt.query_map(params![R::collection().as_str()], |row| {
      row.get::<_, Vec<u8>>(0)
    })?;

    let mut records = Vec::new();
    for data in rows {
      records.push(serde_json::from_slice(&data?)?);
    }
    Ok(records)
  }

  fn count(&self, collection: Collection) -> Result<usize, StorageError> {
    let conn = self.lock()?;

    let count: i64 = conn.query_row(
      "SELECT COUNT(*) FROM records WHERE collection = ?",
      params![collection.as_str()],
      |row| row.get(0),
    )?;

    Ok(count as usize)
  }
}
