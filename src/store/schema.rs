//! Versioned, forward-only schema migrations.
//!
//! The applied version lives in SQLite's `user_version` pragma. Every
//! migration is additive: it may register collections or add indexes but never
//! rewrites existing rows.

use rusqlite::Connection;
use tracing::info;

use crate::error::StorageError;

pub struct Migration {
  pub version: u32,
  pub description: &'static str,
  pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
  Migration {
    version: 1,
    description: "records table with session collections",
    sql: r#"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    introduced_in INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    record_key TEXT NOT NULL,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (collection, record_key)
);

INSERT OR IGNORE INTO collections (name, introduced_in) VALUES
    ('credential', 1),
    ('avatar', 1);
"#,
  },
  Migration {
    version: 2,
    description: "resource cache and server mirrors",
    sql: r#"
INSERT OR IGNORE INTO collections (name, introduced_in) VALUES
    ('resource-cache', 2),
    ('word-mirror', 2),
    ('history-mirror', 2);
"#,
  },
  Migration {
    version: 3,
    description: "sync metadata and stored_at index",
    sql: r#"
INSERT OR IGNORE INTO collections (name, introduced_in) VALUES
    ('sync-metadata', 3);

CREATE INDEX IF NOT EXISTS idx_records_stored
    ON records(collection, stored_at);
"#,
  },
];

pub const SCHEMA_VERSION: u32 = 3;

pub fn current_version(conn: &Connection) -> Result<u32, StorageError> {
  Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Bring the database up to the latest schema version.
pub fn migrate(conn: &mut Connection) -> Result<(), StorageError> {
  migrate_to(conn, SCHEMA_VERSION)
}

/// Apply pending migrations up to and including `target`.
pub fn migrate_to(conn: &mut Connection, target: u32) -> Result<(), StorageError> {
  let current = current_version(conn)?;

  for migration in MIGRATIONS
    .iter()
    .filter(|m| m.version > current && m.version <= target)
  {
    let tx = conn.transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.pragma_update(None, "user_version", migration.version)?;
    tx.commit()?;
    info!(
      version = migration.version,
      "applied migration: {}", migration.description
    );
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::Collection;

  fn registered(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
      .prepare("SELECT name FROM collections ORDER BY introduced_in, name")
      .unwrap();
    stmt
      .query_map([], |row| row.get(0))
      .unwrap()
      .collect::<Result<Vec<String>, _>>()
      .unwrap()
  }

  #[test]
  fn test_versions_are_sequential() {
    for (i, m) in MIGRATIONS.iter().enumerate() {
      assert_eq!(m.version as usize, i + 1);
    }
    assert_eq!(MIGRATIONS.len() as u32, SCHEMA_VERSION);
  }

  #[test]
  fn test_full_migration_registers_every_collection() {
    let mut conn = Connection::open_in_memory().unwrap();
    migrate(&mut conn).unwrap();
    assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);

    let names = registered(&conn);
    for collection in Collection::ALL {
      assert!(names.contains(&collection.as_str().to_string()));
    }
  }

  #[test]
  fn test_migration_is_idempotent() {
    let mut conn = Connection::open_in_memory().unwrap();
    migrate(&mut conn).unwrap();
    migrate(&mut conn).unwrap();
    assert_eq!(registered(&conn).len(), Collection::ALL.len());
  }

  #[test]
  fn test_partial_migration() {
    let mut conn = Connection::open_in_memory().unwrap();
    migrate_to(&mut conn, 1).unwrap();
    assert_eq!(current_version(&conn).unwrap(), 1);
    assert_eq!(registered(&conn), vec!["avatar", "credential"]);
  }
}
