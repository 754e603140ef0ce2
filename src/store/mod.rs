//! Persistent store for everything cached locally.
//!
//! Named collections of JSON-serialized records, addressed by explicit key:
//! - `credential`, `avatar`, `sync-metadata` hold a single record each
//! - `resource-cache` is keyed by source URL or spoken text
//! - `word-mirror` and `history-mirror` are keyed by record id

mod memory;
mod records;
pub mod schema;
mod storage;

pub use memory::MemoryStorage;
pub use records::{
  Annotation, AvatarRecord, Collection, CredentialRecord, HistoryRecord, MirrorRecord, Profile,
  Record, ResourceRecord, SyncMetadata, WordRecord,
};
pub use storage::{SqliteStorage, Storage};
