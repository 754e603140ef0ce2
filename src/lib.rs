//! Offline-first data layer for the Shiru vocabulary client.
//!
//! A local SQLite mirror of the user's wordbook and analysis history, cached
//! speech and images, and a TTL-bound session credential, kept in sync with
//! the Shiru API whenever the network allows.

pub mod api;
pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod network;
pub mod resource;
pub mod session;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

pub use client::OfflineClient;
pub use error::{Error, RemoteError, Result, StorageError};
