//! Mirror sync engine for server-backed collections.
//!
//! This module keeps local mirrors of the wordbook and the analysis history:
//! - Reads go remote when reachable and are written through to the store
//! - Unreachable or failing remotes fall back to the mirror with a warning
//! - Deletes never fail because of the server; degraded outcomes say so
//! - Mutations of one record are serialized

mod history;
mod layer;
mod locks;
mod outcome;
mod prefetch;
mod wordbook;

pub use history::HistoryBook;
pub use layer::MirrorLayer;
pub use outcome::{DeleteOutcome, Source, Synced};
pub use prefetch::Prefetcher;
pub use wordbook::Wordbook;
