//! Mirror layer that routes reads and writes between the remote service and
//! the local store.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::locks::KeyedLocks;
use super::outcome::{DeleteOutcome, Synced};
use super::prefetch::Prefetcher;
use crate::error::{Error, RemoteError, Result, StorageError};
use crate::network::NetworkMonitor;
use crate::store::{MirrorRecord, Storage, SyncMetadata};

/// Bookkeeping shared by every clone of a layer.
#[derive(Default)]
struct SyncState {
  /// Per-record mutation locks, keyed by `collection:id`
  locks: KeyedLocks,
  tombstones: Mutex<Tombstones>,
}

/// Orders reads against deletes.
///
/// Tickets are monotonic. A tombstone is only kept while some read that
/// started before it is still in flight.
#[derive(Default)]
struct Tombstones {
  generation: u64,
  /// Tickets of reads still in flight
  reading: BTreeSet<u64>,
  /// Ticket of the most recent local delete per key
  buried: HashMap<String, u64>,
}

impl SyncState {
  fn tombstones(&self) -> MutexGuard<'_, Tombstones> {
    self.tombstones.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn begin_read(self: &Arc<Self>) -> ReadTicket {
    let mut tombstones = self.tombstones();
    tombstones.generation += 1;
    let started = tombstones.generation;
    tombstones.reading.insert(started);
    ReadTicket {
      state: Arc::clone(self),
      started,
    }
  }

  fn end_read(&self, started: u64) {
    let mut tombstones = self.tombstones();
    tombstones.reading.remove(&started);
    match tombstones.reading.first().copied() {
      Some(oldest) => tombstones.buried.retain(|_, deleted| *deleted > oldest),
      None => tombstones.buried.clear(),
    }
  }

  fn bury(&self, key: &str) {
    let mut tombstones = self.tombstones();
    tombstones.generation += 1;
    // Reads starting from now on already see the delete
    if tombstones.reading.is_empty() {
      return;
    }
    let ticket = tombstones.generation;
    tombstones.buried.insert(key.to_string(), ticket);
  }

  /// Whether `key` was deleted after a read holding `started` began.
  fn deleted_since(&self, key: &str, started: u64) -> bool {
    self
      .tombstones()
      .buried
      .get(key)
      .is_some_and(|deleted| *deleted > started)
  }
}

/// An in-flight read. Dropping it lets older tombstones go.
struct ReadTicket {
  state: Arc<SyncState>,
  started: u64,
}

impl Drop for ReadTicket {
  fn drop(&mut self) {
    self.state.end_read(self.started);
  }
}

/// Read-through/write-through synchronization for server-backed collections.
///
/// Reads go to the remote service when the network is reachable and are
/// written into the store before they are returned; when unreachable, or when
/// the remote call fails, the local mirror is served instead. Mutations of a
/// single record never overlap.
pub struct MirrorLayer<S: Storage> {
  storage: Arc<S>,
  network: NetworkMonitor,
  state: Arc<SyncState>,
  prefetcher: Option<Arc<Prefetcher>>,
}

impl<S: Storage + 'static> MirrorLayer<S> {
  pub fn new(storage: Arc<S>, network: NetworkMonitor) -> Self {
    Self {
      storage,
      network,
      state: Arc::new(SyncState::default()),
      prefetcher: None,
    }
  }

  /// Queue image references of fetched records for background caching.
  pub fn with_prefetcher(mut self, prefetcher: Prefetcher) -> Self {
    self.prefetcher = Some(Arc::new(prefetcher));
    self
  }

  pub fn is_reachable(&self) -> bool {
    self.network.is_reachable()
  }

  /// Fetch a whole collection.
  ///
  /// 1. Unreachable - serve the mirror, no remote attempt
  /// 2. Reachable - fetch, write every record through, return them
  /// 3. Remote failure - serve the mirror with a warning
  ///
  /// Records missing from the remote list are not pruned locally.
  pub async fn fetch_all<R, F, Fut>(&self, fetcher: F) -> Result<Synced<Vec<R>>>
  where
    R: MirrorRecord,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<R>, RemoteError>> + Send + 'static,
  {
    if !self.is_reachable() {
      let local = self.storage.list::<R>()?;
      debug!(kind = R::KIND, count = local.len(), "offline, serving mirror");
      return Ok(Synced::mirror(local));
    }

    let read = self.state.begin_read();
    let layer = self.clone();
    // Runs detached: a caller that stops waiting does not stop the write-through
    join(tokio::spawn(async move { layer.pull_all(fetcher, read).await })).await
  }

  async fn pull_all<R, F, Fut>(&self, fetcher: F, read: ReadTicket) -> Result<Synced<Vec<R>>>
  where
    R: MirrorRecord,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<R>, RemoteError>>,
  {
    match fetcher().await {
      Ok(records) => {
        let mut synced = Vec::with_capacity(records.len());
        for record in records {
          if let Some(record) = self.absorb(record, read.started).await? {
            synced.push(record);
          }
        }
        self.mark_synced();
        Ok(Synced::remote(synced))
      }
      Err(RemoteError::Unauthorized) => Err(Error::AuthExpired),
      Err(e) => {
        let local = self.storage.list::<R>()?;
        warn!(
          kind = R::KIND,
          count = local.len(),
          "remote fetch failed, serving mirror: {}",
          e
        );
        Ok(Synced::fallback(local, e.to_string()))
      }
    }
  }

  /// Fetch a single record by id, with the same routing as [`fetch_all`].
  ///
  /// A remote `404` drops the local copy. With no remote answer and no local
  /// copy the remote error is returned.
  ///
  /// [`fetch_all`]: MirrorLayer::fetch_all
  pub async fn fetch_one<R, F, Fut>(&self, id: &str, fetcher: F) -> Result<Synced<R>>
  where
    R: MirrorRecord,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, RemoteError>> + Send + 'static,
  {
    if !self.is_reachable() {
      return match self.storage.get::<R>(id)? {
        Some(record) => Ok(Synced::mirror(record)),
        None => Err(Error::NotFound(format!("{} {}", R::KIND, id))),
      };
    }

    let read = self.state.begin_read();
    let layer = self.clone();
    let id = id.to_string();
    join(tokio::spawn(async move { layer.pull_one(&id, fetcher, read).await })).await
  }

  async fn pull_one<R, F, Fut>(&self, id: &str, fetcher: F, read: ReadTicket) -> Result<Synced<R>>
  where
    R: MirrorRecord,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, RemoteError>>,
  {
    match fetcher().await {
      Ok(mut record) => {
        if record.id().is_empty() {
          record.assign_id(id.to_string());
        }
        match self.absorb(record, read.started).await? {
          Some(record) => Ok(Synced::remote(record)),
          None => Err(Error::NotFound(format!("{} {}", R::KIND, id))),
        }
      }
      Err(RemoteError::Unauthorized) => Err(Error::AuthExpired),
      Err(RemoteError::NotFound) => {
        let key = lock_key::<R>(id);
        let _guard = self.state.locks.lock(&key).await;
        if self.remove_local::<R>(&key, id)? {
          info!(kind = R::KIND, id, "removed from mirror, gone on server");
        }
        Err(Error::NotFound(format!("{} {}", R::KIND, id)))
      }
      Err(e) => match self.storage.get::<R>(id)? {
        Some(record) => {
          warn!(kind = R::KIND, id, "remote fetch failed, serving mirror: {}", e);
          Ok(Synced::fallback(record, e.to_string()))
        }
        None => Err(Error::Remote(e)),
      },
    }
  }

  /// Create a record on the server and mirror what it returns.
  ///
  /// Requires reachability; nothing is created offline.
  pub async fn create<R, F, Fut>(&self, creator: F) -> Result<R>
  where
    R: MirrorRecord,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, RemoteError>>,
  {
    if !self.is_reachable() {
      return Err(Error::Remote(RemoteError::Offline));
    }

    let read = self.state.begin_read();
    let record = creator().await?;
    let id = record.id().to_string();
    self
      .absorb(record, read.started)
      .await?
      .ok_or_else(|| Error::NotFound(format!("{} {}", R::KIND, id)))
  }

  /// Update a record on the server, then patch the local copy if there is one.
  ///
  /// Returns the patched local copy, or `None` when the record was not mirrored.
  pub async fn update<R, F, Fut, A>(&self, id: &str, remote: F, apply: A) -> Result<Option<R>>
  where
    R: MirrorRecord,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), RemoteError>>,
    A: FnOnce(&mut R),
  {
    if !self.is_reachable() {
      return Err(Error::Remote(RemoteError::Offline));
    }

    let key = lock_key::<R>(id);
    let _guard = self.state.locks.lock(&key).await;

    match remote().await {
      Ok(()) => {}
      Err(RemoteError::NotFound) => {
        self.remove_local::<R>(&key, id)?;
        return Err(Error::NotFound(format!("{} {}", R::KIND, id)));
      }
      Err(e) => return Err(e.into()),
    }

    match self.storage.get::<R>(id)? {
      Some(mut record) => {
        apply(&mut record);
        self.storage.put(&record)?;
        Ok(Some(record))
      }
      None => Ok(None),
    }
  }

  /// Delete a record.
  ///
  /// Unreachable: only the mirror copy is removed and the server is never
  /// contacted. Reachable: the server delete goes first; if it fails the
  /// mirror copy is removed anyway and the outcome is degraded.
  pub async fn delete<R, F, Fut>(&self, id: &str, remote: F) -> Result<DeleteOutcome>
  where
    R: MirrorRecord,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), RemoteError>>,
  {
    let key = lock_key::<R>(id);
    let _guard = self.state.locks.lock(&key).await;

    if !self.is_reachable() {
      self.remove_local::<R>(&key, id)?;
      info!(kind = R::KIND, id, "offline, deleted from mirror only");
      return Ok(DeleteOutcome::LocalOnly);
    }

    match remote().await {
      // Already gone on the server counts as confirmed
      Ok(()) | Err(RemoteError::NotFound) => {
        if let Err(e) = self.remove_local::<R>(&key, id) {
          warn!(kind = R::KIND, id, "deleted on server but not from mirror: {}", e);
        }
        Ok(DeleteOutcome::Deleted)
      }
      Err(RemoteError::Unauthorized) => Err(Error::AuthExpired),
      Err(e) => {
        self.remove_local::<R>(&key, id)?;
        warn!(kind = R::KIND, id, "server delete failed, removed locally: {}", e);
        Ok(DeleteOutcome::Unconfirmed {
          reason: e.to_string(),
        })
      }
    }
  }

  /// Keep a record the caller already has in the mirror without contacting
  /// the server.
  ///
  /// Only used for history items opened while offline: an id is generated if
  /// missing and an existing local copy always wins. This is the single case
  /// of a record originating locally.
  pub async fn remember<R: MirrorRecord>(&self, mut record: R) -> Result<R> {
    record.ensure_id();
    let key = lock_key::<R>(record.id());
    let _guard = self.state.locks.lock(&key).await;

    if let Some(existing) = self.storage.get::<R>(record.id())? {
      return Ok(existing);
    }

    if record.timestamp().is_none() {
      record.set_timestamp(Utc::now());
    }
    self.storage.put(&record)?;
    debug!(kind = R::KIND, id = record.id(), "stored locally");
    Ok(record)
  }

  /// Last successful remote collection fetch.
  pub fn last_synced(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
    Ok(
      self
        .storage
        .get::<SyncMetadata>(SyncMetadata::SINGLETON)?
        .and_then(|meta| meta.last_full_sync),
    )
  }

  /// Write one fetched record through to the store.
  ///
  /// Returns `None` when the record was deleted locally after the read began.
  async fn absorb<R: MirrorRecord>(&self, mut record: R, started: u64) -> Result<Option<R>> {
    record.ensure_id();
    let key = lock_key::<R>(record.id());

    {
      let _guard = self.state.locks.lock(&key).await;
      if self.state.deleted_since(&key, started) {
        debug!(kind = R::KIND, id = record.id(), "deleted while fetching, not restoring");
        return Ok(None);
      }

      // A derived timestamp is never replaced, and "now" is only the last resort
      let existing = self
        .storage
        .get::<R>(record.id())?
        .and_then(|existing| existing.timestamp());
      let timestamp = existing
        .or_else(|| record.timestamp())
        .unwrap_or_else(Utc::now);
      record.set_timestamp(timestamp);
      self.storage.put(&record)?;
    }

    if let (Some(prefetcher), Some(image)) = (&self.prefetcher, record.image_ref()) {
      prefetcher.enqueue(image);
    }
    Ok(Some(record))
  }

  /// Remove the mirror copy and remember the delete for in-flight reads.
  fn remove_local<R: MirrorRecord>(&self, key: &str, id: &str) -> Result<bool, StorageError> {
    let existed = self.storage.delete::<R>(id)?;
    self.state.bury(key);
    Ok(existed)
  }

  fn mark_synced(&self) {
    if let Err(e) = self.bump_sync_metadata(Utc::now()) {
      warn!("failed to record sync time: {}", e);
    }
  }

  fn bump_sync_metadata(&self, now: DateTime<Utc>) -> Result<(), StorageError> {
    let previous = self
      .storage
      .get::<SyncMetadata>(SyncMetadata::SINGLETON)?
      .and_then(|meta| meta.last_full_sync);
    // Never move backwards, even if the clock does
    let last = previous.map_or(now, |previous| previous.max(now));

    self.storage.put(&SyncMetadata {
      id: SyncMetadata::SINGLETON.to_string(),
      last_full_sync: Some(last),
    })
  }

  /// Wait for queued image downloads (used before exiting).
  pub async fn flush(&self) {
    if let Some(prefetcher) = &self.prefetcher {
      prefetcher.wait_idle().await;
    }
  }
}

impl<S: Storage> Clone for MirrorLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: self.network.clone(),
      state: Arc::clone(&self.state),
      prefetcher: self.prefetcher.clone(),
    }
  }
}

/// Order records newest first; records without a timestamp go last.
pub fn newest_first<R: MirrorRecord>(records: &mut [R]) {
  records.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
}

fn lock_key<R: MirrorRecord>(id: &str) -> String {
  format!("{}:{}", R::collection(), id)
}

async fn join<T>(task: JoinHandle<Result<T>>) -> Result<T> {
  match task.await {
    Ok(result) => result,
    Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
    Err(e) => Err(Error::Remote(RemoteError::Transport(format!(
      "sync task cancelled: {}",
      e
    )))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::network::ConnectivitySignal;
  use crate::store::{Collection, SqliteStorage, WordRecord};
  use crate::sync::Source;
  use chrono::TimeZone;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  fn word(id: &str, timestamp: Option<DateTime<Utc>>) -> WordRecord {
    WordRecord {
      id: id.to_string(),
      word: format!("word-{}", id),
      reading: "よみ".to_string(),
      meaning: "meaning".to_string(),
      timestamp,
    }
  }

  fn layer(reachable: bool) -> (Arc<SqliteStorage>, MirrorLayer<SqliteStorage>) {
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let layer = MirrorLayer::new(Arc::clone(&storage), NetworkMonitor::new(reachable));
    (storage, layer)
  }

  #[tokio::test]
  async fn test_offline_fetch_all_serves_mirror_without_remote() {
    let (storage, layer) = layer(false);
    for id in ["a", "b", "c"] {
      storage.put(&word(id, Some(Utc::now()))).unwrap();
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let result = layer
      .fetch_all::<WordRecord, _, _>(move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
      })
      .await
      .unwrap();

    assert_eq!(result.data.len(), 3);
    assert_eq!(result.source, Source::Mirror);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_fetch_all_writes_through_and_marks_synced() {
    let (storage, layer) = layer(true);
    assert!(layer.last_synced().unwrap().is_none());

    let result = layer
      .fetch_all(|| async { Ok(vec![word("a", None), word("", None)]) })
      .await
      .unwrap();

    assert!(!result.is_local());
    assert_eq!(storage.count(Collection::WordMirror).unwrap(), 2);
    assert!(result.data.iter().all(|w| !w.id.is_empty() && w.timestamp.is_some()));
    assert!(layer.last_synced().unwrap().is_some());
  }

  #[tokio::test]
  async fn test_fetch_all_falls_back_with_warning() {
    let (storage, layer) = layer(true);
    storage.put(&word("a", Some(Utc::now()))).unwrap();

    let result = layer
      .fetch_all::<WordRecord, _, _>(|| async {
        Err(RemoteError::Status {
          status: 502,
          message: "bad gateway".to_string(),
        })
      })
      .await
      .unwrap();

    assert_eq!(result.data.len(), 1);
    assert!(result.warning.unwrap().contains("502"));
    assert!(layer.last_synced().unwrap().is_none());
  }

  #[tokio::test]
  async fn test_empty_mirror_and_failed_remote_is_empty_not_error() {
    let (_, layer) = layer(true);
    let result = layer
      .fetch_all::<WordRecord, _, _>(|| async { Err(RemoteError::Transport("reset".to_string())) })
      .await
      .unwrap();
    assert!(result.data.is_empty());
    assert!(result.warning.is_some());
  }

  #[tokio::test]
  async fn test_unauthorized_is_not_masked_by_fallback() {
    let (storage, layer) = layer(true);
    storage.put(&word("a", Some(Utc::now()))).unwrap();

    let result = layer
      .fetch_all::<WordRecord, _, _>(|| async { Err(RemoteError::Unauthorized) })
      .await;
    assert!(matches!(result, Err(Error::AuthExpired)));
  }

  #[tokio::test]
  async fn test_timestamp_derived_once() {
    let (storage, layer) = layer(true);
    let original = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

    layer
      .fetch_all(move || async move { Ok(vec![word("a", Some(original))]) })
      .await
      .unwrap();
    // Later copies carry another time, or none at all
    layer
      .fetch_all(|| async { Ok(vec![word("a", Some(Utc::now()))]) })
      .await
      .unwrap();
    let result = layer
      .fetch_all(|| async { Ok(vec![word("a", None)]) })
      .await
      .unwrap();

    assert_eq!(result.data[0].timestamp, Some(original));
    let stored: WordRecord = storage.get("a").unwrap().unwrap();
    assert_eq!(stored.timestamp, Some(original));
  }

  #[tokio::test]
  async fn test_fetch_one_not_found_removes_mirror_copy() {
    let (storage, layer) = layer(true);
    storage.put(&word("a", Some(Utc::now()))).unwrap();

    let result = layer
      .fetch_one::<WordRecord, _, _>("a", || async { Err(RemoteError::NotFound) })
      .await;

    assert!(matches!(result, Err(Error::NotFound(_))));
    assert!(storage.get::<WordRecord>("a").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_fetch_one_failure_without_local_copy_is_remote_error() {
    let (_, layer) = layer(true);
    let result = layer
      .fetch_one::<WordRecord, _, _>("a", || async {
        Err(RemoteError::Transport("timeout".to_string()))
      })
      .await;
    assert!(matches!(result, Err(Error::Remote(RemoteError::Transport(_)))));
  }

  #[tokio::test]
  async fn test_offline_fetch_one_missing_is_not_found() {
    let (_, layer) = layer(false);
    let result = layer
      .fetch_one::<WordRecord, _, _>("a", || async { Ok(word("a", None)) })
      .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
  }

  #[tokio::test]
  async fn test_create_requires_reachability() {
    let (storage, layer) = layer(false);
    let result = layer.create(|| async { Ok(word("a", None)) }).await;
    assert!(matches!(result, Err(Error::Remote(RemoteError::Offline))));
    assert_eq!(storage.count(Collection::WordMirror).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_update_patches_mirror_copy() {
    let (storage, layer) = layer(true);
    storage.put(&word("a", Some(Utc::now()))).unwrap();

    let updated = layer
      .update::<WordRecord, _, _, _>("a", || async { Ok(()) }, |w| w.meaning = "new".to_string())
      .await
      .unwrap();
    assert_eq!(updated.unwrap().meaning, "new");

    let missing = layer
      .update::<WordRecord, _, _, _>("zzz", || async { Ok(()) }, |_| {})
      .await
      .unwrap();
    assert!(missing.is_none());
  }

  #[tokio::test]
  async fn test_delete_while_offline_never_calls_remote() {
    let (storage, layer) = layer(false);
    storage.put(&word("a", Some(Utc::now()))).unwrap();

    let calls = AtomicUsize::new(0);
    let outcome = layer
      .delete::<WordRecord, _, _>("a", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
      })
      .await
      .unwrap();

    assert_eq!(outcome, DeleteOutcome::LocalOnly);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(storage.get::<WordRecord>("a").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_delete_with_remote_failure_is_degraded() {
    let (storage, layer) = layer(true);
    storage.put(&word("a", Some(Utc::now()))).unwrap();

    let outcome = layer
      .delete::<WordRecord, _, _>("a", || async {
        Err(RemoteError::Status {
          status: 500,
          message: "boom".to_string(),
        })
      })
      .await
      .unwrap();

    assert!(outcome.is_degraded());
    assert!(storage.get::<WordRecord>("a").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_delete_remote_not_found_counts_as_deleted() {
    let (_, layer) = layer(true);
    let outcome = layer
      .delete::<WordRecord, _, _>("a", || async { Err(RemoteError::NotFound) })
      .await
      .unwrap();
    assert_eq!(outcome, DeleteOutcome::Deleted);
  }

  #[tokio::test]
  async fn test_read_started_before_delete_does_not_resurrect() {
    let (storage, layer) = layer(true);
    storage.put(&word("a", Some(Utc::now()))).unwrap();

    let (fetched_tx, fetched_rx) = tokio::sync::oneshot::channel::<()>();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let reader = {
      let layer = layer.clone();
      tokio::spawn(async move {
        layer
          .fetch_all(|| async move {
            let _ = fetched_tx.send(());
            let _ = release_rx.await;
            Ok(vec![word("a", None)])
          })
          .await
      })
    };

    // Delete lands while the read is waiting on the server
    fetched_rx.await.unwrap();
    let outcome = layer
      .delete::<WordRecord, _, _>("a", || async { Ok(()) })
      .await
      .unwrap();
    assert_eq!(outcome, DeleteOutcome::Deleted);
    release_tx.send(()).unwrap();

    let result = reader.await.unwrap().unwrap();
    assert!(result.data.is_empty());
    assert!(storage.get::<WordRecord>("a").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_network_drop_after_failed_fetch_serves_mirror() {
    let (storage, layer) = layer(true);
    storage.put(&word("a", Some(Utc::now()))).unwrap();
    let network = layer.network.clone();

    let result = layer
      .fetch_all::<WordRecord, _, _>(|| async move {
        network.handle(ConnectivitySignal::Offline);
        Err(RemoteError::Transport("connection reset".to_string()))
      })
      .await
      .unwrap();

    assert_eq!(result.data.len(), 1);
    assert!(!layer.is_reachable());
  }

  #[tokio::test]
  async fn test_remember_keeps_existing_copy() {
    let (storage, layer) = layer(false);
    let original = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();

    let first = layer.remember(word("", Some(original))).await.unwrap();
    assert!(!first.id.is_empty());

    let mut again = first.clone();
    again.meaning = "changed".to_string();
    again.timestamp = None;
    let kept = layer.remember(again).await.unwrap();

    assert_eq!(kept, first);
    assert_eq!(storage.count(Collection::WordMirror).unwrap(), 1);
  }

  #[tokio::test]
  async fn test_abandoned_fetch_still_writes_through() {
    let (storage, layer) = layer(true);

    let fetch = layer.fetch_all(|| async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      Ok(vec![word("a", None), word("b", None)])
    });
    assert!(tokio::time::timeout(Duration::from_millis(10), fetch).await.is_err());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(storage.count(Collection::WordMirror).unwrap(), 2);
    assert!(layer.last_synced().unwrap().is_some());
  }

  #[tokio::test]
  async fn test_abandoned_fetch_one_still_writes_through() {
    let (storage, layer) = layer(true);

    let fetch = layer.fetch_one("a", || async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      Ok(word("a", None))
    });
    assert!(tokio::time::timeout(Duration::from_millis(10), fetch).await.is_err());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(storage.get::<WordRecord>("a").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_deletes_without_reads_leave_no_tombstones() {
    let (storage, layer) = layer(false);
    for i in 0..1000 {
      let id = i.to_string();
      storage.put(&word(&id, Some(Utc::now()))).unwrap();
      layer
        .delete::<WordRecord, _, _>(&id, || async { Ok(()) })
        .await
        .unwrap();
    }
    assert_eq!(storage.count(Collection::WordMirror).unwrap(), 0);
    assert!(layer.state.tombstones().buried.is_empty());
  }

  #[tokio::test]
  async fn test_tombstones_live_only_as_long_as_older_reads() {
    let (_, layer) = layer(false);

    let first = layer.state.begin_read();
    layer
      .delete::<WordRecord, _, _>("a", || async { Ok(()) })
      .await
      .unwrap();
    let second = layer.state.begin_read();
    layer
      .delete::<WordRecord, _, _>("b", || async { Ok(()) })
      .await
      .unwrap();
    assert_eq!(layer.state.tombstones().buried.len(), 2);

    // "a" was deleted before the second read began, so nobody needs it now
    drop(first);
    assert!(layer.state.deleted_since(&lock_key::<WordRecord>("b"), second.started));
    assert_eq!(layer.state.tombstones().buried.len(), 1);

    drop(second);
    assert!(layer.state.tombstones().buried.is_empty());
    assert!(layer.state.tombstones().reading.is_empty());
  }

  #[test]
  fn test_sync_metadata_is_monotonic() {
    let (_, layer) = layer(true);
    let later = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
    let earlier = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();

    layer.bump_sync_metadata(later).unwrap();
    layer.bump_sync_metadata(earlier).unwrap();
    assert_eq!(layer.last_synced().unwrap(), Some(later));
  }
}
