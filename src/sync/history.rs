//! Mirrored image analysis history.

use std::sync::Arc;

use super::layer::{newest_first, MirrorLayer};
use super::outcome::{DeleteOutcome, Synced};
use crate::api::Remote;
use crate::error::Result;
use crate::store::{HistoryRecord, Storage};

pub struct HistoryBook<S: Storage> {
  remote: Arc<dyn Remote>,
  layer: MirrorLayer<S>,
}

impl<S: Storage + 'static> HistoryBook<S> {
  pub fn new(remote: Arc<dyn Remote>, layer: MirrorLayer<S>) -> Self {
    Self { remote, layer }
  }

  /// All analyzed images, newest first. Their images are cached in the
  /// background.
  pub async fn list(&self) -> Result<Synced<Vec<HistoryRecord>>> {
    let remote = Arc::clone(&self.remote);
    let result = self
      .layer
      .fetch_all(move || async move { remote.list_history().await })
      .await?;

    Ok(result.map(|mut items| {
      newest_first(&mut items);
      items
    }))
  }

  /// One item with its annotations.
  pub async fn get(&self, id: &str) -> Result<Synced<HistoryRecord>> {
    let remote = Arc::clone(&self.remote);
    let wanted = id.to_string();
    self
      .layer
      .fetch_one(id, move || async move { remote.get_history(&wanted).await })
      .await
  }

  /// Upload an image for analysis. The server stores the result as a new
  /// history item, which is mirrored locally.
  pub async fn analyze(&self, image: Vec<u8>, filename: &str) -> Result<HistoryRecord> {
    self
      .layer
      .create(|| {
        let remote = Arc::clone(&self.remote);
        let filename = filename.to_string();
        async move { remote.analyze_image(image, &filename).await }
      })
      .await
  }

  pub async fn remove(&self, id: &str) -> Result<DeleteOutcome> {
    self
      .layer
      .delete::<HistoryRecord, _, _>(id, || {
        let remote = Arc::clone(&self.remote);
        let id = id.to_string();
        async move { remote.delete_history(&id).await }
      })
      .await
  }

  /// Keep an item the caller is displaying in the mirror, even while offline.
  /// An existing local copy is returned unchanged.
  pub async fn remember(&self, item: HistoryRecord) -> Result<HistoryRecord> {
    self.layer.remember(item).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Error;
  use crate::network::{ConnectivitySignal, NetworkMonitor};
  use crate::resource::ResourceCache;
  use crate::store::{Annotation, Collection, SqliteStorage};
  use crate::sync::{Prefetcher, Source};
  use crate::testing::MockRemote;
  use chrono::{TimeZone, Utc};

  struct Fixture {
    remote: Arc<MockRemote>,
    storage: Arc<SqliteStorage>,
    network: NetworkMonitor,
    layer: MirrorLayer<SqliteStorage>,
    book: HistoryBook<SqliteStorage>,
  }

  fn fixture(reachable: bool) -> Fixture {
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let network = NetworkMonitor::new(reachable);
    let remote = Arc::new(MockRemote::new());
    let prefetcher = Prefetcher::spawn(ResourceCache::new(Arc::clone(&storage)), remote.clone());
    let layer = MirrorLayer::new(Arc::clone(&storage), network.clone()).with_prefetcher(prefetcher);
    let book = HistoryBook::new(remote.clone(), layer.clone());
    Fixture {
      remote,
      storage,
      network,
      layer,
      book,
    }
  }

  fn annotated(id: &str) -> HistoryRecord {
    HistoryRecord {
      id: id.to_string(),
      image_url: Some(format!("https://storage.example/{}.jpg", id)),
      sentence: "猫が寝ている".to_string(),
      translated_sentence: "猫在睡觉".to_string(),
      word_count: 2,
      words: vec![
        Annotation {
          word: "猫".to_string(),
          reading: "ねこ".to_string(),
          meaning: "cat".to_string(),
          position_x: 0.25,
          position_y: 0.5,
        },
        Annotation {
          word: "寝る".to_string(),
          reading: "ねる".to_string(),
          meaning: "sleep".to_string(),
          position_x: 0.75,
          position_y: 0.5,
        },
      ],
      timestamp: Some(Utc.with_ymd_and_hms(2024, 10, 1, 8, 30, 0).unwrap()),
    }
  }

  #[tokio::test]
  async fn test_list_caches_images_in_background() {
    let f = fixture(true);
    f.remote.seed_history(annotated("h1"));
    f.remote.add_image("https://storage.example/h1.jpg", b"JPEG");

    let items = f.book.list().await.unwrap();
    assert_eq!(items.data.len(), 1);
    f.layer.flush().await;

    let resources = ResourceCache::new(Arc::clone(&f.storage));
    assert_eq!(
      resources.get("https://storage.example/h1.jpg").unwrap().as_deref(),
      Some("data:image/jpeg;base64,SlBFRw==")
    );
  }

  #[tokio::test]
  async fn test_failed_image_cache_does_not_fail_read() {
    let f = fixture(true);
    // No image registered, the download 404s
    f.remote.seed_history(annotated("h1"));

    let items = f.book.list().await.unwrap();
    f.layer.flush().await;

    assert_eq!(items.data.len(), 1);
    assert_eq!(f.remote.calls("fetch_bytes"), 1);
    assert_eq!(f.storage.count(Collection::ResourceCache).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_get_round_trips_annotations_offline() {
    let f = fixture(true);
    f.remote.seed_history(annotated("h1"));
    let online = f.book.get("h1").await.unwrap();

    f.network.handle(ConnectivitySignal::Offline);
    let offline = f.book.get("h1").await.unwrap();

    assert_eq!(offline.source, Source::Mirror);
    assert_eq!(offline.data, online.data);
    assert_eq!(offline.data.words.len(), 2);
  }

  #[tokio::test]
  async fn test_deleted_on_server_disappears_locally() {
    let f = fixture(true);
    f.remote.seed_history(annotated("h1"));
    f.book.list().await.unwrap();

    f.remote.forget_history("h1");
    assert!(matches!(f.book.get("h1").await, Err(Error::NotFound(_))));
    assert_eq!(f.storage.count(Collection::HistoryMirror).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_analyze_mirrors_new_item() {
    let f = fixture(true);
    let item = f.book.analyze(b"PNG".to_vec(), "cat.png").await.unwrap();

    assert!(!item.id.is_empty());
    assert!(item.timestamp.is_some());
    assert!(f.storage.get::<HistoryRecord>(&item.id).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_remember_offline_assigns_id_once() {
    let f = fixture(false);
    let mut item = annotated("");
    item.timestamp = None;

    let stored = f.book.remember(item).await.unwrap();
    assert_eq!(stored.id.len(), 36);
    assert!(stored.timestamp.is_some());

    let again = f.book.remember(stored.clone()).await.unwrap();
    assert_eq!(again, stored);
    assert_eq!(f.remote.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_network_flap_mid_fetch_serves_mirror() {
    let f = fixture(true);
    f.remote.seed_history(annotated("h1"));
    f.remote.seed_history(annotated("h2"));
    f.book.list().await.unwrap();
    f.layer.flush().await;

    let network = f.network.clone();
    f.remote.on_call(move |_| {
      network.handle(ConnectivitySignal::Offline);
    });
    f.remote.set_failing(true);

    let items = f.book.list().await.unwrap();
    assert_eq!(items.source, Source::Fallback);
    assert_eq!(items.data.len(), 2);
    assert!(!f.network.is_reachable());
  }
}
