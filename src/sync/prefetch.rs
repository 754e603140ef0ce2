//! Background image caching for mirrored records.
//!
//! Reads queue image references here and return without waiting. A single
//! worker task downloads each one into the resource cache; failures are logged
//! and dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::api::Remote;
use crate::resource::ResourceCache;
use crate::store::Storage;

struct Progress {
  pending: AtomicUsize,
  idle: Notify,
}

impl Progress {
  fn finish_one(&self) {
    if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
      self.idle.notify_waiters();
    }
  }
}

pub struct Prefetcher {
  tx: mpsc::UnboundedSender<String>,
  progress: Arc<Progress>,
}

impl Prefetcher {
  /// Spawn the worker on the current tokio runtime. It stops once the
  /// prefetcher is dropped and the queue is drained.
  pub fn spawn<S: Storage + 'static>(resources: ResourceCache<S>, remote: Arc<dyn Remote>) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let progress = Arc::new(Progress {
      pending: AtomicUsize::new(0),
      idle: Notify::new(),
    });

    let worker_progress = Arc::clone(&progress);
    tokio::spawn(async move {
      while let Some(source) = rx.recv().await {
        cache_image(&resources, remote.as_ref(), &source).await;
        worker_progress.finish_one();
      }
    });

    Self { tx, progress }
  }

  /// Queue an image for caching.
  pub fn enqueue(&self, source: &str) {
    self.progress.pending.fetch_add(1, Ordering::SeqCst);
    if self.tx.send(source.to_string()).is_err() {
      warn!(source, "image prefetch worker has stopped");
      self.progress.finish_one();
    }
  }

  /// Number of queued or in-flight downloads.
  pub fn pending(&self) -> usize {
    self.progress.pending.load(Ordering::SeqCst)
  }

  /// Wait until everything queued so far has been processed.
  pub async fn wait_idle(&self) {
    loop {
      let idle = self.progress.idle.notified();
      if self.pending() == 0 {
        return;
      }
      idle.await;
    }
  }
}

async fn cache_image<S: Storage>(resources: &ResourceCache<S>, remote: &dyn Remote, source: &str) {
  // Hits return without touching the network
  match resources
    .get_or_fetch(source, || remote.fetch_bytes(source))
    .await
  {
    Ok(_) => debug!(source, "image cached"),
    Err(e) => warn!(source, "failed to cache image: {}", e),
  }
}
