//! Offline-capable client facade.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::Remote;
use crate::credential::{token_fingerprint, CredentialCache};
use crate::error::{Error, RemoteError, Result};
use crate::network::NetworkMonitor;
use crate::resource::{AvatarCache, ResourceCache};
use crate::session::{SessionBus, SessionSignal};
use crate::store::{Profile, Storage};
use crate::sync::{HistoryBook, MirrorLayer, Prefetcher, Wordbook};

/// Everything an application needs to keep working offline, wired together.
///
/// This provides the session lifecycle, the mirrored wordbook and history, and
/// cached binary artifacts (speech, images, avatar).
pub struct OfflineClient<S: Storage + 'static> {
  network: NetworkMonitor,
  bus: SessionBus,
  credentials: Arc<CredentialCache<S>>,
  remote: Arc<dyn Remote>,
  resources: ResourceCache<S>,
  avatar: AvatarCache<S>,
  layer: MirrorLayer<S>,
  wordbook: Wordbook<S>,
  history: HistoryBook<S>,
}

impl<S: Storage + 'static> OfflineClient<S> {
  /// Must be called from within a tokio runtime: the image prefetch worker is
  /// spawned here.
  pub fn new(
    storage: Arc<S>,
    network: NetworkMonitor,
    bus: SessionBus,
    credentials: Arc<CredentialCache<S>>,
    remote: Arc<dyn Remote>,
  ) -> Self {
    let resources = ResourceCache::new(Arc::clone(&storage));
    let prefetcher = Prefetcher::spawn(resources.clone(), Arc::clone(&remote));
    let layer = MirrorLayer::new(Arc::clone(&storage), network.clone()).with_prefetcher(prefetcher);

    Self {
      wordbook: Wordbook::new(Arc::clone(&remote), layer.clone()),
      history: HistoryBook::new(Arc::clone(&remote), layer.clone()),
      avatar: AvatarCache::new(storage),
      network,
      bus,
      credentials,
      remote,
      resources,
      layer,
    }
  }

  pub fn network(&self) -> &NetworkMonitor {
    &self.network
  }

  pub fn wordbook(&self) -> &Wordbook<S> {
    &self.wordbook
  }

  pub fn history(&self) -> &HistoryBook<S> {
    &self.history
  }

  /// Session events: credential cleared (logout) and session invalidated (401).
  pub fn session_events(&self) -> broadcast::Receiver<SessionSignal> {
    self.bus.subscribe()
  }

  /// Profile of the signed-in user, if the credential is still valid.
  pub fn profile(&self) -> Option<Profile> {
    self.credentials.get_token().map(|(_, profile)| profile)
  }

  /// Sign in with an identity-provider token.
  pub async fn login(&self, id_token: &str) -> Result<Profile> {
    if !self.network.is_reachable() {
      return Err(Error::Remote(RemoteError::Offline));
    }

    let (token, profile) = self.remote.exchange_id_token(id_token).await?;
    self.credentials.save_token(&token, profile.clone())?;
    info!(token = %token_fingerprint(&token), user = %profile.id, "signed in");

    self.refresh_avatar(&profile).await;
    Ok(profile)
  }

  pub fn logout(&self) -> Result<()> {
    self.credentials.clear()?;
    info!("signed out");
    Ok(())
  }

  /// Resume the previous session at startup.
  ///
  /// Migrates a legacy token if there is one, then revalidates the stored
  /// credential when the server is reachable. A rejected token ends the
  /// session; any other failure keeps the cached credential for offline use.
  pub async fn restore_session(&self) -> Result<Option<Profile>> {
    let outcome = self.credentials.migrate_legacy(self.remote.as_ref()).await;
    debug!(?outcome, "legacy token migration");

    if self.credentials.get_token().is_none() {
      return Ok(None);
    }
    if !self.network.is_reachable() {
      debug!("offline, using cached credential");
      return Ok(self.profile());
    }

    match self.credentials.revalidate(self.remote.as_ref()).await {
      Ok(Some(profile)) => {
        self.refresh_avatar(&profile).await;
        Ok(Some(profile))
      }
      Ok(None) => Ok(None),
      Err(RemoteError::Unauthorized) => Err(Error::AuthExpired),
      Err(e) => {
        warn!("could not revalidate session, using cached credential: {}", e);
        Ok(self.profile())
      }
    }
  }

  /// Synthesized speech for `text` as a data URL, cached forever.
  pub async fn speak(&self, text: &str) -> Result<String> {
    self
      .resources
      .get_or_fetch(text, || {
        let remote = Arc::clone(&self.remote);
        let reachable = self.network.is_reachable();
        let text = text.to_string();
        async move {
          if !reachable {
            return Err(RemoteError::Offline);
          }
          remote.speak(&text).await
        }
      })
      .await
  }

  /// Image at `url` as a data URL, cached forever.
  pub async fn image(&self, url: &str) -> Result<String> {
    self
      .resources
      .get_or_fetch(url, || {
        let remote = Arc::clone(&self.remote);
        let reachable = self.network.is_reachable();
        let url = url.to_string();
        async move {
          if !reachable {
            return Err(RemoteError::Offline);
          }
          remote.fetch_bytes(&url).await
        }
      })
      .await
  }

  /// Cached avatar of the signed-in user as a data URL.
  pub fn avatar(&self) -> Result<Option<String>> {
    Ok(self.avatar.get()?)
  }

  pub fn last_synced(&self) -> Result<Option<DateTime<Utc>>> {
    Ok(self.layer.last_synced()?)
  }

  /// Wait for background image caching to finish.
  pub async fn flush(&self) {
    self.layer.flush().await;
  }

  /// Best effort: a missing avatar only means the UI shows a placeholder.
  async fn refresh_avatar(&self, profile: &Profile) {
    let Some(photo_url) = profile.photo_url.as_deref().filter(|url| !url.is_empty()) else {
      return;
    };
    if !self.network.is_reachable() {
      return;
    }

    let result = self
      .avatar
      .refresh(photo_url, || {
        let remote = Arc::clone(&self.remote);
        let url = photo_url.to_string();
        async move { remote.fetch_bytes(&url).await }
      })
      .await;
    if let Err(e) = result {
      warn!("failed to cache avatar: {}", e);
    }
  }
}
