//! Network reachability monitor.
//!
//! Holds the process-wide reachability flag. Only the monitor mutates it; every
//! other component reads it through [`NetworkMonitor::is_reachable`] or reacts to
//! transitions through [`NetworkMonitor::subscribe`].

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Connectivity signals delivered by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivitySignal {
  Online,
  Offline,
}

/// A reachability change as seen by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
  pub reachable: bool,
}

impl Transition {
  pub fn came_online(&self) -> bool {
    self.reachable
  }
}

/// Handle returned by [`NetworkMonitor::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Platform primitive used to read the initial reachability at startup.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
  async fn probe(&self) -> bool;
}

type Listener = Arc<dyn Fn(Transition) + Send + Sync>;

struct Inner {
  reachable: AtomicBool,
  listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
  /// Held while a signal is applied and broadcast, so transitions reach
  /// listeners in the order the flag changed
  dispatch: Mutex<()>,
  next_id: AtomicU64,
}

/// Shared reachability state plus its subscriber list. Cloning shares the state.
#[derive(Clone)]
pub struct NetworkMonitor {
  inner: Arc<Inner>,
}

impl NetworkMonitor {
  pub fn new(initially_reachable: bool) -> Self {
    Self {
      inner: Arc::new(Inner {
        reachable: AtomicBool::new(initially_reachable),
        listeners: Mutex::new(Vec::new()),
        dispatch: Mutex::new(()),
        next_id: AtomicU64::new(0),
      }),
    }
  }

  /// Create a monitor whose initial state is read from the platform probe.
  pub async fn from_probe<P: ConnectivityProbe + ?Sized>(probe: &P) -> Self {
    let reachable = probe.probe().await;
    debug!(reachable, "initial reachability");
    Self::new(reachable)
  }

  pub fn is_reachable(&self) -> bool {
    self.inner.reachable.load(Ordering::SeqCst)
  }

  /// Register a listener. Listeners run synchronously, in registration order,
  /// on the thread that delivered the signal, and must not block.
  pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
  where
    F: Fn(Transition) + Send + Sync + 'static,
  {
    let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
    self.listeners().push((id, Arc::new(listener)));
    id
  }

  pub fn unsubscribe(&self, id: SubscriptionId) {
    self.listeners().retain(|(existing, _)| *existing != id);
  }

  fn listeners(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Listener)>> {
    self
      .inner
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Apply a platform signal. Returns true when reachability actually changed;
  /// repeated signals for the current state are not broadcast.
  ///
  /// Signals are applied one at a time. A listener must not deliver a signal
  /// itself.
  pub fn handle(&self, signal: ConnectivitySignal) -> bool {
    let _dispatch = self
      .inner
      .dispatch
      .lock()
      .unwrap_or_else(PoisonError::into_inner);

    let reachable = signal == ConnectivitySignal::Online;
    let previous = self.inner.reachable.swap(reachable, Ordering::SeqCst);
    if previous == reachable {
      debug!(reachable, "duplicate connectivity signal ignored");
      return false;
    }

    if reachable {
      info!("network connected");
    } else {
      info!("network disconnected");
    }

    // Snapshot so listeners may (un)subscribe without deadlocking
    let listeners: Vec<Listener> = self.listeners().iter().map(|(_, l)| Arc::clone(l)).collect();
    let transition = Transition { reachable };
    for listener in listeners {
      listener(transition);
    }
    true
  }
}

impl std::fmt::Debug for NetworkMonitor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("NetworkMonitor")
      .field("reachable", &self.is_reachable())
      .finish_non_exhaustive()
  }
}
