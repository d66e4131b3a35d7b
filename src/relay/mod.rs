//! The interception layer: routing, strategies, outbox and lifecycle.
//!
//! A single [`Relay`] is built at startup and shared by reference with the
//! proxy, the connectivity monitor and the CLI. It owns the router, the
//! cache regions, the record store and the transport.

mod lifecycle;
mod outbox;
mod replay;
mod router;
mod strategy;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::cache::RegionStorage;
use crate::config::Config;
use crate::error::{FetchError, RelayError};
use crate::net::{Request, Response, Transport};
use crate::store::RecordStore;

pub use outbox::OutboxEntry;
pub use replay::ReplayReport;
pub use router::{Route, Router};

/// Reachability of the origin as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
  Unknown,
  Online,
  Offline,
}

/// Tracks origin reachability and detects when it comes back.
#[derive(Debug)]
pub struct LinkState {
  state: AtomicU8,
}

impl LinkState {
  const UNKNOWN: u8 = 0;
  const ONLINE: u8 = 1;
  const OFFLINE: u8 = 2;

  pub fn new() -> Self {
    Self {
      state: AtomicU8::new(Self::UNKNOWN),
    }
  }

  pub fn current(&self) -> Link {
    match self.state.load(Ordering::SeqCst) {
      Self::ONLINE => Link::Online,
      Self::OFFLINE => Link::Offline,
      _ => Link::Unknown,
    }
  }

  /// Record an observation. Returns true when it restores connectivity,
  /// i.e. the origin is reachable and was not known to be before.
  pub fn report(&self, reachable: bool) -> bool {
    let next = if reachable { Self::ONLINE } else { Self::OFFLINE };
    let previous = self.state.swap(next, Ordering::SeqCst);
    reachable && previous != Self::ONLINE
  }
}

impl Default for LinkState {
  fn default() -> Self {
    Self::new()
  }
}

/// Process-wide interception context.
pub struct Relay<S: RecordStore, T: Transport> {
  config: Config,
  router: Router,
  regions: RegionStorage,
  store: Arc<S>,
  transport: Arc<T>,
  link: LinkState,
  /// Overlapping replay triggers run one after another
  replay_lock: tokio::sync::Mutex<()>,
}

impl<S: RecordStore, T: Transport> Relay<S, T> {
  pub fn new(config: Config, regions: RegionStorage, store: S, transport: T) -> Self {
    Self {
      router: Router::new(&config),
      config,
      regions,
      store: Arc::new(store),
      transport: Arc::new(transport),
      link: LinkState::new(),
      replay_lock: tokio::sync::Mutex::new(()),
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn router(&self) -> &Router {
    &self.router
  }

  pub fn regions(&self) -> &RegionStorage {
    &self.regions
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  pub fn transport(&self) -> &T {
    &self.transport
  }

  pub fn link(&self) -> &LinkState {
    &self.link
  }

  /// Serve one intercepted request.
  ///
  /// Always resolves to a response or a typed error; never panics on
  /// unreachable origins or missing data.
  pub async fn handle(&self, request: Request) -> Result<Response, RelayError> {
    let route = self.router.classify(&request.method, &request.url);
    debug!(route = route.name(), method = %request.method.as_str(), url = %request.url, "Routing request");

    match route {
      Route::Shell { document } => self.serve_shell(&document, &request).await,
      Route::Image => self.serve_image(&request).await,
      Route::MapTile => self.serve_map(&request).await,
      Route::Listing => self.serve_listing(&request).await,
      Route::ReviewsRead => self.serve_reviews(&request).await,
      Route::ReviewsWrite => self.submit_review(&request).await,
      Route::Replay => self.replay_response().await,
      Route::NetworkOnly => self.fetch(&request).await,
      Route::Passthrough => self.passthrough(&request).await,
    }
  }

  /// Send through the transport, noting unreachability for the monitor.
  async fn fetch(&self, request: &Request) -> Result<Response, RelayError> {
    match self.transport.send(request).await {
      Ok(response) => Ok(response),
      Err(e) => {
        if !matches!(e, FetchError::InvalidRequest(_)) {
          self.link.report(false);
        }
        Err(e.into())
      }
    }
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use crate::db::Database;
  use crate::net::fake::FakeTransport;
  use crate::store::SqliteRecordStore;

  pub type TestRelay = Relay<SqliteRecordStore, FakeTransport>;

  pub fn relay() -> TestRelay {
    relay_with(Config::default())
  }

  pub fn relay_with(config: Config) -> TestRelay {
    let db = Arc::new(Database::open_in_memory().unwrap());
    Relay::new(
      config,
      RegionStorage::new(Arc::clone(&db)),
      SqliteRecordStore::new(db),
      FakeTransport::new(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_link_first_success_counts_as_restored() {
    let link = LinkState::new();
    assert_eq!(link.current(), Link::Unknown);
    assert!(link.report(true));
    assert!(!link.report(true));
    assert_eq!(link.current(), Link::Online);
  }

  #[test]
  fn test_link_restored_after_outage() {
    let link = LinkState::new();
    link.report(true);
    assert!(!link.report(false));
    assert!(!link.report(false));
    assert_eq!(link.current(), Link::Offline);
    assert!(link.report(true));
  }
}
