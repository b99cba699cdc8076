//! Registration supervisor driving proxy versions through their lifecycle.
//!
//! ```text
//! Uninitialized -> Installing -> Waiting -> Active -> Superseded
//!                       |                                ^
//!                       +------- install failed ---------+
//! ```
//!
//! Each phase is awaited to completion before the next one may start, so a
//! version never serves traffic with a half-populated cache and never
//! activates while another transition is still running.

use color_eyre::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{CacheStorage, FetchOutcome};
use crate::http::FetchRequest;
use crate::message::ClientMessage;
use crate::network::Fetcher;
use crate::worker::{OfflineCacheProxy, WorkerState};

type Proxy<S, F> = Arc<OfflineCacheProxy<S, F>>;

/// Summary of one registered version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
  pub version: u32,
  pub cache_name: String,
  pub state: WorkerState,
}

impl VersionInfo {
  fn of<S: CacheStorage, F: Fetcher>(proxy: &OfflineCacheProxy<S, F>) -> Self {
    Self {
      version: proxy.version(),
      cache_name: proxy.cache_name().to_string(),
      state: proxy.state(),
    }
  }
}

/// Snapshot of the registration slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationStatus {
  pub active: Option<VersionInfo>,
  pub waiting: Option<VersionInfo>,
}

/// Owns the active and waiting proxy versions for one scope.
///
/// The active version controls every page: requests dispatched here are
/// handled by it. When no version is active yet, requests go straight to the
/// network.
pub struct Registration<S: CacheStorage, F: Fetcher> {
  network: Arc<F>,
  skip_waiting_on_install: bool,
  /// Serialises install/activate transitions
  transition: Mutex<()>,
  waiting: RwLock<Option<Proxy<S, F>>>,
  active: RwLock<Option<Proxy<S, F>>>,
}

impl<S: CacheStorage, F: Fetcher> Registration<S, F> {
  pub fn new(network: Arc<F>, skip_waiting_on_install: bool) -> Self {
    Self {
      network,
      skip_waiting_on_install,
      transition: Mutex::new(()),
      waiting: RwLock::new(None),
      active: RwLock::new(None),
    }
  }

  /// Install a new version and, when allowed, activate it.
  ///
  /// Registering the version that is already active or already waiting is a
  /// no-op. A version whose install fails is marked superseded and the error
  /// is returned; the current active version keeps serving.
  pub async fn register(&self, proxy: OfflineCacheProxy<S, F>) -> Result<WorkerState> {
    let _transition = self.transition.lock().await;

    if let Some(existing) = self.find_version(proxy.version()).await {
      debug!(version = proxy.version(), state = %existing.state(), "version already registered");
      return Ok(existing.state());
    }

    let proxy = Arc::new(proxy);
    proxy.set_state(WorkerState::Installing);

    if let Err(e) = proxy.install().await {
      warn!(cache = %proxy.cache_name(), "install failed: {:#}", e);
      proxy.set_state(WorkerState::Superseded);
      return Err(e);
    }

    proxy.set_state(WorkerState::Waiting);
    if let Some(previous) = self.waiting.write().await.replace(Arc::clone(&proxy)) {
      previous.set_state(WorkerState::Superseded);
    }

    let has_active = self.active.read().await.is_some();
    if self.skip_waiting_on_install || !has_active {
      self.promote_waiting().await;
    } else {
      info!(cache = %proxy.cache_name(), "installed, waiting for takeover");
    }

    Ok(proxy.state())
  }

  /// Activate the waiting version immediately. Returns false if none is waiting.
  pub async fn skip_waiting(&self) -> bool {
    let _transition = self.transition.lock().await;
    self.promote_waiting().await
  }

  /// Handle a message posted by a controlled page.
  pub async fn post_message(&self, message: ClientMessage) -> bool {
    match message {
      ClientMessage::SkipWaiting => {
        let promoted = self.skip_waiting().await;
        if !promoted {
          debug!("skip waiting requested with no waiting version");
        }
        promoted
      }
      ClientMessage::Unknown => {
        debug!("ignoring unrecognised client message");
        false
      }
    }
  }

  /// Send a page request through the controlling version.
  pub async fn dispatch(&self, request: &FetchRequest) -> Result<FetchOutcome> {
    let controller = self.active.read().await.clone();

    match controller {
      Some(proxy) => proxy.handle_fetch(request).await,
      None => {
        debug!(url = %request.url, "no active version, passing through");
        let response = self.network.fetch(request).await?;
        Ok(FetchOutcome::pass_through(response))
      }
    }
  }

  pub async fn active(&self) -> Option<Proxy<S, F>> {
    self.active.read().await.clone()
  }

  pub async fn waiting(&self) -> Option<Proxy<S, F>> {
    self.waiting.read().await.clone()
  }

  pub async fn status(&self) -> RegistrationStatus {
    RegistrationStatus {
      active: self.active().await.map(|p| VersionInfo::of(&*p)),
      waiting: self.waiting().await.map(|p| VersionInfo::of(&*p)),
    }
  }

  async fn find_version(&self, version: u32) -> Option<Proxy<S, F>> {
    if let Some(active) = self.active().await.filter(|p| p.version() == version) {
      return Some(active);
    }
    self.waiting().await.filter(|p| p.version() == version)
  }

  /// Caller must hold the transition lock.
  async fn promote_waiting(&self) -> bool {
    let Some(next) = self.waiting.write().await.take() else {
      return false;
    };

    // A failed cleanup leaves stale generations behind; the next activation deletes them
    if let Err(e) = next.activate().await {
      warn!(cache = %next.cache_name(), "activation cleanup failed: {:#}", e);
    }

    next.set_state(WorkerState::Active);
    if let Some(previous) = self.active.write().await.replace(Arc::clone(&next)) {
      previous.set_state(WorkerState::Superseded);
      info!(from = %previous.cache_name(), to = %next.cache_name(), "version replaced");
    } else {
      info!(cache = %next.cache_name(), "version active");
    }

    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, ResponseSource};
  use crate::policy::Scope;
  use crate::testing::ScriptedFetcher;
  use crate::worker::generation_name;
  use reqwest::{Method, StatusCode};
  use url::Url;

  struct Fixture {
    storage: Arc<MemoryStorage>,
    network: Arc<ScriptedFetcher>,
  }

  impl Fixture {
    fn new() -> Self {
      let network = Arc::new(ScriptedFetcher::new());
      network.respond("http://localhost:3000/", StatusCode::OK, "<html>root</html>");
      network.respond("http://localhost:3000/index.html", StatusCode::OK, "<html>index</html>");
      network.respond("http://localhost:3000/manifest.json", StatusCode::OK, "{}");
      Self {
        storage: Arc::new(MemoryStorage::new()),
        network,
      }
    }

    fn proxy(&self, version: u32) -> OfflineCacheProxy<MemoryStorage, ScriptedFetcher> {
      OfflineCacheProxy::new(
        version,
        generation_name("lookbook", version),
        Scope::new(&Url::parse("http://localhost:3000").unwrap(), "/").unwrap(),
        Arc::clone(&self.storage),
        Arc::clone(&self.network),
      )
    }

    fn registration(&self, skip_waiting: bool) -> Registration<MemoryStorage, ScriptedFetcher> {
      Registration::new(Arc::clone(&self.network), skip_waiting)
    }
  }

  fn get(url: &str) -> FetchRequest {
    FetchRequest::get(Url::parse(url).unwrap())
  }

  #[tokio::test]
  async fn test_first_version_activates_immediately() {
    let fx = Fixture::new();
    let registration = fx.registration(false);

    let state = registration.register(fx.proxy(1)).await.unwrap();

    assert_eq!(state, WorkerState::Active);
    assert_eq!(registration.active().await.unwrap().version(), 1);
    assert!(registration.waiting().await.is_none());
  }

  #[tokio::test]
  async fn test_skip_waiting_on_install_replaces_active() {
    let fx = Fixture::new();
    let registration = fx.registration(true);
    registration.register(fx.proxy(1)).await.unwrap();
    let v1 = registration.active().await.unwrap();

    let state = registration.register(fx.proxy(2)).await.unwrap();

    assert_eq!(state, WorkerState::Active);
    assert_eq!(v1.state(), WorkerState::Superseded);
    assert_eq!(fx.storage.generations().unwrap(), vec!["lookbook-v2"]);
  }

  #[tokio::test]
  async fn test_new_version_waits_until_skip_waiting_message() {
    let fx = Fixture::new();
    let registration = fx.registration(false);
    registration.register(fx.proxy(1)).await.unwrap();

    let state = registration.register(fx.proxy(2)).await.unwrap();

    assert_eq!(state, WorkerState::Waiting);
    assert_eq!(registration.active().await.unwrap().version(), 1);
    // Both generations coexist during the update
    assert_eq!(
      fx.storage.generations().unwrap(),
      vec!["lookbook-v1", "lookbook-v2"]
    );

    assert!(registration.post_message(ClientMessage::SkipWaiting).await);

    let status = registration.status().await;
    assert_eq!(status.active.unwrap().cache_name, "lookbook-v2");
    assert!(status.waiting.is_none());
    assert_eq!(fx.storage.generations().unwrap(), vec!["lookbook-v2"]);
  }

  #[tokio::test]
  async fn test_messages_without_waiting_version_are_noops() {
    let fx = Fixture::new();
    let registration = fx.registration(false);
    registration.register(fx.proxy(1)).await.unwrap();

    assert!(!registration.post_message(ClientMessage::SkipWaiting).await);
    assert!(!registration.post_message(ClientMessage::Unknown).await);
    assert_eq!(registration.active().await.unwrap().version(), 1);
  }

  #[tokio::test]
  async fn test_unknown_message_does_not_promote() {
    let fx = Fixture::new();
    let registration = fx.registration(false);
    registration.register(fx.proxy(1)).await.unwrap();
    registration.register(fx.proxy(2)).await.unwrap();

    assert!(!registration.post_message(ClientMessage::Unknown).await);
    assert_eq!(registration.waiting().await.unwrap().version(), 2);
  }

  #[tokio::test]
  async fn test_newer_waiting_version_supersedes_older_waiting() {
    let fx = Fixture::new();
    let registration = fx.registration(false);
    registration.register(fx.proxy(1)).await.unwrap();
    registration.register(fx.proxy(2)).await.unwrap();
    let v2 = registration.waiting().await.unwrap();

    registration.register(fx.proxy(3)).await.unwrap();

    assert_eq!(v2.state(), WorkerState::Superseded);
    assert_eq!(registration.waiting().await.unwrap().version(), 3);
    assert!(registration.skip_waiting().await);
    assert_eq!(fx.storage.generations().unwrap(), vec!["lookbook-v3"]);
  }

  #[tokio::test]
  async fn test_registering_same_version_is_noop() {
    let fx = Fixture::new();
    let registration = fx.registration(true);
    registration.register(fx.proxy(1)).await.unwrap();
    let calls = fx.network.calls();

    let state = registration.register(fx.proxy(1)).await.unwrap();

    assert_eq!(state, WorkerState::Active);
    assert_eq!(fx.network.calls(), calls);
  }

  #[tokio::test]
  async fn test_dispatch_without_active_version_passes_through() {
    let fx = Fixture::new();
    fx.network.respond("http://localhost:3000/api/looks/1", StatusCode::OK, "{}");
    let registration = fx.registration(true);

    let outcome = registration
      .dispatch(&get("http://localhost:3000/api/looks/1"))
      .await
      .unwrap();

    assert_eq!(outcome.source, ResponseSource::PassThrough);
    assert!(fx.storage.generations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_upgrade_serves_from_new_generation() {
    let fx = Fixture::new();
    let look = "http://localhost:3000/api/looks/42";
    fx.network.respond(look, StatusCode::OK, "{\"id\":42}");
    let registration = fx.registration(true);

    // v1 and v2 caches both exist before v2 activates
    registration.register(fx.proxy(1)).await.unwrap();
    registration.dispatch(&get(look)).await.unwrap();
    fx.storage.open_generation("lookbook-v2").unwrap();
    assert_eq!(
      fx.storage.generations().unwrap(),
      vec!["lookbook-v1", "lookbook-v2"]
    );

    registration.register(fx.proxy(2)).await.unwrap();

    assert_eq!(fx.storage.generations().unwrap(), vec!["lookbook-v2"]);
    assert_eq!(registration.active().await.unwrap().cache_name(), "lookbook-v2");

    // The v1 entry is gone, so v2 fetches and caches into its own generation
    let outcome = registration.dispatch(&get(look)).await.unwrap();
    assert_eq!(outcome.source, ResponseSource::Network);
    let outcome = registration.dispatch(&get(look)).await.unwrap();
    assert_eq!(outcome.source, ResponseSource::Cache);
    assert_eq!(fx.storage.entry_count("lookbook-v2").unwrap(), 4);
  }

  #[tokio::test]
  async fn test_in_flight_fetch_cannot_revive_replaced_generation() {
    let fx = Fixture::new();
    let look = "http://localhost:3000/api/looks/42";
    fx.network.respond(look, StatusCode::OK, "{\"id\":42}");
    let gate = fx.network.gate(look);
    let registration = fx.registration(true);
    registration.register(fx.proxy(1)).await.unwrap();
    let calls = fx.network.calls();

    let request = get(look);
    let (outcome, ()) = tokio::join!(registration.dispatch(&request), async {
      // v1 is now parked on the network leg
      while fx.network.calls() == calls {
        tokio::task::yield_now().await;
      }
      registration.register(fx.proxy(2)).await.unwrap();
      assert_eq!(fx.storage.generations().unwrap(), vec!["lookbook-v2"]);
      gate.notify_one();
    });

    // The late v1 response is still delivered but not written anywhere
    let outcome = outcome.unwrap();
    assert_eq!(outcome.source, ResponseSource::Network);
    assert_eq!(outcome.response.body.as_ref(), b"{\"id\":42}");
    assert_eq!(fx.storage.generations().unwrap(), vec!["lookbook-v2"]);
    assert_eq!(fx.storage.entry_count("lookbook-v2").unwrap(), 3);
  }

  #[tokio::test]
  async fn test_offline_after_activation_serves_shell() {
    let fx = Fixture::new();
    let registration = fx.registration(true);
    registration.register(fx.proxy(1)).await.unwrap();
    fx.network.go_offline();

    let outcome = registration
      .dispatch(&get("http://localhost:3000/index.html"))
      .await
      .unwrap();
    assert_eq!(outcome.source, ResponseSource::Cache);
    assert_eq!(outcome.response.body.as_ref(), b"<html>index</html>");

    // Writes still go to the network and fail
    let post = FetchRequest::new(
      Method::POST,
      Url::parse("http://localhost:3000/api/looks").unwrap(),
    );
    assert!(registration.dispatch(&post).await.is_err());

    fx.network.go_online();
    assert!(registration
      .dispatch(&get("http://localhost:3000/manifest.json"))
      .await
      .is_ok());
  }
}
