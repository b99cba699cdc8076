//! The offline cache proxy. One instance exists per deployed version.

use color_eyre::Result;
use futures::future::join_all;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::cache::{CacheLayer, CacheStorage, FetchOutcome, RequestKey};
use crate::http::FetchRequest;
use crate::network::Fetcher;
use crate::policy::{Route, Scope, SHELL_RESOURCES};

/// Name of the cache generation owned by a given version.
pub fn generation_name(prefix: &str, version: u32) -> String {
  format!("{}-v{}", prefix, version)
}

/// Lifecycle state of a proxy version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
  /// Created, install not started
  Uninitialized,
  /// Populating its cache generation
  Installing,
  /// Installed, waiting for the previous version to step aside
  Waiting,
  /// Serving requests
  Active,
  /// Replaced by a newer version, or install failed
  Superseded,
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      WorkerState::Uninitialized => "uninitialized",
      WorkerState::Installing => "installing",
      WorkerState::Waiting => "waiting",
      WorkerState::Active => "active",
      WorkerState::Superseded => "superseded",
    };
    f.write_str(name)
  }
}

/// Which shell resources made it into the cache during install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub stored: Vec<String>,
  pub skipped: Vec<String>,
}

/// Offline cache proxy for a single version.
pub struct OfflineCacheProxy<S: CacheStorage, F: Fetcher> {
  version: u32,
  scope: Scope,
  cache: CacheLayer<S>,
  network: Arc<F>,
  state: Mutex<WorkerState>,
}

impl<S: CacheStorage, F: Fetcher> OfflineCacheProxy<S, F> {
  pub fn new(
    version: u32,
    cache_name: impl Into<String>,
    scope: Scope,
    storage: Arc<S>,
    network: Arc<F>,
  ) -> Self {
    Self {
      version,
      scope,
      cache: CacheLayer::new(storage, cache_name),
      network,
      state: Mutex::new(WorkerState::Uninitialized),
    }
  }

  pub fn version(&self) -> u32 {
    self.version
  }

  pub fn cache_name(&self) -> &str {
    self.cache.generation()
  }

  pub fn scope(&self) -> &Scope {
    &self.scope
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub(crate) fn set_state(&self, state: WorkerState) {
    let mut current = self.state.lock().unwrap_or_else(|e| e.into_inner());
    let previous = *current;
    debug!(cache = %self.cache.generation(), from = %previous, to = %state, "state change");
    *current = state;
  }

  /// Populate this version's generation with the shell resources.
  ///
  /// Individual resources that fail to fetch, or answer with an error status,
  /// are logged and skipped. Only a storage failure opening the generation
  /// fails the install.
  pub async fn install(&self) -> Result<InstallReport> {
    info!(cache = %self.cache_name(), "installing");
    self.cache.storage().open_generation(self.cache_name())?;

    let results = join_all(SHELL_RESOURCES.iter().map(|path| self.install_resource(path))).await;

    let mut report = InstallReport::default();
    for (path, stored) in SHELL_RESOURCES.iter().zip(results) {
      if stored {
        report.stored.push(path.to_string());
      } else {
        report.skipped.push(path.to_string());
      }
    }

    info!(
      cache = %self.cache_name(),
      stored = report.stored.len(),
      skipped = report.skipped.len(),
      "install complete"
    );
    Ok(report)
  }

  async fn install_resource(&self, path: &str) -> bool {
    let url = match self.scope.resolve_in_scope(path) {
      Ok(url) => url,
      Err(e) => {
        warn!(path, "skipping shell resource: {:#}", e);
        return false;
      }
    };

    let request = FetchRequest::get(url);
    match self.network.fetch(&request).await {
      Ok(response) if response.is_success() => {
        self.cache.store(&RequestKey::from_request(&request), &response)
      }
      Ok(response) => {
        warn!(url = %request.url, status = %response.status, "shell resource not cached");
        false
      }
      Err(e) => {
        warn!(url = %request.url, "shell resource unreachable: {:#}", e);
        false
      }
    }
  }

  /// Delete every generation except this version's own.
  ///
  /// Returns the names of the deleted generations.
  pub async fn activate(&self) -> Result<Vec<String>> {
    let storage = self.cache.storage();
    storage.open_generation(self.cache_name())?;

    let mut deleted = Vec::new();
    for name in storage.generations()? {
      if name == self.cache_name() {
        continue;
      }
      if storage.delete_generation(&name)? {
        info!(generation = %name, "deleted stale cache generation");
        deleted.push(name);
      }
    }

    info!(cache = %self.cache_name(), deleted = deleted.len(), "activated");
    Ok(deleted)
  }

  /// Route a request from a controlled page.
  pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<FetchOutcome> {
    match self.scope.route(request) {
      Route::PassThrough(reason) => {
        debug!(method = %request.method, url = %request.url, ?reason, "pass through");
        let response = self.network.fetch(request).await?;
        Ok(FetchOutcome::pass_through(response))
      }
      Route::Intercept => {
        self
          .cache
          .fetch_cache_first(request, || self.network.fetch(request))
          .await
      }
    }
  }
}

/// Builds proxy versions that share one scope, storage backend and network.
///
/// The running server uses it to register versions deployed after startup.
pub struct VersionBuilder<S: CacheStorage, F: Fetcher> {
  prefix: String,
  scope: Scope,
  storage: Arc<S>,
  network: Arc<F>,
}

impl<S: CacheStorage, F: Fetcher> VersionBuilder<S, F> {
  pub fn new(prefix: impl Into<String>, scope: Scope, storage: Arc<S>, network: Arc<F>) -> Self {
    Self {
      prefix: prefix.into(),
      scope,
      storage,
      network,
    }
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn network(&self) -> &Arc<F> {
    &self.network
  }

  pub fn cache_name(&self, version: u32) -> String {
    generation_name(&self.prefix, version)
  }

  pub fn build(&self, version: u32) -> OfflineCacheProxy<S, F> {
    OfflineCacheProxy::new(
      version,
      self.cache_name(version),
      self.scope.clone(),
      Arc::clone(&self.storage),
      Arc::clone(&self.network),
    )
  }
}
