//! Cache layer that orchestrates caching logic with network fetching.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::key::RequestKey;
use super::storage::CacheStorage;
use super::traits::{CachedEntry, FetchOutcome};
use crate::http::{FetchRequest, FetchResponse};
use crate::policy::is_cacheable_dynamic;

/// Cache layer bound to a single generation.
///
/// All reads and writes go to the generation this layer was created for,
/// never to any other version's cache.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  generation: String,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer writing into `generation`.
  pub fn new(storage: Arc<S>, generation: impl Into<String>) -> Self {
    Self {
      storage,
      generation: generation.into(),
    }
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Look up an entry. Storage errors are logged and treated as a miss.
  pub fn lookup(&self, key: &RequestKey) -> Option<CachedEntry> {
    match self.storage.match_entry(&self.generation, key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(generation = %self.generation, %key, "cache lookup failed: {:#}", e);
        None
      }
    }
  }

  /// Store a response. Returns false if the write failed.
  pub fn store(&self, key: &RequestKey, response: &FetchResponse) -> bool {
    match self.storage.put_entry(&self.generation, key, response) {
      Ok(()) => true,
      Err(e) => {
        warn!(generation = %self.generation, %key, "cache write failed: {:#}", e);
        false
      }
    }
  }

  /// Fetch with a cache-first strategy.
  ///
  /// 1. Check cache - on a hit, return immediately without touching the network
  /// 2. On a miss, fetch from network
  /// 3. Successful responses for cacheable URLs are duplicated into the cache
  /// 4. On network failure, look again and return a stale entry if one appeared
  pub async fn fetch_cache_first<F, Fut>(
    &self,
    request: &FetchRequest,
    fetcher: F,
  ) -> Result<FetchOutcome>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<FetchResponse>>,
  {
    let key = RequestKey::from_request(request);

    // Check cache first
    if let Some(entry) = self.lookup(&key) {
      debug!(%key, "cache hit");
      return Ok(FetchOutcome::from_cache(entry));
    }

    match fetcher().await {
      Ok(response) => {
        if !response.is_success() {
          // Error pages are never cached
          debug!(%key, status = %response.status, "not caching unsuccessful response");
          return Ok(FetchOutcome::from_network(response));
        }

        if is_cacheable_dynamic(&request.url) {
          let copy = response.duplicate();
          if self.store(&key, &copy) {
            debug!(%key, bytes = copy.body.len(), "cached network response");
          }
        }

        Ok(FetchOutcome::from_network(response))
      }
      Err(e) => {
        // Network failed, fall back to whatever may have been stored meanwhile
        match self.lookup(&key) {
          Some(entry) => {
            warn!(%key, "network failed, serving stale cache: {:#}", e);
            Ok(FetchOutcome::offline(entry))
          }
          None => {
            warn!(%key, "network failed with no cached fallback");
            Err(e)
          }
        }
      }
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      generation: self.generation.clone(),
    }
  }
}
