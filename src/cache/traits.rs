//! Core types for the caching system.

use chrono::{DateTime, Utc};

use crate::http::FetchResponse;

/// A response stored in a cache generation.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  /// Absolute URL of the request that produced this entry
  pub url: String,
  /// The stored response
  pub response: FetchResponse,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Result of routing a request through the proxy, with metadata about the source.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
  /// The response handed back to the page
  pub response: FetchResponse,
  /// Where the response came from
  pub source: ResponseSource,
  /// When the response was cached (if served from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl FetchOutcome {
  /// Create an outcome from a fresh network response.
  pub fn from_network(response: FetchResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  /// Create an outcome from a cache hit.
  pub fn from_cache(entry: CachedEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::Cache,
      cached_at: Some(entry.cached_at),
    }
  }

  /// Create an outcome for offline mode, served from a stale entry.
  pub fn offline(entry: CachedEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::StaleCache,
      cached_at: Some(entry.cached_at),
    }
  }

  /// Create an outcome for a request the proxy did not intercept.
  pub fn pass_through(response: FetchResponse) -> Self {
    Self {
      response,
      source: ResponseSource::PassThrough,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Cache hit, no network activity
  Cache,
  /// Cache miss answered by the network
  Network,
  /// Network unavailable, serving a previously cached entry
  StaleCache,
  /// Not intercepted, forwarded to the network unmodified
  PassThrough,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseSource::Cache => "cache",
      ResponseSource::Network => "network",
      ResponseSource::StaleCache => "stale-cache",
      ResponseSource::PassThrough => "pass-through",
    }
  }
}
