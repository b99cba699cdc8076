//! Request keys used to address cache entries.

use reqwest::Method;
use sha2::{Digest, Sha256};

use crate::http::FetchRequest;

/// Identifies a cache entry by request method and absolute URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: Method,
  url: String,
}

impl RequestKey {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      method,
      url: url.into(),
    }
  }

  pub fn from_request(request: &FetchRequest) -> Self {
    Self::new(request.method.clone(), request.url.as_str())
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// Stable, fixed-length digest used as the storage primary key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}
