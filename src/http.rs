//! Request and response values passed between pages, the proxy and the network.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST, TRANSFER_ENCODING};
use reqwest::{Method, StatusCode};
use url::Url;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
  "keep-alive",
  "proxy-authenticate",
  "proxy-authorization",
  "proxy-connection",
  "te",
  "trailer",
  "upgrade",
];

/// An outgoing request issued by a page.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: Method,
  pub url: Url,
  pub headers: HeaderMap,
  pub body: Bytes,
}

impl FetchRequest {
  /// Build a request. Any `#fragment` is dropped, it never reaches the network.
  pub fn new(method: Method, mut url: Url) -> Self {
    url.set_fragment(None);
    Self {
      method,
      url,
      headers: HeaderMap::new(),
      body: Bytes::new(),
    }
  }

  /// Shorthand for a bodiless GET.
  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = body.into();
    self
  }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Bytes,
}

impl FetchResponse {
  pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: HeaderMap::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.insert(name, value);
    self
  }

  /// True for 2xx statuses, the only ones that may be written to a cache.
  pub fn is_success(&self) -> bool {
    self.status.is_success()
  }

  /// Make an independent copy for storage.
  ///
  /// The body is copied into a fresh buffer so the stored entry never shares
  /// memory with the response handed back to the page.
  pub fn duplicate(&self) -> Self {
    Self {
      status: self.status,
      headers: self.headers.clone(),
      body: Bytes::copy_from_slice(&self.body),
    }
  }
}

/// Remove connection-scoped headers before a message crosses the proxy.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
  headers.remove(CONNECTION);
  headers.remove(TRANSFER_ENCODING);
  headers.remove(HOST);
  for name in HOP_BY_HOP {
    headers.remove(*name);
  }
}
