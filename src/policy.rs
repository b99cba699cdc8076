//! Request routing and caching rules.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use url::{Origin, Url};

use crate::http::FetchRequest;

/// Paths every generation is populated with at install time.
pub const SHELL_RESOURCES: &[&str] = &["/", "/index.html", "/manifest.json"];

/// Path segment marking remote API calls.
const API_MARKER: &str = "/api/";

/// Static asset suffixes worth caching after a successful fetch.
const STATIC_EXTENSIONS: &[&str] = &[".js", ".css", ".json"];

/// Why a request was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
  NonGet,
  CrossOrigin,
  OutOfScope,
}

/// Routing decision for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Forward to the network unmodified
  PassThrough(PassReason),
  /// Handle with cache-first-with-network-fallback
  Intercept,
}

/// Origin and path prefix the proxy is responsible for.
#[derive(Debug, Clone)]
pub struct Scope {
  base: Url,
  origin: Origin,
  path_prefix: String,
}

impl Scope {
  pub fn new(origin: &Url, path_prefix: &str) -> Result<Self> {
    if origin.cannot_be_a_base() || !origin.origin().is_tuple() {
      return Err(eyre!("Origin {} cannot host a proxy scope", origin));
    }

    let path_prefix = if path_prefix.starts_with('/') {
      path_prefix.to_string()
    } else {
      format!("/{}", path_prefix)
    };

    let base_path = if path_prefix.ends_with('/') {
      path_prefix.clone()
    } else {
      format!("{}/", path_prefix)
    };
    let base = origin
      .join(&base_path)
      .map_err(|e| eyre!("Invalid scope {} on {}: {}", path_prefix, origin, e))?;

    Ok(Self {
      origin: origin.origin(),
      base,
      path_prefix,
    })
  }

  /// The scope root, e.g. `http://localhost:3000/`.
  pub fn base(&self) -> &Url {
    &self.base
  }

  /// Resolve a path (or relative reference) against the scope's origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .base
      .join(path)
      .map_err(|e| eyre!("Invalid URL {} in scope {}: {}", path, self.base, e))
  }

  /// Resolve a shell path under the scope root, so `/index.html` in the
  /// `lookbook/` scope becomes `/lookbook/index.html`.
  pub fn resolve_in_scope(&self, path: &str) -> Result<Url> {
    self.resolve(path.trim_start_matches('/'))
  }

  pub fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin
  }

  /// Decide whether a request is intercepted.
  ///
  /// Evaluated in order: non-GET, cross-origin, outside the scope prefix.
  pub fn route(&self, request: &FetchRequest) -> Route {
    if request.method != Method::GET {
      return Route::PassThrough(PassReason::NonGet);
    }

    if !self.is_same_origin(&request.url) {
      return Route::PassThrough(PassReason::CrossOrigin);
    }

    if !request.url.path().starts_with(&self.path_prefix) {
      return Route::PassThrough(PassReason::OutOfScope);
    }

    Route::Intercept
  }
}

/// Whether a non-shell response may be cached opportunistically.
///
/// True when the URL path contains `/api/` or the full URL ends in `.js`,
/// `.css` or `.json`.
pub fn is_cacheable_dynamic(url: &Url) -> bool {
  url.path().contains(API_MARKER) || STATIC_EXTENSIONS.iter().any(|ext| url.as_str().ends_with(ext))
}
