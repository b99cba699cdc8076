//! Local HTTP front for running the proxy outside a browser.
//!
//! Pages (or a browser configured to use this address as its HTTP proxy) send
//! their requests here. Origin-form requests are resolved against the
//! configured origin, absolute-form requests keep their own URL.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, FetchOutcome};
use crate::http::{strip_hop_by_hop, FetchRequest};
use crate::message::ClientMessage;
use crate::network::Fetcher;
use crate::registration::{Registration, RegistrationStatus, VersionInfo};
use crate::worker::VersionBuilder;

/// Control endpoint for page messages such as `{"type":"SKIP_WAITING"}`.
pub const MESSAGE_PATH: &str = "/__lookcache/message";
/// Control endpoint installing a newly deployed version, e.g. `{"version":2}`.
pub const REGISTER_PATH: &str = "/__lookcache/register";
/// Control endpoint reporting versions and stored generations.
pub const STATUS_PATH: &str = "/__lookcache/status";

/// Response header naming where a response came from.
const SOURCE_HEADER: &str = "x-lookcache-source";

/// Upper bound on request bodies buffered for forwarding.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

struct AppState<S: CacheStorage, F: Fetcher> {
  registration: Arc<Registration<S, F>>,
  versions: Arc<VersionBuilder<S, F>>,
  origin: Url,
}

impl<S: CacheStorage, F: Fetcher> Clone for AppState<S, F> {
  fn clone(&self) -> Self {
    Self {
      registration: Arc::clone(&self.registration),
      versions: Arc::clone(&self.versions),
      origin: self.origin.clone(),
    }
  }
}

#[derive(Serialize)]
struct StatusResponse {
  #[serde(flatten)]
  registration: RegistrationStatus,
  generations: Vec<String>,
}

#[derive(Deserialize)]
struct RegisterRequest {
  version: u32,
}

/// Build the router: control endpoints plus a catch-all that feeds the proxy.
pub fn router<S, F>(
  registration: Arc<Registration<S, F>>,
  versions: Arc<VersionBuilder<S, F>>,
  origin: Url,
) -> Router
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  let state = AppState {
    registration,
    versions,
    origin,
  };

  Router::new()
    .route(MESSAGE_PATH, post(post_message::<S, F>))
    .route(REGISTER_PATH, post(register_version::<S, F>))
    .route(STATUS_PATH, get(status::<S, F>))
    .fallback(proxy_request::<S, F>)
    .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
    .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn run_server<S, F>(
  addr: SocketAddr,
  registration: Arc<Registration<S, F>>,
  versions: Arc<VersionBuilder<S, F>>,
  origin: Url,
) -> Result<()>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  let app = router(registration, versions, origin.clone());

  let listener = tokio::net::TcpListener::bind(addr)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", addr, e))?;
  info!(%addr, %origin, "proxy listening");

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      tokio::signal::ctrl_c().await.ok();
      info!("received SIGINT, shutting down");
    })
    .await
    .map_err(|e| eyre!("Proxy server error: {}", e))?;

  Ok(())
}

// Bodies over MAX_BODY_BYTES are rejected by the Bytes extractor with 413
async fn proxy_request<S, F>(
  State(state): State<AppState<S, F>>,
  method: Method,
  uri: Uri,
  headers: HeaderMap,
  body: Bytes,
) -> Response
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  let request = match into_fetch_request(&state.origin, method, &uri, headers, body) {
    Ok(request) => request,
    Err(e) => {
      warn!("rejecting request: {:#}", e);
      return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }
  };

  match state.registration.dispatch(&request).await {
    Ok(outcome) => {
      debug!(
        method = %request.method,
        url = %request.url,
        status = %outcome.response.status,
        source = outcome.source.as_str(),
        "served"
      );
      into_response(outcome)
    }
    Err(e) => {
      warn!(method = %request.method, url = %request.url, "request failed: {:#}", e);
      (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
    }
  }
}

async fn post_message<S, F>(State(state): State<AppState<S, F>>, body: Bytes) -> Response
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  match ClientMessage::parse(&body) {
    Ok(message) => {
      debug!(?message, "client message");
      state.registration.post_message(message).await;
      StatusCode::NO_CONTENT.into_response()
    }
    Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
  }
}

async fn register_version<S, F>(State(state): State<AppState<S, F>>, body: Bytes) -> Response
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  let request: RegisterRequest = match serde_json::from_slice(&body) {
    Ok(request) => request,
    Err(e) => {
      return (StatusCode::BAD_REQUEST, format!("Invalid register request: {}", e)).into_response()
    }
  };

  info!(version = request.version, "registering version");
  let proxy = state.versions.build(request.version);
  match state.registration.register(proxy).await {
    Ok(worker_state) => Json(VersionInfo {
      version: request.version,
      cache_name: state.versions.cache_name(request.version),
      state: worker_state,
    })
    .into_response(),
    Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
  }
}

async fn status<S, F>(State(state): State<AppState<S, F>>) -> Response
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  let generations = match state.versions.storage().generations() {
    Ok(generations) => generations,
    Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
  };

  Json(StatusResponse {
    registration: state.registration.status().await,
    generations,
  })
  .into_response()
}

fn into_fetch_request(
  origin: &Url,
  method: Method,
  uri: &Uri,
  mut headers: HeaderMap,
  body: Bytes,
) -> Result<FetchRequest> {
  let parsed = if uri.scheme().is_some() {
    Url::parse(&uri.to_string())
  } else {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    origin.join(path)
  };
  let url = parsed.map_err(|e| eyre!("Invalid request URI {}: {}", uri, e))?;

  strip_hop_by_hop(&mut headers);

  Ok(FetchRequest {
    headers,
    body,
    ..FetchRequest::new(method, url)
  })
}

fn into_response(outcome: FetchOutcome) -> Response {
  let FetchOutcome {
    response, source, ..
  } = outcome;

  let mut headers = response.headers;
  strip_hop_by_hop(&mut headers);
  headers.insert(
    HeaderName::from_static(SOURCE_HEADER),
    HeaderValue::from_static(source.as_str()),
  );

  (response.status, headers, response.body).into_response()
}
