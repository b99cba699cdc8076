//! Network access used for cache misses and pass-through requests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tracing::debug;

use crate::http::{strip_hop_by_hop, FetchRequest, FetchResponse};

/// Something that can send a request over the network.
///
/// An `Err` means the request never produced a response (offline, timeout,
/// DNS). Error statuses are returned as `Ok` responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

/// HTTP client wrapper
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    // Redirects are handed back to the page untouched
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .redirect(reqwest::redirect::Policy::none())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    let mut headers = request.headers.clone();
    strip_hop_by_hop(&mut headers);

    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .headers(headers)
      .body(request.body.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {} {}: {}", request.method, request.url, e))?;

    let status = response.status();
    let mut headers = response.headers().clone();
    strip_hop_by_hop(&mut headers);

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    debug!(url = %request.url, %status, bytes = body.len(), "network response");

    Ok(FetchResponse {
      status,
      headers,
      body,
    })
  }
}
