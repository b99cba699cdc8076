//! Scripted network used by unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::http::{FetchRequest, FetchResponse};
use crate::network::Fetcher;

/// In-memory network that answers from a table of canned responses.
///
/// Unknown URLs fail like an unreachable host. `go_offline` makes every
/// request fail. A gated URL holds its answer until the gate is notified.
#[derive(Default)]
pub struct ScriptedFetcher {
  responses: Mutex<HashMap<String, FetchResponse>>,
  gates: Mutex<HashMap<String, Arc<Notify>>>,
  seen: Mutex<Vec<FetchRequest>>,
  offline: AtomicBool,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, status: StatusCode, body: &str) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url.to_string(), FetchResponse::new(status, body.to_string()));
  }

  /// Hold requests for `url` until the returned gate is notified.
  pub fn gate(&self, url: &str) -> Arc<Notify> {
    let gate = Arc::new(Notify::new());
    self
      .gates
      .lock()
      .unwrap()
      .insert(url.to_string(), Arc::clone(&gate));
    gate
  }

  pub fn go_offline(&self) {
    self.offline.store(true, Ordering::SeqCst);
  }

  pub fn go_online(&self) {
    self.offline.store(false, Ordering::SeqCst);
  }

  /// Number of requests that reached the network.
  pub fn calls(&self) -> usize {
    self.seen.lock().unwrap().len()
  }

  /// Every request that reached the network, in order.
  pub fn seen(&self) -> Vec<FetchRequest> {
    self.seen.lock().unwrap().clone()
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    self.seen.lock().unwrap().push(request.clone());

    let gate = self.gates.lock().unwrap().get(request.url.as_str()).cloned();
    if let Some(gate) = gate {
      gate.notified().await;
    }

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable: {}", request.url));
    }

    self
      .responses
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned()
      .ok_or_else(|| eyre!("connection refused: {}", request.url))
  }
}
