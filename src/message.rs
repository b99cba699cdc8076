//! Messages posted by controlled pages.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;

/// A structured message from a page, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Activate the waiting version now instead of waiting for pages to close
  SkipWaiting,
  /// Any other message type; ignored
  #[serde(other)]
  Unknown,
}

impl ClientMessage {
  pub fn parse(raw: &[u8]) -> Result<Self> {
    serde_json::from_slice(raw).map_err(|e| eyre!("Invalid client message: {}", e))
  }
}
