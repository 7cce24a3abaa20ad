//! Control channel messages from the application to the engine.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
  /// Activate a pending generation now
  SkipWaiting,
  /// Delete every entry of a generation (the current one when unnamed)
  ClearCache { generation: Option<String> },
  /// Fetch and store these URLs eagerly
  CacheUrls { urls: Vec<String> },
  GetVersion,
  CacheStatus,
  /// Anything else; ignored
  Unknown(String),
}

#[derive(Deserialize)]
struct RawMessage {
  #[serde(rename = "type")]
  kind: String,
  #[serde(default)]
  payload: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UrlList {
  Bare(Vec<String>),
  Wrapped { urls: Vec<String> },
}

impl ControlMessage {
  /// Parse a `{ "type": ..., "payload": ... }` message.
  pub fn parse(message: &Value) -> Result<Self> {
    let raw: RawMessage = serde_json::from_value(message.clone())
      .map_err(|e| eyre!("Invalid control message: {}", e))?;

    let parsed = match raw.kind.as_str() {
      "SKIP_WAITING" => Self::SkipWaiting,
      "CLEAR_CACHE" => Self::ClearCache {
        generation: raw
          .payload
          .get("cacheName")
          .or_else(|| raw.payload.get("generation"))
          .and_then(Value::as_str)
          .map(String::from),
      },
      "CACHE_URLS" => {
        let urls: UrlList = serde_json::from_value(raw.payload)
          .map_err(|e| eyre!("Invalid CACHE_URLS payload: {}", e))?;
        let urls = match urls {
          UrlList::Bare(urls) | UrlList::Wrapped { urls } => urls,
        };
        Self::CacheUrls { urls }
      }
      "GET_VERSION" => Self::GetVersion,
      "CACHE_STATUS" => Self::CacheStatus,
      _ => Self::Unknown(raw.kind),
    };

    Ok(parsed)
  }
}
