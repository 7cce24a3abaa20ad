//! Core types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::net::Response;

/// Static classification of a read request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceClass {
  StaticAsset,
  ApiData,
  Image,
  HtmlPage,
  /// Life-safety content (crisis support)
  Critical,
}

impl ResourceClass {
  pub const ALL: [ResourceClass; 5] = [
    ResourceClass::StaticAsset,
    ResourceClass::ApiData,
    ResourceClass::Image,
    ResourceClass::HtmlPage,
    ResourceClass::Critical,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::StaticAsset => "static-asset",
      Self::ApiData => "api-data",
      Self::Image => "image",
      Self::HtmlPage => "html-page",
      Self::Critical => "critical",
    }
  }

  /// The strategy serving this class. Fixed, never chosen at call time.
  pub fn strategy(self) -> Strategy {
    match self {
      Self::StaticAsset | Self::Image => Strategy::CacheFirst,
      Self::ApiData => Strategy::NetworkFirst,
      Self::HtmlPage => Strategy::StaleWhileRevalidate,
      Self::Critical => Strategy::Critical,
    }
  }
}

impl fmt::Display for ResourceClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResourceClass {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|class| class.as_str() == s)
      .ok_or_else(|| eyre!("Unknown resource class '{}'", s))
  }
}

/// How cache and network are combined for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
  Critical,
}

/// A versioned namespace of cache entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGeneration {
  pub name: String,
  pub version: String,
}

impl CacheGeneration {
  pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      version: version.into(),
    }
  }

  /// Storage tag, e.g. "mindcache-v3"
  pub fn tag(&self) -> String {
    format!("{}-{}", self.name, self.version)
  }
}

/// A stored response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  /// Request identity (method + normalized URL)
  pub identity: String,
  pub class: ResourceClass,
  pub response: Response,
  pub stored_at: DateTime<Utc>,
  /// Tag of the generation this entry belongs to
  pub generation: String,
}

/// A response handed back to the caller, with metadata about its source.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// When the data was cached (if from cache)
  pub stored_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      stored_at: None,
    }
  }

  pub fn from_cache(entry: CacheEntry, is_stale: bool) -> Self {
    Self {
      response: entry.response,
      source: if is_stale {
        ResponseSource::CacheStale
      } else {
        ResponseSource::CacheFresh
      },
      stored_at: Some(entry.stored_at),
    }
  }

  /// Network unreachable, serving what the cache had
  pub fn offline(entry: CacheEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::Offline,
      stored_at: Some(entry.stored_at),
    }
  }

  pub fn fallback(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Fallback,
      stored_at: None,
    }
  }

  pub fn passthrough(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Passthrough,
      stored_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache past its max-age, served while a refresh runs
  CacheStale,
  /// Network unavailable, serving cached data
  Offline,
  /// Synthesized offline document for critical resources
  Fallback,
  /// Not intercepted; went straight to the network
  Passthrough,
}
