use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// An outbound read (or pass-through) request intercepted by the engine
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self { method, url }
  }

  /// Parse a method and URL, resolving relative URLs against `base`.
  pub fn parse(method: &str, url: &str, base: &Url) -> Result<Self> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid request method '{}': {}", method, e))?;
    let url = base
      .join(url)
      .map_err(|e| eyre!("Invalid request URL '{}': {}", url, e))?;
    Ok(Self::new(method, url))
  }

  /// Request identity used as the cache key: method plus normalized URL.
  ///
  /// Fragments never reach the server, so they are dropped.
  pub fn identity(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    format!("{} {}", self.method, url)
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }
}

/// A response as seen by the engine, either from the network or from the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
    }
  }

  /// Only 2xx responses are worth storing
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_identity_drops_fragment() {
    let base = Url::parse("https://app.example").unwrap();
    let request = Request::parse("get", "/crisis/#hotlines", &base).unwrap();
    assert_eq!(request.identity(), "GET https://app.example/crisis/");
  }

  #[test]
  fn test_identity_keeps_query() {
    let base = Url::parse("https://app.example").unwrap();
    let request = Request::parse("GET", "/api/mood/?days=7", &base).unwrap();
    assert_eq!(request.identity(), "GET https://app.example/api/mood/?days=7");
  }

  #[test]
  fn test_same_identity_as_parsed_get() {
    let built = crate::testing::request("/journal/");
    let parsed = Request::parse("GET", "/journal/", &crate::testing::origin()).unwrap();
    assert_eq!(built.method, Method::GET);
    assert_eq!(built.identity(), parsed.identity());
  }

  #[test]
  fn test_only_2xx_is_ok() {
    assert!(Response::new(200, Vec::new(), Vec::new()).is_ok());
    assert!(Response::new(204, Vec::new(), Vec::new()).is_ok());
    assert!(!Response::new(304, Vec::new(), Vec::new()).is_ok());
    assert!(!Response::new(503, Vec::new(), Vec::new()).is_ok());
  }
}
