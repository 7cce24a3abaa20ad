//! Availability guard for life-safety resources.

use tracing::{info, warn};

use crate::cache::{CacheLayer, CacheStorage, ResourceClass, Served};
use crate::net::{Request, Response};

/// Header marking the synthesized offline document
pub const FALLBACK_HEADER: &str = "x-mindcache-fallback";

/// Serves crisis content under every failure mode.
///
/// Cached copies are served regardless of age while a background refresh runs.
/// The network is awaited only on a miss, and if that fails too the caller
/// gets the offline document. This path never returns an error.
pub struct CriticalResourceGuard<S: CacheStorage> {
  layer: CacheLayer<S>,
}

impl<S: CacheStorage + 'static> CriticalResourceGuard<S> {
  pub fn new(layer: CacheLayer<S>) -> Self {
    Self { layer }
  }

  pub async fn serve(&self, request: &Request) -> Served {
    if let Some(entry) = self.layer.lookup(request) {
      let is_stale = self.layer.freshness().is_stale(&entry);
      self.layer.spawn_refresh(request, ResourceClass::Critical);
      return Served::from_cache(entry, is_stale);
    }

    match self
      .layer
      .fetch_and_store(request, ResourceClass::Critical)
      .await
    {
      Ok(response) if response.is_ok() => Served::from_network(response),
      Ok(response) => {
        warn!(url = %request.url, status = response.status, "Critical resource unavailable, serving offline document");
        Served::fallback(offline_document())
      }
      Err(e) => {
        info!(url = %request.url, "Critical resource offline, serving offline document: {}", e);
        Served::fallback(offline_document())
      }
    }
  }
}

/// Self-contained crisis page served when both cache and network fail.
pub fn offline_document() -> Response {
  Response::new(
    200,
    vec![
      (
        "content-type".to_string(),
        "text/html; charset=utf-8".to_string(),
      ),
      ("cache-control".to_string(), "no-store".to_string()),
      (FALLBACK_HEADER.to_string(), "offline".to_string()),
    ],
    OFFLINE_HTML.as_bytes().to_vec(),
  )
}

const OFFLINE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>You're offline - help is still available</title>
<style>
  body { font-family: system-ui, sans-serif; max-width: 36rem; margin: 2rem auto; padding: 0 1rem; color: #1f2933; line-height: 1.5; }
  .urgent { background: #fde8e8; border-left: 4px solid #c81e1e; padding: 1rem; border-radius: 4px; }
  .urgent a { color: #9b1c1c; font-weight: bold; }
  button { font-size: 1rem; padding: 0.6rem 1.2rem; border: 0; border-radius: 4px; background: #3f83f8; color: #fff; cursor: pointer; }
</style>
</head>
<body>
<h1>You're offline</h1>
<p>We couldn't load this page, but support is still available right now.</p>
<div class="urgent">
  <h2>If you are in crisis</h2>
  <p>Call or text <a href="tel:988">988</a> (Suicide &amp; Crisis Lifeline), available 24/7.</p>
  <p>Text <strong>HOME</strong> to <a href="sms:741741">741741</a> to reach the Crisis Text Line.</p>
  <p>If you are in immediate danger, call <a href="tel:911">911</a>.</p>
</div>
<h2>While you wait</h2>
<ul>
  <li>Breathe slowly: in for 4, hold for 4, out for 6.</li>
  <li>Name five things you can see and four you can hear.</li>
  <li>Reach out to someone you trust.</li>
  <li>Drink some water and find a comfortable place to sit.</li>
</ul>
<button type="button" onclick="window.location.reload()">Try again</button>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::ResponseSource;
  use crate::testing::{broken_layer, layer, request, seed, MockFetcher, MockFetcherExt};
  use chrono::Duration;

  #[tokio::test]
  async fn test_offline_miss_returns_fallback_document() {
    let fetcher = MockFetcher::new();
    fetcher.go_offline();
    let guard = CriticalResourceGuard::new(layer(fetcher));

    let served = guard.serve(&request("/crisis/")).await;

    assert_eq!(served.source, ResponseSource::Fallback);
    assert!(served
      .response
      .headers
      .contains(&(FALLBACK_HEADER.to_string(), "offline".to_string())));
    let body = served.response.text();
    assert!(body.contains("988"));
    assert!(body.contains("window.location.reload()"));
  }

  #[tokio::test]
  async fn test_stale_cache_wins_over_network() {
    let fetcher = MockFetcher::new().with_route("/crisis/", "fresh");
    let layer = layer(fetcher.clone());
    seed(&layer, "/crisis/", ResourceClass::Critical, "old", Duration::days(365));
    let guard = CriticalResourceGuard::new(layer.clone());

    let served = guard.serve(&request("/crisis/")).await;
    assert_eq!(served.source, ResponseSource::CacheStale);
    assert_eq!(served.response.text(), "old");

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(layer.lookup(&request("/crisis/")).unwrap().response.text(), "fresh");
  }

  #[tokio::test]
  async fn test_miss_fetches_and_stores() {
    let fetcher = MockFetcher::new().with_route("/safety-plan/", "plan");
    let layer = layer(fetcher);
    let guard = CriticalResourceGuard::new(layer.clone());

    let served = guard.serve(&request("/safety-plan/")).await;
    assert_eq!(served.source, ResponseSource::Network);
    assert!(layer.lookup(&request("/safety-plan/")).is_some());
  }

  #[tokio::test]
  async fn test_server_error_on_miss_returns_fallback() {
    let fetcher = MockFetcher::new().with_status("/crisis/", 503, "down");
    let guard = CriticalResourceGuard::new(layer(fetcher));

    let served = guard.serve(&request("/crisis/")).await;
    assert_eq!(served.source, ResponseSource::Fallback);
  }

  #[tokio::test]
  async fn test_broken_store_serves_network_then_fallback() {
    let fetcher = MockFetcher::new().with_route("/crisis/", "hotlines");
    let guard = CriticalResourceGuard::new(broken_layer(fetcher.clone()));

    let served = guard.serve(&request("/crisis/")).await;
    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.text(), "hotlines");

    fetcher.go_offline();
    let served = guard.serve(&request("/crisis/")).await;
    assert_eq!(served.source, ResponseSource::Fallback);
  }

  #[test]
  fn test_offline_document_is_self_contained() {
    let body = offline_document().text();
    assert!(!body.contains("src="));
    assert!(!body.contains("<link"));
    assert!(body.contains("741741"));
  }
}
