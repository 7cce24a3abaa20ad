//! Request classification and strategy dispatch.

use color_eyre::Result;
use reqwest::Method;
use tracing::debug;
use url::Url;

use crate::cache::{CacheLayer, CacheStorage, ResourceClass, Served, Strategy};
use crate::config::RoutingConfig;
use crate::critical::CriticalResourceGuard;
use crate::net::Request;

/// What to do with an outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not eligible for caching: cross-origin, non-GET, or an excluded prefix
  Bypass,
  Intercept(ResourceClass),
}

/// Pure classification of requests into resource classes.
#[derive(Debug, Clone)]
pub struct Classifier {
  origin: Url,
  routing: RoutingConfig,
}

impl Classifier {
  pub fn new(origin: Url, routing: RoutingConfig) -> Self {
    Self { origin, routing }
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  /// Classify a request. Depends on nothing but the request and the config.
  pub fn classify(&self, request: &Request) -> Route {
    if request.method != Method::GET || request.url.origin() != self.origin.origin() {
      return Route::Bypass;
    }

    let path = request.path();
    if has_prefix(&self.routing.excluded_prefixes, path) {
      return Route::Bypass;
    }

    Route::Intercept(self.classify_path(path))
  }

  fn classify_path(&self, path: &str) -> ResourceClass {
    // Critical content overrides every other policy
    if has_prefix(&self.routing.critical_prefixes, path) {
      return ResourceClass::Critical;
    }
    if has_prefix(&self.routing.static_prefixes, path) {
      return ResourceClass::StaticAsset;
    }
    if self.is_image(path) {
      return ResourceClass::Image;
    }
    if has_prefix(&self.routing.api_prefixes, path) {
      return ResourceClass::ApiData;
    }
    ResourceClass::HtmlPage
  }

  fn is_image(&self, path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.') {
      Some((_, ext)) => {
        let ext = ext.to_ascii_lowercase();
        self.routing.image_extensions.iter().any(|e| *e == ext)
      }
      None => false,
    }
  }
}

fn has_prefix(prefixes: &[String], path: &str) -> bool {
  prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

/// Intercepts reads and dispatches them to the strategy of their class.
pub struct StrategyRouter<S: CacheStorage> {
  classifier: Classifier,
  layer: CacheLayer<S>,
  critical: CriticalResourceGuard<S>,
}

impl<S: CacheStorage + 'static> StrategyRouter<S> {
  pub fn new(classifier: Classifier, layer: CacheLayer<S>) -> Self {
    let critical = CriticalResourceGuard::new(layer.clone());
    Self {
      classifier,
      layer,
      critical,
    }
  }

  pub fn layer(&self) -> &CacheLayer<S> {
    &self.layer
  }

  /// Serve a request. Errors mean the network was unreachable and no usable
  /// cached copy existed; critical resources never error.
  pub async fn route(&self, request: &Request) -> Result<Served> {
    let class = match self.classifier.classify(request) {
      Route::Bypass => {
        debug!(url = %request.url, method = %request.method, "Bypassing cache");
        return self.layer.passthrough(request).await;
      }
      Route::Intercept(class) => class,
    };

    debug!(url = %request.url, %class, "Routing request");
    match class.strategy() {
      Strategy::CacheFirst => self.layer.cache_first(request, class).await,
      Strategy::NetworkFirst => self.layer.network_first(request, class).await,
      Strategy::StaleWhileRevalidate => self.layer.stale_while_revalidate(request, class).await,
      Strategy::Critical => Ok(self.critical.serve(request).await),
    }
  }
}
