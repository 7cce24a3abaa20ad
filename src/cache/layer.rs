//! Cache layer that orchestrates caching strategies with network fetching.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::net::{Fetcher, Request, Response};

use super::freshness::FreshnessEvaluator;
use super::storage::CacheStorage;
use super::traits::{CacheEntry, ResourceClass, Served};

/// Cache layer that manages caching strategies and network fetching.
///
/// All reads and writes go to the current generation only.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  fetcher: Arc<dyn Fetcher>,
  freshness: FreshnessEvaluator,
  /// Tag of the active generation
  generation: String,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  pub fn new(
    storage: Arc<S>,
    fetcher: Arc<dyn Fetcher>,
    freshness: FreshnessEvaluator,
    generation: String,
  ) -> Self {
    Self {
      storage,
      fetcher,
      freshness,
      generation,
    }
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn freshness(&self) -> &FreshnessEvaluator {
    &self.freshness
  }

  /// Look up a request in the current generation.
  ///
  /// A failing read is treated as a miss so that a broken store never
  /// fails the request.
  pub fn lookup(&self, request: &Request) -> Option<CacheEntry> {
    match self.storage.get(&self.generation, &request.identity()) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(url = %request.url, "Cache read failed, treating as miss: {}", e);
        None
      }
    }
  }

  /// Store a network response. Failures are logged and swallowed.
  fn store(&self, request: &Request, class: ResourceClass, response: &Response) {
    if !response.is_ok() {
      return;
    }

    let entry = CacheEntry {
      identity: request.identity(),
      class,
      response: response.clone(),
      stored_at: Utc::now(),
      generation: self.generation.clone(),
    };

    if let Err(e) = self.storage.put(&entry) {
      warn!(url = %request.url, %class, "Cache write failed: {}", e);
    }
  }

  /// Fetch from network and store a successful response.
  pub async fn fetch_and_store(&self, request: &Request, class: ResourceClass) -> Result<Response> {
    let response = self.fetcher.fetch(request).await?;
    self.store(request, class, &response);
    Ok(response)
  }

  /// Fetch eagerly into the cache, failing on non-2xx responses.
  pub async fn prefetch(&self, request: &Request, class: ResourceClass) -> Result<()> {
    let response = self.fetch_and_store(request, class).await?;
    if !response.is_ok() {
      return Err(eyre!(
        "Failed to cache {}: server returned {}",
        request.url,
        response.status
      ));
    }
    Ok(())
  }

  /// Refresh an entry in the background. The caller never sees the outcome.
  pub fn spawn_refresh(&self, request: &Request, class: ResourceClass) -> JoinHandle<()> {
    let layer = self.clone();
    let request = request.clone();
    tokio::spawn(async move {
      match layer.fetch_and_store(&request, class).await {
        Ok(_) => debug!(url = %request.url, %class, "Background refresh complete"),
        Err(e) => debug!(url = %request.url, %class, "Background refresh failed: {}", e),
      }
    })
  }

  /// Cache-first strategy.
  ///
  /// 1. Fresh cache entry - return immediately, no network
  /// 2. Stale or missing - fetch from network, store and return
  /// 3. Network failure - return the stale entry (offline mode), else fail
  pub async fn cache_first(&self, request: &Request, class: ResourceClass) -> Result<Served> {
    let cached = self.lookup(request);

    if let Some(entry) = &cached {
      if !self.freshness.is_stale(entry) {
        return Ok(Served::from_cache(entry.clone(), false));
      }
    }

    match self.fetch_and_store(request, class).await {
      Ok(response) => Ok(Served::from_network(response)),
      Err(e) => match cached {
        Some(entry) => {
          debug!(url = %request.url, "Network failed, serving stale entry: {}", e);
          Ok(Served::offline(entry))
        }
        None => Err(e),
      },
    }
  }

  /// Network-first strategy.
  ///
  /// Falls back to the cache only when the network is unreachable and the
  /// cached entry is still within its max-age.
  pub async fn network_first(&self, request: &Request, class: ResourceClass) -> Result<Served> {
    match self.fetch_and_store(request, class).await {
      Ok(response) => Ok(Served::from_network(response)),
      Err(e) => match self.lookup(request) {
        Some(entry) if !self.freshness.is_stale(&entry) => {
          debug!(url = %request.url, "Network failed, serving cached entry: {}", e);
          Ok(Served::offline(entry))
        }
        _ => Err(e),
      },
    }
  }

  /// Stale-while-revalidate strategy.
  ///
  /// Any cached entry is returned at once while a background refresh updates
  /// the store for next time. Without an entry the caller waits on the network.
  pub async fn stale_while_revalidate(
    &self,
    request: &Request,
    class: ResourceClass,
  ) -> Result<Served> {
    match self.lookup(request) {
      Some(entry) => {
        let is_stale = self.freshness.is_stale(&entry);
        self.spawn_refresh(request, class);
        Ok(Served::from_cache(entry, is_stale))
      }
      None => {
        let response = self.fetch_and_store(request, class).await?;
        Ok(Served::from_network(response))
      }
    }
  }

  /// Requests the engine does not intercept go straight to the network.
  pub async fn passthrough(&self, request: &Request) -> Result<Served> {
    let response = self.fetcher.fetch(request).await?;
    Ok(Served::passthrough(response))
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      fetcher: Arc::clone(&self.fetcher),
      freshness: self.freshness.clone(),
      generation: self.generation.clone(),
    }
  }
}
