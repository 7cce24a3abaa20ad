//! Test doubles shared by the unit tests.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::{
  CacheEntry, CacheLayer, CacheStorage, FreshnessEvaluator, ResourceClass, SqliteStorage,
};
use crate::config::MaxAgeConfig;
use crate::db::Database;
use crate::net::{Fetcher, Request, Response};
use crate::sync::{SyncRemote, SyncTask};

pub const ORIGIN: &str = "http://localhost:8000";
pub const GENERATION: &str = "mindcache-test";

pub fn origin() -> Url {
  Url::parse(ORIGIN).unwrap()
}

pub fn request(path: &str) -> Request {
  Request::new(reqwest::Method::GET, origin().join(path).unwrap())
}

/// Scripted network: known paths answer with their route, unknown paths 404.
#[derive(Default)]
pub struct MockFetcher {
  routes: Mutex<HashMap<String, Response>>,
  offline: AtomicBool,
  calls: AtomicUsize,
}

impl MockFetcher {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn set_route(&self, path: &str, body: &str) {
    self.set_status(path, 200, body);
  }

  pub fn set_status(&self, path: &str, status: u16, body: &str) {
    self.routes.lock().unwrap().insert(
      path.to_string(),
      Response::new(status, Vec::new(), body.as_bytes().to_vec()),
    );
  }

  pub fn go_offline(&self) {
    self.offline.store(true, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

pub trait MockFetcherExt {
  fn with_route(self, path: &str, body: &str) -> Self;
  fn with_status(self, path: &str, status: u16, body: &str) -> Self;
}

impl MockFetcherExt for Arc<MockFetcher> {
  fn with_route(self, path: &str, body: &str) -> Self {
    self.set_route(path, body);
    self
  }

  fn with_status(self, path: &str, status: u16, body: &str) -> Self {
    self.set_status(path, status, body);
    self
  }
}

impl Fetcher for MockFetcher {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
    Box::pin(async move {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("Failed to fetch {}: network unreachable", request.url));
      }
      let response = self
        .routes
        .lock()
        .unwrap()
        .get(request.path())
        .cloned()
        .unwrap_or_else(|| Response::new(404, Vec::new(), b"not found".to_vec()));
      Ok(response)
    })
  }
}

pub fn layer(fetcher: Arc<MockFetcher>) -> CacheLayer<SqliteStorage> {
  let storage = SqliteStorage::new(Database::open_in_memory().unwrap());
  CacheLayer::new(
    Arc::new(storage),
    fetcher,
    FreshnessEvaluator::new(MaxAgeConfig::default()),
    GENERATION.to_string(),
  )
}

/// Storage on a dead disk: every operation fails.
pub struct BrokenStorage;

impl CacheStorage for BrokenStorage {
  fn get(&self, _generation: &str, _identity: &str) -> Result<Option<CacheEntry>> {
    Err(eyre!("disk I/O error"))
  }

  fn put(&self, _entry: &CacheEntry) -> Result<()> {
    Err(eyre!("disk I/O error"))
  }

  fn delete_generation(&self, _generation: &str) -> Result<usize> {
    Err(eyre!("disk I/O error"))
  }

  fn generations(&self) -> Result<Vec<String>> {
    Err(eyre!("disk I/O error"))
  }

  fn entry_counts(&self) -> Result<BTreeMap<String, usize>> {
    Err(eyre!("disk I/O error"))
  }
}

pub fn broken_layer(fetcher: Arc<MockFetcher>) -> CacheLayer<BrokenStorage> {
  CacheLayer::new(
    Arc::new(BrokenStorage),
    fetcher,
    FreshnessEvaluator::new(MaxAgeConfig::default()),
    GENERATION.to_string(),
  )
}

/// Store an entry that is `age` old in the test generation.
pub fn seed(
  layer: &CacheLayer<SqliteStorage>,
  path: &str,
  class: ResourceClass,
  body: &str,
  age: Duration,
) {
  layer
    .storage()
    .put(&CacheEntry {
      identity: request(path).identity(),
      class,
      response: Response::new(200, Vec::new(), body.as_bytes().to_vec()),
      stored_at: Utc::now() - age,
      generation: GENERATION.to_string(),
    })
    .unwrap();
}

/// Remote that fails on scripted call numbers (1-based) and records every call.
#[derive(Default)]
pub struct MockRemote {
  fail_on: Mutex<Vec<usize>>,
  calls: Mutex<Vec<(String, serde_json::Value)>>,
  /// Latency of every send
  delay: Option<std::time::Duration>,
}

impl MockRemote {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn failing_on(calls: &[usize]) -> Arc<Self> {
    let remote = Self::default();
    *remote.fail_on.lock().unwrap() = calls.to_vec();
    Arc::new(remote)
  }

  pub fn slow(delay: std::time::Duration) -> Arc<Self> {
    Arc::new(Self {
      delay: Some(delay),
      ..Self::default()
    })
  }

  pub fn fail_always(&self) {
    *self.fail_on.lock().unwrap() = (1..=1000).collect();
  }

  pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
    self.calls.lock().unwrap().clone()
  }
}

impl SyncRemote for MockRemote {
  fn send<'a>(&'a self, endpoint: &'a str, task: &'a SyncTask) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      if let Some(delay) = self.delay {
        tokio::time::sleep(delay).await;
      }
      let mut calls = self.calls.lock().unwrap();
      calls.push((endpoint.to_string(), task.payload.clone()));
      let call = calls.len();
      if self.fail_on.lock().unwrap().contains(&call) {
        return Err(eyre!("Failed to send to {}: service unavailable", endpoint));
      }
      Ok(())
    })
  }
}
