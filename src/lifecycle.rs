//! Install/activate cycle and cache generation housekeeping.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::cache::{CacheGeneration, CacheLayer, CacheStorage};
use crate::net::Request;
use crate::router::{Classifier, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
  /// Nothing installed yet
  Idle,
  /// Shell cached, waiting to activate
  Installed,
  /// Old generations removed, controlling clients
  Activated,
}

/// What the engine asks of its host after a lifecycle step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleSignal {
  /// Activate immediately instead of waiting for old instances to finish
  SkipWaiting,
  /// Start controlling already-open clients
  ClaimClients,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
  pub generation: String,
  pub cached: Vec<String>,
  pub failed: Vec<String>,
  pub signal: LifecycleSignal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivateReport {
  pub generation: String,
  pub removed: Vec<String>,
  pub signal: LifecycleSignal,
}

/// Owns generation versioning of the cache store.
pub struct LifecycleManager<S: CacheStorage> {
  layer: CacheLayer<S>,
  classifier: Classifier,
  generation: CacheGeneration,
  shell: Vec<String>,
  phase: Mutex<LifecyclePhase>,
}

impl<S: CacheStorage + 'static> LifecycleManager<S> {
  pub fn new(
    layer: CacheLayer<S>,
    classifier: Classifier,
    generation: CacheGeneration,
    shell: Vec<String>,
  ) -> Self {
    Self {
      layer,
      classifier,
      generation,
      shell,
      phase: Mutex::new(LifecyclePhase::Idle),
    }
  }

  pub fn generation(&self) -> &CacheGeneration {
    &self.generation
  }

  pub fn phase(&self) -> Result<LifecyclePhase> {
    self
      .phase
      .lock()
      .map(|p| *p)
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn set_phase(&self, phase: LifecyclePhase) -> Result<()> {
    *self.phase.lock().map_err(|e| eyre!("Lock poisoned: {}", e))? = phase;
    Ok(())
  }

  /// Pre-warm the shell resources into the current generation.
  ///
  /// A shell resource that cannot be fetched is reported but does not fail
  /// the install; it will be cached on first use instead.
  pub async fn install(&self) -> Result<InstallReport> {
    let mut cached = Vec::new();
    let mut failed = Vec::new();

    for url in &self.shell {
      match self.cache_url(url).await {
        Ok(()) => cached.push(url.clone()),
        Err(e) => {
          warn!(%url, "Failed to pre-cache shell resource: {}", e);
          failed.push(url.clone());
        }
      }
    }

    self.set_phase(LifecyclePhase::Installed)?;
    info!(
      generation = %self.generation.tag(),
      cached = cached.len(),
      failed = failed.len(),
      "Installed"
    );

    Ok(InstallReport {
      generation: self.generation.tag(),
      cached,
      failed,
      signal: LifecycleSignal::SkipWaiting,
    })
  }

  /// Delete every generation except the current one.
  pub async fn activate(&self) -> Result<ActivateReport> {
    let current = self.generation.tag();
    let mut removed = Vec::new();

    for generation in self.layer.storage().generations()? {
      if generation != current {
        let count = self.layer.storage().delete_generation(&generation)?;
        info!(%generation, entries = count, "Deleted old cache generation");
        removed.push(generation);
      }
    }

    self.set_phase(LifecyclePhase::Activated)?;
    info!(generation = %current, "Activated");

    Ok(ActivateReport {
      generation: current,
      removed,
      signal: LifecycleSignal::ClaimClients,
    })
  }

  /// Force activation of an installed generation. No-op otherwise.
  pub async fn skip_waiting(&self) -> Result<Option<ActivateReport>> {
    match self.phase()? {
      LifecyclePhase::Installed => self.activate().await.map(Some),
      _ => Ok(None),
    }
  }

  /// Fetch one URL into the current generation under its own class.
  pub async fn cache_url(&self, url: &str) -> Result<()> {
    let request = Request::parse("GET", url, self.classifier.origin())?;
    match self.classifier.classify(&request) {
      Route::Intercept(class) => self.layer.prefetch(&request, class).await,
      Route::Bypass => Err(eyre!("Refusing to cache {}: not eligible for caching", url)),
    }
  }
}
