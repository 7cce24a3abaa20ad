//! The engine instance tying every component together.

use color_eyre::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{
  CacheGeneration, CacheLayer, CacheStorage, FreshnessEvaluator, Served, SqliteStorage,
};
use crate::config::Config;
use crate::control::ControlMessage;
use crate::db::Database;
use crate::lifecycle::{ActivateReport, InstallReport, LifecycleManager, LifecyclePhase};
use crate::net::{Fetcher, HttpFetcher, Request};
use crate::notify::{ClientWindow, NotificationIntent, NotificationRouter, PushPayload, WindowCommand};
use crate::router::{Classifier, StrategyRouter};
use crate::sync::{DrainReport, ForwardOutcome, HttpSyncRemote, SyncQueue, SyncRemote, SyncTag, SyncTask};

/// Reply to a control message
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ControlReply {
  Activated { report: ActivateReport },
  /// SKIP_WAITING with nothing installed and waiting
  NothingWaiting,
  Cleared { generation: String, entries: usize },
  Cached { cached: Vec<String>, failed: Vec<String> },
  Version { generation: String },
  Status { status: CacheStatus },
  Ignored { kind: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
  pub generation: String,
  pub phase: LifecyclePhase,
  /// Entry count per stored generation
  pub entries: BTreeMap<String, usize>,
  pub pending_sync: BTreeMap<SyncTag, usize>,
  /// Tasks that ran out of attempts and wait for inspection
  pub abandoned_sync: BTreeMap<SyncTag, usize>,
}

/// One offline cache and sync engine.
///
/// Everything that would otherwise be global state lives here, so tests
/// can build isolated instances.
pub struct CacheEngine {
  router: StrategyRouter<SqliteStorage>,
  lifecycle: LifecycleManager<SqliteStorage>,
  sync: SyncQueue,
  notifications: NotificationRouter,
}

impl CacheEngine {
  /// Build an engine talking to the real network.
  pub fn open(config: &Config, db: Database) -> Result<Self> {
    let fetcher = HttpFetcher::new(config)?;
    let remote = HttpSyncRemote::new(&fetcher, config.origin()?);
    Self::new(config, db, Arc::new(fetcher), Arc::new(remote))
  }

  pub fn new(
    config: &Config,
    db: Database,
    fetcher: Arc<dyn Fetcher>,
    remote: Arc<dyn SyncRemote>,
  ) -> Result<Self> {
    let origin: Url = config.origin()?;
    let generation = CacheGeneration::new(&config.generation.name, &config.generation.version);

    let layer = CacheLayer::new(
      Arc::new(SqliteStorage::new(db.clone())),
      fetcher,
      FreshnessEvaluator::new(config.max_age.clone()),
      generation.tag(),
    );
    let classifier = Classifier::new(origin.clone(), config.routing.clone());

    Ok(Self {
      router: StrategyRouter::new(classifier.clone(), layer.clone()),
      lifecycle: LifecycleManager::new(layer, classifier, generation, config.shell.clone()),
      sync: SyncQueue::new(db, remote, config.sync.clone()),
      notifications: NotificationRouter::new(origin, config.notifications.clone()),
    })
  }

  pub async fn install(&self) -> Result<InstallReport> {
    self.lifecycle.install().await
  }

  pub async fn activate(&self) -> Result<ActivateReport> {
    self.lifecycle.activate().await
  }

  /// Serve an intercepted read.
  pub async fn fetch(&self, request: &Request) -> Result<Served> {
    self.router.route(request).await
  }

  /// Handle a control channel message.
  pub async fn message(&self, message: &Value) -> Result<ControlReply> {
    let reply = match ControlMessage::parse(message)? {
      ControlMessage::SkipWaiting => match self.lifecycle.skip_waiting().await? {
        Some(report) => ControlReply::Activated { report },
        None => ControlReply::NothingWaiting,
      },
      ControlMessage::ClearCache { generation } => {
        let generation = generation.unwrap_or_else(|| self.lifecycle.generation().tag());
        let entries = self
          .router
          .layer()
          .storage()
          .delete_generation(&generation)?;
        info!(%generation, entries, "Cleared cache");
        ControlReply::Cleared {
          generation,
          entries,
        }
      }
      ControlMessage::CacheUrls { urls } => {
        let mut cached = Vec::new();
        let mut failed = Vec::new();
        for url in urls {
          match self.lifecycle.cache_url(&url).await {
            Ok(()) => cached.push(url),
            Err(e) => {
              warn!(%url, "Failed to cache URL: {}", e);
              failed.push(url);
            }
          }
        }
        ControlReply::Cached { cached, failed }
      }
      ControlMessage::GetVersion => ControlReply::Version {
        generation: self.lifecycle.generation().tag(),
      },
      ControlMessage::CacheStatus => ControlReply::Status {
        status: self.status()?,
      },
      ControlMessage::Unknown(kind) => {
        warn!(%kind, "Ignoring unknown control message");
        ControlReply::Ignored { kind }
      }
    };

    Ok(reply)
  }

  /// Turn a raw push into a notification; malformed pushes are dropped.
  pub fn push(&self, raw: &[u8]) -> Option<NotificationIntent> {
    match PushPayload::parse(raw) {
      Ok(payload) => Some(self.notifications.present(payload)),
      Err(e) => {
        warn!("Dropping push: {}", e);
        None
      }
    }
  }

  /// Resolve a notification activation into a window command.
  pub fn notification_click(
    &self,
    intent: &NotificationIntent,
    action: Option<&str>,
    windows: &[ClientWindow],
  ) -> WindowCommand {
    let target = self.notifications.resolve(intent, action);
    self.notifications.window_plan(&target, windows)
  }

  /// Background sync signal for one tag.
  pub async fn sync(&self, tag: SyncTag) -> Result<DrainReport> {
    self.sync.drain_tag(tag).await
  }

  /// Connectivity restored: replay everything.
  pub async fn online(&self) -> Result<DrainReport> {
    self.sync.drain().await
  }

  /// Queue a write for the next sync.
  pub fn enqueue(&self, tag: SyncTag, payload: Value) -> Result<SyncTask> {
    self.sync.enqueue(tag, payload)
  }

  /// Send a write now, deferring it to background sync on failure.
  pub async fn write(&self, tag: SyncTag, payload: Value) -> Result<ForwardOutcome> {
    self.sync.forward(tag, payload).await
  }

  pub fn status(&self) -> Result<CacheStatus> {
    Ok(CacheStatus {
      generation: self.lifecycle.generation().tag(),
      phase: self.lifecycle.phase()?,
      entries: self.router.layer().storage().entry_counts()?,
      pending_sync: self.sync.pending_counts()?,
      abandoned_sync: self.sync.abandoned_counts()?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::ResponseSource;
  use crate::testing::{request, MockFetcher, MockFetcherExt, MockRemote};
  use serde_json::json;

  fn engine(fetcher: Arc<MockFetcher>, remote: Arc<MockRemote>) -> CacheEngine {
    let config = Config::from_yaml(
      r#"
generation:
  name: mindcache
  version: v2
"#,
    )
    .unwrap();
    CacheEngine::new(&config, Database::open_in_memory().unwrap(), fetcher, remote).unwrap()
  }

  fn shell_fetcher() -> Arc<MockFetcher> {
    MockFetcher::new()
      .with_route("/", "home")
      .with_route("/static/favicon.ico", "icon")
      .with_route("/static/manifest.json", "{}")
  }

  #[tokio::test]
  async fn test_install_activate_then_serve_offline() {
    let fetcher = shell_fetcher().with_route("/crisis/", "crisis lines");
    let engine = engine(fetcher.clone(), MockRemote::new());

    engine.install().await.unwrap();
    engine.activate().await.unwrap();
    engine
      .message(&json!({ "type": "CACHE_URLS", "payload": ["/crisis/"] }))
      .await
      .unwrap();

    fetcher.go_offline();
    let home = engine.fetch(&request("/")).await.unwrap();
    assert_eq!(home.response.text(), "home");
    let crisis = engine.fetch(&request("/crisis/")).await.unwrap();
    assert_eq!(crisis.response.text(), "crisis lines");
    let plan = engine.fetch(&request("/safety-plan/")).await.unwrap();
    assert_eq!(plan.source, ResponseSource::Fallback);
  }

  #[tokio::test]
  async fn test_clear_cache_defaults_to_current_generation() {
    let engine = engine(shell_fetcher(), MockRemote::new());
    engine.install().await.unwrap();

    let reply = engine
      .message(&json!({ "type": "CLEAR_CACHE" }))
      .await
      .unwrap();
    match reply {
      ControlReply::Cleared {
        generation,
        entries,
      } => {
        assert_eq!(generation, "mindcache-v2");
        assert_eq!(entries, 3);
      }
      other => panic!("unexpected reply: {:?}", other),
    }
    assert!(engine.status().unwrap().entries.is_empty());
  }

  #[tokio::test]
  async fn test_skip_waiting_and_version() {
    let engine = engine(shell_fetcher(), MockRemote::new());

    let reply = engine.message(&json!({ "type": "SKIP_WAITING" })).await.unwrap();
    assert!(matches!(reply, ControlReply::NothingWaiting));

    engine.install().await.unwrap();
    let reply = engine.message(&json!({ "type": "SKIP_WAITING" })).await.unwrap();
    assert!(matches!(reply, ControlReply::Activated { .. }));

    let reply = engine.message(&json!({ "type": "GET_VERSION" })).await.unwrap();
    assert!(matches!(reply, ControlReply::Version { generation } if generation == "mindcache-v2"));
  }

  #[tokio::test]
  async fn test_unknown_message_is_ignored() {
    let engine = engine(MockFetcher::new(), MockRemote::new());
    let reply = engine.message(&json!({ "type": "REBOOT" })).await.unwrap();
    assert!(matches!(reply, ControlReply::Ignored { kind } if kind == "REBOOT"));
  }

  #[tokio::test]
  async fn test_offline_writes_replay_on_reconnect() {
    let remote = MockRemote::failing_on(&[1]);
    let engine = engine(MockFetcher::new(), remote.clone());

    let outcome = engine
      .write(SyncTag::JournalEntries, json!({ "text": "rough day" }))
      .await
      .unwrap();
    assert!(matches!(outcome, ForwardOutcome::Queued { .. }));
    assert_eq!(
      engine.status().unwrap().pending_sync.get(&SyncTag::JournalEntries),
      Some(&1)
    );

    let report = engine.online().await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert!(engine.status().unwrap().pending_sync.is_empty());
    assert_eq!(remote.calls().len(), 2);
  }

  #[tokio::test]
  async fn test_push_and_click() {
    let engine = engine(MockFetcher::new(), MockRemote::new());
    assert!(engine.push(b"{not json").is_none());

    let intent = engine
      .push(br#"{"type":"crisis","title":"Check in","body":"..."}"#)
      .unwrap();
    let command = engine.notification_click(&intent, Some("emergency"), &[]);
    assert_eq!(
      command,
      WindowCommand::Open {
        url: Url::parse("http://localhost:8000/crisis/").unwrap()
      }
    );
  }
}
