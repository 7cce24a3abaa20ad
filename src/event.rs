//! Line-delimited JSON protocol between the host and the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::cache::ResponseSource;
use crate::engine::ControlReply;
use crate::lifecycle::{ActivateReport, InstallReport};
use crate::notify::{ClientWindow, NotificationIntent, WindowCommand};
use crate::sync::{DrainReport, ForwardOutcome, SyncTag, SyncTask};

/// Events delivered by the host, one per input line
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
  Install,
  Activate,
  /// Outbound read to intercept
  Fetch {
    #[serde(default = "default_method")]
    method: String,
    url: String,
  },
  /// Control channel message
  Message { data: Value },
  /// Raw push payload: a JSON string holding the body, or the object itself
  Push { data: Value },
  NotificationClick {
    notification: NotificationIntent,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    windows: Vec<ClientWindow>,
  },
  /// Background sync signal
  Sync { tag: String },
  /// Connectivity restored
  Online,
  /// User write to forward now or queue
  Write { tag: SyncTag, payload: Value },
  /// User write to queue without trying the network
  Enqueue { tag: SyncTag, payload: Value },
}

fn default_method() -> String {
  "GET".to_string()
}

impl HostEvent {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Install => "install",
      Self::Activate => "activate",
      Self::Fetch { .. } => "fetch",
      Self::Message { .. } => "message",
      Self::Push { .. } => "push",
      Self::NotificationClick { .. } => "notification_click",
      Self::Sync { .. } => "sync",
      Self::Online => "online",
      Self::Write { .. } => "write",
      Self::Enqueue { .. } => "enqueue",
    }
  }
}

/// Raw bytes of a push event's data
pub fn push_bytes(data: &Value) -> Vec<u8> {
  match data {
    Value::String(s) => s.as_bytes().to_vec(),
    other => other.to_string().into_bytes(),
  }
}

/// Outcomes written back to the host, one per output line
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostOutput {
  Installed {
    report: InstallReport,
  },
  Activated {
    report: ActivateReport,
  },
  Response {
    url: String,
    status: u16,
    source: ResponseSource,
    /// When the served copy was cached; absent for network answers
    stored_at: Option<DateTime<Utc>>,
    headers: Vec<(String, String)>,
    body: String,
  },
  Reply {
    reply: ControlReply,
  },
  /// `None` when the push was malformed and dropped
  Notification {
    notification: Option<NotificationIntent>,
  },
  Window {
    command: WindowCommand,
  },
  Synced {
    report: DrainReport,
  },
  Written {
    outcome: ForwardOutcome,
  },
  Queued {
    task: SyncTask,
  },
  Error {
    during: String,
    message: String,
  },
}

/// Reads host events from a line-oriented input
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<HostEvent>,
}

impl EventHandler {
  /// Spawn a reader over `input`. Malformed lines are logged and skipped.
  pub fn new<R>(input: R) -> Self
  where
    R: AsyncRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = BufReader::new(input).lines();
      loop {
        let line = match lines.next_line().await {
          Ok(Some(line)) => line,
          Ok(None) => break,
          Err(e) => {
            warn!("Failed to read host input: {}", e);
            break;
          }
        };

        if line.trim().is_empty() {
          continue;
        }

        match serde_json::from_str::<HostEvent>(&line) {
          Ok(event) => {
            if tx.send(event).is_err() {
              break;
            }
          }
          Err(e) => warn!("Skipping malformed host event: {}", e),
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event; `None` once the input is closed
  pub async fn next(&mut self) -> Option<HostEvent> {
    self.rx.recv().await
  }
}
