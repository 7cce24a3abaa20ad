use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

use crate::engine::CacheEngine;
use crate::event::{push_bytes, EventHandler, HostEvent, HostOutput};
use crate::net::Request;
use crate::sync::SyncTag;

/// Drives the engine from host events until the input closes.
pub struct App {
  engine: Arc<CacheEngine>,
  origin: Url,
}

impl App {
  pub fn new(engine: CacheEngine, origin: Url) -> Self {
    Self {
      engine: Arc::new(engine),
      origin,
    }
  }

  /// Process every event from `input`, writing one JSON line per outcome to
  /// `output`. Returns the writer once all in-flight work has finished.
  ///
  /// Lifecycle, control and notification events are handled in arrival
  /// order. Reads and sync work run concurrently so a slow network never
  /// holds up the rest of the stream.
  pub async fn run<R, W>(&self, input: R, output: W) -> Result<W>
  where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
  {
    let mut events = EventHandler::new(input);
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_outputs(rx, output));
    let mut in_flight = JoinSet::new();

    while let Some(event) = events.next().await {
      debug!(event = event.name(), "Host event");

      if runs_concurrently(&event) {
        let engine = self.engine.clone();
        let origin = self.origin.clone();
        let tx = tx.clone();
        in_flight.spawn(async move {
          let _ = tx.send(handle(&engine, &origin, event).await);
        });
      } else {
        let _ = tx.send(handle(&self.engine, &self.origin, event).await);
      }
    }

    while let Some(joined) = in_flight.join_next().await {
      if let Err(e) = joined {
        warn!("Event task failed: {}", e);
      }
    }

    drop(tx);
    writer
      .await
      .map_err(|e| eyre!("Output writer failed: {}", e))?
  }
}

fn runs_concurrently(event: &HostEvent) -> bool {
  matches!(
    event,
    HostEvent::Fetch { .. } | HostEvent::Sync { .. } | HostEvent::Online | HostEvent::Write { .. }
  )
}

/// Turn one event into its output line. Failures become `error` lines.
async fn handle(engine: &CacheEngine, origin: &Url, event: HostEvent) -> HostOutput {
  let during = event.name();
  match dispatch(engine, origin, event).await {
    Ok(output) => output,
    Err(e) => {
      warn!(event = during, "Event failed: {}", e);
      HostOutput::Error {
        during: during.to_string(),
        message: e.to_string(),
      }
    }
  }
}

async fn dispatch(engine: &CacheEngine, origin: &Url, event: HostEvent) -> Result<HostOutput> {
  let output = match event {
    HostEvent::Install => HostOutput::Installed {
      report: engine.install().await?,
    },
    HostEvent::Activate => HostOutput::Activated {
      report: engine.activate().await?,
    },
    HostEvent::Fetch { method, url } => {
      let request = Request::parse(&method, &url, origin)?;
      let served = engine.fetch(&request).await?;
      HostOutput::Response {
        url: request.url.to_string(),
        status: served.response.status,
        source: served.source,
        stored_at: served.stored_at,
        body: served.response.text(),
        headers: served.response.headers,
      }
    }
    HostEvent::Message { data } => HostOutput::Reply {
      reply: engine.message(&data).await?,
    },
    HostEvent::Push { data } => HostOutput::Notification {
      notification: engine.push(&push_bytes(&data)),
    },
    HostEvent::NotificationClick {
      notification,
      action,
      windows,
    } => HostOutput::Window {
      command: engine.notification_click(&notification, action.as_deref(), &windows),
    },
    HostEvent::Sync { tag } => {
      let tag: SyncTag = tag.parse()?;
      HostOutput::Synced {
        report: engine.sync(tag).await?,
      }
    }
    HostEvent::Online => HostOutput::Synced {
      report: engine.online().await?,
    },
    HostEvent::Write { tag, payload } => HostOutput::Written {
      outcome: engine.write(tag, payload).await?,
    },
    HostEvent::Enqueue { tag, payload } => HostOutput::Queued {
      task: engine.enqueue(tag, payload)?,
    },
  };

  Ok(output)
}

async fn write_outputs<W>(mut rx: mpsc::UnboundedReceiver<HostOutput>, mut output: W) -> Result<W>
where
  W: AsyncWrite + Unpin,
{
  while let Some(line) = rx.recv().await {
    let mut json = serde_json::to_vec(&line)?;
    json.push(b'\n');
    output.write_all(&json).await?;
    output.flush().await?;
  }

  Ok(output)
}
