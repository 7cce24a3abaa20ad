//! Durable queue of pending writes, replayed on reconnection.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::cache::{format_datetime, parse_datetime};
use crate::config::SyncConfig;
use crate::db::Database;

use super::{SyncRemote, SyncTag, SyncTask};

const PENDING: &str = "pending";
const ABANDONED: &str = "abandoned";

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
  pub succeeded: usize,
  /// Tasks that failed this time, including those just abandoned
  pub failed: usize,
  /// Tasks that reached the attempt limit and will not be replayed
  pub abandoned: usize,
  /// Every requested tag was already draining; each will be replayed once
  /// more when its running drain finishes
  pub skipped: bool,
}

impl DrainReport {
  fn skipped() -> Self {
    Self {
      skipped: true,
      ..Self::default()
    }
  }

  fn absorb(&mut self, other: DrainReport) {
    self.succeeded += other.succeeded;
    self.failed += other.failed;
    self.abandoned += other.abandoned;
  }
}

/// Result of forwarding a write immediately.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ForwardOutcome {
  Sent,
  Queued { task: SyncTask },
}

/// Tags currently draining, and those signalled again meanwhile
#[derive(Debug, Default)]
struct DrainState {
  running: BTreeSet<SyncTag>,
  rerun: BTreeSet<SyncTag>,
}

/// Tags owned by one drain. Dropping releases whatever was not finished.
struct Claim<'a> {
  state: &'a Mutex<DrainState>,
  tags: Vec<SyncTag>,
}

impl Claim<'_> {
  /// Release `tag`, unless it was signalled while draining; then keep it
  /// and return true so the caller drains it once more.
  fn finish(&mut self, tag: SyncTag) -> bool {
    let mut state = lock(self.state);
    if state.rerun.remove(&tag) {
      return true;
    }
    state.running.remove(&tag);
    self.tags.retain(|t| *t != tag);
    false
  }
}

impl Drop for Claim<'_> {
  fn drop(&mut self) {
    let mut state = lock(self.state);
    for tag in &self.tags {
      state.running.remove(tag);
      state.rerun.remove(tag);
    }
  }
}

/// The state holds plain sets, so a poisoned lock is still consistent.
fn lock(state: &Mutex<DrainState>) -> MutexGuard<'_, DrainState> {
  state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Offline write queue.
///
/// Tasks are appended and replayed in FIFO order per tag. A task leaves the
/// queue only after the server acknowledges it; failures bump its attempt
/// count, and once `max_attempts` is reached it is marked abandoned rather
/// than deleted.
///
/// At most one drain runs per tag. A signal for a tag that is already
/// draining is recorded and served by the running drain before it lets go.
pub struct SyncQueue {
  db: Database,
  remote: Arc<dyn SyncRemote>,
  config: SyncConfig,
  draining: Mutex<DrainState>,
}

impl SyncQueue {
  pub fn new(db: Database, remote: Arc<dyn SyncRemote>, config: SyncConfig) -> Self {
    Self {
      db,
      remote,
      config,
      draining: Mutex::new(DrainState::default()),
    }
  }

  /// Append a task to the queue.
  pub fn enqueue(&self, tag: SyncTag, payload: serde_json::Value) -> Result<SyncTask> {
    let conn = self.db.conn()?;
    let queued_at = Utc::now();
    let body =
      serde_json::to_string(&payload).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute(
        "INSERT INTO sync_tasks (tag, payload, queued_at, attempts, state) VALUES (?, ?, ?, 0, ?)",
        params![tag.as_str(), body, format_datetime(queued_at), PENDING],
      )
      .map_err(|e| eyre!("Failed to enqueue {} task: {}", tag, e))?;

    let task = SyncTask {
      id: conn.last_insert_rowid(),
      tag,
      payload,
      queued_at,
      attempts: 0,
    };
    debug!(id = task.id, %tag, "Queued sync task");
    Ok(task)
  }

  /// Send a write now, queueing it if the server can't be reached.
  pub async fn forward(&self, tag: SyncTag, payload: serde_json::Value) -> Result<ForwardOutcome> {
    let attempt = SyncTask {
      id: 0,
      tag,
      payload,
      queued_at: Utc::now(),
      attempts: 0,
    };

    match self.remote.send(self.config.endpoint(tag), &attempt).await {
      Ok(()) => Ok(ForwardOutcome::Sent),
      Err(e) => {
        info!(%tag, "Write failed, deferring to background sync: {}", e);
        let task = self.enqueue(tag, attempt.payload)?;
        Ok(ForwardOutcome::Queued { task })
      }
    }
  }

  /// Pending tasks of one tag in FIFO order.
  pub fn pending(&self, tag: SyncTag) -> Result<Vec<SyncTask>> {
    self.tasks_in_state(tag, PENDING)
  }

  /// Number of pending tasks per tag (tags with none are omitted).
  pub fn pending_counts(&self) -> Result<BTreeMap<SyncTag, usize>> {
    self.counts(PENDING)
  }

  /// Number of abandoned tasks per tag (tags with none are omitted).
  pub fn abandoned_counts(&self) -> Result<BTreeMap<SyncTag, usize>> {
    self.counts(ABANDONED)
  }

  fn counts(&self, state: &str) -> Result<BTreeMap<SyncTag, usize>> {
    let mut counts = BTreeMap::new();
    for tag in SyncTag::ALL {
      let count = self.tasks_in_state(tag, state)?.len();
      if count > 0 {
        counts.insert(tag, count);
      }
    }
    Ok(counts)
  }

  /// Replay every tag.
  pub async fn drain(&self) -> Result<DrainReport> {
    self.drain_tags(&SyncTag::ALL).await
  }

  /// Replay a single tag; the generic tag replays everything.
  pub async fn drain_tag(&self, tag: SyncTag) -> Result<DrainReport> {
    if tag == SyncTag::Generic {
      return self.drain().await;
    }
    self.drain_tags(&[tag]).await
  }

  async fn drain_tags(&self, tags: &[SyncTag]) -> Result<DrainReport> {
    let mut claim = self.claim(tags);
    if claim.tags.is_empty() {
      debug!(?tags, "Drain already in progress, replay queued");
      return Ok(DrainReport::skipped());
    }

    let mut report = DrainReport::default();
    for tag in claim.tags.clone() {
      loop {
        report.absorb(self.drain_one(tag).await);
        if !claim.finish(tag) {
          break;
        }
        debug!(%tag, "Tag signalled during drain, replaying again");
      }
    }

    if report.succeeded + report.failed > 0 {
      info!(
        succeeded = report.succeeded,
        failed = report.failed,
        abandoned = report.abandoned,
        "Sync drain finished"
      );
    }
    Ok(report)
  }

  /// Take ownership of the tags nobody is draining; mark the rest for a rerun.
  fn claim(&self, tags: &[SyncTag]) -> Claim<'_> {
    let mut state = lock(&self.draining);
    let mut claimed = Vec::new();
    for &tag in tags {
      if state.running.insert(tag) {
        claimed.push(tag);
      } else {
        state.rerun.insert(tag);
      }
    }
    Claim {
      state: &self.draining,
      tags: claimed,
    }
  }

  /// Replay one tag. Storage errors are logged per task so one bad row never
  /// holds up the rest of the queue.
  async fn drain_one(&self, tag: SyncTag) -> DrainReport {
    let endpoint = self.config.endpoint(tag);
    let mut report = DrainReport::default();

    let tasks = match self.pending(tag) {
      Ok(tasks) => tasks,
      Err(e) => {
        warn!(%tag, "Failed to load pending sync tasks: {}", e);
        return report;
      }
    };

    for task in tasks {
      match self.remote.send(endpoint, &task).await {
        Ok(()) => {
          report.succeeded += 1;
          if let Err(e) = self.remove(task.id) {
            warn!(id = task.id, %tag, "Sent sync task could not be removed and will be sent again: {}", e);
          }
        }
        Err(e) => {
          let attempts = task.attempts + 1;
          report.failed += 1;
          let state = if attempts >= self.config.max_attempts {
            warn!(id = task.id, %tag, attempts, "Abandoning sync task: {}", e);
            report.abandoned += 1;
            ABANDONED
          } else {
            debug!(id = task.id, %tag, attempts, "Sync task failed, will retry: {}", e);
            PENDING
          };
          if let Err(e) = self.record_failure(task.id, attempts, state) {
            warn!(id = task.id, %tag, "Failed to record sync failure: {}", e);
          }
        }
      }
    }

    report
  }

  fn remove(&self, id: i64) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute("DELETE FROM sync_tasks WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove sync task {}: {}", id, e))?;
    Ok(())
  }

  fn record_failure(&self, id: i64, attempts: u32, state: &str) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "UPDATE sync_tasks SET attempts = ?, state = ? WHERE id = ?",
        params![attempts, state, id],
      )
      .map_err(|e| eyre!("Failed to update sync task {}: {}", id, e))?;
    Ok(())
  }

  fn tasks_in_state(&self, tag: SyncTag, state: &str) -> Result<Vec<SyncTask>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, payload, queued_at, attempts FROM sync_tasks
         WHERE tag = ? AND state = ? ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![tag.as_str(), state], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, u32>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query sync tasks: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read sync task: {}", e))?;

    rows
      .into_iter()
      .map(|(id, payload, queued_at, attempts)| -> Result<SyncTask> {
        Ok(SyncTask {
          id,
          tag,
          payload: serde_json::from_str(&payload)
            .map_err(|e| eyre!("Failed to parse payload of sync task {}: {}", id, e))?,
          queued_at: parse_datetime(&queued_at)?,
          attempts,
        })
      })
      .collect()
  }
}
