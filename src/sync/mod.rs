//! Background sync of writes made while offline.

mod queue;
mod remote;

pub use queue::{DrainReport, ForwardOutcome, SyncQueue};
pub use remote::{HttpSyncRemote, SyncRemote};

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Background sync tag; each maps to one remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SyncTag {
  #[serde(rename = "sync-journal-entries", alias = "journal-sync")]
  JournalEntries,
  #[serde(rename = "sync-wellness-data", alias = "wellness-sync")]
  WellnessData,
  #[serde(rename = "sync-mood-tracking", alias = "mood-sync")]
  MoodTracking,
  #[serde(rename = "background-sync")]
  Generic,
}

impl SyncTag {
  pub const ALL: [SyncTag; 4] = [
    SyncTag::JournalEntries,
    SyncTag::WellnessData,
    SyncTag::MoodTracking,
    SyncTag::Generic,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::JournalEntries => "sync-journal-entries",
      Self::WellnessData => "sync-wellness-data",
      Self::MoodTracking => "sync-mood-tracking",
      Self::Generic => "background-sync",
    }
  }

  pub fn default_endpoint(self) -> &'static str {
    match self {
      Self::JournalEntries => "/api/journal/sync/",
      Self::WellnessData => "/api/wellness/sync/",
      Self::MoodTracking => "/api/mood/sync/",
      Self::Generic => "/api/sync/",
    }
  }
}

impl fmt::Display for SyncTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SyncTag {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "sync-journal-entries" | "journal-sync" => Ok(Self::JournalEntries),
      "sync-wellness-data" | "wellness-sync" => Ok(Self::WellnessData),
      "sync-mood-tracking" | "mood-sync" => Ok(Self::MoodTracking),
      "background-sync" => Ok(Self::Generic),
      other => Err(eyre!("Unknown sync tag '{}'", other)),
    }
  }
}

/// One offline-originated write awaiting replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncTask {
  pub id: i64,
  pub tag: SyncTag,
  pub payload: serde_json::Value,
  pub queued_at: DateTime<Utc>,
  pub attempts: u32,
}
