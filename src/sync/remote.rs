use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use url::Url;

use crate::net::HttpFetcher;

use super::SyncTask;

/// Server side of background sync.
///
/// `Ok` means the server acknowledged the write; only then is the task
/// removed from the queue.
pub trait SyncRemote: Send + Sync {
  fn send<'a>(&'a self, endpoint: &'a str, task: &'a SyncTask) -> BoxFuture<'a, Result<()>>;
}

/// Replays tasks as JSON POSTs against the application origin
#[derive(Clone)]
pub struct HttpSyncRemote {
  client: reqwest::Client,
  origin: Url,
}

impl HttpSyncRemote {
  pub fn new(fetcher: &HttpFetcher, origin: Url) -> Self {
    Self {
      client: fetcher.client().clone(),
      origin,
    }
  }

  async fn post(&self, endpoint: &str, task: &SyncTask) -> Result<()> {
    let url = self
      .origin
      .join(endpoint)
      .map_err(|e| eyre!("Invalid sync endpoint '{}': {}", endpoint, e))?;

    let response = self
      .client
      .post(url.clone())
      .header("x-sync-tag", task.tag.as_str())
      .header("x-sync-attempt", (task.attempts + 1).to_string())
      .json(&task.payload)
      .send()
      .await
      .map_err(|e| eyre!("Failed to send {} task to {}: {}", task.tag, url, e))?;

    if !response.status().is_success() {
      return Err(eyre!(
        "Server rejected {} task at {}: {}",
        task.tag,
        url,
        response.status()
      ));
    }

    Ok(())
  }
}

impl SyncRemote for HttpSyncRemote {
  fn send<'a>(&'a self, endpoint: &'a str, task: &'a SyncTask) -> BoxFuture<'a, Result<()>> {
    self.post(endpoint, task).boxed()
  }
}
