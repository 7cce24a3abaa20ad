//! Per-class freshness policy.

use chrono::{DateTime, Duration, Utc};

use crate::config::MaxAgeConfig;

use super::traits::{CacheEntry, ResourceClass};

/// Upper bound on any max-age, about a century
const MAX_POLICY_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Decides whether a stored entry is still fresh.
///
/// Max-age belongs to the resource class, not to the entry, so changing a
/// class policy immediately affects every entry of that class.
#[derive(Debug, Clone)]
pub struct FreshnessEvaluator {
  policy: MaxAgeConfig,
}

impl FreshnessEvaluator {
  pub fn new(policy: MaxAgeConfig) -> Self {
    Self { policy }
  }

  pub fn max_age(&self, class: ResourceClass) -> Duration {
    let secs = match class {
      ResourceClass::StaticAsset => self.policy.static_asset,
      ResourceClass::ApiData => self.policy.api_data,
      ResourceClass::Image => self.policy.image,
      ResourceClass::HtmlPage => self.policy.html_page,
      ResourceClass::Critical => self.policy.critical,
    };
    Duration::seconds(secs.min(MAX_POLICY_SECS) as i64)
  }

  /// Stale iff `now - stored_at > max_age(class)`.
  pub fn is_stale_at(
    &self,
    stored_at: DateTime<Utc>,
    class: ResourceClass,
    now: DateTime<Utc>,
  ) -> bool {
    now - stored_at > self.max_age(class)
  }

  pub fn is_stale(&self, entry: &CacheEntry) -> bool {
    self.is_stale_at(entry.stored_at, entry.class, Utc::now())
  }
}
