//! Push notification presentation and activation routing.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::NotificationConfig;

/// Declared category of a push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
  Crisis,
  WellnessReminder,
  AppointmentReminder,
  Other(String),
}

impl From<String> for NotificationKind {
  fn from(s: String) -> Self {
    match s.as_str() {
      "crisis" => Self::Crisis,
      "wellness_reminder" => Self::WellnessReminder,
      "appointment_reminder" => Self::AppointmentReminder,
      _ => Self::Other(s),
    }
  }
}

impl From<NotificationKind> for String {
  fn from(kind: NotificationKind) -> Self {
    match kind {
      NotificationKind::Crisis => "crisis".to_string(),
      NotificationKind::WellnessReminder => "wellness_reminder".to_string(),
      NotificationKind::AppointmentReminder => "appointment_reminder".to_string(),
      NotificationKind::Other(s) => s,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  #[serde(alias = "action")]
  pub id: String,
  #[serde(alias = "title")]
  pub label: String,
}

impl NotificationAction {
  fn new(id: &str, label: &str) -> Self {
    Self {
      id: id.to_string(),
      label: label.to_string(),
    }
  }
}

/// Inbound push as sent by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
  pub title: String,
  #[serde(default)]
  pub body: String,
  #[serde(default)]
  pub tag: Option<String>,
  #[serde(rename = "type", default)]
  pub kind: Option<String>,
  #[serde(default)]
  pub urgent: bool,
  #[serde(default)]
  pub actions: Vec<NotificationAction>,
  #[serde(default)]
  pub icon: Option<String>,
  /// Free-form metadata; may carry a fallback `url`
  #[serde(default)]
  pub data: serde_json::Value,
}

impl PushPayload {
  /// Parse a raw push body. Anything that is not a JSON object with a title
  /// is malformed.
  pub fn parse(raw: &[u8]) -> Result<Self> {
    serde_json::from_slice(raw).map_err(|e| eyre!("Malformed push payload: {}", e))
  }
}

/// A notification ready to be shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationIntent {
  #[serde(rename = "type")]
  pub kind: NotificationKind,
  pub title: String,
  pub body: String,
  #[serde(default)]
  pub tag: Option<String>,
  pub icon: String,
  pub badge: String,
  pub require_interaction: bool,
  #[serde(default)]
  pub actions: Vec<NotificationAction>,
  #[serde(default)]
  pub data: serde_json::Value,
}

impl NotificationIntent {
  /// The fallback `url` carried in the payload metadata
  pub fn data_url(&self) -> Option<&str> {
    self.data.get("url").and_then(|u| u.as_str())
  }
}

/// Where activating a notification should take the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "url", rename_all = "snake_case")]
pub enum NavigationTarget {
  Dismiss,
  Navigate(Url),
}

/// An application window the host reports as open
#[derive(Debug, Clone, Deserialize)]
pub struct ClientWindow {
  pub id: String,
  pub url: String,
  #[serde(default)]
  pub focused: bool,
}

/// What the host should do with its windows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WindowCommand {
  None,
  /// Focus an existing window and navigate it in place
  Focus { id: String, url: Url },
  Open { url: Url },
}

pub struct NotificationRouter {
  origin: Url,
  config: NotificationConfig,
}

impl NotificationRouter {
  pub fn new(origin: Url, config: NotificationConfig) -> Self {
    Self { origin, config }
  }

  /// Apply the presentation template of the payload's type.
  pub fn present(&self, payload: PushPayload) -> NotificationIntent {
    let kind = NotificationKind::from(payload.kind.unwrap_or_default());
    let mut intent = NotificationIntent {
      kind: kind.clone(),
      title: payload.title,
      body: payload.body,
      tag: payload.tag,
      icon: payload.icon.unwrap_or_else(|| self.config.icon.clone()),
      badge: self.config.badge.clone(),
      require_interaction: payload.urgent,
      actions: payload.actions,
      data: payload.data,
    };

    match kind {
      NotificationKind::Crisis => {
        intent.require_interaction = true;
        intent.icon = self.config.emergency_icon.clone();
        intent.actions = vec![
          NotificationAction::new("emergency", "Get help now"),
          NotificationAction::new("dismiss", "Dismiss"),
        ];
      }
      NotificationKind::WellnessReminder => {
        intent.actions = vec![
          NotificationAction::new("check_in", "Check in"),
          NotificationAction::new("dismiss", "Later"),
        ];
      }
      NotificationKind::AppointmentReminder => {
        intent.actions = vec![
          NotificationAction::new("view_appointment", "View appointment"),
          NotificationAction::new("dismiss", "Dismiss"),
        ];
      }
      NotificationKind::Other(_) => {}
    }

    intent
  }

  /// Map an activated action (or a click on the body, `None`) to a target.
  ///
  /// Targets never leave the application origin; a foreign `data.url`
  /// resolves to the root.
  pub fn resolve(&self, intent: &NotificationIntent, action: Option<&str>) -> NavigationTarget {
    let path = match action {
      Some("dismiss") => return NavigationTarget::Dismiss,
      Some("emergency") => Some(self.config.crisis_path.as_str()),
      Some("check_in") => Some(self.config.check_in_path.as_str()),
      Some("view_appointment") => Some(self.config.appointments_path.as_str()),
      _ => None,
    };

    let target = path
      .or_else(|| intent.data_url())
      .and_then(|p| self.origin.join(p).ok())
      .filter(|url| url.origin() == self.origin.origin())
      .unwrap_or_else(|| self.origin.clone());

    debug!(?action, url = %target, "Resolved notification activation");
    NavigationTarget::Navigate(target)
  }

  /// Reuse an open same-origin window when there is one, else open a new one.
  pub fn window_plan(&self, target: &NavigationTarget, windows: &[ClientWindow]) -> WindowCommand {
    let url = match target {
      NavigationTarget::Dismiss => return WindowCommand::None,
      NavigationTarget::Navigate(url) => url.clone(),
    };

    let mut candidates: Vec<&ClientWindow> = windows
      .iter()
      .filter(|w| {
        Url::parse(&w.url)
          .map(|u| u.origin() == self.origin.origin())
          .unwrap_or(false)
      })
      .collect();
    candidates.sort_by_key(|w| !w.focused);

    match candidates.first() {
      Some(window) => WindowCommand::Focus {
        id: window.id.clone(),
        url,
      },
      None => WindowCommand::Open { url },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn router() -> NotificationRouter {
    NotificationRouter::new(
      Url::parse("http://localhost:8000").unwrap(),
      NotificationConfig::default(),
    )
  }

  fn payload(value: serde_json::Value) -> PushPayload {
    PushPayload::parse(value.to_string().as_bytes()).unwrap()
  }

  fn action_ids(intent: &NotificationIntent) -> Vec<&str> {
    intent.actions.iter().map(|a| a.id.as_str()).collect()
  }

  #[test]
  fn test_crisis_push() {
    let router = router();
    let intent = router.present(payload(json!({
      "type": "crisis",
      "title": "Check in",
      "body": "We noticed you might be struggling."
    })));

    assert!(intent.require_interaction);
    assert_eq!(action_ids(&intent), vec!["emergency", "dismiss"]);
    assert_eq!(intent.icon, NotificationConfig::default().emergency_icon);

    let target = router.resolve(&intent, Some("emergency"));
    assert_eq!(
      target,
      NavigationTarget::Navigate(Url::parse("http://localhost:8000/crisis/").unwrap())
    );
  }

  #[test]
  fn test_reminder_templates() {
    let router = router();
    let wellness = router.present(payload(json!({ "type": "wellness_reminder", "title": "t" })));
    assert_eq!(action_ids(&wellness), vec!["check_in", "dismiss"]);
    assert!(!wellness.require_interaction);

    let appointment =
      router.present(payload(json!({ "type": "appointment_reminder", "title": "t" })));
    assert_eq!(action_ids(&appointment), vec!["view_appointment", "dismiss"]);
    assert_eq!(
      router.resolve(&appointment, Some("view_appointment")),
      NavigationTarget::Navigate(Url::parse("http://localhost:8000/appointments/").unwrap())
    );
  }

  #[test]
  fn test_unknown_type_passes_through() {
    let router = router();
    let intent = router.present(payload(json!({
      "type": "newsletter",
      "title": "New article",
      "body": "Sleep hygiene tips",
      "urgent": true,
      "icon": "/static/images/news.png",
      "actions": [{ "action": "read", "title": "Read" }]
    })));

    assert_eq!(intent.kind, NotificationKind::Other("newsletter".to_string()));
    assert!(intent.require_interaction);
    assert_eq!(intent.icon, "/static/images/news.png");
    assert_eq!(action_ids(&intent), vec!["read"]);
  }

  #[test]
  fn test_resolve_fallbacks() {
    let router = router();
    let with_url = router.present(payload(json!({
      "title": "Journal",
      "data": { "url": "/journal/12/" }
    })));
    assert_eq!(
      router.resolve(&with_url, Some("read")),
      NavigationTarget::Navigate(Url::parse("http://localhost:8000/journal/12/").unwrap())
    );
    assert_eq!(
      router.resolve(&with_url, None),
      NavigationTarget::Navigate(Url::parse("http://localhost:8000/journal/12/").unwrap())
    );

    let bare = router.present(payload(json!({ "title": "Hello" })));
    assert_eq!(
      router.resolve(&bare, Some("read")),
      NavigationTarget::Navigate(Url::parse("http://localhost:8000/").unwrap())
    );
    assert_eq!(router.resolve(&bare, Some("dismiss")), NavigationTarget::Dismiss);
  }

  #[test]
  fn test_foreign_data_url_resolves_to_root() {
    let router = router();
    let root = NavigationTarget::Navigate(Url::parse("http://localhost:8000/").unwrap());

    for url in ["https://evil.example/login/", "//evil.example/", "http://localhost:9000/"] {
      let intent = router.present(payload(json!({ "title": "Hi", "data": { "url": url } })));
      assert_eq!(router.resolve(&intent, None), root);
      assert_eq!(
        router.window_plan(&router.resolve(&intent, None), &[]),
        WindowCommand::Open {
          url: Url::parse("http://localhost:8000/").unwrap()
        }
      );
    }
  }

  #[test]
  fn test_malformed_payloads() {
    assert!(PushPayload::parse(b"not json").is_err());
    assert!(PushPayload::parse(br#"{"body":"no title"}"#).is_err());
    assert!(PushPayload::parse(br#"{"title":5}"#).is_err());
  }

  #[test]
  fn test_window_plan_prefers_open_window() {
    let router = router();
    let target = NavigationTarget::Navigate(Url::parse("http://localhost:8000/crisis/").unwrap());
    let windows = vec![
      ClientWindow {
        id: "other-site".to_string(),
        url: "https://news.example/".to_string(),
        focused: true,
      },
      ClientWindow {
        id: "dash".to_string(),
        url: "http://localhost:8000/dashboard/".to_string(),
        focused: false,
      },
    ];

    assert_eq!(
      router.window_plan(&target, &windows),
      WindowCommand::Focus {
        id: "dash".to_string(),
        url: Url::parse("http://localhost:8000/crisis/").unwrap(),
      }
    );
    assert!(matches!(
      router.window_plan(&target, &windows[..1]),
      WindowCommand::Open { .. }
    ));
    assert_eq!(
      router.window_plan(&NavigationTarget::Dismiss, &windows),
      WindowCommand::None
    );
  }

  #[test]
  fn test_intent_survives_round_trip_to_host() {
    let router = router();
    let intent = router.present(payload(json!({ "type": "crisis", "title": "Check in" })));
    let json = serde_json::to_value(&intent).unwrap();
    assert_eq!(json["requireInteraction"], json!(true));
    assert_eq!(json["type"], json!("crisis"));
    let back: NotificationIntent = serde_json::from_value(json).unwrap();
    assert_eq!(back, intent);
  }
}
