//! Event routing: from a webhook payload to per-channel notifications.
//!
//! - `kinds` classifies payloads into notification kinds
//! - `channels` resolves and filters the recipient channels
//! - `replay` drives the invalidate-then-replay protocol around routing
//!
//! Routing itself derives the applicable kinds, fans out to the channels
//! whose preferences want them, and hands one `IssueNotification` per
//! channel to a `ChatNotifier`. Rendering happens on the other side of
//! that seam.

pub mod channels;
pub mod kinds;
pub mod replay;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{RelayError, Result};
use crate::jira::types::{Issue, IssueEvent};
use crate::jira::Tracker;

pub use channels::ChannelResolver;
pub use kinds::{kinds_for_event, NotifyKind};
pub use replay::EventCoordinator;

/// Routes one event to every interested channel. The replay coordinator
/// calls this once per historical event and once for the new one.
#[async_trait]
pub trait EventRouter: Send + Sync {
  /// `is_new` is false for replays: the notifier must then update the
  /// message already keyed by this issue instead of posting a fresh one.
  async fn route(&self, event: &IssueEvent, is_new: bool) -> Result<()>;
}

/// Delivery seam. Implementations post, update or log messages; they never
/// decide who gets notified.
#[async_trait]
pub trait ChatNotifier: Send + Sync {
  async fn notify(&self, notification: &IssueNotification, is_new: bool) -> Result<()>;
}

/// Summary line embedded in every message about an issue. Rebuilt from the
/// current issue detail on every route so replays refresh stale copies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueFooter {
  pub project_name: String,
  pub project_key: String,
  pub issue_type: Option<String>,
  pub priority: Option<String>,
  pub status: Option<String>,
  pub assignee: String,
  pub labels: Vec<String>,
}

impl IssueFooter {
  pub fn from_issue(detail: &Issue) -> Self {
    let Some(fields) = &detail.fields else {
      return Self::default();
    };
    Self {
      project_name: fields.project.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
      project_key: fields.project.as_ref().map(|p| p.key.clone()).unwrap_or_default(),
      issue_type: fields.issue_type.as_ref().map(|t| t.name.clone()),
      priority: fields.priority.as_ref().map(|p| p.name.clone()),
      status: fields.status.as_ref().map(|s| s.name.clone()),
      assignee: fields
        .assignee
        .as_ref()
        .and_then(|u| u.display_name.clone().or_else(|| u.name.clone()))
        .unwrap_or_else(|| "Unassigned".to_string()),
      labels: fields.labels.clone(),
    }
  }
}

/// One notification for one channel, ready for a gateway to render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueNotification {
  pub channel: String,
  pub issue_key: String,
  pub issue_url: String,
  pub kind: NotifyKind,
  pub summary: String,
  pub comment: Option<String>,
  pub footer: IssueFooter,
}

/// The default `EventRouter`: classify, resolve, filter, notify.
pub struct NotificationRouter {
  resolver: ChannelResolver,
  tracker: Arc<dyn Tracker>,
  notifier: Arc<dyn ChatNotifier>,
}

impl NotificationRouter {
  pub fn new(
    resolver: ChannelResolver,
    tracker: Arc<dyn Tracker>,
    notifier: Arc<dyn ChatNotifier>,
  ) -> Self {
    Self {
      resolver,
      tracker,
      notifier,
    }
  }
}

#[async_trait]
impl EventRouter for NotificationRouter {
  async fn route(&self, event: &IssueEvent, is_new: bool) -> Result<()> {
    let kinds = kinds_for_event(event);
    if kinds.is_empty() {
      debug!(
        webhook_event = %event.webhook_event,
        "no notification kinds apply to this payload"
      );
      return Ok(());
    }
    let Some(issue) = &event.issue else {
      debug!("routing skipped, event carries no issue");
      return Ok(());
    };

    let channels = self.resolver.resolve(event).await?;
    if channels.is_empty() {
      debug!(issue = %issue.key, "no channels mapped for this issue");
      return Ok(());
    }

    // Fresh detail for the footer; rides the same short-TTL cache entry
    // the preference filter uses.
    let detail = self.tracker.issue_detail(&issue.self_url, true, Some(30)).await?;
    let footer = IssueFooter::from_issue(&detail);
    let summary = detail
      .fields
      .as_ref()
      .map(|f| f.summary.clone())
      .unwrap_or_default();

    for kind in kinds {
      let preferences = self.resolver.filter(&channels, event, kind).await?;
      for preference in preferences {
        let notification = IssueNotification {
          channel: preference.channel.clone(),
          issue_key: issue.key.clone(),
          issue_url: issue.self_url.clone(),
          kind,
          summary: summary.clone(),
          comment: event.comment.as_ref().map(|c| c.body.clone()),
          footer: footer.clone(),
        };
        self.notifier.notify(&notification, is_new).await?;
      }
    }

    Ok(())
  }
}

#[derive(Serialize)]
struct GatewayPayload<'a> {
  is_new: bool,
  #[serde(flatten)]
  notification: &'a IssueNotification,
}

/// Posts serialized notifications to a chat gateway over HTTP.
pub struct GatewayNotifier {
  http: reqwest::Client,
  url: String,
}

impl GatewayNotifier {
  pub fn new(url: String) -> color_eyre::Result<Self> {
    let http = reqwest::Client::builder().build()?;
    Ok(Self { http, url })
  }
}

#[async_trait]
impl ChatNotifier for GatewayNotifier {
  async fn notify(&self, notification: &IssueNotification, is_new: bool) -> Result<()> {
    let payload = GatewayPayload {
      is_new,
      notification,
    };
    let response = self
      .http
      .post(&self.url)
      .json(&payload)
      .send()
      .await
      .map_err(|e| RelayError::DeliveryFailed(format!("POST {}: {e}", self.url)))?;

    let status = response.status();
    if !status.is_success() {
      return Err(RelayError::DeliveryFailed(format!(
        "POST {}: status {status}",
        self.url
      )));
    }
    Ok(())
  }
}

/// Fallback notifier when no gateway is configured: notifications land in
/// the log instead of a chat channel.
pub struct LogNotifier;

#[async_trait]
impl ChatNotifier for LogNotifier {
  async fn notify(&self, notification: &IssueNotification, is_new: bool) -> Result<()> {
    info!(
      channel = %notification.channel,
      issue = %notification.issue_key,
      kind = ?notification.kind,
      is_new,
      "notification (no gateway configured)"
    );
    Ok(())
  }
}
