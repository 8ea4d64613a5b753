//! Serde types for Jira webhook payloads and REST detail responses.
//!
//! Only the fields the relay consumes are modeled; everything else in the
//! payload is ignored during deserialization. The same `Issue` shape
//! covers the webhook's embedded issue and the REST detail fetch, so
//! cached detail responses round-trip through `serde_json` unchanged.

use serde::{Deserialize, Serialize};

/// An inbound webhook notification describing a change to an issue,
/// comment, or project. Immutable once received; the relay only derives
/// data from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueEvent {
  #[serde(default)]
  pub timestamp: Option<i64>,
  #[serde(rename = "webhookEvent", default)]
  pub webhook_event: String,
  #[serde(rename = "issue_event_type_name", default)]
  pub issue_event_type_name: Option<String>,
  #[serde(default)]
  pub user: Option<User>,
  #[serde(default)]
  pub issue: Option<Issue>,
  #[serde(default)]
  pub comment: Option<Comment>,
  #[serde(default)]
  pub changelog: Option<Changelog>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
  pub id: String,
  pub key: String,
  /// Canonical REST URL for this issue, used as the detail cache key.
  #[serde(rename = "self")]
  pub self_url: String,
  #[serde(default)]
  pub fields: Option<Fields>,
  #[serde(default)]
  pub changelog: Option<Changelog>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fields {
  #[serde(rename = "issuetype", default)]
  pub issue_type: Option<IssueType>,
  #[serde(default)]
  pub components: Vec<Component>,
  #[serde(default)]
  pub project: Option<Project>,
  #[serde(default)]
  pub summary: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub status: Option<Status>,
  #[serde(default)]
  pub assignee: Option<User>,
  #[serde(default)]
  pub reporter: Option<User>,
  #[serde(default)]
  pub priority: Option<Priority>,
  #[serde(default)]
  pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueType {
  pub name: String,
  #[serde(default)]
  pub subtask: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
  pub id: String,
  #[serde(default)]
  pub key: String,
  #[serde(default)]
  pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
  pub id: String,
  #[serde(default)]
  pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
  #[serde(default)]
  pub id: String,
  pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Priority {
  pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(rename = "displayName", default)]
  pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub body: String,
  #[serde(default)]
  pub author: Option<User>,
}

/// Field-change records. Webhook payloads carry `items` directly; REST
/// responses with `expand=changelog` nest them under `histories`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Changelog {
  #[serde(default)]
  pub items: Vec<ChangelogItem>,
  #[serde(default)]
  pub histories: Vec<ChangelogRecord>,
}

impl Changelog {
  /// Iterate every change item regardless of which shape carried it.
  pub fn all_items(&self) -> impl Iterator<Item = &ChangelogItem> {
    self
      .items
      .iter()
      .chain(self.histories.iter().flat_map(|h| h.items.iter()))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogRecord {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub created: Option<String>,
  #[serde(default)]
  pub items: Vec<ChangelogItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogItem {
  pub field: String,
  #[serde(rename = "fieldtype", default)]
  pub field_type: Option<String>,
  #[serde(rename = "fromString", default)]
  pub from_string: Option<String>,
  #[serde(rename = "toString", default)]
  pub to_string: Option<String>,
}

// ============================================================================
// Dev-status API (repositories linked to an issue)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevStatusResponse {
  #[serde(default)]
  pub detail: Vec<DevStatusDetail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevStatusDetail {
  #[serde(default)]
  pub repositories: Vec<DevStatusRepository>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevStatusRepository {
  pub name: String,
}

impl DevStatusResponse {
  pub fn repository_names(&self) -> Vec<String> {
    self
      .detail
      .iter()
      .flat_map(|d| d.repositories.iter().map(|r| r.name.clone()))
      .collect()
  }
}
