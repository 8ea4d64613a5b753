//! Jira REST client and payload types.

pub mod client;
pub mod types;

pub use client::{JiraClient, Tracker};

/// Canonical REST URL for an issue, matching the `self` link Jira embeds
/// in webhook payloads. Detail cache keys are derived from this.
pub fn issue_self_url(base_url: &str, issue_id: &str) -> String {
  format!("{}/rest/api/2/issue/{}", base_url.trim_end_matches('/'), issue_id)
}

/// REST URL for the project list endpoint; purged when project
/// configuration changes upstream.
pub fn project_list_url(base_url: &str) -> String {
  format!("{}/rest/api/2/project", base_url.trim_end_matches('/'))
}
