//! Notification kinds and the issue-type preference table.
//!
//! Webhook payloads signal what happened through a mix of the event name,
//! the presence of a comment, and changelog items. `kinds_for_event` turns
//! that into a closed set of `NotifyKind`s; an empty result means the
//! payload does not apply, which is an ordinary outcome rather than an
//! error.

use serde::{Deserialize, Serialize};

use crate::cache::ChannelPreference;
use crate::jira::types::IssueEvent;

/// Event kinds a channel can opt in or out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
  Comment,
  Deleted,
  Created,
  StateChange,
  StatusChange,
}

impl NotifyKind {
  /// Whether `preference` has this kind switched on.
  pub fn allowed_by(&self, preference: &ChannelPreference) -> bool {
    match self {
      NotifyKind::Comment => preference.issue_comment,
      NotifyKind::Deleted => preference.issue_deleted,
      NotifyKind::Created => preference.issue_created,
      NotifyKind::StateChange => preference.issue_state,
      NotifyKind::StatusChange => preference.issue_status,
    }
  }
}

/// Issue types a channel preference can gate on. Lookup is
/// case-normalized; Jira spells the last one "Sub-task".
pub const SUPPORTED_ISSUE_TYPES: [&str; 5] = ["bug", "task", "epic", "story", "sub-task"];

/// Whether `preference` wants notifications for the given issue type.
/// `None` means the type is not in the supported table; callers treat
/// that as false.
pub fn issue_type_allowed(preference: &ChannelPreference, issue_type: &str) -> Option<bool> {
  match issue_type.to_lowercase().as_str() {
    "bug" => Some(preference.bug),
    "task" => Some(preference.task),
    "epic" => Some(preference.epic),
    "story" => Some(preference.story),
    "sub-task" | "subtask" => Some(preference.subtask),
    _ => None,
  }
}

/// Derive the notification kinds an inbound event gives rise to.
///
/// Created and deleted come from the webhook event name. Comments require
/// both a comment body and a comment-shaped event type, matching how the
/// payloads arrive. Changelog items map to status or generic state
/// changes, except on creation where the changelog merely restates the
/// initial field values.
pub fn kinds_for_event(event: &IssueEvent) -> Vec<NotifyKind> {
  let mut kinds = Vec::new();

  match event.webhook_event.as_str() {
    "jira:issue_created" => {
      kinds.push(NotifyKind::Created);
      return kinds;
    }
    "jira:issue_deleted" => kinds.push(NotifyKind::Deleted),
    _ => {}
  }

  if event.comment.is_some()
    && matches!(
      event.issue_event_type_name.as_deref(),
      Some("issue_commented") | Some("issue_comment_edited") | Some("issue_comment_deleted")
    )
  {
    kinds.push(NotifyKind::Comment);
  }

  if let Some(changelog) = &event.changelog {
    let mut status = false;
    let mut state = false;
    for item in changelog.all_items() {
      if item.field.eq_ignore_ascii_case("status") {
        status = true;
      } else {
        state = true;
      }
    }
    if status {
      kinds.push(NotifyKind::StatusChange);
    }
    if state {
      kinds.push(NotifyKind::StateChange);
    }
  }

  kinds
}
