//! Channel resolution and preference filtering.
//!
//! Resolution unions three sources: project mappings, component mappings
//! (first active match per component), and channels discovered through the
//! repositories linked to the issue. Filtering then narrows the result to
//! the channels whose preferences want this kind of event for this issue
//! type, judged against a fresh detail fetch rather than the possibly
//! stale webhook payload.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CachedLookup, ChannelPreference, MappingFilter};
use crate::error::Result;
use crate::jira::types::IssueEvent;
use crate::jira::Tracker;

use super::kinds::{issue_type_allowed, NotifyKind};

/// Detail fetches made while filtering ride the cache briefly; rapid
/// successive edits re-fetch after this many seconds.
const DETAIL_TTL_SECONDS: u64 = 30;

pub struct ChannelResolver {
  lookup: CachedLookup,
  tracker: Arc<dyn Tracker>,
  dynamic_channels: bool,
}

impl ChannelResolver {
  pub fn new(lookup: CachedLookup, tracker: Arc<dyn Tracker>, dynamic_channels: bool) -> Self {
    Self {
      lookup,
      tracker,
      dynamic_channels,
    }
  }

  /// Every channel that should learn about `event`, deduplicated, in a
  /// deterministic order: project mappings first, then per-component
  /// matches, then dynamically discovered channels.
  pub async fn resolve(&self, event: &IssueEvent) -> Result<Vec<String>> {
    let Some(issue) = &event.issue else {
      debug!("channel resolution: event carries no issue");
      return Ok(Vec::new());
    };
    let Some(project) = issue.fields.as_ref().and_then(|f| f.project.as_ref()) else {
      debug!(issue = %issue.key, "channel resolution: project id could not be determined");
      return Ok(Vec::new());
    };

    let mut channels: Vec<String> = Vec::new();

    let project_mappings = self
      .lookup
      .mappings(&MappingFilter::for_project(&project.id))
      .await?;
    for mapping in project_mappings.iter().filter(|m| m.active) {
      push_unique(&mut channels, mapping.channel.clone());
    }
    debug!(issue = %issue.key, project = %project.id, ?channels, "project channels");

    let components = issue
      .fields
      .as_ref()
      .map(|f| f.components.as_slice())
      .unwrap_or_default();
    if !components.is_empty() {
      let lookups = components
        .iter()
        .map(|c| self.component_channel(&project.id, &c.id));
      for (component, result) in components.iter().zip(join_all(lookups).await) {
        match result {
          Ok(Some(channel)) => push_unique(&mut channels, channel),
          Ok(None) => {}
          // One broken component mapping must not abort the whole
          // resolution.
          Err(e) => warn!(
            component = %component.id,
            error = %e,
            "component channel lookup failed, skipping"
          ),
        }
      }
    }

    if self.dynamic_channels {
      match self.tracker.issue_repos(&issue.id).await {
        Ok(repos) => {
          let lookups = repos.iter().map(|r| self.lookup.repo_channels(r));
          for (repo, result) in repos.iter().zip(join_all(lookups).await) {
            match result {
              Ok(found) => {
                for channel in found {
                  push_unique(&mut channels, channel);
                }
              }
              Err(e) => warn!(repo, error = %e, "repo channel lookup failed, skipping"),
            }
          }
        }
        Err(e) => warn!(
          issue = %issue.key,
          error = %e,
          "could not list linked repositories, skipping dynamic channels"
        ),
      }
    }

    debug!(issue = %issue.key, ?channels, "resolved channels");
    Ok(channels)
  }

  /// The channel for one (project, component) pair. Multiple active
  /// mappings for the same pair are possible; the first one the store
  /// returns wins and the rest are ignored.
  async fn component_channel(&self, project_id: &str, component_id: &str) -> Result<Option<String>> {
    let mappings = self
      .lookup
      .mappings(&MappingFilter::for_component(project_id, component_id))
      .await?;
    Ok(
      mappings
        .first()
        .filter(|m| m.active)
        .map(|m| m.channel.clone()),
    )
  }

  /// Narrow `channels` to the preferences that want notifications of
  /// `kind` for this issue's current type. The issue type comes from a
  /// fresh detail fetch; the webhook payload may lag behind rapid edits.
  pub async fn filter(
    &self,
    channels: &[String],
    event: &IssueEvent,
    kind: NotifyKind,
  ) -> Result<Vec<ChannelPreference>> {
    let Some(issue) = &event.issue else {
      return Ok(Vec::new());
    };

    let detail = self
      .tracker
      .issue_detail(&issue.self_url, true, Some(DETAIL_TTL_SECONDS))
      .await?;
    let issue_type = detail
      .fields
      .as_ref()
      .and_then(|f| f.issue_type.as_ref())
      .map(|t| t.name.clone());

    let mut notify = Vec::new();
    for channel in channels {
      let preference = self.lookup.preference(channel).await?;

      let type_allowed = issue_type
        .as_deref()
        .and_then(|name| issue_type_allowed(&preference, name))
        .unwrap_or(false);

      if kind.allowed_by(&preference) && type_allowed {
        notify.push(preference);
      } else {
        debug!(
          channel,
          ?kind,
          issue_type = issue_type.as_deref().unwrap_or("unknown"),
          "not notifying channel, preference does not cover this event"
        );
      }
    }

    Ok(notify)
  }
}

fn push_unique(channels: &mut Vec<String>, channel: String) {
  if !channels.contains(&channel) {
    channels.push(channel);
  }
}
