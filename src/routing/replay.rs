//! Two-phase handling of inbound issue events.
//!
//! Phase 1 purges the cached issue detail so the next fetch reflects the
//! latest tracker state. Phase 2 replays every previously received event
//! for the same issue key through the router (so footers embedded in
//! earlier messages get refreshed), then routes the new event, then
//! records it for future replays.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::manage::purge_entry;
use crate::cache::IssueCache;
use crate::db::EventLog;
use crate::error::Result;
use crate::jira::types::IssueEvent;
use crate::jira::{issue_self_url, project_list_url};

use super::EventRouter;

/// Suffix appended to the issue's canonical URL when fetching detail with
/// its changelog; the purge key must match the fetch key exactly.
pub const CHANGELOG_SUFFIX: &str = "?expand=changelog";

const PROJECT_EVENTS: [&str; 3] = ["project_created", "project_updated", "project_deleted"];

pub struct EventCoordinator {
  cache: Arc<IssueCache>,
  log: Arc<dyn EventLog>,
  router: Arc<dyn EventRouter>,
  base_url: String,
  workspace_id: String,
}

impl EventCoordinator {
  pub fn new(
    cache: Arc<IssueCache>,
    log: Arc<dyn EventLog>,
    router: Arc<dyn EventRouter>,
    base_url: impl Into<String>,
    workspace_id: impl Into<String>,
  ) -> Self {
    Self {
      cache,
      log,
      router,
      base_url: base_url.into(),
      workspace_id: workspace_id.into(),
    }
  }

  /// Handle one inbound issue event.
  ///
  /// A failed purge degrades to a stale read and does not stop the
  /// handler. A failed history query fails the whole invocation; the
  /// transport's retry policy is the recovery path.
  pub async fn handle(&self, event: &IssueEvent) -> Result<()> {
    let Some(issue) = &event.issue else {
      debug!(
        webhook_event = %event.webhook_event,
        "event carries no issue, nothing to route"
      );
      return Ok(());
    };

    // Phase 1: quick subsequent edits to the same issue must not serve
    // detail cached for an earlier event.
    let detail_key = format!(
      "{}{}",
      issue_self_url(&self.base_url, &issue.id),
      CHANGELOG_SUFFIX
    );
    if let Err(e) = purge_entry(&self.cache, &detail_key) {
      warn!(key = %detail_key, error = %e, "detail purge failed, next read may be stale");
    }

    // Phase 2: refresh the footer on every earlier message for this
    // issue, then announce the new event.
    let history = self.log.events_for_key(&self.workspace_id, &issue.key)?;
    debug!(issue = %issue.key, count = history.len(), "replaying recorded events");
    for past in &history {
      self.router.route(past, false).await?;
    }

    self.router.route(event, true).await?;
    self.log.append(&self.workspace_id, event)?;
    Ok(())
  }

  /// Project configuration changes invalidate the cached project list.
  pub fn handle_project_event(&self, event: &IssueEvent) -> Result<()> {
    if !PROJECT_EVENTS.contains(&event.webhook_event.as_str()) {
      return Ok(());
    }

    info!(
      webhook_event = %event.webhook_event,
      "project configuration changed, purging project cache"
    );
    purge_entry(&self.cache, &project_list_url(&self.base_url))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Ttl;
  use crate::db::Database;
  use crate::error::RelayError;
  use crate::jira::types::Issue;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Mutex;

  const BASE_URL: &str = "https://jira.example.com";

  struct RecordingRouter {
    calls: Mutex<Vec<(String, bool)>>,
    cache: Arc<IssueCache>,
    watched_key: String,
    saw_cached_detail: AtomicBool,
    fail: bool,
  }

  impl RecordingRouter {
    fn new(cache: Arc<IssueCache>, watched_key: &str) -> Self {
      Self {
        calls: Mutex::new(Vec::new()),
        cache,
        watched_key: watched_key.to_string(),
        saw_cached_detail: AtomicBool::new(false),
        fail: false,
      }
    }
  }

  #[async_trait]
  impl EventRouter for RecordingRouter {
    async fn route(&self, event: &IssueEvent, is_new: bool) -> Result<()> {
      if self.fail {
        return Err(RelayError::TrackerUnreachable("detail fetch failed".to_string()));
      }
      if self
        .cache
        .get::<String>(&self.watched_key)
        .unwrap()
        .is_some()
      {
        self.saw_cached_detail.store(true, Ordering::SeqCst);
      }
      self
        .calls
        .lock()
        .unwrap()
        .push((event.webhook_event.clone(), is_new));
      Ok(())
    }
  }

  fn event_for(key: &str, webhook_event: &str) -> IssueEvent {
    IssueEvent {
      timestamp: None,
      webhook_event: webhook_event.to_string(),
      issue_event_type_name: None,
      user: None,
      issue: Some(Issue {
        id: "10002".to_string(),
        key: key.to_string(),
        self_url: format!("{BASE_URL}/rest/api/2/issue/10002"),
        fields: None,
        changelog: None,
      }),
      comment: None,
      changelog: None,
    }
  }

  fn detail_key() -> String {
    format!("{BASE_URL}/rest/api/2/issue/10002{CHANGELOG_SUFFIX}")
  }

  fn coordinator_with(
    cache: Arc<IssueCache>,
    log: Arc<Database>,
    router: Arc<RecordingRouter>,
  ) -> EventCoordinator {
    EventCoordinator::new(cache, log, router, BASE_URL, "ws1")
  }

  #[tokio::test]
  async fn test_replays_history_then_routes_new_event() {
    let cache = Arc::new(IssueCache::new(300));
    let log = Arc::new(Database::open_in_memory().unwrap());
    log.append("ws1", &event_for("ABC-1", "jira:issue_created")).unwrap();
    log.append("ws1", &event_for("ABC-1", "jira:issue_updated")).unwrap();
    let router = Arc::new(RecordingRouter::new(Arc::clone(&cache), &detail_key()));
    let coordinator = coordinator_with(cache, log, Arc::clone(&router));

    coordinator
      .handle(&event_for("ABC-1", "jira:issue_updated"))
      .await
      .unwrap();

    let calls = router.calls.lock().unwrap();
    assert_eq!(
      calls.as_slice(),
      &[
        ("jira:issue_created".to_string(), false),
        ("jira:issue_updated".to_string(), false),
        ("jira:issue_updated".to_string(), true),
      ]
    );
  }

  #[tokio::test]
  async fn test_detail_purged_before_any_route() {
    let cache = Arc::new(IssueCache::new(300));
    cache.set(&detail_key(), &"stale detail", Ttl::Default).unwrap();
    let log = Arc::new(Database::open_in_memory().unwrap());
    log.append("ws1", &event_for("ABC-1", "jira:issue_created")).unwrap();
    let router = Arc::new(RecordingRouter::new(Arc::clone(&cache), &detail_key()));
    let coordinator = coordinator_with(cache, log, Arc::clone(&router));

    coordinator
      .handle(&event_for("ABC-1", "jira:issue_updated"))
      .await
      .unwrap();

    assert!(!router.saw_cached_detail.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_handled_event_is_recorded_for_future_replays() {
    let cache = Arc::new(IssueCache::new(300));
    let log = Arc::new(Database::open_in_memory().unwrap());
    let router = Arc::new(RecordingRouter::new(Arc::clone(&cache), &detail_key()));
    let coordinator = coordinator_with(cache, Arc::clone(&log), Arc::clone(&router));

    coordinator
      .handle(&event_for("ABC-1", "jira:issue_created"))
      .await
      .unwrap();
    coordinator
      .handle(&event_for("ABC-1", "jira:issue_updated"))
      .await
      .unwrap();

    // Second invocation replays the first event before routing its own.
    let calls = router.calls.lock().unwrap();
    assert_eq!(
      calls.as_slice(),
      &[
        ("jira:issue_created".to_string(), true),
        ("jira:issue_created".to_string(), false),
        ("jira:issue_updated".to_string(), true),
      ]
    );
    assert_eq!(log.events_for_key("ws1", "ABC-1").unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_routing_failure_leaves_event_unrecorded() {
    // The transport retries failed invocations; recording the event only
    // after successful routing keeps the retry from replaying it twice.
    let cache = Arc::new(IssueCache::new(300));
    let log = Arc::new(Database::open_in_memory().unwrap());
    let mut router = RecordingRouter::new(Arc::clone(&cache), &detail_key());
    router.fail = true;
    let coordinator = coordinator_with(cache, Arc::clone(&log), Arc::new(router));

    let result = coordinator.handle(&event_for("ABC-1", "jira:issue_updated")).await;

    assert!(matches!(result, Err(RelayError::TrackerUnreachable(_))));
    assert!(log.events_for_key("ws1", "ABC-1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_event_without_issue_is_noop_success() {
    let cache = Arc::new(IssueCache::new(300));
    let log = Arc::new(Database::open_in_memory().unwrap());
    let router = Arc::new(RecordingRouter::new(Arc::clone(&cache), &detail_key()));
    let coordinator = coordinator_with(cache, log, Arc::clone(&router));

    let mut event = event_for("ABC-1", "jira:issue_updated");
    event.issue = None;
    coordinator.handle(&event).await.unwrap();

    assert!(router.calls.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_project_event_purges_project_list() {
    let cache = Arc::new(IssueCache::new(300));
    let project_key = project_list_url(BASE_URL);
    cache.set(&project_key, &"project list", Ttl::Default).unwrap();
    let log = Arc::new(Database::open_in_memory().unwrap());
    let router = Arc::new(RecordingRouter::new(Arc::clone(&cache), &detail_key()));
    let coordinator = coordinator_with(Arc::clone(&cache), log, router);

    coordinator
      .handle_project_event(&event_for("ABC-1", "project_updated"))
      .unwrap();
    assert_eq!(cache.get::<String>(&project_key).unwrap(), None);

    // Non-project events leave the cache alone.
    cache.set(&project_key, &"project list", Ttl::Default).unwrap();
    coordinator
      .handle_project_event(&event_for("ABC-1", "jira:issue_updated"))
      .unwrap();
    assert!(cache.get::<String>(&project_key).unwrap().is_some());
  }
}
