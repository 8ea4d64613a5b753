//! Cache-aside lookups for channel mappings and notification preferences.
//!
//! Every lookup derives a stable cache key, consults the cache when the
//! runtime toggle allows it, and otherwise queries the backing store and
//! repopulates the cache on the way out. The store stays the single source
//! of truth; a flushed or stale cache only costs an extra query.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::MappingStore;
use crate::error::Result;

use super::store::{IssueCache, Ttl};

/// Durable link from a chat channel to a tracker project, optionally
/// narrowed to one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMapping {
  pub channel: String,
  pub project_id: String,
  pub component_id: Option<String>,
  pub active: bool,
}

/// Per-channel notification switches: which event kinds and which issue
/// types produce a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPreference {
  pub channel: String,
  pub issue_comment: bool,
  pub issue_deleted: bool,
  pub issue_created: bool,
  pub issue_state: bool,
  pub issue_status: bool,
  pub bug: bool,
  pub task: bool,
  pub epic: bool,
  pub story: bool,
  pub subtask: bool,
}

impl ChannelPreference {
  /// Preference applied to channels that never configured one: everything
  /// on, so a freshly mapped channel starts receiving notifications.
  pub fn default_for(channel: &str) -> Self {
    Self {
      channel: channel.to_string(),
      issue_comment: true,
      issue_deleted: true,
      issue_created: true,
      issue_state: true,
      issue_status: true,
      bug: true,
      task: true,
      epic: true,
      story: true,
      subtask: true,
    }
  }
}

/// Search criteria for mapping lookups. Absent fields impose no
/// constraint; a mapping matches when every provided field is equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingFilter {
  pub project_id: Option<String>,
  pub component_id: Option<String>,
  pub channel: Option<String>,
}

impl MappingFilter {
  pub fn for_project(project_id: &str) -> Self {
    Self {
      project_id: Some(project_id.to_string()),
      ..Self::default()
    }
  }

  pub fn for_component(project_id: &str, component_id: &str) -> Self {
    Self {
      project_id: Some(project_id.to_string()),
      component_id: Some(component_id.to_string()),
      ..Self::default()
    }
  }

  pub fn for_channel(channel: &str) -> Self {
    Self {
      channel: Some(channel.to_string()),
      ..Self::default()
    }
  }

  pub fn matches(&self, mapping: &ChannelMapping) -> bool {
    self
      .project_id
      .as_ref()
      .map(|p| *p == mapping.project_id)
      .unwrap_or(true)
      && self
        .component_id
        .as_ref()
        .map(|c| Some(c) == mapping.component_id.as_ref())
        .unwrap_or(true)
      && self
        .channel
        .as_ref()
        .map(|c| *c == mapping.channel)
        .unwrap_or(true)
  }
}

/// Read-through lookups over the backing mapping/preference store.
#[derive(Clone)]
pub struct CachedLookup {
  cache: Arc<IssueCache>,
  store: Arc<dyn MappingStore>,
  workspace_id: String,
  enabled: bool,
}

impl CachedLookup {
  pub fn new(
    cache: Arc<IssueCache>,
    store: Arc<dyn MappingStore>,
    workspace_id: impl Into<String>,
    enabled: bool,
  ) -> Self {
    Self {
      cache,
      store,
      workspace_id: workspace_id.into(),
      enabled,
    }
  }

  /// Look up the notification preference for `channel`, substituting the
  /// default when the store has none.
  pub async fn preference(&self, channel: &str) -> Result<ChannelPreference> {
    let key = self.preference_key(channel);

    if let Some(cached) = self.cache_get::<ChannelPreference>(&key) {
      debug!(key, "preference lookup: cache hit, re-using value");
      return Ok(cached);
    }

    debug!(
      key,
      cache = if self.enabled { "miss" } else { "disabled" },
      "preference lookup: querying store"
    );
    let preference = self
      .store
      .get_preference(&self.workspace_id, channel)?
      .unwrap_or_else(|| ChannelPreference::default_for(channel));

    self.cache_set(&key, &preference);
    Ok(preference)
  }

  /// Fetch the mappings matching `filter`. On a miss the full mapping set
  /// for the workspace is fetched and filtered in memory, and the filtered
  /// slice is what gets cached.
  pub async fn mappings(&self, filter: &MappingFilter) -> Result<Vec<ChannelMapping>> {
    let key = self.mapping_key(filter);

    if let Some(cached) = self.cache_get::<Vec<ChannelMapping>>(&key) {
      debug!(key, "mapping lookup: cache hit, re-using value");
      return Ok(cached);
    }

    debug!(
      key,
      cache = if self.enabled { "miss" } else { "disabled" },
      "mapping lookup: querying store"
    );
    let all = self.store.list_mappings(&self.workspace_id)?;
    let filtered: Vec<ChannelMapping> = all.into_iter().filter(|m| filter.matches(m)).collect();

    self.cache_set(&key, &filtered);
    Ok(filtered)
  }

  /// Channels bound to a source repository, for dynamic channel discovery.
  pub async fn repo_channels(&self, repo: &str) -> Result<Vec<String>> {
    let key = self.repo_key(repo);

    if let Some(cached) = self.cache_get::<Vec<String>>(&key) {
      debug!(key, "repo channel lookup: cache hit, re-using value");
      return Ok(cached);
    }

    debug!(
      key,
      cache = if self.enabled { "miss" } else { "disabled" },
      "repo channel lookup: querying store"
    );
    let channels = self.store.channels_for_repo(&self.workspace_id, repo)?;

    self.cache_set(&key, &channels);
    Ok(channels)
  }

  fn preference_key(&self, channel: &str) -> String {
    format!("{}-preferences-{}", self.workspace_id, channel)
  }

  /// Stable hash over the filter fields. The rendering order is fixed, so
  /// equal filters always map to the same key regardless of how they were
  /// built.
  fn mapping_key(&self, filter: &MappingFilter) -> String {
    hash_key(&format!(
      "mappings|ws={}|project={}|component={}|channel={}",
      self.workspace_id,
      filter.project_id.as_deref().unwrap_or(""),
      filter.component_id.as_deref().unwrap_or(""),
      filter.channel.as_deref().unwrap_or(""),
    ))
  }

  fn repo_key(&self, repo: &str) -> String {
    hash_key(&format!("repo-channels|ws={}|repo={}", self.workspace_id, repo))
  }

  /// Cache read that degrades to a miss: when the toggle is off nothing is
  /// consulted, and a failing cache is logged and treated as empty.
  fn cache_get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
    if !self.enabled {
      return None;
    }
    match self.cache.get::<T>(key) {
      Ok(value) => value,
      Err(e) => {
        warn!(key, error = %e, "cache read failed, falling back to store");
        None
      }
    }
  }

  fn cache_set<T: Serialize>(&self, key: &str, value: &T) {
    if !self.enabled {
      return;
    }
    if let Err(e) = self.cache.set(key, value, Ttl::Default) {
      warn!(key, error = %e, "cache write failed, continuing without");
    }
  }
}

fn hash_key(input: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::MappingStore;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct FakeStore {
    mappings: Vec<ChannelMapping>,
    preference: Option<ChannelPreference>,
    repo_channels: Vec<String>,
    list_calls: AtomicUsize,
    preference_calls: AtomicUsize,
  }

  impl FakeStore {
    fn with_mappings(mappings: Vec<ChannelMapping>) -> Self {
      Self {
        mappings,
        preference: None,
        repo_channels: Vec::new(),
        list_calls: AtomicUsize::new(0),
        preference_calls: AtomicUsize::new(0),
      }
    }
  }

  impl MappingStore for FakeStore {
    fn list_mappings(&self, _workspace: &str) -> Result<Vec<ChannelMapping>> {
      self.list_calls.fetch_add(1, Ordering::SeqCst);
      Ok(self.mappings.clone())
    }

    fn get_preference(&self, _workspace: &str, _channel: &str) -> Result<Option<ChannelPreference>> {
      self.preference_calls.fetch_add(1, Ordering::SeqCst);
      Ok(self.preference.clone())
    }

    fn channels_for_repo(&self, _workspace: &str, _repo: &str) -> Result<Vec<String>> {
      Ok(self.repo_channels.clone())
    }
  }

  fn mapping(channel: &str, project: &str, component: Option<&str>) -> ChannelMapping {
    ChannelMapping {
      channel: channel.to_string(),
      project_id: project.to_string(),
      component_id: component.map(String::from),
      active: true,
    }
  }

  fn lookup_with(store: FakeStore, enabled: bool) -> (CachedLookup, Arc<FakeStore>) {
    let store = Arc::new(store);
    let cache = Arc::new(IssueCache::new(300));
    (
      CachedLookup::new(cache, Arc::clone(&store) as Arc<dyn MappingStore>, "ws1", enabled),
      store,
    )
  }

  #[tokio::test]
  async fn test_mappings_second_call_served_from_cache() {
    let (lookup, store) = lookup_with(
      FakeStore::with_mappings(vec![mapping("C1", "P1", None)]),
      true,
    );
    let filter = MappingFilter::for_project("P1");

    let first = lookup.mappings(&filter).await.unwrap();
    let second = lookup.mappings(&filter).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_mappings_cache_disabled_always_queries() {
    let (lookup, store) = lookup_with(
      FakeStore::with_mappings(vec![mapping("C1", "P1", None)]),
      false,
    );
    let filter = MappingFilter::for_project("P1");

    lookup.mappings(&filter).await.unwrap();
    lookup.mappings(&filter).await.unwrap();

    assert_eq!(store.list_calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_empty_filter_returns_full_workspace_set() {
    let (lookup, _) = lookup_with(
      FakeStore::with_mappings(vec![
        mapping("C1", "P1", None),
        mapping("C2", "P2", Some("X")),
      ]),
      true,
    );

    let all = lookup.mappings(&MappingFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
  }

  #[tokio::test]
  async fn test_filter_matches_only_provided_fields() {
    let (lookup, _) = lookup_with(
      FakeStore::with_mappings(vec![
        mapping("C1", "P1", None),
        mapping("C2", "P1", Some("X")),
        mapping("C3", "P2", Some("X")),
      ]),
      true,
    );

    let by_project = lookup
      .mappings(&MappingFilter::for_project("P1"))
      .await
      .unwrap();
    assert_eq!(
      by_project.iter().map(|m| m.channel.as_str()).collect::<Vec<_>>(),
      vec!["C1", "C2"]
    );

    let by_component = lookup
      .mappings(&MappingFilter::for_component("P1", "X"))
      .await
      .unwrap();
    assert_eq!(
      by_component.iter().map(|m| m.channel.as_str()).collect::<Vec<_>>(),
      vec!["C2"]
    );

    let by_channel = lookup
      .mappings(&MappingFilter::for_channel("C3"))
      .await
      .unwrap();
    assert_eq!(by_channel.len(), 1);
    assert_eq!(by_channel[0].project_id, "P2");
  }

  #[tokio::test]
  async fn test_cached_filtered_fetch_matches_in_memory_filter() {
    // Applying the filter against a full fetch and reading the cached
    // filtered slice must agree for a fixed store state.
    let mappings = vec![
      mapping("C1", "P1", None),
      mapping("C2", "P1", Some("X")),
      mapping("C3", "P2", None),
    ];
    let (lookup, _) = lookup_with(FakeStore::with_mappings(mappings.clone()), true);
    let filter = MappingFilter::for_project("P1");

    let via_store = lookup.mappings(&filter).await.unwrap();
    let via_cache = lookup.mappings(&filter).await.unwrap();
    let in_memory: Vec<ChannelMapping> =
      mappings.into_iter().filter(|m| filter.matches(m)).collect();

    assert_eq!(via_store, in_memory);
    assert_eq!(via_cache, in_memory);
  }

  #[tokio::test]
  async fn test_preference_default_when_store_empty() {
    let (lookup, store) = lookup_with(FakeStore::with_mappings(Vec::new()), true);

    let pref = lookup.preference("general").await.unwrap();

    assert_eq!(pref, ChannelPreference::default_for("general"));
    assert_eq!(store.preference_calls.load(Ordering::SeqCst), 1);

    // Default gets cached too, so the store is not re-queried.
    lookup.preference("general").await.unwrap();
    assert_eq!(store.preference_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_preference_returns_stored_value() {
    let mut store = FakeStore::with_mappings(Vec::new());
    let mut stored = ChannelPreference::default_for("dev");
    stored.issue_comment = false;
    store.preference = Some(stored.clone());
    let (lookup, _) = lookup_with(store, true);

    let pref = lookup.preference("dev").await.unwrap();
    assert_eq!(pref, stored);
  }

  #[tokio::test]
  async fn test_repo_channels_cached() {
    let mut store = FakeStore::with_mappings(Vec::new());
    store.repo_channels = vec!["ops".to_string()];
    let (lookup, _) = lookup_with(store, true);

    assert_eq!(lookup.repo_channels("api").await.unwrap(), vec!["ops"]);
    assert_eq!(lookup.repo_channels("api").await.unwrap(), vec!["ops"]);
  }

  #[test]
  fn test_mapping_key_is_stable_and_discriminating() {
    let (lookup, _) = lookup_with(FakeStore::with_mappings(Vec::new()), true);

    let a = lookup.mapping_key(&MappingFilter::for_project("P1"));
    let b = lookup.mapping_key(&MappingFilter::for_project("P1"));
    let c = lookup.mapping_key(&MappingFilter::for_project("P2"));
    let d = lookup.mapping_key(&MappingFilter::for_component("P1", "X"));

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_ne!(a, d);
  }
}
