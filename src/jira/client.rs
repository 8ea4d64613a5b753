use async_trait::async_trait;
use color_eyre::eyre::eyre;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{IssueCache, Ttl};
use crate::config::Config;
use crate::error::{RelayError, Result};

use super::types::{DevStatusResponse, Issue};

/// The tracker operations the routing core depends on. Implemented by the
/// REST client below; tests swap in fakes.
#[async_trait]
pub trait Tracker: Send + Sync {
  /// Authoritative issue detail fetched by canonical URL, optionally
  /// served from and written through the cache.
  async fn issue_detail(&self, url: &str, use_cache: bool, ttl_seconds: Option<u64>)
    -> Result<Issue>;

  /// Names of the source repositories linked to an issue.
  async fn issue_repos(&self, issue_id: &str) -> Result<Vec<String>>;
}

/// Jira REST client with read-through caching of detail fetches.
#[derive(Clone)]
pub struct JiraClient {
  http: reqwest::Client,
  base_url: String,
  user: String,
  token: String,
  vcs_type: String,
  cache: Arc<IssueCache>,
  cache_enabled: bool,
}

impl JiraClient {
  pub fn new(config: &Config, cache: Arc<IssueCache>) -> color_eyre::Result<Self> {
    let token = Config::get_api_token()?;

    // Validate the base URL up front; every request URL derives from it.
    Url::parse(&config.jira.url)
      .map_err(|e| eyre!("Invalid Jira URL {}: {}", config.jira.url, e))?;

    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: config.jira.url.trim_end_matches('/').to_string(),
      user: config.jira.user.clone(),
      token,
      vcs_type: config.jira.vcs_type.clone(),
      cache,
      cache_enabled: config.cache.enabled,
    })
  }

  /// Fetch and deserialize `url`, keyed in the cache by the URL itself.
  ///
  /// Cache reads and writes degrade to plain fetches when the cache
  /// fails; only the HTTP round trip itself can fail the call.
  pub async fn get_detail<T>(&self, url: &str, use_cache: bool, ttl_seconds: Option<u64>) -> Result<T>
  where
    T: DeserializeOwned + Serialize,
  {
    if use_cache && self.cache_enabled {
      match self.cache.get::<T>(url) {
        Ok(Some(cached)) => {
          debug!(url, "detail fetch: cache hit, re-using value");
          return Ok(cached);
        }
        Ok(None) => debug!(url, "detail fetch: cache miss, querying"),
        Err(e) => warn!(url, error = %e, "detail cache read failed, fetching"),
      }
    }

    let response = self
      .http
      .get(url)
      .basic_auth(&self.user, Some(&self.token))
      .send()
      .await
      .map_err(|e| RelayError::TrackerUnreachable(format!("GET {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
      return Err(RelayError::TrackerUnreachable(format!(
        "GET {url}: status {status}"
      )));
    }

    let value: T = response
      .json()
      .await
      .map_err(|e| RelayError::TrackerUnreachable(format!("decode {url}: {e}")))?;

    if use_cache && self.cache_enabled {
      let ttl = ttl_seconds.map(Ttl::Seconds).unwrap_or(Ttl::Default);
      if let Err(e) = self.cache.set(url, &value, ttl) {
        warn!(url, error = %e, "detail cache write failed, continuing");
      }
    }

    Ok(value)
  }

  fn dev_status_url(&self, issue_id: &str) -> String {
    format!(
      "{}/rest/dev-status/1.0/issue/detail?issueId={}&applicationType={}&dataType=repository",
      self.base_url, issue_id, self.vcs_type
    )
  }
}

#[async_trait]
impl Tracker for JiraClient {
  async fn issue_detail(
    &self,
    url: &str,
    use_cache: bool,
    ttl_seconds: Option<u64>,
  ) -> Result<Issue> {
    self.get_detail(url, use_cache, ttl_seconds).await
  }

  async fn issue_repos(&self, issue_id: &str) -> Result<Vec<String>> {
    let url = self.dev_status_url(issue_id);
    let response: DevStatusResponse = self.get_detail(&url, true, Some(30)).await?;
    Ok(response.repository_names())
  }
}
