//! Management operations on the process-wide cache.
//!
//! These wrap the raw cache calls with logging and make sure a failing
//! cache is reported to the caller instead of taking down the event path.
//! Purge and flush are best-effort; a stale entry is indistinguishable
//! from a miss on the next read.

use tracing::{error, info};

use crate::error::Result;

use super::store::{CacheStats, IssueCache};

/// Purge a single entry. The caller is responsible for passing the exact
/// key used at write time.
pub fn purge_entry(cache: &IssueCache, key: &str) -> Result<()> {
  match cache.delete(key) {
    Ok(deleted) => {
      info!(key, deleted, "purged cache entry");
      Ok(())
    }
    Err(e) => {
      error!(key, error = %e, "failed to purge cache entry");
      Err(e)
    }
  }
}

/// Delete every cache entry. Used for administrative reset.
pub fn flush_cache(cache: &IssueCache) -> Result<()> {
  match cache.flush_all() {
    Ok(()) => {
      info!("flushed all cache entries");
      Ok(())
    }
    Err(e) => {
      error!(error = %e, "failed to flush cache");
      Err(e)
    }
  }
}

/// Usage snapshot for operational visibility.
pub fn cache_stats(cache: &IssueCache) -> Result<CacheStats> {
  cache.stats().map_err(|e| {
    error!(error = %e, "failed to retrieve cache stats");
    e
  })
}
