//! In-process TTL cache backing every cache-aside lookup.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::error::{RelayError, Result};

/// Per-call TTL selector.
///
/// `Default` (and an explicit zero) defer to the cache-wide default;
/// `Never` is an opt-in sentinel for entries that must survive until an
/// explicit purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
  Default,
  Seconds(u64),
  Never,
}

/// Usage counters for the cache, recomputed on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub keys: usize,
  pub evictions: u64,
}

struct Entry {
  value: serde_json::Value,
  expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
  entries: HashMap<String, Entry>,
  hits: u64,
  misses: u64,
  evictions: u64,
}

/// Process-wide key/value cache with per-entry TTL.
///
/// Values are stored as serialized JSON so heterogeneous payloads share a
/// single store. Every entry is reconstructible from the backing store, so
/// flushing or evicting at any point loses no data. Expiry is checked
/// lazily on read; there is no background sweep.
pub struct IssueCache {
  inner: Mutex<Inner>,
  /// None means entries never expire by default.
  default_ttl: Option<Duration>,
}

impl IssueCache {
  /// Create a cache whose unspecified-TTL entries live `default_ttl_seconds`.
  /// A value of 0 disables default expiry.
  pub fn new(default_ttl_seconds: u64) -> Self {
    let default_ttl = if default_ttl_seconds == 0 {
      None
    } else {
      Some(Duration::seconds(default_ttl_seconds as i64))
    };
    Self {
      inner: Mutex::new(Inner::default()),
      default_ttl,
    }
  }

  /// Fetch and deserialize the live value for `key`. A missing or expired
  /// entry is a miss, not an error.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    let mut inner = self.lock()?;

    let expired = match inner.entries.get(key) {
      Some(entry) => entry
        .expires_at
        .map(|at| Utc::now() >= at)
        .unwrap_or(false),
      None => {
        inner.misses += 1;
        return Ok(None);
      }
    };

    if expired {
      inner.entries.remove(key);
      inner.evictions += 1;
      inner.misses += 1;
      return Ok(None);
    }

    let entry = inner.entries.get(key).expect("checked above");
    match serde_json::from_value(entry.value.clone()) {
      Ok(value) => {
        inner.hits += 1;
        Ok(Some(value))
      }
      Err(e) => {
        // A value that no longer deserializes is as good as absent; drop
        // it so the next read repopulates from the backing store.
        debug!(key, error = %e, "dropping undecodable cache entry");
        inner.entries.remove(key);
        inner.evictions += 1;
        inner.misses += 1;
        Ok(None)
      }
    }
  }

  /// Store `value` under `key`, replacing any prior value and resetting
  /// expiry.
  pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Ttl) -> Result<()> {
    let value = serde_json::to_value(value)
      .map_err(|e| RelayError::CacheUnavailable(format!("serialize {key}: {e}")))?;

    let expires_at = match ttl {
      Ttl::Default | Ttl::Seconds(0) => self.default_ttl.map(|d| Utc::now() + d),
      Ttl::Seconds(secs) => Some(Utc::now() + Duration::seconds(secs as i64)),
      Ttl::Never => None,
    };

    let mut inner = self.lock()?;
    inner
      .entries
      .insert(key.to_string(), Entry { value, expires_at });
    Ok(())
  }

  /// Remove `key`, returning how many entries were removed (0 or 1).
  pub fn delete(&self, key: &str) -> Result<usize> {
    let mut inner = self.lock()?;
    Ok(match inner.entries.remove(key) {
      Some(_) => 1,
      None => 0,
    })
  }

  /// Drop every entry. Counters survive a flush.
  pub fn flush_all(&self) -> Result<()> {
    let mut inner = self.lock()?;
    inner.entries.clear();
    Ok(())
  }

  /// Snapshot of usage counters. Expired entries are swept here so the key
  /// count only reflects live values.
  pub fn stats(&self) -> Result<CacheStats> {
    let mut inner = self.lock()?;

    let now = Utc::now();
    let before = inner.entries.len();
    inner
      .entries
      .retain(|_, entry| entry.expires_at.map(|at| now < at).unwrap_or(true));
    inner.evictions += (before - inner.entries.len()) as u64;

    Ok(CacheStats {
      hits: inner.hits,
      misses: inner.misses,
      keys: inner.entries.len(),
      evictions: inner.evictions,
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
    self
      .inner
      .lock()
      .map_err(|e| RelayError::CacheUnavailable(format!("lock poisoned: {e}")))
  }

  /// Force `key` to be expired, as if its TTL had elapsed.
  #[cfg(test)]
  pub(crate) fn expire_now(&self, key: &str) {
    let mut inner = self.inner.lock().unwrap();
    if let Some(entry) = inner.entries.get_mut(key) {
      entry.expires_at = Some(Utc::now() - Duration::seconds(1));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_set_get_roundtrip() {
    let cache = IssueCache::new(60);
    cache.set("k1", &vec!["a".to_string()], Ttl::Default).unwrap();

    let got: Option<Vec<String>> = cache.get("k1").unwrap();
    assert_eq!(got, Some(vec!["a".to_string()]));
  }

  #[test]
  fn test_get_missing_is_miss_not_error() {
    let cache = IssueCache::new(60);
    let got: Option<String> = cache.get("absent").unwrap();
    assert_eq!(got, None);

    let stats = cache.stats().unwrap();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 0);
  }

  #[test]
  fn test_set_replaces_prior_value() {
    let cache = IssueCache::new(60);
    cache.set("k", &1u32, Ttl::Default).unwrap();
    cache.set("k", &2u32, Ttl::Default).unwrap();

    assert_eq!(cache.get::<u32>("k").unwrap(), Some(2));
    assert_eq!(cache.stats().unwrap().keys, 1);
  }

  #[test]
  fn test_expired_entry_is_evicted_on_read() {
    let cache = IssueCache::new(60);
    cache.set("k", &"v", Ttl::Seconds(30)).unwrap();
    cache.expire_now("k");

    assert_eq!(cache.get::<String>("k").unwrap(), None);

    let stats = cache.stats().unwrap();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.keys, 0);
  }

  #[test]
  fn test_never_ttl_survives_default_expiry() {
    // Default TTL of zero means no default expiry either way; exercise the
    // sentinel against a cache that does expire by default.
    let cache = IssueCache::new(1);
    cache.set("pinned", &"v", Ttl::Never).unwrap();
    cache.set("ttl", &"v", Ttl::Default).unwrap();
    cache.expire_now("ttl");

    assert_eq!(cache.get::<String>("pinned").unwrap(), Some("v".to_string()));
    assert_eq!(cache.get::<String>("ttl").unwrap(), None);
  }

  #[test]
  fn test_zero_ttl_uses_default() {
    // Explicit zero defers to the cache default rather than expiring
    // immediately.
    let cache = IssueCache::new(3600);
    cache.set("k", &"v", Ttl::Seconds(0)).unwrap();
    assert_eq!(cache.get::<String>("k").unwrap(), Some("v".to_string()));
  }

  #[test]
  fn test_delete_missing_returns_zero() {
    let cache = IssueCache::new(60);
    assert_eq!(cache.delete("nope").unwrap(), 0);

    cache.set("k", &"v", Ttl::Default).unwrap();
    assert_eq!(cache.delete("k").unwrap(), 1);
    assert_eq!(cache.get::<String>("k").unwrap(), None);
  }

  #[test]
  fn test_flush_all_empties_cache() {
    let cache = IssueCache::new(60);
    cache.set("a", &1u32, Ttl::Default).unwrap();
    cache.set("b", &2u32, Ttl::Default).unwrap();

    cache.flush_all().unwrap();

    assert_eq!(cache.get::<u32>("anykey").unwrap(), None);
    assert_eq!(cache.stats().unwrap().keys, 0);
  }

  #[test]
  fn test_stats_counts_hits_and_misses() {
    let cache = IssueCache::new(60);
    cache.set("k", &"v", Ttl::Default).unwrap();

    let _: Option<String> = cache.get("k").unwrap();
    let _: Option<String> = cache.get("k").unwrap();
    let _: Option<String> = cache.get("other").unwrap();

    let stats = cache.stats().unwrap();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.keys, 1);
  }

  #[test]
  fn test_concurrent_access() {
    use std::sync::Arc;

    let cache = Arc::new(IssueCache::new(60));
    let mut handles = Vec::new();
    for i in 0..8 {
      let cache = Arc::clone(&cache);
      handles.push(std::thread::spawn(move || {
        for j in 0..100 {
          let key = format!("k{}", j % 10);
          cache.set(&key, &i, Ttl::Default).unwrap();
          let _: Option<u32> = cache.get(&key).unwrap();
        }
      }));
    }
    for h in handles {
      h.join().unwrap();
    }

    assert_eq!(cache.stats().unwrap().keys, 10);
  }
}
