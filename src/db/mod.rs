//! Backing store for channel mappings, preferences and received events.
//!
//! The store is the sole source of truth behind the cache; the traits are
//! the seams the core depends on, with SQLite as the bundled
//! implementation.

pub mod schema;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::cache::{ChannelMapping, ChannelPreference};
use crate::error::{RelayError, Result};
use crate::jira::types::IssueEvent;

/// Read interface over the mapping/preference store.
pub trait MappingStore: Send + Sync {
  /// Every mapping for the workspace; filtering happens in the caller.
  fn list_mappings(&self, workspace: &str) -> Result<Vec<ChannelMapping>>;

  /// The stored preference for a channel, if one was ever configured.
  fn get_preference(&self, workspace: &str, channel: &str) -> Result<Option<ChannelPreference>>;

  /// Channels linked to a source repository.
  fn channels_for_repo(&self, workspace: &str, repo: &str) -> Result<Vec<String>>;
}

/// Append-only log of accepted webhook events, queried back by issue key
/// for replay.
pub trait EventLog: Send + Sync {
  fn append(&self, workspace: &str, event: &IssueEvent) -> Result<()>;

  /// Events previously recorded for `issue_key`, oldest first.
  fn events_for_key(&self, workspace: &str, issue_key: &str) -> Result<Vec<IssueEvent>>;
}

/// SQLite-backed store and event log.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database, at `path` when given, otherwise at the
  /// default platform data location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        RelayError::BackingStoreQueryFailed(format!("create database directory: {e}"))
      })?;
    }

    let conn = Connection::open(&path).map_err(|e| {
      RelayError::BackingStoreQueryFailed(format!("open database at {}: {e}", path.display()))
    })?;

    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations()?;

    Ok(db)
  }

  /// In-memory database, useful for tests and dry runs.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("open in-memory database: {e}")))?;
    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations()?;
    Ok(db)
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        RelayError::BackingStoreQueryFailed("could not determine data directory".to_string())
      })?;

    Ok(data_dir.join("jira-relay").join("relay.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("run migrations: {e}")))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("lock poisoned: {e}")))
  }

  /// Insert or replace a channel mapping.
  pub fn upsert_mapping(&self, workspace: &str, mapping: &ChannelMapping) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO channel_mappings (workspace, channel, project_id, component_id, active)
         VALUES (?, ?, ?, ?, ?)",
        params![
          workspace,
          mapping.channel,
          mapping.project_id,
          mapping.component_id,
          mapping.active as i64
        ],
      )
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("upsert mapping: {e}")))?;
    Ok(())
  }

  /// Store a channel's notification preference.
  pub fn set_preference(&self, workspace: &str, preference: &ChannelPreference) -> Result<()> {
    let data = serde_json::to_vec(preference)
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("serialize preference: {e}")))?;

    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO channel_preferences (workspace, channel, data, updated_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![workspace, preference.channel, data],
      )
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("store preference: {e}")))?;
    Ok(())
  }

  /// Link a repository to a channel for dynamic discovery.
  pub fn map_repo_channel(&self, workspace: &str, repo: &str, channel: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO repo_channels (workspace, repo, channel) VALUES (?, ?, ?)",
        params![workspace, repo, channel],
      )
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("map repo channel: {e}")))?;
    Ok(())
  }
}

impl MappingStore for Database {
  fn list_mappings(&self, workspace: &str) -> Result<Vec<ChannelMapping>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT channel, project_id, component_id, active FROM channel_mappings
         WHERE workspace = ? ORDER BY channel, project_id",
      )
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("prepare mapping query: {e}")))?;

    let rows = stmt
      .query_map(params![workspace], |row| {
        Ok(ChannelMapping {
          channel: row.get(0)?,
          project_id: row.get(1)?,
          component_id: row.get(2)?,
          active: row.get::<_, i64>(3)? != 0,
        })
      })
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("query mappings: {e}")))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("read mapping row: {e}")))?;

    Ok(rows)
  }

  fn get_preference(&self, workspace: &str, channel: &str) -> Result<Option<ChannelPreference>> {
    let conn = self.lock()?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM channel_preferences WHERE workspace = ? AND channel = ?",
        params![workspace, channel],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("query preference: {e}")))?;

    match data {
      Some(data) => serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| RelayError::BackingStoreQueryFailed(format!("decode preference: {e}"))),
      None => Ok(None),
    }
  }

  fn channels_for_repo(&self, workspace: &str, repo: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT channel FROM repo_channels WHERE workspace = ? AND repo = ? ORDER BY channel")
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("prepare repo query: {e}")))?;

    let rows = stmt
      .query_map(params![workspace, repo], |row| row.get(0))
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("query repo channels: {e}")))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("read repo row: {e}")))?;

    Ok(rows)
  }
}

impl EventLog for Database {
  fn append(&self, workspace: &str, event: &IssueEvent) -> Result<()> {
    let issue_key = match event.issue.as_ref() {
      Some(issue) => issue.key.clone(),
      None => {
        // Events without an issue cannot be replayed; nothing to record.
        warn!("skipping event log append, event has no issue");
        return Ok(());
      }
    };

    let payload = serde_json::to_vec(event)
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("serialize event: {e}")))?;

    let conn = self.lock()?;
    conn
      .execute(
        "INSERT INTO issue_events (workspace, issue_key, received_at, payload)
         VALUES (?, ?, ?, ?)",
        params![workspace, issue_key, Utc::now().to_rfc3339(), payload],
      )
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("append event: {e}")))?;
    Ok(())
  }

  fn events_for_key(&self, workspace: &str, issue_key: &str) -> Result<Vec<IssueEvent>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT payload FROM issue_events WHERE workspace = ? AND issue_key = ? ORDER BY id",
      )
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("prepare event query: {e}")))?;

    let payloads = stmt
      .query_map(params![workspace, issue_key], |row| row.get::<_, Vec<u8>>(0))
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("query events: {e}")))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| RelayError::BackingStoreQueryFailed(format!("read event row: {e}")))?;

    payloads
      .into_iter()
      .map(|data| {
        serde_json::from_slice(&data)
          .map_err(|e| RelayError::BackingStoreQueryFailed(format!("decode event: {e}")))
      })
      .collect()
  }
}
