//! Error types for the relay engine.

use thiserror::Error;

/// Errors raised by the core event-handling paths.
///
/// Cache failures and per-item data problems are recovered close to where
/// they occur; store and tracker failures during replay propagate to the
/// ingestion transport so its retry policy can take over.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
  #[error("cache unavailable: {0}")]
  CacheUnavailable(String),

  #[error("backing store query failed: {0}")]
  BackingStoreQueryFailed(String),

  #[error("tracker unreachable: {0}")]
  TrackerUnreachable(String),

  #[error("malformed event: {0}")]
  MalformedEvent(String),

  #[error("authorization denied")]
  AuthorizationDenied,

  #[error("notification delivery failed: {0}")]
  DeliveryFailed(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
