//! HTTP surface: webhook ingestion plus cache administration.
//!
//! `POST /webhooks/jira` is the ingestion transport boundary. The handler
//! maps outcomes to status codes so Jira's own delivery retry acts as the
//! retry policy: 200 for handled (including no-op) events, 400 for bodies
//! that do not parse, 500 for failed invocations.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cache::manage::{cache_stats, flush_cache};
use crate::cache::IssueCache;
use crate::jira::types::IssueEvent;
use crate::routing::EventCoordinator;

pub struct AppState {
  coordinator: Arc<EventCoordinator>,
  cache: Arc<IssueCache>,
  /// Key guarding the purge endpoint; `None` denies every purge request.
  admin_key: Option<String>,
}

impl AppState {
  pub fn new(
    coordinator: Arc<EventCoordinator>,
    cache: Arc<IssueCache>,
    admin_key: Option<String>,
  ) -> Self {
    Self {
      coordinator,
      cache,
      admin_key,
    }
  }
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/webhooks/jira", post(receive_webhook))
    .route("/jiracache", get(stats_handler))
    .route("/jiracache/purge", post(purge_handler))
    .with_state(Arc::new(state))
}

#[derive(Serialize)]
struct ApiOutcome {
  success: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  error: Option<String>,
}

impl ApiOutcome {
  fn ok() -> Self {
    Self {
      success: true,
      error: None,
    }
  }

  fn failed(error: impl Into<String>) -> Self {
    Self {
      success: false,
      error: Some(error.into()),
    }
  }
}

async fn receive_webhook(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
  let event: IssueEvent = match serde_json::from_slice(&body) {
    Ok(event) => event,
    Err(e) => {
      warn!(error = %e, "rejecting webhook body that does not parse");
      return (
        StatusCode::BAD_REQUEST,
        Json(ApiOutcome::failed(format!("unparseable payload: {e}"))),
      )
        .into_response();
    }
  };

  info!(
    webhook_event = %event.webhook_event,
    issue = event.issue.as_ref().map(|i| i.key.as_str()).unwrap_or("-"),
    "webhook event received"
  );

  // Cache upkeep is best-effort; a failed purge must not fail delivery.
  if let Err(e) = state.coordinator.handle_project_event(&event) {
    warn!(error = %e, "project cache purge failed");
  }

  match state.coordinator.handle(&event).await {
    Ok(()) => (StatusCode::OK, Json(ApiOutcome::ok())).into_response(),
    Err(e) => {
      error!(error = %e, "event handling failed, reporting to transport for retry");
      (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiOutcome::failed(e.to_string())),
      )
        .into_response()
    }
  }
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
  match cache_stats(&state.cache) {
    Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
    Err(e) => (
      StatusCode::INTERNAL_SERVER_ERROR,
      Json(ApiOutcome::failed(e.to_string())),
    )
      .into_response(),
  }
}

#[derive(Deserialize)]
struct PurgeRequest {
  #[serde(default)]
  auth: Option<String>,
}

async fn purge_handler(
  State(state): State<Arc<AppState>>,
  Json(request): Json<PurgeRequest>,
) -> Response {
  let authorized = matches!(
    (&request.auth, &state.admin_key),
    (Some(supplied), Some(expected)) if supplied == expected
  );
  if !authorized {
    return (
      StatusCode::UNAUTHORIZED,
      Json(ApiOutcome::failed(
        "must supply the configured API key to purge the cache",
      )),
    )
      .into_response();
  }

  match flush_cache(&state.cache) {
    Ok(()) => (StatusCode::OK, Json(ApiOutcome::ok())).into_response(),
    Err(e) => (
      StatusCode::INTERNAL_SERVER_ERROR,
      Json(ApiOutcome::failed(e.to_string())),
    )
      .into_response(),
  }
}
