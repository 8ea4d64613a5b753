mod cache;
mod config;
mod db;
mod error;
mod jira;
mod routing;
mod server;

use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use cache::{CachedLookup, IssueCache};
use db::{Database, EventLog, MappingStore};
use jira::{JiraClient, Tracker};
use routing::{
  ChannelResolver, ChatNotifier, EventCoordinator, GatewayNotifier, LogNotifier,
  NotificationRouter,
};

#[derive(Parser, Debug)]
#[command(name = "jira-relay")]
#[command(about = "Routes Jira webhook events to mapped chat channels")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/jira-relay/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Listen address, overriding the configured one
  #[arg(short, long)]
  listen: Option<String>,

  /// Append logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing(args.log_file.as_deref())?;

  let config = config::Config::load(args.config.as_deref())?;
  let listen = args.listen.unwrap_or_else(|| config.http.listen.clone());

  let cache = Arc::new(IssueCache::new(config.cache.default_ttl_seconds));
  let database = Arc::new(Database::open(config.database.path.as_deref())?);
  let tracker: Arc<dyn Tracker> = Arc::new(JiraClient::new(&config, Arc::clone(&cache))?);

  let lookup = CachedLookup::new(
    Arc::clone(&cache),
    Arc::clone(&database) as Arc<dyn MappingStore>,
    config.workspace_id.clone(),
    config.cache.enabled,
  );
  let resolver = ChannelResolver::new(
    lookup,
    Arc::clone(&tracker),
    config.dynamic_channels.enabled,
  );

  let notifier: Arc<dyn ChatNotifier> = match &config.notify.gateway_url {
    Some(url) => Arc::new(GatewayNotifier::new(url.clone())?),
    None => Arc::new(LogNotifier),
  };
  let event_router = Arc::new(NotificationRouter::new(resolver, tracker, notifier));

  let coordinator = Arc::new(EventCoordinator::new(
    Arc::clone(&cache),
    Arc::clone(&database) as Arc<dyn EventLog>,
    event_router,
    config.jira.url.clone(),
    config.workspace_id.clone(),
  ));

  let app = server::router(server::AppState::new(
    coordinator,
    cache,
    config::Config::admin_api_key(),
  ));

  let listener = tokio::net::TcpListener::bind(&listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", listen, e))?;
  tracing::info!(addr = %listen, workspace = %config.workspace_id, "starting jira-relay");

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(error = %e, "failed to listen for shutdown signal");
    return;
  }
  tracing::info!("shutdown signal received");
}

/// Install the tracing subscriber, writing to `log_file` when given. The
/// returned guard must stay alive for the non-blocking writer to flush.
fn init_tracing(
  log_file: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  match log_file {
    Some(path) => {
      let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      let appender = tracing_appender::rolling::never(directory, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt().with_env_filter(filter).init();
      Ok(None)
    }
  }
}
