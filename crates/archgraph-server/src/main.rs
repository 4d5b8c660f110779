//! archgraph server binary.
//!
//! Reads `archgraph.toml` (or the path given with `--config`), opens the
//! SQLite graph store, starts the background budget monitor and serves the
//! JSON API over HTTP.
//!
//! Any setting can be overridden from the environment, with `__` between
//! nested keys:
//!
//! ```text
//! ARCHGRAPH_PORT=8080 ARCHGRAPH_GRAPH__BUDGET__MAX_TOKENS=50000 archgraph
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use archgraph_engine::GraphMergeEngine;
use archgraph_server::ServerConfig;
use archgraph_store_sqlite::SqliteStore;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Concurrent architecture-graph merge server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "archgraph.toml")]
  config: PathBuf,

  /// Override the SQLite store path from the configuration.
  #[arg(long)]
  store: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("ARCHGRAPH")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  let mut server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;
  if let Some(store) = cli.store {
    server_cfg.store_path = store;
  }
  server_cfg
    .graph
    .validate()
    .context("invalid graph configuration")?;

  let store_path = expand_tilde(&server_cfg.store_path);
  if let Some(parent) = store_path.parent() {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let engine = GraphMergeEngine::new(store, server_cfg.graph.clone())
    .context("failed to start merge engine")?;
  let watch = engine.start_budget_watch(server_cfg.monitor_interval());

  let app = archgraph_server::router(engine);
  let address = server_cfg.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      tracing::info!("shutting down");
    })
    .await
    .context("server error")?;

  watch.shutdown().await;
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
