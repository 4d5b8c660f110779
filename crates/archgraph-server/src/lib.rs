//! HTTP front end for the archgraph merge engine.
//!
//! Wires a [`GraphMergeEngine`] into the API router under `/api` and
//! carries the runtime configuration read by the `archgraph` binary.

use std::{path::PathBuf, time::Duration};

use archgraph_core::{config::GraphConfig, store::GraphStore};
use archgraph_engine::GraphMergeEngine;
use axum::{Router, routing::get};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `archgraph.toml` and
/// `ARCHGRAPH_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                  String,
  pub port:                  u16,
  pub store_path:            PathBuf,
  /// Seconds between background budget checks.
  pub monitor_interval_secs: u64,
  pub graph:                 GraphConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                  "127.0.0.1".into(),
      port:                  7420,
      store_path:            "~/.local/share/archgraph/graph.db".into(),
      monitor_interval_secs: 30,
      graph:                 GraphConfig::default(),
    }
  }
}

impl ServerConfig {
  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  pub fn monitor_interval(&self) -> Duration {
    Duration::from_secs(self.monitor_interval_secs.max(1))
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the top-level router: the API under `/api`, plus `/health`.
pub fn router<S: GraphStore>(engine: GraphMergeEngine<S>) -> Router {
  Router::new()
    .route("/health", get(|| async { "ok" }))
    .nest("/api", archgraph_api::api_router(engine))
    .layer(TraceLayer::new_for_http())
}
