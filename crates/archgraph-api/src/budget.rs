//! Handlers for the working-set budget and compaction.

use archgraph_core::{compaction::CompressionMetadata, store::GraphStore};
use archgraph_engine::{BudgetReport, CompactionReport, GraphMergeEngine};
use axum::{Json, extract::State};

use crate::error::ApiError;

/// `GET /budget`
pub async fn usage<S: GraphStore>(
  State(engine): State<GraphMergeEngine<S>>,
) -> Json<BudgetReport> {
  Json(engine.usage().await)
}

/// `POST /compact`
pub async fn compact<S: GraphStore>(
  State(engine): State<GraphMergeEngine<S>>,
) -> Result<Json<CompactionReport>, ApiError> {
  Ok(Json(engine.compact().await?))
}

/// `GET /manifest`
pub async fn manifest<S: GraphStore>(
  State(engine): State<GraphMergeEngine<S>>,
) -> Result<Json<CompressionMetadata>, ApiError> {
  let manifest = engine
    .latest_manifest()
    .await?
    .ok_or_else(|| ApiError::NotFound("no compaction has run yet".into()))?;
  Ok(Json(manifest))
}
