//! Handlers for `/entities` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/entities` | Optional `?entity_type&location_prefix&processed&max_priority&limit&offset` |
//! | `POST` | `/entities` | Body: `{"entity": {...}, "source": {...}}` |
//! | `GET`  | `/entities/{id}` | 404 if not found |
//! | `POST` | `/entities/{id}/rehydrate` | 404 if not stored |

use archgraph_core::{
  discovery::DiscoverySource,
  entity::{Entity, EntityObservation, EntityType},
  store::{EntityQuery, GraphStore},
};
use archgraph_engine::{EntityWriteOutcome, GraphMergeEngine};
use axum::{
  Json,
  extract::{Path, Query, State},
};
use chrono::Utc;
use serde::Deserialize;

use crate::error::ApiError;

// ─── List ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
  pub entity_type:     Option<EntityType>,
  pub location_prefix: Option<String>,
  pub processed:       Option<bool>,
  pub max_priority:    Option<u8>,
  pub limit:           Option<usize>,
  pub offset:          Option<usize>,
}

impl From<ListParams> for EntityQuery {
  fn from(p: ListParams) -> Self {
    Self {
      entity_type:     p.entity_type,
      location_prefix: p.location_prefix,
      processed:       p.processed,
      max_priority:    p.max_priority,
      limit:           p.limit,
      offset:          p.offset,
    }
  }
}

/// `GET /entities`
pub async fn list<S: GraphStore>(
  State(engine): State<GraphMergeEngine<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Entity>>, ApiError> {
  let entities = engine.list_entities(&params.into()).await?;
  Ok(Json(entities))
}

// ─── Merge ───────────────────────────────────────────────────────────────────

/// Provenance as submitted by a client. The timestamp is assigned on receipt.
#[derive(Debug, Deserialize)]
pub struct SourceInput {
  pub method:       String,
  pub agent:        Option<String>,
  pub confidence:   Option<f64>,
  #[serde(default)]
  pub context_path: Vec<String>,
}

impl From<SourceInput> for DiscoverySource {
  fn from(s: SourceInput) -> Self {
    Self {
      method:       s.method,
      agent:        s.agent,
      confidence:   s.confidence.unwrap_or(1.0),
      timestamp:    Utc::now(),
      context_path: s.context_path,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct MergeBody {
  pub entity: EntityObservation,
  pub source: SourceInput,
}

/// `POST /entities`
pub async fn merge<S: GraphStore>(
  State(engine): State<GraphMergeEngine<S>>,
  Json(body): Json<MergeBody>,
) -> Result<Json<EntityWriteOutcome>, ApiError> {
  let outcome = engine.add_entity(body.entity, body.source.into()).await?;
  Ok(Json(outcome))
}

// ─── Get one ─────────────────────────────────────────────────────────────────

/// `GET /entities/{id}`
pub async fn get_one<S: GraphStore>(
  State(engine): State<GraphMergeEngine<S>>,
  Path(id): Path<String>,
) -> Result<Json<Entity>, ApiError> {
  let entity = engine
    .get_entity(&id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("entity {id} not found")))?;
  Ok(Json(entity))
}

// ─── Rehydrate ───────────────────────────────────────────────────────────────

/// `POST /entities/{id}/rehydrate`
pub async fn rehydrate<S: GraphStore>(
  State(engine): State<GraphMergeEngine<S>>,
  Path(id): Path<String>,
) -> Result<Json<Entity>, ApiError> {
  let entity = engine
    .rehydrate(&id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("entity {id} not found")))?;
  Ok(Json(entity))
}
