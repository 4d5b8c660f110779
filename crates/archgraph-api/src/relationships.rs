//! Handlers for `/relationships` endpoints.

use archgraph_core::{
  entity::EntityId,
  relationship::{Relationship, RelationshipType},
  store::{GraphStore, RelationshipQuery},
};
use archgraph_engine::{GraphMergeEngine, RelationshipWriteOutcome};
use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;

use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
  pub entity_id:         Option<String>,
  pub from:              Option<String>,
  pub to:                Option<String>,
  pub relationship_type: Option<RelationshipType>,
  pub limit:             Option<usize>,
  pub offset:            Option<usize>,
}

impl From<ListParams> for RelationshipQuery {
  fn from(p: ListParams) -> Self {
    Self {
      entity_id:         p.entity_id,
      from:              p.from,
      to:                p.to,
      relationship_type: p.relationship_type,
      limit:             p.limit,
      offset:            p.offset,
    }
  }
}

/// `GET /relationships`
pub async fn list<S: GraphStore>(
  State(engine): State<GraphMergeEngine<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Relationship>>, ApiError> {
  let relationships = engine.list_relationships(&params.into()).await?;
  Ok(Json(relationships))
}

/// Body of `POST /relationships`. Omit `id` to have one generated; resend
/// the returned id to retry safely.
#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub id:                Option<String>,
  pub from_entity_id:    EntityId,
  pub to_entity_id:      EntityId,
  pub relationship_type: RelationshipType,
  pub strength:          Option<f64>,
  #[serde(default)]
  pub bidirectional:     bool,
}

/// `POST /relationships`
pub async fn create<S: GraphStore>(
  State(engine): State<GraphMergeEngine<S>>,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError> {
  let relationship = Relationship {
    id:                body.id.unwrap_or_default(),
    from_entity_id:    body.from_entity_id,
    to_entity_id:      body.to_entity_id,
    relationship_type: body.relationship_type,
    strength:          body.strength.unwrap_or(1.0),
    bidirectional:     body.bidirectional,
    timestamp:         Utc::now(),
  };
  let outcome: RelationshipWriteOutcome = engine.add_relationship(relationship).await?;
  Ok((StatusCode::CREATED, Json(outcome)))
}

/// `GET /relationships/{id}`
pub async fn get_one<S: GraphStore>(
  State(engine): State<GraphMergeEngine<S>>,
  Path(id): Path<String>,
) -> Result<Json<Relationship>, ApiError> {
  let relationship = engine
    .get_relationship(&id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("relationship {id} not found")))?;
  Ok(Json(relationship))
}
