//! The `GraphStore` trait and supporting query types.
//!
//! The store is the durable record of the full graph. The merge engine keeps
//! a budgeted working set in memory, but every entity and relationship it
//! ever accepted is written here first, so compaction never loses data.

use std::future::Future;

use crate::{
  compaction::CompressionMetadata,
  entity::{Entity, EntityType},
  relationship::{Relationship, RelationshipType},
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Parameters for [`GraphStore::list_entities`]. Results are ordered by id.
#[derive(Debug, Clone, Default)]
pub struct EntityQuery {
  pub entity_type:     Option<EntityType>,
  /// Match entities whose `location` starts with this prefix.
  pub location_prefix: Option<String>,
  pub processed:       Option<bool>,
  /// Only entities at this priority or more important (numerically lower).
  pub max_priority:    Option<u8>,
  pub limit:           Option<usize>,
  pub offset:          Option<usize>,
}

/// Parameters for [`GraphStore::list_relationships`]. Results are ordered by
/// id.
#[derive(Debug, Clone, Default)]
pub struct RelationshipQuery {
  /// Either endpoint.
  pub entity_id:         Option<String>,
  pub from:              Option<String>,
  pub to:                Option<String>,
  pub relationship_type: Option<RelationshipType>,
  pub limit:             Option<usize>,
  pub offset:            Option<usize>,
}

impl RelationshipQuery {
  /// Every relationship touching `id`.
  pub fn touching(id: impl Into<String>) -> Self {
    Self { entity_id: Some(id.into()), ..Default::default() }
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a durable graph backend.
///
/// Writes are upserts keyed by id. The engine serialises writers per key, so
/// backends only need to make single operations atomic.
///
/// All methods return `Send` futures so the trait can be used from tasks on a
/// multi-threaded tokio runtime.
pub trait GraphStore: Send + Sync + 'static {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Entities ──────────────────────────────────────────────────────────

  fn get_entity<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Entity>, Self::Error>> + Send + 'a;

  /// Insert or replace the entity with the same id.
  fn put_entity<'a>(
    &'a self,
    entity: &'a Entity,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn list_entities<'a>(
    &'a self,
    query: &'a EntityQuery,
  ) -> impl Future<Output = Result<Vec<Entity>, Self::Error>> + Send + 'a;

  /// Returns `false` if no such entity existed.
  fn delete_entity<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Relationships ─────────────────────────────────────────────────────

  fn get_relationship<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Relationship>, Self::Error>> + Send + 'a;

  /// Insert or replace the relationship with the same id. Endpoints are not
  /// required to exist.
  fn put_relationship<'a>(
    &'a self,
    relationship: &'a Relationship,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn list_relationships<'a>(
    &'a self,
    query: &'a RelationshipQuery,
  ) -> impl Future<Output = Result<Vec<Relationship>, Self::Error>> + Send + 'a;

  fn delete_relationship<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Compaction manifests ──────────────────────────────────────────────

  /// Append the manifest of a compaction run.
  fn save_manifest<'a>(
    &'a self,
    manifest: &'a CompressionMetadata,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Delete all but the `keep` most recent manifests. Returns how many were
  /// removed.
  fn prune_manifests(
    &self,
    keep: usize,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// The most recently saved manifest, if any run has completed.
  fn latest_manifest(
    &self,
  ) -> impl Future<Output = Result<Option<CompressionMetadata>, Self::Error>> + Send + '_;
}
