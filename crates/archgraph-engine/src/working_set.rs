//! The in-memory, token-budgeted view of the graph.
//!
//! Each record's footprint is computed once on insert and the running total
//! kept alongside, so budget checks never re-serialise the whole set.

use std::collections::HashMap;

use archgraph_core::{
  entity::{Entity, EntityId},
  footprint::estimate_tokens,
  relationship::Relationship,
};
use serde::Serialize;

/// A consistent copy of the working set at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct WorkingSnapshot {
  pub entities:      Vec<Entity>,
  pub relationships: Vec<Relationship>,
  pub tokens:        usize,
}

#[derive(Debug, Default)]
pub struct WorkingSet {
  entities:      HashMap<EntityId, (Entity, usize)>,
  relationships: HashMap<String, (Relationship, usize)>,
  tokens:        usize,
  /// Bumped by every upsert.
  revision:      u64,
  /// Revision installed by the last [`replace`](Self::replace).
  planned:       Option<u64>,
}

impl WorkingSet {
  pub fn tokens(&self) -> usize { self.tokens }

  /// Nothing has been written since the last compacted selection was
  /// installed.
  pub fn is_planned(&self) -> bool { self.planned == Some(self.revision) }

  pub fn entity_count(&self) -> usize { self.entities.len() }

  pub fn relationship_count(&self) -> usize { self.relationships.len() }

  pub fn entity(&self, id: &str) -> Option<&Entity> {
    self.entities.get(id).map(|(e, _)| e)
  }

  pub fn contains_entity(&self, id: &str) -> bool { self.entities.contains_key(id) }

  pub fn upsert_entity(&mut self, entity: Entity) {
    let cost = estimate_tokens(&entity);
    if let Some((_, old)) = self.entities.insert(entity.id.clone(), (entity, cost)) {
      self.tokens -= old;
    }
    self.tokens += cost;
    self.revision += 1;
  }

  pub fn upsert_relationship(&mut self, relationship: Relationship) {
    let cost = estimate_tokens(&relationship);
    let id = relationship.id.clone();
    if let Some((_, old)) = self.relationships.insert(id, (relationship, cost)) {
      self.tokens -= old;
    }
    self.tokens += cost;
    self.revision += 1;
  }

  /// Entities ordered by id.
  pub fn entities(&self) -> Vec<Entity> {
    let mut out: Vec<Entity> =
      self.entities.values().map(|(e, _)| e.clone()).collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
  }

  /// Relationships ordered by id.
  pub fn relationships(&self) -> Vec<Relationship> {
    let mut out: Vec<Relationship> =
      self.relationships.values().map(|(r, _)| r.clone()).collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
  }

  pub fn snapshot(&self) -> WorkingSnapshot {
    WorkingSnapshot {
      entities:      self.entities(),
      relationships: self.relationships(),
      tokens:        self.tokens,
    }
  }

  /// Swap the contents for a compacted selection.
  pub fn replace(&mut self, entities: Vec<Entity>, relationships: Vec<Relationship>) {
    let revision = self.revision;
    *self = Self::default();
    for e in entities {
      self.upsert_entity(e);
    }
    for r in relationships {
      self.upsert_relationship(r);
    }
    self.revision = revision;
    self.planned = Some(revision);
  }
}
