//! Relationships: typed, directed edges between two entities.
//!
//! Relationships are stored independently of the entities they connect and
//! are never merged or deduplicated away. The adjacency sets on [`Entity`]
//! are a derived, denormalised view of this table.
//!
//! [`Entity`]: crate::entity::Entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::{Error, Result, entity::EntityId};

/// The kind of link between two entities.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  EnumIter,
  IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
  Uses,
  Implements,
  Extends,
  Calls,
  DependsOn,
  Contains,
  Configures,
  Injects,
  Creates,
  Returns,
  Throws,
  Accesses,
  Validates,
  Transforms,
  RoutesTo,
  Publishes,
  Subscribes,
  Tests,
}

impl RelationshipType {
  pub fn as_str(self) -> &'static str { self.into() }
}

/// A persisted edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
  pub id:                String,
  pub from_entity_id:    EntityId,
  pub to_entity_id:      EntityId,
  pub relationship_type: RelationshipType,
  /// Confidence in the link, in `[0, 1]`.
  pub strength:          f64,
  pub bidirectional:     bool,
  pub timestamp:         DateTime<Utc>,
}

impl Relationship {
  /// Build a relationship with a generated id, full strength and the current
  /// time.
  pub fn new(
    from: impl Into<EntityId>,
    to: impl Into<EntityId>,
    relationship_type: RelationshipType,
  ) -> Self {
    Self {
      id: generate_id(),
      from_entity_id: from.into(),
      to_entity_id: to.into(),
      relationship_type,
      strength: 1.0,
      bidirectional: false,
      timestamp: Utc::now(),
    }
  }

  /// Reject records that could never be stored consistently.
  pub fn validate(&self) -> Result<()> {
    if self.id.trim().is_empty() {
      return Err(Error::invalid_relationship(&self.id, "id is empty"));
    }
    if self.from_entity_id.trim().is_empty()
      || self.to_entity_id.trim().is_empty()
    {
      return Err(Error::invalid_relationship(&self.id, "endpoint id is empty"));
    }
    if self.from_entity_id == self.to_entity_id {
      return Err(Error::invalid_relationship(
        &self.id,
        format!("{:?} cannot relate to itself", self.from_entity_id),
      ));
    }
    if !(0.0..=1.0).contains(&self.strength) {
      return Err(Error::invalid_relationship(
        &self.id,
        format!("strength {} is outside [0, 1]", self.strength),
      ));
    }
    Ok(())
  }

  /// The other endpoint, if `id` is one of the two.
  pub fn other_end(&self, id: &str) -> Option<&str> {
    if self.from_entity_id == id {
      Some(&self.to_entity_id)
    } else if self.to_entity_id == id {
      Some(&self.from_entity_id)
    } else {
      None
    }
  }

  pub fn touches(&self, id: &str) -> bool { self.other_end(id).is_some() }

  /// Check that `self` may be written over `stored`, the record already
  /// persisted under the same id. Strength, direction flag and timestamp may
  /// change; the endpoints and type may not.
  pub fn check_rewrite_of(&self, stored: &Relationship) -> Result<()> {
    if self.from_entity_id == stored.from_entity_id
      && self.to_entity_id == stored.to_entity_id
      && self.relationship_type == stored.relationship_type
    {
      return Ok(());
    }
    Err(Error::invalid_relationship(
      &self.id,
      format!(
        "id already names {} -[{}]-> {}",
        stored.from_entity_id, stored.relationship_type, stored.to_entity_id
      ),
    ))
  }
}

/// A fresh relationship id of the form `rel-<uuid>`.
pub fn generate_id() -> String { format!("rel-{}", Uuid::new_v4()) }
