//! Encoding and decoding helpers between graph types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, booleans are 0/1 integers and enum
//! discriminants use their wire names. Entities and manifests additionally
//! keep their full serde representation in a `body_json` column.

use std::str::FromStr as _;

use archgraph_core::{
  compaction::CompressionMetadata,
  entity::Entity,
  relationship::{Relationship, RelationshipType},
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn decode_relationship_type(s: &str) -> Result<RelationshipType> {
  RelationshipType::from_str(s).map_err(|_| Error::UnknownVariant {
    kind:  "relationship type",
    value: s.to_owned(),
  })
}

// ─── Entities ────────────────────────────────────────────────────────────────

/// Column values for an `entities` row.
pub struct EntityRow {
  pub entity_id:     String,
  pub entity_type:   String,
  pub location:      String,
  pub priority:      i64,
  pub processed:     bool,
  pub last_modified: String,
  pub version:       i64,
  pub body_json:     String,
}

impl EntityRow {
  pub fn encode(entity: &Entity) -> Result<Self> {
    Ok(Self {
      entity_id:     entity.id.clone(),
      entity_type:   entity.entity_type.as_str().to_owned(),
      location:      entity.location.clone(),
      priority:      i64::from(entity.priority),
      processed:     entity.processed,
      last_modified: encode_dt(entity.last_modified),
      version:       entity.version() as i64,
      body_json:     serde_json::to_string(entity)?,
    })
  }
}

pub fn decode_entity(body_json: &str) -> Result<Entity> {
  Ok(serde_json::from_str(body_json)?)
}

// ─── Relationships ───────────────────────────────────────────────────────────

/// Raw values read directly from a `relationships` row.
pub struct RawRelationship {
  pub relationship_id:   String,
  pub from_entity_id:    String,
  pub to_entity_id:      String,
  pub relationship_type: String,
  pub strength:          f64,
  pub bidirectional:     bool,
  pub recorded_at:       String,
}

impl RawRelationship {
  pub fn into_relationship(self) -> Result<Relationship> {
    Ok(Relationship {
      id:                self.relationship_id,
      from_entity_id:    self.from_entity_id,
      to_entity_id:      self.to_entity_id,
      relationship_type: decode_relationship_type(&self.relationship_type)?,
      strength:          self.strength,
      bidirectional:     self.bidirectional,
      timestamp:         decode_dt(&self.recorded_at)?,
    })
  }
}

// ─── Manifests ───────────────────────────────────────────────────────────────

pub fn decode_manifest(body_json: &str) -> Result<CompressionMetadata> {
  Ok(serde_json::from_str(body_json)?)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn relationship_types_use_wire_names() {
    assert_eq!(
      decode_relationship_type("DEPENDS_ON").unwrap(),
      RelationshipType::DependsOn
    );
    assert!(matches!(
      decode_relationship_type("depends_on"),
      Err(Error::UnknownVariant { .. })
    ));
  }

  #[test]
  fn timestamps_round_trip_through_rfc3339() {
    let now = Utc::now();
    assert_eq!(decode_dt(&encode_dt(now)).unwrap(), now);
    assert!(decode_dt("yesterday").is_err());
  }
}
