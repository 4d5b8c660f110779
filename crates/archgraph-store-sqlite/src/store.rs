//! [`SqliteStore`]: the SQLite implementation of [`GraphStore`].

use std::path::Path;

use archgraph_core::{
  compaction::CompressionMetadata,
  entity::Entity,
  relationship::Relationship,
  store::{EntityQuery, GraphStore, RelationshipQuery},
};
use rusqlite::{OptionalExtension as _, types::Value};
use tracing::debug;

use crate::{
  Result,
  encode::{
    EntityRow, RawRelationship, decode_entity, decode_manifest, encode_dt,
    encode_uuid,
  },
  schema::SCHEMA,
};

const RELATIONSHIP_COLUMNS: &str = "relationship_id, from_entity_id, \
                                    to_entity_id, relationship_type, \
                                    strength, bidirectional, recorded_at";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A durable graph store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    debug!(path = %path.display(), "opening sqlite store");
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

fn read_relationship(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRelationship> {
  Ok(RawRelationship {
    relationship_id:   row.get(0)?,
    from_entity_id:    row.get(1)?,
    to_entity_id:      row.get(2)?,
    relationship_type: row.get(3)?,
    strength:          row.get(4)?,
    bidirectional:     row.get(5)?,
    recorded_at:       row.get(6)?,
  })
}

/// Append `LIMIT`/`OFFSET` for an optional page. SQLite needs a `LIMIT` before
/// it accepts an `OFFSET`; `-1` means unbounded.
fn push_page(
  sql: &mut String,
  args: &mut Vec<Value>,
  limit: Option<usize>,
  offset: Option<usize>,
) {
  if limit.is_none() && offset.is_none() {
    return;
  }
  sql.push_str(" LIMIT ? OFFSET ?");
  args.push(Value::Integer(limit.map_or(-1, |l| l as i64)));
  args.push(Value::Integer(offset.unwrap_or(0) as i64));
}

// ─── GraphStore impl ─────────────────────────────────────────────────────────

impl GraphStore for SqliteStore {
  type Error = crate::Error;

  // ── Entities ──────────────────────────────────────────────────────────────

  async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
    let id = id.to_owned();

    let body: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT body_json FROM entities WHERE entity_id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
          )
          .optional()?)
      })
      .await?;

    body.as_deref().map(decode_entity).transpose()
  }

  async fn put_entity(&self, entity: &Entity) -> Result<()> {
    let row = EntityRow::encode(entity)?;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO entities (
             entity_id, entity_type, location, priority, processed,
             last_modified, version, body_json
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
           ON CONFLICT (entity_id) DO UPDATE SET
             entity_type   = excluded.entity_type,
             location      = excluded.location,
             priority      = excluded.priority,
             processed     = excluded.processed,
             last_modified = excluded.last_modified,
             version       = excluded.version,
             body_json     = excluded.body_json",
          rusqlite::params![
            row.entity_id,
            row.entity_type,
            row.location,
            row.priority,
            row.processed,
            row.last_modified,
            row.version,
            row.body_json,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>> {
    let mut conds: Vec<&'static str> = vec![];
    let mut args: Vec<Value> = vec![];

    if let Some(t) = &query.entity_type {
      conds.push("entity_type = ?");
      args.push(Value::Text(t.as_str().to_owned()));
    }
    if let Some(prefix) = &query.location_prefix {
      conds.push("substr(location, 1, ?) = ?");
      args.push(Value::Integer(prefix.chars().count() as i64));
      args.push(Value::Text(prefix.clone()));
    }
    if let Some(processed) = query.processed {
      conds.push("processed = ?");
      args.push(Value::Integer(i64::from(processed)));
    }
    if let Some(p) = query.max_priority {
      conds.push("priority <= ?");
      args.push(Value::Integer(i64::from(p)));
    }

    let mut sql = String::from("SELECT body_json FROM entities");
    if !conds.is_empty() {
      sql.push_str(" WHERE ");
      sql.push_str(&conds.join(" AND "));
    }
    sql.push_str(" ORDER BY entity_id");
    push_page(&mut sql, &mut args, query.limit, query.offset);

    let bodies: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(args), |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    bodies.iter().map(|b| decode_entity(b)).collect()
  }

  async fn delete_entity(&self, id: &str) -> Result<bool> {
    let id = id.to_owned();
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM entities WHERE entity_id = ?1",
          rusqlite::params![id],
        )?)
      })
      .await?;
    Ok(n > 0)
  }

  // ── Relationships ─────────────────────────────────────────────────────────

  async fn get_relationship(&self, id: &str) -> Result<Option<Relationship>> {
    let id = id.to_owned();

    let raw: Option<RawRelationship> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {RELATIONSHIP_COLUMNS} FROM relationships
               WHERE relationship_id = ?1"
            ),
            rusqlite::params![id],
            read_relationship,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawRelationship::into_relationship).transpose()
  }

  async fn put_relationship(&self, relationship: &Relationship) -> Result<()> {
    let id        = relationship.id.clone();
    let from      = relationship.from_entity_id.clone();
    let to        = relationship.to_entity_id.clone();
    let rel_type  = relationship.relationship_type.as_str();
    let strength  = relationship.strength;
    let bidi      = relationship.bidirectional;
    let at_str    = encode_dt(relationship.timestamp);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO relationships (
             relationship_id, from_entity_id, to_entity_id, relationship_type,
             strength, bidirectional, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
           ON CONFLICT (relationship_id) DO UPDATE SET
             from_entity_id    = excluded.from_entity_id,
             to_entity_id      = excluded.to_entity_id,
             relationship_type = excluded.relationship_type,
             strength          = excluded.strength,
             bidirectional     = excluded.bidirectional,
             recorded_at       = excluded.recorded_at",
          rusqlite::params![id, from, to, rel_type, strength, bidi, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_relationships(
    &self,
    query: &RelationshipQuery,
  ) -> Result<Vec<Relationship>> {
    let mut conds: Vec<&'static str> = vec![];
    let mut args: Vec<Value> = vec![];

    if let Some(id) = &query.entity_id {
      conds.push("(from_entity_id = ? OR to_entity_id = ?)");
      args.push(Value::Text(id.clone()));
      args.push(Value::Text(id.clone()));
    }
    if let Some(from) = &query.from {
      conds.push("from_entity_id = ?");
      args.push(Value::Text(from.clone()));
    }
    if let Some(to) = &query.to {
      conds.push("to_entity_id = ?");
      args.push(Value::Text(to.clone()));
    }
    if let Some(t) = query.relationship_type {
      conds.push("relationship_type = ?");
      args.push(Value::Text(t.as_str().to_owned()));
    }

    let mut sql = format!("SELECT {RELATIONSHIP_COLUMNS} FROM relationships");
    if !conds.is_empty() {
      sql.push_str(" WHERE ");
      sql.push_str(&conds.join(" AND "));
    }
    sql.push_str(" ORDER BY relationship_id");
    push_page(&mut sql, &mut args, query.limit, query.offset);

    let raws: Vec<RawRelationship> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(args), read_relationship)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRelationship::into_relationship).collect()
  }

  async fn delete_relationship(&self, id: &str) -> Result<bool> {
    let id = id.to_owned();
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM relationships WHERE relationship_id = ?1",
          rusqlite::params![id],
        )?)
      })
      .await?;
    Ok(n > 0)
  }

  // ── Compaction manifests ──────────────────────────────────────────────────

  async fn save_manifest(&self, manifest: &CompressionMetadata) -> Result<()> {
    let run_id = encode_uuid(manifest.run_id);
    let at_str = encode_dt(manifest.created_at);
    let body   = serde_json::to_string(manifest)?;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO manifests (run_id, created_at, body_json)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![run_id, at_str, body],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn prune_manifests(&self, keep: usize) -> Result<usize> {
    let keep = i64::try_from(keep).unwrap_or(i64::MAX);
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM manifests WHERE seq NOT IN
             (SELECT seq FROM manifests ORDER BY seq DESC LIMIT ?1)",
          [keep],
        )?)
      })
      .await?;
    if removed > 0 {
      debug!(removed, "pruned old manifests");
    }
    Ok(removed)
  }

  async fn latest_manifest(&self) -> Result<Option<CompressionMetadata>> {
    let body: Option<String> = self
      .conn
      .call(|conn| {
        Ok(conn
          .query_row(
            "SELECT body_json FROM manifests ORDER BY seq DESC LIMIT 1",
            [],
            |row| row.get(0),
          )
          .optional()?)
      })
      .await?;

    body.as_deref().map(decode_manifest).transpose()
  }
}
