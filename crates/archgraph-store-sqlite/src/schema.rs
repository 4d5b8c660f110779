//! SQL schema for the archgraph SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! schema generation for later migrations.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per entity. Filterable attributes are lifted into columns; the
-- complete record, provenance included, lives in body_json.
CREATE TABLE IF NOT EXISTS entities (
    entity_id     TEXT PRIMARY KEY,
    entity_type   TEXT NOT NULL,
    location      TEXT NOT NULL,
    priority      INTEGER NOT NULL,
    processed     INTEGER NOT NULL,   -- 0 | 1
    last_modified TEXT NOT NULL,      -- RFC 3339 UTC
    version       INTEGER NOT NULL,
    body_json     TEXT NOT NULL
);

-- Endpoints deliberately carry no foreign keys: a relationship may arrive
-- before either of its entities.
CREATE TABLE IF NOT EXISTS relationships (
    relationship_id   TEXT PRIMARY KEY,
    from_entity_id    TEXT NOT NULL,
    to_entity_id      TEXT NOT NULL,
    relationship_type TEXT NOT NULL,  -- SCREAMING_SNAKE_CASE
    strength          REAL NOT NULL,
    bidirectional     INTEGER NOT NULL,
    recorded_at       TEXT NOT NULL,
    CHECK (from_entity_id != to_entity_id)
);

-- Append-only log of compaction runs.
CREATE TABLE IF NOT EXISTS manifests (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id     TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    body_json  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS entities_type_idx     ON entities(entity_type);
CREATE INDEX IF NOT EXISTS entities_location_idx ON entities(location);
CREATE INDEX IF NOT EXISTS rel_from_idx          ON relationships(from_entity_id);
CREATE INDEX IF NOT EXISTS rel_to_idx            ON relationships(to_entity_id);
CREATE INDEX IF NOT EXISTS rel_type_idx          ON relationships(relationship_type);

PRAGMA user_version = 1;
";
