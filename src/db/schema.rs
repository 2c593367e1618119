//! SQL DDL for all mnemo tables.
//!
//! Concepts keep every decay-tracked value in its own scalar column so that
//! batch decay and statistics never need to read a serialized record. Relations
//! and entity links are adjacency rows keyed by concept id. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// All schema DDL statements for mnemo's core tables.
const SCHEMA_SQL: &str = r#"
-- Generalized knowledge units
CREATE TABLE IF NOT EXISTS concepts (
    id TEXT PRIMARY KEY,
    summary TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 1.0 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    instance_count INTEGER NOT NULL DEFAULT 0,
    embedding BLOB,
    conditions TEXT,
    exceptions TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    decay_factor REAL NOT NULL DEFAULT 1.0 CHECK(decay_factor >= 0.0 AND decay_factor <= 1.0),
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    rejuvenated_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_concepts_decay ON concepts(decay_factor);
CREATE INDEX IF NOT EXISTS idx_concepts_rejuvenated ON concepts(rejuvenated_at);

-- Typed, directed concept graph
CREATE TABLE IF NOT EXISTS concept_relations (
    source_id TEXT NOT NULL REFERENCES concepts(id) ON DELETE CASCADE,
    relation_type TEXT NOT NULL CHECK(relation_type IN
        ('implies','contradicts','specializes','generalizes','causes','correlates','part_of','context_of')),
    target_id TEXT NOT NULL,
    strength REAL NOT NULL CHECK(strength >= 0.0 AND strength <= 1.0),
    context TEXT,
    position INTEGER NOT NULL,
    PRIMARY KEY (source_id, relation_type, target_id)
);

CREATE INDEX IF NOT EXISTS idx_concept_relations_target ON concept_relations(target_id);

-- Keyword fallback index over summary + tags
CREATE VIRTUAL TABLE IF NOT EXISTS concepts_fts USING fts5(
    concept_id UNINDEXED,
    body
);

-- Raw experiences
CREATE TABLE IF NOT EXISTS episodes (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    content TEXT NOT NULL,
    episode_type TEXT NOT NULL CHECK(episode_type IN ('observation','decision','question','meta','preference')),
    summary TEXT,
    consolidated INTEGER NOT NULL DEFAULT 0,
    entities_extracted INTEGER NOT NULL DEFAULT 0,
    confidence REAL NOT NULL DEFAULT 1.0 CHECK(confidence >= 0.0 AND confidence <= 1.0)
);

CREATE INDEX IF NOT EXISTS idx_episodes_timestamp ON episodes(timestamp);
CREATE INDEX IF NOT EXISTS idx_episodes_consolidated ON episodes(consolidated);

-- External referents
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    name TEXT NOT NULL,
    mention_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS entity_relations (
    id TEXT PRIMARY KEY,
    subject_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    predicate TEXT NOT NULL,
    object_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    strength REAL NOT NULL DEFAULT 1.0 CHECK(strength >= 0.0 AND strength <= 1.0),
    created_at TEXT NOT NULL,
    UNIQUE (subject_id, predicate, object_id)
);

CREATE INDEX IF NOT EXISTS idx_entity_relations_subject ON entity_relations(subject_id);
CREATE INDEX IF NOT EXISTS idx_entity_relations_object ON entity_relations(object_id);

-- Mentions (no FK to entities: extraction may link before the entity row lands)
CREATE TABLE IF NOT EXISTS episode_entities (
    episode_id TEXT NOT NULL REFERENCES episodes(id) ON DELETE CASCADE,
    entity_id TEXT NOT NULL,
    PRIMARY KEY (episode_id, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_episode_entities_entity ON episode_entities(entity_id);

CREATE TABLE IF NOT EXISTS concept_entities (
    concept_id TEXT NOT NULL REFERENCES concepts(id) ON DELETE CASCADE,
    entity_id TEXT NOT NULL,
    PRIMARY KEY (concept_id, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_concept_entities_entity ON concept_entities(entity_id);

-- Audit log
CREATE TABLE IF NOT EXISTS concept_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('create','update','decay','reset')),
    concept_id TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

-- Cross-process counters and schema bookkeeping
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for expected in [
            "concepts",
            "concept_relations",
            "concepts_fts",
            "episodes",
            "entities",
            "entity_relations",
            "episode_entities",
            "concept_entities",
            "concept_log",
            "metadata",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table {expected}");
        }

        // sqlite-vec is registered for the similarity scan
        let version: String = conn
            .query_row("SELECT vec_version()", [], |r| r.get(0))
            .unwrap();
        assert!(!version.is_empty());
    }

    #[test]
    fn schema_is_idempotent() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn decay_factor_check_constraint() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO concepts (id, summary, decay_factor, created_at, updated_at) \
             VALUES ('c', 's', 1.5, 'now', 'now')",
            [],
        );
        assert!(result.is_err());
    }
}
