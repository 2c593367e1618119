use rusqlite::Connection;
use serde::Serialize;

use super::store::{Store, LAST_DECAY_KEY, RECALL_COUNT_KEY};
use crate::Result;

/// Aggregate decay state across all concepts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecayStats {
    pub total: u64,
    /// Concepts with `decay_factor < 1.0`.
    pub count_below_full: u64,
    /// 1.0 when the store is empty.
    pub avg_decay_factor: f64,
    /// 1.0 when the store is empty.
    pub min_decay_factor: f64,
}

/// Store-wide statistics for `mnemo stats`.
#[derive(Debug, Serialize)]
pub struct MemoryStats {
    pub concepts: u64,
    pub concepts_with_embedding: u64,
    pub relations: u64,
    pub episodes: u64,
    pub unconsolidated_episodes: u64,
    pub entities: u64,
    pub entity_relations: u64,
    pub recall_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_decay_at: Option<String>,
    pub decay: DecayStats,
    pub db_size_bytes: u64,
}

/// Compute store statistics. Counts only; no concept is hydrated.
pub fn memory_stats(store: &Store) -> Result<MemoryStats> {
    let counts = store.with_conn("memory_stats", |conn| {
        Ok([
            count(conn, "SELECT COUNT(*) FROM concepts")?,
            count(conn, "SELECT COUNT(*) FROM concepts WHERE embedding IS NOT NULL")?,
            count(conn, "SELECT COUNT(*) FROM concept_relations")?,
            count(conn, "SELECT COUNT(*) FROM episodes")?,
            count(conn, "SELECT COUNT(*) FROM episodes WHERE consolidated = 0")?,
            count(conn, "SELECT COUNT(*) FROM entities")?,
            count(conn, "SELECT COUNT(*) FROM entity_relations")?,
        ])
    })?;
    let [concepts, concepts_with_embedding, relations, episodes, unconsolidated_episodes, entities, entity_relations] =
        counts;

    let db_size_bytes = store
        .db_path()
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(MemoryStats {
        concepts,
        concepts_with_embedding,
        relations,
        episodes,
        unconsolidated_episodes,
        entities,
        entity_relations,
        recall_count: store.read_counter(RECALL_COUNT_KEY)?,
        last_decay_at: store.get_metadata(LAST_DECAY_KEY)?,
        decay: store.decay_stats()?,
        db_size_bytes,
    })
}

fn count(conn: &Connection, sql: &str) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as u64)
}
