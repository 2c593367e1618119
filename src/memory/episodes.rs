//! Episode and entity storage.
//!
//! Episodes are immutable raw experiences; only their `consolidated` and
//! `entities_extracted` flags change after insert. Entities are external
//! referents with directed (subject, predicate, object) relations,
//! deduplicated on the full triple. Entity-scoped recall reads through here.

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::store::Store;
use super::types::{clamp_unit, Entity, EntityRelation, Episode, EpisodeType};
use super::{format_timestamp, parse_timestamp};
use crate::{Error, Result};

const EPISODE_COLUMNS: &str =
    "e.id, e.timestamp, e.content, e.episode_type, e.summary, e.consolidated, e.entities_extracted, e.confidence";
const ENTITY_COLUMNS: &str = "id, entity_type, name, mention_count, created_at, updated_at";

/// Result returned from [`Store::relate_entities`].
#[derive(Debug, Serialize)]
pub struct RelateEntitiesResult {
    /// UUID of the created (or existing) relation.
    pub id: String,
    /// `true` if this exact (subject, predicate, object) triple already existed.
    pub deduplicated: bool,
}

impl Store {
    // ── Episodes ─────────────────────────────────────────────────────────────

    pub fn insert_episode(&self, episode: &Episode) -> Result<()> {
        if episode.content.trim().is_empty() {
            return Err(Error::InvalidInput("episode content must not be empty".into()));
        }
        let timestamp = format_timestamp(episode.timestamp);

        self.with_conn("insert_episode", |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO episodes (id, timestamp, content, episode_type, summary, \
                 consolidated, entities_extracted, confidence) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    episode.id,
                    timestamp,
                    episode.content,
                    episode.episode_type.as_str(),
                    episode.summary,
                    episode.consolidated,
                    episode.entities_extracted,
                    clamp_unit(episode.confidence),
                ],
            )?;
            link_episode_entities(&tx, &episode.id, &episode.entity_ids)?;
            tx.commit()
        })
    }

    pub fn get_episode(&self, id: &str) -> Result<Option<Episode>> {
        self.with_conn("get_episode", |conn| {
            let sql = format!("SELECT {EPISODE_COLUMNS} FROM episodes e WHERE e.id = ?1");
            let episode = conn
                .query_row(&sql, params![id], episode_from_row)
                .optional()?;
            match episode {
                Some(mut episode) => {
                    episode.entity_ids = episode_entity_ids(conn, &episode.id)?;
                    Ok(Some(episode))
                }
                None => Ok(None),
            }
        })
    }

    pub fn mark_consolidated(&self, id: &str) -> Result<()> {
        let updated = self.with_conn("mark_consolidated", |conn| {
            conn.execute(
                "UPDATE episodes SET consolidated = 1 WHERE id = ?1",
                params![id],
            )
        })?;
        if updated == 0 {
            return Err(Error::not_found("episode", id));
        }
        Ok(())
    }

    /// Flag an episode as processed by extraction and link the entities found.
    ///
    /// Each newly linked entity has its `mention_count` bumped.
    pub fn mark_entities_extracted(&self, id: &str, entity_ids: &[String]) -> Result<()> {
        let updated = self.with_conn("mark_entities_extracted", |conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE episodes SET entities_extracted = 1 WHERE id = ?1",
                params![id],
            )?;
            if updated > 0 {
                link_episode_entities(&tx, id, entity_ids)?;
            }
            tx.commit()?;
            Ok(updated)
        })?;
        if updated == 0 {
            return Err(Error::not_found("episode", id));
        }
        Ok(())
    }

    /// Oldest-first batch of episodes awaiting consolidation.
    pub fn unconsolidated_episodes(&self, limit: usize) -> Result<Vec<Episode>> {
        self.with_conn("unconsolidated_episodes", |conn| {
            let sql = format!(
                "SELECT {EPISODE_COLUMNS} FROM episodes e WHERE e.consolidated = 0 \
                 ORDER BY e.timestamp ASC, e.id ASC LIMIT ?1"
            );
            query_episodes(conn, &sql, params![limit as i64])
        })
    }

    /// Episodes mentioning `entity_id`, newest first.
    pub fn episodes_for_entity(&self, entity_id: &str, limit: usize) -> Result<Vec<Episode>> {
        self.with_conn("episodes_for_entity", |conn| {
            let sql = format!(
                "SELECT {EPISODE_COLUMNS} FROM episode_entities ee \
                 JOIN episodes e ON e.id = ee.episode_id \
                 WHERE ee.entity_id = ?1 \
                 ORDER BY e.timestamp DESC, e.id DESC LIMIT ?2"
            );
            query_episodes(conn, &sql, params![entity_id, limit as i64])
        })
    }

    // ── Entities ─────────────────────────────────────────────────────────────

    pub fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        if entity.name.trim().is_empty() {
            return Err(Error::InvalidInput("entity name must not be empty".into()));
        }
        let created_at = format_timestamp(entity.created_at);
        let now = format_timestamp(Utc::now());
        self.with_conn("upsert_entity", |conn| {
            conn.execute(
                "INSERT INTO entities (id, entity_type, name, mention_count, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(id) DO UPDATE SET \
                   entity_type = excluded.entity_type, name = excluded.name, \
                   mention_count = excluded.mention_count, updated_at = excluded.updated_at",
                params![
                    entity.id,
                    entity.entity_type,
                    entity.name,
                    entity.mention_count as i64,
                    created_at,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        self.with_conn("get_entity", |conn| {
            conn.query_row(
                &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1"),
                params![id],
                entity_from_row,
            )
            .optional()
        })
    }

    /// Resolve an entity by exact id, falling back to a case-insensitive name
    /// match (most-mentioned first when names collide across types).
    pub fn find_entity(&self, id_or_name: &str) -> Result<Option<Entity>> {
        if let Some(entity) = self.get_entity(id_or_name)? {
            return Ok(Some(entity));
        }
        self.with_conn("find_entity", |conn| {
            conn.query_row(
                &format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities WHERE name = ?1 COLLATE NOCASE \
                     ORDER BY mention_count DESC, id ASC LIMIT 1"
                ),
                params![id_or_name],
                entity_from_row,
            )
            .optional()
        })
    }

    /// Store a relationship between two entities.
    ///
    /// Both endpoints must exist. Storing the same triple twice is idempotent
    /// and returns the original relation id.
    pub fn relate_entities(
        &self,
        subject_id: &str,
        predicate: &str,
        object_id: &str,
        strength: f64,
    ) -> Result<RelateEntitiesResult> {
        if predicate.trim().is_empty() {
            return Err(Error::InvalidInput("predicate must not be empty".into()));
        }
        for (role, id) in [("subject", subject_id), ("object", object_id)] {
            if self.get_entity(id)?.is_none() {
                tracing::debug!(role, id, "relation endpoint missing");
                return Err(Error::not_found("entity", id));
            }
        }

        let new_id = uuid::Uuid::now_v7().to_string();
        let now = format_timestamp(Utc::now());
        self.with_conn("relate_entities", |conn| {
            let tx = conn.transaction()?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM entity_relations \
                     WHERE subject_id = ?1 AND predicate = ?2 AND object_id = ?3",
                    params![subject_id, predicate, object_id],
                    |row| row.get(0),
                )
                .optional()?;

            let result = match existing {
                Some(id) => RelateEntitiesResult {
                    id,
                    deduplicated: true,
                },
                None => {
                    tx.execute(
                        "INSERT INTO entity_relations (id, subject_id, predicate, object_id, strength, created_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![new_id, subject_id, predicate, object_id, clamp_unit(strength), now],
                    )?;
                    RelateEntitiesResult {
                        id: new_id.clone(),
                        deduplicated: false,
                    }
                }
            };
            tx.commit()?;
            Ok(result)
        })
    }

    /// Relations where `entity_id` is either subject or object, oldest first.
    pub fn entity_relations(&self, entity_id: &str) -> Result<Vec<EntityRelation>> {
        self.with_conn("entity_relations", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, subject_id, predicate, object_id, strength, created_at \
                 FROM entity_relations WHERE subject_id = ?1 OR object_id = ?1 \
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![entity_id], |row| {
                Ok(EntityRelation {
                    id: row.get(0)?,
                    subject_id: row.get(1)?,
                    predicate: row.get(2)?,
                    object_id: row.get(3)?,
                    strength: row.get(4)?,
                    created_at: timestamp_at(row, 5)?,
                })
            })?;
            rows.collect()
        })
    }
}

fn link_episode_entities(conn: &Connection, episode_id: &str, entity_ids: &[String]) -> rusqlite::Result<()> {
    let now = format_timestamp(Utc::now());
    for entity_id in entity_ids {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO episode_entities (episode_id, entity_id) VALUES (?1, ?2)",
            params![episode_id, entity_id],
        )?;
        if inserted > 0 {
            conn.execute(
                "UPDATE entities SET mention_count = mention_count + 1, updated_at = ?1 WHERE id = ?2",
                params![now, entity_id],
            )?;
        }
    }
    Ok(())
}

fn episode_entity_ids(conn: &Connection, episode_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT entity_id FROM episode_entities WHERE episode_id = ?1 ORDER BY entity_id",
    )?;
    let rows = stmt.query_map(params![episode_id], |row| row.get(0))?;
    rows.collect()
}

fn query_episodes(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<Episode>> {
    let mut stmt = conn.prepare(sql)?;
    let mut episodes = stmt
        .query_map(params, episode_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for episode in &mut episodes {
        episode.entity_ids = episode_entity_ids(conn, &episode.id)?;
    }
    Ok(episodes)
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<chrono::DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("invalid timestamp: {raw}").into())
    })
}

fn episode_from_row(row: &Row<'_>) -> rusqlite::Result<Episode> {
    let episode_type: String = row.get(3)?;
    let episode_type = episode_type
        .parse::<EpisodeType>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;
    Ok(Episode {
        id: row.get(0)?,
        timestamp: timestamp_at(row, 1)?,
        content: row.get(2)?,
        episode_type,
        summary: row.get(4)?,
        consolidated: row.get(5)?,
        entities_extracted: row.get(6)?,
        entity_ids: Vec::new(),
        confidence: row.get(7)?,
    })
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        name: row.get(2)?,
        mention_count: row.get::<_, i64>(3)?.max(0) as u64,
        created_at: timestamp_at(row, 4)?,
        updated_at: timestamp_at(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::Concept;

    fn store_with_people() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.upsert_entity(&Entity::new("person", "Ada")).unwrap();
        store.upsert_entity(&Entity::new("org", "Acme")).unwrap();
        store
    }

    #[test]
    fn test_insert_and_get_episode() {
        let store = store_with_people();
        let mut ep = Episode::new("Ada prefers tabs", EpisodeType::Preference);
        ep.entity_ids = vec!["person:Ada".into()];
        store.insert_episode(&ep).unwrap();

        let loaded = store.get_episode(&ep.id).unwrap().unwrap();
        assert_eq!(loaded.content, "Ada prefers tabs");
        assert_eq!(loaded.episode_type, EpisodeType::Preference);
        assert_eq!(loaded.entity_ids, vec!["person:Ada".to_string()]);
        assert!(!loaded.consolidated);

        let ada = store.get_entity("person:Ada").unwrap().unwrap();
        assert_eq!(ada.mention_count, 1);
    }

    #[test]
    fn test_empty_episode_rejected() {
        let store = Store::open_in_memory().unwrap();
        let ep = Episode::new("   ", EpisodeType::Observation);
        assert!(matches!(store.insert_episode(&ep), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_consolidation_flags() {
        let store = store_with_people();
        let ep = Episode::new("Deploy broke staging", EpisodeType::Observation);
        store.insert_episode(&ep).unwrap();
        assert_eq!(store.unconsolidated_episodes(10).unwrap().len(), 1);

        store.mark_entities_extracted(&ep.id, &["org:Acme".to_string()]).unwrap();
        store.mark_consolidated(&ep.id).unwrap();

        let loaded = store.get_episode(&ep.id).unwrap().unwrap();
        assert!(loaded.consolidated);
        assert!(loaded.entities_extracted);
        assert_eq!(loaded.entity_ids, vec!["org:Acme".to_string()]);
        assert!(store.unconsolidated_episodes(10).unwrap().is_empty());

        assert!(matches!(
            store.mark_consolidated("missing"),
            Err(Error::NotFound { kind: "episode", .. })
        ));
    }

    #[test]
    fn test_episodes_for_entity_newest_first() {
        let store = store_with_people();
        let mut older = Episode::new("first", EpisodeType::Observation);
        older.timestamp = Utc::now() - chrono::Duration::hours(1);
        older.entity_ids = vec!["person:Ada".into()];
        let mut newer = Episode::new("second", EpisodeType::Decision);
        newer.entity_ids = vec!["person:Ada".into()];
        store.insert_episode(&older).unwrap();
        store.insert_episode(&newer).unwrap();

        let episodes = store.episodes_for_entity("person:Ada", 10).unwrap();
        let contents: Vec<&str> = episodes.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["second", "first"]);
    }

    #[test]
    fn test_find_entity_by_id_or_name() {
        let store = store_with_people();
        assert_eq!(store.find_entity("person:Ada").unwrap().unwrap().name, "Ada");
        assert_eq!(store.find_entity("ada").unwrap().unwrap().id, "person:Ada");
        assert!(store.find_entity("nobody").unwrap().is_none());
    }

    #[test]
    fn test_relate_entities_dedup() {
        let store = store_with_people();
        let r1 = store.relate_entities("person:Ada", "works_at", "org:Acme", 0.9).unwrap();
        assert!(!r1.deduplicated);
        let r2 = store.relate_entities("person:Ada", "works_at", "org:Acme", 0.9).unwrap();
        assert!(r2.deduplicated);
        assert_eq!(r1.id, r2.id);

        let relations = store.entity_relations("org:Acme").unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].predicate, "works_at");
    }

    #[test]
    fn test_relate_entities_missing_endpoint() {
        let store = store_with_people();
        let result = store.relate_entities("person:Ada", "knows", "person:Ghost", 1.0);
        assert!(matches!(result, Err(Error::NotFound { kind: "entity", .. })));
    }

    #[test]
    fn test_concepts_for_entity_ordering() {
        let store = store_with_people();
        store
            .upsert_concept(&Concept::with_id("b", "B").confidence(0.5).mentions("person:Ada"))
            .unwrap();
        store
            .upsert_concept(&Concept::with_id("a", "A").confidence(0.5).mentions("person:Ada"))
            .unwrap();
        store
            .upsert_concept(&Concept::with_id("c", "C").confidence(0.9).mentions("person:Ada"))
            .unwrap();
        store.upsert_concept(&Concept::with_id("d", "D")).unwrap();

        let ids: Vec<String> = store
            .concepts_for_entity("person:Ada", 10)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
