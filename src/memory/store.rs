//! Durable store, the single owner of on-disk state.
//!
//! [`Store`] wraps one SQLite connection behind a mutex. Every call goes through
//! [`Store::with_conn`], which retries `SQLITE_BUSY`/`SQLITE_LOCKED` with bounded
//! exponential backoff on top of the connection's `busy_timeout`, so concurrent
//! threads and concurrent processes sharing the file both serialize on SQLite's
//! own write lock.
//!
//! Decay-tracked values are scalar columns. [`Store::decay_all`] and
//! [`Store::decay_stats`] are single set-based statements and never build a
//! [`Concept`] in memory; [`Store::hydrated_count`] exposes how many concept
//! records this handle has materialized so callers can verify that.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::stats::DecayStats;
use super::types::{clamp_unit, Concept, Relation, RelationType};
use super::{bytes_to_embedding, embedding_to_bytes, format_timestamp, parse_timestamp};
use crate::{db, Error, Result};

/// Busy retries after the connection's own `busy_timeout` has expired.
const MAX_BUSY_RETRIES: u32 = 5;
const BASE_BACKOFF_MS: u64 = 25;

/// Upper bound on bound parameters per `IN (...)` query.
const IN_CHUNK: usize = 500;

/// Concept columns, aliased `c`, in the order [`concept_from_row`] reads them.
const CONCEPT_COLUMNS: &str = "c.id, c.summary, c.confidence, c.instance_count, c.conditions, \
     c.exceptions, c.tags, c.decay_factor, c.access_count, c.last_accessed, c.rejuvenated_at, \
     c.created_at, c.updated_at";
const CONCEPT_COLUMN_COUNT: usize = 13;

pub const RECALL_COUNT_KEY: &str = "recall_count";
pub const LAST_DECAY_KEY: &str = "last_decay_at";

pub struct Store {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    hydrated: AtomicUsize,
}

impl Store {
    /// Open (or create) a file-backed store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = db::open_database(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
            hydrated: AtomicUsize::new(0),
        })
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(db::open_memory_database()?),
            db_path: None,
            hydrated: AtomicUsize::new(0),
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Number of concept records materialized by this handle so far.
    pub fn hydrated_count(&self) -> usize {
        self.hydrated.load(Ordering::Relaxed)
    }

    pub(crate) fn note_hydrated(&self, n: usize) {
        self.hydrated.fetch_add(n, Ordering::Relaxed);
    }

    /// Run `f` against the connection, retrying transient lock contention.
    ///
    /// `f` may run more than once, so it must be safe to repeat: either a
    /// single statement or a transaction that rolls back on error.
    pub(crate) fn with_conn<T>(
        &self,
        operation: &str,
        mut f: impl FnMut(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::StoreUnavailable(format!("connection lock poisoned: {e}")))?;

        let mut attempt = 0;
        loop {
            match f(&mut *conn) {
                Ok(value) => return Ok(value),
                Err(e) if Error::is_busy(&e) && attempt < MAX_BUSY_RETRIES => {
                    let delay_ms = BASE_BACKOFF_MS << attempt;
                    tracing::warn!(operation, attempt, delay_ms, "database busy, retrying");
                    std::thread::sleep(Duration::from_millis(delay_ms));
                    attempt += 1;
                }
                Err(e) if Error::is_busy(&e) => {
                    return Err(Error::StoreUnavailable(format!(
                        "{operation}: database still locked after {MAX_BUSY_RETRIES} retries"
                    )));
                }
                Err(e) => return Err(Error::from_sqlite(operation, e)),
            }
        }
    }

    // ── Concepts: point operations ───────────────────────────────────────────

    /// Fetch a full concept record, embedding included. `Ok(None)` if absent.
    pub fn get_concept(&self, id: &str) -> Result<Option<Concept>> {
        let concept = self.with_conn("get_concept", |conn| {
            let sql = format!("SELECT {CONCEPT_COLUMNS}, c.embedding FROM concepts c WHERE c.id = ?1");
            let found = conn
                .query_row(&sql, params![id], |row| {
                    let mut concept = concept_from_row(row, 0)?;
                    let blob: Option<Vec<u8>> = row.get(CONCEPT_COLUMN_COUNT)?;
                    concept.embedding = blob.map(|b| bytes_to_embedding(&b));
                    Ok(concept)
                })
                .optional()?;
            match found {
                Some(concept) => {
                    let mut one = [concept];
                    attach_links(conn, &mut one)?;
                    let [concept] = one;
                    Ok(Some(concept))
                }
                None => Ok(None),
            }
        })?;
        if concept.is_some() {
            self.note_hydrated(1);
        }
        Ok(concept)
    }

    /// Insert or replace a concept with its relations, entity links and
    /// keyword index entry, in one transaction. Decay fields are clamped.
    pub fn upsert_concept(&self, concept: &Concept) -> Result<()> {
        if concept.id.is_empty() {
            return Err(Error::InvalidInput("concept id must not be empty".into()));
        }
        let tags = serde_json::to_string(&concept.tags)?;
        let keyword_text = concept.keyword_text();
        let now = format_timestamp(Utc::now());
        let created_at = format_timestamp(concept.created_at);
        let last_accessed = concept.last_accessed.map(format_timestamp);
        let rejuvenated_at = concept.rejuvenated_at.map(format_timestamp);
        let embedding = concept.embedding.as_deref().map(embedding_to_bytes);

        self.with_conn("upsert_concept", |conn| {
            let tx = conn.transaction()?;

            let existed: bool = tx.query_row(
                "SELECT COUNT(*) > 0 FROM concepts WHERE id = ?1",
                params![concept.id],
                |row| row.get(0),
            )?;

            tx.execute(
                "INSERT INTO concepts (id, summary, confidence, instance_count, embedding, \
                 conditions, exceptions, tags, decay_factor, access_count, last_accessed, \
                 rejuvenated_at, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) \
                 ON CONFLICT(id) DO UPDATE SET \
                   summary = excluded.summary, confidence = excluded.confidence, \
                   instance_count = excluded.instance_count, embedding = excluded.embedding, \
                   conditions = excluded.conditions, exceptions = excluded.exceptions, \
                   tags = excluded.tags, decay_factor = excluded.decay_factor, \
                   access_count = excluded.access_count, last_accessed = excluded.last_accessed, \
                   rejuvenated_at = excluded.rejuvenated_at, updated_at = excluded.updated_at",
                params![
                    concept.id,
                    concept.summary,
                    clamp_unit(concept.confidence),
                    concept.instance_count as i64,
                    embedding,
                    concept.conditions,
                    concept.exceptions,
                    tags,
                    clamp_unit(concept.decay_factor),
                    concept.access_count as i64,
                    last_accessed,
                    rejuvenated_at,
                    created_at,
                    now,
                ],
            )?;

            tx.execute(
                "DELETE FROM concept_relations WHERE source_id = ?1",
                params![concept.id],
            )?;
            for (position, relation) in concept.relations.iter().enumerate() {
                tx.execute(
                    "INSERT OR REPLACE INTO concept_relations \
                     (source_id, relation_type, target_id, strength, context, position) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        concept.id,
                        relation.relation_type.as_str(),
                        relation.target_id,
                        clamp_unit(relation.strength),
                        relation.context,
                        position as i64,
                    ],
                )?;
            }

            tx.execute(
                "DELETE FROM concept_entities WHERE concept_id = ?1",
                params![concept.id],
            )?;
            for entity_id in &concept.entity_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO concept_entities (concept_id, entity_id) VALUES (?1, ?2)",
                    params![concept.id, entity_id],
                )?;
            }

            tx.execute(
                "DELETE FROM concepts_fts WHERE concept_id = ?1",
                params![concept.id],
            )?;
            tx.execute(
                "INSERT INTO concepts_fts (concept_id, body) VALUES (?1, ?2)",
                params![concept.id, keyword_text],
            )?;

            write_audit_log(
                &tx,
                if existed { "update" } else { "create" },
                &concept.id,
                None,
            )?;

            tx.commit()
        })
    }

    // ── Concepts: retrieval reads ────────────────────────────────────────────

    /// Concepts ranked by cosine similarity to `query`, best first.
    ///
    /// Similarity is computed inside SQLite by sqlite-vec, so embeddings never
    /// leave the database. Concepts without an embedding, or whose embedding
    /// length differs from the query's, are excluded.
    pub fn find_similar(&self, query: &[f32], overfetch_k: usize) -> Result<Vec<(Concept, f64)>> {
        if query.is_empty() || overfetch_k == 0 {
            return Ok(Vec::new());
        }
        let query_bytes = embedding_to_bytes(query);

        let results = self.with_conn("find_similar", |conn| {
            let sql = format!(
                "SELECT {CONCEPT_COLUMNS}, vec_distance_cosine(c.embedding, ?1) AS distance \
                 FROM concepts c \
                 WHERE c.embedding IS NOT NULL AND vec_length(c.embedding) = ?2 \
                 ORDER BY distance ASC, c.id ASC LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![query_bytes, query.len() as i64, overfetch_k as i64],
                    |row| {
                        let concept = concept_from_row(row, 0)?;
                        let distance: f64 = row.get(CONCEPT_COLUMN_COUNT)?;
                        Ok((concept, distance))
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let (mut concepts, distances): (Vec<Concept>, Vec<f64>) = rows.into_iter().unzip();
            attach_links(conn, &mut concepts)?;
            Ok(concepts
                .into_iter()
                .zip(distances)
                .map(|(concept, distance)| {
                    let similarity = if distance.is_nan() {
                        0.0
                    } else {
                        (1.0 - distance).clamp(-1.0, 1.0)
                    };
                    (concept, similarity)
                })
                .collect::<Vec<_>>())
        })?;
        self.note_hydrated(results.len());
        Ok(results)
    }

    /// Candidate concepts for keyword-overlap scoring, via the FTS5 index.
    ///
    /// `terms` are OR-ed. With `only_without_embedding`, concepts that have a
    /// vector are skipped because the similarity scan already covers them.
    pub fn keyword_candidates(
        &self,
        terms: &[String],
        limit: usize,
        only_without_embedding: bool,
    ) -> Result<Vec<Concept>> {
        let match_expr = fts_or_query(terms);
        if match_expr.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let concepts = self.with_conn("keyword_candidates", |conn| {
            let embedding_filter = if only_without_embedding {
                "AND c.embedding IS NULL"
            } else {
                ""
            };
            let sql = format!(
                "SELECT {CONCEPT_COLUMNS} FROM concepts_fts \
                 JOIN concepts c ON c.id = concepts_fts.concept_id \
                 WHERE concepts_fts MATCH ?1 {embedding_filter} \
                 ORDER BY concepts_fts.rank LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut concepts = stmt
                .query_map(params![match_expr, limit as i64], |row| concept_from_row(row, 0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            attach_links(conn, &mut concepts)?;
            Ok(concepts)
        })?;
        self.note_hydrated(concepts.len());
        Ok(concepts)
    }

    /// One-hop neighbours of `concept_id` with the edge that reaches each.
    ///
    /// Edges whose target concept does not exist are skipped.
    pub fn get_related(
        &self,
        concept_id: &str,
        types: Option<&[RelationType]>,
    ) -> Result<Vec<(Concept, Relation)>> {
        let related = self.with_conn("get_related", |conn| {
            let sql = format!(
                "SELECT {CONCEPT_COLUMNS}, r.relation_type, r.target_id, r.strength, r.context \
                 FROM concept_relations r \
                 JOIN concepts c ON c.id = r.target_id \
                 WHERE r.source_id = ?1 \
                 ORDER BY r.position"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![concept_id], |row| {
                    let concept = concept_from_row(row, 0)?;
                    let relation = relation_from_row(row, CONCEPT_COLUMN_COUNT)?;
                    Ok((concept, relation))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let (mut concepts, relations): (Vec<Concept>, Vec<Relation>) = rows
                .into_iter()
                .filter(|(_, rel)| types.map_or(true, |t| t.contains(&rel.relation_type)))
                .unzip();
            attach_links(conn, &mut concepts)?;
            Ok(concepts.into_iter().zip(relations).collect::<Vec<_>>())
        })?;
        self.note_hydrated(related.len());
        Ok(related)
    }

    /// Outgoing edges for many concepts in batched queries, keyed by source id.
    pub fn relations_from(&self, ids: &[String]) -> Result<HashMap<String, Vec<Relation>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.with_conn("relations_from", |conn| relations_for(conn, ids))
    }

    /// Batch-hydrate concepts (without embeddings), keyed by id. Unknown ids are absent.
    pub fn concepts_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Concept>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let concepts = self.with_conn("concepts_by_ids", |conn| {
            let mut concepts = Vec::with_capacity(ids.len());
            for chunk in ids.chunks(IN_CHUNK) {
                let sql = format!(
                    "SELECT {CONCEPT_COLUMNS} FROM concepts c WHERE c.id IN ({})",
                    placeholders(chunk.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(chunk.iter()), |row| concept_from_row(row, 0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                concepts.extend(rows);
            }
            attach_links(conn, &mut concepts)?;
            Ok(concepts)
        })?;
        self.note_hydrated(concepts.len());
        Ok(concepts.into_iter().map(|c| (c.id.clone(), c)).collect())
    }

    /// Concepts that mention `entity_id`, most confident first.
    pub fn concepts_for_entity(&self, entity_id: &str, limit: usize) -> Result<Vec<Concept>> {
        let concepts = self.with_conn("concepts_for_entity", |conn| {
            let sql = format!(
                "SELECT {CONCEPT_COLUMNS} FROM concept_entities ce \
                 JOIN concepts c ON c.id = ce.concept_id \
                 WHERE ce.entity_id = ?1 \
                 ORDER BY c.confidence DESC, c.id ASC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut concepts = stmt
                .query_map(params![entity_id, limit as i64], |row| concept_from_row(row, 0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            attach_links(conn, &mut concepts)?;
            Ok(concepts)
        })?;
        self.note_hydrated(concepts.len());
        Ok(concepts)
    }

    // ── Concepts: decay-state writes ─────────────────────────────────────────

    /// Reduce every concept's decay factor by `rate`, floored at 0, in one
    /// statement. Concepts rejuvenated within `grace_window` are skipped, and
    /// concepts already at 0 are not counted.
    ///
    /// The update, its batch audit row and the `last_decay_at` marker commit
    /// together.
    pub fn decay_all(&self, rate: f64, grace_window: chrono::Duration) -> Result<usize> {
        let now = Utc::now();
        let cutoff = format_timestamp(now - grace_window);
        let now = format_timestamp(now);

        self.with_conn("decay_all", |conn| {
            let tx = conn.transaction()?;
            let affected = tx.execute(
                "UPDATE concepts SET decay_factor = MAX(0.0, MIN(1.0, decay_factor - ?1)) \
                 WHERE decay_factor > 0.0 \
                   AND (rejuvenated_at IS NULL OR rejuvenated_at < ?2)",
                params![rate, cutoff],
            )?;

            // Synthetic concept id for batch audit entries
            write_audit_log(
                &tx,
                "decay",
                "batch:all",
                Some(&serde_json::json!({"rate": rate, "affected": affected})),
            )?;
            set_metadata_in(&tx, LAST_DECAY_KEY, &now)?;
            tx.commit()?;
            Ok(affected)
        })
    }

    /// Add each `(id, boost)` to that concept's decay factor, capped at 1.0,
    /// and stamp it as rejuvenated and accessed. One transaction.
    pub fn rejuvenate(&self, boosts: &[(String, f64)]) -> Result<usize> {
        if boosts.is_empty() {
            return Ok(0);
        }
        let now = format_timestamp(Utc::now());

        self.with_conn("rejuvenate", |conn| {
            let tx = conn.transaction()?;
            let mut updated = 0;
            {
                let mut stmt = tx.prepare(
                    "UPDATE concepts SET \
                       decay_factor = MAX(0.0, MIN(1.0, decay_factor + ?1)), \
                       rejuvenated_at = ?2, \
                       access_count = access_count + 1, \
                       last_accessed = ?2 \
                     WHERE id = ?3",
                )?;
                for (id, boost) in boosts {
                    updated += stmt.execute(params![boost.max(0.0), now, id])?;
                }
            }
            tx.commit()?;
            Ok(updated)
        })
    }

    /// Bump `access_count` for `ids`; `last_accessed` only when `touch_last_accessed`.
    pub fn record_access(&self, ids: &[String], touch_last_accessed: bool) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = format_timestamp(Utc::now());

        self.with_conn("record_access", |conn| {
            let tx = conn.transaction()?;
            let mut updated = 0;
            if touch_last_accessed {
                let mut stmt = tx.prepare(
                    "UPDATE concepts SET access_count = access_count + 1, last_accessed = ?1 WHERE id = ?2",
                )?;
                for id in ids {
                    updated += stmt.execute(params![now, id])?;
                }
            } else {
                let mut stmt =
                    tx.prepare("UPDATE concepts SET access_count = access_count + 1 WHERE id = ?1")?;
                for id in ids {
                    updated += stmt.execute(params![id])?;
                }
            }
            tx.commit()?;
            Ok(updated)
        })
    }

    /// Explicit reset: back to fully fresh with a zeroed access count.
    pub fn reset_decay(&self, concept_id: &str) -> Result<()> {
        let updated = self.with_conn("reset_decay", |conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE concepts SET decay_factor = 1.0, access_count = 0, rejuvenated_at = NULL \
                 WHERE id = ?1",
                params![concept_id],
            )?;
            if updated > 0 {
                write_audit_log(&tx, "reset", concept_id, None)?;
            }
            tx.commit()?;
            Ok(updated)
        })?;

        if updated == 0 {
            return Err(Error::not_found("concept", concept_id));
        }
        Ok(())
    }

    /// Reset every concept. Returns the number of rows touched.
    pub fn reset_all_decay(&self) -> Result<usize> {
        self.with_conn("reset_all_decay", |conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE concepts SET decay_factor = 1.0, access_count = 0, rejuvenated_at = NULL",
                [],
            )?;
            write_audit_log(
                &tx,
                "reset",
                "batch:all",
                Some(&serde_json::json!({"affected": updated})),
            )?;
            tx.commit()?;
            Ok(updated)
        })
    }

    /// Aggregate decay statistics in a single query over the scalar column.
    pub fn decay_stats(&self) -> Result<DecayStats> {
        self.with_conn("decay_stats", |conn| {
            conn.query_row(
                "SELECT COUNT(*), \
                        COALESCE(SUM(CASE WHEN decay_factor < 1.0 THEN 1 ELSE 0 END), 0), \
                        COALESCE(AVG(decay_factor), 1.0), \
                        COALESCE(MIN(decay_factor), 1.0) \
                 FROM concepts",
                [],
                |row| {
                    Ok(DecayStats {
                        total: row.get::<_, i64>(0)? as u64,
                        count_below_full: row.get::<_, i64>(1)? as u64,
                        avg_decay_factor: row.get(2)?,
                        min_decay_factor: row.get(3)?,
                    })
                },
            )
        })
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        self.with_conn("get_metadata", |conn| {
            conn.query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn("set_metadata", |conn| set_metadata_in(conn, key, value))
    }

    /// Atomically increment an integer counter and return the new value.
    ///
    /// One statement, so concurrent processes never lose an increment and a
    /// cancelled caller never leaves a half-written counter.
    pub fn increment_counter(&self, key: &str) -> Result<u64> {
        let value: String = self.with_conn("increment_counter", |conn| {
            conn.query_row(
                "INSERT INTO metadata (key, value) VALUES (?1, '1') \
                 ON CONFLICT(key) DO UPDATE SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT) \
                 RETURNING value",
                params![key],
                |row| row.get(0),
            )
        })?;
        value.parse().map_err(|_| Error::OperationFailed {
            operation: "increment_counter".to_string(),
            cause: format!("metadata key {key} holds non-integer value {value:?}"),
        })
    }

    /// Read an integer counter; a missing key or unparseable value reads as 0.
    pub fn read_counter(&self, key: &str) -> Result<u64> {
        Ok(self
            .get_metadata(key)?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0))
    }
}

// ── Row helpers ──────────────────────────────────────────────────────────────

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp: {raw}").into(),
        )
    })
}

fn optional_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

/// Build a concept (no embedding, no links) from [`CONCEPT_COLUMNS`] at `offset`.
fn concept_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Concept> {
    let tags: String = row.get(offset + 6)?;
    Ok(Concept {
        id: row.get(offset)?,
        summary: row.get(offset + 1)?,
        confidence: row.get(offset + 2)?,
        instance_count: row.get::<_, i64>(offset + 3)?.max(0) as u64,
        embedding: None,
        relations: Vec::new(),
        conditions: row.get(offset + 4)?,
        exceptions: row.get(offset + 5)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        entity_ids: Vec::new(),
        decay_factor: row.get(offset + 7)?,
        access_count: row.get::<_, i64>(offset + 8)?.max(0) as u64,
        last_accessed: optional_timestamp_at(row, offset + 9)?,
        rejuvenated_at: optional_timestamp_at(row, offset + 10)?,
        created_at: timestamp_at(row, offset + 11)?,
        updated_at: timestamp_at(row, offset + 12)?,
    })
}

/// Read `relation_type, target_id, strength, context` starting at `offset`.
fn relation_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Relation> {
    let relation_type: String = row.get(offset)?;
    let relation_type = relation_type.parse::<RelationType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(offset, Type::Text, e.into())
    })?;
    Ok(Relation {
        relation_type,
        target_id: row.get(offset + 1)?,
        strength: row.get(offset + 2)?,
        context: row.get(offset + 3)?,
    })
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}

fn relations_for(conn: &Connection, ids: &[String]) -> rusqlite::Result<HashMap<String, Vec<Relation>>> {
    let mut map: HashMap<String, Vec<Relation>> = HashMap::new();
    for chunk in ids.chunks(IN_CHUNK) {
        let sql = format!(
            "SELECT source_id, relation_type, target_id, strength, context \
             FROM concept_relations WHERE source_id IN ({}) \
             ORDER BY source_id, position",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, relation_from_row(row, 1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (source, relation) in rows {
            map.entry(source).or_default().push(relation);
        }
    }
    Ok(map)
}

fn entity_ids_for(conn: &Connection, ids: &[String]) -> rusqlite::Result<HashMap<String, Vec<String>>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for chunk in ids.chunks(IN_CHUNK) {
        let sql = format!(
            "SELECT concept_id, entity_id FROM concept_entities \
             WHERE concept_id IN ({}) ORDER BY concept_id, entity_id",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (concept_id, entity_id) in rows {
            map.entry(concept_id).or_default().push(entity_id);
        }
    }
    Ok(map)
}

/// Fill `relations` and `entity_ids` for freshly read concepts (two queries per chunk).
fn attach_links(conn: &Connection, concepts: &mut [Concept]) -> rusqlite::Result<()> {
    if concepts.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = concepts.iter().map(|c| c.id.clone()).collect();
    let mut relations = relations_for(conn, &ids)?;
    let mut entities = entity_ids_for(conn, &ids)?;
    for concept in concepts.iter_mut() {
        concept.relations = relations.remove(&concept.id).unwrap_or_default();
        concept.entity_ids = entities.remove(&concept.id).unwrap_or_default();
    }
    Ok(())
}

/// Quote each term and OR them for an FTS5 MATCH expression.
fn fts_or_query(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| t.replace('"', ""))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn set_metadata_in(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Write an entry to the concept_log audit table.
pub(crate) fn write_audit_log(
    conn: &Connection,
    operation: &str,
    concept_id: &str,
    details: Option<&serde_json::Value>,
) -> rusqlite::Result<()> {
    let now = format_timestamp(Utc::now());
    let details_json = details.map(|d| d.to_string());
    conn.execute(
        "INSERT INTO concept_log (operation, concept_id, details, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![operation, concept_id, details_json, now],
    )?;
    Ok(())
}
