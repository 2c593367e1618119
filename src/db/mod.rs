pub mod migrations;
pub mod schema;

use rusqlite::Connection;
use serde::Serialize;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

use crate::{Error, Result};

static SQLITE_VEC_INIT: Once = Once::new();

/// How long a connection waits on a locked database before returning `SQLITE_BUSY`.
pub const BUSY_TIMEOUT_MS: u32 = 5000;

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) the mnemo database at the given path, with all extensions
/// loaded and schema initialized.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::StoreUnavailable(format!(
                "failed to create directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    load_sqlite_vec();

    let mut conn = Connection::open(path).map_err(|e| {
        Error::StoreUnavailable(format!("failed to open database at {}: {e}", path.display()))
    })?;

    configure_connection(&conn)?;
    // WAL lets readers proceed while another process holds the write lock
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| Error::from_sqlite("enable_wal", e))?;

    schema::init_schema(&conn).map_err(|e| Error::from_sqlite("init_schema", e))?;
    migrations::run_migrations(&mut conn).map_err(|e| Error::from_sqlite("run_migrations", e))?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open an in-memory database with schema and migrations applied.
pub fn open_memory_database() -> Result<Connection> {
    load_sqlite_vec();
    let mut conn = Connection::open_in_memory()
        .map_err(|e| Error::StoreUnavailable(format!("failed to open in-memory database: {e}")))?;
    configure_connection(&conn)?;
    schema::init_schema(&conn).map_err(|e| Error::from_sqlite("init_schema", e))?;
    migrations::run_migrations(&mut conn).map_err(|e| Error::from_sqlite("run_migrations", e))?;
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| Error::from_sqlite("configure_connection", e))?;
    conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)
        .map_err(|e| Error::from_sqlite("configure_connection", e))?;
    Ok(())
}

/// Result of [`check_database_health`].
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub integrity_ok: bool,
    pub integrity_details: String,
    pub schema_version: u32,
    pub sqlite_vec_version: String,
    pub embedding_model: Option<String>,
    pub concept_count: u64,
    pub relation_count: u64,
    pub episode_count: u64,
    pub entity_count: u64,
    pub log_count: u64,
}

/// Run `PRAGMA integrity_check` and gather row counts.
pub fn check_database_health(conn: &Connection) -> Result<HealthReport> {
    let map = |e| Error::from_sqlite("check_database_health", e);

    let integrity_details: String = conn
        .query_row("PRAGMA integrity_check", [], |row| row.get(0))
        .map_err(map)?;
    let schema_version = migrations::get_schema_version(conn).map_err(map)?;
    let sqlite_vec_version: String = conn
        .query_row("SELECT vec_version()", [], |row| row.get(0))
        .map_err(map)?;
    let embedding_model = migrations::read_metadata(conn, "embedding_model").map_err(map)?;

    let count = |table: &str| -> Result<u64> {
        let n: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .map_err(map)?;
        Ok(n as u64)
    };

    Ok(HealthReport {
        integrity_ok: integrity_details == "ok",
        integrity_details,
        schema_version,
        sqlite_vec_version,
        embedding_model,
        concept_count: count("concepts")?,
        relation_count: count("concept_relations")?,
        episode_count: count("episodes")?,
        entity_count: count("entities")?,
        log_count: count("concept_log")?,
    })
}
