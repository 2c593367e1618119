//! Forward-only schema migrations.
//!
//! `init_schema` always lays down version 1. Each entry in [`MIGRATIONS`] moves
//! the database one version forward inside its own transaction, and the new
//! version is written to `metadata.schema_version` in that same transaction.

use rusqlite::{Connection, OptionalExtension, Transaction};

type Migration = fn(&Transaction<'_>) -> rusqlite::Result<()>;

/// `(target version, step)`, in ascending order.
const MIGRATIONS: &[(u32, Migration)] = &[(2, seed_recall_count)];

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Read one `metadata` value.
pub fn read_metadata(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        [key],
        |row| row.get::<_, String>(0),
    )
    .optional()
}

/// Stored schema version; 0 when the key is missing or unparseable.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    Ok(read_metadata(conn, "schema_version")?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

/// Apply every step whose target is above the stored version.
pub fn run_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    let start = get_schema_version(conn)?;
    if start >= CURRENT_SCHEMA_VERSION {
        tracing::debug!(schema_version = start, "schema up to date");
        return Ok(());
    }

    for (target, step) in MIGRATIONS.iter().filter(|(target, _)| *target > start) {
        tracing::info!(to = target, "running migration");
        let tx = conn.transaction()?;
        step(&tx)?;
        tx.execute(
            "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [target.to_string()],
        )?;
        tx.commit()?;
    }
    Ok(())
}

/// v2: give the cross-process recall counter a concrete starting row.
fn seed_recall_count(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO metadata (key, value) VALUES ('recall_count', '0')",
        [],
    )?;
    Ok(())
}
