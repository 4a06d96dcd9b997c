//! Schema migrations for the creatives and analytics tables.
//!
//! Applied versions are recorded in `schema_migrations`. Each pending
//! migration runs in its own transaction together with its bookkeeping row.

use rusqlite::Connection;
use tracing::info;

use super::error::DatabaseError;

/// `(version, name, sql)`, ascending by version.
const MIGRATIONS: &[(u32, &str, &str)] = &[
    (1, "creatives", include_str!("sql/001_create_creatives.sql")),
    (
        2,
        "creative_vision_features",
        include_str!("sql/002_create_creative_vision_features.sql"),
    ),
    (
        3,
        "creative_llm_annotations",
        include_str!("sql/003_create_creative_llm_annotations.sql"),
    ),
];

/// Highest schema version this build knows about.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|(v, _, _)| *v).unwrap_or(0)
}

/// Schema version recorded in the database, 0 for a fresh one.
pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |r| r.get(0),
    )?)
}

/// Brings the schema up to [`latest_version`].
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current = current_version(conn)?;
    let pending = MIGRATIONS.iter().filter(|(version, _, _)| *version > current);

    for &(version, name, sql) in pending {
        info!(version, name, "Applying schema migration");

        let failed = |source: rusqlite::Error| DatabaseError::Migration {
            version,
            name,
            source,
        };
        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(sql).map_err(failed)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            rusqlite::params![version, name],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;
    }

    Ok(())
}
