//! Database schema definitions.

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;

/// SQL statement for creating the instruments table (the Instrument Directory).
///
/// `type` is nullable: an instrument without a type tag is listed but
/// skipped by the collection loop. `config` holds the raw JSON blob.
pub const INSTRUMENTS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS instruments (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    type        TEXT,
    config      TEXT NOT NULL DEFAULT '{}',
    enabled     INTEGER NOT NULL DEFAULT 1,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);
"#;

/// SQL statement for creating the retriever cursor table.
///
/// One opaque JSON cursor per instrument; the format is owned by the
/// retriever implementation that wrote it.
pub const RETRIEVER_CURSORS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS retriever_cursors (
    instrument_id  INTEGER PRIMARY KEY,
    cursor         TEXT NOT NULL,
    updated_at     INTEGER NOT NULL
);
"#;

/// Initialize the database schema.
///
/// Creates all tables if they don't exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query(INSTRUMENTS_TABLE_DDL)
        .execute(pool.inner())
        .await?;
    sqlx::query(RETRIEVER_CURSORS_TABLE_DDL)
        .execute(pool.inner())
        .await?;

    tracing::debug!("Database schema initialized");
    Ok(())
}
