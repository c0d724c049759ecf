//! Persisted retriever cursors.
//!
//! The only state that survives across runs. Each retriever owns the shape
//! of its cursor; the store keeps one JSON document per instrument.

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;
use crate::storage::types::InstrumentId;

/// Cursor storage facade.
#[derive(Clone)]
pub struct CursorStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for CursorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorStore").finish_non_exhaustive()
    }
}

impl CursorStore {
    /// Create a new cursor store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the cursor for an instrument, if one was ever saved.
    pub async fn load(&self, id: InstrumentId) -> Result<Option<serde_json::Value>, StorageError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT cursor FROM retriever_cursors WHERE instrument_id = ?1")
                .bind(id.0)
                .fetch_optional(self.pool.inner())
                .await?;

        row.map(|(cursor,)| serde_json::from_str(&cursor))
            .transpose()
            .map_err(StorageError::from)
    }

    /// Replace the cursor for an instrument.
    pub async fn save(&self, id: InstrumentId, cursor: &serde_json::Value) -> Result<(), StorageError> {
        let now = chrono::Utc::now().timestamp_millis();
        let cursor_json = serde_json::to_string(cursor)?;

        sqlx::query(
            "INSERT INTO retriever_cursors (instrument_id, cursor, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (instrument_id) DO UPDATE SET
                 cursor = excluded.cursor,
                 updated_at = excluded.updated_at",
        )
        .bind(id.0)
        .bind(&cursor_json)
        .bind(now)
        .execute(self.pool.inner())
        .await?;

        Ok(())
    }
}
