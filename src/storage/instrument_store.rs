//! Instrument directory storage.
//!
//! Instruments are keyed by unique name. Config-file instruments are synced
//! insert-only on startup: rows that already exist are left untouched so
//! edits made directly in the database survive restarts.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;
use crate::storage::types::{Instrument, InstrumentId, InstrumentRecord};

const SELECT_COLUMNS: &str = "SELECT id, name, type, config, enabled FROM instruments";

/// Instrument storage facade.
#[derive(Clone)]
pub struct InstrumentStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for InstrumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentStore").finish_non_exhaustive()
    }
}

impl InstrumentStore {
    /// Create a new instrument store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an instrument unless one with the same name exists.
    ///
    /// Returns the new ID, or `None` if the name was already present.
    pub async fn insert_if_not_exists(
        &self,
        record: &InstrumentRecord,
    ) -> Result<Option<InstrumentId>, StorageError> {
        let now = chrono::Utc::now().timestamp_millis();
        let config_json = serde_json::to_string(&record.config)?;

        let result = sqlx::query(
            "INSERT INTO instruments (name, type, config, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(&record.name)
        .bind(record.kind.as_deref())
        .bind(&config_json)
        .bind(record.enabled)
        .bind(now)
        .execute(self.pool.inner())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(InstrumentId(result.last_insert_rowid())))
    }

    /// List IDs of enabled instruments in ID order.
    pub async fn list_enabled_ids(&self) -> Result<Vec<InstrumentId>, StorageError> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT id FROM instruments WHERE enabled = 1 ORDER BY id")
                .fetch_all(self.pool.inner())
                .await?;

        Ok(rows.into_iter().map(|(id,)| InstrumentId(id)).collect())
    }

    /// Get an instrument by ID.
    ///
    /// # Errors
    /// `NotFound` if the ID does not exist; `Json` if the stored config blob
    /// is not valid JSON.
    pub async fn get(&self, id: InstrumentId) -> Result<Instrument, StorageError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id.0)
            .fetch_optional(self.pool.inner())
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("instrument {id}")))?;

        instrument_from_row(&row)
    }

    /// Enable or disable an instrument. Returns false if the ID is unknown.
    pub async fn set_enabled(&self, id: InstrumentId, enabled: bool) -> Result<bool, StorageError> {
        let now = chrono::Utc::now().timestamp_millis();
        let result =
            sqlx::query("UPDATE instruments SET enabled = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(enabled)
                .bind(now)
                .bind(id.0)
                .execute(self.pool.inner())
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert config-file instruments that are not yet in the directory.
    ///
    /// Existing rows win; nothing is updated or deleted.
    pub async fn sync_from_config(
        &self,
        records: &[InstrumentRecord],
    ) -> Result<SyncResult, StorageError> {
        let mut result = SyncResult::default();
        for record in records {
            match self.insert_if_not_exists(record).await? {
                Some(id) => {
                    tracing::info!(instrument = %record.name, id = %id, "Instrument added");
                    result.added += 1;
                }
                None => {
                    tracing::debug!(instrument = %record.name, "Instrument already present, kept");
                    result.existing += 1;
                }
            }
        }
        Ok(result)
    }
}

/// Sync result for config-file instruments.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncResult {
    /// Number of instruments inserted.
    pub added: usize,
    /// Number of instruments left as they were.
    pub existing: usize,
}

fn instrument_from_row(row: &SqliteRow) -> Result<Instrument, StorageError> {
    let config_str: String = row.try_get("config")?;

    Ok(Instrument {
        id: InstrumentId(row.try_get("id")?),
        name: row.try_get("name")?,
        kind: row.try_get("type")?,
        config: serde_json::from_str(&config_str)?,
        enabled: row.try_get("enabled")?,
    })
}
