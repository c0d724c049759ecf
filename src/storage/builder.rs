//! Storage builder and handles.
//!
//! Provides a builder pattern for constructing the storage layer
//! and a handles struct for accessing the stores.

use std::path::Path;

use crate::storage::db::SqlitePool;
use crate::storage::schema::init_schema;
use crate::storage::{CursorStore, InstrumentStore, StorageError};

/// Builder for constructing the storage layer.
pub struct StorageBuilder {
    url: String,
}

impl StorageBuilder {
    /// Create a new storage builder for a sqlx SQLite URL.
    ///
    /// Plain file paths are accepted and turned into `sqlite:<path>?mode=rwc`.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let url = if url.starts_with("sqlite:") {
            url
        } else {
            format!("sqlite:{url}?mode=rwc")
        };
        Self { url }
    }

    /// Connection URL the builder will use.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build the storage layer and return handles.
    pub async fn build(self) -> Result<StorageHandles, StorageError> {
        if let Some(parent) = database_parent_dir(&self.url)
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Internal(format!(
                    "Failed to create database directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let pool = SqlitePool::connect(&self.url).await?;
        init_schema(&pool).await?;

        Ok(StorageHandles {
            instrument_store: InstrumentStore::new(pool.clone()),
            cursor_store: CursorStore::new(pool.clone()),
            pool,
        })
    }
}

/// Handles to the storage layer stores.
pub struct StorageHandles {
    /// Instrument directory.
    pub instrument_store: InstrumentStore,
    /// Persisted retriever cursors.
    pub cursor_store: CursorStore,
    pool: SqlitePool,
}

impl StorageHandles {
    /// Gracefully shutdown the storage layer, closing all pooled connections.
    pub async fn shutdown(self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}

/// Directory holding the database file, for file-backed URLs.
fn database_parent_dir(url: &str) -> Option<&Path> {
    let path = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next()?;
    if path.is_empty() || path.starts_with(':') || path.starts_with("file:") {
        return None;
    }
    Path::new(path).parent()
}
