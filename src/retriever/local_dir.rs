//! Local directory retriever.
//!
//! Picks up files dropped into a directory on local disk, in file name
//! order. The cursor is the set of file names already delivered that are
//! still present in the directory.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::retriever::{CandidateFile, Retriever, RetrieverContext, RetrieverError};

/// Type tag for [`LocalDirRetriever`].
pub const LOCAL_DIR_KIND: &str = "local_dir";

/// Default number of files staged per batch.
const DEFAULT_BATCH_SIZE: usize = 1;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Configuration for the local directory retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalDirConfig {
    /// Directory the instrument writes its files into.
    pub source_dir: PathBuf,
    /// Only pick up files with one of these extensions (case-insensitive,
    /// without the dot). Empty means all files.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Files staged per `load_next_file` call (default: 1).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl LocalDirConfig {
    fn accepts(&self, name: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

/// Persisted cursor shape.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalDirCursor {
    delivered: BTreeSet<String>,
}

/// State that only exists between `startup` and `shutdown`.
#[derive(Debug, Default)]
struct Session {
    delivered: BTreeSet<String>,
    offered: HashSet<String>,
    // Listed names not yet staged, in name order.
    queue: VecDeque<String>,
    listed: bool,
    dirty: bool,
}

/// Retriever reading files from a local directory.
pub struct LocalDirRetriever {
    config: LocalDirConfig,
    ctx: RetrieverContext,
    session: Option<Session>,
}

impl std::fmt::Debug for LocalDirRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDirRetriever")
            .field("instrument", &self.ctx.instrument_id)
            .field("config", &self.config)
            .field("started", &self.session.is_some())
            .finish()
    }
}

impl LocalDirRetriever {
    /// Create a retriever from a parsed configuration.
    pub fn new(ctx: RetrieverContext, config: LocalDirConfig) -> Self {
        Self {
            config,
            ctx,
            session: None,
        }
    }

    /// Create a retriever from a raw configuration blob.
    ///
    /// # Errors
    /// Returns `RetrieverError::Configuration` if the blob does not have the
    /// [`LocalDirConfig`] shape.
    pub fn from_config(
        ctx: RetrieverContext,
        config: serde_json::Value,
    ) -> Result<Self, RetrieverError> {
        let config: LocalDirConfig = serde_json::from_value(config)
            .map_err(|e| RetrieverError::Configuration(e.to_string()))?;
        Ok(Self::new(ctx, config))
    }

    fn session_mut(&mut self, op: &str) -> Result<&mut Session, RetrieverError> {
        self.session
            .as_mut()
            .ok_or_else(|| RetrieverError::Protocol(format!("{op} called before startup")))
    }

    async fn flush_cursor(&mut self) -> Result<(), RetrieverError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if !session.dirty {
            return Ok(());
        }

        let cursor = LocalDirCursor {
            delivered: session.delivered.clone(),
        };
        let value = serde_json::to_value(&cursor)
            .map_err(|e| RetrieverError::Internal(format!("failed to encode cursor: {e}")))?;
        self.ctx.cursors.save(self.ctx.instrument_id, &value).await?;
        session.dirty = false;
        Ok(())
    }

    /// Names of the accepted regular files in the source directory, sorted.
    async fn list_source(&self) -> Result<Vec<String>, RetrieverError> {
        let mut entries = tokio::fs::read_dir(&self.config.source_dir).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!(parent: &self.ctx.span, file = ?entry.file_name(), "Skipping file with non UTF-8 name");
                continue;
            };
            // Dot files are partial writes by convention.
            if name.starts_with('.') || !self.config.accepts(&name) {
                continue;
            }
            let is_file = match entry.file_type().await {
                Ok(t) if t.is_symlink() => tokio::fs::metadata(entry.path())
                    .await
                    .map(|m| m.is_file())
                    .unwrap_or(false),
                Ok(t) => t.is_file(),
                Err(_) => false,
            };
            if is_file {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    /// Re-list the source directory into the queue. Returns false when
    /// nothing is left to offer this cycle.
    ///
    /// The first listing of a session also drops cursor entries for files
    /// that are gone, so the cursor tracks the directory instead of growing
    /// forever.
    async fn refill(&mut self) -> Result<bool, RetrieverError> {
        let names = self.list_source().await?;
        let span = self.ctx.span.clone();
        let session = self.session_mut("load_next_file")?;

        if !session.listed {
            session.listed = true;
            let present: HashSet<&str> = names.iter().map(String::as_str).collect();
            let before = session.delivered.len();
            session.delivered.retain(|name| present.contains(name.as_str()));
            let pruned = before - session.delivered.len();
            if pruned > 0 {
                tracing::debug!(parent: &span, pruned, "Dropped cursor entries for removed files");
                session.dirty = true;
            }
        }

        let queue: VecDeque<String> = names
            .into_iter()
            .filter(|name| !session.delivered.contains(name) && !session.offered.contains(name))
            .collect();
        session.queue = queue;
        Ok(!session.queue.is_empty())
    }
}

#[async_trait::async_trait]
impl Retriever for LocalDirRetriever {
    fn kind(&self) -> &str {
        LOCAL_DIR_KIND
    }

    async fn test_configuration(&mut self) -> Result<bool, RetrieverError> {
        if self.config.batch_size == 0 {
            tracing::warn!(parent: &self.ctx.span, "batch_size must be positive");
            return Ok(false);
        }

        let dir = &self.config.source_dir;
        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                tracing::warn!(parent: &self.ctx.span, source_dir = %dir.display(), "source_dir is not a directory");
                return Ok(false);
            }
            Err(e) => {
                tracing::warn!(parent: &self.ctx.span, source_dir = %dir.display(), error = %e, "source_dir is not accessible");
                return Ok(false);
            }
        }

        if let Err(e) = tokio::fs::read_dir(dir).await {
            tracing::warn!(parent: &self.ctx.span, source_dir = %dir.display(), error = %e, "source_dir is not readable");
            return Ok(false);
        }

        Ok(true)
    }

    async fn startup(&mut self) -> Result<bool, RetrieverError> {
        let cursor = match self.ctx.cursors.load(self.ctx.instrument_id).await {
            Ok(Some(value)) => match serde_json::from_value::<LocalDirCursor>(value) {
                Ok(cursor) => cursor,
                Err(e) => {
                    tracing::error!(parent: &self.ctx.span, error = %e, "Stored cursor is unreadable");
                    return Ok(false);
                }
            },
            Ok(None) => LocalDirCursor::default(),
            Err(e) => {
                tracing::error!(parent: &self.ctx.span, error = %e, "Failed to load cursor");
                return Ok(false);
            }
        };

        tracing::debug!(
            parent: &self.ctx.span,
            delivered = cursor.delivered.len(),
            "Cursor loaded"
        );
        self.session = Some(Session {
            delivered: cursor.delivered,
            ..Session::default()
        });
        Ok(true)
    }

    async fn load_next_file(&mut self) -> Result<Option<Vec<CandidateFile>>, RetrieverError> {
        self.session_mut("load_next_file")?;
        self.flush_cursor().await?;

        loop {
            if self.session_mut("load_next_file")?.queue.is_empty() && !self.refill().await? {
                return Ok(None);
            }

            let batch_size = self.config.batch_size;
            let session = self.session_mut("load_next_file")?;
            let take = batch_size.min(session.queue.len());
            let names: Vec<String> = session.queue.drain(..take).collect();
            session.offered.extend(names.iter().cloned());

            let mut batch = Vec::with_capacity(names.len());
            for name in names {
                match tokio::fs::read(self.config.source_dir.join(&name)).await {
                    Ok(content) => batch.push(CandidateFile::new(name, content)),
                    Err(e) => {
                        tracing::warn!(parent: &self.ctx.span, file = %name, error = %e, "Could not read file, will retry next cycle");
                    }
                }
            }

            // Unreadable files are marked offered, so the loop always shrinks
            // what is left to list.
            if !batch.is_empty() {
                return Ok(Some(batch));
            }
        }
    }

    fn file_succeeded(&mut self, file: &CandidateFile) -> Result<(), RetrieverError> {
        let session = self.session_mut("file_succeeded")?;
        if session.delivered.insert(file.name.clone()) {
            session.dirty = true;
        }
        Ok(())
    }

    fn file_failed(&mut self, file: &CandidateFile) -> Result<(), RetrieverError> {
        self.session_mut("file_failed")?;
        tracing::warn!(parent: &self.ctx.span, file = %file.name, "Delivery failed, file stays pending for the next cycle");
        Ok(())
    }

    fn file_not_processed(&mut self, file: &CandidateFile) -> Result<(), RetrieverError> {
        self.session_mut("file_not_processed")?;
        tracing::debug!(parent: &self.ctx.span, file = %file.name, "File deferred to a later cycle");
        Ok(())
    }

    async fn checkpoint(&mut self) -> Result<(), RetrieverError> {
        self.session_mut("checkpoint")?;
        self.flush_cursor().await
    }

    async fn shutdown(&mut self) -> Result<(), RetrieverError> {
        let flushed = self.flush_cursor().await;
        self.session = None;
        flushed
    }
}
